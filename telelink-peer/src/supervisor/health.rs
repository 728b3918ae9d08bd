use crate::transport::{IceConnectionState, PeerConnectionState, SignalingState};

/// A transport can still heal by itself unless one of its state machines
/// reached `failed` or `closed`.
pub fn is_recoverable(
    connection: PeerConnectionState,
    ice: IceConnectionState,
    signaling: SignalingState,
) -> bool {
    !matches!(connection, PeerConnectionState::Failed | PeerConnectionState::Closed)
        && !matches!(ice, IceConnectionState::Failed | IceConnectionState::Closed)
        && signaling != SignalingState::Closed
}

/// States that arm the reset grace timer.
pub fn is_degraded(connection: PeerConnectionState) -> bool {
    matches!(
        connection,
        PeerConnectionState::Disconnected | PeerConnectionState::Failed
    )
}

/// Decision taken when the grace timer expires.
pub fn should_reset(
    connection: PeerConnectionState,
    ice: IceConnectionState,
    signaling: SignalingState,
    room_ready: bool,
) -> bool {
    if is_recoverable(connection, ice, signaling) {
        return false;
    }
    !room_ready || matches!(connection, PeerConnectionState::Failed | PeerConnectionState::Closed)
}

/// Whether a link negotiated with a peer that has since left can serve
/// that peer's return. The remote end of such a link is gone unless the
/// departure was only a presence glitch.
pub fn is_usable_after_departure(connection: PeerConnectionState, channel_open: bool) -> bool {
    connection == PeerConnectionState::Connected && channel_open
}
