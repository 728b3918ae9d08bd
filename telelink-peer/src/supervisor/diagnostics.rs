use crate::negotiation::PerfectNegotiationState;
use crate::transport::{DataChannelState, IceConnectionState, PeerConnectionState, SignalingState};
use serde::Serialize;
use telelink_core::{BusinessRole, ClientId, ConnectionId, RoomId};

/// Point-in-time view of a session for support tooling.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionDiagnostics {
    pub client_id: ClientId,
    pub business_role: BusinessRole,
    pub room_id: RoomId,
    pub session_phase: SessionPhase,
    pub epoch: u64,
    pub connection_id: Option<ConnectionId>,
    pub connection_state: Option<PeerConnectionState>,
    pub ice_connection_state: Option<IceConnectionState>,
    pub signaling_state: Option<SignalingState>,
    pub room_ready: bool,
    pub participants: Vec<ClientId>,
    pub data_channel_state: Option<DataChannelState>,
    pub round_trip_ms: Option<u64>,
    pub reset_count: u32,
    pub last_error: Option<String>,
    pub negotiation: Option<PerfectNegotiationState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Idle,
    Connecting,
    Active,
}

/// Cheap status published on every change through a `watch` channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub phase: SessionPhase,
    pub connection_state: PeerConnectionState,
    pub room_ready: bool,
    pub data_channel_available: bool,
    pub reset_count: u32,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Idle,
            connection_state: PeerConnectionState::New,
            room_ready: false,
            data_channel_available: false,
            reset_count: 0,
        }
    }
}

impl SessionStatus {
    pub fn is_connected(&self) -> bool {
        self.connection_state == PeerConnectionState::Connected
    }
}
