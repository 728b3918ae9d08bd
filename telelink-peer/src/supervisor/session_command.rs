use crate::error::Result;
use crate::negotiation::PerfectNegotiationState;
use crate::supervisor::diagnostics::ConnectionDiagnostics;
use crate::transport::{DeviceTag, OutgoingTrack, TrackUpdate};
use tokio::sync::oneshot;

/// Requests a [`SessionHandle`](crate::supervisor::SessionHandle) sends to
/// its session loop.
#[derive(Debug)]
pub enum SessionCommand {
    Connect {
        reply: oneshot::Sender<Result<()>>,
    },

    Disconnect {
        reply: oneshot::Sender<()>,
    },

    ResetPeerConnection {
        reply: oneshot::Sender<Result<()>>,
    },

    SendChat {
        content: String,
        reply: oneshot::Sender<bool>,
    },

    SendMeasurement {
        device: String,
        kind: String,
        data: Vec<u8>,
        reply: oneshot::Sender<bool>,
    },

    /// Swap the outgoing track of a device, adding a sender if needed.
    ReplaceDeviceStream {
        device: DeviceTag,
        track: OutgoingTrack,
        reply: oneshot::Sender<Result<TrackUpdate>>,
    },

    Diagnostics {
        reply: oneshot::Sender<ConnectionDiagnostics>,
    },

    NegotiationState {
        reply: oneshot::Sender<Option<PerfectNegotiationState>>,
    },
}
