pub mod config;
pub mod data_channel;
pub mod error;
pub mod negotiation;
pub mod observer;
pub mod signaling;
pub mod supervisor;
pub mod timer;
pub mod transport;

pub use config::SessionConfig;
pub use data_channel::{DataChannelManager, InboundMessage};
pub use error::{PeerError, Result, SignalingError};
pub use negotiation::{NegotiationRole, PerfectNegotiationState};
pub use observer::{ChatMessage, Measurement, NoopObserver, SessionObserver};
pub use signaling::{LocalSignalingChannel, LocalSignalingHub, SignalingChannel, SignalingEvent};
pub use supervisor::{
    ConnectionDiagnostics, PeerSession, SessionBuilder, SessionHandle, SessionPhase, SessionStatus,
};
pub use transport::{
    DeviceTag, OutgoingTrack, PeerConnectionState, PeerTransport, RemoteTrack, RtcTransportFactory,
    TrackKind, TrackUpdate, TransportFactory,
};
