use telelink_core::CodecError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PeerError>;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("transport setup failed: {0}")]
    Setup(String),

    #[error("webrtc error: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error("transport is closed")]
    TransportClosed,

    #[error("invalid signaling state for {operation}: {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("ice candidate rejected: {0}")]
    IceCandidate(String),

    #[error("data channel error: {0}")]
    DataChannel(String),

    #[error("signaling error: {0}")]
    Signaling(#[from] SignalingError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("session is no longer running")]
    SessionStopped,
}

impl From<anyhow::Error> for PeerError {
    fn from(err: anyhow::Error) -> Self {
        PeerError::Setup(format!("{err:#}"))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignalingError {
    #[error("signaling channel is not connected")]
    NotConnected,

    #[error("room {0} is unavailable")]
    RoomUnavailable(String),

    #[error("send failed: {0}")]
    SendFailed(String),
}
