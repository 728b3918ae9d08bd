use crate::config::SessionConfig;
use crate::error::Result;
use crate::transport::transport_event::TransportEventSink;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use telelink_core::{ConnectionId, IceCandidate, SessionDescription};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    HaveLocalPranswer,
    HaveRemotePranswer,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataChannelState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Identifies one data channel within a session, unique across transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ChannelId(pub u64);

impl ChannelId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dc-{}", self.0)
    }
}

/// Source device of an outgoing media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceTag {
    Camera,
    Instrument,
    Screen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingTrack {
    pub track_id: String,
    pub stream_id: String,
    pub kind: TrackKind,
    /// Codec mime type, e.g. `video/VP8`.
    pub codec: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteTrack {
    pub track_id: String,
    pub stream_id: String,
    pub kind: TrackKind,
}

/// Outcome of [`PeerTransport::replace_track`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackUpdate {
    /// An existing sender now carries the new track; no renegotiation.
    Replaced,
    /// A new sender was added; the transport will ask for negotiation.
    Added,
}

/// A reliable ordered message pipe over the peer link.
#[async_trait]
pub trait DataPipe: Send + Sync {
    fn id(&self) -> ChannelId;

    fn label(&self) -> String;

    fn ready_state(&self) -> DataChannelState;

    async fn send(&self, data: &Bytes) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// The peer connection as seen by the negotiation engine and supervisor.
/// Implementations report asynchronous happenings through the
/// [`TransportEventSink`] they were created with.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    fn connection_id(&self) -> ConnectionId;

    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    /// Abandon a pending local offer and return to `stable`.
    async fn rollback(&self) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    fn signaling_state(&self) -> SignalingState;

    fn connection_state(&self) -> PeerConnectionState;

    fn ice_connection_state(&self) -> IceConnectionState;

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataPipe>>;

    async fn replace_track(&self, device: DeviceTag, track: OutgoingTrack) -> Result<TrackUpdate>;

    /// Stop reporting events. Called before the transport is replaced.
    fn detach(&self);

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        config: &SessionConfig,
        events: TransportEventSink,
    ) -> Result<Arc<dyn PeerTransport>>;
}
