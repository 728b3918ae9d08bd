use crate::transport::{PeerConnectionState, RemoteTrack};
use async_trait::async_trait;
use bytes::Bytes;
use telelink_core::{BusinessRole, ClientId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub sender: ClientId,
    pub sender_role: BusinessRole,
    pub content: String,
    /// Sender clock, milliseconds since the Unix epoch.
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Measurement {
    pub sender: ClientId,
    pub sender_role: BusinessRole,
    pub device: String,
    pub kind: String,
    pub data: Bytes,
    pub timestamp: u64,
}

/// Receives everything a session wants the application to know about.
/// All methods default to no-ops.
#[async_trait]
pub trait SessionObserver: Send + Sync {
    async fn on_connection_state_change(&self, _state: PeerConnectionState) {}

    async fn on_room_ready(&self, _ready: bool) {}

    async fn on_chat_message(&self, _message: ChatMessage) {}

    async fn on_measurement(&self, _measurement: Measurement) {}

    async fn on_remote_stream(&self, _track: RemoteTrack) {}

    async fn on_data_channel_state(&self, _available: bool) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}
