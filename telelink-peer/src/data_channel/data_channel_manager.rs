use crate::error::PeerError;
use crate::observer::{ChatMessage, Measurement};
use crate::transport::{ChannelId, DataChannelState, DataPipe, PeerConnectionState, PeerTransport};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use telelink_core::time::now_millis;
use telelink_core::{Packet, PacketBody, PeerIdentity};
use tracing::{debug, info, warn};

/// Application-level result of an inbound packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    Chat(ChatMessage),
    Measurement(Measurement),
    /// The remote is about to close the channel.
    Closing,
}

/// Owns the single application data channel of a transport.
pub struct DataChannelManager {
    identity: PeerIdentity,
    label: String,
    transport: Arc<dyn PeerTransport>,
    channel: Option<Arc<dyn DataPipe>>,
    round_trip: Option<Duration>,
}

impl DataChannelManager {
    pub fn new(identity: PeerIdentity, label: impl Into<String>, transport: Arc<dyn PeerTransport>) -> Self {
        Self {
            identity,
            label: label.into(),
            transport,
            channel: None,
            round_trip: None,
        }
    }

    /// Reuse the open channel or create a fresh one. `None` when the
    /// transport is closed or refuses the channel.
    pub async fn create_data_channel(&mut self) -> Option<Arc<dyn DataPipe>> {
        if let Some(channel) = &self.channel {
            if channel.ready_state() == DataChannelState::Open {
                return Some(Arc::clone(channel));
            }
        }
        if let Some(stale) = self.channel.take() {
            debug!(category = "data_channel", channel = %stale.id(), state = ?stale.ready_state(), "discarding channel that is not open");
            if let Err(e) = stale.close().await {
                debug!(category = "data_channel", "closing discarded channel: {e}");
            }
        }

        if self.transport.connection_state() == PeerConnectionState::Closed {
            warn!(category = "data_channel", "transport closed, not creating a data channel");
            return None;
        }

        match self.transport.create_data_channel(&self.label).await {
            Ok(channel) => {
                info!(category = "data_channel", channel = %channel.id(), label = %self.label, "data channel created");
                self.channel = Some(Arc::clone(&channel));
                Some(channel)
            }
            Err(PeerError::TransportClosed) => {
                warn!(category = "data_channel", "transport closed, not creating a data channel");
                None
            }
            Err(e) => {
                warn!(category = "data_channel", "failed to create data channel: {e}");
                None
            }
        }
    }

    /// Take over a channel the remote created. Returns whether it was
    /// adopted.
    pub async fn adopt(&mut self, channel: Arc<dyn DataPipe>) -> bool {
        if channel.label() != self.label {
            debug!(category = "data_channel", label = %channel.label(), "ignoring channel with foreign label");
            return false;
        }
        if let Some(previous) = self.channel.replace(Arc::clone(&channel)) {
            if previous.id() != channel.id() {
                if let Err(e) = previous.close().await {
                    debug!(category = "data_channel", "closing replaced channel: {e}");
                }
            }
        }
        info!(category = "data_channel", channel = %channel.id(), state = ?channel.ready_state(), "adopted remote data channel");
        true
    }

    pub fn owns(&self, id: ChannelId) -> bool {
        self.channel.as_ref().is_some_and(|c| c.id() == id)
    }

    /// Forget the channel if `id` is the current one.
    pub fn on_closed(&mut self, id: ChannelId) -> bool {
        if !self.owns(id) {
            return false;
        }
        info!(category = "data_channel", channel = %id, "data channel closed");
        self.channel = None;
        self.round_trip = None;
        true
    }

    pub fn is_available(&self) -> bool {
        self.state() == Some(DataChannelState::Open)
    }

    pub fn state(&self) -> Option<DataChannelState> {
        self.channel.as_ref().map(|c| c.ready_state())
    }

    pub fn round_trip(&self) -> Option<Duration> {
        self.round_trip
    }

    pub async fn send_chat(&self, content: impl Into<String>) -> bool {
        self.send(PacketBody::Chat {
            content: content.into(),
        })
        .await
    }

    pub async fn send_measurement(&self, device: impl Into<String>, kind: impl Into<String>, data: Vec<u8>) -> bool {
        self.send(PacketBody::Measurement {
            device: device.into(),
            kind: kind.into(),
            data,
        })
        .await
    }

    pub async fn send_ping(&self) -> bool {
        self.send(PacketBody::Ping {
            sent_at: now_millis(),
        })
        .await
    }

    /// Envelope and transmit. `false` when there is no open channel or the
    /// send fails.
    pub async fn send(&self, body: PacketBody) -> bool {
        let Some(channel) = self.channel.as_ref().filter(|c| c.ready_state() == DataChannelState::Open) else {
            debug!(category = "data_channel", kind = body.kind(), "no open data channel");
            return false;
        };

        let packet = Packet::new(
            self.identity.client_id.clone(),
            self.identity.business_role,
            body,
        );
        let bytes = match packet.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(category = "data_channel", "failed to encode packet: {e}");
                return false;
            }
        };

        match channel.send(&bytes).await {
            Ok(()) => true,
            Err(e) => {
                warn!(category = "data_channel", kind = packet.body.kind(), "send failed: {e}");
                false
            }
        }
    }

    /// Decode an inbound packet. Keepalives are answered here and never
    /// surface.
    pub async fn handle_message(&mut self, id: ChannelId, data: Bytes) -> Option<InboundMessage> {
        if !self.owns(id) {
            debug!(category = "data_channel", channel = %id, "message on a channel we do not own");
            return None;
        }

        let packet = match Packet::decode(&data) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(category = "data_channel", len = data.len(), "dropping undecodable packet: {e}");
                return None;
            }
        };

        match packet.body {
            PacketBody::Chat { content } => Some(InboundMessage::Chat(ChatMessage {
                sender: packet.sender,
                sender_role: packet.sender_role,
                content,
                timestamp: packet.timestamp,
            })),
            PacketBody::Measurement { device, kind, data } => {
                Some(InboundMessage::Measurement(Measurement {
                    sender: packet.sender,
                    sender_role: packet.sender_role,
                    device,
                    kind,
                    data: Bytes::from(data),
                    timestamp: packet.timestamp,
                }))
            }
            PacketBody::ChannelClosing => {
                info!(category = "data_channel", sender = %packet.sender, "remote is closing the data channel");
                Some(InboundMessage::Closing)
            }
            PacketBody::Ping { sent_at } => {
                self.send(PacketBody::Pong { sent_at }).await;
                None
            }
            PacketBody::Pong { sent_at } => {
                let rtt = Duration::from_millis(now_millis().saturating_sub(sent_at));
                debug!(category = "data_channel", rtt_ms = rtt.as_millis() as u64, "heartbeat");
                self.round_trip = Some(rtt);
                None
            }
        }
    }

    /// Best-effort closing notice, then close.
    pub async fn close(&mut self) {
        let Some(channel) = self.channel.clone() else {
            return;
        };
        if channel.ready_state() == DataChannelState::Open {
            self.send(PacketBody::ChannelClosing).await;
        }
        self.channel = None;
        self.round_trip = None;

        if let Err(e) = channel.close().await {
            debug!(category = "data_channel", "close failed: {e}");
        }
        info!(category = "data_channel", channel = %channel.id(), "data channel closed locally");
    }
}
