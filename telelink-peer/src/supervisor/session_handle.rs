use crate::error::{PeerError, Result};
use crate::negotiation::PerfectNegotiationState;
use crate::supervisor::diagnostics::{ConnectionDiagnostics, SessionStatus};
use crate::supervisor::session_command::SessionCommand;
use crate::transport::{DeviceTag, OutgoingTrack, TrackUpdate};
use tokio::sync::{mpsc, oneshot, watch};

/// Cloneable front door to a running [`PeerSession`](crate::supervisor::PeerSession).
/// The session shuts down once every handle is dropped.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    status: watch::Receiver<SessionStatus>,
}

impl SessionHandle {
    pub(crate) fn new(
        commands: mpsc::Sender<SessionCommand>,
        status: watch::Receiver<SessionStatus>,
    ) -> Self {
        Self { commands, status }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| PeerError::SessionStopped)?;
        response.await.map_err(|_| PeerError::SessionStopped)
    }

    /// Join signaling and start negotiating. No-op while already running.
    pub async fn connect(&self) -> Result<()> {
        self.request(|reply| SessionCommand::Connect { reply }).await?
    }

    pub async fn disconnect(&self) {
        let _ = self
            .request(|reply| SessionCommand::Disconnect { reply })
            .await;
    }

    pub async fn reset_peer_connection(&self) -> Result<()> {
        self.request(|reply| SessionCommand::ResetPeerConnection { reply })
            .await?
    }

    pub fn is_connected(&self) -> bool {
        self.status.borrow().is_connected()
    }

    pub fn is_room_ready(&self) -> bool {
        self.status.borrow().room_ready
    }

    pub fn is_data_channel_available(&self) -> bool {
        self.status.borrow().data_channel_available
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// `false` when there is no open data channel.
    pub async fn send_chat_message(&self, content: impl Into<String>) -> bool {
        let content = content.into();
        self.request(|reply| SessionCommand::SendChat { content, reply })
            .await
            .unwrap_or(false)
    }

    pub async fn send_measurement(
        &self,
        device: impl Into<String>,
        kind: impl Into<String>,
        data: Vec<u8>,
    ) -> bool {
        let (device, kind) = (device.into(), kind.into());
        self.request(|reply| SessionCommand::SendMeasurement {
            device,
            kind,
            data,
            reply,
        })
        .await
        .unwrap_or(false)
    }

    pub async fn replace_device_stream(
        &self,
        track: OutgoingTrack,
        device: DeviceTag,
    ) -> Result<TrackUpdate> {
        self.request(|reply| SessionCommand::ReplaceDeviceStream {
            device,
            track,
            reply,
        })
        .await?
    }

    pub async fn connection_diagnostics(&self) -> Option<ConnectionDiagnostics> {
        self.request(|reply| SessionCommand::Diagnostics { reply })
            .await
            .ok()
    }

    pub async fn perfect_negotiation_state(&self) -> Option<PerfectNegotiationState> {
        self.request(|reply| SessionCommand::NegotiationState { reply })
            .await
            .ok()
            .flatten()
    }
}
