use crate::error::SignalingError;
use async_trait::async_trait;
use telelink_core::{PresenceRecord, SignalingMessage, has_patient_and_practitioner};
use tokio::sync::mpsc;

/// What a signaling subscription delivers.
#[derive(Debug, Clone)]
pub enum SignalingEvent {
    Message(SignalingMessage),
    /// Full presence snapshot of the room, including the local peer.
    Presence(Vec<PresenceRecord>),
}

/// Room-scoped message bus plus presence directory. Delivery is at most
/// once with no ordering guarantee across senders.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Join the room and start receiving events. Calling it again replaces
    /// the previous subscription.
    async fn connect(&self) -> Result<mpsc::UnboundedReceiver<SignalingEvent>, SignalingError>;

    async fn disconnect(&self);

    async fn send_message(&self, message: SignalingMessage) -> Result<(), SignalingError>;

    /// Current participants that carry a business role.
    fn valid_participants(&self) -> Vec<PresenceRecord>;

    fn has_patient_and_practitioner(&self) -> bool {
        has_patient_and_practitioner(&self.valid_participants())
    }
}
