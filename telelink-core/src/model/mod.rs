mod error;
mod packet;
mod peer;
mod presence;
mod room;
mod signaling;

pub use error::CodecError;
pub use packet::{Packet, PacketBody};
pub use peer::{BusinessRole, ClientId, ConnectionId, PeerIdentity};
pub use presence::{PresenceRecord, has_patient_and_practitioner, valid_participants};
pub use room::RoomId;
pub use signaling::{IceCandidate, IceServerConfig, SdpKind, SessionDescription, SignalPayload, SignalingMessage};
