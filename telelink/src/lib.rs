pub use telelink_core::model::{BusinessRole, ClientId, PeerIdentity, RoomId};

pub mod model {
    pub use telelink_core::model::*;
}

pub mod time {
    pub use telelink_core::time::*;
}

#[cfg(feature = "peer")]
pub mod peer {
    pub use telelink_peer::*;
}
