mod local_hub;
mod signaling_channel;

pub use local_hub::*;
pub use signaling_channel::*;
