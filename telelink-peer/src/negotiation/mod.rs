mod engine;
mod negotiation_state;
mod role_coordinator;

pub use engine::*;
pub use negotiation_state::*;
pub use role_coordinator::*;
