pub mod model;
pub mod time;

pub use model::*;
