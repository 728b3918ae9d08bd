mod diagnostics;
mod health;
mod session;
mod session_command;
mod session_handle;

pub use diagnostics::*;
pub use health::*;
pub use session::*;
pub use session_command::*;
pub use session_handle::*;
