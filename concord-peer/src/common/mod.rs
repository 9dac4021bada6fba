pub mod commands;
pub mod events;
pub mod types;

pub use commands::ControllerCommand;
pub use events::ControllerEvent;
pub use types::{ChatEnvelope, ConnectionDirection, ConnectionInfo, Stats};
