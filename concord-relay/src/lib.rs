pub mod config;
pub mod http;
pub mod network;
pub mod queue;
pub mod registry;

pub use config::RelayConfig;
pub use http::{app, RelayState};
