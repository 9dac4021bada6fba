pub mod behavior;
pub mod chat;
pub mod client;
pub mod router;
pub mod state;
pub mod transport;

pub use client::PeerNode;
