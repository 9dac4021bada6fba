pub mod common;
pub mod config;
pub mod identity;
pub mod known_peers;
pub mod network;
pub mod relay_client;
pub mod relay_http;
