pub mod client;
pub mod config;

pub use client::{ClientState, NetworkClient};
pub use config::ClientConfig;
