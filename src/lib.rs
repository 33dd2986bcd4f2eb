// Protocol codecs and the interpreter live in the core crate
pub use busgate_core::{
    address, command, compress, framing, hardware, hash, interpret, packet, proto,
};

// Core types are re-exported; the EventBus needs tokio and lives here
pub mod types {
    pub use busgate_core::types::*;
    pub mod events;
}

pub mod client;
pub mod config;
pub mod detail;
pub mod handshake;
pub mod keepalive;
pub mod store;
pub mod transport;

pub use busgate_core::{Address, OutboundCommand};
pub use client::{Client, ClientError};
pub use config::ClientConfig;
pub use detail::{DetailRequester, DetailScheduler, DetailSchedulerConfig};
pub use store::{DeviceRegistry, MemoryRegistry};
