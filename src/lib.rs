//! chimera - client SDK for the Chimera inference gateway
//!
//! This library formats chat, image, speech and moderation requests, attaches
//! bearer authentication and routes traffic directly or through an optional
//! forward proxy that is probed before use.

pub mod client;
pub mod config;
pub mod error;
pub mod transport;
pub mod types;

pub use client::ChimeraClient;
pub use config::{ApiKey, ClientConfig, Config};
pub use error::{Error, Result};
pub use transport::{ProxyConfig, ProxyProtocol, TransportCache};
