//! Connection management for the gateway client.
//!
//! This module owns every decision about how requests leave the process:
//! which forward proxy (if any) to use, whether that proxy is alive, and how
//! long a built transport is kept around for reuse.

pub mod builder;
mod cache;
mod handle;
pub mod probe;
mod proxy_config;

pub use cache::{TransportCache, TRANSPORT_TTL};
pub use handle::{FallbackReason, Transport, TransportHandle, TransportRoute};
pub use probe::{HttpProber, ProxyProber, PROBE_TIMEOUT, PROBE_URL};
pub use proxy_config::{
    ProxyAuthConfig, ProxyConfig, ProxyCredentials, ProxyProtocol, ProxyTarget, ProxyValidation,
};
