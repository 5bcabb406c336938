//! Shared transports and the per-call handles bound to them.

use std::sync::Arc;

use reqwest::header::HeaderMap;
use reqwest::{Client, RequestBuilder};

use super::proxy_config::ProxyTarget;

/// Which path a transport's traffic takes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportRoute {
    /// No proxy was configured.
    Direct,
    /// Traffic goes through the given forward proxy.
    Proxied(ProxyTarget),
    /// A proxy was configured but could not be used; traffic goes direct.
    Fallback(FallbackReason),
}

impl TransportRoute {
    pub fn is_proxied(&self) -> bool {
        matches!(self, TransportRoute::Proxied(_))
    }

    pub fn proxy(&self) -> Option<&ProxyTarget> {
        match self {
            TransportRoute::Proxied(target) => Some(target),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransportRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportRoute::Direct => write!(f, "direct"),
            TransportRoute::Proxied(target) => write!(f, "proxied via {}", target),
            TransportRoute::Fallback(reason) => write!(f, "direct ({})", reason),
        }
    }
}

/// Why a configured proxy was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    /// The descriptor failed validation.
    InvalidConfig { fields: Vec<&'static str> },
    /// The proxied client could not be constructed.
    BuildFailed(String),
    /// The liveness probe through the proxy did not return 200.
    ProxyOffline,
}

impl std::fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FallbackReason::InvalidConfig { fields } => {
                write!(f, "invalid proxy config: {}", fields.join(", "))
            }
            FallbackReason::BuildFailed(message) => write!(f, "proxy setup failed: {}", message),
            FallbackReason::ProxyOffline => write!(f, "proxy is offline"),
        }
    }
}

/// A reusable HTTP client together with the route it was built for.
///
/// Cloning is cheap and every clone refers to the same instance.
#[derive(Debug, Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

#[derive(Debug)]
struct TransportInner {
    client: Client,
    route: TransportRoute,
}

impl Transport {
    pub(crate) fn new(client: Client, route: TransportRoute) -> Self {
        Self {
            inner: Arc::new(TransportInner { client, route }),
        }
    }

    pub fn client(&self) -> &Client {
        &self.inner.client
    }

    pub fn route(&self) -> &TransportRoute {
        &self.inner.route
    }

    /// Whether both values refer to the same underlying instance.
    pub fn same_instance(&self, other: &Transport) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Bind a base URL and default headers for one caller.
    ///
    /// The shared transport is left untouched, so callers with different
    /// header sets can use the same destination concurrently.
    pub fn bind(&self, base_url: &str, headers: HeaderMap) -> TransportHandle {
        TransportHandle {
            transport: self.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
            headers,
        }
    }
}

/// A [`Transport`] bound to a base URL and default headers.
#[derive(Debug, Clone)]
pub struct TransportHandle {
    transport: Transport,
    base_url: String,
    headers: HeaderMap,
}

impl TransportHandle {
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn route(&self) -> &TransportRoute {
        self.transport.route()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Resolve `path` against the base URL. Absolute URLs pass through.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.transport
            .client()
            .get(self.url(path))
            .headers(self.headers.clone())
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.transport
            .client()
            .post(self.url(path))
            .headers(self.headers.clone())
    }
}
