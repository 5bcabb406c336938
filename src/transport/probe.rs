//! One-shot reachability check for a forward proxy.

use std::time::Duration;

use reqwest::StatusCode;

use super::builder;
use super::proxy_config::ProxyTarget;

/// Always-available public endpoint fetched through the candidate proxy.
pub const PROBE_URL: &str = "https://www.google.com/";

/// How long a probe may take before the proxy is considered offline.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Decides whether a proxy is usable.
///
/// Implementations never fail: any problem means "offline".
#[async_trait::async_trait]
pub trait ProxyProber: Send + Sync {
    async fn probe(&self, proxy: &ProxyTarget) -> bool;
}

/// Probes by issuing a single GET through the proxy and expecting exactly 200.
#[derive(Debug, Clone)]
pub struct HttpProber {
    url: String,
    timeout: Duration,
}

impl HttpProber {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for HttpProber {
    fn default() -> Self {
        Self::new(PROBE_URL, PROBE_TIMEOUT)
    }
}

#[async_trait::async_trait]
impl ProxyProber for HttpProber {
    async fn probe(&self, proxy: &ProxyTarget) -> bool {
        let client = match builder::proxied_client(proxy, Some(self.timeout)) {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!(proxy = %proxy, error = %e, "Proxy online check failed");
                return false;
            }
        };

        match client.get(&self.url).send().await {
            Ok(response) => {
                let status = response.status();
                tracing::debug!(
                    proxy = %proxy,
                    status = status.as_u16(),
                    "Proxy online check completed"
                );
                status == StatusCode::OK
            }
            Err(e) => {
                tracing::warn!(proxy = %proxy, error = %e, "Proxy online check failed");
                false
            }
        }
    }
}
