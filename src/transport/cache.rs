//! Destination-keyed cache of reusable transports.
//!
//! Each destination (base URL) owns at most one entry. An entry is built
//! lazily on first use, its proxy is probed once, and a dead proxy is replaced
//! by a direct transport for the rest of the entry's lifetime. Every acquire
//! re-arms a time-to-live; an entry nobody asks for within it is dropped and
//! the next acquire starts from scratch.
//!
//! The map is a [`DashMap`] of per-destination slots. Each slot carries a
//! `tokio::sync::Mutex` held across the probe, so concurrent acquires for
//! one destination are serialized and probe at most once.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use reqwest::header::HeaderMap;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use super::builder;
use super::handle::{FallbackReason, Transport, TransportHandle, TransportRoute};
use super::probe::{HttpProber, ProxyProber};
use super::proxy_config::{ProxyConfig, ProxyTarget};

/// Idle lifetime of a cache entry.
pub const TRANSPORT_TTL: Duration = Duration::from_secs(4 * 60 * 60);

static SHARED: Lazy<Arc<TransportCache>> = Lazy::new(|| Arc::new(TransportCache::new()));

struct TransportEntry {
    transport: Transport,
    /// Probe result; `None` until probed (and again after a fallback).
    is_online: Option<bool>,
    expiry: Option<AbortHandle>,
}

impl TransportEntry {
    fn new(transport: Transport) -> Self {
        Self {
            transport,
            is_online: None,
            expiry: None,
        }
    }

    /// The proxy still waiting for its liveness check, if any.
    fn pending_probe(&self) -> Option<ProxyTarget> {
        match (self.is_online, self.transport.route()) {
            (None, TransportRoute::Proxied(target)) => Some(target.clone()),
            _ => None,
        }
    }

    fn fall_back_to_direct(&mut self) {
        if let Some(expiry) = self.expiry.take() {
            expiry.abort();
        }
        self.transport = builder::direct(TransportRoute::Fallback(FallbackReason::ProxyOffline));
        self.is_online = None;
    }

    fn rearm_expiry(&mut self, expiry: AbortHandle) {
        if let Some(previous) = self.expiry.replace(expiry) {
            previous.abort();
        }
    }
}

type Slot = Arc<Mutex<Option<TransportEntry>>>;

/// Registry of live transports, one per destination.
pub struct TransportCache {
    entries: Arc<DashMap<String, Slot>>,
    prober: Arc<dyn ProxyProber>,
    ttl: Duration,
}

impl TransportCache {
    /// Empty cache probing with [`HttpProber`].
    pub fn new() -> Self {
        Self::with_prober(Arc::new(HttpProber::default()))
    }

    pub fn with_prober(prober: Arc<dyn ProxyProber>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            prober,
            ttl: TRANSPORT_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Process-wide instance used by clients that were not handed one.
    pub fn shared() -> Arc<TransportCache> {
        SHARED.clone()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of destinations currently cached.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, destination: &str) -> bool {
        self.entries.contains_key(destination)
    }

    /// Get the transport for `destination`, building and probing it if needed,
    /// and bind it to `destination` and `headers` for this caller.
    ///
    /// Never fails: an invalid or unreachable proxy yields a direct transport,
    /// visible through [`TransportHandle::route`].
    pub async fn acquire(
        &self,
        destination: &str,
        headers: HeaderMap,
        proxy: Option<&ProxyConfig>,
    ) -> TransportHandle {
        loop {
            let slot: Slot = self
                .entries
                .entry(destination.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(None)))
                .value()
                .clone();

            let mut guard = slot.lock().await;

            // The slot expired while we waited for it.
            if !self.is_current(destination, &slot) {
                continue;
            }

            let entry = guard.get_or_insert_with(|| {
                tracing::debug!(destination = %destination, "Building transport");
                TransportEntry::new(builder::build(proxy))
            });
            // Armed before the liveness check so a cancelled acquire still expires.
            entry.rearm_expiry(self.schedule_expiry(destination, &slot));

            if let Some(target) = entry.pending_probe() {
                let online = self.prober.probe(&target).await;
                entry.is_online = Some(online);
                if !online {
                    tracing::debug!(
                        destination = %destination,
                        proxy = %target,
                        "Proxy is offline, falling back to a direct connection"
                    );
                    entry.fall_back_to_direct();
                }
            }

            entry.rearm_expiry(self.schedule_expiry(destination, &slot));

            return entry.transport.bind(destination, headers);
        }
    }

    fn is_current(&self, destination: &str, slot: &Slot) -> bool {
        self.entries
            .get(destination)
            .is_some_and(|current| Arc::ptr_eq(current.value(), slot))
    }

    fn schedule_expiry(&self, destination: &str, slot: &Slot) -> AbortHandle {
        let entries = Arc::downgrade(&self.entries);
        let slot = slot.clone();
        let destination = destination.to_string();
        let deadline = Instant::now() + self.ttl;

        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;

            // An acquire holding the slot re-arms, which aborts us here.
            let mut guard = slot.lock().await;
            let Some(entries) = entries.upgrade() else {
                return;
            };
            if entries
                .remove_if(&destination, |_, current| Arc::ptr_eq(current, &slot))
                .is_some()
            {
                guard.take();
                tracing::debug!(destination = %destination, "Transport expired");
            }
        })
        .abort_handle()
    }
}

impl Default for TransportCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TransportCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportCache")
            .field("entries", &self.entries.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderValue, AUTHORIZATION};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const DEST: &str = "https://api.example/v1";

    /// Prober with a fixed answer that counts its calls.
    struct StubProber {
        online: bool,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl StubProber {
        fn new(online: bool) -> Arc<Self> {
            Arc::new(Self {
                online,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            })
        }

        fn slow(online: bool, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                online,
                delay,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl ProxyProber for StubProber {
        async fn probe(&self, _proxy: &ProxyTarget) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.online
        }
    }

    fn proxy() -> ProxyConfig {
        ProxyConfig::new("127.0.0.1", 3128)
    }

    /// Let spawned expiry tasks run after the clock moved.
    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn direct_entry_is_reused() {
        let prober = StubProber::new(true);
        let cache = TransportCache::with_prober(prober.clone());

        let first = cache.acquire(DEST, HeaderMap::new(), None).await;
        let second = cache.acquire(DEST, HeaderMap::new(), None).await;

        assert_eq!(first.route(), &TransportRoute::Direct);
        assert!(first.transport().same_instance(second.transport()));
        assert_eq!(cache.len(), 1);
        assert_eq!(prober.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn online_proxy_is_probed_once() {
        let prober = StubProber::new(true);
        let cache = TransportCache::with_prober(prober.clone());
        let proxy = proxy();

        let first = cache.acquire(DEST, HeaderMap::new(), Some(&proxy)).await;
        let second = cache.acquire(DEST, HeaderMap::new(), Some(&proxy)).await;

        assert!(first.route().is_proxied());
        assert!(first.transport().same_instance(second.transport()));
        assert_eq!(prober.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn offline_proxy_falls_back_once() {
        let prober = StubProber::new(false);
        let cache = TransportCache::with_prober(prober.clone());
        let proxy = proxy();

        let first = cache.acquire(DEST, HeaderMap::new(), Some(&proxy)).await;
        assert_eq!(
            first.route(),
            &TransportRoute::Fallback(FallbackReason::ProxyOffline)
        );

        let second = cache.acquire(DEST, HeaderMap::new(), Some(&proxy)).await;
        assert!(first.transport().same_instance(second.transport()));
        assert_eq!(prober.calls(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_proxy_is_not_probed() {
        let prober = StubProber::new(true);
        let cache = TransportCache::with_prober(prober.clone());
        let proxy = ProxyConfig {
            host: Some("proxy.local".to_string()),
            ..Default::default()
        };

        let handle = cache.acquire(DEST, HeaderMap::new(), Some(&proxy)).await;
        assert_eq!(
            handle.route(),
            &TransportRoute::Fallback(FallbackReason::InvalidConfig {
                fields: vec!["port"]
            })
        );
        assert_eq!(prober.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_entry_expires_and_rebuilds() {
        let prober = StubProber::new(true);
        let cache = TransportCache::with_prober(prober.clone());
        let proxy = proxy();

        let first = cache.acquire(DEST, HeaderMap::new(), Some(&proxy)).await;
        assert!(cache.contains(DEST));

        tokio::time::advance(TRANSPORT_TTL + Duration::from_secs(1)).await;
        settle().await;
        assert!(!cache.contains(DEST));
        assert!(cache.is_empty());

        let second = cache.acquire(DEST, HeaderMap::new(), Some(&proxy)).await;
        assert!(!first.transport().same_instance(second.transport()));
        assert_eq!(prober.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_rearms_expiry() {
        let cache = TransportCache::with_prober(StubProber::new(true));

        cache.acquire(DEST, HeaderMap::new(), None).await;
        tokio::time::advance(Duration::from_secs(3 * 60 * 60)).await;
        settle().await;

        cache.acquire(DEST, HeaderMap::new(), None).await;
        tokio::time::advance(Duration::from_secs(2 * 60 * 60)).await;
        settle().await;
        assert!(cache.contains(DEST), "re-armed entry must survive the first deadline");

        tokio::time::advance(Duration::from_secs(2 * 60 * 60 + 1)).await;
        settle().await;
        assert!(!cache.contains(DEST));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_acquire_still_expires() {
        let prober = StubProber::slow(true, Duration::from_secs(5));
        let cache = TransportCache::with_prober(prober.clone());
        let proxy = proxy();

        let cancelled = tokio::time::timeout(
            Duration::from_secs(1),
            cache.acquire(DEST, HeaderMap::new(), Some(&proxy)),
        )
        .await;
        assert!(cancelled.is_err());
        assert!(cache.contains(DEST));

        tokio::time::advance(TRANSPORT_TTL + Duration::from_secs(1)).await;
        settle().await;
        assert!(!cache.contains(DEST), "abandoned entry must still expire");

        let handle = cache.acquire(DEST, HeaderMap::new(), Some(&proxy)).await;
        assert!(handle.route().is_proxied());
        assert_eq!(prober.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_counts_from_acquire_not_task_start() {
        let cache = TransportCache::with_prober(StubProber::new(true));

        cache.acquire(DEST, HeaderMap::new(), None).await;
        // Move the clock before the expiry task gets its first poll.
        tokio::time::advance(TRANSPORT_TTL - Duration::from_secs(1)).await;
        settle().await;
        assert!(cache.contains(DEST));

        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert!(!cache.contains(DEST));
    }

    #[tokio::test(start_paused = true)]
    async fn custom_ttl() {
        let cache =
            TransportCache::with_prober(StubProber::new(true)).with_ttl(Duration::from_secs(10));
        assert_eq!(cache.ttl(), Duration::from_secs(10));

        cache.acquire(DEST, HeaderMap::new(), None).await;
        tokio::time::advance(Duration::from_secs(11)).await;
        settle().await;
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn destinations_are_independent() {
        let prober = StubProber::new(true);
        let cache = TransportCache::with_prober(prober.clone());
        let proxy = proxy();

        let a = cache.acquire("https://a.example", HeaderMap::new(), Some(&proxy)).await;
        let b = cache.acquire("https://b.example", HeaderMap::new(), None).await;

        assert!(!a.transport().same_instance(b.transport()));
        assert!(a.route().is_proxied());
        assert_eq!(b.route(), &TransportRoute::Direct);
        assert_eq!(cache.len(), 2);
        assert_eq!(prober.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn handles_carry_their_own_headers() {
        let cache = TransportCache::with_prober(StubProber::new(true));

        let mut first = HeaderMap::new();
        first.insert(AUTHORIZATION, HeaderValue::from_static("Bearer one"));
        let mut second = HeaderMap::new();
        second.insert(AUTHORIZATION, HeaderValue::from_static("Bearer two"));

        let a = cache.acquire(DEST, first, None).await;
        let b = cache.acquire(DEST, second, None).await;

        assert!(a.transport().same_instance(b.transport()));
        assert_eq!(a.headers()[AUTHORIZATION], "Bearer one");
        assert_eq!(b.headers()[AUTHORIZATION], "Bearer two");
        assert_eq!(a.base_url(), DEST);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_acquires_probe_once() {
        let prober = StubProber::slow(true, Duration::from_secs(1));
        let cache = TransportCache::with_prober(prober.clone());
        let proxy = proxy();

        let (a, b) = tokio::join!(
            cache.acquire(DEST, HeaderMap::new(), Some(&proxy)),
            cache.acquire(DEST, HeaderMap::new(), Some(&proxy)),
        );

        assert!(a.transport().same_instance(b.transport()));
        assert_eq!(prober.calls(), 1);
        assert_eq!(cache.len(), 1);
    }
}
