//! Per-client request rate limiting.
//!
//! Each client key gets its own token bucket, created on first sight. The
//! registry is cleared wholesale on a fixed interval to bound memory; this also
//! refills the allowance of clients that are still active.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use governor::clock::{Clock, DefaultClock};
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::info;

type Bucket<C> = RateLimiter<NotKeyed, InMemoryState, C, NoOpMiddleware<<C as Clock>::Instant>>;

/// Token-bucket limiter keyed by client identity.
pub struct ClientRateLimiter<C: Clock = DefaultClock> {
    buckets: RwLock<HashMap<String, Bucket<C>>>,
    quota: Quota,
    clock: C,
}

impl ClientRateLimiter<DefaultClock> {
    /// One token per `every`, up to `burst` stored tokens.
    pub fn new(every: Duration, burst: u32) -> Self {
        Self::with_clock(every, burst, DefaultClock::default())
    }
}

impl Default for ClientRateLimiter<DefaultClock> {
    fn default() -> Self {
        Self::new(Duration::from_millis(600), 20)
    }
}

impl<C: Clock> ClientRateLimiter<C> {
    pub fn with_clock(every: Duration, burst: u32, clock: C) -> Self {
        let burst = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::with_period(every)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
            .allow_burst(burst);

        Self {
            buckets: RwLock::new(HashMap::new()),
            quota,
            clock,
        }
    }

    /// Take one token for `key`. Returns false when the bucket is empty.
    pub async fn allow(&self, key: &str) -> bool {
        {
            let buckets = self.buckets.read().await;
            if let Some(bucket) = buckets.get(key) {
                return bucket.check().is_ok();
            }
        }

        let mut buckets = self.buckets.write().await;
        buckets
            .entry(key.to_string())
            .or_insert_with(|| RateLimiter::direct_with_clock(self.quota, &self.clock))
            .check()
            .is_ok()
    }

    /// Drop every bucket.
    pub async fn reset(&self) -> usize {
        let mut buckets = self.buckets.write().await;
        let cleared = buckets.len();
        buckets.clear();
        cleared
    }

    /// Number of client keys currently tracked.
    pub async fn tracked_clients(&self) -> usize {
        self.buckets.read().await.len()
    }
}

impl<C> ClientRateLimiter<C>
where
    C: Clock + Send + Sync + 'static,
    C::Instant: Send + Sync,
{
    /// Clear the registry every `interval`, calling `on_reset` with the
    /// number of discarded buckets.
    pub fn spawn_reset_task<F>(limiter: Arc<Self>, interval: Duration, on_reset: F) -> JoinHandle<()>
    where
        F: Fn(usize) + Send + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let cleared = limiter.reset().await;
                info!("Rate limiter reset: {} clients cleared", cleared);
                on_reset(cleared);
            }
        })
    }
}

/// Identify the client for rate limiting.
///
/// First entry of `X-Forwarded-For`, then `X-Real-IP`, then the peer address.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(forwarded) = header("x-forwarded-for") {
        if let Some(first) = forwarded.split(',').map(str::trim).find(|s| !s.is_empty()) {
            return first.to_string();
        }
    }
    if let Some(real_ip) = header("x-real-ip") {
        return real_ip.to_string();
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use governor::clock::FakeRelativeClock;

    fn limiter(every_ms: u64, burst: u32) -> (ClientRateLimiter<FakeRelativeClock>, FakeRelativeClock) {
        let clock = FakeRelativeClock::default();
        let limiter =
            ClientRateLimiter::with_clock(Duration::from_millis(every_ms), burst, clock.clone());
        (limiter, clock)
    }

    #[tokio::test]
    async fn test_burst_then_reject_until_refill() {
        let (limiter, clock) = limiter(600, 3);

        for _ in 0..3 {
            assert!(limiter.allow("10.0.0.1").await);
        }
        assert!(!limiter.allow("10.0.0.1").await);

        clock.advance(Duration::from_millis(300));
        assert!(!limiter.allow("10.0.0.1").await);

        clock.advance(Duration::from_millis(300));
        assert!(limiter.allow("10.0.0.1").await);
        assert!(!limiter.allow("10.0.0.1").await);
    }

    #[tokio::test]
    async fn test_clients_have_separate_buckets() {
        let (limiter, _clock) = limiter(600, 1);
        assert!(limiter.allow("a").await);
        assert!(!limiter.allow("a").await);
        assert!(limiter.allow("b").await);
        assert_eq!(limiter.tracked_clients().await, 2);
    }

    #[tokio::test]
    async fn test_reset_restores_allowance() {
        let (limiter, _clock) = limiter(600, 1);
        assert!(limiter.allow("a").await);
        assert!(!limiter.allow("a").await);

        assert_eq!(limiter.reset().await, 1);
        assert_eq!(limiter.tracked_clients().await, 0);
        assert!(limiter.allow("a").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_task_clears_registry() {
        let clock = FakeRelativeClock::default();
        let limiter = Arc::new(ClientRateLimiter::with_clock(
            Duration::from_millis(600),
            5,
            clock,
        ));
        limiter.allow("a").await;
        limiter.allow("b").await;

        let handle =
            ClientRateLimiter::spawn_reset_task(limiter.clone(), Duration::from_secs(60), |_| {});
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(limiter.tracked_clients().await, 0);
        handle.abort();
    }

    #[test]
    fn test_client_key_precedence() {
        let peer: SocketAddr = "192.168.1.5:4000".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(client_key(&headers, Some(peer)), "192.168.1.5");
        assert_eq!(client_key(&headers, None), "unknown");

        headers.insert("x-real-ip", HeaderValue::from_static(" 172.16.0.9 "));
        assert_eq!(client_key(&headers, Some(peer)), "172.16.0.9");

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(client_key(&headers, Some(peer)), "203.0.113.7");
    }
}
