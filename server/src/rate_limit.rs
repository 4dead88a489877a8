//! Fixed-window submission limiter keyed by client identifier
//!
//! Approximate by design: requests are counted in discrete windows, so a
//! burst straddling a window boundary can briefly exceed the budget. The
//! tradeoff buys O(1) state and lookup per client. Windows live in the
//! injected key-value store so a shared deployment can pool budgets.

use crate::store::{KvStore, StoreError};
use crate::util::now_ms;
use log::debug;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;

const RATE_PREFIX: &str = "rate:";
// CAS retries before giving up on a contended window
const MAX_CAS_ATTEMPTS: u32 = 16;

/// Outcome of a limiter check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Denied { retry_after_ms: u64 },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct Window {
    window_start: u64,
    count: u32,
}

/// Per-client fixed-window counter.
pub struct RateLimiter {
    store: Arc<dyn KvStore>,
    window_ms: u64,
    max_per_window: u32,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KvStore>, window_ms: u64, max_per_window: u32) -> Self {
        Self {
            store,
            window_ms,
            max_per_window,
        }
    }

    /// Counts one request against `client_id` and reports whether it fits
    /// the budget. Denials carry the time remaining until the window resets.
    ///
    /// The window record is updated through compare-and-swap so concurrent
    /// requests from one client never double-spend a slot; on CAS conflict
    /// the check is retried against the fresh record.
    pub async fn check_and_consume(&self, client_id: &str) -> Result<RateDecision, StoreError> {
        let key = format!("{}{}", RATE_PREFIX, client_id);

        for _ in 0..MAX_CAS_ATTEMPTS {
            let now = now_ms();
            let current = self.store.get(&key).await?;

            let (expected_version, window) = match current {
                Some(stored) => {
                    let window: Window = serde_json::from_slice(&stored.value)
                        .map_err(|e| StoreError::Corrupt(e.to_string()))?;
                    (Some(stored.version), Some(window))
                }
                None => (None, None),
            };

            let next = match window {
                // Window still open and already at the cap: deny.
                Some(w) if now.saturating_sub(w.window_start) <= self.window_ms
                    && w.count >= self.max_per_window =>
                {
                    let retry_after_ms = self.window_ms - now.saturating_sub(w.window_start);
                    debug!(
                        "rate limit exceeded for {} (retry in {}ms)",
                        client_id, retry_after_ms
                    );
                    return Ok(RateDecision::Denied { retry_after_ms });
                }
                // Window still open with budget left: consume a slot.
                Some(w) if now.saturating_sub(w.window_start) <= self.window_ms => Window {
                    window_start: w.window_start,
                    count: w.count + 1,
                },
                // No window, or the old one elapsed: start fresh.
                _ => Window {
                    window_start: now,
                    count: 1,
                },
            };

            let encoded =
                serde_json::to_vec(&next).map_err(|e| StoreError::Corrupt(e.to_string()))?;
            if self
                .store
                .compare_and_swap(&key, expected_version, encoded)
                .await?
            {
                return Ok(RateDecision::Allowed);
            }
            // Lost the race against another request from this client; retry.
        }

        Err(StoreError::Contention(MAX_CAS_ATTEMPTS))
    }

    /// Drops windows whose duration has fully elapsed.
    pub async fn sweep_stale(&self) -> Result<usize, StoreError> {
        let now = now_ms();
        let mut removed = 0;

        for key in self.store.keys_with_prefix(RATE_PREFIX).await? {
            let Some(stored) = self.store.get(&key).await? else {
                continue;
            };
            let stale = match serde_json::from_slice::<Window>(&stored.value) {
                Ok(window) => now.saturating_sub(window.window_start) > self.window_ms,
                // Undecodable record: drop it rather than keep it forever
                Err(_) => true,
            };
            if stale && self.store.delete(&key).await? {
                removed += 1;
            }
        }

        Ok(removed)
    }
}

/// Derives the rate-limit bucket for a request.
///
/// Prefers the first hop of a forwarded-for value (set by a fronting proxy),
/// then the peer address, then a constant bucket shared by every client we
/// cannot identify. Forwarded values are only as trustworthy as the proxy
/// that wrote them; that is a deployment assumption, not a guarantee this
/// code can make.
pub fn resolve_client_id(forwarded_for: Option<&str>, peer: Option<SocketAddr>) -> String {
    if let Some(forwarded) = forwarded_for {
        if let Some(first_hop) = forwarded.split(',').next() {
            let first_hop = first_hop.trim();
            if !first_hop.is_empty() {
                return first_hop.to_string();
            }
        }
    }

    match peer {
        Some(addr) => addr.ip().to_string(),
        None => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn limiter(window_ms: u64, max: u32) -> RateLimiter {
        RateLimiter::new(MemoryStore::shared(), window_ms, max)
    }

    #[tokio::test]
    async fn test_allows_up_to_max_then_denies() {
        let limiter = limiter(60_000, 3);

        for i in 0..3 {
            let decision = limiter.check_and_consume("1.2.3.4").await.unwrap();
            assert_eq!(decision, RateDecision::Allowed, "request {}", i);
        }

        match limiter.check_and_consume("1.2.3.4").await.unwrap() {
            RateDecision::Denied { retry_after_ms } => {
                assert!(retry_after_ms > 0);
                assert!(retry_after_ms <= 60_000);
            }
            RateDecision::Allowed => panic!("request over budget was allowed"),
        }
    }

    #[tokio::test]
    async fn test_separate_clients_separate_budgets() {
        let limiter = limiter(60_000, 1);

        assert_eq!(
            limiter.check_and_consume("1.1.1.1").await.unwrap(),
            RateDecision::Allowed
        );
        assert_eq!(
            limiter.check_and_consume("2.2.2.2").await.unwrap(),
            RateDecision::Allowed
        );
        assert!(matches!(
            limiter.check_and_consume("1.1.1.1").await.unwrap(),
            RateDecision::Denied { .. }
        ));
    }

    #[tokio::test]
    async fn test_window_reset_restores_budget() {
        // Tiny window so the test can outwait it.
        let limiter = limiter(30, 1);

        assert_eq!(
            limiter.check_and_consume("ip").await.unwrap(),
            RateDecision::Allowed
        );
        assert!(matches!(
            limiter.check_and_consume("ip").await.unwrap(),
            RateDecision::Denied { .. }
        ));

        tokio::time::sleep(std::time::Duration::from_millis(40)).await;

        assert_eq!(
            limiter.check_and_consume("ip").await.unwrap(),
            RateDecision::Allowed
        );
    }

    #[tokio::test]
    async fn test_concurrent_requests_never_exceed_budget() {
        let limiter = Arc::new(RateLimiter::new(MemoryStore::shared(), 60_000, 5));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.check_and_consume("ip").await.unwrap()
            }));
        }

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() == RateDecision::Allowed {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 5);
    }

    #[tokio::test]
    async fn test_sweep_drops_only_elapsed_windows() {
        let store = MemoryStore::shared();
        let limiter = RateLimiter::new(Arc::clone(&store), 50, 10);

        limiter.check_and_consume("old").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        limiter.check_and_consume("new").await.unwrap();

        let removed = limiter.sweep_stale().await.unwrap();
        assert_eq!(removed, 1);

        let remaining = store.keys_with_prefix(RATE_PREFIX).await.unwrap();
        assert_eq!(remaining, vec![format!("{}new", RATE_PREFIX)]);
    }

    #[test]
    fn test_resolve_client_id_prefers_forwarded_first_hop() {
        let peer: SocketAddr = "10.0.0.1:9000".parse().unwrap();
        let id = resolve_client_id(Some("203.0.113.7, 10.0.0.1"), Some(peer));
        assert_eq!(id, "203.0.113.7");
    }

    #[test]
    fn test_resolve_client_id_falls_back_to_peer() {
        let peer: SocketAddr = "10.0.0.1:9000".parse().unwrap();
        assert_eq!(resolve_client_id(None, Some(peer)), "10.0.0.1");
        assert_eq!(resolve_client_id(Some("  "), Some(peer)), "10.0.0.1");
    }

    #[test]
    fn test_resolve_client_id_unknown_bucket() {
        assert_eq!(resolve_client_id(None, None), "unknown");
    }
}
