//! Round-robin pool of Z.AI session cookies.
//!
//! Upstream authentication rides on web-session cookies rather than API
//! keys, and a single cookie rate-limits quickly. The pool rotates through
//! the configured cookies, skips ones that recently failed, and puts
//! everything back into rotation when all of them have failed (a stale
//! failed set is worse than retrying).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct PoolState {
    next: usize,
    failed: HashSet<String>,
}

/// Shared, mutex-guarded cookie rotation.
#[derive(Debug, Clone)]
pub struct CookiePool {
    cookies: Arc<Vec<String>>,
    state: Arc<Mutex<PoolState>>,
}

impl CookiePool {
    pub fn new(cookies: Vec<String>) -> Self {
        if cookies.is_empty() {
            warn!("Cookie pool initialized empty; chat requests will fail with 503");
        } else {
            info!(count = cookies.len(), "Initialized cookie pool");
        }
        Self {
            cookies: Arc::new(cookies),
            state: Arc::new(Mutex::new(PoolState::default())),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Next cookie in round-robin order, skipping failed ones.
    ///
    /// When every cookie is marked failed the failed set is cleared and the
    /// first cookie returned, so the pool degrades to plain rotation rather
    /// than a permanent outage.
    pub async fn next_cookie(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }

        let mut state = self.state.lock().await;
        for _ in 0..self.cookies.len() {
            let cookie = &self.cookies[state.next];
            state.next = (state.next + 1) % self.cookies.len();
            if !state.failed.contains(cookie) {
                return Some(cookie.clone());
            }
        }

        warn!(
            count = self.cookies.len(),
            "All cookies failed, resetting failed set and retrying"
        );
        state.failed.clear();
        Some(self.cookies[0].clone())
    }

    /// Take a cookie out of rotation after an upstream auth failure.
    pub async fn mark_failed(&self, cookie: &str) {
        let mut state = self.state.lock().await;
        if state.failed.insert(cookie.to_string()) {
            warn!(cookie = %redact(cookie), "Marked cookie as failed");
        }
    }

    /// Return a cookie to rotation after a successful request.
    pub async fn mark_success(&self, cookie: &str) {
        let mut state = self.state.lock().await;
        if state.failed.remove(cookie) {
            info!(cookie = %redact(cookie), "Cookie recovered");
        }
    }

    /// Periodically return failed cookies to rotation so a transiently bad
    /// cookie gets retried. A cookie that is still bad fails its next real
    /// request and is re-marked.
    pub fn spawn_recovery_sweep(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let pool = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // First tick fires immediately; skip it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let mut state = pool.state.lock().await;
                if !state.failed.is_empty() {
                    debug!(
                        count = state.failed.len(),
                        "Returning failed cookies to rotation"
                    );
                    state.failed.clear();
                }
            }
        })
    }
}

/// Cookies are credentials; only the first few characters ever reach logs.
fn redact(cookie: &str) -> String {
    let prefix: String = cookie.chars().take(8).collect();
    format!("{prefix}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(names: &[&str]) -> CookiePool {
        CookiePool::new(names.iter().map(|s| s.to_string()).collect())
    }

    #[tokio::test]
    async fn test_round_robin_order() {
        let pool = pool(&["a", "b", "c"]);
        assert_eq!(pool.next_cookie().await.unwrap(), "a");
        assert_eq!(pool.next_cookie().await.unwrap(), "b");
        assert_eq!(pool.next_cookie().await.unwrap(), "c");
        assert_eq!(pool.next_cookie().await.unwrap(), "a");
    }

    #[tokio::test]
    async fn test_failed_cookie_skipped() {
        let pool = pool(&["a", "b"]);
        pool.mark_failed("a").await;
        assert_eq!(pool.next_cookie().await.unwrap(), "b");
        assert_eq!(pool.next_cookie().await.unwrap(), "b");
    }

    #[tokio::test]
    async fn test_all_failed_resets() {
        let pool = pool(&["a", "b"]);
        pool.mark_failed("a").await;
        pool.mark_failed("b").await;
        // Exhaustion clears the failed set instead of refusing.
        assert_eq!(pool.next_cookie().await.unwrap(), "a");
        assert_eq!(pool.next_cookie().await.unwrap(), "a");
    }

    #[tokio::test]
    async fn test_success_restores_cookie() {
        let pool = pool(&["a", "b"]);
        pool.mark_failed("a").await;
        pool.mark_success("a").await;
        assert_eq!(pool.next_cookie().await.unwrap(), "a");
    }

    #[tokio::test]
    async fn test_empty_pool_yields_none() {
        let pool = CookiePool::new(Vec::new());
        assert!(pool.is_empty());
        assert!(pool.next_cookie().await.is_none());
    }

    #[tokio::test]
    async fn test_recovery_sweep_restores_rotation() {
        let pool = pool(&["a", "b"]);
        pool.mark_failed("a").await;
        let handle = pool.spawn_recovery_sweep(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pool.next_cookie().await.unwrap(), "a");
        handle.abort();
    }
}
