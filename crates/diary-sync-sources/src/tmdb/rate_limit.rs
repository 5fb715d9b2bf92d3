use diary_sync_config::options::keys;
use diary_sync_config::{KvStore, StoreError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Source of "now" for the limiter, in milliseconds
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Persisted fixed-window state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateWindow {
    pub count: u32,
    pub window_start_ms: u64,
}

/// Decide whether a request may go now.
///
/// Returns the window to persist and, when the window is exhausted, how long
/// to wait. A waiting caller is counted as the first request of the next
/// window so later callers queue behind it. A window that starts in the
/// future is already reserved by waiting callers: later callers join it
/// while it has room, otherwise they reserve the one after it.
pub fn admit(window: Option<RateWindow>, now_ms: u64, max_requests: u32, period_ms: u64) -> (RateWindow, Option<u64>) {
    let fresh = RateWindow {
        count: 1,
        window_start_ms: now_ms,
    };
    let Some(window) = window else {
        return (fresh, None);
    };

    if now_ms < window.window_start_ms {
        let until_start = window.window_start_ms - now_ms;
        if window.count < max_requests {
            return (
                RateWindow {
                    count: window.count + 1,
                    ..window
                },
                Some(until_start),
            );
        }
        let next = RateWindow {
            count: 1,
            window_start_ms: window.window_start_ms + period_ms,
        };
        return (next, Some(until_start + period_ms));
    }

    let elapsed = now_ms.saturating_sub(window.window_start_ms);
    if elapsed >= period_ms {
        return (fresh, None);
    }
    if window.count < max_requests {
        return (
            RateWindow {
                count: window.count + 1,
                ..window
            },
            None,
        );
    }

    let next = RateWindow {
        count: 1,
        window_start_ms: window.window_start_ms + period_ms,
    };
    (next, Some(period_ms - elapsed))
}

/// At most `max_requests` per `period`, shared across processes through the
/// key/value store
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    max_requests: u32,
    period: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>, max_requests: u32, period: Duration) -> Self {
        Self {
            store,
            clock,
            max_requests: max_requests.max(1),
            period,
        }
    }

    /// Wait until a request slot is available and claim it
    pub async fn acquire(&self) -> Result<(), StoreError> {
        let now = self.clock.now_millis();
        let period_ms = self.period.as_millis() as u64;
        let max_requests = self.max_requests;
        let mut wait_ms = None;

        self.store.update(keys::RATE_LIMIT_WINDOW, Some(self.period * 2), &mut |current| {
            let window = current.and_then(|raw| serde_json::from_str::<RateWindow>(&raw).ok());
            let (next, wait) = admit(window, now, max_requests, period_ms);
            wait_ms = wait;
            serde_json::to_string(&next).ok()
        })?;

        if let Some(ms) = wait_ms {
            debug!(wait_ms = ms, "Rate limit window exhausted, sleeping");
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        Ok(())
    }

    pub fn window(&self) -> Result<Option<RateWindow>, StoreError> {
        Ok(self
            .store
            .get(keys::RATE_LIMIT_WINDOW)?
            .and_then(|raw| serde_json::from_str(&raw).ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diary_sync_config::MemoryKvStore;
    use tokio::time::Instant;

    /// Follows tokio's (pausable) clock
    struct TokioClock {
        origin: Instant,
    }

    impl Clock for TokioClock {
        fn now_millis(&self) -> u64 {
            self.origin.elapsed().as_millis() as u64
        }
    }

    #[test]
    fn test_admit_counts_within_window() {
        let (w, wait) = admit(None, 1_000, 3, 10_000);
        assert_eq!(w, RateWindow { count: 1, window_start_ms: 1_000 });
        assert!(wait.is_none());

        let (w, wait) = admit(Some(w), 2_000, 3, 10_000);
        assert_eq!(w.count, 2);
        assert!(wait.is_none());

        let (w, _) = admit(Some(w), 3_000, 3, 10_000);
        assert_eq!(w.count, 3);

        // Fourth request in the window waits for the remainder
        let (w, wait) = admit(Some(w), 4_000, 3, 10_000);
        assert_eq!(wait, Some(7_000));
        assert_eq!(w, RateWindow { count: 1, window_start_ms: 11_000 });
    }

    #[test]
    fn test_admit_queues_behind_reserved_window() {
        // Window starting at 11 s already holds one waiting caller
        let reserved = RateWindow { count: 1, window_start_ms: 11_000 };
        let (w, wait) = admit(Some(reserved), 4_000, 2, 10_000);
        assert_eq!(w, RateWindow { count: 2, window_start_ms: 11_000 });
        assert_eq!(wait, Some(7_000));

        // Full reserved window: wait for the one after it
        let (w, wait) = admit(Some(w), 4_500, 2, 10_000);
        assert_eq!(w, RateWindow { count: 1, window_start_ms: 21_000 });
        assert_eq!(wait, Some(16_500));
    }

    #[test]
    fn test_admit_resets_after_period() {
        let full = RateWindow { count: 40, window_start_ms: 0 };
        let (w, wait) = admit(Some(full), 10_000, 40, 10_000);
        assert!(wait.is_none());
        assert_eq!(w, RateWindow { count: 1, window_start_ms: 10_000 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_over_limit_blocks_until_window_resets() {
        let clock = Arc::new(TokioClock { origin: Instant::now() });
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let limiter = RateLimiter::new(store, clock, 5, Duration::from_secs(10));

        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await.unwrap();
        }
        assert!(start.elapsed() < Duration::from_millis(1));

        limiter.acquire().await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(10));

        let window = limiter.window().unwrap().unwrap();
        assert_eq!(window.count, 1);
        assert_eq!(window.window_start_ms, 10_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_more_than_max_per_period() {
        let clock = Arc::new(TokioClock { origin: Instant::now() });
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let limiter = RateLimiter::new(store, clock, 4, Duration::from_secs(10));

        let start = Instant::now();
        let mut completed_at = Vec::new();
        for _ in 0..13 {
            limiter.acquire().await.unwrap();
            completed_at.push(start.elapsed().as_secs() / 10);
        }
        for period in 0..4 {
            let in_period = completed_at.iter().filter(|&&p| p == period).count();
            assert!(in_period <= 4, "period {period} admitted {in_period}");
        }
        assert_eq!(completed_at.last(), Some(&3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_respect_the_cap() {
        let clock = Arc::new(TokioClock { origin: Instant::now() });
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let limiter = RateLimiter::new(store, clock, 4, Duration::from_secs(10));
        let start = Instant::now();

        let admitted_at = move |limiter: RateLimiter| async move {
            limiter.acquire().await.unwrap();
            start.elapsed().as_millis() as u64
        };
        let (a, b, c, d, e, f, g, h, i) = tokio::join!(
            admitted_at(limiter.clone()),
            admitted_at(limiter.clone()),
            admitted_at(limiter.clone()),
            admitted_at(limiter.clone()),
            admitted_at(limiter.clone()),
            admitted_at(limiter.clone()),
            admitted_at(limiter.clone()),
            admitted_at(limiter.clone()),
            admitted_at(limiter.clone()),
        );
        let times = [a, b, c, d, e, f, g, h, i];

        for period in 0..3 {
            let in_period = times.iter().filter(|&&t| t / 10_000 == period).count();
            assert!(in_period <= 4, "period {period} admitted {in_period}: {times:?}");
        }
        assert_eq!(times.iter().filter(|&&t| t < 10_000).count(), 4);
        assert_eq!(times.iter().filter(|&&t| t >= 20_000).count(), 1);
    }
}
