use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use super::clock::Clock;

#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    count: u64,
    window_start: Instant,
}

/// Fixed-window request counter keyed by opaque rate-key strings.
///
/// Each key tracks `(count, window_start)`. The read-modify-write goes
/// through the DashMap entry guard, so it is atomic per key without any
/// cross-key lock; throughput scales with key cardinality.
///
/// A burst straddling a window boundary can admit up to twice the limit.
/// Accepted tradeoff for O(1) memory per key.
pub struct WindowCounter {
    windows: DashMap<String, WindowEntry>,
    clock: Arc<dyn Clock>,
}

impl WindowCounter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::with_capacity(10_000),
            clock,
        }
    }

    /// Count one request against `key`. Returns whether it is admitted.
    ///
    /// A window older than `window` is replaced with a fresh one on access;
    /// windows are never reset proactively.
    pub fn increment(&self, key: &str, max_requests: u64, window: Duration) -> bool {
        let now = self.clock.now();
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert(WindowEntry {
                count: 0,
                window_start: now,
            });

        if now.duration_since(entry.window_start) > window {
            entry.count = 1;
            entry.window_start = now;
            return true;
        }

        entry.count += 1;
        entry.count <= max_requests
    }

    /// How many requests `key` has left in its current window. Non-mutating.
    pub fn remaining(&self, key: &str, max_requests: u64, window: Duration) -> u64 {
        let now = self.clock.now();
        match self.windows.get(key) {
            Some(entry) if now.duration_since(entry.window_start) <= window => {
                max_requests.saturating_sub(entry.count)
            }
            _ => max_requests,
        }
    }

    /// Administrative clear of a single key.
    pub fn reset(&self, key: &str) {
        self.windows.remove(key);
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    /// Evict entries whose window started longer than `stale` ago. Run from
    /// the periodic maintenance loop; correctness does not depend on it.
    pub fn cleanup(&self, stale: Duration) {
        let now = self.clock.now();
        self.windows
            .retain(|_, entry| now.duration_since(entry.window_start) < stale);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::clock::{ManualClock, SystemClock};

    const WINDOW: Duration = Duration::from_secs(60);

    #[test]
    fn test_requests_within_limit_allowed() {
        let counter = WindowCounter::new(Arc::new(SystemClock));
        for _ in 0..5 {
            assert!(counter.increment("k", 5, WINDOW));
        }
        assert!(!counter.increment("k", 5, WINDOW));
        assert!(!counter.increment("k", 5, WINDOW));
    }

    #[test]
    fn test_keys_are_independent() {
        let counter = WindowCounter::new(Arc::new(SystemClock));
        assert!(counter.increment("a", 1, WINDOW));
        assert!(!counter.increment("a", 1, WINDOW));
        assert!(counter.increment("b", 1, WINDOW));
    }

    #[test]
    fn test_window_rollover_resets_count() {
        let clock = Arc::new(ManualClock::new());
        let counter = WindowCounter::new(clock.clone());

        for _ in 0..3 {
            assert!(counter.increment("k", 3, WINDOW));
        }
        assert!(!counter.increment("k", 3, WINDOW));

        clock.advance(Duration::from_secs(61));

        // Fresh window: a full budget is available again.
        for _ in 0..3 {
            assert!(counter.increment("k", 3, WINDOW));
        }
        assert!(!counter.increment("k", 3, WINDOW));
    }

    #[test]
    fn test_remaining_does_not_mutate() {
        let counter = WindowCounter::new(Arc::new(SystemClock));
        assert_eq!(counter.remaining("k", 5, WINDOW), 5);
        counter.increment("k", 5, WINDOW);
        counter.increment("k", 5, WINDOW);
        assert_eq!(counter.remaining("k", 5, WINDOW), 3);
        assert_eq!(counter.remaining("k", 5, WINDOW), 3);
    }

    #[test]
    fn test_remaining_after_expiry_is_full_budget() {
        let clock = Arc::new(ManualClock::new());
        let counter = WindowCounter::new(clock.clone());
        counter.increment("k", 5, WINDOW);
        clock.advance(Duration::from_secs(61));
        assert_eq!(counter.remaining("k", 5, WINDOW), 5);
    }

    #[test]
    fn test_reset_clears_key() {
        let counter = WindowCounter::new(Arc::new(SystemClock));
        assert!(counter.increment("k", 1, WINDOW));
        assert!(!counter.increment("k", 1, WINDOW));
        counter.reset("k");
        assert!(counter.increment("k", 1, WINDOW));
    }

    #[test]
    fn test_cleanup_evicts_stale_windows() {
        let clock = Arc::new(ManualClock::new());
        let counter = WindowCounter::new(clock.clone());
        counter.increment("old", 5, WINDOW);
        clock.advance(Duration::from_secs(7200));
        counter.increment("fresh", 5, WINDOW);
        counter.cleanup(Duration::from_secs(3600));
        assert_eq!(counter.tracked_keys(), 1);
    }

    #[test]
    fn test_no_lost_increments_under_concurrency() {
        let counter = Arc::new(WindowCounter::new(Arc::new(SystemClock)));
        let max = 400u64;
        let threads = 8;
        let per_thread = 100;

        let allowed: u64 = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..threads)
                .map(|_| {
                    let counter = counter.clone();
                    scope.spawn(move || {
                        let mut allowed = 0u64;
                        for _ in 0..per_thread {
                            if counter.increment("shared", max, WINDOW) {
                                allowed += 1;
                            }
                        }
                        allowed
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        // 800 attempts against a budget of 400: exactly 400 admitted.
        assert_eq!(allowed, max);
        assert_eq!(counter.remaining("shared", 800, WINDOW), 0);
    }
}
