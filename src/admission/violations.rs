use std::net::IpAddr;

use dashmap::DashMap;

/// Lifetime count of rate-limit violations per origin. In memory only,
/// monotonically non-decreasing, reset by process restart.
pub struct ViolationTracker {
    counts: DashMap<IpAddr, u64>,
}

impl ViolationTracker {
    pub fn new() -> Self {
        Self {
            counts: DashMap::with_capacity(10_000),
        }
    }

    /// Count one violation for `origin` and return its new total. The
    /// increment is atomic per origin via the map's entry guard.
    pub fn record(&self, origin: IpAddr) -> u64 {
        let mut entry = self.counts.entry(origin).or_insert(0);
        *entry += 1;
        *entry
    }

    pub fn total(&self, origin: &IpAddr) -> u64 {
        self.counts.get(origin).map(|e| *e).unwrap_or(0)
    }

    pub fn tracked_origins(&self) -> usize {
        self.counts.len()
    }
}

impl Default for ViolationTracker {
    fn default() -> Self {
        Self::new()
    }
}
