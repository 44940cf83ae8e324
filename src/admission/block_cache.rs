use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use arc_swap::ArcSwap;
use tracing::{debug, warn};

use crate::storage::sqlite::SqliteStore;

/// Read-optimized view of the durable block list.
///
/// The snapshot is an immutable set swapped wholesale on refresh, so the
/// hot-path `is_blocked` check is a lock-free set lookup and readers never
/// observe a half-replaced set. Blocks this process creates are written
/// through immediately; blocks created elsewhere appear within one refresh
/// interval.
pub struct BlockedOriginCache {
    snapshot: ArcSwap<HashSet<IpAddr>>,
    store: Arc<SqliteStore>,
}

impl BlockedOriginCache {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(HashSet::new()),
            store,
        }
    }

    pub fn is_blocked(&self, origin: &IpAddr) -> bool {
        self.snapshot.load().contains(origin)
    }

    /// Write-through insert for a block this process just created. Must
    /// complete before the escalation call returns, or the same origin could
    /// slip through until the next periodic refresh.
    pub fn insert(&self, origin: IpAddr) {
        self.snapshot.rcu(|current| {
            let mut next = HashSet::clone(current);
            next.insert(origin);
            next
        });
    }

    /// Explicit removal on manual unblock, so it takes effect immediately
    /// instead of waiting for a refresh that omits the origin.
    pub fn invalidate(&self, origin: &IpAddr) {
        self.snapshot.rcu(|current| {
            let mut next = HashSet::clone(current);
            next.remove(origin);
            next
        });
    }

    /// Rebuild the snapshot from the durable store: active, non-expired
    /// blocks only. Returns the number of blocked origins loaded.
    pub fn force_refresh(&self) -> Result<usize> {
        let origins = self.store.list_active_blocks()?;
        let set: HashSet<IpAddr> = origins
            .iter()
            .filter_map(|raw| match raw.parse() {
                Ok(ip) => Some(ip),
                Err(_) => {
                    warn!(origin = %raw, "Skipping unparseable origin in block list");
                    None
                }
            })
            .collect();
        let loaded = set.len();
        self.snapshot.store(Arc::new(set));
        Ok(loaded)
    }

    pub fn blocked_count(&self) -> usize {
        self.snapshot.load().len()
    }
}

/// Periodic refresh task. Spawned by the composition root and aborted on
/// shutdown. A failed refresh keeps serving the last-known-good snapshot
/// (fail-open); it is logged, never fatal.
pub async fn refresh_loop(cache: Arc<BlockedOriginCache>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    // The immediate first tick duplicates the startup load; skip it.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match cache.force_refresh() {
            Ok(count) => debug!(blocked = count, "Blocked-origin cache refreshed"),
            Err(e) => warn!("Cache refresh failed, serving stale snapshot: {}", e),
        }
    }
}
