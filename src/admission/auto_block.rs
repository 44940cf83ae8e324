use std::net::IpAddr;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::config::settings::AutoBlockConfig;
use crate::models::attack::{AttackKind, BlockType};
use crate::storage::sqlite::SqliteStore;

use super::block_cache::BlockedOriginCache;
use super::violations::ViolationTracker;

/// Result of counting one violation against an origin.
#[derive(Debug, Clone, Copy)]
pub struct EscalationOutcome {
    /// Lifetime violation total after this one.
    pub total: u64,
    /// The threshold was reached: an automatic block now covers the origin.
    pub blocked: bool,
}

/// Escalates repeat offenders into durable, time-bounded blocks.
pub struct AutoBlockEngine {
    store: Arc<SqliteStore>,
    cache: Arc<BlockedOriginCache>,
    violations: Arc<ViolationTracker>,
    threshold: u64,
    block_duration_secs: u64,
}

impl AutoBlockEngine {
    pub fn new(
        store: Arc<SqliteStore>,
        cache: Arc<BlockedOriginCache>,
        violations: Arc<ViolationTracker>,
        config: &AutoBlockConfig,
    ) -> Self {
        info!(
            threshold = config.violation_threshold,
            duration_secs = config.block_duration_secs,
            "Auto-block engine initialized"
        );
        Self {
            store,
            cache,
            violations,
            threshold: config.violation_threshold,
            block_duration_secs: config.block_duration_secs,
        }
    }

    /// Count one violation for `origin`; escalate if its lifetime total has
    /// reached the threshold.
    ///
    /// Escalation upserts the active automatic block (refreshing expiry and
    /// the violation snapshot on repeats rather than duplicating rows) and
    /// then writes the origin through into the cache before returning, so
    /// the very next request is denied without waiting for a refresh. The
    /// write-through happens even if the durable write failed: in-memory
    /// enforcement survives a store outage.
    pub fn record_violation(&self, origin: IpAddr, kind: AttackKind) -> EscalationOutcome {
        let total = self.violations.record(origin);
        if total < self.threshold {
            return EscalationOutcome {
                total,
                blocked: false,
            };
        }

        let expires_at = Utc::now() + chrono::Duration::seconds(self.block_duration_secs as i64);
        let reason = format!("{} rate-limit violations ({})", total, kind);

        if let Err(e) = self.store.upsert_active_block(
            &origin.to_string(),
            BlockType::Automatic,
            &reason,
            Some(&kind.to_string()),
            total,
            Some(expires_at),
        ) {
            warn!(origin = %origin, "Failed to persist automatic block: {}", e);
        }

        self.cache.insert(origin);

        info!(
            origin = %origin,
            violations = total,
            kind = %kind,
            expires_at = %expires_at.format("%Y-%m-%d %H:%M:%S"),
            "Origin auto-blocked"
        );

        EscalationOutcome {
            total,
            blocked: true,
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::defaults;

    fn engine() -> (AutoBlockEngine, Arc<SqliteStore>, Arc<BlockedOriginCache>) {
        let store = Arc::new(SqliteStore::new(":memory:").unwrap());
        let cache = Arc::new(BlockedOriginCache::new(store.clone()));
        let violations = Arc::new(ViolationTracker::new());
        let engine = AutoBlockEngine::new(
            store.clone(),
            cache.clone(),
            violations,
            &defaults::default_auto_block_config(),
        );
        (engine, store, cache)
    }

    #[test]
    fn test_no_block_below_threshold() {
        let (engine, store, cache) = engine();
        let ip: IpAddr = "10.0.0.1".parse().unwrap();

        for expected in 1..5 {
            let outcome = engine.record_violation(ip, AttackKind::ContentSpam);
            assert_eq!(outcome.total, expected);
            assert!(!outcome.blocked);
        }
        assert!(store.get_blocks(true).unwrap().is_empty());
        assert!(!cache.is_blocked(&ip));
    }

    #[test]
    fn test_threshold_creates_single_active_block() {
        let (engine, store, cache) = engine();
        let ip: IpAddr = "10.0.0.2".parse().unwrap();

        for _ in 0..4 {
            engine.record_violation(ip, AttackKind::LoginBruteForce);
        }
        let outcome = engine.record_violation(ip, AttackKind::LoginBruteForce);
        assert!(outcome.blocked);
        assert_eq!(outcome.total, 5);

        let blocks = store.get_blocks(true).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].block_type, "automatic");
        assert_eq!(blocks[0].violation_count, 5);
        assert!(blocks[0].expires_at.is_some());

        // Write-through: the cache already denies, no refresh needed.
        assert!(cache.is_blocked(&ip));
    }

    #[test]
    fn test_repeat_escalation_updates_snapshot_not_duplicates() {
        let (engine, store, _cache) = engine();
        let ip: IpAddr = "10.0.0.3".parse().unwrap();

        for _ in 0..6 {
            engine.record_violation(ip, AttackKind::MessageSpam);
        }

        let blocks = store.get_blocks(true).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].violation_count, 6);
    }
}
