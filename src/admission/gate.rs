use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::models::attack::{AttackAttempt, AttackKind};
use crate::models::decision::{Decision, DenyReason};
use crate::models::request::RequestContext;
use crate::storage::sqlite::SqliteStore;

use super::auto_block::AutoBlockEngine;
use super::block_cache::BlockedOriginCache;
use super::policy::{PolicyTable, RatePolicy};
use super::violations::ViolationTracker;
use super::window::WindowCounter;

/// Aggregate view for operator dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct GateStatistics {
    pub window_secs: u64,
    pub denied_total: u64,
    pub denied_by_kind: Vec<(String, u64)>,
    pub top_origins: Vec<(String, u64)>,
    pub active_blocks: usize,
    pub tracked_origins: usize,
    pub tracked_windows: usize,
}

/// The façade the request pipeline calls. Composes the blocked-origin
/// cache, window counters, violation tracking, and the escalation engine
/// into a single allow/deny decision with the denial side effects.
pub struct AdmissionGate {
    cache: Arc<BlockedOriginCache>,
    windows: Arc<WindowCounter>,
    violations: Arc<ViolationTracker>,
    auto_block: Arc<AutoBlockEngine>,
    store: Arc<SqliteStore>,
    policies: Arc<PolicyTable>,
}

impl AdmissionGate {
    pub fn new(
        cache: Arc<BlockedOriginCache>,
        windows: Arc<WindowCounter>,
        violations: Arc<ViolationTracker>,
        auto_block: Arc<AutoBlockEngine>,
        store: Arc<SqliteStore>,
        policies: Arc<PolicyTable>,
    ) -> Self {
        Self {
            cache,
            windows,
            violations,
            auto_block,
            store,
            policies,
        }
    }

    /// Admission check against a single policy and rate key.
    ///
    /// An already-blocked origin is denied up front with no side effects:
    /// the block is the terminal state and further violations do not
    /// compound. Otherwise the window is counted; on denial the attempt is
    /// written to the ledger and one violation is recorded, possibly
    /// escalating into an automatic block.
    pub fn evaluate(
        &self,
        origin: IpAddr,
        rate_key: &str,
        policy: &RatePolicy,
        kind: AttackKind,
        ctx: &RequestContext,
    ) -> Decision {
        if self.cache.is_blocked(&origin) {
            debug!(origin = %origin, "Denied: origin is blocked");
            return Decision::deny(DenyReason::OriginBlocked);
        }

        if self
            .windows
            .increment(rate_key, policy.max_requests, policy.window)
        {
            return Decision::allow();
        }

        self.on_rate_limited(origin, policy, kind, ctx)
    }

    /// Admission check for a logical operation: every policy the table maps
    /// to the operation is evaluated against its own rate key, and the
    /// request is denied if any of them denies. Policies whose dimension is
    /// absent (user scope, anonymous caller) are skipped.
    pub fn evaluate_operation(
        &self,
        origin: IpAddr,
        operation: &str,
        kind: AttackKind,
        ctx: &RequestContext,
    ) -> Decision {
        if self.cache.is_blocked(&origin) {
            debug!(origin = %origin, operation = operation, "Denied: origin is blocked");
            return Decision::deny(DenyReason::OriginBlocked);
        }

        for policy in self.policies.for_operation(operation) {
            let Some(rate_key) = policy.rate_key(&origin, ctx.user_id.as_deref()) else {
                continue;
            };
            if !self
                .windows
                .increment(&rate_key, policy.max_requests, policy.window)
            {
                return self.on_rate_limited(origin, policy, kind, ctx);
            }
        }

        Decision::allow()
    }

    /// Denial side effects. The escalation outcome is computed first so the
    /// ledger row can carry `resulted_in_block`; the write-through cache
    /// update inside the escalation happens before this returns. An audit
    /// write failure is logged and swallowed: it must never turn the
    /// already-computed denial into anything else.
    fn on_rate_limited(
        &self,
        origin: IpAddr,
        policy: &RatePolicy,
        kind: AttackKind,
        ctx: &RequestContext,
    ) -> Decision {
        info!(
            origin = %origin,
            policy = %policy.name,
            kind = %kind,
            endpoint = %ctx.endpoint,
            "Rate limit exceeded"
        );

        let outcome = self.auto_block.record_violation(origin, kind);

        let attempt = AttackAttempt {
            origin,
            kind,
            endpoint: ctx.endpoint.clone(),
            user_id: ctx.user_id.clone(),
            user_agent: ctx.user_agent.clone(),
            timestamp: Utc::now(),
            resulted_in_block: outcome.blocked,
        };
        if let Err(e) = self.store.insert_attempt(&attempt) {
            warn!(origin = %origin, "Failed to record attack attempt: {}", e);
        }

        if outcome.blocked {
            Decision::deny_escalated(DenyReason::RateLimited)
        } else {
            Decision::deny(DenyReason::RateLimited)
        }
    }

    /// Manual unblock: deactivates the durable block(s) and invalidates the
    /// cache entry so the very next evaluate call sees the origin unblocked.
    pub fn unblock_origin(&self, origin: IpAddr) -> Result<bool> {
        let removed = self.store.deactivate_block(&origin.to_string())?;
        self.cache.invalidate(&origin);
        if removed {
            info!(origin = %origin, "Origin unblocked");
        }
        Ok(removed)
    }

    /// Administrative clear of one rate key's current window.
    pub fn reset_window(&self, rate_key: &str) {
        self.windows.reset(rate_key);
        info!(rate_key = rate_key, "Rate window reset");
    }

    pub fn statistics(&self, window: Duration) -> Result<GateStatistics> {
        let from = Utc::now() - chrono::Duration::seconds(window.as_secs() as i64);
        Ok(GateStatistics {
            window_secs: window.as_secs(),
            denied_total: self.store.attempts_since(from)?,
            denied_by_kind: self.store.attempts_by_kind(from)?,
            top_origins: self.store.top_origins(from, 10)?,
            active_blocks: self.cache.blocked_count(),
            tracked_origins: self.violations.tracked_origins(),
            tracked_windows: self.windows.tracked_keys(),
        })
    }

    /// Lifetime violation total for one origin, for operator lookups.
    pub fn violation_total(&self, origin: &IpAddr) -> u64 {
        self.violations.total(origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::auto_block::AutoBlockEngine;
    use crate::admission::clock::ManualClock;
    use crate::config::defaults;
    use crate::config::settings::{PolicyConfig, PolicyScope};

    struct Harness {
        gate: AdmissionGate,
        clock: Arc<ManualClock>,
        store: Arc<SqliteStore>,
        cache: Arc<BlockedOriginCache>,
        windows: Arc<WindowCounter>,
    }

    fn harness(policies: Vec<PolicyConfig>) -> Harness {
        let clock = Arc::new(ManualClock::new());
        let store = Arc::new(SqliteStore::new(":memory:").unwrap());
        let cache = Arc::new(BlockedOriginCache::new(store.clone()));
        let windows = Arc::new(WindowCounter::new(clock.clone()));
        let violations = Arc::new(ViolationTracker::new());
        let auto_block = Arc::new(AutoBlockEngine::new(
            store.clone(),
            cache.clone(),
            violations.clone(),
            &defaults::default_auto_block_config(),
        ));
        let table = Arc::new(PolicyTable::from_config(&policies).unwrap());
        let gate = AdmissionGate::new(
            cache.clone(),
            windows.clone(),
            violations,
            auto_block,
            store.clone(),
            table,
        );
        Harness {
            gate,
            clock,
            store,
            cache,
            windows,
        }
    }

    fn login_policy() -> Vec<PolicyConfig> {
        vec![PolicyConfig {
            name: "login".to_string(),
            operation: "login".to_string(),
            scope: PolicyScope::Ip,
            max_requests: 3,
            window_secs: 60,
        }]
    }

    #[test]
    fn test_requests_within_policy_allowed() {
        let h = harness(login_policy());
        let ip: IpAddr = "10.1.0.1".parse().unwrap();
        let ctx = RequestContext::new("/login");

        for _ in 0..3 {
            let decision = h.gate.evaluate_operation(ip, "login", AttackKind::LoginBruteForce, &ctx);
            assert!(decision.allowed);
        }
        let denied = h.gate.evaluate_operation(ip, "login", AttackKind::LoginBruteForce, &ctx);
        assert!(!denied.allowed);
        assert_eq!(denied.reason, Some(DenyReason::RateLimited));
    }

    #[test]
    fn test_denial_writes_ledger_row() {
        let h = harness(login_policy());
        let ip: IpAddr = "10.1.0.2".parse().unwrap();
        let ctx = RequestContext::new("/login").with_user_agent("curl/8");

        for _ in 0..4 {
            h.gate.evaluate_operation(ip, "login", AttackKind::LoginBruteForce, &ctx);
        }

        let rows = h.store.get_recent_attempts(10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].origin, "10.1.0.2");
        assert_eq!(rows[0].attack_kind, "login_brute_force");
        assert_eq!(rows[0].endpoint, "/login");
        assert_eq!(rows[0].user_agent.as_deref(), Some("curl/8"));
        assert!(!rows[0].resulted_in_block);
    }

    #[test]
    fn test_any_policy_denying_denies_the_operation() {
        // Per-user limit is tighter than per-IP; the user limit trips first.
        let policies = vec![
            PolicyConfig {
                name: "content-create".to_string(),
                operation: "content-create".to_string(),
                scope: PolicyScope::User,
                max_requests: 2,
                window_secs: 300,
            },
            PolicyConfig {
                name: "content-create-ip".to_string(),
                operation: "content-create".to_string(),
                scope: PolicyScope::Ip,
                max_requests: 10,
                window_secs: 300,
            },
        ];
        let h = harness(policies);
        let ip: IpAddr = "10.1.0.3".parse().unwrap();
        let ctx = RequestContext::new("/posts").with_user("u1");

        assert!(h.gate.evaluate_operation(ip, "content-create", AttackKind::ContentSpam, &ctx).allowed);
        assert!(h.gate.evaluate_operation(ip, "content-create", AttackKind::ContentSpam, &ctx).allowed);
        assert!(!h.gate.evaluate_operation(ip, "content-create", AttackKind::ContentSpam, &ctx).allowed);

        // A different user from the same IP still has budget.
        let other = RequestContext::new("/posts").with_user("u2");
        assert!(h.gate.evaluate_operation(ip, "content-create", AttackKind::ContentSpam, &other).allowed);
    }

    #[test]
    fn test_anonymous_caller_skips_user_scoped_policy() {
        let policies = vec![PolicyConfig {
            name: "message-send".to_string(),
            operation: "message-send".to_string(),
            scope: PolicyScope::User,
            max_requests: 1,
            window_secs: 60,
        }];
        let h = harness(policies);
        let ip: IpAddr = "10.1.0.4".parse().unwrap();
        let ctx = RequestContext::new("/messages");

        for _ in 0..5 {
            assert!(h.gate.evaluate_operation(ip, "message-send", AttackKind::MessageSpam, &ctx).allowed);
        }
    }

    /// The end-to-end escalation scenario: policy (max=3, window=60s).
    /// Five denial cycles auto-block the origin; the sixth cycle is denied
    /// purely by the block, with no window increment; unblocking restores
    /// admission immediately.
    #[test]
    fn test_escalation_lifecycle() {
        let h = harness(login_policy());
        let ip: IpAddr = "10.9.0.1".parse().unwrap();
        let ctx = RequestContext::new("/login");
        let kind = AttackKind::LoginBruteForce;

        for cycle in 1..=5u64 {
            for _ in 0..3 {
                assert!(h.gate.evaluate_operation(ip, "login", kind, &ctx).allowed);
            }
            let denied = h.gate.evaluate_operation(ip, "login", kind, &ctx);
            assert!(!denied.allowed);

            if cycle < 5 {
                assert!(!denied.escalated);
                assert!(h.store.get_blocks(true).unwrap().is_empty());
                assert!(!h.cache.is_blocked(&ip));
            } else {
                // Fifth denial crosses the threshold.
                assert!(denied.escalated);
                let blocks = h.store.get_blocks(true).unwrap();
                assert_eq!(blocks.len(), 1);
                assert_eq!(blocks[0].block_type, "automatic");
                assert_eq!(blocks[0].violation_count, 5);
                assert!(h.cache.is_blocked(&ip));
            }

            h.clock.advance(Duration::from_secs(61));
        }

        // Exactly one ledger row carries resulted_in_block.
        let rows = h.store.get_recent_attempts(10).unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows.iter().filter(|r| r.resulted_in_block).count(), 1);
        assert!(rows[0].resulted_in_block);

        // Sixth cycle: denied by the block alone, no window increment.
        let before = h.windows.remaining("login:10.9.0.1", 3, Duration::from_secs(60));
        let denied = h.gate.evaluate_operation(ip, "login", kind, &ctx);
        assert!(!denied.allowed);
        assert_eq!(denied.reason, Some(DenyReason::OriginBlocked));
        let after = h.windows.remaining("login:10.9.0.1", 3, Duration::from_secs(60));
        assert_eq!(before, after);
        // And no further ledger rows or violations accumulate.
        assert_eq!(h.store.get_recent_attempts(10).unwrap().len(), 5);

        // Unblock takes effect on the very next call.
        assert!(h.gate.unblock_origin(ip).unwrap());
        assert!(h.gate.evaluate_operation(ip, "login", kind, &ctx).allowed);
    }

    #[test]
    fn test_block_loaded_from_storage_denies() {
        let h = harness(login_policy());
        let ip: IpAddr = "10.9.0.2".parse().unwrap();
        let ctx = RequestContext::new("/login");

        // Block created elsewhere (another process, or an operator).
        h.store
            .upsert_active_block(
                "10.9.0.2",
                crate::models::attack::BlockType::Manual,
                "operator",
                None,
                0,
                None,
            )
            .unwrap();
        h.cache.force_refresh().unwrap();

        let denied = h.gate.evaluate_operation(ip, "login", AttackKind::LoginBruteForce, &ctx);
        assert_eq!(denied.reason, Some(DenyReason::OriginBlocked));
    }

    #[test]
    fn test_single_policy_evaluate() {
        let h = harness(vec![]);
        let ip: IpAddr = "10.9.0.3".parse().unwrap();
        let ctx = RequestContext::new("/hooks");
        let policy = RatePolicy::new(
            "webhook-ip",
            PolicyScope::Ip,
            2,
            Duration::from_secs(60),
        )
        .unwrap();
        let key = policy.rate_key(&ip, None).unwrap();

        assert!(h.gate.evaluate(ip, &key, &policy, AttackKind::WebhookFlood, &ctx).allowed);
        assert!(h.gate.evaluate(ip, &key, &policy, AttackKind::WebhookFlood, &ctx).allowed);
        assert!(!h.gate.evaluate(ip, &key, &policy, AttackKind::WebhookFlood, &ctx).allowed);
    }

    #[test]
    fn test_reset_window_restores_budget() {
        let h = harness(login_policy());
        let ip: IpAddr = "10.9.0.4".parse().unwrap();
        let ctx = RequestContext::new("/login");

        for _ in 0..3 {
            h.gate.evaluate_operation(ip, "login", AttackKind::LoginBruteForce, &ctx);
        }
        assert!(!h.gate.evaluate_operation(ip, "login", AttackKind::LoginBruteForce, &ctx).allowed);

        h.gate.reset_window("login:10.9.0.4");
        assert!(h.gate.evaluate_operation(ip, "login", AttackKind::LoginBruteForce, &ctx).allowed);
    }

    #[test]
    fn test_statistics_reflect_denials() {
        let h = harness(login_policy());
        let ip: IpAddr = "10.9.0.5".parse().unwrap();
        let ctx = RequestContext::new("/login");

        for _ in 0..5 {
            h.gate.evaluate_operation(ip, "login", AttackKind::LoginBruteForce, &ctx);
        }

        let stats = h.gate.statistics(Duration::from_secs(3600)).unwrap();
        assert_eq!(stats.denied_total, 2);
        assert_eq!(stats.denied_by_kind[0].0, "login_brute_force");
        assert_eq!(stats.top_origins[0], ("10.9.0.5".to_string(), 2));
        assert_eq!(stats.tracked_origins, 1);
    }
}
