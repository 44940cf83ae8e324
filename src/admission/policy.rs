use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use anyhow::{bail, Result};

use crate::config::settings::{PolicyConfig, PolicyScope};

/// A named `(max_requests, window)` limit bound to a counting scope.
#[derive(Debug, Clone)]
pub struct RatePolicy {
    pub name: String,
    pub scope: PolicyScope,
    pub max_requests: u64,
    pub window: Duration,
}

impl RatePolicy {
    pub fn new(
        name: impl Into<String>,
        scope: PolicyScope,
        max_requests: u64,
        window: Duration,
    ) -> Result<Self> {
        let name = name.into();
        if max_requests == 0 {
            bail!("policy '{}' has a zero request limit", name);
        }
        if window.is_zero() {
            bail!("policy '{}' has a zero-length window", name);
        }
        Ok(Self {
            name,
            scope,
            max_requests,
            window,
        })
    }

    /// The window-counter key this policy counts a given request under.
    /// Returns None when the policy's dimension is absent from the request
    /// (user-scoped policy, anonymous caller).
    pub fn rate_key(&self, origin: &IpAddr, user_id: Option<&str>) -> Option<String> {
        match self.scope {
            PolicyScope::Ip => Some(format!("{}:{}", self.name, origin)),
            PolicyScope::User => user_id.map(|user| format!("{}:{}", self.name, user)),
            PolicyScope::Global => Some(self.name.clone()),
        }
    }
}

/// Maps logical operations to the window policies that guard them. Built
/// once from validated config at startup; read-only afterwards.
pub struct PolicyTable {
    by_operation: HashMap<String, Vec<RatePolicy>>,
}

impl PolicyTable {
    pub fn from_config(policies: &[PolicyConfig]) -> Result<Self> {
        let mut by_operation: HashMap<String, Vec<RatePolicy>> = HashMap::new();
        for cfg in policies {
            let policy = RatePolicy::new(
                &cfg.name,
                cfg.scope,
                cfg.max_requests,
                Duration::from_secs(cfg.window_secs),
            )?;
            by_operation
                .entry(cfg.operation.clone())
                .or_default()
                .push(policy);
        }
        Ok(Self { by_operation })
    }

    pub fn for_operation(&self, operation: &str) -> &[RatePolicy] {
        self.by_operation
            .get(operation)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn operation_count(&self) -> usize {
        self.by_operation.len()
    }
}
