use std::fmt;

use serde::{Deserialize, Serialize};

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DenyReason {
    /// The origin carries an active block; terminal state, no side effects.
    OriginBlocked,
    /// A window policy was exceeded on this request.
    RateLimited,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::OriginBlocked => write!(f, "origin_blocked"),
            DenyReason::RateLimited => write!(f, "rate_limited"),
        }
    }
}

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub reason: Option<DenyReason>,
    /// This denial crossed the violation threshold and created or refreshed
    /// an automatic block.
    pub escalated: bool,
}

impl Decision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            escalated: false,
        }
    }

    pub fn deny(reason: DenyReason) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            escalated: false,
        }
    }

    pub fn deny_escalated(reason: DenyReason) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            escalated: true,
        }
    }
}
