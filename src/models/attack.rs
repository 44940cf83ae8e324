use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which abuse vector a denied request belongs to. Tags ledger rows and
/// automatic blocks so dashboards can group by vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttackKind {
    ContentSpam,
    LoginBruteForce,
    MessageSpam,
    WebhookFlood,
}

impl fmt::Display for AttackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttackKind::ContentSpam => write!(f, "content_spam"),
            AttackKind::LoginBruteForce => write!(f, "login_brute_force"),
            AttackKind::MessageSpam => write!(f, "message_spam"),
            AttackKind::WebhookFlood => write!(f, "webhook_flood"),
        }
    }
}

impl AttackKind {
    pub fn from_str_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "content_spam" => Some(Self::ContentSpam),
            "login_brute_force" => Some(Self::LoginBruteForce),
            "message_spam" => Some(Self::MessageSpam),
            "webhook_flood" => Some(Self::WebhookFlood),
            _ => None,
        }
    }
}

/// Who created a durable block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockType {
    Manual,
    Automatic,
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockType::Manual => write!(f, "manual"),
            BlockType::Automatic => write!(f, "automatic"),
        }
    }
}

impl BlockType {
    pub fn from_str_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "manual" => Some(Self::Manual),
            "automatic" => Some(Self::Automatic),
            _ => None,
        }
    }
}

/// One denied request, as written to the durable ledger. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttackAttempt {
    pub origin: IpAddr,
    pub kind: AttackKind,
    pub endpoint: String,
    pub user_id: Option<String>,
    pub user_agent: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// True exactly on the denial that triggered an escalation.
    pub resulted_in_block: bool,
}
