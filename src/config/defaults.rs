use super::settings::{
    AdminApiConfig, AutoBlockConfig, CacheConfig, LoggingConfig, PolicyConfig, PolicyScope,
    StorageConfig,
};

// ---------------------------------------------------------------------------
// Top-level struct defaults
// ---------------------------------------------------------------------------

pub fn default_logging_config() -> LoggingConfig {
    LoggingConfig {
        level: default_log_level(),
        file: default_log_file(),
    }
}

pub fn default_storage_config() -> StorageConfig {
    StorageConfig {
        sqlite_path: default_sqlite_path(),
    }
}

pub fn default_admin_api_config() -> AdminApiConfig {
    AdminApiConfig {
        bind: default_admin_bind(),
        api_key: default_api_key(),
    }
}

pub fn default_auto_block_config() -> AutoBlockConfig {
    AutoBlockConfig {
        violation_threshold: default_violation_threshold(),
        block_duration_secs: default_block_duration_secs(),
    }
}

pub fn default_cache_config() -> CacheConfig {
    CacheConfig {
        refresh_interval_secs: default_refresh_interval_secs(),
    }
}

// ---------------------------------------------------------------------------
// Field defaults
// ---------------------------------------------------------------------------

pub fn default_log_level() -> String {
    "info".to_string()
}

pub fn default_log_file() -> String {
    "/opt/rampart/logs/rampart.log".to_string()
}

pub fn default_sqlite_path() -> String {
    "/opt/rampart/data/rampart.db".to_string()
}

pub fn default_admin_bind() -> String {
    "127.0.0.1:8425".to_string()
}

pub fn default_api_key() -> String {
    "change-me".to_string()
}

pub fn default_violation_threshold() -> u64 {
    5
}

pub fn default_block_duration_secs() -> u64 {
    86_400
}

pub fn default_refresh_interval_secs() -> u64 {
    300
}

// ---------------------------------------------------------------------------
// Policy table
// ---------------------------------------------------------------------------

fn policy(
    name: &str,
    operation: &str,
    scope: PolicyScope,
    max_requests: u64,
    window_secs: u64,
) -> PolicyConfig {
    PolicyConfig {
        name: name.to_string(),
        operation: operation.to_string(),
        scope,
        max_requests,
        window_secs,
    }
}

/// The built-in policy table. Per-user and per-IP policies for the same
/// operation are evaluated together; any one of them denying denies the
/// request.
pub fn default_policies() -> Vec<PolicyConfig> {
    vec![
        policy("content-create", "content-create", PolicyScope::User, 10, 300),
        policy("content-create-ip", "content-create", PolicyScope::Ip, 20, 300),
        policy("content-create-hourly", "content-create", PolicyScope::User, 50, 3_600),
        policy("content-create-daily", "content-create", PolicyScope::User, 100, 86_400),
        policy("login", "login", PolicyScope::Ip, 5, 900),
        policy("message-send", "message-send", PolicyScope::User, 30, 60),
        policy("webhook-ip", "webhook", PolicyScope::Ip, 100, 60),
        policy("webhook-global", "webhook", PolicyScope::Global, 500, 3_600),
    ]
}
