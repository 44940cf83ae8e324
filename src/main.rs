mod admin_api;
mod admission;
mod config;
mod models;
mod storage;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::admin_api::routes::AppState;
use crate::admin_api::server::AdminApiServer;
use crate::admission::auto_block::AutoBlockEngine;
use crate::admission::block_cache::{refresh_loop, BlockedOriginCache};
use crate::admission::clock::SystemClock;
use crate::admission::gate::AdmissionGate;
use crate::admission::policy::PolicyTable;
use crate::admission::violations::ViolationTracker;
use crate::admission::window::WindowCounter;
use crate::config::settings::Settings;
use crate::storage::sqlite::SqliteStore;

/// Parse the `--config` CLI flag. Defaults to `/opt/rampart/config/rampart.toml`.
fn parse_config_path() -> String {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = String::from("/opt/rampart/config/rampart.toml");

    let mut i = 1;
    while i < args.len() {
        if args[i] == "--config" {
            if let Some(path) = args.get(i + 1) {
                config_path = path.clone();
            }
            i += 2;
        } else {
            i += 1;
        }
    }

    config_path
}

/// Initialise the `tracing` subscriber with both stdout and file output.
fn init_tracing(log_dir: &str) {
    let _ = std::fs::create_dir_all(log_dir);

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(format!("{}/rampart.log", log_dir))
        .expect("Failed to open log file");

    let file_layer = fmt::layer()
        .with_writer(Arc::new(log_file))
        .with_ansi(false)
        .with_target(true);

    let stdout_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(true);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,rampart=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();
}

/// Background task that periodically evicts stale window entries so memory
/// tracks recently active keys rather than every key ever seen.
async fn maintenance_loop(windows: Arc<WindowCounter>) {
    let mut interval = tokio::time::interval(Duration::from_secs(300));
    loop {
        interval.tick().await;
        windows.cleanup(Duration::from_secs(2 * 86_400));
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ---------------------------------------------------------------
    // 1. Configuration
    // ---------------------------------------------------------------
    let config_path = parse_config_path();
    let settings = Settings::load(&config_path)?;
    let settings = Arc::new(settings);

    // ---------------------------------------------------------------
    // 2. Logging
    // ---------------------------------------------------------------
    let log_dir = std::path::Path::new(&settings.logging.file)
        .parent()
        .and_then(|p| p.to_str())
        .unwrap_or("/opt/rampart/logs")
        .to_string();
    init_tracing(&log_dir);

    info!("Starting Rampart abuse-mitigation core");
    info!("Config loaded from {}", config_path);

    // ---------------------------------------------------------------
    // 3. Storage and block cache
    // ---------------------------------------------------------------
    let store = Arc::new(
        SqliteStore::new(&settings.storage.sqlite_path)
            .expect("Failed to initialise SQLite store"),
    );

    let cache = Arc::new(BlockedOriginCache::new(store.clone()));
    match cache.force_refresh() {
        Ok(count) => info!("Loaded {} blocked origins from storage", count),
        // Fail-open: start with an empty snapshot and let the periodic
        // refresh pick the list up once the store recovers.
        Err(e) => warn!("Initial block list load failed: {}", e),
    }

    // ---------------------------------------------------------------
    // 4. Admission components
    // ---------------------------------------------------------------
    let windows = Arc::new(WindowCounter::new(Arc::new(SystemClock)));
    let violations = Arc::new(ViolationTracker::new());
    let auto_block = Arc::new(AutoBlockEngine::new(
        store.clone(),
        cache.clone(),
        violations.clone(),
        &settings.auto_block,
    ));
    let policies = Arc::new(PolicyTable::from_config(&settings.policies)?);
    info!("Policy table loaded ({} operations)", policies.operation_count());

    let gate = Arc::new(AdmissionGate::new(
        cache.clone(),
        windows.clone(),
        violations.clone(),
        auto_block.clone(),
        store.clone(),
        policies.clone(),
    ));

    info!("Admission gate initialised");

    // ---------------------------------------------------------------
    // 5. Admin API
    // ---------------------------------------------------------------
    let admin_state = AppState {
        gate: gate.clone(),
        cache: cache.clone(),
        store: store.clone(),
        start_time: Instant::now(),
        api_key: settings.admin_api.api_key.clone(),
    };

    let admin_bind = settings.admin_api.bind.clone();
    let admin_server = AdminApiServer::new(admin_state, admin_bind.clone());
    info!("Admin API will listen on {}", admin_bind);

    // ---------------------------------------------------------------
    // 6. Spawn background tasks
    // ---------------------------------------------------------------
    let refresh_interval = Duration::from_secs(settings.cache.refresh_interval_secs);
    let refresh_handle = tokio::spawn(refresh_loop(cache.clone(), refresh_interval));

    let maintenance_handle = tokio::spawn(maintenance_loop(windows.clone()));

    let admin_handle = tokio::spawn(async move {
        if let Err(e) = admin_server.run().await {
            error!("Admin API server error: {}", e);
        }
    });

    info!("Rampart is running. Press Ctrl+C to shut down.");

    // ---------------------------------------------------------------
    // 7. Wait for shutdown signal
    // ---------------------------------------------------------------
    tokio::signal::ctrl_c().await?;
    info!("Shutting down Rampart...");

    // Cancel background tasks.
    refresh_handle.abort();
    maintenance_handle.abort();
    admin_handle.abort();

    info!("Rampart shut down gracefully");
    Ok(())
}
