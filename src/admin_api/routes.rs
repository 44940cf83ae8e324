use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::admission::block_cache::BlockedOriginCache;
use crate::admission::gate::AdmissionGate;
use crate::models::attack::BlockType;
use crate::storage::sqlite::SqliteStore;

/// Shared state handed to every admin route.
#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<AdmissionGate>,
    pub cache: Arc<BlockedOriginCache>,
    pub store: Arc<SqliteStore>,
    pub start_time: Instant,
    pub api_key: String,
}

#[derive(Debug, Deserialize)]
pub struct StatsParams {
    /// Trailing window in hours; defaults to 24.
    pub hours: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct AttemptsParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct BlocksParams {
    pub all: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct CreateBlockRequest {
    pub origin: String,
    pub reason: Option<String>,
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ResetWindowRequest {
    pub rate_key: String,
}

pub async fn get_status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "blocked_origins": state.cache.blocked_count(),
    }))
}

pub async fn get_stats(
    State(state): State<AppState>,
    Query(params): Query<StatsParams>,
) -> Result<Json<Value>, StatusCode> {
    let hours = params.hours.unwrap_or(24);
    let stats = state
        .gate
        .statistics(Duration::from_secs(hours * 3600))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let daily = state
        .store
        .attempts_by_day(7)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(json!({
        "window_secs": stats.window_secs,
        "denied_total": stats.denied_total,
        "denied_by_kind": stats.denied_by_kind,
        "top_origins": stats.top_origins,
        "active_blocks": stats.active_blocks,
        "tracked_origins": stats.tracked_origins,
        "attempts_by_day": daily,
    })))
}

pub async fn get_attempts(
    State(state): State<AppState>,
    Query(params): Query<AttemptsParams>,
) -> Result<Json<Value>, StatusCode> {
    let limit = params.limit.unwrap_or(100).min(1000);
    let attempts = state
        .store
        .get_recent_attempts(limit)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(json!({ "attempts": attempts })))
}

pub async fn get_blocks(
    State(state): State<AppState>,
    Query(params): Query<BlocksParams>,
) -> Result<Json<Value>, StatusCode> {
    let active_only = !params.all.unwrap_or(false);
    let blocks = state
        .store
        .get_blocks(active_only)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(json!({ "blocks": blocks })))
}

/// Operator-created block. Persisted as a Manual row (never touched by the
/// auto-block path) and written through into the cache so it applies to the
/// next request.
pub async fn create_block(
    State(state): State<AppState>,
    Json(body): Json<CreateBlockRequest>,
) -> Result<Json<Value>, StatusCode> {
    let origin: IpAddr = body.origin.parse().map_err(|_| StatusCode::BAD_REQUEST)?;
    let reason = body.reason.unwrap_or_else(|| "manual block".to_string());
    let expires_at = body
        .ttl_secs
        .map(|secs| Utc::now() + chrono::Duration::seconds(secs as i64));

    state
        .store
        .upsert_active_block(&origin.to_string(), BlockType::Manual, &reason, None, 0, expires_at)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    state.cache.insert(origin);

    Ok(Json(json!({ "status": "blocked", "origin": origin.to_string() })))
}

pub async fn unblock(
    State(state): State<AppState>,
    Path(origin): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let origin: IpAddr = origin.parse().map_err(|_| StatusCode::BAD_REQUEST)?;
    let removed = state
        .gate
        .unblock_origin(origin)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    if !removed {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(json!({ "status": "unblocked", "origin": origin.to_string() })))
}

/// Everything the gate knows about one origin: live violation count, the
/// cache verdict, and the active durable block if any.
pub async fn get_origin(
    State(state): State<AppState>,
    Path(origin): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let origin: IpAddr = origin.parse().map_err(|_| StatusCode::BAD_REQUEST)?;
    let block = state
        .store
        .get_active_block(&origin.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(json!({
        "origin": origin.to_string(),
        "violations": state.gate.violation_total(&origin),
        "blocked": state.cache.is_blocked(&origin),
        "active_block": block,
    })))
}

pub async fn refresh_cache(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let loaded = state
        .cache
        .force_refresh()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(json!({ "status": "refreshed", "blocked_origins": loaded })))
}

pub async fn reset_window(
    State(state): State<AppState>,
    Json(body): Json<ResetWindowRequest>,
) -> Json<Value> {
    state.gate.reset_window(&body.rate_key);
    Json(json!({ "status": "reset", "rate_key": body.rate_key }))
}
