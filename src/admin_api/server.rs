use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::admin_api::routes::AppState;
use crate::admin_api::{auth, routes};

/// Operator-facing HTTP API: block management, ledger queries, statistics.
/// Not part of the admission hot path.
pub struct AdminApiServer {
    state: AppState,
    bind_addr: String,
}

impl AdminApiServer {
    pub fn new(state: AppState, bind_addr: String) -> Self {
        Self { state, bind_addr }
    }

    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let state = self.state.clone();
        let api_key = state.api_key.clone();

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        let app = Router::new()
            .route("/api/rampart/status", get(routes::get_status))
            .route("/api/rampart/stats", get(routes::get_stats))
            .route("/api/rampart/attempts", get(routes::get_attempts))
            .route(
                "/api/rampart/blocks",
                get(routes::get_blocks).post(routes::create_block),
            )
            .route("/api/rampart/blocks/{origin}", delete(routes::unblock))
            .route("/api/rampart/origins/{origin}", get(routes::get_origin))
            .route("/api/rampart/cache/refresh", post(routes::refresh_cache))
            .route("/api/rampart/windows/reset", post(routes::reset_window))
            .layer(middleware::from_fn_with_state(
                api_key,
                auth::auth_middleware,
            ))
            .layer(cors)
            .with_state(state);

        let listener = tokio::net::TcpListener::bind(&self.bind_addr).await?;
        info!("Admin API listening on {}", self.bind_addr);
        axum::serve(listener, app).await?;

        Ok(())
    }
}
