//! HTTP and WebSocket gateway for TaskRAG.
//!
//! A thin transport: every route ends in a `SessionManager`, task store, or
//! retrieval gateway call. Built on Axum.

pub mod api_v1;
pub mod state;
mod ws;

#[cfg(test)]
pub(crate) mod test_support;

use axum::extract::DefaultBodyLimit;
use axum::{Router, extract::State, response::Json, routing::get};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

pub use state::{AppState, SharedState};

/// Request bodies larger than this are rejected (documents included).
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Build the full router: `/health` plus the v1 API under `/v1`.
pub fn build_router(state: SharedState) -> Router {
    let allow_cors = state.config.gateway.allow_cors;

    let mut router = Router::new()
        .route("/health", get(health_handler))
        .with_state(state.clone())
        .nest("/v1", api_v1::v1_router(state))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES));

    if allow_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::PATCH,
                axum::http::Method::DELETE,
            ])
            .allow_headers([axum::http::header::CONTENT_TYPE])
            .max_age(std::time::Duration::from_secs(3600));
        router = router.layer(cors);
    }

    router.layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Start the gateway HTTP server and the idle-session sweeper.
pub async fn start(state: SharedState) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", state.config.gateway.host, state.config.gateway.port);

    let sweeper = state.sessions.spawn_idle_sweeper(
        state.config.sessions.sweep_interval(),
        state.config.sessions.idle_ttl(),
    );

    let app = build_router(state);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let served = axum::serve(listener, app).await;
    sweeper.abort();
    served?;

    Ok(())
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    sessions: usize,
    uptime_secs: i64,
}

async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        sessions: state.sessions.len(),
        uptime_secs: (chrono::Utc::now() - state.started_at).num_seconds(),
    })
}
