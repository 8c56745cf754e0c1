//! Control API: Axum web server over the session manager.
//!
//! CORS enabled for local operator tooling.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, Method},
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use routes::AppState;

/// Start the control API server.
///
/// Binds before returning so a port clash fails startup; serving runs in
/// a background task.
pub async fn spawn_dashboard(state: AppState, port: u16) -> Result<()> {
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind control API port {port}"))?;
    info!(port, "Control API listening on http://localhost:{port}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "Control API server error");
        }
    });

    Ok(())
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(routes::health))
        .route("/api/sessions", get(routes::list_sessions))
        .route("/api/sessions/:id/status", get(routes::get_status))
        .route("/api/sessions/:id/portfolio", get(routes::get_portfolio))
        .route("/api/sessions/:id/start", post(routes::start))
        .route("/api/sessions/:id/stop", post(routes::stop))
        .route("/api/sessions/:id/pause", post(routes::pause))
        .route("/api/sessions/:id/resume", post(routes::resume))
        .route("/api/sessions/:id/reset", post(routes::reset))
        .route("/api/sessions/:id/confirm/:item_id", post(routes::confirm))
        .route("/api/sessions/:id/strategy", put(routes::set_strategy))
        .route("/api/sessions/:id/mode", put(routes::set_mode))
        .route("/api/sessions/:id/threshold", put(routes::set_threshold))
        .route("/api/sessions/:id/budget", put(routes::set_budget))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
