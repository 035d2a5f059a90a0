//! HTTP API: axum server exposing the game to clients.
//!
//! Serves a JSON REST API over the `Game` facade.
//! CORS enabled for local development.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, Method},
    routing::{get, post},
    Router,
};
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

pub use routes::AppState;

/// Bind the API port and serve in a background task.
///
/// Binding happens before this returns, so a taken port is reported to the
/// caller instead of failing silently inside the task.
pub async fn spawn_api(state: AppState, port: u16) -> Result<JoinHandle<()>> {
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind API port {port}"))?;
    info!(port, "API server listening on http://localhost:{port}");

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server stopped");
        }
    }))
}

/// Build the axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(routes::health))
        .route("/api/round", get(routes::get_round))
        .route("/api/results", get(routes::get_results))
        .route("/api/bets", post(routes::place_bet))
        .route("/api/accounts", post(routes::open_account))
        .route("/api/accounts/:user_id/balance", get(routes::get_balance))
        .route("/api/accounts/:user_id/transactions", get(routes::get_transactions))
        .route("/api/accounts/:user_id/summary", get(routes::get_summary))
        .route("/api/accounts/:user_id/bets", get(routes::get_user_bets))
        .route("/api/accounts/:user_id/deposits", post(routes::deposit))
        .route("/api/accounts/:user_id/withdrawals", post(routes::withdraw))
        .route(
            "/api/accounts/:user_id/withdrawals/:tx_id",
            post(routes::resolve_withdrawal),
        )
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
