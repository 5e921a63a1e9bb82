//! Axum HTTP backend.
//!
//! ```text
//! POST /analyze/log   AnalyzeRequest -> AnalysisReport
//! GET  /api/health    provider / strategy / retrieval summary
//! ```
//!
//! `run()` drives the axum event loop; the caller's [`CancellationToken`] is
//! wired to axum's graceful shutdown.

mod api;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::AppError;
use crate::troubleshoot::Troubleshooter;

// ── Shared request state ──────────────────────────────────────────────────────

/// Router state injected into every handler via [`axum::extract::State`].
///
/// Cheap to clone; the pipeline is reference-counted.
#[derive(Clone)]
pub struct AppState {
    pub troubleshooter: Arc<Troubleshooter>,
    /// Upper bound on one analysis, all model calls included.
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(troubleshooter: Troubleshooter, request_timeout: Duration) -> Self {
        Self { troubleshooter: Arc::new(troubleshooter), request_timeout }
    }
}

// ── Server loop ───────────────────────────────────────────────────────────────

pub async fn run(bind_addr: &str, state: AppState, shutdown: CancellationToken) -> Result<(), AppError> {
    let router = build_router(state);

    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| AppError::Server(format!("bind failed on {bind_addr}: {e}")))?;

    info!(%bind_addr, "http backend listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| AppError::Server(format!("axum server error: {e}")))?;

    info!("http backend shut down");
    Ok(())
}

// ── Router ────────────────────────────────────────────────────────────────────

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/analyze/log", post(api::analyze_log))
        .route("/api/health",  get(api::health))
        .with_state(state)
}
