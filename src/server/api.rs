//! Axum handlers.
//!
//! Each handler receives [`AppState`] via [`axum::extract::State`] and
//! returns an axum [`Response`]. Errors use a `{ "error", "message" }` body.

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::warn;

use super::AppState;
use crate::llm::ProviderError;
use crate::request::AnalyzeRequest;
use crate::troubleshoot::AnalyzeError;

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Build a JSON error response body.
fn json_error(code: &str, msg: impl std::fmt::Display) -> Json<serde_json::Value> {
    Json(json!({ "error": code, "message": format!("{msg}") }))
}

fn error_response(e: &AnalyzeError) -> Response {
    match e {
        AnalyzeError::InvalidRequest(e) => {
            (StatusCode::BAD_REQUEST, json_error("invalid_request", e)).into_response()
        }
        AnalyzeError::Provider(ProviderError::Timeout(msg)) => {
            (StatusCode::GATEWAY_TIMEOUT, json_error("timeout", msg)).into_response()
        }
        AnalyzeError::Provider(e) => {
            (StatusCode::BAD_GATEWAY, json_error("provider_error", e)).into_response()
        }
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// GET /api/health
pub(super) async fn health(State(state): State<AppState>) -> Response {
    let ts = &state.troubleshooter;
    let body = json!({
        "status": "ok",
        "provider": ts.provider().name(),
        "model": ts.provider().model(),
        "strategy": ts.strategy(),
        "rag": ts.retriever().map_or("none", |r| r.name()),
    });
    (StatusCode::OK, Json(body)).into_response()
}

/// POST /analyze/log
pub(super) async fn analyze_log(
    State(state): State<AppState>,
    body: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Response {
    let req = match body {
        Ok(Json(req)) => req,
        Err(rejection) => {
            let status = match &rejection {
                JsonRejection::JsonDataError(_) | JsonRejection::JsonSyntaxError(_) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                other => other.status(),
            };
            return (status, json_error("invalid_body", rejection.body_text())).into_response();
        }
    };

    match tokio::time::timeout(state.request_timeout, state.troubleshooter.analyze(req)).await {
        Ok(Ok(report)) => (StatusCode::OK, Json(report)).into_response(),
        Ok(Err(e)) => {
            warn!("analysis failed: {e}");
            error_response(&e)
        }
        Err(_) => {
            warn!(timeout = ?state.request_timeout, "analysis timed out");
            (
                StatusCode::GATEWAY_TIMEOUT,
                json_error("timeout", "analysis timed out"),
            )
                .into_response()
        }
    }
}
