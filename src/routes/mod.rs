use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;
use crate::services::operation::OperationError;

pub mod health;
pub mod job;
pub mod metrics;

/// Job gateway routes with tracing and the request body limit applied.
pub fn router(state: AppState) -> Router {
    let body_limit = state.config.max_body_bytes;
    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/health", get(health::health_check))
        .route("/job", post(job::create_job))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(body_limit))
}

/// Request errors reported before a job starts running.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("invalid commands")]
    InvalidCommands(Vec<String>),

    #[error(transparent)]
    Operation(#[from] OperationError),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    details: Vec<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match self {
            ApiError::InvalidCommands(details) => ErrorBody {
                error: "invalid commands".to_string(),
                details,
            },
            other => ErrorBody {
                error: other.to_string(),
                details: Vec::new(),
            },
        };
        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    }
}
