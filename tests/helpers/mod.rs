//! Shared helpers for integration tests

use std::path::Path;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use image_job_processor::models::progress::{ProgressEntry, ProgressStatus};
use image_job_processor::services::progress_log;
use tower::ServiceExt;

/// Parse every entry of a job's progress log.
pub async fn read_progress(path: &Path) -> Vec<ProgressEntry> {
    progress_log::read_entries(path)
        .await
        .unwrap_or_else(|e| panic!("failed to read progress log {}: {e}", path.display()))
}

/// Number of entries with `status`.
pub fn count_status(entries: &[ProgressEntry], status: ProgressStatus) -> usize {
    entries.iter().filter(|e| e.status == status).count()
}

/// Statuses logged for one command, in log order.
pub fn statuses_for(entries: &[ProgressEntry], command_id: &str) -> Vec<ProgressStatus> {
    entries
        .iter()
        .filter(|e| e.command_id.as_ref().map(|id| id.as_str()) == Some(command_id))
        .map(|e| e.status)
        .collect()
}

/// Dimensions of an image file on disk.
pub fn dimensions_of(path: &Path) -> (u32, u32) {
    image::image_dimensions(path)
        .unwrap_or_else(|e| panic!("failed to read dimensions of {}: {e}", path.display()))
}

pub async fn post_json(app: Router, uri: &str, body: String) -> Response {
    app.oneshot(
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap(),
    )
    .await
    .unwrap()
}

pub async fn get(app: Router, uri: &str) -> Response {
    app.oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn assert_status(response: &Response, expected: StatusCode) {
    assert_eq!(
        response.status(),
        expected,
        "unexpected status for response {:?}",
        response
    );
}
