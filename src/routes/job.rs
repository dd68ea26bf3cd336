use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::job::{JobOptions, JobRequest, JobResponse};
use crate::routes::ApiError;
use crate::services::operation::JobOperation;

/// POST /job: run every command of a job and report the aggregate result.
///
/// Responds once the job has finished: 200 when every output was written,
/// 500 when any command (or loading the source) failed.
pub async fn create_job(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<JobResponse>), ApiError> {
    let request: JobRequest = serde_json::from_slice(&body).map_err(|e| {
        tracing::info!(error = %e, "Rejecting unparseable job");
        ApiError::BadRequest(format!("Failed to parse job: {e}"))
    })?;
    let JobRequest {
        source_path,
        commands,
        transform,
    } = request;

    if commands.is_empty() {
        return Err(ApiError::BadRequest("empty job. no commands".to_string()));
    }
    let problems: Vec<String> = commands
        .iter()
        .filter_map(|c| {
            c.validate()
                .err()
                .map(|report| format!("{}: {}", c.target_filename, report))
        })
        .collect();
    if !problems.is_empty() {
        return Err(ApiError::InvalidCommands(problems));
    }

    let job_id = Uuid::new_v4();
    let output_dir = state.config.job_output_dir(job_id);
    let operation = JobOperation::create_with_adapter(
        source_path,
        &output_dir,
        JobOptions { transform, commands },
        Arc::clone(&state.transformer),
    )?;
    tracing::info!(
        job_id = %job_id,
        operation_id = %operation.id(),
        commands = operation.commands().len(),
        "Created job operation"
    );

    let outcome = operation.complete().await;
    let status = if outcome.succeeded {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };

    Ok((
        status,
        Json(JobResponse {
            uuid: job_id,
            output_dir,
            log: operation.progress_path().to_path_buf(),
            succeeded: outcome.succeeded,
            reason: outcome.reason,
        }),
    ))
}
