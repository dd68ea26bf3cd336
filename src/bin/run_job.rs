//! Run one job from a JSON description without the HTTP gateway.
//!
//! Usage: `run-job <job.json> [output-dir]`
//!
//! The job file uses the same shape as `POST /job`. Without an explicit
//! output directory the job lands under `OUTPUT_BASE_DIR` like a gateway job.

use std::path::PathBuf;
use std::process::ExitCode;

use image_job_processor::config::AppConfig;
use image_job_processor::models::job::{JobOptions, JobRequest};
use image_job_processor::services::operation::JobOperation;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    match run().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!(error = %e, "Job could not be started");
            ExitCode::from(2)
        }
    }
}

/// Returns whether the job succeeded.
async fn run() -> Result<bool, Box<dyn std::error::Error>> {
    let mut args = std::env::args_os().skip(1);
    let job_file = args
        .next()
        .map(PathBuf::from)
        .ok_or("usage: run-job <job.json> [output-dir]")?;

    let request: JobRequest = serde_json::from_slice(&tokio::fs::read(&job_file).await?)?;
    if request.commands.is_empty() {
        return Err("empty job. no commands".into());
    }

    let output_dir = match args.next() {
        Some(dir) => PathBuf::from(dir),
        None => AppConfig::from_env()?.job_output_dir(Uuid::new_v4()),
    };

    let operation = JobOperation::create(
        request.source_path,
        &output_dir,
        JobOptions {
            transform: request.transform,
            commands: request.commands,
        },
    )?;
    let outcome = operation.complete().await;

    println!("{}", serde_json::to_string_pretty(&serde_json::json!({
        "source": operation.source_path(),
        "outputDir": output_dir,
        "log": operation.progress_path(),
        "succeeded": outcome.succeeded,
        "reason": outcome.reason,
    }))?);

    Ok(outcome.succeeded)
}
