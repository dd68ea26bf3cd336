use std::sync::Arc;

use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use tower_http::compression::CompressionLayer;
use tracing_subscriber::EnvFilter;

use image_job_processor::app_state::AppState;
use image_job_processor::config::AppConfig;
use image_job_processor::routes;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!(
        output_base_dir = %config.output_base_dir.display(),
        "Initializing image-job-processor"
    );

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!("image_jobs_total", "Total jobs started");
    metrics::describe_counter!("image_jobs_succeeded", "Jobs whose every command succeeded");
    metrics::describe_counter!("image_jobs_failed", "Jobs that failed as a whole");
    metrics::describe_counter!("image_commands_failed", "Individual commands that failed");
    metrics::describe_histogram!(
        "image_job_duration_seconds",
        "Time from job creation to its aggregate outcome"
    );

    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(config);

    let app = routes::router(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(CompressionLayer::new());

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
