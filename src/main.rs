use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, Method};
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use taskflow::app_state::AppState;
use taskflow::config::AppConfig;
use taskflow::db;
use taskflow::routes::{health, jobs, metrics as metrics_route, stats};
use taskflow::services::queue::JobQueue;
use taskflow::shutdown;

/// Bounded wait for in-flight requests once shutdown is signalled.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    let config = AppConfig::from_env().expect("Failed to load configuration");
    config.init_tracing();

    tracing::info!(
        server_addr = %config.server_addr,
        redis_addr = %config.redis_addr,
        "Starting TaskFlow API server"
    );

    // Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!(
        "taskflow_jobs_submitted_total",
        "Total jobs accepted by the API"
    );
    metrics::describe_counter!(
        "taskflow_jobs_total",
        "Total jobs processed by type and status"
    );
    metrics::describe_counter!("taskflow_job_retries_total", "Total job retries");
    metrics::describe_histogram!(
        "taskflow_job_processing_duration_seconds",
        "Time spent processing jobs"
    );
    metrics::describe_gauge!("taskflow_jobs_in_queue", "Jobs currently pending");
    metrics::describe_gauge!("taskflow_jobs_processing", "Jobs currently leased");
    metrics::describe_gauge!("taskflow_workers_active", "Active workers");

    // Redis job broker
    tracing::info!("Connecting to Redis");
    let queue = Arc::new(
        JobQueue::new(&config.redis_addr, &config.redis_password, config.redis_db)
            .expect("Failed to initialize job queue"),
    );
    queue.ping().await.expect("Failed to connect to Redis");

    // PostgreSQL store
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    let state = AppState::new(db_pool, queue);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let app = Router::new()
        .route("/api/v1/jobs", post(jobs::create_job).get(jobs::list_jobs))
        .route("/api/v1/jobs/:id", get(jobs::get_job))
        .route("/api/v1/jobs/:id/cancel", post(jobs::cancel_job))
        .route("/api/v1/stats", get(stats::get_stats))
        .route("/api/v1/workers", get(stats::get_workers))
        .route("/api/v1/health", get(health::health_check))
        .with_state(state)
        .route(
            "/metrics",
            get(metrics_route::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(1024 * 1024)); // 1 MB request bodies

    let bind_addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!(addr = %bind_addr, "TaskFlow API server listening");

    let token = shutdown::install_shutdown_handler();
    let drain_token = token.clone();

    tokio::select! {
        result = axum::serve(listener, app).with_graceful_shutdown(async move {
            token.cancelled().await;
        }) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "server error");
            }
        }
        _ = async {
            drain_token.cancelled().await;
            tokio::time::sleep(DRAIN_TIMEOUT).await;
        } => {
            tracing::warn!(timeout_secs = DRAIN_TIMEOUT.as_secs(), "drain timeout exceeded, forcing exit");
        }
    }

    tracing::info!("Server shutdown complete");
}
