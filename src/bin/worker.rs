use std::sync::Arc;

use taskflow::config::AppConfig;
use taskflow::db;
use taskflow::services::queue::JobQueue;
use taskflow::services::reaper::Reaper;
use taskflow::shutdown;
use taskflow::worker::registry::HandlerRegistry;
use taskflow::worker::supervisor::Supervisor;

#[tokio::main]
async fn main() {
    let config = AppConfig::from_env().expect("Failed to load configuration");
    config.init_tracing();

    tracing::info!(
        worker_count = config.worker_count,
        redis_addr = %config.redis_addr,
        "Starting TaskFlow worker supervisor"
    );

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

    let registry = Arc::new(HandlerRegistry::with_default_handlers());

    let token = shutdown::install_shutdown_handler();

    // Recovery task: delayed-retry admission, stale-lease rescue, reconcile.
    let reaper = Reaper::new(queue.clone(), db_pool.clone());
    let reaper_handle = tokio::spawn(reaper.run(token.clone()));

    let supervisor = Supervisor::new(
        queue,
        db_pool,
        registry,
        config.worker_count,
        config.poll_interval(),
        config.shutdown_timeout(),
    );

    let drained = supervisor.run(token).await;
    reaper_handle.abort();

    if drained {
        tracing::info!("Worker supervisor shutdown complete");
    } else {
        tracing::warn!("Worker supervisor exited with undrained workers");
    }
}
