use std::sync::Arc;
use std::time::Duration;

use spiderd_engine::{DockerDriver, EngineConfig, ExecutionDriver};
use spiderd_worker::config::WorkerConfig;
use spiderd_worker::handler::CommandHandler;
use spiderd_worker::pool::{PoolConfig, WorkerPool};
use spiderd_worker::queue::PgCommandQueue;
use spiderd_worker::reconciler::{EventReconciler, ReconcilerSupervisor, ResubscribePolicy};
use spiderd_worker::store::{JobStore, PgJobStore};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spiderd_worker=debug,spiderd_engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = WorkerConfig::from_env();
    let engine_config = EngineConfig::from_env().expect("Invalid engine configuration");
    tracing::info!(
        concurrency = config.concurrency,
        max_attempts = config.max_attempts,
        reconciler = config.reconciler_enabled,
        "Loaded worker configuration",
    );

    // --- Database ---
    let pool = spiderd_db::create_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    spiderd_db::health_check(&pool)
        .await
        .expect("Database health check failed");

    spiderd_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Engine ---
    let stop_grace = engine_config.stop_grace;
    let driver = DockerDriver::connect(engine_config).expect("Failed to configure engine client");
    if let Err(e) = driver.ping().await {
        tracing::warn!(error = %e, "Engine not reachable at startup, commands will retry");
    }
    let driver: Arc<dyn ExecutionDriver> = Arc::new(driver);

    // --- Components ---
    let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool.clone()));
    let queue = Arc::new(PgCommandQueue::new(pool));
    let handler = CommandHandler::new(Arc::clone(&store), Arc::clone(&driver), stop_grace);
    let worker_pool = Arc::new(WorkerPool::new(queue, handler, PoolConfig::from(&config)));

    let cancel = CancellationToken::new();
    let pool_handle = tokio::spawn(worker_pool.run(cancel.clone()));

    let supervisor = config.reconciler_enabled.then(|| {
        let reconciler = EventReconciler::new(Arc::clone(&store), Arc::clone(&driver));
        ReconcilerSupervisor::start(reconciler, ResubscribePolicy::default())
    });
    tracing::info!("Worker started");

    shutdown_signal().await;

    // --- Shutdown ---
    if let Some(supervisor) = supervisor {
        supervisor.shutdown().await;
    }

    cancel.cancel();
    if tokio::time::timeout(Duration::from_secs(35), pool_handle)
        .await
        .is_err()
    {
        tracing::warn!("Worker pool did not stop in time");
    }
    tracing::info!("Graceful shutdown complete");
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), shutting down");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}
