use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use parterre_api::{app, AppState};
use parterre_engine::{BookingFinalizer, ExpirationSweeper, LockConfig, LockManager, ReservationEngine};
use parterre_queue::{
    run_notification_bridge, NotificationHub, NotificationPublisher, PriorityQueue, QueueService, StatusStore,
    WorkerManager,
};
use parterre_store::{DbClient, RedisClient, Settings};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parterre=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(2);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("failed to start runtime: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(settings)) {
        tracing::error!("fatal startup error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(settings: Settings) -> anyhow::Result<()> {
    let settings = Arc::new(settings);
    info!("starting parterre on port {}", settings.server_port);

    let db = DbClient::connect(&settings.database_url(), settings.db_max_connections)
        .await
        .context("failed to connect to database")?;
    db.migrate().await.context("failed to run migrations")?;

    let redis = Arc::new(
        RedisClient::connect(&settings.redis_url())
            .await
            .context("failed to connect to the lock/queue store")?,
    );

    let locks = LockManager::new(
        redis.clone(),
        LockConfig {
            ttl_seconds: settings.lock_timeout_seconds,
            retry_delay: Duration::from_millis(settings.lock_retry_delay_ms),
            max_wait: Duration::from_millis(settings.lock_max_wait_ms),
        },
    );

    let engine = ReservationEngine::new(
        db.clone(),
        locks.clone(),
        settings.reservation_timeout_seconds,
        settings.max_seats_per_booking,
    );
    let finalizer = BookingFinalizer::new(db.clone(), locks.clone());

    let queue = PriorityQueue::new(redis.clone());
    let status = StatusStore::new(redis.clone(), settings.request_status_ttl);
    let publisher = NotificationPublisher::new(redis.clone());
    let workers = WorkerManager::new(
        queue.clone(),
        status.clone(),
        publisher.clone(),
        engine.clone(),
        settings.pel_reclaim_idle_ms,
        settings.max_deliveries,
    );
    let queue_service = QueueService::new(
        queue,
        status,
        publisher,
        workers,
        redis.clone(),
        settings.max_seats_per_booking,
    );

    let hub = NotificationHub::new();
    tokio::spawn(run_notification_bridge(redis.clone(), hub.clone()));

    let sweeper = ExpirationSweeper::new(
        db.clone(),
        locks.clone(),
        settings.sweeper_interval_seconds,
        settings.sweeper_batch_size,
    );
    tokio::spawn(sweeper.run());

    let state = AppState {
        db,
        engine,
        finalizer,
        queue: queue_service.clone(),
        hub,
        settings: settings.clone(),
    };
    let app = app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    queue_service.shutdown_workers();
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to install shutdown handler: {e}");
    }
    info!("shutdown signal received");
}
