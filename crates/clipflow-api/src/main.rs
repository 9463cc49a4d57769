//! Clipflow service binary
//!
//! Wires the ingest core together: Postgres-backed stores and bus, local
//! blob storage, the optional Redis chunk index, the worker pool, the GC
//! sweeper, and the HTTP surface. On shutdown the workers drain their
//! in-flight messages before storage and database connections close.

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use clipflow_bus::{ensure_bus_schema, PgWorkBus, WorkBus};
use clipflow_core::{queues, AssembleFile, CommitChunk, Config, ProcessVideo};
use clipflow_db::{ensure_schema, PgSessionStore, PgVideoStore, SessionStore, VideoStore};
use clipflow_index::{ChunkIndex, RedisChunkIndex};
use clipflow_pipeline::{
    AssemblyWorker, ChunkIntake, CommitChunkWorker, GcSweeper, PostProcessWorker, RunnerConfig,
    SessionManager, WorkerPool,
};
use clipflow_processing::{FFmpegProbe, MediaProbe};
use clipflow_storage::{BlobStore, LocalStorage};

use clipflow_api::middleware::ChunkRateLimiter;
use clipflow_api::{router, telemetry, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_telemetry();

    let config = Config::from_env()?;
    config.validate()?;

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    ensure_schema(&pool).await.context("Failed to apply schema")?;
    ensure_bus_schema(&pool).await.context("Failed to apply bus schema")?;

    let storage: Arc<dyn BlobStore> = Arc::new(
        LocalStorage::new(&config.storage_path)
            .await
            .context("Failed to initialize blob storage")?,
    );
    let sessions: Arc<dyn SessionStore> = Arc::new(PgSessionStore::new(pool.clone()));
    let videos: Arc<dyn VideoStore> = Arc::new(PgVideoStore::new(pool.clone()));
    let pg_bus = PgWorkBus::new(pool.clone());
    let bus: Arc<dyn WorkBus> = Arc::new(pg_bus.clone());

    let index: Option<Arc<dyn ChunkIndex>> = match &config.redis_url {
        Some(url) => match RedisChunkIndex::connect(url).await {
            Ok(index) => Some(Arc::new(index)),
            Err(err) => {
                // The session manager is correct without the accelerator.
                tracing::warn!(error = %err, "Chunk index unavailable, continuing without it");
                None
            }
        },
        None => None,
    };

    let manager = Arc::new(SessionManager::new(
        sessions,
        storage.clone(),
        index,
        config.session_ttl_hours,
    ));
    let intake = Arc::new(ChunkIntake::new(
        manager.clone(),
        storage.clone(),
        bus.clone(),
        config.max_chunk_part_bytes,
    ));
    let probe: Arc<dyn MediaProbe> = Arc::new(
        FFmpegProbe::new(config.ffprobe_path.clone(), config.ffmpeg_path.clone())
            .context("Failed to initialize media probe")?,
    );

    // Queue consumers, one per pipeline, plus the DLQ monitors.
    let poll_interval = Duration::from_millis(config.bus_poll_interval_ms);
    let mut workers = WorkerPool::new();
    workers.spawn_consumer::<CommitChunk, _>(
        bus.clone(),
        Arc::new(CommitChunkWorker::new(
            manager.clone(),
            storage.clone(),
            bus.clone(),
        )),
        RunnerConfig::new(config.chunk_prefetch, config.max_job_retries, poll_interval),
    );
    workers.spawn_consumer::<AssembleFile, _>(
        bus.clone(),
        Arc::new(AssemblyWorker::new(
            manager.clone(),
            storage.clone(),
            videos.clone(),
            bus.clone(),
        )),
        RunnerConfig::new(config.assembly_prefetch, config.max_job_retries, poll_interval),
    );
    workers.spawn_consumer::<ProcessVideo, _>(
        bus.clone(),
        Arc::new(PostProcessWorker::new(
            videos.clone(),
            storage.clone(),
            probe,
            Duration::from_secs(config.probe_timeout_secs),
        )),
        RunnerConfig::new(config.process_prefetch, config.max_job_retries, poll_interval),
    );
    for queue in [queues::CHUNK, queues::ASSEMBLY, queues::PROCESS] {
        workers.spawn_dlq_monitor(bus.clone(), queue, poll_interval);
    }

    let (background_shutdown_tx, background_shutdown_rx) = watch::channel(false);
    let gc_handle = GcSweeper::new(manager.clone(), storage.clone()).spawn(
        Duration::from_secs(config.gc_interval_secs),
        background_shutdown_rx.clone(),
    );
    let requeue_handle = spawn_stale_job_reaper(pg_bus, background_shutdown_rx.clone());

    let state = Arc::new(AppState {
        rate_limiter: Arc::new(ChunkRateLimiter::new(
            config.chunk_rate_limit_per_minute,
            Duration::from_secs(config.rate_limit_window_secs),
        )),
        manager,
        intake,
        storage,
        videos,
        config: config.clone(),
    });
    let limiter_handle =
        spawn_rate_limit_cleanup(state.rate_limiter.clone(), background_shutdown_rx);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.server_port))
        .await
        .context("Failed to bind server port")?;
    tracing::info!(port = config.server_port, "Clipflow ingest core listening");

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    // Drain in-flight work before closing connections.
    tracing::info!("Shutting down");
    let _ = background_shutdown_tx.send(true);
    workers.shutdown().await;
    let _ = gc_handle.await;
    let _ = requeue_handle.await;
    let _ = limiter_handle.await;
    pool.close().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Periodically drop expired rate-limit buckets so idle client entries do
/// not accumulate between capacity-triggered evictions.
fn spawn_rate_limit_cleanup(
    limiter: Arc<ChunkRateLimiter>,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    limiter.cleanup_expired_buckets().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

/// Return jobs stuck in `running` (a crashed worker's claims) to their
/// queues so another process picks them up.
fn spawn_stale_job_reaper(
    bus: PgWorkBus,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = bus.requeue_stale(Duration::from_secs(3600)).await {
                        tracing::error!(error = %err, "Stale job requeue failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
