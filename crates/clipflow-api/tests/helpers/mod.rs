//! Shared test harness: the full ingest core wired against in-memory
//! backends, with the worker pool running, behind an axum-test server.

use async_trait::async_trait;
use axum_test::multipart::{MultipartForm, Part};
use axum_test::TestServer;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use clipflow_api::middleware::ChunkRateLimiter;
use clipflow_api::{router, AppState};
use clipflow_bus::{MemoryBus, WorkBus};
use clipflow_core::{queues, AssembleFile, CommitChunk, Config, ProcessVideo};
use clipflow_db::{MemorySessionStore, MemoryVideoStore, VideoStore};
use clipflow_index::MemoryChunkIndex;
use clipflow_pipeline::{
    AssemblyWorker, ChunkIntake, CommitChunkWorker, PostProcessWorker, RunnerConfig,
    SessionManager, WorkerPool,
};
use clipflow_processing::{MediaInfo, MediaProbe};
use clipflow_storage::{BlobStore, MemoryStorage};

/// Probe fake that reports fixed metadata and writes a marker JPEG.
pub struct FakeProbe;

#[async_trait]
impl MediaProbe for FakeProbe {
    async fn probe(&self, _path: &Path) -> anyhow::Result<MediaInfo> {
        Ok(MediaInfo {
            duration_s: 60.0,
            width: 1920,
            height: 1080,
            codec: "h264".into(),
            bitrate: Some(5_000_000),
        })
    }

    async fn thumbnail(
        &self,
        _path: &Path,
        _seek_secs: f64,
        out: &Path,
        _width: u32,
        _height: u32,
    ) -> anyhow::Result<()> {
        tokio::fs::write(out, b"\xff\xd8\xff\xe0jpeg").await?;
        Ok(())
    }
}

pub struct TestApp {
    pub server: TestServer,
    pub storage: Arc<MemoryStorage>,
    pub videos: Arc<MemoryVideoStore>,
    pub bus: Arc<MemoryBus>,
    pub manager: Arc<SessionManager>,
    workers: Option<WorkerPool>,
}

impl TestApp {
    pub async fn shutdown(mut self) {
        if let Some(workers) = self.workers.take() {
            workers.shutdown().await;
        }
    }
}

pub async fn setup_test_app() -> TestApp {
    setup_test_app_with_rate_limit(200).await
}

pub async fn setup_test_app_with_rate_limit(chunk_limit: u32) -> TestApp {
    let config = Config::for_tests();
    let storage = Arc::new(MemoryStorage::new());
    let videos = Arc::new(MemoryVideoStore::new());
    let bus = Arc::new(MemoryBus::new());
    let bus_dyn: Arc<dyn WorkBus> = bus.clone();

    let manager = Arc::new(SessionManager::new(
        Arc::new(MemorySessionStore::new()),
        storage.clone(),
        Some(Arc::new(MemoryChunkIndex::new())),
        config.session_ttl_hours,
    ));
    let intake = Arc::new(ChunkIntake::new(
        manager.clone(),
        storage.clone(),
        bus_dyn.clone(),
        config.max_chunk_part_bytes,
    ));

    let runner = RunnerConfig::new(4, config.max_job_retries, Duration::from_millis(10));
    let mut workers = WorkerPool::new();
    workers.spawn_consumer::<CommitChunk, _>(
        bus_dyn.clone(),
        Arc::new(CommitChunkWorker::new(
            manager.clone(),
            storage.clone(),
            bus_dyn.clone(),
        )),
        runner.clone(),
    );
    workers.spawn_consumer::<AssembleFile, _>(
        bus_dyn.clone(),
        Arc::new(AssemblyWorker::new(
            manager.clone(),
            storage.clone(),
            videos.clone(),
            bus_dyn.clone(),
        )),
        runner.clone(),
    );
    workers.spawn_consumer::<ProcessVideo, _>(
        bus_dyn.clone(),
        Arc::new(PostProcessWorker::new(
            videos.clone(),
            storage.clone(),
            Arc::new(FakeProbe),
            Duration::from_secs(60),
        )),
        runner.clone(),
    );
    for queue in [queues::CHUNK, queues::ASSEMBLY, queues::PROCESS] {
        workers.spawn_dlq_monitor(bus_dyn.clone(), queue, Duration::from_millis(10));
    }

    let state = Arc::new(AppState {
        rate_limiter: Arc::new(ChunkRateLimiter::new(chunk_limit, Duration::from_secs(60))),
        manager: manager.clone(),
        intake,
        storage: storage.clone() as Arc<dyn BlobStore>,
        videos: videos.clone() as Arc<dyn VideoStore>,
        config,
    });

    let server = TestServer::new(router(state)).expect("failed to build test server");
    TestApp {
        server,
        storage,
        videos,
        bus,
        manager,
        workers: Some(workers),
    }
}

/// A caller identity header value.
pub fn new_owner() -> String {
    Uuid::new_v4().to_string()
}

/// Multipart form for one chunk POST.
pub fn chunk_form(session_id: &str, index: u32, data: Vec<u8>) -> MultipartForm {
    MultipartForm::new()
        .add_text("sessionId", session_id.to_string())
        .add_text("chunkIndex", index.to_string())
        .add_part(
            "chunk",
            Part::bytes(data)
                .file_name("blob.bin")
                .mime_type("application/octet-stream"),
        )
}

/// Poll until the session has been consumed by assembly (deleted) or the
/// timeout elapses.
pub async fn wait_for_assembly(app: &TestApp, session_id: Uuid) {
    for _ in 0..300 {
        if app.manager.get(session_id).await.unwrap().is_none() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("assembly did not finish for session {}", session_id);
}

/// Poll until the video row reaches a terminal processing outcome.
pub async fn wait_for_video_ready(app: &TestApp, video_id: Uuid) -> clipflow_core::Video {
    for _ in 0..300 {
        if let Some(video) = app.videos.get_video(video_id).await.unwrap() {
            if video.state == clipflow_core::VideoState::Ready {
                return video;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("video {} never became ready", video_id);
}
