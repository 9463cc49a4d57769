//! Clipflow Pipeline Library
//!
//! The ingest pipeline proper: the upload-session state machine, the chunk
//! intake path, the queue consumers with bounded retry and dead-letter
//! routing, and the expired-session sweeper. All collaborators (blob store,
//! session/video stores, chunk index, work bus, media probe) arrive as
//! trait objects so the whole pipeline runs against in-memory fakes in
//! tests.

pub mod gc;
pub mod intake;
pub mod runner;
pub mod session;
pub mod workers;

pub use gc::GcSweeper;
pub use intake::ChunkIntake;
pub use runner::{JobHandler, RunnerConfig, WorkerPool};
pub use session::SessionManager;
pub use workers::{AssemblyWorker, CommitChunkWorker, PostProcessWorker};
