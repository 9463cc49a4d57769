//! Clipflow API Library
//!
//! The HTTP surface of the ingest core: upload session endpoints, the
//! multipart chunk intake, and the byte-range streaming reader, together
//! with the state wiring and middleware the binary composes at boot.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod telemetry;

pub use routes::router;
pub use state::AppState;
