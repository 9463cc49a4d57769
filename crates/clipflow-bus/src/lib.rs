//! Clipflow Bus Library
//!
//! Durable work queues addressed by name, with priority ordering. Each
//! pipeline owns a `{main, retry, dlq}` triple of queue names. The bus
//! itself is only transport: retry accounting travels inside the message
//! envelope and dead-letter routing is the consumer's decision.
//!
//! Ordering within a queue is priority-then-FIFO but not guaranteed under
//! concurrent consumers; pipeline correctness never depends on it.

pub mod memory;
pub mod postgres;
pub mod traits;

// Re-export commonly used types
pub use memory::MemoryBus;
pub use postgres::{ensure_bus_schema, PgWorkBus};
pub use traits::{Delivery, WorkBus};
