//! Actor-based concurrency primitives
//!
//! Components communicate via message passing instead of sharing the store
//! and embedder behind locks.
//!
//! # Architecture
//!
//! - The [`IndexingWorker`] runs as a long-lived task with its own event loop
//!   and owns the store, indexer, searcher and coordinator
//! - Producers feed it through an unbounded `mpsc` work queue
//! - Callers talk to it through a cloneable [`WorkerHandle`]; requests carry
//!   a `oneshot` reply channel
//!
//! # Tasks
//!
//! - [`IndexingWorker`]: control loop; batches queued work into the indexer,
//!   answers searches and runs housekeeping
//! - [`Coordinator`]: primary/reader role, with a heartbeat task while primary
//! - `WatcherTask`: one per vault, turns filesystem events into work items
//!
//! ```text
//! WatcherTask ─┐                    ┌─▶ Indexer ──▶ VectorStore
//!              ├─▶ IndexingWorker ──┤
//! WorkerHandle ┘         │          └─▶ Searcher
//!                   Coordinator ──▶ heartbeat
//! ```

pub mod coordinator;
pub mod handle;
pub mod message;
mod watcher;
pub mod worker;

#[cfg(test)]
mod __tests__;

pub use coordinator::{Coordinator, HEARTBEAT_INTERVAL, STALE_THRESHOLD};
pub use handle::{WorkerError, WorkerHandle};
pub use message::{WorkItem, WorkerStats};
pub use watcher::WatcherError;
pub use worker::{IndexingWorker, WorkerConfig};
