//! Message types for the indexing worker
//!
//! Two channels feed the worker's control loop:
//! - the work queue (unbounded, many producers): [`WorkItem`]s from explicit
//!   enqueues, startup enumeration and filesystem watchers
//! - the request channel (bounded): [`WorkerRequest`]s with oneshot replies

use std::collections::BTreeMap;

use serde::Serialize;
use tokio::sync::oneshot;

use super::handle::WorkerError;
pub use crate::service::indexer::IndexRequest;
use crate::{
  domain::config::Role,
  service::{indexer::IngestStats, searcher::SearchResult},
};

/// One unit of queued index work
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem {
  /// (Re)index a note, addressed by absolute path
  Index(IndexRequest),
  /// Drop a note from the index, addressed by vault-relative path
  Remove { vault: String, path: String },
}

/// Requests answered by the control loop
#[derive(Debug)]
pub enum WorkerRequest {
  Search {
    query: String,
    limit: usize,
    reply: oneshot::Sender<Result<Vec<SearchResult>, WorkerError>>,
  },
  Stats {
    reply: oneshot::Sender<Result<WorkerStats, WorkerError>>,
  },
  /// Delete index entries whose files are gone, in every vault
  CleanupStale {
    reply: oneshot::Sender<Result<usize, WorkerError>>,
  },
  /// Process everything currently queued, then reply
  Flush {
    reply: oneshot::Sender<IngestStats>,
  },
  /// Stop watchers and heartbeat, release the lock, then reply
  Shutdown {
    reply: oneshot::Sender<()>,
  },
}

/// Snapshot of the worker's state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerStats {
  pub instance_id: String,
  pub role: Role,
  pub is_primary: bool,
  pub num_notes: usize,
  /// Newest indexed modification time per vault (seconds since the Unix epoch)
  pub last_modified: BTreeMap<String, Option<f64>>,
  /// Work items waiting in the queue
  pub pending: usize,
  /// Totals since the worker started
  pub totals: IngestStats,
}
