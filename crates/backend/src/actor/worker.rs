//! IndexingWorker - the control loop that owns the work queue
//!
//! The worker owns the store, indexer, searcher and coordinator. Everything
//! that touches them goes through its `select!` loop, so a search never runs
//! concurrently with a batch write from the same process.
//!
//! ```text
//! watchers ─┐
//! handle   ─┼─▶ queue (WorkItem) ─▶ batch ─▶ Indexer ─▶ VectorStore
//! startup  ─┘
//! handle ─▶ requests (WorkerRequest) ─▶ Searcher / stats / flush / shutdown
//! ```
//!
//! Only the primary writes. A batch arriving while this instance is a reader
//! first tries to claim a stale lock; if that fails the batch is dropped, since
//! the live primary is watching the same files.

use std::{collections::BTreeMap, path::PathBuf, sync::Arc, time::Duration};

use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
  coordinator::{Coordinator, CoordinatorTiming},
  handle::{WorkerError, WorkerHandle},
  message::{IndexRequest, WorkItem, WorkerRequest, WorkerStats},
  watcher::{WatcherConfig, WatcherTask},
};
use crate::{
  db::VectorStore,
  domain::{
    config::{Config, IndexConfig, Role},
    vault::Vaults,
  },
  embedding::EmbeddingProvider,
  service::{
    indexer::{IngestStats, Indexer},
    scan::{cleanup_stale, enumerate_notes},
    searcher::Searcher,
  },
};

const REQUEST_CHANNEL_SIZE: usize = 64;
const WATCHER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct WorkerConfig {
  pub vaults: Arc<Vaults>,
  pub index: IndexConfig,
  /// Texts per embedding request
  pub embedding_batch_size: usize,
  pub role: Role,
  pub(crate) timing: CoordinatorTiming,
}

impl WorkerConfig {
  pub fn from_config(config: &Config, vaults: Arc<Vaults>) -> Self {
    Self {
      vaults,
      index: config.index.clone(),
      embedding_batch_size: config.embedding.batch_size,
      role: config.coordination.role,
      timing: CoordinatorTiming::default(),
    }
  }

  fn housekeeping_interval(&self) -> Duration {
    Duration::from_secs(self.index.housekeeping_interval_secs.max(1))
  }
}

// ============================================================================
// IndexingWorker
// ============================================================================

pub struct IndexingWorker {
  config: WorkerConfig,
  store: VectorStore,
  coordinator: Coordinator,
  indexer: Indexer,
  searcher: Searcher,
  queue_tx: mpsc::UnboundedSender<WorkItem>,
  queue_rx: mpsc::UnboundedReceiver<WorkItem>,
  requests_rx: mpsc::Receiver<WorkerRequest>,
  cancel: CancellationToken,
  watcher_cancel: CancellationToken,
  watchers: Vec<JoinHandle<()>>,
  totals: IngestStats,
}

impl IndexingWorker {
  /// Start the worker and return a handle to it.
  ///
  /// Startup runs before this returns: the coordinator's first claim, stale
  /// cleanup (primary only), the optional full enqueue and the watchers.
  pub async fn spawn(
    config: WorkerConfig,
    store: VectorStore,
    embedder: Arc<dyn EmbeddingProvider>,
    cancel: CancellationToken,
  ) -> Result<WorkerHandle, WorkerError> {
    let (queue_tx, queue_rx) = mpsc::unbounded_channel();
    let (requests_tx, requests_rx) = mpsc::channel(REQUEST_CHANNEL_SIZE);

    let vault_list: Vec<(String, PathBuf)> = config
      .vaults
      .iter()
      .map(|(name, root)| (name.to_string(), root.to_path_buf()))
      .collect();
    let handle = WorkerHandle::new(
      queue_tx.clone(),
      requests_tx,
      vault_list,
      config.index.extension.clone(),
    );

    let coordinator = Coordinator::with_timing(store.clone(), config.role, config.timing);
    let indexer = Indexer::new(
      store.clone(),
      embedder.clone(),
      config.vaults.clone(),
      config.embedding_batch_size,
    );
    let searcher = Searcher::new(store.clone(), embedder, config.vaults.clone());
    let watcher_cancel = cancel.child_token();

    let mut worker = Self {
      config,
      store,
      coordinator,
      indexer,
      searcher,
      queue_tx,
      queue_rx,
      requests_rx,
      cancel,
      watcher_cancel,
      watchers: Vec::new(),
      totals: IngestStats::default(),
    };

    worker.startup().await?;
    tokio::spawn(worker.run());
    Ok(handle)
  }

  async fn startup(&mut self) -> Result<(), WorkerError> {
    info!(
      instance = self.coordinator.short_id(),
      vaults = self.config.vaults.len(),
      role = %self.config.role,
      database = %self.store.path().display(),
      "Starting indexing worker"
    );

    self.coordinator.start().await;

    if self.coordinator.is_primary() {
      self.cleanup_all().await?;
    }
    if self.config.index.reindex {
      let queued = self.enqueue_all().await;
      info!(queued, "Queued vault notes for indexing");
    }
    if self.config.index.watch {
      self.start_watchers();
    }
    Ok(())
  }

  async fn run(mut self) {
    let mut housekeeping = tokio::time::interval_at(
      tokio::time::Instant::now() + self.config.housekeeping_interval(),
      self.config.housekeeping_interval(),
    );
    housekeeping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
      tokio::select! {
          biased;

          _ = self.cancel.cancelled() => {
              info!(instance = self.coordinator.short_id(), "Indexing worker shutting down (cancelled)");
              break;
          }

          request = self.requests_rx.recv() => {
              match request {
                  Some(request) => {
                      if !self.handle_request(request).await {
                          return;
                      }
                  }
                  None => {
                      info!(instance = self.coordinator.short_id(), "Indexing worker shutting down (all handles dropped)");
                      break;
                  }
              }
          }

          Some(item) = self.queue_rx.recv() => {
              let stats = self.process_batch(item).await;
              self.totals += stats;
          }

          _ = housekeeping.tick() => {
              self.housekeeping().await;
          }
      }
    }

    self.shutdown().await;
  }

  /// Answer one request. Returns `false` once the worker has shut down.
  async fn handle_request(&mut self, request: WorkerRequest) -> bool {
    match request {
      WorkerRequest::Search { query, limit, reply } => {
        let result = self.searcher.search(&query, limit).await.map_err(WorkerError::from);
        let _ = reply.send(result);
      }
      WorkerRequest::Stats { reply } => {
        let _ = reply.send(self.stats().await);
      }
      WorkerRequest::CleanupStale { reply } => {
        let result = if self.ensure_primary().await {
          self.cleanup_all().await
        } else {
          debug!("Not primary, skipping stale cleanup");
          Ok(0)
        };
        let _ = reply.send(result);
      }
      WorkerRequest::Flush { reply } => {
        let stats = self.drain().await;
        self.totals += stats;
        let _ = reply.send(stats);
      }
      WorkerRequest::Shutdown { reply } => {
        info!(instance = self.coordinator.short_id(), "Indexing worker shutting down (requested)");
        self.shutdown().await;
        let _ = reply.send(());
        return false;
      }
    }
    true
  }

  /// Take `first` plus whatever else is queued, up to the batch size, and apply it
  async fn process_batch(&mut self, first: WorkItem) -> IngestStats {
    let limit = self.config.index.batch_size.max(1);
    let mut batch = Vec::with_capacity(limit);
    batch.push(first);
    while batch.len() < limit {
      match self.queue_rx.try_recv() {
        Ok(item) => batch.push(item),
        Err(_) => break,
      }
    }

    if !self.ensure_primary().await {
      debug!(dropped = batch.len(), "Not primary, dropping queued work");
      return IngestStats::default();
    }
    self.apply(batch).await
  }

  /// Apply a batch in queue order: runs of index requests go to the indexer
  /// together, removals are applied where they occur.
  async fn apply(&mut self, batch: Vec<WorkItem>) -> IngestStats {
    let mut stats = IngestStats::default();
    let mut pending: Vec<IndexRequest> = Vec::new();

    for item in batch {
      match item {
        WorkItem::Index(request) => pending.push(request),
        WorkItem::Remove { vault, path } => {
          stats += self.ingest(std::mem::take(&mut pending)).await;
          match self.store.delete_note(&vault, &path).await {
            Ok(true) => debug!(vault = %vault, path = %path, "Removed note from index"),
            Ok(false) => debug!(vault = %vault, path = %path, "Removed note was not indexed"),
            Err(e) => warn!(vault = %vault, path = %path, err = %e, "Failed to remove note"),
          }
        }
      }
    }
    stats += self.ingest(pending).await;
    stats
  }

  async fn ingest(&self, requests: Vec<IndexRequest>) -> IngestStats {
    if requests.is_empty() {
      return IngestStats::default();
    }
    match self.indexer.ingest(requests).await {
      Ok(stats) => stats,
      Err(e) => {
        warn!(err = %e, "Indexing batch failed");
        IngestStats::default()
      }
    }
  }

  /// Process everything currently queued
  async fn drain(&mut self) -> IngestStats {
    let mut stats = IngestStats::default();
    while let Ok(item) = self.queue_rx.try_recv() {
      stats += self.process_batch(item).await;
    }
    stats
  }

  /// Whether this instance may write, claiming a stale lock if it can.
  ///
  /// A reader that becomes primary here runs the catch-up pass.
  async fn ensure_primary(&mut self) -> bool {
    if self.coordinator.is_primary() {
      return true;
    }
    let promoted = self.coordinator.check_and_maybe_claim_primary().await;
    if promoted {
      self.catch_up().await;
    }
    promoted
  }

  async fn housekeeping(&mut self) {
    if self.coordinator.role() != Role::Auto || self.coordinator.is_primary() {
      return;
    }
    if self.coordinator.check_and_maybe_claim_primary().await {
      self.catch_up().await;
    }
  }

  /// Bring the index up to date after taking over from another instance
  async fn catch_up(&mut self) {
    info!(instance = self.coordinator.short_id(), "Running catch-up after promotion");
    if let Err(e) = self.cleanup_all().await {
      warn!(err = %e, "Stale cleanup during catch-up failed");
    }
    let queued = self.enqueue_all().await;
    debug!(queued, "Queued vault notes for catch-up");
  }

  async fn cleanup_all(&self) -> Result<usize, WorkerError> {
    let mut removed = 0;
    for (vault, root) in self.config.vaults.iter() {
      removed += cleanup_stale(&self.store, vault, root).await?;
    }
    Ok(removed)
  }

  async fn enqueue_all(&self) -> usize {
    let mut queued = 0;
    for (vault, root) in self.config.vaults.iter() {
      let root = root.to_path_buf();
      let extension = self.config.index.extension.clone();
      let files = match tokio::task::spawn_blocking(move || enumerate_notes(&root, &extension)).await {
        Ok(files) => files,
        Err(e) => {
          warn!(vault, err = %e, "Vault enumeration failed");
          continue;
        }
      };
      for file in files {
        if self.queue_tx.send(WorkItem::Index(IndexRequest::new(vault, file))).is_ok() {
          queued += 1;
        }
      }
    }
    queued
  }

  async fn stats(&self) -> Result<WorkerStats, WorkerError> {
    let num_notes = self.store.num_notes().await?;
    let mut last_modified = BTreeMap::new();
    for vault in self.config.vaults.names() {
      last_modified.insert(vault.to_string(), self.store.most_recent_timestamp(vault).await?);
    }

    Ok(WorkerStats {
      instance_id: self.coordinator.instance_id().to_string(),
      role: self.coordinator.role(),
      is_primary: self.coordinator.is_primary(),
      num_notes,
      last_modified,
      pending: self.queue_rx.len(),
      totals: self.totals,
    })
  }

  fn start_watchers(&mut self) {
    for (vault, root) in self.config.vaults.iter() {
      let watcher_config = WatcherConfig {
        vault: vault.to_string(),
        root: root.to_path_buf(),
        index: self.config.index.clone(),
      };
      match WatcherTask::spawn(watcher_config, self.queue_tx.clone(), self.watcher_cancel.clone()) {
        Ok(handle) => self.watchers.push(handle),
        Err(e) => warn!(vault, root = %root.display(), error = %e, "Failed to start watcher"),
      }
    }
  }

  async fn shutdown(&mut self) {
    self.watcher_cancel.cancel();
    for handle in self.watchers.drain(..) {
      if tokio::time::timeout(WATCHER_JOIN_TIMEOUT, handle).await.is_err() {
        warn!("Watcher did not stop in time");
      }
    }
    self.coordinator.stop().await;
    info!(
      instance = self.coordinator.short_id(),
      indexed = self.totals.indexed,
      "Indexing worker stopped"
    );
  }
}
