//! Handle for communicating with the indexing worker
//!
//! The handle is cheap to clone and can be shared across tasks. Queue
//! operations are fire-and-forget; requests wait for a oneshot reply.

use std::path::PathBuf;

use tokio::sync::{mpsc, oneshot};

use super::message::{IndexRequest, WorkItem, WorkerRequest, WorkerStats};
use crate::{
  db::DbError,
  service::{
    indexer::{IndexError, IngestStats},
    searcher::{SearchError, SearchResult},
  },
};

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
  #[error("Worker has shut down")]
  ActorGone,
  #[error("Unknown vault '{0}'")]
  UnknownVault(String),
  #[error("Search failed: {0}")]
  Search(#[from] SearchError),
  #[error("Index error: {0}")]
  Index(#[from] IndexError),
  #[error("Database error: {0}")]
  Database(#[from] DbError),
}

#[derive(Clone, Debug)]
pub struct WorkerHandle {
  queue: mpsc::UnboundedSender<WorkItem>,
  requests: mpsc::Sender<WorkerRequest>,
  vaults: Vec<(String, PathBuf)>,
  extension: String,
}

impl WorkerHandle {
  pub(super) fn new(
    queue: mpsc::UnboundedSender<WorkItem>,
    requests: mpsc::Sender<WorkerRequest>,
    vaults: Vec<(String, PathBuf)>,
    extension: String,
  ) -> Self {
    Self {
      queue,
      requests,
      vaults,
      extension,
    }
  }

  /// Queue a note for (re)indexing
  pub fn enqueue(&self, vault: impl Into<String>, path: impl Into<PathBuf>) -> Result<(), WorkerError> {
    self.push(WorkItem::Index(IndexRequest::new(vault, path)))
  }

  /// Queue every note in a vault. Returns how many were queued.
  pub async fn enqueue_vault(&self, vault: &str) -> Result<usize, WorkerError> {
    let root = self
      .vaults
      .iter()
      .find(|(name, _)| name == vault)
      .map(|(_, root)| root.clone())
      .ok_or_else(|| WorkerError::UnknownVault(vault.to_string()))?;
    let extension = self.extension.clone();
    let files = tokio::task::spawn_blocking(move || crate::service::scan::enumerate_notes(&root, &extension))
      .await
      .map_err(|_| WorkerError::ActorGone)?;

    let count = files.len();
    for file in files {
      self.enqueue(vault, file)?;
    }
    Ok(count)
  }

  /// Queue every note in every vault
  pub async fn enqueue_all(&self) -> Result<usize, WorkerError> {
    let mut total = 0;
    for (vault, _) in &self.vaults {
      total += self.enqueue_vault(vault).await?;
    }
    Ok(total)
  }

  /// Queue removal of a note by vault-relative path
  pub fn remove(&self, vault: impl Into<String>, path: impl Into<String>) -> Result<(), WorkerError> {
    self.push(WorkItem::Remove {
      vault: vault.into(),
      path: path.into(),
    })
  }

  pub async fn search(&self, query: impl Into<String>, limit: usize) -> Result<Vec<SearchResult>, WorkerError> {
    let query = query.into();
    self
      .request(|reply| WorkerRequest::Search { query, limit, reply })
      .await?
  }

  pub async fn stats(&self) -> Result<WorkerStats, WorkerError> {
    self.request(|reply| WorkerRequest::Stats { reply }).await?
  }

  /// Delete index entries whose files no longer exist. Returns how many were removed.
  pub async fn cleanup_stale(&self) -> Result<usize, WorkerError> {
    self.request(|reply| WorkerRequest::CleanupStale { reply }).await?
  }

  /// Wait until everything queued so far has been processed
  pub async fn flush(&self) -> Result<IngestStats, WorkerError> {
    self.request(|reply| WorkerRequest::Flush { reply }).await
  }

  /// Stop the worker, releasing the primary role before returning
  pub async fn stop(&self) -> Result<(), WorkerError> {
    self.request(|reply| WorkerRequest::Shutdown { reply }).await
  }

  fn push(&self, item: WorkItem) -> Result<(), WorkerError> {
    self.queue.send(item).map_err(|_| WorkerError::ActorGone)
  }

  async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> WorkerRequest) -> Result<T, WorkerError> {
    let (reply_tx, reply_rx) = oneshot::channel();
    self
      .requests
      .send(build(reply_tx))
      .await
      .map_err(|_| WorkerError::ActorGone)?;
    reply_rx.await.map_err(|_| WorkerError::ActorGone)
  }
}
