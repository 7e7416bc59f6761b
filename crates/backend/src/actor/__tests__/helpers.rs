//! Test helpers for actor integration tests.
//!
//! Provides a deterministic [`CountingEmbedder`] and [`WorkerTestContext`],
//! which manages a temporary vault, a temporary database directory and
//! worker spawning.

use std::{
  collections::BTreeMap,
  path::{Path, PathBuf},
  sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  },
  time::Duration,
};

use filetime::FileTime;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::{
  actor::{
    coordinator::CoordinatorTiming,
    handle::WorkerHandle,
    worker::{IndexingWorker, WorkerConfig},
  },
  db::VectorStore,
  domain::{
    config::{IndexConfig, Role},
    vault::Vaults,
  },
  embedding::{EmbeddingError, EmbeddingMode, EmbeddingProvider, ModelSpec, models::resolve},
};

pub const VAULT: &str = "Brain";

/// Lock timing short enough for tests to observe staleness
pub fn fast_timing() -> CoordinatorTiming {
  CoordinatorTiming {
    heartbeat_interval: Duration::from_millis(50),
    stale_threshold: Duration::from_millis(300),
    join_timeout: Duration::from_millis(500),
  }
}

pub fn test_spec() -> ModelSpec {
  resolve("all-minilm").expect("default model is supported")
}

// ============================================================================
// CountingEmbedder
// ============================================================================

/// Bag-of-words embedder that records how much work it was given.
///
/// Each lowercase word is hashed into a bucket and the vector is normalized,
/// so texts sharing words land close together.
pub struct CountingEmbedder {
  dims: usize,
  calls: AtomicUsize,
  texts: AtomicUsize,
}

impl CountingEmbedder {
  pub fn new(dims: usize) -> Arc<Self> {
    Arc::new(Self {
      dims,
      calls: AtomicUsize::new(0),
      texts: AtomicUsize::new(0),
    })
  }

  /// Provider calls so far
  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  /// Texts embedded so far
  pub fn texts(&self) -> usize {
    self.texts.load(Ordering::SeqCst)
  }

  fn vector(&self, text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; self.dims];
    for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
      let bucket = fnv1a(&word.to_lowercase()) as usize % self.dims;
      vector[bucket] += 1.0;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
      vector.iter_mut().for_each(|v| *v /= norm);
    }
    vector
  }
}

fn fnv1a(text: &str) -> u64 {
  text.bytes().fold(0xcbf29ce484222325u64, |hash, byte| {
    (hash ^ byte as u64).wrapping_mul(0x100000001b3)
  })
}

#[async_trait::async_trait]
impl EmbeddingProvider for CountingEmbedder {
  fn name(&self) -> &str {
    "counting"
  }

  fn model_id(&self) -> &str {
    "counting"
  }

  fn dimensions(&self) -> usize {
    self.dims
  }

  async fn embed(&self, text: &str, _mode: EmbeddingMode) -> Result<Vec<f32>, EmbeddingError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    self.texts.fetch_add(1, Ordering::SeqCst);
    Ok(self.vector(text))
  }

  async fn embed_batch(&self, texts: &[&str], _mode: EmbeddingMode) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    self.texts.fetch_add(texts.len(), Ordering::SeqCst);
    Ok(texts.iter().map(|t| self.vector(t)).collect())
  }
}

// ============================================================================
// WorkerTestContext
// ============================================================================

/// Temporary vault + database for worker tests.
pub struct WorkerTestContext {
  /// Vault directory (notes)
  pub vault_dir: TempDir,
  /// Data directory (database)
  pub data_dir: TempDir,
  pub vaults: Arc<Vaults>,
  pub embedder: Arc<CountingEmbedder>,
}

impl WorkerTestContext {
  pub fn new() -> Self {
    let vault_dir = TempDir::new().expect("create vault temp dir");
    let data_dir = TempDir::new().expect("create data temp dir");
    let vaults = Arc::new(Vaults::new(BTreeMap::from([(
      VAULT.to_string(),
      vault_dir.path().to_path_buf(),
    )])));
    let embedder = CountingEmbedder::new(test_spec().dimensions);

    Self {
      vault_dir,
      data_dir,
      vaults,
      embedder,
    }
  }

  /// Canonical vault root
  pub fn root(&self) -> &Path {
    self.vaults.root(VAULT).expect("test vault configured")
  }

  pub fn note_path(&self, rel: &str) -> PathBuf {
    self.root().join(rel)
  }

  pub fn db_path(&self) -> PathBuf {
    self.data_dir.path().join("vaultindex.db")
  }

  pub fn provider(&self) -> Arc<dyn EmbeddingProvider> {
    self.embedder.clone()
  }

  pub async fn open_store(&self) -> VectorStore {
    VectorStore::open(self.db_path(), test_spec()).await.expect("open store")
  }

  /// Worker configuration with watching and startup reindex off
  pub fn worker_config(&self, role: Role) -> WorkerConfig {
    WorkerConfig {
      vaults: self.vaults.clone(),
      index: IndexConfig {
        reindex: false,
        watch: false,
        watcher_debounce_ms: 50,
        housekeeping_interval_secs: 1,
        ..Default::default()
      },
      embedding_batch_size: 16,
      role,
      timing: fast_timing(),
    }
  }

  pub async fn spawn_worker(&self, config: WorkerConfig) -> (WorkerHandle, CancellationToken) {
    let cancel = CancellationToken::new();
    let store = self.open_store().await;
    let handle = IndexingWorker::spawn(config, store, self.provider(), cancel.clone())
      .await
      .expect("spawn worker");
    (handle, cancel)
  }

  pub async fn write_note(&self, rel: &str, content: &str) -> PathBuf {
    let path = self.note_path(rel);
    if let Some(parent) = path.parent() {
      tokio::fs::create_dir_all(parent).await.expect("create parent dirs");
    }
    tokio::fs::write(&path, content).await.expect("write note");
    path
  }

  pub async fn delete_note(&self, rel: &str) {
    let _ = tokio::fs::remove_file(self.note_path(rel)).await;
  }

  pub async fn rename_note(&self, from: &str, to: &str) {
    tokio::fs::rename(self.note_path(from), self.note_path(to))
      .await
      .expect("rename note");
  }

  /// Update mtime without changing content.
  pub fn touch_note(&self, rel: &str) {
    filetime::set_file_mtime(self.note_path(rel), FileTime::now()).expect("set mtime");
  }
}

/// Wait for a condition to become true, with timeout.
pub async fn wait_for<F, Fut>(timeout: Duration, mut check: F) -> bool
where
  F: FnMut() -> Fut,
  Fut: std::future::Future<Output = bool>,
{
  let start = std::time::Instant::now();
  while start.elapsed() < timeout {
    if check().await {
      return true;
    }
    tokio::time::sleep(Duration::from_millis(25)).await;
  }
  check().await
}
