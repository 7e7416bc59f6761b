//! Hash-diffed incremental indexing.
//!
//! A batch of `(vault, absolute path)` requests is reduced to the notes whose
//! content actually changed before any embedding work happens:
//!
//! ```text
//! read + sha256 → per-vault stored hash lookup → drop unchanged → embed → store
//! ```
//!
//! Files that vanish or cannot be read mid-batch are logged and dropped, and a
//! note that fails to embed or store does not stop the rest of the batch.

use std::{
  collections::BTreeMap,
  ops::AddAssign,
  path::{Path, PathBuf},
  sync::Arc,
  time::{Instant, UNIX_EPOCH},
};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, trace, warn};

use crate::{
  db::{DbError, NoteRecord, VectorStore},
  domain::vault::{Vaults, relative_key},
  embedding::EmbeddingProvider,
};

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
  #[error("Database error: {0}")]
  Database(#[from] DbError),
}

/// A note to (re)index, addressed by vault and absolute path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRequest {
  pub vault: String,
  pub path: PathBuf,
}

impl IndexRequest {
  pub fn new(vault: impl Into<String>, path: impl Into<PathBuf>) -> Self {
    Self {
      vault: vault.into(),
      path: path.into(),
    }
  }
}

/// Counters for one or more indexing passes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
  /// Requests received
  pub requested: usize,
  /// Dropped: unknown vault, outside the vault, or unreadable
  pub skipped: usize,
  /// Content hash matched the stored hash
  pub unchanged: usize,
  /// Embedded and stored
  pub indexed: usize,
  /// Embedding or storing failed; left for a later pass
  pub failed: usize,
}

impl AddAssign for IngestStats {
  fn add_assign(&mut self, other: Self) {
    self.requested += other.requested;
    self.skipped += other.skipped;
    self.unchanged += other.unchanged;
    self.indexed += other.indexed;
    self.failed += other.failed;
  }
}

/// A note read from disk, ready to diff
struct Candidate {
  content: String,
  hash: String,
  last_modified: f64,
}

pub struct Indexer {
  store: VectorStore,
  embedder: Arc<dyn EmbeddingProvider>,
  vaults: Arc<Vaults>,
  batch_size: usize,
}

impl Indexer {
  pub fn new(store: VectorStore, embedder: Arc<dyn EmbeddingProvider>, vaults: Arc<Vaults>, batch_size: usize) -> Self {
    Self {
      store,
      embedder,
      vaults,
      batch_size: batch_size.max(1),
    }
  }

  /// Index the changed notes among `batch`.
  ///
  /// An empty batch, or one where nothing changed, never calls the embedder.
  pub async fn ingest(&self, batch: Vec<IndexRequest>) -> Result<IngestStats, IndexError> {
    let mut stats = IngestStats {
      requested: batch.len(),
      ..Default::default()
    };
    if batch.is_empty() {
      return Ok(stats);
    }
    let start = Instant::now();

    // vault -> relative path -> candidate; a path requested twice is read once
    let mut by_vault: BTreeMap<String, BTreeMap<String, Candidate>> = BTreeMap::new();
    for request in batch {
      let Some(root) = self.vaults.root(&request.vault) else {
        warn!(vault = %request.vault, path = %request.path.display(), "Unknown vault, dropping request");
        stats.skipped += 1;
        continue;
      };
      let Some(rel) = relative_key(root, &request.path) else {
        warn!(vault = %request.vault, path = %request.path.display(), "Path is outside its vault, dropping request");
        stats.skipped += 1;
        continue;
      };
      match read_candidate(&request.path).await {
        Ok(candidate) => {
          by_vault.entry(request.vault).or_default().insert(rel, candidate);
        }
        Err(e) => {
          warn!(vault = %request.vault, path = %request.path.display(), err = %e, "Failed to read note, dropping from batch");
          stats.skipped += 1;
        }
      }
    }

    let mut changed: Vec<(String, String, Candidate)> = Vec::new();
    for (vault, candidates) in by_vault {
      let paths: Vec<String> = candidates.keys().cloned().collect();
      let stored = self.store.get_hashes_for_paths(&vault, &paths).await?;
      for (path, candidate) in candidates {
        if stored.get(&path) == Some(&candidate.hash) {
          trace!(vault = %vault, path = %path, "Unchanged, skipping");
          stats.unchanged += 1;
        } else {
          changed.push((vault.clone(), path, candidate));
        }
      }
    }

    if changed.is_empty() {
      debug!(?stats, "Nothing changed in batch");
      return Ok(stats);
    }

    for chunk in changed.chunks(self.batch_size) {
      let texts: Vec<&str> = chunk.iter().map(|(_, _, c)| c.content.as_str()).collect();
      let embeddings = match self.embedder.encode_documents(&texts, self.batch_size).await {
        Ok(embeddings) => embeddings,
        Err(e) => {
          warn!(count = chunk.len(), err = %e, "Embedding failed, notes left for a later pass");
          stats.failed += chunk.len();
          continue;
        }
      };

      for ((vault, path, candidate), embedding) in chunk.iter().zip(embeddings) {
        let record = NoteRecord {
          vault: vault.clone(),
          path: path.clone(),
          last_modified: candidate.last_modified,
          content_hash: candidate.hash.clone(),
          embedding,
        };
        match self.store.store_note(record).await {
          Ok(()) => {
            debug!(vault = %vault, path = %path, "Indexed note");
            stats.indexed += 1;
          }
          Err(e) => {
            warn!(vault = %vault, path = %path, err = %e, "Failed to store note, left for a later pass");
            stats.failed += 1;
          }
        }
      }
    }

    info!(
      requested = stats.requested,
      indexed = stats.indexed,
      unchanged = stats.unchanged,
      skipped = stats.skipped,
      failed = stats.failed,
      elapsed_ms = start.elapsed().as_millis(),
      "Indexing pass complete"
    );
    Ok(stats)
  }
}

async fn read_candidate(path: &Path) -> std::io::Result<Candidate> {
  let bytes = tokio::fs::read(path).await?;
  let metadata = tokio::fs::metadata(path).await?;
  let last_modified = metadata
    .modified()
    .ok()
    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
    .map(|d| d.as_secs_f64())
    .unwrap_or(0.0);

  Ok(Candidate {
    hash: content_hash(&bytes),
    content: String::from_utf8_lossy(&bytes).into_owned(),
    last_modified,
  })
}

/// Hex SHA-256 of the raw file bytes
pub fn content_hash(bytes: &[u8]) -> String {
  hex::encode(Sha256::digest(bytes))
}
