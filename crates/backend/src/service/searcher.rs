use std::{path::PathBuf, sync::Arc};

use serde::Serialize;
use tracing::{debug, warn};

use super::extract;
use crate::{
  db::{DbError, VectorStore},
  domain::vault::Vaults,
  embedding::{EmbeddingError, EmbeddingProvider},
};

pub const DEFAULT_LIMIT: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
  #[error("Embedding error: {0}")]
  Embedding(#[from] EmbeddingError),
  #[error("Database error: {0}")]
  Database(#[from] DbError),
}

/// One search hit enriched from the note's current content
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
  pub vault: String,
  /// Vault-relative path
  pub path: String,
  /// Absolute path on disk
  pub file: PathBuf,
  /// Vector distance; lower is more similar
  pub score: f32,
  pub frontmatter: String,
  pub outline: Vec<String>,
  pub excerpt: String,
}

pub struct Searcher {
  store: VectorStore,
  embedder: Arc<dyn EmbeddingProvider>,
  vaults: Arc<Vaults>,
}

impl Searcher {
  pub fn new(store: VectorStore, embedder: Arc<dyn EmbeddingProvider>, vaults: Arc<Vaults>) -> Self {
    Self { store, embedder, vaults }
  }

  /// Nearest notes to `query`, at most `limit`, by ascending distance.
  ///
  /// Hits whose file is gone or unreadable are logged and left out.
  pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, SearchError> {
    let embedding = self.embedder.encode_query(query).await?;
    let hits = self.store.search(&embedding, limit).await?;
    debug!(query_len = query.len(), limit, hits = hits.len(), "Vector search complete");

    let mut results = Vec::with_capacity(hits.len());
    for hit in hits {
      let Some(root) = self.vaults.root(&hit.vault) else {
        debug!(vault = %hit.vault, path = %hit.path, "Hit from a vault not configured here, skipping");
        continue;
      };
      let file = root.join(&hit.path);

      let content = match tokio::fs::read_to_string(&file).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
          warn!(path = %file.display(), "Stale index entry, skipping");
          continue;
        }
        Err(e) => {
          warn!(path = %file.display(), err = %e, "Failed to read note, skipping");
          continue;
        }
      };

      results.push(SearchResult {
        frontmatter: extract::frontmatter(&content),
        outline: extract::outline(&content),
        excerpt: extract::excerpt(&content, extract::MAX_EXCERPT_CHARS),
        vault: hit.vault,
        path: hit.path,
        file,
        score: hit.distance,
      });
    }

    Ok(results)
  }
}
