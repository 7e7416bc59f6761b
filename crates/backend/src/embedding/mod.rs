pub mod models;
mod ollama;
pub mod validation;

use std::sync::Arc;

pub use models::ModelSpec;
pub use ollama::OllamaProvider;

use crate::domain::config::EmbeddingConfig;

/// Embedding mode determines how text is formatted before embedding.
///
/// Retrieval-tuned models expect different prefixes for stored documents and
/// for search queries; see [`ModelSpec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbeddingMode {
  /// Embedding a note for storage/indexing.
  #[default]
  Document,
  /// Embedding a query for retrieval/search.
  Query,
}

#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
  fn name(&self) -> &str;
  fn model_id(&self) -> &str;
  fn dimensions(&self) -> usize;

  async fn embed(&self, text: &str, mode: EmbeddingMode) -> Result<Vec<f32>, EmbeddingError>;
  async fn embed_batch(&self, texts: &[&str], mode: EmbeddingMode) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

impl dyn EmbeddingProvider {
  pub fn from_config(config: &EmbeddingConfig, spec: ModelSpec) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    let provider = OllamaProvider::new(config, spec)?;
    Ok(Arc::new(provider))
  }

  pub async fn encode_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
    self.embed(text, EmbeddingMode::Query).await
  }

  /// Embed documents in calls of at most `batch_size` texts, preserving order.
  ///
  /// An empty input never reaches the provider.
  pub async fn encode_documents(&self, texts: &[&str], batch_size: usize) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let mut embeddings = Vec::with_capacity(texts.len());
    for chunk in texts.chunks(batch_size.max(1)) {
      let batch = self.embed_batch(chunk, EmbeddingMode::Document).await?;
      if batch.len() != chunk.len() {
        return Err(EmbeddingError::ProviderError(format!(
          "Batch size mismatch: got {} embeddings for {} inputs",
          batch.len(),
          chunk.len()
        )));
      }
      embeddings.extend(batch);
    }
    Ok(embeddings)
  }
}

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
  #[error("Request failed: {0}")]
  Request(#[from] reqwest::Error),
  #[error("Provider error: {0}")]
  ProviderError(String),
  #[error("Embedding has {got} dimensions, model declares {expected}")]
  Dimensions { expected: usize, got: usize },
}
