use std::{sync::Arc, time::Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, trace, warn};

use super::{
  EmbeddingError, EmbeddingMode, EmbeddingProvider,
  models::ModelSpec,
  validation::{ContextBudget, fit_to_budget},
};
use crate::domain::config::EmbeddingConfig;

/// Upper bound on inputs per `/api/embed` request
const OLLAMA_MAX_BATCH_SIZE: usize = 32;

#[derive(Debug, Clone)]
pub struct OllamaProvider {
  client: reqwest::Client,
  base_url: String,
  spec: ModelSpec,
  budget: ContextBudget,
  max_batch_size: usize,
  /// Maximum concurrent requests to avoid overwhelming the GPU
  max_concurrent: usize,
}

impl OllamaProvider {
  pub fn new(config: &EmbeddingConfig, spec: ModelSpec) -> Result<Self, EmbeddingError> {
    let base_url = config.ollama_url.trim_end_matches('/').to_string();
    let max_concurrent = config.max_concurrent.max(1);

    info!(
      base_url,
      model = spec.model_id,
      dimensions = spec.dimensions,
      max_concurrent,
      "Ollama provider initialized"
    );
    Ok(Self {
      client: reqwest::Client::new(),
      base_url,
      spec,
      budget: ContextBudget::for_model(&spec),
      max_batch_size: OLLAMA_MAX_BATCH_SIZE,
      max_concurrent,
    })
  }

  fn embed_url(&self) -> String {
    format!("{}/api/embed", self.base_url)
  }

  /// Apply the model's prefix for `mode`; documents are also cut to the context budget.
  fn format_for_embedding(&self, text: &str, mode: EmbeddingMode) -> String {
    match mode {
      EmbeddingMode::Query => format!("{}{}", self.spec.query_prefix, text),
      EmbeddingMode::Document => format!("{}{}", self.spec.document_prefix, fit_to_budget(text, &self.budget)),
    }
  }

  /// Processes sub-batches concurrently using semaphore-limited parallelism,
  /// reassembling the results in input order.
  #[tracing::instrument(level = "trace", skip(self, texts), fields(batch_size = texts.len()))]
  async fn embed_batch_native(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let num_batches = texts.len().div_ceil(self.max_batch_size);
    let start = Instant::now();

    if num_batches <= 1 {
      return self.embed_single_batch(&texts).await;
    }

    debug!(
      batch_size = texts.len(),
      sub_batches = num_batches,
      model = self.spec.model_id,
      "Processing batch with concurrent sub-batches"
    );

    let semaphore = Arc::new(Semaphore::new(self.max_concurrent));

    let futures: Vec<_> = texts
      .chunks(self.max_batch_size)
      .enumerate()
      .map(|(batch_idx, chunk)| {
        let permit = semaphore.clone();
        let provider = self.clone();
        let chunk_owned = chunk.to_vec();
        async move {
          let _permit = permit
            .acquire()
            .await
            .map_err(|_| EmbeddingError::ProviderError("semaphore closed".to_string()))?;
          let embeddings = provider.embed_single_batch(&chunk_owned).await?;
          Ok::<_, EmbeddingError>((batch_idx, embeddings))
        }
      })
      .collect();

    let results = futures::future::join_all(futures).await;

    let mut indexed_results: Vec<(usize, Vec<Vec<f32>>)> = Vec::with_capacity(num_batches);
    for result in results {
      indexed_results.push(result?);
    }
    indexed_results.sort_by_key(|(idx, _)| *idx);

    let all_embeddings: Vec<Vec<f32>> = indexed_results.into_iter().flat_map(|(_, e)| e).collect();

    debug!(
      batch_size = texts.len(),
      sub_batches = num_batches,
      elapsed_ms = start.elapsed().as_millis(),
      "Batch embedding complete"
    );

    Ok(all_embeddings)
  }

  async fn embed_single_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let request = BatchEmbeddingRequest {
      model: self.spec.model_id,
      input: texts.iter().map(String::as_str).collect(),
    };

    trace!(batch_size = texts.len(), model = self.spec.model_id, "Sending batch embedding request");
    let start = Instant::now();

    let response = self.client.post(self.embed_url()).json(&request).send().await?;

    if !response.status().is_success() {
      let status = response.status();
      let body = response.text().await.unwrap_or_default();
      warn!(
        status = %status,
        batch_size = texts.len(),
        model = self.spec.model_id,
        "Ollama batch embedding failed"
      );
      return Err(EmbeddingError::ProviderError(format!(
        "Ollama returned {}: {}",
        status, body
      )));
    }

    let result: BatchEmbeddingResponse = response.json().await?;
    trace!(
      embeddings_count = result.embeddings.len(),
      elapsed_ms = start.elapsed().as_millis(),
      "Parsed batch embedding response"
    );

    if result.embeddings.len() != texts.len() {
      error!(
        expected = texts.len(),
        got = result.embeddings.len(),
        model = self.spec.model_id,
        "Batch size mismatch in embedding response"
      );
      return Err(EmbeddingError::ProviderError(format!(
        "Batch size mismatch: got {} embeddings for {} inputs",
        result.embeddings.len(),
        texts.len()
      )));
    }

    if let Some(bad) = result.embeddings.iter().find(|e| e.len() != self.spec.dimensions) {
      warn!(
        expected = self.spec.dimensions,
        got = bad.len(),
        model = self.spec.model_id,
        "Unexpected embedding dimensions"
      );
      return Err(EmbeddingError::Dimensions {
        expected: self.spec.dimensions,
        got: bad.len(),
      });
    }

    Ok(result.embeddings)
  }
}

#[derive(Serialize)]
struct BatchEmbeddingRequest<'a> {
  model: &'a str,
  input: Vec<&'a str>,
}

#[derive(Deserialize)]
struct BatchEmbeddingResponse {
  embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
  fn name(&self) -> &str {
    "ollama"
  }

  fn model_id(&self) -> &str {
    self.spec.model_id
  }

  fn dimensions(&self) -> usize {
    self.spec.dimensions
  }

  async fn embed(&self, text: &str, mode: EmbeddingMode) -> Result<Vec<f32>, EmbeddingError> {
    let formatted = self.format_for_embedding(text, mode);
    self
      .embed_single_batch(&[formatted])
      .await?
      .pop()
      .ok_or_else(|| EmbeddingError::ProviderError("empty embedding response".to_string()))
  }

  async fn embed_batch(&self, texts: &[&str], mode: EmbeddingMode) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if texts.is_empty() {
      return Ok(Vec::new());
    }

    let formatted: Vec<String> = texts.iter().map(|t| self.format_for_embedding(t, mode)).collect();
    self.embed_batch_native(formatted).await
  }
}
