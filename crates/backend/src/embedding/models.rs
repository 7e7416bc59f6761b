//! Supported embedding models.
//!
//! The short name is what gets stamped into the store's metadata; changing it
//! triggers a full rebuild because vectors from different models are not comparable.

use crate::domain::config::ConfigError;

pub const DEFAULT_MODEL: &str = "all-minilm";

/// Static description of an embedding model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelSpec {
  /// Short name used in configuration and store metadata
  pub name: &'static str,
  /// Model identifier sent to the provider
  pub model_id: &'static str,
  pub dimensions: usize,
  /// Context window of the model in tokens
  pub max_tokens: usize,
  /// Prepended to documents before encoding
  pub document_prefix: &'static str,
  /// Prepended to queries before encoding
  pub query_prefix: &'static str,
}

const RETRIEVAL_INSTRUCTION: &str = "Represent this sentence for searching relevant passages: ";

pub const SUPPORTED_MODELS: &[ModelSpec] = &[
  ModelSpec {
    name: "all-minilm",
    model_id: "all-minilm",
    dimensions: 384,
    max_tokens: 256,
    document_prefix: "",
    query_prefix: "",
  },
  ModelSpec {
    name: "nomic-embed-text",
    model_id: "nomic-embed-text",
    dimensions: 768,
    max_tokens: 8192,
    document_prefix: "search_document: ",
    query_prefix: "search_query: ",
  },
  ModelSpec {
    name: "mxbai-embed-large",
    model_id: "mxbai-embed-large",
    dimensions: 1024,
    max_tokens: 512,
    document_prefix: "",
    query_prefix: RETRIEVAL_INSTRUCTION,
  },
  ModelSpec {
    name: "snowflake-arctic-embed",
    model_id: "snowflake-arctic-embed",
    dimensions: 1024,
    max_tokens: 512,
    document_prefix: "",
    query_prefix: RETRIEVAL_INSTRUCTION,
  },
  ModelSpec {
    name: "bge-m3",
    model_id: "bge-m3",
    dimensions: 1024,
    max_tokens: 8192,
    document_prefix: "",
    query_prefix: "",
  },
];

/// Look up a model by short name
pub fn resolve(name: &str) -> Result<ModelSpec, ConfigError> {
  SUPPORTED_MODELS
    .iter()
    .find(|spec| spec.name == name)
    .copied()
    .ok_or_else(|| ConfigError::UnsupportedModel {
      name: name.to_string(),
      supported: supported_names(),
    })
}

pub fn supported_names() -> String {
  SUPPORTED_MODELS.iter().map(|spec| spec.name).collect::<Vec<_>>().join(", ")
}
