//! Business logic services.
//!
//! ## Available Services
//!
//! - [`indexer`] - Hash-diffed incremental indexing of note batches
//! - [`searcher`] - Query embedding, k-NN lookup and result enrichment
//! - [`scan`] - Vault enumeration and stale-entry cleanup
//! - [`notes`] - Recent notes and safe note reads
//! - [`extract`] - Frontmatter, outline and excerpt scanning

pub mod extract;
pub mod indexer;
pub mod notes;
pub mod scan;
pub mod searcher;
