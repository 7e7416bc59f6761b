pub mod actor;
pub mod db;
pub mod dirs;
pub mod embedding;
pub mod service;

mod domain;
pub use domain::{config, vault};

pub use actor::{IndexingWorker, WorkerConfig, WorkerError, WorkerHandle, WorkerStats};
pub use db::{DbError, VectorStore};
pub use domain::{
  config::{Config, Role},
  vault::Vaults,
};
