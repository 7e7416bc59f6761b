//! Shared setup: configuration, vaults, store and embedder

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result, bail};
use clap::Args;
use tokio_util::sync::CancellationToken;
use vaultindex::{
  Config, DbError, IndexingWorker, Role, Vaults, VectorStore, WorkerConfig, WorkerHandle,
  embedding::{EmbeddingProvider, ModelSpec, models::resolve},
};

#[derive(Args, Debug, Default)]
pub struct GlobalArgs {
  /// Config file (default: user config directory)
  #[arg(long, global = true, value_name = "FILE")]
  pub config: Option<PathBuf>,

  /// Database file
  #[arg(long, global = true, value_name = "FILE")]
  pub database: Option<PathBuf>,

  /// Vault to index, as PATH or NAME=PATH (repeatable)
  #[arg(long = "vault", global = true, value_name = "VAULT")]
  pub vaults: Vec<String>,

  /// Embedding model short name
  #[arg(long, global = true)]
  pub model: Option<String>,

  /// Writer role: auto, primary or reader
  #[arg(long, global = true)]
  pub role: Option<Role>,
}

pub struct App {
  pub config: Config,
  pub model: ModelSpec,
}

impl App {
  /// Load configuration and apply command-line overrides.
  ///
  /// An unsupported model name is a hard error listing the supported ones.
  pub fn load(args: &GlobalArgs) -> Result<Self> {
    let mut config = Config::load(args.config.as_deref())?;

    if let Some(database) = &args.database {
      config.database = Some(database.clone());
    }
    for vault in &args.vaults {
      config.add_vault_arg(vault)?;
    }
    if let Some(model) = &args.model {
      config.embedding.model = model.clone();
    }
    if let Some(role) = args.role {
      config.coordination.role = role;
    }

    let model = resolve(&config.embedding.model)?;
    Ok(Self { config, model })
  }

  pub fn vaults(&self) -> Arc<Vaults> {
    Arc::new(Vaults::new(self.config.vaults.clone()))
  }

  pub fn require_vaults(&self) -> Result<()> {
    if self.config.vaults.is_empty() {
      bail!("No vaults configured; pass --vault PATH or add a [vaults] table to the config file");
    }
    Ok(())
  }

  /// Open the store for writing, migrating it to the configured model
  pub async fn open_store(&self) -> Result<VectorStore> {
    let path = self.config.database_path();
    VectorStore::open(&path, self.model)
      .await
      .with_context(|| format!("Failed to open database {}", path.display()))
  }

  /// Open an existing store for queries only
  pub async fn open_store_read_only(&self) -> Result<VectorStore> {
    let path = self.config.database_path();
    match VectorStore::open_read_only(&path, self.model).await {
      Ok(store) => Ok(store),
      Err(DbError::Uninitialized(_)) => {
        bail!("No index at {}; run `vaultindex index` first", path.display())
      }
      Err(e @ DbError::ModelMismatch { .. }) => {
        Err(e).context("Re-run `vaultindex index` to rebuild the index for the configured model")
      }
      Err(e) => Err(e).with_context(|| format!("Failed to open database {}", path.display())),
    }
  }

  pub fn embedder(&self) -> Result<Arc<dyn EmbeddingProvider>> {
    <dyn EmbeddingProvider>::from_config(&self.config.embedding, self.model).context("Failed to create embedder")
  }

  /// Spawn a worker that only answers queries
  pub async fn spawn_reader(&self, store: VectorStore) -> Result<WorkerHandle> {
    let mut config = WorkerConfig::from_config(&self.config, self.vaults());
    config.role = Role::Reader;
    config.index.reindex = false;
    config.index.watch = false;
    let handle = IndexingWorker::spawn(config, store, self.embedder()?, CancellationToken::new()).await?;
    Ok(handle)
  }
}
