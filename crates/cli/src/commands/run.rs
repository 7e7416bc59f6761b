//! Long-running worker

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;
use vaultindex::{IndexingWorker, WorkerConfig};

use super::App;

/// Run the indexing worker until Ctrl-C.
///
/// `reindex` and `watch` switch those behaviours on; when not given the
/// configured values apply.
pub async fn cmd_run(app: &App, reindex: bool, watch: bool) -> Result<()> {
  app.require_vaults()?;
  let store = app.open_store().await?;

  let mut config = WorkerConfig::from_config(&app.config, app.vaults());
  config.index.reindex |= reindex;
  config.index.watch |= watch;

  let cancel = CancellationToken::new();
  let handle = IndexingWorker::spawn(config, store, app.embedder()?, cancel.clone()).await?;
  info!(database = %app.config.database_path().display(), model = app.model.name, "Worker running, press Ctrl-C to stop");

  tokio::signal::ctrl_c().await?;
  info!("Shutting down");

  handle.stop().await?;
  cancel.cancel();
  Ok(())
}
