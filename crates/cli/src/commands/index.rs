//! One-shot indexing

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use vaultindex::{IndexingWorker, WorkerConfig};

use super::App;

/// Index every note in every vault, then exit
pub async fn cmd_index(app: &App) -> Result<()> {
  app.require_vaults()?;
  let store = app.open_store().await?;

  let mut config = WorkerConfig::from_config(&app.config, app.vaults());
  config.index.reindex = false;
  config.index.watch = false;

  let handle = IndexingWorker::spawn(config, store, app.embedder()?, CancellationToken::new()).await?;
  let queued = handle.enqueue_all().await?;
  handle.flush().await?;
  let stats = handle.stats().await?;
  handle.stop().await?;

  if !stats.is_primary {
    warn!("Another instance holds the writer role; it indexes these vaults instead");
    println!("Queued {queued} notes, but another instance is primary; nothing was written.");
    return Ok(());
  }

  let totals = stats.totals;
  println!(
    "Queued {queued} notes: {} indexed, {} unchanged, {} skipped, {} failed ({} notes in index)",
    totals.indexed, totals.unchanged, totals.skipped, totals.failed, stats.num_notes
  );
  Ok(())
}
