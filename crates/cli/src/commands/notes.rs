//! Direct note access, no index needed

use anyhow::Result;
use vaultindex::service::notes::{read_note, recent_notes};

use super::{App, format_age};

/// List the most recently modified notes in a vault
pub async fn cmd_recent(app: &App, vault: &str, limit: usize) -> Result<()> {
  let vaults = app.vaults();
  let notes = recent_notes(&vaults, vault, &app.config.index.extension, limit).await?;

  if notes.is_empty() {
    println!("No notes in vault {vault}");
    return Ok(());
  }
  for note in notes {
    let age = note.modified.elapsed().map(|d| d.as_secs_f64()).unwrap_or(0.0);
    println!("{:>10}  {}", format_age(age), note.path);
  }
  Ok(())
}

/// Print a note's content
pub async fn cmd_show(app: &App, vault: &str, path: &str) -> Result<()> {
  let content = read_note(&app.vaults(), vault, path).await?;
  print!("{content}");
  Ok(())
}
