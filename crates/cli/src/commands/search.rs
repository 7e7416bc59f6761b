//! Search and statistics against an existing index

use anyhow::Result;
use serde_json::json;
use vaultindex::actor::coordinator::unix_now;

use super::{App, format_age};

/// Search the index
pub async fn cmd_search(app: &App, query: &str, limit: usize, json_output: bool) -> Result<()> {
  let store = app.open_store_read_only().await?;
  let handle = app.spawn_reader(store).await?;
  let results = handle.search(query, limit).await;
  handle.stop().await?;
  let results = results?;

  if json_output {
    println!("{}", serde_json::to_string_pretty(&results)?);
    return Ok(());
  }

  if results.is_empty() {
    println!("No notes found for: {}", query);
    return Ok(());
  }

  println!("Found {} notes:\n", results.len());
  for (i, result) in results.iter().enumerate() {
    println!("{}. {}/{}  (distance {:.3})", i + 1, result.vault, result.path, result.score);
    if !result.outline.is_empty() {
      println!("   {}", result.outline.join(" | "));
    }
    let first_line = result.excerpt.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    if !first_line.is_empty() {
      println!("   {}", first_line.trim());
    }
    println!();
  }
  Ok(())
}

/// Show index statistics
pub async fn cmd_stats(app: &App, json_output: bool) -> Result<()> {
  let store = app.open_store_read_only().await?;
  let holder = store.primary_holder().await?;
  let handle = app.spawn_reader(store).await?;
  let stats = handle.stats().await;
  handle.stop().await?;
  let stats = stats?;
  let now = unix_now();

  if json_output {
    let output = json!({
      "database": app.config.database_path(),
      "model": app.model.name,
      "dimensions": app.model.dimensions,
      "num_notes": stats.num_notes,
      "last_modified": stats.last_modified,
      "primary": holder.as_ref().map(|h| json!({
        "holder": h.holder,
        "heartbeat_age_secs": now - h.heartbeat,
      })),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    return Ok(());
  }

  println!("Database: {}", app.config.database_path().display());
  println!("Model:    {} ({} dims)", app.model.name, app.model.dimensions);
  println!("Notes:    {}", stats.num_notes);
  match &holder {
    Some(h) => println!(
      "Primary:  {} (heartbeat {})",
      h.holder.get(..8).unwrap_or(&h.holder),
      format_age(now - h.heartbeat)
    ),
    None => println!("Primary:  none"),
  }

  if !stats.last_modified.is_empty() {
    println!("\nVaults:");
    for (vault, last) in &stats.last_modified {
      match last {
        Some(ts) => println!("  {vault}: newest indexed change {}", format_age(now - ts)),
        None => println!("  {vault}: nothing indexed"),
      }
    }
  }
  Ok(())
}
