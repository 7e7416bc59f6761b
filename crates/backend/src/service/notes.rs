//! Direct note access: recently modified notes and safe reads by vault path.

use std::{
  path::{Component, Path, PathBuf},
  time::SystemTime,
};

use serde::Serialize;

use super::scan::enumerate_notes;
use crate::domain::vault::{Vaults, relative_key};

#[derive(Debug, thiserror::Error)]
pub enum NoteError {
  #[error("Unknown vault '{0}'")]
  UnknownVault(String),
  #[error("Invalid note path '{0}'")]
  InvalidPath(String),
  #[error("Note '{path}' not found in vault '{vault}'")]
  NotFound { vault: String, path: String },
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecentNote {
  pub vault: String,
  pub path: String,
  pub modified: SystemTime,
}

/// The `limit` most recently modified notes in a vault, newest first
pub async fn recent_notes(
  vaults: &Vaults,
  vault: &str,
  extension: &str,
  limit: usize,
) -> Result<Vec<RecentNote>, NoteError> {
  let root = vaults
    .root(vault)
    .ok_or_else(|| NoteError::UnknownVault(vault.to_string()))?
    .to_path_buf();
  let vault = vault.to_string();
  let extension = extension.to_string();

  let notes = tokio::task::spawn_blocking(move || {
    let mut notes: Vec<RecentNote> = enumerate_notes(&root, &extension)
      .into_iter()
      .filter_map(|file| {
        let modified = std::fs::metadata(&file).and_then(|m| m.modified()).ok()?;
        let path = relative_key(&root, &file)?;
        Some(RecentNote {
          vault: vault.clone(),
          path,
          modified,
        })
      })
      .collect();
    notes.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.path.cmp(&b.path)));
    notes.truncate(limit);
    notes
  })
  .await
  .map_err(std::io::Error::other)?;

  Ok(notes)
}

/// Absolute path of a note, refusing paths that escape the vault
pub fn resolve_note(vaults: &Vaults, vault: &str, relative: &str) -> Result<PathBuf, NoteError> {
  let root = vaults
    .root(vault)
    .ok_or_else(|| NoteError::UnknownVault(vault.to_string()))?;

  let rel = Path::new(relative);
  let is_plain = !relative.is_empty() && rel.components().all(|c| matches!(c, Component::Normal(_)));
  if !is_plain {
    return Err(NoteError::InvalidPath(relative.to_string()));
  }

  let file = root.join(rel);
  if !file.is_file() {
    return Err(NoteError::NotFound {
      vault: vault.to_string(),
      path: relative.to_string(),
    });
  }
  Ok(file)
}

/// Content of a note addressed by vault and relative path
pub async fn read_note(vaults: &Vaults, vault: &str, relative: &str) -> Result<String, NoteError> {
  let file = resolve_note(vaults, vault, relative)?;
  Ok(tokio::fs::read_to_string(file).await?)
}
