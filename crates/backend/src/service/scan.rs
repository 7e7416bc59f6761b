//! Vault enumeration and stale-entry cleanup.
//!
//! Enumeration walks a vault root for note files, skipping hidden directories
//! (`.obsidian`, `.trash`, `.git`, ...). Cleanup compares the store's view of a
//! vault against the filesystem and deletes entries whose file is gone.

use std::path::{Path, PathBuf};

use tracing::{debug, info, trace, warn};

use crate::{
  db::{DbError, VectorStore},
  domain::vault::has_extension,
};

/// Every note file under `root`, in walk order
pub fn enumerate_notes(root: &Path, extension: &str) -> Vec<PathBuf> {
  let walker = walkdir::WalkDir::new(root)
    .follow_links(false)
    .into_iter()
    .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));

  let mut files = Vec::new();
  for entry in walker {
    let entry = match entry {
      Ok(entry) => entry,
      Err(e) => {
        warn!(root = %root.display(), err = %e, "Skipping unreadable vault entry");
        continue;
      }
    };
    if entry.file_type().is_file() && has_extension(entry.path(), extension) {
      files.push(entry.into_path());
    }
  }

  trace!(root = %root.display(), count = files.len(), "Enumerated notes");
  files
}

/// Delete every indexed path of `vault` whose file no longer exists.
///
/// Returns the number of entries removed.
pub async fn cleanup_stale(store: &VectorStore, vault: &str, root: &Path) -> Result<usize, DbError> {
  let paths = store.get_all_paths(vault).await?;
  let mut removed = 0;

  for path in paths {
    let exists = tokio::fs::try_exists(root.join(&path)).await.unwrap_or(false);
    if !exists && store.delete_note(vault, &path).await? {
      debug!(vault, path = %path, "Removed stale entry");
      removed += 1;
    }
  }

  if removed > 0 {
    info!(vault, removed, "Stale entry cleanup complete");
  }
  Ok(removed)
}
