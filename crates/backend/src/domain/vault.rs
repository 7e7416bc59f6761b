use std::{
  collections::BTreeMap,
  path::{Component, Path, PathBuf},
};

use tracing::warn;

/// Fixed mapping from vault name to its root directory.
///
/// Roots are canonicalized when possible so that paths reported by the
/// filesystem watcher (which are always canonical) strip cleanly.
#[derive(Debug, Clone, Default)]
pub struct Vaults {
  roots: BTreeMap<String, PathBuf>,
}

impl Vaults {
  pub fn new(roots: BTreeMap<String, PathBuf>) -> Self {
    let roots = roots
      .into_iter()
      .map(|(name, root)| {
        let root = match root.canonicalize() {
          Ok(canonical) => canonical,
          Err(e) => {
            warn!(vault = %name, root = %root.display(), err = %e, "Vault root could not be canonicalized");
            root
          }
        };
        (name, root)
      })
      .collect();
    Self { roots }
  }

  pub fn root(&self, vault: &str) -> Option<&Path> {
    self.roots.get(vault).map(PathBuf::as_path)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &Path)> {
    self.roots.iter().map(|(name, root)| (name.as_str(), root.as_path()))
  }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.roots.keys().map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.roots.len()
  }

  pub fn is_empty(&self) -> bool {
    self.roots.is_empty()
  }
}

/// Vault-relative key for `path`, using `/` separators regardless of platform.
///
/// Returns `None` when `path` is not under `root` or escapes it.
pub fn relative_key(root: &Path, path: &Path) -> Option<String> {
  let rel = path.strip_prefix(root).ok()?;
  let mut parts = Vec::new();
  for component in rel.components() {
    match component {
      Component::Normal(part) => parts.push(part.to_str()?),
      Component::CurDir => {}
      _ => return None,
    }
  }
  if parts.is_empty() {
    return None;
  }
  Some(parts.join("/"))
}

/// Whether `path` carries the note extension (case-insensitive)
pub fn has_extension(path: &Path, extension: &str) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
}
