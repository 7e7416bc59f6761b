use std::{
  io::{ErrorKind, Read},
  path::{Path, PathBuf},
  time::Duration,
};

use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use tracing::{info, warn};

use super::Result;
use crate::embedding::ModelSpec;

/// First 16 bytes of every SQLite 3 database file
const SQLITE_HEADER: &[u8; 16] = b"SQLite format 3\0";

const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

const MODEL_KEY: &str = "model_name";

const CREATE_METADATA: &str = "CREATE TABLE IF NOT EXISTS metadata (
  key TEXT PRIMARY KEY,
  value TEXT
)";

const CREATE_PRIMARY_LOCK: &str = "CREATE TABLE IF NOT EXISTS primary_lock (
  id INTEGER PRIMARY KEY CHECK (id = 1),
  holder TEXT NOT NULL,
  heartbeat REAL NOT NULL
)";

const CREATE_NOTES: &str = "CREATE TABLE IF NOT EXISTS notes (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  path TEXT NOT NULL,
  vault_name TEXT NOT NULL,
  last_modified REAL,
  content_hash TEXT,
  UNIQUE(vault_name, path)
)";

const CREATE_NOTES_INDEX: &str = "CREATE INDEX IF NOT EXISTS idx_notes_vault_path ON notes(vault_name, path)";

fn create_notes_vec(dimensions: usize) -> String {
  format!(
    "CREATE VIRTUAL TABLE IF NOT EXISTS notes_vec USING vec0(
  note_id INTEGER PRIMARY KEY,
  embedding float[{dimensions}]
)"
  )
}

/// What `migrate` did to bring the schema in line with the configured model
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Migration {
  Fresh,
  Unchanged,
  Rebuilt { previous: String },
}

/// Delete a store file that is not a SQLite database (a previous on-disk format).
///
/// Missing and empty files are left alone. Returns whether anything was deleted.
pub(super) fn discard_legacy(path: &Path) -> Result<bool> {
  let mut file = match std::fs::File::open(path) {
    Ok(file) => file,
    Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
    Err(e) => return Err(e.into()),
  };

  let mut header = Vec::with_capacity(SQLITE_HEADER.len());
  file.by_ref().take(SQLITE_HEADER.len() as u64).read_to_end(&mut header)?;
  drop(file);

  if header.is_empty() || header == SQLITE_HEADER {
    return Ok(false);
  }

  warn!(
    path = %path.display(),
    "Index file is in an unrecognized legacy format, deleting it and rebuilding"
  );
  std::fs::remove_file(path)?;
  for sidecar in sidecars(path) {
    match std::fs::remove_file(&sidecar) {
      Ok(()) => info!(path = %sidecar.display(), "Removed legacy journal file"),
      Err(e) if e.kind() == ErrorKind::NotFound => {}
      Err(e) => return Err(e.into()),
    }
  }
  Ok(true)
}

fn sidecars(path: &Path) -> Vec<PathBuf> {
  [".wal", "-wal", "-shm"]
    .iter()
    .map(|suffix| {
      let mut name = path.as_os_str().to_os_string();
      name.push(suffix);
      PathBuf::from(name)
    })
    .collect()
}

/// Connection settings for multi-process access
pub(super) fn configure(conn: &Connection, read_only: bool) -> Result<()> {
  conn.busy_timeout(BUSY_TIMEOUT)?;
  if !read_only {
    let mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
      warn!(mode, "Could not enable WAL journaling");
    }
    conn.pragma_update(None, "synchronous", "NORMAL")?;
  }
  Ok(())
}

pub(super) fn stored_model(conn: &Connection) -> Result<Option<String>> {
  let has_metadata: bool = conn.query_row(
    "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'metadata')",
    [],
    |row| row.get(0),
  )?;
  if !has_metadata {
    return Ok(None);
  }

  let value = conn
    .query_row("SELECT value FROM metadata WHERE key = ?1", [MODEL_KEY], |row| {
      row.get::<_, Option<String>>(0)
    })
    .optional()?
    .flatten();
  Ok(value)
}

/// Create or migrate the schema for `model` inside one write transaction.
///
/// A different stamped model drops every note and embedding: vectors from
/// different models are not comparable.
pub(super) fn migrate(conn: &mut Connection, model: &ModelSpec) -> Result<Migration> {
  let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
  tx.execute(CREATE_METADATA, [])?;
  tx.execute(CREATE_PRIMARY_LOCK, [])?;

  let migration = match stored_model(&tx)? {
    None => Migration::Fresh,
    Some(stored) if stored == model.name => Migration::Unchanged,
    Some(previous) => {
      warn!(
        previous = %previous,
        model = model.name,
        "Embedding model changed, dropping all indexed notes for a full rebuild"
      );
      tx.execute("DROP TABLE IF EXISTS notes_vec", [])?;
      tx.execute("DROP TABLE IF EXISTS notes", [])?;
      Migration::Rebuilt { previous }
    }
  };

  tx.execute(CREATE_NOTES, [])?;
  tx.execute(CREATE_NOTES_INDEX, [])?;
  tx.execute(&create_notes_vec(model.dimensions), [])?;
  if migration != Migration::Unchanged {
    tx.execute(
      "INSERT INTO metadata (key, value) VALUES (?1, ?2)
       ON CONFLICT(key) DO UPDATE SET value = excluded.value",
      [MODEL_KEY, model.name],
    )?;
  }
  tx.commit()?;

  Ok(migration)
}
