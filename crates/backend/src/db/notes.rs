use std::collections::HashMap;

use rusqlite::{TransactionBehavior, params, params_from_iter};
use serde::Serialize;
use tracing::{debug, trace};

use super::{Result, VectorStore, embedding_to_blob};

/// Paths per `IN (...)` lookup, well under SQLite's bound-variable limit
const HASH_LOOKUP_CHUNK: usize = 500;

/// One note as written by the indexer
#[derive(Debug, Clone, PartialEq)]
pub struct NoteRecord {
  pub vault: String,
  /// Vault-relative path with `/` separators
  pub path: String,
  /// File modification time, seconds since the Unix epoch
  pub last_modified: f64,
  pub content_hash: String,
  pub embedding: Vec<f32>,
}

/// Nearest-neighbor match; lower distance is more similar
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
  pub vault: String,
  pub path: String,
  pub distance: f32,
}

impl VectorStore {
  /// Count of indexed notes
  pub async fn num_notes(&self) -> Result<usize> {
    self
      .call(|conn| {
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM notes", [], |row| row.get(0))?;
        Ok(count.max(0) as usize)
      })
      .await
  }

  /// Newest `last_modified` in a vault, or `None` when the vault has no notes
  pub async fn most_recent_timestamp(&self, vault: &str) -> Result<Option<f64>> {
    let vault = vault.to_string();
    self
      .call(move |conn| {
        let ts = conn.query_row(
          "SELECT MAX(last_modified) FROM notes WHERE vault_name = ?1",
          [&vault],
          |row| row.get::<_, Option<f64>>(0),
        )?;
        Ok(ts)
      })
      .await
  }

  /// Stored hashes for the requested paths; paths with no stored hash are omitted
  pub async fn get_hashes_for_paths(&self, vault: &str, paths: &[String]) -> Result<HashMap<String, String>> {
    if paths.is_empty() {
      return Ok(HashMap::new());
    }

    let vault = vault.to_string();
    let paths = paths.to_vec();
    self
      .call(move |conn| {
        let mut hashes = HashMap::with_capacity(paths.len());
        for chunk in paths.chunks(HASH_LOOKUP_CHUNK) {
          let placeholders = vec!["?"; chunk.len()].join(", ");
          let sql = format!(
            "SELECT path, content_hash FROM notes WHERE vault_name = ? AND path IN ({})",
            placeholders
          );
          let mut stmt = conn.prepare_cached(&sql)?;
          let args = std::iter::once(vault.as_str()).chain(chunk.iter().map(String::as_str));
          let rows = stmt.query_map(params_from_iter(args), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
          })?;
          for row in rows {
            if let (path, Some(hash)) = row? {
              hashes.insert(path, hash);
            }
          }
        }
        trace!(vault = %vault, requested = paths.len(), found = hashes.len(), "Fetched stored hashes");
        Ok(hashes)
      })
      .await
  }

  /// Upsert a note and replace its embedding in one transaction.
  ///
  /// Readers never observe the note row without its embedding row or vice versa.
  pub async fn store_note(&self, note: NoteRecord) -> Result<()> {
    self.ensure_writable("store_note")?;
    self.ensure_dimensions(&note.embedding)?;

    self
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let note_id: i64 = tx.query_row(
          "INSERT INTO notes (path, vault_name, last_modified, content_hash) VALUES (?1, ?2, ?3, ?4)
           ON CONFLICT(vault_name, path) DO UPDATE SET
             last_modified = excluded.last_modified,
             content_hash = excluded.content_hash
           RETURNING id",
          params![note.path, note.vault, note.last_modified, note.content_hash],
          |row| row.get(0),
        )?;
        // vec0 rows cannot be updated in place
        tx.execute("DELETE FROM notes_vec WHERE note_id = ?1", [note_id])?;
        tx.execute(
          "INSERT INTO notes_vec (note_id, embedding) VALUES (?1, ?2)",
          params![note_id, embedding_to_blob(&note.embedding)],
        )?;
        tx.commit()?;
        trace!(vault = %note.vault, path = %note.path, note_id, "Stored note");
        Ok(())
      })
      .await
  }

  /// Remove a note and its embedding. Returns whether a note existed.
  pub async fn delete_note(&self, vault: &str, path: &str) -> Result<bool> {
    self.ensure_writable("delete_note")?;

    let vault = vault.to_string();
    let path = path.to_string();
    self
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
          "DELETE FROM notes_vec WHERE note_id IN (SELECT id FROM notes WHERE vault_name = ?1 AND path = ?2)",
          [&vault, &path],
        )?;
        let deleted = tx.execute("DELETE FROM notes WHERE vault_name = ?1 AND path = ?2", [&vault, &path])?;
        tx.commit()?;
        if deleted > 0 {
          debug!(vault = %vault, path = %path, "Deleted note");
        }
        Ok(deleted > 0)
      })
      .await
  }

  /// Every indexed relative path in a vault
  pub async fn get_all_paths(&self, vault: &str) -> Result<Vec<String>> {
    let vault = vault.to_string();
    self
      .call(move |conn| {
        let mut stmt = conn.prepare_cached("SELECT path FROM notes WHERE vault_name = ?1 ORDER BY path")?;
        let paths = stmt
          .query_map([&vault], |row| row.get::<_, String>(0))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(paths)
      })
      .await
  }

  /// The `k` nearest notes to `embedding`, by ascending distance.
  ///
  /// `k` is bound inside the vector query itself; vec0 requires it.
  pub async fn search(&self, embedding: &[f32], k: usize) -> Result<Vec<SearchHit>> {
    if k == 0 {
      return Ok(Vec::new());
    }
    self.ensure_dimensions(embedding)?;

    let blob = embedding_to_blob(embedding);
    let k = i64::try_from(k).unwrap_or(i64::MAX);
    self
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(
          "WITH knn AS (
             SELECT note_id, distance FROM notes_vec
             WHERE embedding MATCH ?1 AND k = ?2
           )
           SELECT n.vault_name, n.path, knn.distance
           FROM knn JOIN notes n ON n.id = knn.note_id
           ORDER BY knn.distance",
        )?;
        let hits = stmt
          .query_map(params![blob, k], |row| {
            Ok(SearchHit {
              vault: row.get(0)?,
              path: row.get(1)?,
              distance: row.get::<_, f64>(2)? as f32,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(hits)
      })
      .await
  }
}
