//! VectorStore - SQLite + sqlite-vec storage for notes, embeddings and the writer lock
//!
//! One file is shared by every process pointed at the same index. WAL journaling
//! and a bounded busy timeout let one writer and several readers work on it
//! concurrently; cross-process writer election goes through the `primary_lock`
//! row (see [`primary_lock`]).
//!
//! All methods are async and run the blocking SQLite calls on the blocking pool.
//! The handle is cheap to clone; clones share one connection.

mod notes;
mod primary_lock;
mod schema;

use std::{
  fmt,
  path::{Path, PathBuf},
  sync::{Arc, Mutex, Once},
};

pub use notes::{NoteRecord, SearchHit};
pub use primary_lock::{ClaimOutcome, LockHolder};
use rusqlite::{Connection, OpenFlags, ffi};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::embedding::ModelSpec;

#[derive(Error, Debug)]
pub enum DbError {
  #[error("SQLite error: {0}")]
  Sqlite(#[from] rusqlite::Error),
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("Write operation '{0}' attempted on a read-only store")]
  ReadOnly(&'static str),
  #[error("Store was built with model '{stored}' but '{configured}' is configured")]
  ModelMismatch { stored: String, configured: String },
  #[error("Store at {0} has not been initialized")]
  Uninitialized(PathBuf),
  #[error("Embedding has {got} dimensions, store expects {expected}")]
  Dimensions { expected: usize, got: usize },
  #[error("Database connection lock poisoned")]
  Poisoned,
  #[error("Blocking task failed: {0}")]
  Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Handle to the on-disk vector store
#[derive(Clone)]
pub struct VectorStore {
  inner: Arc<Inner>,
}

struct Inner {
  conn: Mutex<Connection>,
  path: PathBuf,
  model: ModelSpec,
  read_only: bool,
}

impl fmt::Debug for VectorStore {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("VectorStore")
      .field("path", &self.inner.path)
      .field("model", &self.inner.model.name)
      .field("read_only", &self.inner.read_only)
      .finish()
  }
}

/// Register sqlite-vec for every connection opened by this process
fn register_vec_extension() {
  static REGISTER: Once = Once::new();
  REGISTER.call_once(|| {
    type ExtensionInit = unsafe extern "C" fn(
      *mut ffi::sqlite3,
      *mut *mut std::os::raw::c_char,
      *const ffi::sqlite3_api_routines,
    ) -> std::os::raw::c_int;

    // SAFETY: sqlite3_vec_init is a standard SQLite extension entry point with
    // the signature expected by sqlite3_auto_extension.
    unsafe {
      let init = std::mem::transmute::<*const (), ExtensionInit>(sqlite_vec::sqlite3_vec_init as *const ());
      ffi::sqlite3_auto_extension(Some(init));
    }
  });
}

impl VectorStore {
  /// Open (or create) the store for writing.
  ///
  /// Discards files in an unrecognized legacy format, configures WAL, and
  /// migrates the schema to `model` (rebuilding when the stamped model differs).
  pub async fn open(path: impl Into<PathBuf>, model: ModelSpec) -> Result<Self> {
    let path = path.into();
    tokio::task::spawn_blocking(move || Self::open_blocking(path, model, false)).await?
  }

  /// Open an existing store for queries only.
  ///
  /// Never modifies the file. Fails if the store was built with a different model.
  pub async fn open_read_only(path: impl Into<PathBuf>, model: ModelSpec) -> Result<Self> {
    let path = path.into();
    tokio::task::spawn_blocking(move || Self::open_blocking(path, model, true)).await?
  }

  fn open_blocking(path: PathBuf, model: ModelSpec, read_only: bool) -> Result<Self> {
    register_vec_extension();

    let conn = if read_only {
      if !path.exists() {
        return Err(DbError::Uninitialized(path));
      }
      let conn = Connection::open_with_flags(
        &path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX,
      )?;
      schema::configure(&conn, true)?;
      match schema::stored_model(&conn)? {
        Some(stored) if stored == model.name => {}
        Some(stored) => {
          return Err(DbError::ModelMismatch {
            stored,
            configured: model.name.to_string(),
          });
        }
        None => return Err(DbError::Uninitialized(path)),
      }
      conn
    } else {
      if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
      {
        std::fs::create_dir_all(parent)?;
      }
      schema::discard_legacy(&path)?;

      let mut conn = Connection::open(&path)?;
      schema::configure(&conn, false)?;
      let outcome = schema::migrate(&mut conn, &model)?;
      debug!(path = %path.display(), ?outcome, "Schema ready");
      conn
    };

    info!(
      path = %path.display(),
      model = model.name,
      dimensions = model.dimensions,
      read_only,
      "Vector store opened"
    );

    Ok(Self {
      inner: Arc::new(Inner {
        conn: Mutex::new(conn),
        path,
        model,
        read_only,
      }),
    })
  }

  pub fn path(&self) -> &Path {
    &self.inner.path
  }

  pub fn model(&self) -> &ModelSpec {
    &self.inner.model
  }

  pub fn dimensions(&self) -> usize {
    self.inner.model.dimensions
  }

  pub fn is_read_only(&self) -> bool {
    self.inner.read_only
  }

  /// Model name stamped in the store's metadata
  pub async fn stored_model(&self) -> Result<Option<String>> {
    self.call(|conn| schema::stored_model(conn)).await
  }

  /// Run `f` against the connection on the blocking pool
  async fn call<T, F>(&self, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
  {
    let inner = self.inner.clone();
    tokio::task::spawn_blocking(move || {
      let mut conn = inner.conn.lock().map_err(|_| DbError::Poisoned)?;
      f(&mut conn)
    })
    .await?
  }

  /// Writes against a read-only handle are a caller bug and fail immediately
  fn ensure_writable(&self, operation: &'static str) -> Result<()> {
    if self.inner.read_only {
      error!(operation, path = %self.inner.path.display(), "Write attempted on read-only store");
      return Err(DbError::ReadOnly(operation));
    }
    Ok(())
  }

  fn ensure_dimensions(&self, embedding: &[f32]) -> Result<()> {
    let expected = self.inner.model.dimensions;
    if embedding.len() != expected {
      return Err(DbError::Dimensions {
        expected,
        got: embedding.len(),
      });
    }
    Ok(())
  }
}

/// Little-endian f32 blob, the input format sqlite-vec expects
pub(crate) fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
  embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}
