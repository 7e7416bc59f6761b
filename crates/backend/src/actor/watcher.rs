//! WatcherTask - Async vault watcher that feeds the worker's queue
//!
//! One task per watched vault. The watcher bridges notify's sync callbacks
//! with the async worker:
//! 1. notify's callback uses `blocking_send` to forward events to a channel
//! 2. The async task consumes events from that channel
//! 3. Events are debounced per path so an editor's burst of writes becomes one change
//! 4. Settled changes become [`WorkItem`]s on the worker's queue
//!
//! Dispatch per settled change:
//! - created / modified note → `Index`, or `Remove` if the path is gone by
//!   the time the change settles
//! - deleted note → `Remove` (by vault-relative path; nothing to embed)
//! - renamed → `Remove` of the old path, then `Index` of the new one if it
//!   still exists and is a note
//!
//! Paths without the note extension, or inside hidden directories, are ignored
//! by every handler.
//!
//! # Lifecycle
//!
//! The watcher runs until:
//! - The `CancellationToken` is triggered
//! - The event channel closes (notify watcher dropped)
//!
//! Pending changes are flushed to the queue before the task exits.

use std::{
  collections::HashMap,
  path::{Path, PathBuf},
  time::{Duration, Instant},
};

use notify::{
  Config, Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher,
  event::{ModifyKind, RenameMode},
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::message::{IndexRequest, WorkItem};
use crate::domain::{
  config::IndexConfig,
  vault::{has_extension, relative_key},
};

const MIN_DEBOUNCE: Duration = Duration::from_millis(10);

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct WatcherConfig {
  pub vault: String,
  /// Canonical vault root
  pub root: PathBuf,
  /// Index configuration (contains watcher settings)
  pub index: IndexConfig,
}

impl WatcherConfig {
  pub fn debounce(&self) -> Duration {
    Duration::from_millis(self.index.watcher_debounce_ms).max(MIN_DEBOUNCE)
  }

  pub fn poll_interval(&self) -> Duration {
    Duration::from_secs(self.index.watcher_poll_secs.max(1))
  }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
  #[error("Failed to initialize watcher: {0}")]
  Init(#[source] notify::Error),

  #[error("Failed to watch path: {0}")]
  Watch(#[source] notify::Error),
}

// ============================================================================
// Internal Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum ChangeKind {
  Created,
  Modified,
  Deleted,
  Renamed { from: PathBuf },
}

/// A pending change that is being debounced
#[derive(Debug)]
struct PendingChange {
  kind: ChangeKind,
  last_event: Instant,
}

impl PendingChange {
  fn new(kind: ChangeKind) -> Self {
    Self {
      kind,
      last_event: Instant::now(),
    }
  }

  /// Update the pending change with a new event, coalescing where appropriate.
  ///
  /// Returns the origin of a pending rename this event displaced; that path
  /// still has to be removed from the index.
  fn update(&mut self, kind: ChangeKind) -> Option<PathBuf> {
    self.last_event = Instant::now();

    match (&self.kind, &kind) {
      // Create followed by modify is still a create
      (ChangeKind::Created, ChangeKind::Modified) => {
        trace!("Coalescing create+modify -> create");
        None
      }
      // Delete followed by create is a modify (editors that save via replace)
      (ChangeKind::Deleted, ChangeKind::Created) => {
        self.kind = ChangeKind::Modified;
        trace!("Coalescing delete+create -> modified");
        None
      }
      // Create followed by delete: emit the delete to clean up
      (ChangeKind::Created, ChangeKind::Deleted) => {
        self.kind = ChangeKind::Deleted;
        trace!("Coalescing create+delete -> delete");
        None
      }
      // Rename followed by modify is still a rename
      (ChangeKind::Renamed { .. }, ChangeKind::Modified) => {
        trace!("Coalescing rename+modify -> rename");
        None
      }
      _ => match std::mem::replace(&mut self.kind, kind) {
        ChangeKind::Renamed { from } => Some(from),
        _ => None,
      },
    }
  }
}

/// Origin of a pending rename, if `change` is one
fn rename_origin(change: Option<PendingChange>) -> Option<PathBuf> {
  match change?.kind {
    ChangeKind::Renamed { from } => Some(from),
    _ => None,
  }
}

// ============================================================================
// WatcherTask
// ============================================================================

pub struct WatcherTask {
  config: WatcherConfig,
  queue: mpsc::UnboundedSender<WorkItem>,
  cancel: CancellationToken,
  // The notify watcher must be held to keep it alive
  _watcher: Box<dyn Watcher + Send>,
  // Channel receiving events from notify's sync callback
  event_rx: mpsc::Receiver<Result<Event, notify::Error>>,
}

impl WatcherTask {
  /// Create a new WatcherTask and start watching the vault root.
  ///
  /// The task is not started until `run()` is called.
  pub fn new(
    config: WatcherConfig,
    queue: mpsc::UnboundedSender<WorkItem>,
    cancel: CancellationToken,
  ) -> Result<Self, WatcherError> {
    let (event_tx, event_rx) = mpsc::channel::<Result<Event, notify::Error>>(256);

    // This runs on notify's thread - use blocking_send.
    // If the channel is closed the task is gone and the event is moot.
    let handler = move |res| {
      let _ = event_tx.blocking_send(res);
    };

    let mut watcher: Box<dyn Watcher + Send> = if config.index.watcher_polling {
      let notify_config = Config::default().with_poll_interval(config.poll_interval());
      Box::new(PollWatcher::new(handler, notify_config).map_err(WatcherError::Init)?)
    } else {
      Box::new(RecommendedWatcher::new(handler, Config::default()).map_err(WatcherError::Init)?)
    };

    watcher
      .watch(&config.root, RecursiveMode::Recursive)
      .map_err(WatcherError::Watch)?;

    info!(
      vault = %config.vault,
      root = %config.root.display(),
      polling = config.index.watcher_polling,
      "Watching vault"
    );

    Ok(Self {
      config,
      queue,
      cancel,
      _watcher: watcher,
      event_rx,
    })
  }

  pub fn spawn(
    config: WatcherConfig,
    queue: mpsc::UnboundedSender<WorkItem>,
    cancel: CancellationToken,
  ) -> Result<tokio::task::JoinHandle<()>, WatcherError> {
    let task = Self::new(config, queue, cancel)?;
    Ok(tokio::spawn(task.run()))
  }

  pub async fn run(mut self) {
    debug!(vault = %self.config.vault, "WatcherTask started");

    let mut pending: HashMap<PathBuf, PendingChange> = HashMap::new();
    let mut debounce_interval = tokio::time::interval(self.config.debounce());

    loop {
      tokio::select! {
          biased;

          _ = self.cancel.cancelled() => {
              debug!(vault = %self.config.vault, "WatcherTask shutting down (cancelled)");
              break;
          }

          event = self.event_rx.recv() => {
              match event {
                  Some(Ok(event)) => self.process_event(&mut pending, event),
                  Some(Err(e)) => warn!(vault = %self.config.vault, error = %e, "Watcher error"),
                  None => {
                      debug!(vault = %self.config.vault, "WatcherTask shutting down (channel closed)");
                      break;
                  }
              }
          }

          _ = debounce_interval.tick() => {
              self.flush_settled(&mut pending);
          }
      }
    }

    if !pending.is_empty() {
      debug!(pending = pending.len(), "Flushing remaining pending events on shutdown");
      for (path, change) in pending.drain() {
        self.dispatch(path, change.kind);
      }
    }

    info!(vault = %self.config.vault, "Stopped watching vault");
  }

  fn is_note(&self, path: &Path) -> bool {
    is_watched_note(&self.config.root, path, &self.config.index.extension)
  }

  /// Fold a notify event into the pending map
  fn process_event(&mut self, pending: &mut HashMap<PathBuf, PendingChange>, event: Event) {
    if let EventKind::Modify(ModifyKind::Name(RenameMode::Both)) = event.kind
      && let [from, to, ..] = event.paths.as_slice()
    {
      if to.is_dir() {
        return;
      }
      debug!(from = %from.display(), to = %to.display(), "Note renamed");
      // a.md -> b.md -> c.md inside one window: a.md is gone as well
      let displaced = [
        rename_origin(pending.remove(from)),
        rename_origin(pending.insert(to.clone(), PendingChange::new(ChangeKind::Renamed { from: from.clone() }))),
      ];
      for origin in displaced.into_iter().flatten() {
        self.send_remove(&origin);
      }
      return;
    }

    for path in &event.paths {
      if path.is_dir() {
        trace!(path = %path.display(), "Skipping directory event");
        continue;
      }

      let kind = match event.kind {
        EventKind::Create(_) => ChangeKind::Created,
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => ChangeKind::Deleted,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => ChangeKind::Created,
        EventKind::Modify(_) => ChangeKind::Modified,
        EventKind::Remove(_) => ChangeKind::Deleted,
        EventKind::Access(_) | EventKind::Any | EventKind::Other => {
          trace!(path = %path.display(), kind = ?event.kind, "Ignoring event");
          continue;
        }
      };

      if !self.is_note(path) {
        trace!(path = %path.display(), "Skipping non-note file");
        continue;
      }

      match pending.get_mut(path) {
        Some(existing) => {
          if let Some(origin) = existing.update(kind) {
            self.send_remove(&origin);
          }
        }
        None => {
          pending.insert(path.clone(), PendingChange::new(kind));
        }
      }
    }
  }

  /// Dispatch pending changes whose debounce period has passed
  fn flush_settled(&self, pending: &mut HashMap<PathBuf, PendingChange>) {
    let now = Instant::now();
    let debounce = self.config.debounce();

    let settled: Vec<PathBuf> = pending
      .iter()
      .filter(|(_, change)| now.duration_since(change.last_event) >= debounce)
      .map(|(path, _)| path.clone())
      .collect();

    for path in settled {
      if let Some(change) = pending.remove(&path) {
        self.dispatch(path, change.kind);
      }
    }
  }

  fn dispatch(&self, path: PathBuf, kind: ChangeKind) {
    match kind {
      ChangeKind::Created | ChangeKind::Modified => self.send_index(path),
      ChangeKind::Deleted => self.send_remove(&path),
      ChangeKind::Renamed { from } => {
        self.send_remove(&from);
        self.send_index(path);
      }
    }
  }

  fn send_index(&self, path: PathBuf) {
    if !self.is_note(&path) {
      return;
    }
    // Renames reported without their pair (FSEvents, polling) settle as a
    // change on a path that no longer exists
    if !path.exists() {
      trace!(path = %path.display(), "Changed note no longer exists, removing");
      self.send_remove(&path);
      return;
    }
    if !path.is_file() {
      return;
    }
    debug!(vault = %self.config.vault, path = %path.display(), "Queueing changed note");
    self.send(WorkItem::Index(IndexRequest::new(self.config.vault.clone(), path)));
  }

  fn send_remove(&self, path: &Path) {
    if !self.is_note(path) {
      return;
    }
    let Some(rel) = relative_key(&self.config.root, path) else {
      trace!(path = %path.display(), "Removed path is outside the vault");
      return;
    };
    debug!(vault = %self.config.vault, path = %rel, "Queueing removal");
    self.send(WorkItem::Remove {
      vault: self.config.vault.clone(),
      path: rel,
    });
  }

  fn send(&self, item: WorkItem) {
    if self.queue.send(item).is_err() {
      debug!(vault = %self.config.vault, "Worker queue closed, dropping change");
    }
  }
}

/// A note file outside hidden directories such as `.obsidian` or `.git`
fn is_watched_note(root: &Path, path: &Path, extension: &str) -> bool {
  let hidden = path
    .strip_prefix(root)
    .map(|rel| rel.components().any(|c| c.as_os_str().to_string_lossy().starts_with('.')))
    .unwrap_or(false);
  !hidden && has_extension(path, extension)
}
