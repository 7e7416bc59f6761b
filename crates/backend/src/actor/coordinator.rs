//! Coordinator - decides whether this process may write the shared index
//!
//! Roles:
//! - `Primary` always writes, `Reader` never does; neither touches the lock row.
//! - `Auto` negotiates through the store's `primary_lock` row: claim it, then
//!   keep it alive from a heartbeat task. If a heartbeat update affects no row,
//!   another instance has taken over and this one drops to reader immediately.
//!
//! ```text
//! Unclaimed ──claim──▶ Primary ──heartbeat lost / stop()──▶ Unclaimed (reader)
//! ```
//!
//! `is_primary` is a local atomic read; it never touches the store. Store errors
//! during claim or heartbeat are logged and count as "not primary".

use std::{
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  time::{Duration, SystemTime, UNIX_EPOCH},
};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
  db::{ClaimOutcome, VectorStore},
  domain::config::Role,
};

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
pub const STALE_THRESHOLD: Duration = Duration::from_secs(15);
/// Bound on waiting for the heartbeat task during `stop()`
pub const HEARTBEAT_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Wall-clock seconds since the Unix epoch
pub fn unix_now() -> f64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs_f64())
    .unwrap_or(0.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorTiming {
  pub heartbeat_interval: Duration,
  pub stale_threshold: Duration,
  pub join_timeout: Duration,
}

impl Default for CoordinatorTiming {
  fn default() -> Self {
    Self {
      heartbeat_interval: HEARTBEAT_INTERVAL,
      stale_threshold: STALE_THRESHOLD,
      join_timeout: HEARTBEAT_JOIN_TIMEOUT,
    }
  }
}

struct Heartbeat {
  cancel: CancellationToken,
  task: JoinHandle<()>,
}

pub struct Coordinator {
  store: VectorStore,
  role: Role,
  instance_id: String,
  timing: CoordinatorTiming,
  primary: Arc<AtomicBool>,
  heartbeat: Option<Heartbeat>,
}

impl Coordinator {
  pub fn new(store: VectorStore, role: Role) -> Self {
    Self::with_timing(store, role, CoordinatorTiming::default())
  }

  pub(crate) fn with_timing(store: VectorStore, role: Role, timing: CoordinatorTiming) -> Self {
    Self {
      store,
      role,
      instance_id: Uuid::new_v4().to_string(),
      timing,
      primary: Arc::new(AtomicBool::new(false)),
      heartbeat: None,
    }
  }

  pub fn instance_id(&self) -> &str {
    &self.instance_id
  }

  /// First 8 characters of the instance id, for logs
  pub fn short_id(&self) -> &str {
    self.instance_id.get(..8).unwrap_or(&self.instance_id)
  }

  pub fn role(&self) -> Role {
    self.role
  }

  pub fn is_primary(&self) -> bool {
    match self.role {
      Role::Primary => true,
      Role::Reader => false,
      Role::Auto => self.primary.load(Ordering::Acquire),
    }
  }

  /// Establish the initial role. Auto mode makes one claim attempt.
  pub async fn start(&mut self) {
    match self.role {
      Role::Primary => info!(instance = self.short_id(), "Starting as primary (forced)"),
      Role::Reader => info!(instance = self.short_id(), "Starting as reader (forced)"),
      Role::Auto => {
        if self.try_claim().await {
          info!(instance = self.short_id(), "Starting as primary");
        } else {
          match self.store.primary_holder().await {
            Ok(Some(holder)) => info!(
              instance = self.short_id(),
              holder = holder.holder.get(..8).unwrap_or(&holder.holder),
              heartbeat_age_secs = unix_now() - holder.heartbeat,
              "Starting as reader, another instance is primary"
            ),
            _ => info!(instance = self.short_id(), "Starting as reader"),
          }
        }
      }
    }
  }

  /// Claim the primary role if the current holder is stale.
  ///
  /// Lets a reader pick up a crashed primary's work as soon as it notices
  /// pending work, instead of waiting for its own next poll.
  pub async fn check_and_maybe_claim_primary(&mut self) -> bool {
    match self.role {
      Role::Primary => return true,
      Role::Reader => return false,
      Role::Auto => {}
    }
    if self.primary.load(Ordering::Acquire) {
      return true;
    }

    let stale = match self
      .store
      .is_primary_stale(self.timing.stale_threshold.as_secs_f64(), unix_now())
      .await
    {
      Ok(stale) => stale,
      Err(e) => {
        warn!(instance = self.short_id(), err = %e, "Failed to check primary staleness");
        return false;
      }
    };
    if !stale {
      return false;
    }

    if self.try_claim().await {
      info!(instance = self.short_id(), "Promoted to primary");
      true
    } else {
      false
    }
  }

  async fn try_claim(&mut self) -> bool {
    let outcome = match self
      .store
      .try_claim_primary(&self.instance_id, unix_now(), self.timing.stale_threshold.as_secs_f64())
      .await
    {
      Ok(outcome) => outcome,
      Err(e) => {
        warn!(instance = self.short_id(), err = %e, "Primary claim failed");
        return false;
      }
    };

    match &outcome {
      ClaimOutcome::Claimed | ClaimOutcome::Refreshed => {}
      ClaimOutcome::TookOver { previous, age } => warn!(
        instance = self.short_id(),
        previous = previous.get(..8).unwrap_or(previous),
        heartbeat_age_secs = *age,
        "Took over from stale primary"
      ),
      ClaimOutcome::Held { holder, .. } => debug!(
        instance = self.short_id(),
        holder = holder.get(..8).unwrap_or(holder),
        "Primary lock held by another instance"
      ),
    }

    if outcome.is_claimed() {
      self.primary.store(true, Ordering::Release);
      self.start_heartbeat();
      true
    } else {
      false
    }
  }

  fn start_heartbeat(&mut self) {
    if let Some(old) = self.heartbeat.take() {
      old.cancel.cancel();
    }

    let cancel = CancellationToken::new();
    let task = tokio::spawn(heartbeat_loop(
      self.store.clone(),
      self.instance_id.clone(),
      self.timing.heartbeat_interval,
      self.primary.clone(),
      cancel.clone(),
    ));
    self.heartbeat = Some(Heartbeat { cancel, task });
  }

  /// Stop heartbeating and, if this is the auto-mode primary, release the lock.
  ///
  /// The heartbeat task is fully stopped before the release, so a late
  /// heartbeat can never re-assert a lock that was just deleted.
  pub async fn stop(&mut self) {
    if let Some(heartbeat) = self.heartbeat.take() {
      heartbeat.cancel.cancel();
      if tokio::time::timeout(self.timing.join_timeout, heartbeat.task).await.is_err() {
        warn!(instance = self.short_id(), "Heartbeat task did not stop in time");
      }
    }

    if self.role == Role::Auto && self.primary.swap(false, Ordering::AcqRel) {
      match self.store.release_primary(&self.instance_id).await {
        Ok(true) => info!(instance = self.short_id(), "Released primary role"),
        Ok(false) => debug!(instance = self.short_id(), "Primary lock was no longer ours"),
        Err(e) => warn!(instance = self.short_id(), err = %e, "Failed to release primary lock"),
      }
    }
  }

  /// Stop heartbeating without releasing, as a crashed process would
  #[cfg(test)]
  pub(crate) fn abandon(&mut self) {
    if let Some(heartbeat) = self.heartbeat.take() {
      heartbeat.task.abort();
    }
    self.primary.store(false, Ordering::Release);
  }
}

async fn heartbeat_loop(
  store: VectorStore,
  instance_id: String,
  interval: Duration,
  primary: Arc<AtomicBool>,
  cancel: CancellationToken,
) {
  let short = instance_id.get(..8).unwrap_or(&instance_id).to_string();
  let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
  ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

  loop {
    tokio::select! {
      biased;

      _ = cancel.cancelled() => {
        debug!(instance = %short, "Heartbeat stopped");
        break;
      }

      _ = ticker.tick() => {
        match store.update_heartbeat(&instance_id, unix_now()).await {
          Ok(true) => {}
          Ok(false) => {
            primary.store(false, Ordering::Release);
            warn!(instance = %short, "Lost primary role, another instance took over");
            break;
          }
          Err(e) => warn!(instance = %short, err = %e, "Heartbeat update failed"),
        }
      }
    }
  }
}
