//! Writer election lock row
//!
//! A singleton `primary_lock` row records which instance may write and when it
//! last proved it was alive. Every state change is a single conditioned
//! statement so that races between processes are settled by SQLite, never by a
//! read-then-write in this process:
//!
//! - claim: upsert that only overwrites when the caller already holds the row
//!   or the recorded heartbeat is older than the stale threshold
//! - heartbeat: update conditioned on `holder = me`
//! - release: delete conditioned on `holder = me`
//!
//! Timestamps are wall-clock seconds since the Unix epoch, supplied by the caller.

use rusqlite::{OptionalExtension, TransactionBehavior, params};
use tracing::{debug, info};

use super::{Result, VectorStore};

/// Current lock row
#[derive(Debug, Clone, PartialEq)]
pub struct LockHolder {
  pub holder: String,
  pub heartbeat: f64,
}

/// Result of a claim attempt
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
  /// No one held the lock
  Claimed,
  /// We already held it; heartbeat refreshed
  Refreshed,
  /// Took over from a holder whose heartbeat was `age` seconds old
  TookOver { previous: String, age: f64 },
  /// Another live instance holds it
  Held { holder: String, age: f64 },
}

impl ClaimOutcome {
  pub fn is_claimed(&self) -> bool {
    !matches!(self, ClaimOutcome::Held { .. })
  }
}

impl VectorStore {
  /// Try to become (or stay) the primary.
  ///
  /// Succeeds when the row is absent, already ours, or its heartbeat is more
  /// than `stale_threshold` seconds older than `now`. Of several instances
  /// racing to take over the same stale row, exactly one succeeds.
  pub async fn try_claim_primary(&self, instance_id: &str, now: f64, stale_threshold: f64) -> Result<ClaimOutcome> {
    self.ensure_writable("try_claim_primary")?;

    let instance_id = instance_id.to_string();
    self
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let previous = read_holder(&tx)?;

        let changed = tx.execute(
          "INSERT INTO primary_lock (id, holder, heartbeat) VALUES (1, ?1, ?2)
           ON CONFLICT(id) DO UPDATE SET
             holder = excluded.holder,
             heartbeat = excluded.heartbeat
           WHERE primary_lock.holder = excluded.holder
              OR excluded.heartbeat - primary_lock.heartbeat > ?3",
          params![instance_id, now, stale_threshold],
        )?;
        tx.commit()?;

        let outcome = match (changed, previous) {
          (0, Some(prev)) => ClaimOutcome::Held {
            age: now - prev.heartbeat,
            holder: prev.holder,
          },
          // Unreachable under the immediate transaction; the row vanished under us
          (0, None) => ClaimOutcome::Held {
            holder: String::new(),
            age: 0.0,
          },
          (_, None) => ClaimOutcome::Claimed,
          (_, Some(prev)) if prev.holder == instance_id => ClaimOutcome::Refreshed,
          (_, Some(prev)) => ClaimOutcome::TookOver {
            age: now - prev.heartbeat,
            previous: prev.holder,
          },
        };
        debug!(instance = %instance_id, ?outcome, "Primary claim attempt");
        Ok(outcome)
      })
      .await
  }

  /// Refresh our heartbeat. `false` means another instance holds the lock now.
  pub async fn update_heartbeat(&self, instance_id: &str, now: f64) -> Result<bool> {
    self.ensure_writable("update_heartbeat")?;

    let instance_id = instance_id.to_string();
    self
      .call(move |conn| {
        let changed = conn.execute(
          "UPDATE primary_lock SET heartbeat = ?2 WHERE id = 1 AND holder = ?1",
          params![instance_id, now],
        )?;
        Ok(changed > 0)
      })
      .await
  }

  /// Delete the lock row if we hold it. Returns whether it was ours.
  pub async fn release_primary(&self, instance_id: &str) -> Result<bool> {
    self.ensure_writable("release_primary")?;

    let instance_id = instance_id.to_string();
    self
      .call(move |conn| {
        let changed = conn.execute("DELETE FROM primary_lock WHERE id = 1 AND holder = ?1", [&instance_id])?;
        if changed > 0 {
          info!(instance = %instance_id, "Released primary lock");
        }
        Ok(changed > 0)
      })
      .await
  }

  /// Whether the lock is free to take: no row, or a heartbeat older than the threshold
  pub async fn is_primary_stale(&self, stale_threshold: f64, now: f64) -> Result<bool> {
    Ok(match self.primary_holder().await? {
      None => true,
      Some(holder) => now - holder.heartbeat > stale_threshold,
    })
  }

  pub async fn primary_holder(&self) -> Result<Option<LockHolder>> {
    self.call(|conn| read_holder(conn)).await
  }
}

fn read_holder(conn: &rusqlite::Connection) -> Result<Option<LockHolder>> {
  let holder = conn
    .query_row("SELECT holder, heartbeat FROM primary_lock WHERE id = 1", [], |row| {
      Ok(LockHolder {
        holder: row.get(0)?,
        heartbeat: row.get(1)?,
      })
    })
    .optional()?;
  Ok(holder)
}
