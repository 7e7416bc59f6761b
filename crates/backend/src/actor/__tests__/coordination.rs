//! Multi-instance coordination: claims, handoff on stop, stale takeover and
//! lost heartbeats.

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use pretty_assertions::assert_eq;

  use crate::{
    actor::{
      __tests__::helpers::{VAULT, WorkerTestContext, fast_timing, wait_for},
      coordinator::{Coordinator, unix_now},
    },
    domain::config::Role,
    service::indexer::{IndexRequest, Indexer},
  };

  async fn coordinator(ctx: &WorkerTestContext, role: Role) -> Coordinator {
    Coordinator::with_timing(ctx.open_store().await, role, fast_timing())
  }

  #[tokio::test]
  async fn test_only_one_auto_instance_is_primary() {
    let ctx = WorkerTestContext::new();
    let mut first = coordinator(&ctx, Role::Auto).await;
    let mut second = coordinator(&ctx, Role::Auto).await;

    first.start().await;
    second.start().await;

    assert!(first.is_primary());
    assert!(!second.is_primary());
    assert!(!second.check_and_maybe_claim_primary().await, "holder is alive");

    first.stop().await;
    second.stop().await;
  }

  #[tokio::test]
  async fn test_stop_hands_off_immediately() {
    let ctx = WorkerTestContext::new();
    let store = ctx.open_store().await;
    let mut first = coordinator(&ctx, Role::Auto).await;
    let mut second = coordinator(&ctx, Role::Auto).await;
    first.start().await;
    second.start().await;

    first.stop().await;
    assert!(!first.is_primary());
    assert_eq!(store.primary_holder().await.unwrap(), None);

    // No waiting for the stale threshold
    assert!(second.check_and_maybe_claim_primary().await);
    assert_eq!(
      store.primary_holder().await.unwrap().map(|h| h.holder),
      Some(second.instance_id().to_string())
    );
    second.stop().await;
  }

  #[tokio::test]
  async fn test_crashed_primary_is_taken_over_after_threshold() {
    let ctx = WorkerTestContext::new();
    let mut crashed = coordinator(&ctx, Role::Auto).await;
    let mut survivor = coordinator(&ctx, Role::Auto).await;
    crashed.start().await;
    survivor.start().await;
    assert!(crashed.is_primary());

    crashed.abandon();
    assert!(!survivor.check_and_maybe_claim_primary().await, "heartbeat still fresh");

    tokio::time::sleep(fast_timing().stale_threshold + Duration::from_millis(150)).await;
    assert!(survivor.check_and_maybe_claim_primary().await);
    assert!(survivor.is_primary());
    survivor.stop().await;
  }

  #[tokio::test]
  async fn test_lost_heartbeat_drops_to_reader() {
    let ctx = WorkerTestContext::new();
    let store = ctx.open_store().await;
    let mut coordinator = coordinator(&ctx, Role::Auto).await;
    coordinator.start().await;
    assert!(coordinator.is_primary());

    // Another instance steals the row from far in the future
    let outcome = store.try_claim_primary("intruder", unix_now() + 100.0, 15.0).await.unwrap();
    assert!(outcome.is_claimed());

    let watched = &coordinator;
    let dropped = wait_for(Duration::from_secs(2), || async move { !watched.is_primary() }).await;
    assert!(dropped, "heartbeat task notices the takeover");

    // Stopping must not delete the intruder's lock
    coordinator.stop().await;
    assert_eq!(
      store.primary_holder().await.unwrap().map(|h| h.holder),
      Some("intruder".to_string())
    );
  }

  #[tokio::test]
  async fn test_forced_roles_skip_the_lock() {
    let ctx = WorkerTestContext::new();
    let store = ctx.open_store().await;
    let mut primary = coordinator(&ctx, Role::Primary).await;
    let mut reader = coordinator(&ctx, Role::Reader).await;

    primary.start().await;
    reader.start().await;

    assert!(primary.is_primary());
    assert!(primary.check_and_maybe_claim_primary().await);
    assert!(!reader.is_primary());
    assert!(!reader.check_and_maybe_claim_primary().await);
    assert_eq!(store.primary_holder().await.unwrap(), None);

    primary.stop().await;
    reader.stop().await;
  }

  #[tokio::test]
  async fn test_reader_worker_promotes_and_catches_up() {
    let ctx = WorkerTestContext::new();
    ctx.write_note("a.md", "alpha").await;
    ctx.write_note("b.md", "beta").await;

    let mut crashed = coordinator(&ctx, Role::Auto).await;
    crashed.start().await;
    assert!(crashed.is_primary());

    let (handle, _cancel) = ctx.spawn_worker(ctx.worker_config(Role::Auto)).await;
    assert!(!handle.stats().await.unwrap().is_primary);

    crashed.abandon();
    let worker = &handle;
    let promoted = wait_for(Duration::from_secs(5), || async move {
      worker
        .stats()
        .await
        .map(|s| s.is_primary && s.num_notes == 2)
        .unwrap_or(false)
    })
    .await;
    assert!(promoted, "housekeeping claims the stale lock and indexes the vault");

    handle.stop().await.unwrap();
  }

  #[tokio::test]
  async fn test_worker_stop_releases_lock() {
    let ctx = WorkerTestContext::new();
    let store = ctx.open_store().await;
    let (handle, _cancel) = ctx.spawn_worker(ctx.worker_config(Role::Auto)).await;
    assert!(handle.stats().await.unwrap().is_primary);
    assert!(store.primary_holder().await.unwrap().is_some());

    handle.stop().await.unwrap();
    assert_eq!(store.primary_holder().await.unwrap(), None);
    assert!(handle.stats().await.is_err());
  }

  #[tokio::test]
  async fn test_removal_missed_as_reader_is_swept_on_promotion() {
    let ctx = WorkerTestContext::new();
    let store = ctx.open_store().await;
    let a = ctx.write_note("a.md", "alpha").await;
    let b = ctx.write_note("b.md", "beta").await;
    Indexer::new(store.clone(), ctx.provider(), ctx.vaults.clone(), 16)
      .ingest(vec![IndexRequest::new(VAULT, &a), IndexRequest::new(VAULT, &b)])
      .await
      .unwrap();

    let mut crashed = coordinator(&ctx, Role::Auto).await;
    crashed.start().await;
    let (handle, _cancel) = ctx.spawn_worker(ctx.worker_config(Role::Auto)).await;

    ctx.delete_note("b.md").await;
    handle.remove(VAULT, "b.md").unwrap();
    handle.flush().await.unwrap();
    assert_eq!(store.num_notes().await.unwrap(), 2, "a reader leaves the index alone");

    crashed.abandon();
    let worker = &handle;
    let swept = wait_for(Duration::from_secs(5), || async move {
      worker
        .stats()
        .await
        .map(|s| s.is_primary && s.num_notes == 1)
        .unwrap_or(false)
    })
    .await;
    assert!(swept, "catch-up removes the note deleted while reading");
    assert_eq!(store.get_all_paths(VAULT).await.unwrap(), vec!["a.md".to_string()]);

    handle.stop().await.unwrap();
  }
}
