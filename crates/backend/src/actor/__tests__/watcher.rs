#[cfg(test)]
mod tests {
  use std::time::Duration;

  use pretty_assertions::assert_eq;
  use tokio::{
    sync::mpsc,
    time::{sleep, timeout},
  };
  use tokio_util::sync::CancellationToken;

  use crate::{
    actor::{
      __tests__::helpers::{VAULT, WorkerTestContext, wait_for},
      message::{IndexRequest, WorkItem},
      watcher::{WatcherConfig, WatcherTask},
    },
    domain::config::{IndexConfig, Role},
  };

  async fn next_item(rx: &mut mpsc::UnboundedReceiver<WorkItem>) -> WorkItem {
    timeout(Duration::from_secs(3), rx.recv())
      .await
      .expect("timeout waiting for work item")
      .expect("queue open")
  }

  #[tokio::test]
  async fn test_watcher_task_integration() {
    let ctx = WorkerTestContext::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    let config = WatcherConfig {
      vault: VAULT.to_string(),
      root: ctx.root().to_path_buf(),
      index: IndexConfig {
        watcher_debounce_ms: 50,
        ..Default::default()
      },
    };
    let task = WatcherTask::spawn(config, tx, cancel.clone()).expect("create watcher");

    // Give watcher time to initialize
    sleep(Duration::from_millis(100)).await;

    // Create
    let note = ctx.write_note("a.md", "hello").await;
    assert_eq!(next_item(&mut rx).await, WorkItem::Index(IndexRequest::new(VAULT, &note)));

    // Other file types are ignored
    ctx.write_note("scratch.txt", "ignored").await;

    // Rename: old path removed, new path indexed
    ctx.rename_note("a.md", "b.md").await;
    let removed_a = WorkItem::Remove {
      vault: VAULT.to_string(),
      path: "a.md".to_string(),
    };
    let indexed_b = WorkItem::Index(IndexRequest::new(VAULT, ctx.note_path("b.md")));
    let mut items = Vec::new();
    while !(items.contains(&removed_a) && items.contains(&indexed_b)) {
      items.push(next_item(&mut rx).await);
    }

    // Delete
    ctx.delete_note("b.md").await;
    loop {
      if let WorkItem::Remove { path, .. } = next_item(&mut rx).await {
        assert_eq!(path, "b.md");
        break;
      }
    }

    cancel.cancel();
    timeout(Duration::from_secs(2), task)
      .await
      .expect("watcher stops")
      .expect("watcher task");
  }

  #[tokio::test]
  async fn test_worker_watch_keeps_index_current() {
    let ctx = WorkerTestContext::new();
    let mut config = ctx.worker_config(Role::Primary);
    config.index.watch = true;
    let (handle, cancel) = ctx.spawn_worker(config).await;
    sleep(Duration::from_millis(100)).await;

    ctx.write_note("live.md", "written while watching").await;
    let worker = &handle;
    let indexed = wait_for(Duration::from_secs(5), || async move {
      worker.stats().await.map(|s| s.num_notes == 1).unwrap_or(false)
    })
    .await;
    assert!(indexed, "watcher queues the new note");

    ctx.delete_note("live.md").await;
    let removed = wait_for(Duration::from_secs(5), || async move {
      worker.stats().await.map(|s| s.num_notes == 0).unwrap_or(false)
    })
    .await;
    assert!(removed, "watcher queues the removal");

    handle.stop().await.unwrap();
    cancel.cancel();
  }

  #[tokio::test]
  async fn test_chained_rename_leaves_only_final_path() {
    let ctx = WorkerTestContext::new();
    ctx.write_note("a.md", "moving note").await;
    let mut config = ctx.worker_config(Role::Primary);
    config.index.watch = true;
    config.index.watcher_debounce_ms = 300;
    let (handle, cancel) = ctx.spawn_worker(config).await;
    handle.enqueue_all().await.unwrap();
    handle.flush().await.unwrap();
    sleep(Duration::from_millis(100)).await;

    // Both moves land inside one debounce window
    ctx.rename_note("a.md", "b.md").await;
    ctx.rename_note("b.md", "c.md").await;

    let store = ctx.open_store().await;
    let store = &store;
    let settled = wait_for(Duration::from_secs(5), || async move {
      store.get_all_paths(VAULT).await.map(|p| p == vec!["c.md".to_string()]).unwrap_or(false)
    })
    .await;
    assert!(settled, "paths: {:?}", store.get_all_paths(VAULT).await.unwrap());

    handle.stop().await.unwrap();
    cancel.cancel();
  }

  #[tokio::test]
  async fn test_delete_and_recreate_within_window_is_reindexed() {
    let ctx = WorkerTestContext::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let config = WatcherConfig {
      vault: VAULT.to_string(),
      root: ctx.root().to_path_buf(),
      index: IndexConfig {
        watcher_debounce_ms: 300,
        ..Default::default()
      },
    };
    let task = WatcherTask::spawn(config, tx, cancel.clone()).expect("create watcher");
    sleep(Duration::from_millis(100)).await;

    let note = ctx.write_note("a.md", "first").await;
    assert_eq!(next_item(&mut rx).await, WorkItem::Index(IndexRequest::new(VAULT, &note)));
    sleep(Duration::from_millis(400)).await;
    while rx.try_recv().is_ok() {}

    // Editors that save by replacing the file
    ctx.delete_note("a.md").await;
    ctx.write_note("a.md", "second").await;

    let mut items = Vec::new();
    while let Ok(Some(item)) = timeout(Duration::from_secs(1), rx.recv()).await {
      items.push(item);
    }
    assert!(items.contains(&WorkItem::Index(IndexRequest::new(VAULT, &note))), "{items:?}");
    assert!(!items.iter().any(|item| matches!(item, WorkItem::Remove { .. })), "{items:?}");

    cancel.cancel();
    timeout(Duration::from_secs(2), task)
      .await
      .expect("watcher stops")
      .expect("watcher task");
  }
}
