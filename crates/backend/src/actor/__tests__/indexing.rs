//! Indexing tests: hash diffing, batched embedding, stale cleanup and the
//! worker's queue/search paths.

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use pretty_assertions::assert_eq;

  use crate::{
    actor::__tests__::helpers::{CountingEmbedder, VAULT, WorkerTestContext},
    domain::config::Role,
    embedding::{EmbeddingError, EmbeddingMode, EmbeddingProvider},
    service::{
      indexer::{IndexRequest, Indexer},
      scan::cleanup_stale,
    },
  };

  fn indexer(ctx: &WorkerTestContext, store: &crate::db::VectorStore) -> Indexer {
    Indexer::new(store.clone(), ctx.provider(), ctx.vaults.clone(), 16)
  }

  #[tokio::test]
  async fn test_incremental_reindex_only_embeds_changed_notes() {
    let ctx = WorkerTestContext::new();
    let store = ctx.open_store().await;
    let indexer = indexer(&ctx, &store);

    let a = ctx.write_note("a.md", "# Alpha\nfirst note").await;
    let b = ctx.write_note("b.md", "# Beta\nsecond note").await;
    let batch = vec![IndexRequest::new(VAULT, &a), IndexRequest::new(VAULT, &b)];

    let stats = indexer.ingest(batch.clone()).await.expect("first pass");
    assert_eq!(stats.indexed, 2);
    assert_eq!(ctx.embedder.texts(), 2);
    assert_eq!(store.num_notes().await.unwrap(), 2);

    ctx.write_note("a.md", "# Alpha\nfirst note, edited").await;
    let stats = indexer.ingest(batch).await.expect("second pass");
    assert_eq!(stats.indexed, 1);
    assert_eq!(stats.unchanged, 1);
    assert_eq!(ctx.embedder.texts(), 3, "only the edited note is re-embedded");
    assert_eq!(store.num_notes().await.unwrap(), 2);
  }

  #[tokio::test]
  async fn test_touched_note_with_same_content_is_not_embedded() {
    let ctx = WorkerTestContext::new();
    let store = ctx.open_store().await;
    let indexer = indexer(&ctx, &store);

    let a = ctx.write_note("a.md", "unchanging").await;
    indexer.ingest(vec![IndexRequest::new(VAULT, &a)]).await.unwrap();
    let calls = ctx.embedder.calls();

    ctx.touch_note("a.md");
    let stats = indexer.ingest(vec![IndexRequest::new(VAULT, &a)]).await.unwrap();
    assert_eq!(stats.unchanged, 1);
    assert_eq!(stats.indexed, 0);
    assert_eq!(ctx.embedder.calls(), calls);
  }

  #[tokio::test]
  async fn test_empty_batch_never_calls_embedder() {
    let ctx = WorkerTestContext::new();
    let store = ctx.open_store().await;

    let stats = indexer(&ctx, &store).ingest(Vec::new()).await.unwrap();
    assert_eq!(stats.requested, 0);
    assert_eq!(ctx.embedder.calls(), 0);
  }

  #[tokio::test]
  async fn test_vanished_file_is_dropped_from_batch() {
    let ctx = WorkerTestContext::new();
    let store = ctx.open_store().await;

    let a = ctx.write_note("a.md", "present").await;
    let gone = ctx.note_path("gone.md");
    let stats = indexer(&ctx, &store)
      .ingest(vec![IndexRequest::new(VAULT, &a), IndexRequest::new(VAULT, gone)])
      .await
      .expect("missing file is not fatal");

    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.indexed, 1);
  }

  /// Returns a vector of the wrong width for texts mentioning "corrupt"
  struct MalformedEmbedder(Arc<CountingEmbedder>);

  #[async_trait::async_trait]
  impl EmbeddingProvider for MalformedEmbedder {
    fn name(&self) -> &str {
      "malformed"
    }

    fn model_id(&self) -> &str {
      "malformed"
    }

    fn dimensions(&self) -> usize {
      self.0.dimensions()
    }

    async fn embed(&self, text: &str, mode: EmbeddingMode) -> Result<Vec<f32>, EmbeddingError> {
      self.0.embed(text, mode).await
    }

    async fn embed_batch(&self, texts: &[&str], mode: EmbeddingMode) -> Result<Vec<Vec<f32>>, EmbeddingError> {
      let mut vectors = self.0.embed_batch(texts, mode).await?;
      for (text, vector) in texts.iter().zip(vectors.iter_mut()) {
        if text.contains("corrupt") {
          vector.truncate(3);
        }
      }
      Ok(vectors)
    }
  }

  #[tokio::test]
  async fn test_store_failure_does_not_stop_batch() {
    let ctx = WorkerTestContext::new();
    let store = ctx.open_store().await;
    let embedder = Arc::new(MalformedEmbedder(ctx.embedder.clone()));
    let indexer = Indexer::new(store.clone(), embedder, ctx.vaults.clone(), 16);

    let a = ctx.write_note("a.md", "first fine note").await;
    let b = ctx.write_note("b.md", "corrupt middle note").await;
    let c = ctx.write_note("c.md", "last fine note").await;
    let stats = indexer
      .ingest(vec![
        IndexRequest::new(VAULT, &a),
        IndexRequest::new(VAULT, &b),
        IndexRequest::new(VAULT, &c),
      ])
      .await
      .expect("one bad note is not fatal");

    assert_eq!(stats.indexed, 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(
      store.get_all_paths(VAULT).await.unwrap(),
      vec!["a.md".to_string(), "c.md".to_string()]
    );
  }

  #[tokio::test]
  async fn test_duplicate_requests_in_batch_embed_once() {
    let ctx = WorkerTestContext::new();
    let store = ctx.open_store().await;

    let a = ctx.write_note("a.md", "twice").await;
    let stats = indexer(&ctx, &store)
      .ingest(vec![IndexRequest::new(VAULT, &a), IndexRequest::new(VAULT, &a)])
      .await
      .unwrap();

    assert_eq!(stats.indexed, 1);
    assert_eq!(ctx.embedder.texts(), 1);
  }

  #[tokio::test]
  async fn test_cleanup_removes_deleted_notes() {
    let ctx = WorkerTestContext::new();
    let store = ctx.open_store().await;
    let a = ctx.write_note("a.md", "keep").await;
    let b = ctx.write_note("b.md", "drop").await;
    indexer(&ctx, &store)
      .ingest(vec![IndexRequest::new(VAULT, &a), IndexRequest::new(VAULT, &b)])
      .await
      .unwrap();

    ctx.delete_note("b.md").await;
    let removed = cleanup_stale(&store, VAULT, ctx.root()).await.unwrap();

    assert_eq!(removed, 1);
    assert_eq!(store.get_all_paths(VAULT).await.unwrap(), vec!["a.md".to_string()]);
  }

  #[tokio::test]
  async fn test_worker_indexes_on_flush_and_reports_stats() {
    let ctx = WorkerTestContext::new();
    ctx.write_note("a.md", "alpha").await;
    ctx.write_note("daily/b.md", "beta").await;
    ctx.write_note(".obsidian/c.md", "hidden").await;
    ctx.write_note("notes.txt", "not a note").await;

    let (handle, cancel) = ctx.spawn_worker(ctx.worker_config(Role::Auto)).await;
    let queued = handle.enqueue_all().await.unwrap();
    assert_eq!(queued, 2);

    handle.flush().await.unwrap();

    let stats = handle.stats().await.unwrap();
    assert!(stats.is_primary);
    assert_eq!(stats.num_notes, 2);
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.totals.indexed, 2);
    assert!(stats.last_modified[VAULT].is_some());

    handle.stop().await.unwrap();
    cancel.cancel();
  }

  #[tokio::test]
  async fn test_worker_startup_reindex_and_cleanup() {
    let ctx = WorkerTestContext::new();
    ctx.write_note("a.md", "alpha").await;
    ctx.write_note("b.md", "beta").await;

    let mut config = ctx.worker_config(Role::Auto);
    config.index.reindex = true;
    let (handle, cancel) = ctx.spawn_worker(config.clone()).await;
    handle.flush().await.unwrap();
    assert_eq!(handle.stats().await.unwrap().num_notes, 2);
    handle.stop().await.unwrap();

    ctx.delete_note("b.md").await;
    let calls = ctx.embedder.calls();
    let (handle, _) = ctx.spawn_worker(config).await;
    handle.flush().await.unwrap();

    let stats = handle.stats().await.unwrap();
    assert_eq!(stats.num_notes, 1, "startup cleanup drops the deleted note");
    assert_eq!(stats.totals.unchanged, 1);
    assert_eq!(ctx.embedder.calls(), calls, "unchanged notes are not re-embedded");
    handle.stop().await.unwrap();
    cancel.cancel();
  }

  #[tokio::test]
  async fn test_removal_through_queue() {
    let ctx = WorkerTestContext::new();
    ctx.write_note("a.md", "alpha").await;
    ctx.write_note("b.md", "beta").await;

    let (handle, _cancel) = ctx.spawn_worker(ctx.worker_config(Role::Primary)).await;
    handle.enqueue_all().await.unwrap();
    handle.remove(VAULT, "b.md").unwrap();
    handle.flush().await.unwrap();

    assert_eq!(handle.stats().await.unwrap().num_notes, 1);
    handle.stop().await.unwrap();
  }

  #[tokio::test]
  async fn test_reader_never_writes() {
    let ctx = WorkerTestContext::new();
    ctx.write_note("a.md", "alpha").await;

    let (handle, _cancel) = ctx.spawn_worker(ctx.worker_config(Role::Reader)).await;
    handle.enqueue_all().await.unwrap();
    let flushed = handle.flush().await.unwrap();

    assert_eq!(flushed.indexed, 0);
    let stats = handle.stats().await.unwrap();
    assert!(!stats.is_primary);
    assert_eq!(stats.num_notes, 0);
    assert_eq!(ctx.embedder.calls(), 0);
    handle.stop().await.unwrap();
  }

  #[tokio::test]
  async fn test_search_enriches_from_live_files() {
    let ctx = WorkerTestContext::new();
    ctx
      .write_note(
        "rust.md",
        "---\ntags: [lang]\n---\n# Rust ownership\nBorrowing and lifetimes in rust ownership.\n## Moves\n",
      )
      .await;
    ctx.write_note("garden.md", "# Garden\nTomatoes and basil planting schedule.").await;

    let (handle, _cancel) = ctx.spawn_worker(ctx.worker_config(Role::Primary)).await;
    handle.enqueue_all().await.unwrap();
    handle.flush().await.unwrap();

    let results = handle.search("rust ownership", 2).await.unwrap();
    assert_eq!(results.len(), 2);
    let top = &results[0];
    assert_eq!(top.vault, VAULT);
    assert_eq!(top.path, "rust.md");
    assert_eq!(top.frontmatter, "tags: [lang]");
    assert_eq!(top.outline, vec!["# Rust ownership".to_string(), "## Moves".to_string()]);
    assert!(top.excerpt.starts_with("# Rust ownership"));
    assert!(results[0].score <= results[1].score);

    // A hit whose file disappeared is skipped, not an error
    ctx.delete_note("garden.md").await;
    let results = handle.search("tomatoes basil", 5).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].path, "rust.md");

    handle.stop().await.unwrap();
  }

  #[tokio::test]
  async fn test_search_limit_zero_is_empty() {
    let ctx = WorkerTestContext::new();
    let (handle, _cancel) = ctx.spawn_worker(ctx.worker_config(Role::Primary)).await;

    assert!(handle.search("anything", 0).await.unwrap().is_empty());
    handle.stop().await.unwrap();
  }

  #[tokio::test]
  async fn test_handle_after_stop() {
    let ctx = WorkerTestContext::new();
    let (handle, _cancel) = ctx.spawn_worker(ctx.worker_config(Role::Primary)).await;
    handle.stop().await.unwrap();

    assert!(handle.stats().await.is_err());
    assert!(handle.enqueue_vault("Work").await.is_err());
  }
}
