//! End-to-end pipeline scenarios against a real Redis instance (spec §8
//! S1-S3), following the teacher's `tests/migration_parity.rs` convention of
//! plain `#[tokio::test]`s with `tempfile` for scratch state. Unlike that
//! test, this one talks to an external service, so it skips (rather than
//! fails) when no Redis is reachable at `SITESEARCH_TEST_REDIS_URL` (default
//! `redis://127.0.0.1:6379`) - the same "skip-if-unavailable" shape
//! SPEC_FULL.md §D describes for this crate's own Redis-backed integration
//! tests.
//!
//! These drive `clean -> persist -> index` by hand (dequeue, handler,
//! complete/enqueue) rather than through `StageLoop`, since `StageLoop`'s
//! `handle_one` is a private implementation detail exercised directly by
//! `worker::mod`'s own unit tests.

use std::sync::Arc;
use std::time::Duration;

use sitesearch::envelope::{IndexOperation, TaskEnvelope};
use sitesearch::queue::QueueManager;
use sitesearch::store::sqlite::SqliteDocumentStore;
use sitesearch::store::DocumentStore;
use sitesearch::worker::clean::CleanHandler;
use sitesearch::worker::index::{IndexHandler, LoggingVectorStore};
use sitesearch::worker::persist::PersistHandler;
use sitesearch::worker::{Handler, HandlerError};

async fn connect() -> Option<QueueManager> {
    let url = std::env::var("SITESEARCH_TEST_REDIS_URL")
        .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    match QueueManager::connect_redis(&url).await {
        Ok(manager) => Some(manager),
        Err(e) => {
            eprintln!("skipping pipeline_integration: no reachable Redis at {url} ({e})");
            None
        }
    }
}

fn run_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Drains one task from `queue_name`, runs it through `handler`, and either
/// completes it (forwarding any output envelope's caller-supplied fate) or
/// fails it - the literal §4.4 loop body, minus the blocking poll.
async fn process_one(
    queue: &QueueManager,
    queue_name: &str,
    handler: &dyn Handler,
) -> Result<Option<TaskEnvelope>, HandlerError> {
    let task = queue
        .dequeue(queue_name, false, Duration::from_millis(50))
        .await
        .expect("dequeue")
        .expect("a task should be pending");
    let result = handler.process(task.data, task.retry_count).await;
    match &result {
        Ok(_) => queue.complete_task(queue_name, &task.id, None).await.expect("complete_task"),
        Err(HandlerError::Transient(msg)) => {
            queue.fail_task(queue_name, &task.id, msg, false).await.expect("fail_task")
        }
        Err(HandlerError::Permanent(msg)) => {
            queue.fail_task(queue_name, &task.id, msg, false).await.expect("fail_task")
        }
    }
    result
}

fn fetched_envelope(url: &str, body: &str) -> TaskEnvelope {
    let mut env = TaskEnvelope::seed(url, "demo");
    env.mimetype = Some("text/plain".to_string());
    env.content = Some(body.as_bytes().to_vec());
    env.content_hash = Some(sitesearch::dedup::compute_content_hash(body.as_bytes()));
    env.status_code = Some(200);
    env
}

/// S1 + S2 + S3: first sighting is `new`, an identical re-fetch produces no
/// index-bound output, and a changed re-fetch is forwarded as `edit` with a
/// bumped version.
#[tokio::test]
async fn new_then_unchanged_then_edited_content_through_clean_persist_index() {
    let Some(queue) = connect().await else { return };

    let clean_queue = format!("clean-test-{}", run_id());
    let persist_queue = format!("persist-test-{}", run_id());
    let index_queue = format!("index-test-{}", run_id());
    let url = format!("https://example.com/{}", run_id());

    let db = tempfile::NamedTempFile::new().expect("tempfile");
    let store: Arc<dyn DocumentStore> =
        Arc::new(SqliteDocumentStore::open(db.path()).expect("open sqlite store"));

    let clean = CleanHandler::new();
    let persist = PersistHandler::new(store.clone());
    let index = IndexHandler::new(Default::default(), Arc::new(LoggingVectorStore));

    // S1: first sighting -> new, version 1, forwarded all the way to index.
    queue
        .enqueue(&clean_queue, fetched_envelope(&url, "hello world"), None)
        .await
        .expect("enqueue");
    let cleaned = process_one(&queue, &clean_queue, &clean).await.unwrap().expect("clean forwards");
    assert_eq!(cleaned.clean_content.as_deref(), Some("hello world"));

    queue.enqueue(&persist_queue, cleaned, None).await.expect("enqueue persist");
    let persisted = process_one(&queue, &persist_queue, &persist)
        .await
        .unwrap()
        .expect("first sighting is forwarded");
    assert_eq!(persisted.index_operation, Some(IndexOperation::New));
    assert_eq!(persisted.version, Some(1));

    queue.enqueue(&index_queue, persisted, None).await.expect("enqueue index");
    process_one(&queue, &index_queue, &index).await.unwrap();

    let clean_metrics = queue.get_queue_metrics(&clean_queue).await.unwrap();
    let index_metrics = queue.get_queue_metrics(&index_queue).await.unwrap();
    assert_eq!(clean_metrics.completed, 1);
    assert_eq!(index_metrics.completed, 1);

    // S2: re-fetching identical bytes re-runs clean (completed[clean]
    // increments) but the persister does not forward - index stays at 1.
    queue
        .enqueue(&clean_queue, fetched_envelope(&url, "hello world"), None)
        .await
        .expect("enqueue");
    let cleaned_again = process_one(&queue, &clean_queue, &clean).await.unwrap().expect("clean forwards");
    queue.enqueue(&persist_queue, cleaned_again, None).await.expect("enqueue persist");
    let persisted_again = process_one(&queue, &persist_queue, &persist).await.unwrap();
    assert!(persisted_again.is_none(), "unchanged content_hash must not forward to index");

    let clean_metrics = queue.get_queue_metrics(&clean_queue).await.unwrap();
    let index_metrics = queue.get_queue_metrics(&index_queue).await.unwrap();
    assert_eq!(clean_metrics.completed, 2);
    assert_eq!(index_metrics.completed, 1, "index completion count must not grow on a dedup skip");

    // S3: re-fetching mutated bytes is forwarded as an edit at version 2.
    queue
        .enqueue(&clean_queue, fetched_envelope(&url, "hello world, updated"), None)
        .await
        .expect("enqueue");
    let cleaned_edit = process_one(&queue, &clean_queue, &clean).await.unwrap().expect("clean forwards");
    queue.enqueue(&persist_queue, cleaned_edit, None).await.expect("enqueue persist");
    let persisted_edit = process_one(&queue, &persist_queue, &persist)
        .await
        .unwrap()
        .expect("changed content_hash is forwarded");
    assert_eq!(persisted_edit.index_operation, Some(IndexOperation::Edit));
    assert_eq!(persisted_edit.version, Some(2));

    queue.enqueue(&index_queue, persisted_edit, None).await.expect("enqueue index");
    process_one(&queue, &index_queue, &index).await.unwrap();
    let index_metrics = queue.get_queue_metrics(&index_queue).await.unwrap();
    assert_eq!(index_metrics.completed, 2);

    // Cleanup: pending lists are already drained; nothing else to clear.
    queue.clear_queue(&clean_queue).await.ok();
    queue.clear_queue(&persist_queue).await.ok();
    queue.clear_queue(&index_queue).await.ok();
}

/// S6: clearing a queue only empties its pending list, never processing.
#[tokio::test]
async fn clear_queue_leaves_in_flight_tasks_processing() {
    let Some(queue) = connect().await else { return };
    let queue_name = format!("clear-test-{}", run_id());

    for i in 0..5 {
        let env = fetched_envelope(&format!("https://example.com/{}/{i}", run_id()), "x");
        queue.enqueue(&queue_name, env, None).await.expect("enqueue");
    }
    // Lease one, leaving four pending.
    queue
        .dequeue(&queue_name, false, Duration::from_millis(50))
        .await
        .expect("dequeue")
        .expect("a task should be pending");

    queue.clear_queue(&queue_name).await.expect("clear_queue");

    let metrics = queue.get_queue_metrics(&queue_name).await.unwrap();
    assert_eq!(metrics.pending, 0, "clear_queue must empty the pending list");
    assert_eq!(metrics.processing, 1, "clear_queue must not touch the processing set");
}
