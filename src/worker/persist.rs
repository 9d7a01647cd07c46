//! Persister `Handler` (§4.4): decides `new` / `edit` / unchanged by
//! consulting the document store on `(url, content_hash)`, and stamps
//! `version` + `index_operation` accordingly. Relational persistence
//! internals beyond that lookup/record contract are a Non-goal (§1).

use std::sync::Arc;

use async_trait::async_trait;

use crate::envelope::{IndexOperation, TaskEnvelope};
use crate::store::DocumentStore;
use crate::worker::{Handler, HandlerError};

pub struct PersistHandler {
    store: Arc<dyn DocumentStore>,
}

impl PersistHandler {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Handler for PersistHandler {
    async fn process(&self, mut envelope: TaskEnvelope, _retry_count: u32) -> Result<Option<TaskEnvelope>, HandlerError> {
        let Some(content_hash) = envelope.content_hash.clone() else {
            return Err(HandlerError::Permanent(
                "task has no content_hash; fetcher must set it before clean/persist".to_string(),
            ));
        };

        let existing = self
            .store
            .lookup(&envelope.url)
            .await
            .map_err(|e| HandlerError::Transient(format!("store lookup failed: {e}")))?;

        // Deletes are recognized by the fetcher observing a 404/410 on a
        // previously-known URL and fed straight into the persist stage
        // (§9 Open Question: delete propagation has no dedicated ingress
        // queue, so it rides the same `clean`-queue task as everything
        // else rather than requiring a fifth queue).
        let is_delete = matches!(envelope.status_code, Some(404) | Some(410));

        let (version, operation) = match (is_delete, existing) {
            (true, Some(record)) => (record.version + 1, IndexOperation::Delete),
            (true, None) => return Ok(None),
            (false, None) => (1, IndexOperation::New),
            (false, Some(record)) if record.content_hash == content_hash => {
                // Unchanged since last persist - nothing for the indexer to
                // do. §4.4: the persister completes the task with no
                // downstream output rather than re-indexing identical bytes.
                return Ok(None);
            }
            (false, Some(record)) => (record.version + 1, IndexOperation::Edit),
        };

        self.store
            .record(&envelope.url, &content_hash, version, envelope.clean_content.as_deref())
            .await
            .map_err(|e| HandlerError::Transient(format!("store record failed: {e}")))?;

        envelope.version = Some(version);
        envelope.index_operation = Some(operation);
        envelope.touch();
        Ok(Some(envelope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::sqlite::SqliteDocumentStore;
    use std::path::Path;

    fn envelope_with_hash(url: &str, hash: &str) -> TaskEnvelope {
        let mut env = TaskEnvelope::seed(url, "demo");
        env.content_hash = Some(hash.to_string());
        env
    }

    #[tokio::test]
    async fn first_sighting_is_a_new_operation_at_version_one() {
        let store: Arc<dyn DocumentStore> =
            Arc::new(SqliteDocumentStore::open(Path::new(":memory:")).unwrap());
        let handler = PersistHandler::new(store);

        let env = envelope_with_hash("https://example.com/", "hash-a");
        let out = handler.process(env, 0).await.unwrap().unwrap();
        assert_eq!(out.version, Some(1));
        assert_eq!(out.index_operation, Some(IndexOperation::New));
    }

    #[tokio::test]
    async fn changed_content_hash_bumps_version_as_edit() {
        let store: Arc<dyn DocumentStore> =
            Arc::new(SqliteDocumentStore::open(Path::new(":memory:")).unwrap());
        let handler = PersistHandler::new(store);

        handler
            .process(envelope_with_hash("https://example.com/", "hash-a"), 0)
            .await
            .unwrap();
        let out = handler
            .process(envelope_with_hash("https://example.com/", "hash-b"), 0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(out.version, Some(2));
        assert_eq!(out.index_operation, Some(IndexOperation::Edit));
    }

    #[tokio::test]
    async fn identical_content_hash_produces_no_output() {
        let store: Arc<dyn DocumentStore> =
            Arc::new(SqliteDocumentStore::open(Path::new(":memory:")).unwrap());
        let handler = PersistHandler::new(store);

        handler
            .process(envelope_with_hash("https://example.com/", "hash-a"), 0)
            .await
            .unwrap();
        let out = handler
            .process(envelope_with_hash("https://example.com/", "hash-a"), 0)
            .await
            .unwrap();
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn a_404_on_a_known_url_produces_a_delete_operation() {
        let store: Arc<dyn DocumentStore> =
            Arc::new(SqliteDocumentStore::open(Path::new(":memory:")).unwrap());
        let handler = PersistHandler::new(store);

        handler
            .process(envelope_with_hash("https://example.com/", "hash-a"), 0)
            .await
            .unwrap();

        let mut gone = envelope_with_hash("https://example.com/", "hash-a");
        gone.status_code = Some(404);
        let out = handler.process(gone, 0).await.unwrap().unwrap();
        assert_eq!(out.index_operation, Some(IndexOperation::Delete));
        assert_eq!(out.version, Some(2));
    }

    #[tokio::test]
    async fn missing_content_hash_is_a_permanent_error() {
        let store: Arc<dyn DocumentStore> =
            Arc::new(SqliteDocumentStore::open(Path::new(":memory:")).unwrap());
        let handler = PersistHandler::new(store);
        let env = TaskEnvelope::seed("https://example.com/", "demo");
        let err = handler.process(env, 0).await.unwrap_err();
        assert!(matches!(err, HandlerError::Permanent(_)));
    }
}
