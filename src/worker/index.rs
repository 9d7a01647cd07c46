//! Indexer `Handler` (§4.4): chunks `clean_content` and hands chunks to an
//! abstract vector-store collaborator keyed by `index_operation`. Embedding
//! generation and the vector-store client itself are Non-goals (§1) - this
//! handler owns chunking and the upsert/delete dispatch contract around
//! them.

use async_trait::async_trait;

use crate::config::IndexerConfig;
use crate::envelope::{IndexOperation, TaskEnvelope};
use crate::worker::{Handler, HandlerError};

/// The abstract vector-store collaborator (§1): given a chunked document
/// this stage hands it a list of chunks to upsert, or the bare url to
/// delete. A real deployment wires in a client; tests use an in-memory
/// fake.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, url: &str, version: u32, chunks: &[String]) -> anyhow::Result<()>;
    async fn delete(&self, url: &str) -> anyhow::Result<()>;
}

/// Stand-in used when no real vector-store client is configured - logs the
/// operation instead of performing it, so the pipeline is runnable
/// end-to-end without that external collaborator wired in (§1).
pub struct LoggingVectorStore;

#[async_trait]
impl VectorStore for LoggingVectorStore {
    async fn upsert(&self, url: &str, version: u32, chunks: &[String]) -> anyhow::Result<()> {
        tracing::info!(url, version, chunks = chunks.len(), "vector store upsert (no client configured)");
        Ok(())
    }

    async fn delete(&self, url: &str) -> anyhow::Result<()> {
        tracing::info!(url, "vector store delete (no client configured)");
        Ok(())
    }
}

pub struct IndexHandler {
    config: IndexerConfig,
    vector_store: std::sync::Arc<dyn VectorStore>,
}

impl IndexHandler {
    pub fn new(config: IndexerConfig, vector_store: std::sync::Arc<dyn VectorStore>) -> Self {
        Self { config, vector_store }
    }

    fn chunk(&self, text: &str) -> Vec<String> {
        let size = self.config.chunk_size_chars.max(1);
        let overlap = self.config.chunk_overlap_chars.min(size.saturating_sub(1));
        let chars: Vec<char> = text.chars().collect();
        if chars.is_empty() {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        let mut start = 0;
        while start < chars.len() {
            let end = (start + size).min(chars.len());
            chunks.push(chars[start..end].iter().collect());
            if end == chars.len() {
                break;
            }
            start = end.saturating_sub(overlap).max(start + 1);
        }
        chunks
    }
}

#[async_trait]
impl Handler for IndexHandler {
    async fn process(&self, envelope: TaskEnvelope, _retry_count: u32) -> Result<Option<TaskEnvelope>, HandlerError> {
        let operation = envelope
            .index_operation
            .ok_or_else(|| HandlerError::Permanent("task has no index_operation".to_string()))?;

        match operation {
            IndexOperation::Delete => {
                self.vector_store
                    .delete(&envelope.url)
                    .await
                    .map_err(|e| HandlerError::Transient(format!("vector store delete failed: {e}")))?;
            }
            IndexOperation::New | IndexOperation::Edit => {
                let content = envelope
                    .clean_content
                    .as_deref()
                    .ok_or_else(|| HandlerError::Permanent("task has no clean_content".to_string()))?;
                let version = envelope
                    .version
                    .ok_or_else(|| HandlerError::Permanent("task has no version".to_string()))?;
                let chunks = self.chunk(content);

                self.vector_store
                    .upsert(&envelope.url, version, &chunks)
                    .await
                    .map_err(|e| HandlerError::Transient(format!("vector store upsert failed: {e}")))?;
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingStore {
        upserts: Mutex<Vec<(String, u32, usize)>>,
        deletes: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl VectorStore for RecordingStore {
        async fn upsert(&self, url: &str, version: u32, chunks: &[String]) -> anyhow::Result<()> {
            self.upserts.lock().unwrap().push((url.to_string(), version, chunks.len()));
            Ok(())
        }
        async fn delete(&self, url: &str) -> anyhow::Result<()> {
            self.deletes.lock().unwrap().push(url.to_string());
            Ok(())
        }
    }

    fn envelope(op: IndexOperation, content: &str, version: u32) -> TaskEnvelope {
        let mut env = TaskEnvelope::seed("https://example.com/", "demo");
        env.index_operation = Some(op);
        env.clean_content = Some(content.to_string());
        env.version = Some(version);
        env
    }

    #[test]
    fn chunking_respects_size_and_overlap() {
        let handler = IndexHandler::new(
            IndexerConfig { chunk_size_chars: 10, chunk_overlap_chars: 2, vector_store_url: None },
            Arc::new(RecordingStore::default()),
        );
        let chunks = handler.chunk(&"a".repeat(25));
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
    }

    #[tokio::test]
    async fn new_operation_upserts_chunks() {
        let store = Arc::new(RecordingStore::default());
        let handler = IndexHandler::new(IndexerConfig::default(), store.clone());
        handler
            .process(envelope(IndexOperation::New, "hello world", 1), 0)
            .await
            .unwrap();
        assert_eq!(store.upserts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_operation_does_not_require_clean_content() {
        let store = Arc::new(RecordingStore::default());
        let handler = IndexHandler::new(IndexerConfig::default(), store.clone());
        let mut env = TaskEnvelope::seed("https://example.com/", "demo");
        env.index_operation = Some(IndexOperation::Delete);
        handler.process(env, 0).await.unwrap();
        assert_eq!(store.deletes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_index_operation_is_a_permanent_error() {
        let handler = IndexHandler::new(IndexerConfig::default(), Arc::new(RecordingStore::default()));
        let env = TaskEnvelope::seed("https://example.com/", "demo");
        let err = handler.process(env, 0).await.unwrap_err();
        assert!(matches!(err, HandlerError::Permanent(_)));
    }
}
