//! Document store seam (§4.4 "the persister consults a store keyed by
//! `(url, content_hash)`"). Relational persistence internals are a
//! Non-goal; this module only owns the narrow lookup/record contract the
//! persist stage depends on directly, plus a minimal sqlite-backed
//! implementation grounded on the teacher's own connection/schema-init
//! pattern so the crate is runnable standalone.

pub mod sqlite;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
}

/// What a prior sighting of a URL looked like. `clean_content` is an
/// optional cached copy of the last conversion's output, kept so the
/// cleaner can skip reconversion on an unchanged `content_hash` (§4.4
/// "the cleaner SHOULD skip conversion and forward a pre-populated
/// `clean_content`").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRecord {
    pub version: u32,
    pub content_hash: String,
    pub clean_content: Option<String>,
}

/// The `(url, content_hash)` -> version lookup the persist stage consults
/// to decide `new` / `edit` / unchanged (§4.4, §4.5), and the cleaner
/// consults read-only to skip redundant conversion.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn lookup(&self, url: &str) -> Result<Option<DocumentRecord>, StoreError>;
    async fn record(
        &self,
        url: &str,
        content_hash: &str,
        version: u32,
        clean_content: Option<&str>,
    ) -> Result<(), StoreError>;
}

pub use sqlite::SqliteDocumentStore;
