//! Sqlite-backed `DocumentStore`, grounded on the teacher's
//! `repository::connect`/schema-init pattern (WAL mode, busy timeout) and
//! its `DocumentRepository` table shape, narrowed to the one table the
//! persist stage needs.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::Connection;

use super::{DocumentRecord, DocumentStore, StoreError};

pub struct SqliteDocumentStore {
    conn: Mutex<Connection>,
}

impl SqliteDocumentStore {
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path).map_err(|e| StoreError::Database(e.to_string()))?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 30000;

            CREATE TABLE IF NOT EXISTS documents (
                url TEXT PRIMARY KEY,
                content_hash TEXT NOT NULL,
                version INTEGER NOT NULL,
                clean_content TEXT,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn lookup(&self, url: &str) -> Result<Option<DocumentRecord>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            "SELECT content_hash, version, clean_content FROM documents WHERE url = ?1",
            [url],
            |row| {
                Ok(DocumentRecord {
                    content_hash: row.get(0)?,
                    version: row.get(1)?,
                    clean_content: row.get(2)?,
                })
            },
        );
        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e.to_string())),
        }
    }

    async fn record(
        &self,
        url: &str,
        content_hash: &str,
        version: u32,
        clean_content: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO documents (url, content_hash, version, clean_content, updated_at)
             VALUES (?1, ?2, ?3, ?4, CURRENT_TIMESTAMP)
             ON CONFLICT(url) DO UPDATE SET content_hash = excluded.content_hash,
                                             version = excluded.version,
                                             clean_content = excluded.clean_content,
                                             updated_at = excluded.updated_at",
            rusqlite::params![url, content_hash, version, clean_content],
        )
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_returns_none_for_unknown_url() {
        let store = SqliteDocumentStore::open(Path::new(":memory:")).unwrap();
        assert_eq!(store.lookup("https://example.com/").await.unwrap(), None);
    }

    #[tokio::test]
    async fn record_then_lookup_round_trips() {
        let store = SqliteDocumentStore::open(Path::new(":memory:")).unwrap();
        store.record("https://example.com/", "abc123", 1, None).await.unwrap();
        let record = store.lookup("https://example.com/").await.unwrap().unwrap();
        assert_eq!(record.content_hash, "abc123");
        assert_eq!(record.version, 1);
    }

    #[tokio::test]
    async fn record_upserts_to_a_new_version() {
        let store = SqliteDocumentStore::open(Path::new(":memory:")).unwrap();
        store.record("https://example.com/", "abc123", 1, None).await.unwrap();
        store.record("https://example.com/", "def456", 2, None).await.unwrap();
        let record = store.lookup("https://example.com/").await.unwrap().unwrap();
        assert_eq!(record.content_hash, "def456");
        assert_eq!(record.version, 2);
    }
}
