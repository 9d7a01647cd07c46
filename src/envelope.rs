//! Task envelope - the append-only record that flows through every stage.
//!
//! Fields are grouped the way §3.1 groups them. Once a stage sets a field,
//! downstream stages must preserve it verbatim; we enforce that by making
//! every setter additive (`Option<T>` fields are only ever widened from
//! `None` to `Some`, never reset back to `None` by a later stage).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `new` for a never-before-seen URL, `edit` for a changed one, `delete` for
/// a tombstone. Set exclusively by the persister (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexOperation {
    New,
    Edit,
    Delete,
}

/// An `{src, alt}` pair extracted from an `<img>` tag.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageRef {
    pub src: String,
    pub alt: Option<String>,
}

/// Open Graph metadata lifted from `<meta property="og:*">` tags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenGraph {
    pub title: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
    pub site_name: Option<String>,
    pub og_type: Option<String>,
}

/// The task envelope (§3.1). `url` and `site_id` are the only fields every
/// producer is required to set; everything else is populated progressively
/// as the envelope moves fetch -> clean -> persist -> index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    // --- Identity & routing ---
    pub url: String,
    pub site_id: String,
    pub crawler_id: Option<String>,
    pub crawler_type: Option<String>,
    #[serde(default)]
    pub crawler_config: HashMap<String, String>,

    // --- Content ---
    /// Raw fetched bytes. Base64-encoded on the wire (§6.5) since the queue
    /// backend's transport is JSON text, not binary-safe.
    #[serde(default, with = "base64_bytes")]
    pub content: Option<Vec<u8>>,
    #[serde(default)]
    pub clean_content: Option<String>,
    pub mimetype: Option<String>,
    pub status_code: Option<u16>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub links: Vec<String>,

    // --- Metadata ---
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub open_graph: OpenGraph,
    #[serde(default)]
    pub h1: Vec<String>,
    #[serde(default)]
    pub h2: Vec<String>,
    #[serde(default)]
    pub images: Vec<ImageRef>,

    // --- Dedup & versioning ---
    pub content_hash: Option<String>,
    pub version: Option<u32>,
    pub index_operation: Option<IndexOperation>,

    // --- Timestamps ---
    pub timestamp: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskEnvelope {
    /// Seed a fresh envelope for a URL entering the pipeline at `url-queue`.
    pub fn seed(url: impl Into<String>, site_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            url: url.into(),
            site_id: site_id.into(),
            crawler_id: None,
            crawler_type: None,
            crawler_config: HashMap::new(),
            content: None,
            clean_content: None,
            mimetype: None,
            status_code: None,
            headers: HashMap::new(),
            links: Vec::new(),
            title: None,
            description: None,
            keywords: Vec::new(),
            open_graph: OpenGraph::default(),
            h1: Vec::new(),
            h2: Vec::new(),
            images: Vec::new(),
            content_hash: None,
            version: None,
            index_operation: None,
            timestamp: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Stamp `updated_at` to now. Call this from every stage before
    /// re-enqueueing downstream.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// `serde` helper base64-encoding `Option<Vec<u8>>` as a string, so binary
/// content survives the JSON round trip through the queue backend (§6.5).
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, ser: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => STANDARD.encode(bytes).serialize(ser),
            None => ser.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Option<Vec<u8>>, D::Error> {
        let raw: Option<String> = Option::deserialize(de)?;
        match raw {
            Some(s) => STANDARD
                .decode(&s)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_round_trips_through_base64_json() {
        let mut env = TaskEnvelope::seed("https://example.com/", "demo");
        env.content = Some(vec![0, 159, 146, 150, 255]);
        let json = serde_json::to_string(&env).unwrap();
        assert!(!json.contains("[0,159"), "bytes should be base64 text, not a JSON array");
        let parsed: TaskEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.content, env.content);
    }

    #[test]
    fn seed_sets_identity_only() {
        let env = TaskEnvelope::seed("https://example.com/", "demo");
        assert_eq!(env.url, "https://example.com/");
        assert_eq!(env.site_id, "demo");
        assert!(env.content.is_none());
        assert!(env.content_hash.is_none());
    }
}
