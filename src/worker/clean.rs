//! Cleaner `Handler` (§4.4): turns fetched bytes into `clean_content` plus
//! extracted metadata. The real HTML-to-markdown conversion algorithm and
//! PDF/Office extraction are Non-goals (§1) delegated to an external
//! collaborator; this handler only implements the minimal built-in
//! plaintext/HTML path and the dispatch-by-mimetype contract around it, so
//! the pipeline is runnable end-to-end without that collaborator wired in.

use std::sync::Arc;

use async_trait::async_trait;
use scraper::{Html, Selector};

use crate::dedup::compute_content_hash;
use crate::envelope::{ImageRef, OpenGraph, TaskEnvelope};
use crate::store::DocumentStore;
use crate::worker::{Handler, HandlerError};

pub struct CleanHandler {
    /// Read-only access to the persist stage's store, used only for the
    /// skip-conversion fast path (§4.4 "the cleaner SHOULD skip conversion
    /// and forward a pre-populated `clean_content`"). `None` disables the
    /// fast path and always converts.
    store: Option<Arc<dyn DocumentStore>>,
}

impl CleanHandler {
    pub fn new() -> Self {
        Self { store: None }
    }

    pub fn with_store(store: Arc<dyn DocumentStore>) -> Self {
        Self { store: Some(store) }
    }

    fn clean_html(envelope: &mut TaskEnvelope, body: &str) {
        let document = Html::parse_document(body);

        envelope.title = select_text(&document, "title");
        envelope.description = select_attr(&document, r#"meta[name="description"]"#, "content");
        envelope.open_graph = extract_open_graph(&document);
        envelope.h1 = select_all_text(&document, "h1");
        envelope.h2 = select_all_text(&document, "h2");
        envelope.images = extract_images(&document);
        envelope.clean_content = Some(strip_tags(&document));
    }

    fn clean_plaintext(envelope: &mut TaskEnvelope, body: &str) {
        envelope.clean_content = Some(body.to_string());
    }
}

impl Default for CleanHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Handler for CleanHandler {
    async fn process(&self, mut envelope: TaskEnvelope, _retry_count: u32) -> Result<Option<TaskEnvelope>, HandlerError> {
        let Some(content) = envelope.content.clone() else {
            return Err(HandlerError::Permanent("task has no fetched content".to_string()));
        };

        if let (Some(store), Some(hash)) = (&self.store, envelope.content_hash.as_deref()) {
            let existing = store
                .lookup(&envelope.url)
                .await
                .map_err(|e| HandlerError::Transient(format!("store lookup failed: {e}")))?;
            if let Some(record) = existing {
                if record.content_hash == hash {
                    if let Some(cached) = record.clean_content {
                        envelope.clean_content = Some(cached);
                        envelope.touch();
                        return Ok(Some(envelope));
                    }
                }
            }
        }

        let body = String::from_utf8_lossy(&content).into_owned();
        match envelope.mimetype.as_deref() {
            Some(m) if m.starts_with("text/html") => Self::clean_html(&mut envelope, &body),
            Some(m) if m.starts_with("text/") => Self::clean_plaintext(&mut envelope, &body),
            None => Self::clean_plaintext(&mut envelope, &body),
            Some(other) => {
                return Err(HandlerError::Permanent(format!(
                    "unsupported mimetype {other}: extraction requires an external collaborator"
                )));
            }
        }

        // content_hash was computed by the fetcher from the raw bytes; the
        // cleaner never recomputes it, since clean_content edits must not
        // change the dedup key (§4.5).
        if envelope.content_hash.is_none() {
            envelope.content_hash = Some(compute_content_hash(&content));
        }

        envelope.touch();
        Ok(Some(envelope))
    }
}

fn select_text(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn select_all_text(document: &Html, selector: &str) -> Vec<String> {
    let Ok(selector) = Selector::parse(selector) else {
        return Vec::new();
    };
    document
        .select(&selector)
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn select_attr(document: &Html, selector: &str, attr: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|el| el.value().attr(attr))
        .map(|s| s.to_string())
}

fn extract_open_graph(document: &Html) -> OpenGraph {
    let get = |prop: &str| select_attr(document, &format!(r#"meta[property="{prop}"]"#), "content");
    OpenGraph {
        title: get("og:title"),
        description: get("og:description"),
        image: get("og:image"),
        site_name: get("og:site_name"),
        og_type: get("og:type"),
    }
}

fn extract_images(document: &Html) -> Vec<ImageRef> {
    let Ok(selector) = Selector::parse("img[src]") else {
        return Vec::new();
    };
    document
        .select(&selector)
        .filter_map(|el| {
            el.value().attr("src").map(|src| ImageRef {
                src: src.to_string(),
                alt: el.value().attr("alt").map(|s| s.to_string()),
            })
        })
        .collect()
}

fn strip_tags(document: &Html) -> String {
    let Ok(body_selector) = Selector::parse("body") else {
        return document.root_element().text().collect::<Vec<_>>().join(" ");
    };
    document
        .select(&body_selector)
        .next()
        .map(|body| body.text().collect::<Vec<_>>().join(" "))
        .unwrap_or_default()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
