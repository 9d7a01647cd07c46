//! Configuration management for the sitesearch pipeline.
//!
//! Layering follows the same order the rest of the ecosystem uses: built-in
//! defaults, overridden by an optional TOML file, overridden by environment
//! variables (loaded via `dotenvy` before parsing, consumed via `clap`'s
//! `env` attribute on the CLI). Config is resolved once in the orchestrator
//! process and handed to workers at spawn time as CLI flags - no in-memory
//! singleton ever crosses a process boundary (§9).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default refresh TTL before a persisted page is considered stale and
/// re-seeded by the scheduler (out of scope, but the constant is part of
/// the shared config surface).
pub const DEFAULT_REFRESH_TTL_DAYS: u64 = 14;

/// Per-stage tunables (§4.3 `start_workers`, §4.4 handler retry policy,
/// §5 `T_poll`/`ScaleTimeout`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Number of worker replicas to start for this stage.
    pub desired_count: usize,
    /// Maximum items fetched per `dequeue` poll (stages process one at a
    /// time today, but the knob is kept for future batching).
    pub batch_size: usize,
    /// How long a blocking `dequeue` waits for an item (`T_poll`, §5).
    #[serde(with = "duration_secs")]
    pub poll_interval: Duration,
    /// Retry ceiling for transient handler errors (§4.4, default 3 per §9
    /// Open Questions).
    pub retry_max: u32,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            desired_count: 1,
            batch_size: 1,
            poll_interval: Duration::from_secs(2),
            retry_max: 3,
        }
    }
}

/// Fetcher-specific tunables (§4.4 Fetcher contract).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherConfig {
    pub user_agent: String,
    /// URLs matching any of these are skipped (filtered + completed with a
    /// null output, §4.4).
    pub exclude_patterns: Vec<String>,
    /// If non-empty, only URLs matching one of these are fetched.
    pub include_patterns: Vec<String>,
    /// Follow links to other domains (`follow_external`).
    pub follow_external: bool,
    /// Discover additional URLs from `sitemap.xml` before returning.
    pub discover_sitemap: bool,
    pub base_delay_ms: u64,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: "sitesearch/0.1".to_string(),
            exclude_patterns: Vec::new(),
            include_patterns: Vec::new(),
            follow_external: false,
            discover_sitemap: true,
            base_delay_ms: 250,
        }
    }
}

/// Indexer-specific tunables (§4.4 Indexer contract). The vector store and
/// document store themselves are external collaborators (§1); this struct
/// only carries the connection/shape knobs the indexer needs to call them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    pub vector_store_url: Option<String>,
    pub chunk_size_chars: usize,
    pub chunk_overlap_chars: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            vector_store_url: None,
            chunk_size_chars: 2000,
            chunk_overlap_chars: 200,
        }
    }
}

/// Queue Monitor thresholds (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(with = "duration_secs")]
    pub sample_interval: Duration,
    #[serde(with = "duration_secs")]
    pub activity_timeout: Duration,
    pub max_pending_threshold: u64,
    pub max_error_rate: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(5),
            activity_timeout: Duration::from_secs(120),
            max_pending_threshold: 10_000,
            max_error_rate: 0.2,
        }
    }
}

/// Top-level settings resolved once by the orchestrator process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub redis_url: String,
    pub database_url: String,
    pub fetch: StageConfig,
    pub clean: StageConfig,
    pub persist: StageConfig,
    pub index: StageConfig,
    pub fetcher: FetcherConfig,
    pub indexer: IndexerConfig,
    pub monitor: MonitorConfig,
    #[serde(with = "duration_secs")]
    pub drain_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub scale_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            database_url: "sitesearch.db".to_string(),
            fetch: StageConfig::default(),
            clean: StageConfig::default(),
            persist: StageConfig::default(),
            index: StageConfig::default(),
            fetcher: FetcherConfig::default(),
            indexer: IndexerConfig::default(),
            monitor: MonitorConfig::default(),
            drain_timeout: Duration::from_secs(30),
            scale_timeout: Duration::from_secs(60),
        }
    }
}

impl Settings {
    /// Load settings the way the rest of the stack loads them: defaults,
    /// then an optional TOML file, then environment overrides for the two
    /// connection strings (the knobs workers most commonly need to override
    /// per-deployment).
    pub fn load(config_path: Option<&Path>) -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let mut settings = match config_path {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(path)?;
                toml::from_str(&raw)?
            }
            _ => Settings::default(),
        };

        if let Ok(url) = std::env::var("SITESEARCH_REDIS_URL") {
            settings.redis_url = url;
        }
        if let Ok(url) = std::env::var("SITESEARCH_DATABASE_URL") {
            settings.database_url = url;
        }

        Ok(settings)
    }

    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(
            self.database_url
                .strip_prefix("sqlite://")
                .unwrap_or(&self.database_url),
        )
    }

    pub fn stage(&self, stage: crate::worker::Stage) -> &StageConfig {
        use crate::worker::Stage;
        match stage {
            Stage::Fetch => &self.fetch,
            Stage::Clean => &self.clean,
            Stage::Persist => &self.persist,
            Stage::Index => &self.index,
        }
    }
}

/// `serde` helper for `Duration` as whole seconds, since TOML has no native
/// duration type.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(de)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_round_trip_toml() {
        let settings = Settings::default();
        let serialized = toml::to_string(&settings).expect("serialize");
        let parsed: Settings = toml::from_str(&serialized).expect("parse");
        assert_eq!(parsed.redis_url, settings.redis_url);
        assert_eq!(parsed.fetch.retry_max, settings.fetch.retry_max);
    }

    #[test]
    fn database_path_strips_sqlite_prefix() {
        let mut settings = Settings::default();
        settings.database_url = "sqlite:///var/lib/sitesearch.db".to_string();
        assert_eq!(
            settings.database_path(),
            PathBuf::from("/var/lib/sitesearch.db")
        );
    }
}
