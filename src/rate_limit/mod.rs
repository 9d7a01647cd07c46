//! Per-domain politeness control for the fetcher (SPEC_FULL.md §E).
//!
//! Not named by spec.md, which treats "content-fetching logic internals"
//! as an external collaborator - but a pipeline that fetches thousands of
//! URLs across many worker processes needs a shared, cross-process view of
//! "how soon can we hit this domain again", the same problem the teacher's
//! own rate limiter solves for its scrapers. Adapted from its
//! Lua-script-acquire idiom rather than its sqlite/in-memory backends,
//! since workers here are separate OS processes coordinating through Redis
//! anyway.

pub mod redis;

use std::time::Duration;

use async_trait::async_trait;

/// Delay-before-next-request coordination, shared across every fetch worker
/// process touching the same domain.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Block until it is this caller's turn to hit `domain`, given the
    /// domain's configured `base_delay_ms`.
    async fn wait_turn(&self, domain: &str, base_delay_ms: u64) -> anyhow::Result<()>;
}

/// No-op limiter for tests and for deployments with a single fetch worker.
pub struct NoopRateLimiter;

#[async_trait]
impl RateLimiter for NoopRateLimiter {
    async fn wait_turn(&self, _domain: &str, _base_delay_ms: u64) -> anyhow::Result<()> {
        Ok(())
    }
}

pub use self::redis::RedisRateLimiter;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_limiter_never_waits() {
        let limiter = NoopRateLimiter;
        limiter.wait_turn("example.com", 250).await.unwrap();
    }
}
