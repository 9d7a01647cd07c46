//! Redis-backed `RateLimiter`, adapted from the teacher's
//! `RedisRateLimitBackend::acquire` - same atomic "compute wait time, stamp
//! last_request_at, extend TTL" Lua script, narrowed to the one operation
//! the fetcher actually needs.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;

use super::RateLimiter;

const KEY_PREFIX: &str = "sitesearch:ratelimit:";
const DOMAIN_TTL_SECS: i64 = 86_400;

const ACQUIRE_SCRIPT: &str = r#"
local key = KEYS[1]
local now_ms = tonumber(ARGV[1])
local base_delay_ms = tonumber(ARGV[2])
local ttl = tonumber(ARGV[3])

local current_delay = tonumber(redis.call('HGET', key, 'current_delay_ms')) or base_delay_ms
local last_request = tonumber(redis.call('HGET', key, 'last_request_at')) or 0

local elapsed = now_ms - last_request
local wait_time = 0
if elapsed < current_delay then
    wait_time = current_delay - elapsed
end

local request_time = now_ms + wait_time
redis.call('HSET', key, 'last_request_at', request_time)
redis.call('HSETNX', key, 'current_delay_ms', base_delay_ms)
redis.call('EXPIRE', key, ttl)

return wait_time
"#;

pub struct RedisRateLimiter {
    conn: ConnectionManager,
}

impl RedisRateLimiter {
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    fn domain_key(domain: &str) -> String {
        format!("{KEY_PREFIX}domain:{domain}")
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn wait_turn(&self, domain: &str, base_delay_ms: u64) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let now_ms = chrono::Utc::now().timestamp_millis();

        let wait_ms: i64 = Script::new(ACQUIRE_SCRIPT)
            .key(Self::domain_key(domain))
            .arg(now_ms)
            .arg(base_delay_ms as i64)
            .arg(DOMAIN_TTL_SECS)
            .invoke_async(&mut conn)
            .await?;

        if wait_ms > 0 {
            tokio::time::sleep(Duration::from_millis(wait_ms as u64)).await;
        }
        Ok(())
    }
}
