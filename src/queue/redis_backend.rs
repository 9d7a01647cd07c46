//! Redis-backed `QueueBackend` (§3.3, §6.1).
//!
//! Uses a `ConnectionManager` for automatic reconnection, the same way the
//! teacher's rate limiter wraps its Redis connection, and Lua scripts for
//! the one operation that needs a read-modify-write across two keys
//! (recording the running average processing time on completion).

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use uuid::Uuid;

use super::backend::QueueBackend;
use super::error::QueueError;
use super::metrics::QueueMetrics;
use super::task::{QueueTask, TaskStatus};
use crate::envelope::TaskEnvelope;

/// Reserved key prefix (§3.3).
const PREFIX: &str = "sitesearch:";

fn key_pending(queue: &str) -> String {
    format!("{PREFIX}queue:{queue}")
}

fn key_processing(queue: &str) -> String {
    format!("{PREFIX}processing:{queue}")
}

fn key_completed(queue: &str) -> String {
    format!("{PREFIX}completed:{queue}")
}

fn key_failed(queue: &str) -> String {
    format!("{PREFIX}failed:{queue}")
}

fn key_meta(task_id: &str) -> String {
    format!("{PREFIX}task:meta:{task_id}")
}

fn key_stats(queue: &str) -> String {
    format!("{PREFIX}stats:{queue}")
}

/// Lua script recording a completion's duration into the queue's running
/// average processing time, matching the atomic-update-via-script idiom
/// used throughout the rate limiter.
const RECORD_COMPLETION_SCRIPT: &str = r#"
local count = tonumber(redis.call('HINCRBY', KEYS[1], 'sample_count', 1))
local old_avg = tonumber(redis.call('HGET', KEYS[1], 'avg_processing_time_ms') or '0')
local duration = tonumber(ARGV[1])
local new_avg = old_avg + (duration - old_avg) / count
redis.call('HSET', KEYS[1], 'avg_processing_time_ms', tostring(new_avg))
redis.call('HSET', KEYS[1], 'last_activity_time', ARGV[2])
return new_avg
"#;

pub struct RedisQueueBackend {
    conn: ConnectionManager,
}

impl RedisQueueBackend {
    pub async fn connect(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| QueueError::BackendUnavailable(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::BackendUnavailable(e.to_string()))?;
        Ok(Self { conn })
    }

    async fn load_task(&self, task_id: &str) -> Result<QueueTask, QueueError> {
        let mut conn = self.conn.clone();
        let fields: Vec<(String, String)> = conn.hgetall(key_meta(task_id)).await?;
        if fields.is_empty() {
            return Err(QueueError::NotFound(task_id.to_string()));
        }
        task_from_fields(task_id, fields)
    }

    async fn touch_stats(&self, queue: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .hset(key_stats(queue), "last_activity_time", Utc::now().to_rfc3339())
            .await?;
        Ok(())
    }
}

fn task_from_fields(task_id: &str, fields: Vec<(String, String)>) -> Result<QueueTask, QueueError> {
    let map: std::collections::HashMap<String, String> = fields.into_iter().collect();
    let get = |k: &str| map.get(k).cloned();

    let queue = get("queue").ok_or_else(|| QueueError::CorruptTask(task_id.to_string()))?;
    let status = get("status")
        .and_then(|s| TaskStatus::parse(&s))
        .ok_or_else(|| QueueError::CorruptTask(task_id.to_string()))?;
    let data_json = get("data").ok_or_else(|| QueueError::CorruptTask(task_id.to_string()))?;
    let data: TaskEnvelope = serde_json::from_str(&data_json)?;

    let parse_dt = |s: Option<String>| {
        s.and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    };

    Ok(QueueTask {
        id: task_id.to_string(),
        queue,
        status,
        data,
        created_at: parse_dt(get("created_at")).unwrap_or_else(Utc::now),
        updated_at: parse_dt(get("updated_at")).unwrap_or_else(Utc::now),
        started_at: parse_dt(get("started_at")),
        completed_at: parse_dt(get("completed_at")),
        error: get("error"),
        retry_count: get("retry_count").and_then(|s| s.parse().ok()).unwrap_or(0),
        result: get("result"),
    })
}

#[async_trait]
impl QueueBackend for RedisQueueBackend {
    async fn enqueue(
        &self,
        queue: &str,
        data: TaskEnvelope,
        task_id: Option<String>,
    ) -> Result<String, QueueError> {
        let id = task_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = Utc::now().to_rfc3339();
        let data_json = serde_json::to_string(&data)?;

        let mut conn = self.conn.clone();
        redis::pipe()
            .hset(key_meta(&id), "queue", queue)
            .ignore()
            .hset(key_meta(&id), "status", TaskStatus::Pending.as_str())
            .ignore()
            .hset(key_meta(&id), "data", data_json)
            .ignore()
            .hset(key_meta(&id), "created_at", &now)
            .ignore()
            .hset(key_meta(&id), "updated_at", &now)
            .ignore()
            .hset(key_meta(&id), "retry_count", 0)
            .ignore()
            .lpush(key_pending(queue), &id)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        Ok(id)
    }

    async fn dequeue(
        &self,
        queue: &str,
        block: bool,
        timeout: Duration,
    ) -> Result<Option<QueueTask>, QueueError> {
        let mut conn = self.conn.clone();

        let id: Option<String> = if block {
            let secs = timeout.as_secs_f64().max(0.0);
            let result: Option<(String, String)> = conn.brpop(key_pending(queue), secs).await?;
            result.map(|(_key, id)| id)
        } else {
            conn.rpop(key_pending(queue), None).await?
        };

        let Some(id) = id else {
            return Ok(None);
        };

        let now = Utc::now().to_rfc3339();
        redis::pipe()
            .hset(key_meta(&id), "status", TaskStatus::Processing.as_str())
            .ignore()
            .hset(key_meta(&id), "started_at", &now)
            .ignore()
            .hset(key_meta(&id), "updated_at", &now)
            .ignore()
            .sadd(key_processing(queue), &id)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        self.touch_stats(queue).await?;

        Ok(Some(self.load_task(&id).await?))
    }

    async fn complete_task(
        &self,
        queue: &str,
        task_id: &str,
        result: Option<String>,
    ) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();

        let status: Option<String> = conn.hget(key_meta(task_id), "status").await?;
        if status.as_deref() != Some(TaskStatus::Processing.as_str()) {
            // Not in processing - idempotent no-op (§4.1).
            return Ok(());
        }

        let started_at: Option<String> = conn.hget(key_meta(task_id), "started_at").await?;
        let now = Utc::now();
        let duration_ms = started_at
            .as_deref()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|started| (now - started.with_timezone(&Utc)).num_milliseconds().max(0))
            .unwrap_or(0);

        let mut pipe = redis::pipe();
        pipe.srem(key_processing(queue), task_id)
            .ignore()
            .sadd(key_completed(queue), task_id)
            .ignore()
            .hset(key_meta(task_id), "status", TaskStatus::Completed.as_str())
            .ignore()
            .hset(key_meta(task_id), "completed_at", now.to_rfc3339())
            .ignore()
            .hset(key_meta(task_id), "updated_at", now.to_rfc3339())
            .ignore();
        if let Some(result) = &result {
            pipe.hset(key_meta(task_id), "result", result).ignore();
        }
        pipe.query_async::<()>(&mut conn).await?;

        let script = Script::new(RECORD_COMPLETION_SCRIPT);
        let _: f64 = script
            .key(key_stats(queue))
            .arg(duration_ms)
            .arg(now.to_rfc3339())
            .invoke_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn fail_task(
        &self,
        queue: &str,
        task_id: &str,
        error: &str,
        retry: bool,
    ) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let now = Utc::now().to_rfc3339();

        if retry {
            redis::pipe()
                .srem(key_processing(queue), task_id)
                .ignore()
                .hincr(key_meta(task_id), "retry_count", 1)
                .ignore()
                .hdel(key_meta(task_id), "started_at")
                .ignore()
                .hset(key_meta(task_id), "status", TaskStatus::Pending.as_str())
                .ignore()
                .hset(key_meta(task_id), "error", error)
                .ignore()
                .hset(key_meta(task_id), "updated_at", &now)
                .ignore()
                .lpush(key_pending(queue), task_id)
                .ignore()
                .query_async::<()>(&mut conn)
                .await?;
        } else {
            redis::pipe()
                .srem(key_processing(queue), task_id)
                .ignore()
                .sadd(key_failed(queue), task_id)
                .ignore()
                .hset(key_meta(task_id), "status", TaskStatus::Failed.as_str())
                .ignore()
                .hset(key_meta(task_id), "error", error)
                .ignore()
                .hset(key_meta(task_id), "updated_at", &now)
                .ignore()
                .query_async::<()>(&mut conn)
                .await?;
        }

        self.touch_stats(queue).await?;
        Ok(())
    }

    async fn get_task_status(&self, task_id: &str) -> Result<QueueTask, QueueError> {
        self.load_task(task_id).await
    }

    async fn get_queue_metrics(&self, queue: &str) -> Result<QueueMetrics, QueueError> {
        let mut conn = self.conn.clone();
        let pending: u64 = conn.llen(key_pending(queue)).await?;
        let processing: u64 = conn.scard(key_processing(queue)).await?;
        let completed: u64 = conn.scard(key_completed(queue)).await?;
        let failed: u64 = conn.scard(key_failed(queue)).await?;

        let stats: std::collections::HashMap<String, String> =
            conn.hgetall(key_stats(queue)).await?;
        let avg_processing_time_ms = stats
            .get("avg_processing_time_ms")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.0);
        let last_activity_time = stats
            .get("last_activity_time")
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok(QueueMetrics {
            queue: queue.to_string(),
            pending,
            processing,
            completed,
            failed,
            avg_processing_time_ms,
            last_activity_time,
        })
    }

    async fn get_queue_length(&self, queue: &str) -> Result<u64, QueueError> {
        let mut conn = self.conn.clone();
        Ok(conn.llen(key_pending(queue)).await?)
    }

    async fn clear_queue(&self, queue: &str) -> Result<bool, QueueError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key_pending(queue)).await?;
        Ok(true)
    }

    async fn list_processing(&self, queue: &str) -> Result<Vec<QueueTask>, QueueError> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.smembers(key_processing(queue)).await?;
        let mut tasks = Vec::with_capacity(ids.len());
        for id in ids {
            match self.load_task(&id).await {
                Ok(task) => tasks.push(task),
                // A task can be removed from its meta hash (e.g. TTL'd or
                // raced with a concurrent complete/fail) between the
                // SMEMBERS read and the load; skip rather than fail the
                // whole sweep.
                Err(QueueError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(tasks)
    }
}
