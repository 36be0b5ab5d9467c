//! Redis-backed job queue (durable, survives process restarts).
//!
//! ## Keys
//!
//! - `{input_queue}`: list of ready ids (RPUSH at the tail, LPOP at the head)
//! - `{input_queue}:delayed`: sorted set of retried ids, scored by due time (ms)
//! - `{input_queue}:processing`: sorted set of leased ids, scored by lease deadline (ms)
//! - `{input_queue}:consumer`: owner token of the active worker, with a PX expiry
//! - `{input_queue}:dead`: list of claimed entries that are not task ids
//!
//! Claims and promotions run as Lua scripts so each one is atomic with
//! respect to other API processes and workers.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::{debug, error, instrument, warn};

use phonescan_core::TaskId;

use super::{JobQueue, QueueError};

/// How often an idle `dequeue` re-checks Redis while waiting.
const CLAIM_POLL_STEP: Duration = Duration::from_millis(250);

/// KEYS: ready, delayed, processing. ARGV: now_ms, lease_deadline_ms.
const CLAIM_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1])
for _, id in ipairs(due) do
  redis.call('ZREM', KEYS[2], id)
  redis.call('RPUSH', KEYS[1], id)
end
local id = redis.call('LPOP', KEYS[1])
if id then
  redis.call('ZADD', KEYS[3], ARGV[2], id)
end
return id
"#;

/// KEYS: ready, delayed. ARGV: now_ms. Returns ready + delayed.
const DEPTH_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1])
for _, id in ipairs(due) do
  redis.call('ZREM', KEYS[2], id)
  redis.call('RPUSH', KEYS[1], id)
end
return redis.call('LLEN', KEYS[1]) + redis.call('ZCARD', KEYS[2])
"#;

/// KEYS: processing, delayed. ARGV: task_id, due_ms.
const RETRY_SCRIPT: &str = r#"
redis.call('ZREM', KEYS[1], ARGV[1])
redis.call('ZADD', KEYS[2], ARGV[2], ARGV[1])
return 1
"#;

/// KEYS: processing, ready. ARGV: now_ms. Returns reclaimed ids in deadline order.
const RECLAIM_SCRIPT: &str = r#"
local expired = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
for _, id in ipairs(expired) do
  redis.call('ZREM', KEYS[1], id)
  redis.call('RPUSH', KEYS[2], id)
end
return expired
"#;

/// KEYS: consumer. ARGV: owner, ttl_ms.
const CONSUMER_CLAIM_SCRIPT: &str = r#"
local holder = redis.call('GET', KEYS[1])
if holder and holder ~= ARGV[1] then
  return 0
end
redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[2])
return 1
"#;

/// KEYS: consumer. ARGV: owner.
const CONSUMER_RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// KEYS: processing, dead. ARGV: raw entry.
const DEAD_LETTER_SCRIPT: &str = r#"
redis.call('ZREM', KEYS[1], ARGV[1])
redis.call('RPUSH', KEYS[2], ARGV[1])
return 1
"#;

#[derive(Clone)]
pub struct RedisJobQueue {
    conn: ConnectionManager,
    ready_key: String,
    delayed_key: String,
    processing_key: String,
    consumer_key: String,
    dead_key: String,
    lease_timeout: Duration,
}

impl core::fmt::Debug for RedisJobQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisJobQueue")
            .field("ready_key", &self.ready_key)
            .field("lease_timeout", &self.lease_timeout)
            .finish()
    }
}

impl RedisJobQueue {
    /// Connect to Redis.
    ///
    /// * `redis_url` - e.g. "redis://localhost:6379/0"
    /// * `input_queue` - key of the ready list (e.g. "ocr:input")
    pub async fn connect(
        redis_url: &str,
        input_queue: &str,
        lease_timeout: Duration,
    ) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(unavailable)?;
        let conn = ConnectionManager::new(client).await.map_err(unavailable)?;
        Ok(Self::with_connection(conn, input_queue, lease_timeout))
    }

    pub fn with_connection(conn: ConnectionManager, input_queue: &str, lease_timeout: Duration) -> Self {
        Self {
            conn,
            ready_key: input_queue.to_string(),
            delayed_key: format!("{input_queue}:delayed"),
            processing_key: format!("{input_queue}:processing"),
            consumer_key: format!("{input_queue}:consumer"),
            dead_key: format!("{input_queue}:dead"),
            lease_timeout,
        }
    }

    async fn try_claim(&self) -> Result<Option<TaskId>, QueueError> {
        let mut conn = self.conn.clone();
        let now = now_ms();
        let claimed: Option<String> = Script::new(CLAIM_SCRIPT)
            .key(&self.ready_key)
            .key(&self.delayed_key)
            .key(&self.processing_key)
            .arg(now)
            .arg(now + self.lease_timeout.as_millis() as i64)
            .invoke_async::<_, Option<String>>(&mut conn)
            .await
            .map_err(unavailable)?;

        let Some(raw) = claimed else {
            return Ok(None);
        };
        match parse_id(&raw) {
            Ok(task_id) => Ok(Some(task_id)),
            Err(e) => {
                self.dead_letter(&raw).await?;
                error!(entry = %raw, dead_key = %self.dead_key, "moved corrupt queue entry aside");
                Err(e)
            }
        }
    }

    async fn dead_letter(&self, raw: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        Script::new(DEAD_LETTER_SCRIPT)
            .key(&self.processing_key)
            .key(&self.dead_key)
            .arg(raw)
            .invoke_async::<_, i64>(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    #[instrument(skip(self), fields(queue = %self.ready_key), err)]
    async fn enqueue(&self, task_id: TaskId) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        let (ready, delayed): (usize, usize) = redis::pipe()
            .atomic()
            .cmd("RPUSH")
            .arg(&self.ready_key)
            .arg(task_id.to_string())
            .cmd("ZCARD")
            .arg(&self.delayed_key)
            .query_async::<_, (usize, usize)>(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(ready + delayed)
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<TaskId>, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if let Some(task_id) = self.try_claim().await? {
                debug!(task_id = %task_id, queue = %self.ready_key, "leased task");
                return Ok(Some(task_id));
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep((deadline - now).min(CLAIM_POLL_STEP)).await;
        }
    }

    async fn ack(&self, task_id: TaskId) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        redis::cmd("ZREM")
            .arg(&self.processing_key)
            .arg(task_id.to_string())
            .query_async::<_, i64>(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn retry(&self, task_id: TaskId, delay: Duration) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        Script::new(RETRY_SCRIPT)
            .key(&self.processing_key)
            .key(&self.delayed_key)
            .arg(task_id.to_string())
            .arg(now_ms() + delay.as_millis() as i64)
            .invoke_async::<_, i64>(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn claim_consumer(&self, owner: &str, ttl: Duration) -> Result<bool, QueueError> {
        let mut conn = self.conn.clone();
        let claimed: i64 = Script::new(CONSUMER_CLAIM_SCRIPT)
            .key(&self.consumer_key)
            .arg(owner)
            .arg(ttl.as_millis().max(1) as i64)
            .invoke_async::<_, i64>(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(claimed == 1)
    }

    async fn release_consumer(&self, owner: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        Script::new(CONSUMER_RELEASE_SCRIPT)
            .key(&self.consumer_key)
            .arg(owner)
            .invoke_async::<_, i64>(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn reclaim_expired(&self) -> Result<Vec<TaskId>, QueueError> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = Script::new(RECLAIM_SCRIPT)
            .key(&self.processing_key)
            .key(&self.ready_key)
            .arg(now_ms())
            .invoke_async::<_, Vec<String>>(&mut conn)
            .await
            .map_err(unavailable)?;

        // Unparseable entries are back on the ready list and get moved
        // aside when they are next claimed.
        Ok(ids
            .iter()
            .filter_map(|raw| match parse_id(raw) {
                Ok(task_id) => Some(task_id),
                Err(_) => {
                    warn!(entry = %raw, "reclaimed a corrupt queue entry");
                    None
                }
            })
            .collect())
    }

    async fn len(&self) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        Script::new(DEPTH_SCRIPT)
            .key(&self.ready_key)
            .key(&self.delayed_key)
            .arg(now_ms())
            .invoke_async::<_, usize>(&mut conn)
            .await
            .map_err(unavailable)
    }

    async fn ping(&self) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn parse_id(raw: &str) -> Result<TaskId, QueueError> {
    TaskId::from_str(raw).map_err(|e| QueueError::Corrupt(e.to_string()))
}

fn unavailable(e: redis::RedisError) -> QueueError {
    QueueError::Unavailable(e.to_string())
}
