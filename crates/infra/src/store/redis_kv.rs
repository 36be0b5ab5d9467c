//! Redis-backed task store.
//!
//! One string key per task (`{prefix}:{task_id}`) holding the JSON record,
//! written with `EX ttl`. Updates are compare-and-set on `Task::version`.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::warn;

use phonescan_core::{ExpectedVersion, Task, TaskId};

use super::{StoreError, TaskMutation, TaskStore};

/// Attempts before an update gives up with `StoreError::Conflict`.
const MAX_CAS_ATTEMPTS: usize = 5;

/// KEYS: record. ARGV: expected_version, json, ttl_secs.
/// Returns -1 when the record is gone, else the stored version (written iff equal).
const CAS_SCRIPT: &str = r#"
local cur = redis.call('GET', KEYS[1])
if not cur then return -1 end
local stored = tonumber(cjson.decode(cur)['version'])
if stored == tonumber(ARGV[1]) then
  redis.call('SET', KEYS[1], ARGV[2], 'EX', ARGV[3])
end
return stored
"#;

#[derive(Clone)]
pub struct RedisTaskStore {
    conn: ConnectionManager,
    prefix: String,
    ttl: Duration,
}

impl core::fmt::Debug for RedisTaskStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisTaskStore")
            .field("prefix", &self.prefix)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl RedisTaskStore {
    pub async fn connect(redis_url: &str, prefix: &str, ttl: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url).map_err(unavailable)?;
        let conn = ConnectionManager::new(client).await.map_err(unavailable)?;
        Ok(Self::with_connection(conn, prefix, ttl))
    }

    pub fn with_connection(conn: ConnectionManager, prefix: &str, ttl: Duration) -> Self {
        Self {
            conn,
            prefix: prefix.to_string(),
            ttl,
        }
    }

    fn key(&self, task_id: TaskId) -> String {
        format!("{}:{}", self.prefix, task_id)
    }

    fn ttl_secs(&self) -> u64 {
        self.ttl.as_secs().max(1)
    }
}

#[async_trait]
impl TaskStore for RedisTaskStore {
    async fn create(&self, task: &Task) -> Result<(), StoreError> {
        let json = encode(task)?;
        let mut conn = self.conn.clone();

        let written: Option<String> = redis::cmd("SET")
            .arg(self.key(task.task_id))
            .arg(json)
            .arg("NX")
            .arg("EX")
            .arg(self.ttl_secs())
            .query_async::<_, Option<String>>(&mut conn)
            .await
            .map_err(unavailable)?;

        match written {
            Some(_) => Ok(()),
            None => Err(StoreError::Duplicate(task.task_id)),
        }
    }

    async fn update(&self, task_id: TaskId, mutation: TaskMutation<'_>) -> Result<Task, StoreError> {
        let key = self.key(task_id);

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let current = self.get(task_id).await?.ok_or(StoreError::NotFound(task_id))?;
            let read_version = current.version;
            let expected = ExpectedVersion(read_version);

            let mut next = current;
            mutation(&mut next)?;
            let json = encode(&next)?;

            let mut conn = self.conn.clone();
            let stored: i64 = Script::new(CAS_SCRIPT)
                .key(&key)
                .arg(read_version)
                .arg(json)
                .arg(self.ttl_secs())
                .invoke_async::<_, i64>(&mut conn)
                .await
                .map_err(unavailable)?;

            if stored < 0 {
                return Err(StoreError::NotFound(task_id));
            }
            match expected.check(stored as u64) {
                Ok(()) => return Ok(next),
                Err(e) => warn!(task_id = %task_id, attempt, error = %e, "task write lost a race; retrying"),
            }
        }

        Err(StoreError::Conflict(task_id))
    }

    async fn get(&self, task_id: TaskId) -> Result<Option<Task>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(self.key(task_id))
            .query_async::<_, Option<String>>(&mut conn)
            .await
            .map_err(unavailable)?;

        raw.map(|json| serde_json::from_str(&json).map_err(|e| StoreError::Corrupt(e.to_string())))
            .transpose()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}

fn encode(task: &Task) -> Result<String, StoreError> {
    serde_json::to_string(task).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn unavailable(e: redis::RedisError) -> StoreError {
    StoreError::Unavailable(e.to_string())
}
