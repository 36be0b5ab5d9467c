//! In-memory task store for tests/dev.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use phonescan_core::{Task, TaskId};

use super::{StoreError, TaskMutation, TaskStore};

#[derive(Debug, Clone)]
struct Entry {
    task: Task,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug)]
struct Records {
    tasks: HashMap<TaskId, Entry>,
    /// Earliest time the next `create` sweeps expired entries.
    next_sweep: Instant,
}

/// Records expire lazily: an expired entry is invisible to reads. Expired
/// entries are swept by `create` at most once per TTL.
#[derive(Debug)]
pub struct InMemoryTaskStore {
    records: RwLock<Records>,
    ttl: Duration,
}

impl InMemoryTaskStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            records: RwLock::new(Records {
                tasks: HashMap::new(),
                next_sweep: Instant::now() + ttl,
            }),
            ttl,
        }
    }

    /// Entries held, expired or not.
    pub fn held(&self) -> Result<usize, StoreError> {
        Ok(self.records.read().map_err(Self::poisoned)?.tasks.len())
    }

    pub fn arc(ttl: Duration) -> Arc<Self> {
        Arc::new(Self::new(ttl))
    }

    fn poisoned<T>(_: T) -> StoreError {
        StoreError::Unavailable("task map lock poisoned".to_string())
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, task: &Task) -> Result<(), StoreError> {
        let mut records = self.records.write().map_err(Self::poisoned)?;
        let now = Instant::now();
        if now >= records.next_sweep {
            records.tasks.retain(|_, entry| entry.is_live(now));
            records.next_sweep = now + self.ttl;
        }

        let tasks = &mut records.tasks;
        if tasks.get(&task.task_id).is_some_and(|entry| entry.is_live(now)) {
            return Err(StoreError::Duplicate(task.task_id));
        }
        tasks.insert(
            task.task_id,
            Entry {
                task: task.clone(),
                expires_at: now + self.ttl,
            },
        );
        Ok(())
    }

    async fn update(&self, task_id: TaskId, mutation: TaskMutation<'_>) -> Result<Task, StoreError> {
        let mut records = self.records.write().map_err(Self::poisoned)?;
        let tasks = &mut records.tasks;
        let now = Instant::now();

        match tasks.get(&task_id).map(|entry| entry.is_live(now)) {
            Some(true) => {}
            Some(false) => {
                tasks.remove(&task_id);
                return Err(StoreError::NotFound(task_id));
            }
            None => return Err(StoreError::NotFound(task_id)),
        }
        let entry = tasks
            .get_mut(&task_id)
            .ok_or(StoreError::NotFound(task_id))?;

        // Mutate a copy so a rejected transition leaves the record untouched.
        let mut task = entry.task.clone();
        mutation(&mut task)?;

        entry.task = task.clone();
        entry.expires_at = now + self.ttl;
        Ok(task)
    }

    async fn get(&self, task_id: TaskId) -> Result<Option<Task>, StoreError> {
        let records = self.records.read().map_err(Self::poisoned)?;
        let now = Instant::now();
        Ok(records
            .tasks
            .get(&task_id)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.task.clone()))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.records.read().map(|_| ()).map_err(Self::poisoned)
    }
}
