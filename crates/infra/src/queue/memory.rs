//! In-process job queue for tests/dev and single-process deployments.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use phonescan_core::TaskId;

use super::{JobQueue, QueueError};

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<TaskId>,
    /// Sorted by due time; ties keep insertion order.
    delayed: Vec<(Instant, TaskId)>,
    /// Leased ids and their lease deadlines.
    in_flight: HashMap<TaskId, Instant>,
    /// Current consumer and when its claim lapses.
    consumer: Option<(String, Instant)>,
}

impl QueueState {
    fn promote_due(&mut self, now: Instant) {
        let due = self.delayed.partition_point(|(at, _)| *at <= now);
        for (_, id) in self.delayed.drain(..due) {
            self.ready.push_back(id);
        }
    }

    fn schedule(&mut self, task_id: TaskId, at: Instant) {
        let pos = self.delayed.partition_point(|(t, _)| *t <= at);
        self.delayed.insert(pos, (at, task_id));
    }

    fn depth(&self) -> usize {
        self.ready.len() + self.delayed.len()
    }
}

#[derive(Debug)]
pub struct InMemoryJobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    lease_timeout: Duration,
}

impl InMemoryJobQueue {
    pub fn new(lease_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            lease_timeout,
        }
    }

    /// Number of ids currently leased to a consumer.
    pub fn in_flight(&self) -> Result<usize, QueueError> {
        Ok(self.lock()?.in_flight.len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, QueueState>, QueueError> {
        self.state
            .lock()
            .map_err(|_| QueueError::Unavailable("queue state lock poisoned".to_string()))
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, task_id: TaskId) -> Result<usize, QueueError> {
        let depth = {
            let mut state = self.lock()?;
            state.promote_due(Instant::now());
            state.ready.push_back(task_id);
            state.depth()
        };
        self.notify.notify_one();
        Ok(depth)
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<TaskId>, QueueError> {
        let deadline = Instant::now() + timeout;

        loop {
            let next_due = {
                let mut state = self.lock()?;
                let now = Instant::now();
                state.promote_due(now);

                if let Some(task_id) = state.ready.pop_front() {
                    state.in_flight.insert(task_id, now + self.lease_timeout);
                    debug!(task_id = %task_id, "leased task");
                    return Ok(Some(task_id));
                }
                state.delayed.first().map(|(at, _)| *at)
            };

            if Instant::now() >= deadline {
                return Ok(None);
            }
            let wake_at = next_due.map_or(deadline, |at| at.min(deadline));

            // `notify_one` stores a permit when nobody is waiting, so an
            // enqueue racing with this wait is not lost.
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn ack(&self, task_id: TaskId) -> Result<(), QueueError> {
        self.lock()?.in_flight.remove(&task_id);
        Ok(())
    }

    async fn retry(&self, task_id: TaskId, delay: Duration) -> Result<(), QueueError> {
        {
            let mut state = self.lock()?;
            state.in_flight.remove(&task_id);
            state.schedule(task_id, Instant::now() + delay);
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn claim_consumer(&self, owner: &str, ttl: Duration) -> Result<bool, QueueError> {
        let mut state = self.lock()?;
        let now = Instant::now();
        match &state.consumer {
            Some((holder, until)) if holder != owner && *until > now => Ok(false),
            _ => {
                state.consumer = Some((owner.to_string(), now + ttl));
                Ok(true)
            }
        }
    }

    async fn release_consumer(&self, owner: &str) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        if state.consumer.as_ref().is_some_and(|(holder, _)| holder == owner) {
            state.consumer = None;
        }
        Ok(())
    }

    async fn reclaim_expired(&self) -> Result<Vec<TaskId>, QueueError> {
        let reclaimed = {
            let mut state = self.lock()?;
            let now = Instant::now();

            let mut expired: Vec<(Instant, TaskId)> = state
                .in_flight
                .iter()
                .filter(|(_, deadline)| **deadline <= now)
                .map(|(id, deadline)| (*deadline, *id))
                .collect();
            expired.sort_by_key(|(deadline, _)| *deadline);

            for (_, id) in &expired {
                state.in_flight.remove(id);
                state.ready.push_back(*id);
            }
            expired.into_iter().map(|(_, id)| id).collect::<Vec<_>>()
        };

        if !reclaimed.is_empty() {
            self.notify.notify_one();
        }
        Ok(reclaimed)
    }

    async fn len(&self) -> Result<usize, QueueError> {
        let mut state = self.lock()?;
        state.promote_due(Instant::now());
        Ok(state.depth())
    }

    async fn ping(&self) -> Result<(), QueueError> {
        self.lock().map(|_| ())
    }
}
