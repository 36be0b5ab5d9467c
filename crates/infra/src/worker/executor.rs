//! The worker loop: claim, process, record, notify.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use phonescan_core::{Task, TaskId, TaskView};
use phonescan_recognition::{PhoneExtractor, Recognizer};

use super::pipeline;
use super::retry::RetryPolicy;
use crate::download::ImageFetcher;
use crate::queue::{JobQueue, QueueError};
use crate::store::{StoreError, TaskStore};
use crate::webhook::Notifier;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Name for logging
    pub name: String,
    /// How long one dequeue waits before the loop re-checks for shutdown
    pub poll_interval: Duration,
    /// Lifetime of the consumer claim, renewed every iteration. Must outlast
    /// one iteration.
    pub consumer_ttl: Duration,
    pub retry: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "phonescan-worker".to_string(),
            poll_interval: Duration::from_secs(1),
            consumer_ttl: Duration::from_secs(300),
            retry: RetryPolicy::default(),
        }
    }
}

/// Everything a worker talks to.
pub struct WorkerDeps {
    pub queue: Arc<dyn JobQueue>,
    pub store: Arc<dyn TaskStore>,
    pub fetcher: Arc<dyn ImageFetcher>,
    /// Owned by this worker; never shared between workers.
    pub recognizer: Box<dyn Recognizer>,
    pub extractor: Arc<dyn PhoneExtractor>,
    pub notifier: Arc<dyn Notifier>,
}

/// Infrastructure failure while handling a task. The lease is left in place
/// and the task is picked up again once it expires.
#[derive(Debug, Clone, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What one loop iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing to claim within the poll interval.
    Idle,
    Completed,
    /// Handed back to the queue with a backoff delay.
    Retried,
    /// Retries exhausted; the task is now `error`.
    Failed,
    /// The task was already terminal.
    Skipped,
    /// The record had expired.
    Dropped,
    /// Another worker holds the consumer claim.
    Standby,
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub processed: u64,
    pub succeeded: u64,
    pub retried: u64,
    pub failed: u64,
    pub notified: u64,
    pub notify_failed: u64,
    pub reclaimed: u64,
}

pub struct Worker {
    deps: WorkerDeps,
    config: WorkerConfig,
    /// Token identifying this worker in the consumer claim.
    owner: String,
    stats: Arc<Mutex<WorkerStats>>,
}

impl Worker {
    pub fn new(deps: WorkerDeps, config: WorkerConfig) -> Self {
        let owner = format!("{}-{}", config.name, Uuid::now_v7());
        Self {
            deps,
            config,
            owner,
            stats: Arc::default(),
        }
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn record(&self, update: impl FnOnce(&mut WorkerStats)) {
        update(&mut self.stats.lock().unwrap_or_else(PoisonError::into_inner));
    }

    /// One iteration: renew the consumer claim, return expired leases,
    /// claim the next id, handle it.
    pub async fn run_once(&self) -> Result<Outcome, WorkerError> {
        let active = self
            .deps
            .queue
            .claim_consumer(&self.owner, self.config.consumer_ttl)
            .await?;
        if !active {
            debug!(worker = %self.config.name, "queue has another consumer; standing by");
            tokio::time::sleep(self.config.poll_interval).await;
            return Ok(Outcome::Standby);
        }

        let reclaimed = self.deps.queue.reclaim_expired().await?;
        if !reclaimed.is_empty() {
            warn!(
                worker = %self.config.name,
                count = reclaimed.len(),
                task_ids = ?reclaimed,
                "reclaimed expired leases"
            );
            self.record(|s| s.reclaimed += reclaimed.len() as u64);
        }

        match self.deps.queue.dequeue(self.config.poll_interval).await? {
            Some(task_id) => {
                debug!(worker = %self.config.name, task_id = %task_id, "claimed task");
                self.handle(task_id).await
            }
            None => Ok(Outcome::Idle),
        }
    }

    async fn handle(&self, task_id: TaskId) -> Result<Outcome, WorkerError> {
        let deps = &self.deps;

        let task = match deps.store.update(task_id, &|t: &mut Task| t.start_processing()).await {
            Ok(task) => task,
            Err(StoreError::NotFound(_)) => {
                warn!(task_id = %task_id, "task record expired before processing; dropping");
                deps.queue.ack(task_id).await?;
                return Ok(Outcome::Dropped);
            }
            Err(StoreError::Rejected(e)) => {
                debug!(task_id = %task_id, reason = %e, "task already finished; skipping");
                deps.queue.ack(task_id).await?;
                return Ok(Outcome::Skipped);
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            worker = %self.config.name,
            task_id = %task_id,
            retry_count = task.retry_count,
            "processing task"
        );

        let processed = pipeline::process(
            &task,
            &*deps.fetcher,
            &*deps.recognizer,
            &*deps.extractor,
        )
        .await;

        let (finished, outcome) = match processed {
            Ok(result) => {
                let finished = deps
                    .store
                    .update(task_id, &|t: &mut Task| t.complete(result.clone()))
                    .await?;
                self.release(task_id).await;
                info!(
                    task_id = %task_id,
                    phone_number = result.phone_number.as_deref().unwrap_or("none"),
                    confidence = result.confidence,
                    processing_time = result.processing_time,
                    "task completed"
                );
                self.record(|s| {
                    s.processed += 1;
                    s.succeeded += 1;
                });
                (finished, Outcome::Completed)
            }
            Err(err) if self.config.retry.should_retry(task.retry_count) => {
                let requeued = deps
                    .store
                    .update(task_id, &|t: &mut Task| t.schedule_retry().map(drop))
                    .await?;
                let delay = self.config.retry.delay_for_retry(requeued.retry_count);
                deps.queue.retry(task_id, delay).await?;
                warn!(
                    task_id = %task_id,
                    retry_count = requeued.retry_count,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "task failed; retry scheduled"
                );
                self.record(|s| {
                    s.processed += 1;
                    s.retried += 1;
                });
                return Ok(Outcome::Retried);
            }
            Err(err) => {
                let message = err.to_string();
                let finished = deps
                    .store
                    .update(task_id, &|t: &mut Task| t.fail(message.clone()))
                    .await?;
                self.release(task_id).await;
                error!(
                    task_id = %task_id,
                    retry_count = finished.retry_count,
                    error = %message,
                    "task failed; retries exhausted"
                );
                self.record(|s| {
                    s.processed += 1;
                    s.failed += 1;
                });
                (finished, Outcome::Failed)
            }
        };

        self.notify(&finished).await;
        Ok(outcome)
    }

    /// Ack after a terminal write. A failed ack leaves the lease to expire;
    /// the reclaimed id is then skipped, so the webhook still goes out now.
    async fn release(&self, task_id: TaskId) {
        if let Err(e) = self.deps.queue.ack(task_id).await {
            warn!(task_id = %task_id, error = %e, "failed to ack finished task");
        }
    }

    /// Single best-effort delivery; the outcome never touches the record.
    async fn notify(&self, task: &Task) {
        let Some(url) = task.callback_url.as_deref() else {
            return;
        };

        match self.deps.notifier.notify(url, &TaskView::from(task)).await {
            Ok(()) => {
                info!(task_id = %task.task_id, status = %task.status, "webhook delivered");
                self.record(|s| s.notified += 1);
            }
            Err(e) => {
                warn!(task_id = %task.task_id, callback_url = %url, error = %e, "webhook delivery failed");
                self.record(|s| s.notify_failed += 1);
            }
        }
    }

    /// Run the loop on the current runtime until the handle is shut down.
    pub fn spawn(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = self.stats.clone();
        let join = tokio::spawn(self.run(shutdown_rx));

        WorkerHandle {
            shutdown: shutdown_tx,
            join,
            stats,
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(worker = %self.config.name, "worker started");

        while !*shutdown.borrow() {
            if let Err(e) = self.run_once().await {
                error!(worker = %self.config.name, error = %e, "worker iteration failed");
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }

        if let Err(e) = self.deps.queue.release_consumer(&self.owner).await {
            warn!(worker = %self.config.name, error = %e, "failed to release consumer claim");
        }
        info!(worker = %self.config.name, "worker stopped");
    }
}

/// Handle to stop a spawned worker and read its statistics.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl WorkerHandle {
    /// Stop after the current iteration, wait for the loop to exit and
    /// return the final statistics.
    pub async fn shutdown(self) -> WorkerStats {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            error!(error = %e, "worker task panicked");
        }
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::DownloadError;
    use crate::queue::InMemoryJobQueue;
    use crate::store::InMemoryTaskStore;
    use crate::webhook::NotifyError;

    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use phonescan_core::{NewTask, TaskStatus};
    use phonescan_recognition::{ContractNumberExtractor, RecognitionError, TextRegion};

    struct FakeFetcher {
        fail: bool,
    }

    #[async_trait]
    impl ImageFetcher for FakeFetcher {
        async fn fetch(&self, _url: &str) -> Result<Vec<u8>, DownloadError> {
            if self.fail {
                Err(DownloadError::Request("connection refused".to_string()))
            } else {
                Ok(vec![0xFF, 0xD8, 0xFF])
            }
        }
    }

    struct FakeRecognizer;

    #[async_trait]
    impl Recognizer for FakeRecognizer {
        async fn recognize(&self, _image: &[u8]) -> Result<Vec<TextRegion>, RecognitionError> {
            Ok(vec![TextRegion::new("Sözleşme-5356314848", 0.93)])
        }
    }

    #[derive(Default)]
    struct FakeNotifier {
        fail: bool,
        sent: Mutex<Vec<TaskView>>,
    }

    #[async_trait]
    impl Notifier for FakeNotifier {
        async fn notify(&self, _url: &str, view: &TaskView) -> Result<(), NotifyError> {
            self.sent.lock().unwrap().push(view.clone());
            if self.fail {
                Err(NotifyError::Status(500))
            } else {
                Ok(())
            }
        }
    }

    struct Harness {
        queue: Arc<InMemoryJobQueue>,
        store: Arc<InMemoryTaskStore>,
        notifier: Arc<FakeNotifier>,
        worker: Worker,
    }

    /// Fails the first `failures` acks, then delegates.
    struct FlakyAckQueue {
        inner: Arc<InMemoryJobQueue>,
        failures: AtomicU32,
    }

    #[async_trait]
    impl JobQueue for FlakyAckQueue {
        async fn enqueue(&self, task_id: TaskId) -> Result<usize, QueueError> {
            self.inner.enqueue(task_id).await
        }
        async fn dequeue(&self, timeout: Duration) -> Result<Option<TaskId>, QueueError> {
            self.inner.dequeue(timeout).await
        }
        async fn ack(&self, task_id: TaskId) -> Result<(), QueueError> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(QueueError::Unavailable("connection reset".to_string()));
            }
            self.inner.ack(task_id).await
        }
        async fn retry(&self, task_id: TaskId, delay: Duration) -> Result<(), QueueError> {
            self.inner.retry(task_id, delay).await
        }
        async fn claim_consumer(&self, owner: &str, ttl: Duration) -> Result<bool, QueueError> {
            self.inner.claim_consumer(owner, ttl).await
        }
        async fn release_consumer(&self, owner: &str) -> Result<(), QueueError> {
            self.inner.release_consumer(owner).await
        }
        async fn reclaim_expired(&self) -> Result<Vec<TaskId>, QueueError> {
            self.inner.reclaim_expired().await
        }
        async fn len(&self) -> Result<usize, QueueError> {
            self.inner.len().await
        }
        async fn ping(&self) -> Result<(), QueueError> {
            self.inner.ping().await
        }
    }

    fn worker_on(
        queue: Arc<dyn JobQueue>,
        store: Arc<InMemoryTaskStore>,
        notifier: Arc<FakeNotifier>,
        fetch_fails: bool,
        consumer_ttl: Duration,
    ) -> Worker {
        let deps = WorkerDeps {
            queue,
            store,
            fetcher: Arc::new(FakeFetcher { fail: fetch_fails }),
            recognizer: Box::new(FakeRecognizer),
            extractor: Arc::new(ContractNumberExtractor::new().unwrap()),
            notifier,
        };
        let config = WorkerConfig {
            poll_interval: Duration::from_millis(200),
            consumer_ttl,
            retry: RetryPolicy::fixed(3, Duration::from_millis(5)),
            ..WorkerConfig::default()
        };
        Worker::new(deps, config)
    }

    fn harness(fetch_fails: bool, notify_fails: bool, lease: Duration) -> Harness {
        let queue = Arc::new(InMemoryJobQueue::new(lease));
        let store = InMemoryTaskStore::arc(Duration::from_secs(60));
        let notifier = Arc::new(FakeNotifier {
            fail: notify_fails,
            ..Default::default()
        });
        let worker = worker_on(
            queue.clone(),
            store.clone(),
            notifier.clone(),
            fetch_fails,
            Duration::from_secs(60),
        );
        Harness {
            queue,
            store,
            notifier,
            worker,
        }
    }

    async fn admit(store: &dyn TaskStore, queue: &dyn JobQueue, callback: bool) -> TaskId {
        let task = Task::admit(NewTask {
            image_url: "https://images.test/a.jpg".to_string(),
            user_id: "u1".to_string(),
            submitted_at: "2024-01-01T00:00:00Z".to_string(),
            callback_url: callback.then(|| "https://hooks.test/done".to_string()),
        });
        store.create(&task).await.unwrap();
        queue.enqueue(task.task_id).await.unwrap();
        task.task_id
    }

    async fn submit(h: &Harness, callback: bool) -> TaskId {
        admit(&*h.store, &*h.queue, callback).await
    }

    #[tokio::test]
    async fn completes_task_and_notifies_once() {
        let h = harness(false, false, Duration::from_secs(60));
        let id = submit(&h, true).await;

        assert_eq!(h.worker.run_once().await.unwrap(), Outcome::Completed);

        let task = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        let result = task.result.unwrap();
        assert_eq!(result.phone_number.as_deref(), Some("5356314848"));
        assert_eq!(result.formatted_number.as_deref(), Some("0535 631 48 48"));

        let sent = h.notifier.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].status, TaskStatus::Completed);
        assert_eq!(h.queue.in_flight().unwrap(), 0);
        assert_eq!(h.worker.stats().succeeded, 1);
    }

    #[tokio::test]
    async fn failing_task_is_retried_then_marked_error() {
        let h = harness(true, false, Duration::from_secs(60));
        let id = submit(&h, true).await;

        let mut outcomes = Vec::new();
        loop {
            let outcome = h.worker.run_once().await.unwrap();
            if outcome == Outcome::Idle {
                continue;
            }
            outcomes.push(outcome);
            if outcome == Outcome::Failed {
                break;
            }
        }

        assert_eq!(
            outcomes,
            vec![Outcome::Retried, Outcome::Retried, Outcome::Retried, Outcome::Failed]
        );
        let task = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(task.retry_count, 3);
        assert!(task.error_message.unwrap().contains("download failed"));
        assert!(h.queue.is_empty().await.unwrap());

        let sent = h.notifier.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].status, TaskStatus::Error);
    }

    #[tokio::test]
    async fn webhook_failure_does_not_change_status() {
        let h = harness(false, true, Duration::from_secs(60));
        let id = submit(&h, true).await;

        assert_eq!(h.worker.run_once().await.unwrap(), Outcome::Completed);

        let task = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        let stats = h.worker.stats();
        assert_eq!(stats.notify_failed, 1);
        assert_eq!(stats.notified, 0);
    }

    #[tokio::test]
    async fn no_callback_means_no_notification() {
        let h = harness(false, false, Duration::from_secs(60));
        submit(&h, false).await;

        assert_eq!(h.worker.run_once().await.unwrap(), Outcome::Completed);
        assert!(h.notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn finished_task_is_skipped() {
        let h = harness(false, false, Duration::from_secs(60));
        let id = submit(&h, false).await;
        assert_eq!(h.worker.run_once().await.unwrap(), Outcome::Completed);

        h.queue.enqueue(id).await.unwrap();
        assert_eq!(h.worker.run_once().await.unwrap(), Outcome::Skipped);
        assert_eq!(h.queue.in_flight().unwrap(), 0);
    }

    #[tokio::test]
    async fn expired_record_is_dropped() {
        let h = harness(false, false, Duration::from_secs(60));
        h.queue.enqueue(TaskId::new()).await.unwrap();

        assert_eq!(h.worker.run_once().await.unwrap(), Outcome::Dropped);
        assert_eq!(h.queue.in_flight().unwrap(), 0);
    }

    #[tokio::test]
    async fn abandoned_lease_is_reprocessed_without_counting_a_retry() {
        let h = harness(false, false, Duration::from_millis(50));
        let id = submit(&h, false).await;

        // A previous worker claimed the task and died mid-processing.
        assert_eq!(h.queue.dequeue(Duration::from_millis(10)).await.unwrap(), Some(id));
        h.store.update(id, &|t: &mut Task| t.start_processing()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(h.worker.run_once().await.unwrap(), Outcome::Completed);
        let task = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.retry_count, 0);
        assert_eq!(h.worker.stats().reclaimed, 1);
    }

    #[tokio::test]
    async fn spawned_worker_drains_queue_and_stops() {
        let h = harness(false, false, Duration::from_secs(60));
        let a = submit(&h, false).await;
        let b = submit(&h, false).await;
        let store = h.store.clone();

        let handle = h.worker.spawn();
        for _ in 0..50 {
            let done_a = store.get(a).await.unwrap().unwrap().status.is_terminal();
            let done_b = store.get(b).await.unwrap().unwrap().status.is_terminal();
            if done_a && done_b {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(handle.stats().succeeded, 2);
        let stats = handle.shutdown().await;
        assert_eq!(stats.processed, 2);
    }

    #[tokio::test]
    async fn failed_ack_after_completion_still_notifies_once() {
        let inner = Arc::new(InMemoryJobQueue::new(Duration::from_millis(50)));
        let store = InMemoryTaskStore::arc(Duration::from_secs(60));
        let notifier = Arc::new(FakeNotifier::default());
        let queue = Arc::new(FlakyAckQueue {
            inner: inner.clone(),
            failures: AtomicU32::new(1),
        });
        let worker = worker_on(queue, store.clone(), notifier.clone(), false, Duration::from_secs(60));
        let id = admit(&*store, &*inner, true).await;

        assert_eq!(worker.run_once().await.unwrap(), Outcome::Completed);
        assert_eq!(notifier.sent.lock().unwrap().len(), 1);
        assert_eq!(inner.in_flight().unwrap(), 1);

        // The stale lease comes back, is skipped and acked without a second webhook.
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(worker.run_once().await.unwrap(), Outcome::Skipped);
        assert_eq!(inner.in_flight().unwrap(), 0);
        assert_eq!(notifier.sent.lock().unwrap().len(), 1);

        let task = store.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn failed_ack_after_exhausted_retries_still_notifies() {
        let inner = Arc::new(InMemoryJobQueue::new(Duration::from_secs(60)));
        let store = InMemoryTaskStore::arc(Duration::from_secs(60));
        let notifier = Arc::new(FakeNotifier::default());
        let queue = Arc::new(FlakyAckQueue {
            inner: inner.clone(),
            failures: AtomicU32::new(1),
        });
        let worker = worker_on(queue, store.clone(), notifier.clone(), true, Duration::from_secs(60));
        admit(&*store, &*inner, true).await;

        let mut last = Outcome::Idle;
        for _ in 0..4 {
            last = worker.run_once().await.unwrap();
        }
        assert_eq!(last, Outcome::Failed);

        let sent = notifier.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].status, TaskStatus::Error);
    }

    #[tokio::test]
    async fn second_worker_stands_by_while_first_holds_the_queue() {
        let queue = Arc::new(InMemoryJobQueue::default());
        let store = InMemoryTaskStore::arc(Duration::from_secs(60));
        let notifier = Arc::new(FakeNotifier::default());
        let ttl = Duration::from_millis(100);
        let first = worker_on(queue.clone(), store.clone(), notifier.clone(), false, ttl);
        let second = worker_on(queue.clone(), store.clone(), notifier.clone(), false, ttl);

        admit(&*store, &*queue, false).await;
        assert_eq!(first.run_once().await.unwrap(), Outcome::Completed);

        let b = admit(&*store, &*queue, false).await;
        assert_eq!(second.run_once().await.unwrap(), Outcome::Standby);
        assert_eq!(queue.len().await.unwrap(), 1);
        assert_eq!(store.get(b).await.unwrap().unwrap().status, TaskStatus::Queued);

        // The first claim lapsed while the second worker waited.
        assert_eq!(second.run_once().await.unwrap(), Outcome::Completed);
        assert_eq!(first.run_once().await.unwrap(), Outcome::Standby);
    }

    #[tokio::test]
    async fn stopped_worker_hands_the_queue_over() {
        let h = harness(false, false, Duration::from_secs(60));
        let standby = worker_on(
            h.queue.clone(),
            h.store.clone(),
            h.notifier.clone(),
            false,
            Duration::from_secs(60),
        );
        let queue = h.queue.clone();
        let store = h.store.clone();

        assert_eq!(h.worker.run_once().await.unwrap(), Outcome::Idle);
        assert_eq!(standby.run_once().await.unwrap(), Outcome::Standby);

        h.worker.spawn().shutdown().await;

        let id = admit(&*store, &*queue, false).await;
        assert_eq!(standby.run_once().await.unwrap(), Outcome::Completed);
        assert_eq!(store.get(id).await.unwrap().unwrap().status, TaskStatus::Completed);
    }
}
