use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::Url;
use thiserror::Error;
use tracing::{error, info, warn};

use phonescan_core::{NewTask, Task, TaskId, TaskStatus, TaskView};
use phonescan_infra::queue::RedisJobQueue;
use phonescan_infra::store::RedisTaskStore;
use phonescan_infra::{
    Backend, HttpImageFetcher, InMemoryJobQueue, InMemoryTaskStore, JobQueue, QueueError,
    Settings, StoreError, TaskStore, WebhookNotifier, Worker, WorkerDeps,
};
use phonescan_recognition::{ContractNumberExtractor, ExtractionError, HttpRecognizer};

/// Name reported by `/` and `/status`.
pub const SERVICE_NAME: &str = "phonescan";

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("{0}")]
    InvalidInput(String),

    #[error(transparent)]
    QueueUnavailable(QueueError),

    #[error(transparent)]
    StoreUnavailable(StoreError),

    /// A store answer that breaks an intake invariant (e.g. a duplicate id).
    #[error("{0}")]
    Internal(String),
}

/// Raw submission as received over HTTP; every field is checked by
/// [`IntakeService::submit`].
#[derive(Debug, Clone, Default)]
pub struct Submission {
    pub image_url: Option<String>,
    pub user_id: Option<String>,
    pub timestamp: Option<String>,
    pub callback_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Admission {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub enqueued_at: DateTime<Utc>,
    pub queue_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Health {
    pub queue_connected: bool,
    pub queue_size: usize,
}

/// Shared queue and store handles.
#[derive(Clone)]
pub struct Backends {
    pub queue: Arc<dyn JobQueue>,
    pub store: Arc<dyn TaskStore>,
}

impl Backends {
    pub fn in_memory(settings: &Settings) -> Self {
        Self {
            queue: Arc::new(InMemoryJobQueue::new(settings.lease_timeout)),
            store: InMemoryTaskStore::arc(settings.result_ttl),
        }
    }

    pub async fn redis(settings: &Settings) -> Result<Self, BackendError> {
        let queue =
            RedisJobQueue::connect(&settings.redis_url, &settings.input_queue, settings.lease_timeout)
                .await?;
        let store =
            RedisTaskStore::connect(&settings.redis_url, &settings.output_prefix, settings.result_ttl)
                .await?;
        Ok(Self {
            queue: Arc::new(queue),
            store: Arc::new(store),
        })
    }

    pub async fn from_settings(settings: &Settings) -> Result<Self, BackendError> {
        match settings.backend {
            Backend::Memory => Ok(Self::in_memory(settings)),
            Backend::Redis => Self::redis(settings).await,
        }
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Extractor(#[from] ExtractionError),
}

/// A worker wired to the real collaborators: HTTP download, HTTP
/// recognition, the contract-number extractor and webhook delivery.
pub fn build_worker(settings: &Settings, backends: &Backends) -> Result<Worker, BackendError> {
    let deps = WorkerDeps {
        queue: backends.queue.clone(),
        store: backends.store.clone(),
        fetcher: Arc::new(HttpImageFetcher::new(
            settings.request_timeout,
            settings.max_image_bytes,
        )),
        recognizer: Box::new(HttpRecognizer::new(
            settings.recognizer_url.clone(),
            settings.request_timeout,
            settings.min_confidence,
        )),
        extractor: Arc::new(ContractNumberExtractor::new()?),
        notifier: Arc::new(WebhookNotifier::new(settings.request_timeout)),
    };
    Ok(Worker::new(deps, settings.worker_config()))
}

/// Admission, polling and health on top of the queue and store.
#[derive(Clone)]
pub struct IntakeService {
    backends: Backends,
}

impl IntakeService {
    pub fn new(backends: Backends) -> Self {
        Self { backends }
    }

    /// Validate, create the record, then enqueue.
    ///
    /// If the enqueue fails the record is left to expire; it is never
    /// handed to a worker.
    pub async fn submit(&self, submission: Submission) -> Result<Admission, IntakeError> {
        let new = match validate(submission) {
            Ok(new) => new,
            Err(reason) => {
                warn!(reason = %reason, "submission rejected");
                return Err(IntakeError::InvalidInput(reason));
            }
        };

        let task = Task::admit(new);
        let task_id = task.task_id;

        self.backends.store.create(&task).await.map_err(|e| match e {
            StoreError::Duplicate(_) => {
                error!(task_id = %task_id, "generated task id already exists");
                IntakeError::Internal(e.to_string())
            }
            e => {
                error!(task_id = %task_id, error = %e, "failed to create task record");
                IntakeError::StoreUnavailable(e)
            }
        })?;

        let queue_size = self.backends.queue.enqueue(task_id).await.map_err(|e| {
            error!(task_id = %task_id, error = %e, "failed to enqueue task");
            IntakeError::QueueUnavailable(e)
        })?;

        info!(
            task_id = %task_id,
            user_id = %task.user_id,
            queue_size,
            "task admitted"
        );

        Ok(Admission {
            task_id,
            status: task.status,
            enqueued_at: task.enqueued_at,
            queue_size,
        })
    }

    /// Current view of a task; `None` for unknown, expired or malformed ids.
    pub async fn query(&self, task_id: &str) -> Result<Option<TaskView>, IntakeError> {
        let Ok(task_id) = task_id.parse::<TaskId>() else {
            return Ok(None);
        };
        let task = self
            .backends
            .store
            .get(task_id)
            .await
            .map_err(IntakeError::StoreUnavailable)?;
        Ok(task.as_ref().map(TaskView::from))
    }

    pub async fn health(&self) -> Health {
        let reachable = self.backends.queue.ping().await.is_ok()
            && self.backends.store.ping().await.is_ok();

        let queue_size = if reachable {
            self.backends.queue.len().await.ok()
        } else {
            None
        };

        match queue_size {
            Some(queue_size) => Health {
                queue_connected: true,
                queue_size,
            },
            None => Health {
                queue_connected: false,
                queue_size: 0,
            },
        }
    }
}

fn validate(submission: Submission) -> Result<NewTask, String> {
    let image_url = required(submission.image_url, "image_url")?;
    check_url(&image_url, "image_url")?;

    let user_id = required(submission.user_id, "user_id")?;
    let submitted_at = required(submission.timestamp, "timestamp")?;

    let callback_url = submission
        .callback_url
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    if let Some(url) = &callback_url {
        check_url(url, "callback_url")?;
    }

    Ok(NewTask {
        image_url,
        user_id,
        submitted_at,
        callback_url,
    })
}

fn required(value: Option<String>, field: &str) -> Result<String, String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("{field} is required"))
}

/// Absolute `http`/`https` URL with a host.
fn check_url(raw: &str, field: &str) -> Result<(), String> {
    let url = Url::parse(raw).map_err(|e| format!("{field} is not a valid URL: {e}"))?;
    match url.scheme() {
        "http" | "https" if url.has_host() => Ok(()),
        "http" | "https" => Err(format!("{field} has no host")),
        other => Err(format!("{field} must use http or https, not `{other}`")),
    }
}
