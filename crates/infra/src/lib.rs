//! Infrastructure layer: queue and task-store backends, outbound HTTP
//! (image download, webhooks), configuration and the processing worker.

pub mod config;
pub mod download;
pub mod queue;
pub mod store;
pub mod webhook;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use config::{Backend, ConfigError, Settings};
pub use download::{DownloadError, HttpImageFetcher, ImageFetcher};
pub use queue::{InMemoryJobQueue, JobQueue, QueueError};
pub use store::{InMemoryTaskStore, StoreError, TaskStore};
pub use webhook::{Notifier, NotifyError, WebhookNotifier};
pub use worker::{
    RetryPolicy, Worker, WorkerConfig, WorkerDeps, WorkerError, WorkerHandle, WorkerStats,
};
