//! Best-effort webhook delivery of terminal task records.
//!
//! One POST per terminal task, no retry. Callers log failures; they never
//! feed back into task status.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use phonescan_core::TaskView;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NotifyError {
    /// Connect/transfer failure or timeout.
    #[error("webhook request failed: {0}")]
    Request(String),

    #[error("webhook answered with HTTP status {0}")]
    Status(u16),
}

#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn notify(&self, callback_url: &str, view: &TaskView) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    timeout: Duration,
}

impl WebhookNotifier {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, callback_url: &str, view: &TaskView) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(callback_url)
            .json(view)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| NotifyError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }
        Ok(())
    }
}
