//! Image download for the worker.

use std::time::Duration;

use async_trait::async_trait;
use image::ImageFormat;
use thiserror::Error;

/// Formats the recognizer accepts.
pub const SUPPORTED_FORMATS: [ImageFormat; 4] = [
    ImageFormat::Jpeg,
    ImageFormat::Png,
    ImageFormat::Bmp,
    ImageFormat::WebP,
];

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DownloadError {
    /// Connect/transfer failure or timeout.
    #[error("request failed: {0}")]
    Request(String),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("image exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),
}

/// Fetches the bytes behind a task's `image_url`.
#[async_trait]
pub trait ImageFetcher: Send + Sync + 'static {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError>;
}

/// `GET`s the image over HTTP(S), bounded by a timeout and a byte limit, and
/// sniffs the payload to make sure it is a supported image.
#[derive(Debug, Clone)]
pub struct HttpImageFetcher {
    client: reqwest::Client,
    timeout: Duration,
    max_bytes: usize,
}

impl HttpImageFetcher {
    pub fn new(timeout: Duration, max_bytes: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
            max_bytes,
        }
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        let mut response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| DownloadError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status(status.as_u16()));
        }

        let limit = self.max_bytes;
        if response.content_length().is_some_and(|len| len > limit as u64) {
            return Err(DownloadError::TooLarge { limit });
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| DownloadError::Request(e.to_string()))?
        {
            if body.len() + chunk.len() > limit {
                return Err(DownloadError::TooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }

        check_format(&body)?;
        Ok(body)
    }
}

/// Reject payloads whose magic bytes are not one of [`SUPPORTED_FORMATS`].
pub fn check_format(bytes: &[u8]) -> Result<ImageFormat, DownloadError> {
    let format = image::guess_format(bytes)
        .map_err(|_| DownloadError::UnsupportedFormat("unrecognized data".to_string()))?;

    if SUPPORTED_FORMATS.contains(&format) {
        Ok(format)
    } else {
        Err(DownloadError::UnsupportedFormat(format!("{format:?}")))
    }
}
