//! Processing of a single task: download, recognize, extract.

use chrono::Utc;
use thiserror::Error;
use tokio::time::Instant;

use phonescan_core::{Task, TaskResult};
use phonescan_recognition::region::joined_text;
use phonescan_recognition::{
    format_phone_number, ExtractionError, PhoneExtractor, RecognitionError, Recognizer,
};

use crate::download::{DownloadError, ImageFetcher};

/// Characters of recognized text kept in the result.
pub const OCR_TEXT_LIMIT: usize = 500;

/// Which step of the pipeline failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Download,
    Recognition,
    Extraction,
}

impl core::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            FailureKind::Download => "download",
            FailureKind::Recognition => "recognition",
            FailureKind::Extraction => "extraction",
        })
    }
}

/// A retryable processing failure. Its display string becomes the task's
/// `error_message` once retries are exhausted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind} failed: {message}")]
pub struct ProcessingError {
    pub kind: FailureKind,
    pub message: String,
}

impl ProcessingError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<DownloadError> for ProcessingError {
    fn from(e: DownloadError) -> Self {
        Self::new(FailureKind::Download, e.to_string())
    }
}

impl From<RecognitionError> for ProcessingError {
    fn from(e: RecognitionError) -> Self {
        Self::new(FailureKind::Recognition, e.to_string())
    }
}

impl From<ExtractionError> for ProcessingError {
    fn from(e: ExtractionError) -> Self {
        Self::new(FailureKind::Extraction, e.to_string())
    }
}

/// Run the pipeline for `task` and build its result payload.
///
/// A missing phone number is a successful result (`phone_number: null`);
/// only an empty recognition is a failure.
pub async fn process(
    task: &Task,
    fetcher: &dyn ImageFetcher,
    recognizer: &dyn Recognizer,
    extractor: &dyn PhoneExtractor,
) -> Result<TaskResult, ProcessingError> {
    let started = Instant::now();

    let image = fetcher.fetch(&task.image_url).await?;

    let regions = recognizer.recognize(&image).await?;
    if regions.is_empty() {
        return Err(RecognitionError::NoText.into());
    }

    let found = extractor.extract(&regions)?;

    let ocr_text: String = joined_text(&regions).chars().take(OCR_TEXT_LIMIT).collect();
    let processing_time = (started.elapsed().as_secs_f64() * 100.0).round() / 100.0;

    Ok(TaskResult {
        formatted_number: found.number.as_deref().map(|n| format_phone_number(n, false)),
        phone_number: found.number,
        confidence: found.confidence,
        ocr_text,
        processing_time,
        processed_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use phonescan_core::NewTask;
    use phonescan_recognition::{ContractNumberExtractor, TextRegion};

    struct Bytes(Result<Vec<u8>, DownloadError>);

    #[async_trait]
    impl ImageFetcher for Bytes {
        async fn fetch(&self, _url: &str) -> Result<Vec<u8>, DownloadError> {
            self.0.clone()
        }
    }

    struct Regions(Vec<TextRegion>);

    #[async_trait]
    impl Recognizer for Regions {
        async fn recognize(&self, _image: &[u8]) -> Result<Vec<TextRegion>, RecognitionError> {
            Ok(self.0.clone())
        }
    }

    fn task() -> Task {
        Task::admit(NewTask {
            image_url: "https://x/a.jpg".to_string(),
            user_id: "u1".to_string(),
            submitted_at: "T".to_string(),
            callback_url: None,
        })
    }

    #[tokio::test]
    async fn builds_result_from_recognized_text() {
        let extractor = ContractNumberExtractor::new().unwrap();
        let result = process(
            &task(),
            &Bytes(Ok(vec![1, 2, 3])),
            &Regions(vec![TextRegion::new("Sözleşme-5356314848", 0.91)]),
            &extractor,
        )
        .await
        .unwrap();

        assert_eq!(result.phone_number.as_deref(), Some("5356314848"));
        assert_eq!(result.formatted_number.as_deref(), Some("0535 631 48 48"));
        assert_eq!(result.confidence, 0.91);
        assert_eq!(result.ocr_text, "Sözleşme-5356314848");
        assert!(result.processing_time >= 0.0);
    }

    #[tokio::test]
    async fn no_number_is_still_a_result() {
        let extractor = ContractNumberExtractor::new().unwrap();
        let result = process(
            &task(),
            &Bytes(Ok(vec![1])),
            &Regions(vec![TextRegion::new("no digits here", 0.9)]),
            &extractor,
        )
        .await
        .unwrap();

        assert_eq!(result.phone_number, None);
        assert_eq!(result.formatted_number, None);
        assert_eq!(result.confidence, 0.0);
    }

    #[tokio::test]
    async fn ocr_text_is_truncated() {
        let extractor = ContractNumberExtractor::new().unwrap();
        let long = "ş".repeat(OCR_TEXT_LIMIT + 100);
        let result = process(
            &task(),
            &Bytes(Ok(vec![1])),
            &Regions(vec![TextRegion::new(long, 0.9)]),
            &extractor,
        )
        .await
        .unwrap();

        assert_eq!(result.ocr_text.chars().count(), OCR_TEXT_LIMIT);
    }

    #[tokio::test]
    async fn failures_are_classified() {
        let extractor = ContractNumberExtractor::new().unwrap();

        let err = process(
            &task(),
            &Bytes(Err(DownloadError::Status(404))),
            &Regions(vec![]),
            &extractor,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind, FailureKind::Download);
        assert!(err.to_string().starts_with("download failed"));

        let err = process(&task(), &Bytes(Ok(vec![1])), &Regions(vec![]), &extractor)
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::Recognition);
        assert_eq!(err.to_string(), "recognition failed: no text recognized");
    }
}
