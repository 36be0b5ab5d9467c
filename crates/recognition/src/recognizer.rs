use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::RecognitionError;
use crate::region::{retain_confident, TextRegion};

/// Text recognition over raw image bytes.
///
/// A recognizer wraps an expensive model and is not assumed safe for
/// concurrent calls: each worker owns exactly one and calls it sequentially.
#[async_trait]
pub trait Recognizer: Send + Sync + 'static {
    async fn recognize(&self, image: &[u8]) -> Result<Vec<TextRegion>, RecognitionError>;
}

#[async_trait]
impl<R: Recognizer + ?Sized> Recognizer for Box<R> {
    async fn recognize(&self, image: &[u8]) -> Result<Vec<TextRegion>, RecognitionError> {
        (**self).recognize(image).await
    }
}

#[derive(Debug, Deserialize)]
struct RecognizeResponse {
    #[serde(default)]
    regions: Vec<TextRegion>,
}

/// Recognizer backed by a model server.
///
/// POSTs the image bytes and expects `{"regions": [{"text", "confidence"}]}`.
/// Regions under `min_confidence` are discarded; an empty remainder is
/// reported as [`RecognitionError::NoText`].
#[derive(Debug, Clone)]
pub struct HttpRecognizer {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
    min_confidence: f64,
}

impl HttpRecognizer {
    pub fn new(endpoint: impl Into<String>, timeout: Duration, min_confidence: f64) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            timeout,
            min_confidence,
        }
    }
}

#[async_trait]
impl Recognizer for HttpRecognizer {
    async fn recognize(&self, image: &[u8]) -> Result<Vec<TextRegion>, RecognitionError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(image.to_vec())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| RecognitionError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RecognitionError::BadResponse(format!("status {status}")));
        }

        let body: RecognizeResponse = response
            .json()
            .await
            .map_err(|e| RecognitionError::BadResponse(e.to_string()))?;

        let total = body.regions.len();
        let regions = retain_confident(body.regions, self.min_confidence);
        tracing::debug!(
            endpoint = %self.endpoint,
            regions = total,
            kept = regions.len(),
            "recognition finished"
        );

        if regions.is_empty() {
            return Err(RecognitionError::NoText);
        }
        Ok(regions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<TextRegion>);

    #[async_trait]
    impl Recognizer for Fixed {
        async fn recognize(&self, _image: &[u8]) -> Result<Vec<TextRegion>, RecognitionError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn boxed_recognizer_delegates() {
        let boxed: Box<dyn Recognizer> = Box::new(Fixed(vec![TextRegion::new("hello", 0.9)]));
        let regions = boxed.recognize(b"img").await.unwrap();
        assert_eq!(regions, vec![TextRegion::new("hello", 0.9)]);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_unavailable() {
        // Port 9 (discard) on loopback is not expected to be listening.
        let recognizer =
            HttpRecognizer::new("http://127.0.0.1:9/recognize", Duration::from_secs(2), 0.3);

        let err = recognizer.recognize(b"img").await.unwrap_err();
        assert!(matches!(err, RecognitionError::Unavailable(_)), "{err:?}");
    }

    #[test]
    fn response_without_regions_deserializes_empty() {
        let body: RecognizeResponse = serde_json::from_str("{}").unwrap();
        assert!(body.regions.is_empty());
    }
}
