use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecognitionError {
    /// The model endpoint could not be reached (or timed out).
    #[error("recognizer unavailable: {0}")]
    Unavailable(String),

    /// The model answered with something we could not use.
    #[error("bad recognizer response: {0}")]
    BadResponse(String),

    #[error("no text recognized")]
    NoText,
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("invalid extraction pattern: {0}")]
    InvalidPattern(String),
}
