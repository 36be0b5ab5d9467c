//! `phonescan-recognition`
//!
//! **Responsibility:** boundary to the text-recognition model and the phone
//! number extraction that runs on its output.
//!
//! This crate is intentionally **not** part of the task lifecycle:
//! - It knows nothing about queues, stores or task status.
//! - Recognizers are owned resources, created once and handed to a worker.
//! - Extraction is a pure function of the recognized regions.

pub mod error;
pub mod extractor;
pub mod recognizer;
pub mod region;

pub use error::{ExtractionError, RecognitionError};
pub use extractor::{format_phone_number, ContractNumberExtractor, PhoneExtractor, PhoneMatch};
pub use recognizer::{HttpRecognizer, Recognizer};
pub use region::TextRegion;
