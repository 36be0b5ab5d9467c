use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ExtractionError;
use crate::region::{joined_text, TextRegion};

/// Contract label followed by a 10-digit number, e.g. `Sözleşme-5356314848`.
pub const CONTRACT_PATTERN: &str = r"[Ss]özle[sş]me[-‐–—]?\s*([0-9]{10})";

/// Bare mobile number, matched against the digits-only text.
pub const FALLBACK_PATTERN: &str = r"5[0-9]{9}";

/// Confidence reported when the contract match cannot be tied to a region.
const UNATTRIBUTED_CONFIDENCE: f64 = 0.99;

/// Best phone-number candidate found in a set of regions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoneMatch {
    /// `None` when nothing matched; that is still a successful extraction.
    pub number: Option<String>,
    pub confidence: f64,
}

impl PhoneMatch {
    pub fn none() -> Self {
        Self {
            number: None,
            confidence: 0.0,
        }
    }
}

/// Turns recognized regions into a phone-number candidate.
pub trait PhoneExtractor: Send + Sync + 'static {
    fn extract(&self, regions: &[TextRegion]) -> Result<PhoneMatch, ExtractionError>;
}

/// Looks for a labelled contract number first, then any `5xxxxxxxxx` run.
#[derive(Debug, Clone)]
pub struct ContractNumberExtractor {
    contract: Regex,
    fallback: Regex,
}

impl ContractNumberExtractor {
    pub fn new() -> Result<Self, ExtractionError> {
        Self::with_patterns(CONTRACT_PATTERN, FALLBACK_PATTERN)
    }

    /// `contract` must have one capture group holding the number.
    pub fn with_patterns(contract: &str, fallback: &str) -> Result<Self, ExtractionError> {
        let contract =
            Regex::new(contract).map_err(|e| ExtractionError::InvalidPattern(e.to_string()))?;
        if contract.captures_len() < 2 {
            return Err(ExtractionError::InvalidPattern(
                "contract pattern needs a capture group".to_string(),
            ));
        }
        let fallback =
            Regex::new(fallback).map_err(|e| ExtractionError::InvalidPattern(e.to_string()))?;
        Ok(Self { contract, fallback })
    }

    fn contract_match(&self, regions: &[TextRegion], full_text: &str) -> Option<PhoneMatch> {
        let number = self.contract.captures(full_text)?.get(1)?.as_str();
        if !number.starts_with('5') {
            return None;
        }

        let confidence = regions
            .iter()
            .find(|r| r.text.contains(number) || r.text.contains("Sözle"))
            .map(|r| r.confidence)
            .unwrap_or(UNATTRIBUTED_CONFIDENCE);

        Some(PhoneMatch {
            number: Some(number.to_string()),
            confidence,
        })
    }

    fn fallback_match(&self, regions: &[TextRegion], full_text: &str) -> Option<PhoneMatch> {
        let digits: String = full_text.chars().filter(|c| c.is_ascii_digit()).collect();
        let number = self.fallback.find(&digits)?.as_str();

        let confidence = regions
            .iter()
            .map(|r| r.confidence)
            .fold(0.0_f64, f64::max);

        Some(PhoneMatch {
            number: Some(number.to_string()),
            confidence,
        })
    }
}

impl PhoneExtractor for ContractNumberExtractor {
    fn extract(&self, regions: &[TextRegion]) -> Result<PhoneMatch, ExtractionError> {
        let full_text = joined_text(regions);

        Ok(self
            .contract_match(regions, &full_text)
            .or_else(|| self.fallback_match(regions, &full_text))
            .unwrap_or_else(PhoneMatch::none))
    }
}

/// Render a 10-digit national number as `0535 631 48 48` (or `+90 535 631 48 48`).
///
/// Anything that is not exactly ten ASCII digits is returned unchanged.
pub fn format_phone_number(number: &str, with_country_code: bool) -> String {
    if number.len() != 10 || !number.bytes().all(|b| b.is_ascii_digit()) {
        return number.to_string();
    }

    let grouped = format!(
        "{} {} {} {}",
        &number[0..3],
        &number[3..6],
        &number[6..8],
        &number[8..10]
    );

    if with_country_code {
        format!("+90 {grouped}")
    } else {
        format!("0{grouped}")
    }
}
