use serde::{Deserialize, Serialize};

/// One piece of recognized text with the model's confidence in \[0, 1\].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRegion {
    pub text: String,
    pub confidence: f64,
}

impl TextRegion {
    pub fn new(text: impl Into<String>, confidence: f64) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }
}

/// Drop empty regions and those scored below `min_confidence`.
pub fn retain_confident(regions: Vec<TextRegion>, min_confidence: f64) -> Vec<TextRegion> {
    regions
        .into_iter()
        .filter(|r| !r.text.is_empty() && r.confidence >= min_confidence)
        .collect()
}

/// Space-joined text of all regions, in recognition order.
pub fn joined_text(regions: &[TextRegion]) -> String {
    regions
        .iter()
        .map(|r| r.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_confidence_and_empty_regions_are_dropped() {
        let regions = vec![
            TextRegion::new("Sözleşme-5356314848", 0.95),
            TextRegion::new("noise", 0.1),
            TextRegion::new("", 0.99),
            TextRegion::new("edge", 0.3),
        ];

        let kept = retain_confident(regions, 0.3);
        let texts: Vec<_> = kept.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["Sözleşme-5356314848", "edge"]);
    }

    #[test]
    fn joined_text_uses_single_spaces() {
        let regions = vec![TextRegion::new("a", 1.0), TextRegion::new("b c", 1.0)];
        assert_eq!(joined_text(&regions), "a b c");
        assert_eq!(joined_text(&[]), "");
    }
}
