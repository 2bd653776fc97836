//! Purpose-category normalisation.

use crate::types::UNKNOWN_CODE;
use serde::{Deserialize, Serialize};

/// Coarse cookie purpose, with its stable export code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
    Necessary,
    Functional,
    Analytics,
    Advertising,
    Social,
}

impl Purpose {
    /// Tested in this order; the first category with a contained keyword wins.
    pub const KEYWORDS: [(Purpose, &'static [&'static str]); 5] = [
        (Purpose::Necessary, &["necessary", "essential", "required", "strictly"]),
        (Purpose::Functional, &["functional", "preference", "personalization"]),
        (Purpose::Analytics, &["analytics", "performance", "statistics", "measurement"]),
        (Purpose::Advertising, &["advertising", "marketing", "targeting", "ads"]),
        (Purpose::Social, &["social", "media"]),
    ];

    pub fn code(&self) -> i32 {
        match self {
            Purpose::Necessary => 0,
            Purpose::Functional => 1,
            Purpose::Analytics => 2,
            Purpose::Advertising => 3,
            Purpose::Social => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::Necessary => "necessary",
            Purpose::Functional => "functional",
            Purpose::Analytics => "analytics",
            Purpose::Advertising => "advertising",
            Purpose::Social => "social",
        }
    }

    /// Classify free-text category by case-insensitive keyword containment.
    pub fn classify(text: &str) -> Option<Purpose> {
        let lower = text.to_lowercase();
        Self::KEYWORDS
            .iter()
            .find(|(_, words)| words.iter().any(|w| lower.contains(w)))
            .map(|(purpose, _)| *purpose)
    }
}

/// Export label for a declared category; -1 when absent or unrecognised.
pub fn purpose_label(category: Option<&str>) -> i32 {
    category
        .and_then(Purpose::classify)
        .map(|p| p.code())
        .unwrap_or(UNKNOWN_CODE)
}

/// Human name for an export label.
pub fn label_name(code: i32) -> &'static str {
    Purpose::KEYWORDS
        .iter()
        .map(|(p, _)| *p)
        .find(|p| p.code() == code)
        .map(|p| p.as_str())
        .unwrap_or("unknown")
}
