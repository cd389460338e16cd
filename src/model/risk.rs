//! Risk assessment computed before each protected operation.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse risk classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Classify a 0–100 score against the active blocking threshold: HIGH
    /// at or above it, MEDIUM from two thirds of it, LOW below that.
    #[must_use]
    #[allow(clippy::cast_lossless, clippy::cast_possible_truncation)]
    pub const fn from_score(score: u8, threshold: u8) -> Self {
        let medium = (threshold as u16 * 2 / 3) as u8;
        if score >= threshold {
            Self::High
        } else if score >= medium {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        })
    }
}

/// The result of scoring one operation. Ephemeral; never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub risk_level: RiskLevel,

    /// Additive factor score, capped at 100.
    pub risk_score: u8,
    pub should_block: bool,

    /// Human-readable factors in the order they were applied.
    pub factors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_follow_the_threshold() {
        assert_eq!(RiskLevel::from_score(39, 60), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(40, 60), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(59, 60), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(60, 60), RiskLevel::High);
    }

    #[test]
    fn lower_threshold_raises_levels() {
        assert_eq!(RiskLevel::from_score(65, 30), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(20, 30), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(19, 30), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0, 0), RiskLevel::High);
    }
}
