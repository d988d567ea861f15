//! Sample quality assessment against reference limits.

use crate::config::Config;
use crate::models::{CasaMetrics, QualityAssessment, QualityGrade, ReferenceStatus};

/// Message used when every checked dimension meets its reference.
pub const ALL_NORMAL_MESSAGE: &str = "All parameters within normal range";

/// Lower reference limits for the checked dimensions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceLimits {
    /// Million/ml.
    pub concentration: f64,
    /// Percent.
    pub progressive_motility: f64,
    /// Percent.
    pub total_motility: f64,
}

impl Default for ReferenceLimits {
    fn default() -> Self {
        Self {
            concentration: 15.0,
            progressive_motility: 32.0,
            total_motility: 40.0,
        }
    }
}

impl From<&Config> for ReferenceLimits {
    fn from(config: &Config) -> Self {
        Self {
            concentration: config.reference.concentration_lower_limit,
            progressive_motility: config.reference.progressive_motility_lower_limit,
            total_motility: config.reference.total_motility_lower_limit,
        }
    }
}

fn check(value: f64, limit: f64) -> ReferenceStatus {
    if value >= limit {
        ReferenceStatus::Normal
    } else {
        ReferenceStatus::BelowReference
    }
}

/// Grade a sample by counting how many dimensions fall below reference.
pub fn assess(metrics: &CasaMetrics, limits: &ReferenceLimits) -> QualityAssessment {
    let concentration_status = check(metrics.concentration, limits.concentration);
    let progressive_motility_status =
        check(metrics.progressive_motility, limits.progressive_motility);
    let total_motility_status = check(metrics.total_motility, limits.total_motility);

    let mut recommendations = Vec::new();
    let checks = [
        (concentration_status, "Low sperm concentration detected"),
        (progressive_motility_status, "Low progressive motility detected"),
        (total_motility_status, "Low total motility detected"),
    ];
    for (status, message) in checks {
        if status == ReferenceStatus::BelowReference {
            recommendations.push(message.to_string());
        }
    }

    let overall_quality = match recommendations.len() {
        0 => QualityGrade::Normal,
        1 => QualityGrade::Mild,
        2 => QualityGrade::Moderate,
        _ => QualityGrade::Severe,
    };

    if recommendations.is_empty() {
        recommendations.push(ALL_NORMAL_MESSAGE.to_string());
    }

    QualityAssessment {
        concentration_status,
        progressive_motility_status,
        total_motility_status,
        overall_quality,
        recommendations,
    }
}
