//! Population aggregation and statistics.
//!
//! This module folds the per-track kinematics of one sample into
//! population-level CASA metrics.

use crate::models::{CasaMetrics, KinematicParameter, MotilityClass, ParameterStats, Track};
use std::collections::HashMap;

/// Track counts per motility class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MotilityCounts {
    pub progressive: usize,
    pub non_progressive: usize,
    pub immotile: usize,
}

impl MotilityCounts {
    pub fn total(&self) -> usize {
        self.progressive + self.non_progressive + self.immotile
    }
}

/// Count valid tracks by motility class. Tracks without kinematics are skipped.
pub fn motility_counts(tracks: &[Track]) -> MotilityCounts {
    let mut counts = MotilityCounts::default();

    for class in tracks
        .iter()
        .filter(|t| t.has_kinematics())
        .filter_map(|t| t.motility_class)
    {
        match class {
            MotilityClass::Progressive => counts.progressive += 1,
            MotilityClass::NonProgressive => counts.non_progressive += 1,
            MotilityClass::Immotile => counts.immotile += 1,
        }
    }

    counts
}

/// Mean and population standard deviation; zero for an empty set.
pub fn parameter_stats(values: &[f64]) -> ParameterStats {
    if values.is_empty() {
        return ParameterStats::default();
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

    ParameterStats {
        mean,
        std: variance.sqrt(),
    }
}

/// Compute population metrics over the tracks that carry kinematics.
///
/// An empty population yields 100 % immotile and zeroed statistics.
pub fn aggregate(tracks: &[Track], concentration_per_track: f64) -> CasaMetrics {
    let valid: Vec<&Track> = tracks.iter().filter(|t| t.has_kinematics()).collect();
    let counts = motility_counts(tracks);
    let total = counts.total();

    if total == 0 {
        return CasaMetrics::immotile_sample(0, 0.0);
    }

    let pct = |count: usize| count as f64 / total as f64 * 100.0;
    let mut metrics = CasaMetrics::immotile_sample(total, total as f64 * concentration_per_track);
    metrics.progressive_motility = pct(counts.progressive);
    metrics.non_progressive_motility = pct(counts.non_progressive);
    metrics.total_motility = pct(counts.progressive + counts.non_progressive);
    metrics.immotile = pct(counts.immotile);

    for parameter in KinematicParameter::ALL {
        let values: Vec<f64> = valid
            .iter()
            .filter_map(|t| t.kinematics.map(|k| k.get(parameter)))
            .filter(|v| v.is_finite())
            .collect();
        *metrics.stats_mut(parameter) = parameter_stats(&values);
    }

    metrics
}

/// Number of valid tracks per motility class.
pub fn class_distribution(tracks: &[Track]) -> HashMap<MotilityClass, usize> {
    let mut dist: HashMap<MotilityClass, usize> = HashMap::new();

    for class in tracks
        .iter()
        .filter(|t| t.has_kinematics())
        .filter_map(|t| t.motility_class)
    {
        *dist.entry(class).or_default() += 1;
    }

    dist
}

/// The `n` fastest valid tracks by curvilinear velocity.
pub fn fastest_tracks(tracks: &[Track], n: usize) -> Vec<&Track> {
    let mut valid: Vec<&Track> = tracks.iter().filter(|t| t.has_kinematics()).collect();

    valid.sort_by(|a, b| {
        let va = a.kinematics.map(|k| k.vcl).unwrap_or(0.0);
        let vb = b.kinematics.map(|k| k.vcl).unwrap_or(0.0);
        vb.partial_cmp(&va).unwrap_or(std::cmp::Ordering::Equal)
    });
    valid.truncate(n);

    valid
}

/// Count of tracks that were dropped before aggregation.
pub fn rejected_count(tracks: &[Track]) -> usize {
    tracks.iter().filter(|t| !t.has_kinematics()).count()
}
