//! Per-track kinematic parameters and motility classification.

use crate::config::Config;
use crate::error::{CasaError, CasaResult};
use crate::kinematics::path::{self, Point};
use crate::models::{Detection, KinematicParams, MotilityClass, Track};
use tracing::{debug, warn};

/// Tracks shorter than this are averaged with the raw path instead of smoothed.
const MIN_POINTS_FOR_SMOOTHING: usize = 5;

/// Reference-standard velocity thresholds for motility classes (μm/s).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotilityThresholds {
    pub vcl_progressive: f64,
    pub vsl_progressive: f64,
    pub vcl_motile: f64,
}

impl Default for MotilityThresholds {
    fn default() -> Self {
        Self {
            vcl_progressive: 25.0,
            vsl_progressive: 5.0,
            vcl_motile: 5.0,
        }
    }
}

/// Settings for the kinematics calculator.
#[derive(Debug, Clone, PartialEq)]
pub struct CalculatorSettings {
    pub microns_per_pixel: f64,
    pub smoothing_window: usize,
    pub min_track_points: usize,
    pub thresholds: MotilityThresholds,
}

impl Default for CalculatorSettings {
    fn default() -> Self {
        Self {
            microns_per_pixel: 0.2,
            smoothing_window: 3,
            min_track_points: 3,
            thresholds: MotilityThresholds::default(),
        }
    }
}

impl From<&Config> for CalculatorSettings {
    fn from(config: &Config) -> Self {
        Self {
            microns_per_pixel: config.calibration.microns_per_pixel,
            smoothing_window: config.calibration.smoothing_window,
            min_track_points: config.calibration.min_track_points.max(3),
            thresholds: MotilityThresholds {
                vcl_progressive: config.reference.vcl_progressive,
                vsl_progressive: config.reference.vsl_progressive,
                vcl_motile: config.reference.vcl_motile,
            },
        }
    }
}

/// Computes kinematics for individual tracks. Holds no per-sample state.
#[derive(Debug, Clone, Default)]
pub struct KinematicsCalculator {
    settings: CalculatorSettings,
}

impl KinematicsCalculator {
    pub fn new(settings: CalculatorSettings) -> Self {
        Self { settings }
    }

    /// Compute the eight kinematic parameters and the motility class of a track.
    ///
    /// Fails with [`CasaError::InvalidTrack`] when the track is too short,
    /// the frame rate is unusable or timestamps are not strictly increasing,
    /// and with [`CasaError::Numerical`] when the geometry produces a
    /// non-finite value.
    pub fn compute(
        &self,
        detections: &[Detection],
        frame_rate: f64,
    ) -> CasaResult<(KinematicParams, MotilityClass)> {
        let min_points = self.settings.min_track_points.max(3);
        if detections.len() < min_points {
            return Err(CasaError::InvalidTrack(format!(
                "track has {} detections, at least {} required",
                detections.len(),
                min_points
            )));
        }

        if !(frame_rate.is_finite() && frame_rate > 0.0) {
            return Err(CasaError::InvalidTrack(format!(
                "frame rate must be positive, got {}",
                frame_rate
            )));
        }

        for pair in detections.windows(2) {
            let (a, b) = (pair[0].timestamp, pair[1].timestamp);
            if !(a.is_finite() && b.is_finite()) || b <= a {
                return Err(CasaError::InvalidTrack(format!(
                    "timestamps must be strictly increasing ({} then {})",
                    a, b
                )));
            }
        }

        let scale = self.settings.microns_per_pixel;
        let points: Vec<Point> = detections
            .iter()
            .map(|d| (d.x * scale, d.y * scale))
            .collect();
        if points.iter().any(|p| !(p.0.is_finite() && p.1.is_finite())) {
            return Err(CasaError::InvalidTrack("non-finite position".to_string()));
        }

        // Non-empty and strictly increasing, so total_time > 0.
        let total_time = detections[detections.len() - 1].timestamp - detections[0].timestamp;

        let vcl = path::path_length(&points) / total_time;
        let vsl = path::distance(points[0], points[points.len() - 1]) / total_time;
        let vap = if points.len() >= MIN_POINTS_FOR_SMOOTHING {
            let smoothed = path::smooth(&points, self.settings.smoothing_window);
            path::path_length(&smoothed) / total_time
        } else {
            vsl
        };

        let alh = match path::fit_line(&points) {
            Some(line) => {
                points.iter().map(|p| line.distance_to(*p)).sum::<f64>() / points.len() as f64
            }
            None => 0.0,
        };

        let bcf = match path::lateral_crossings(&points) {
            Some(crossings) => (crossings as f64 / 2.0) / total_time,
            None => 0.0,
        };

        let params = KinematicParams {
            vcl,
            vsl,
            vap,
            lin: percent_ratio(vsl, vcl),
            str: percent_ratio(vsl, vap),
            wob: percent_ratio(vap, vcl),
            alh,
            bcf,
        };

        if let Some(parameter) = params.first_non_finite() {
            return Err(CasaError::Numerical(format!(
                "{} evaluated to {}",
                parameter,
                params.get(parameter)
            )));
        }

        Ok((params, self.classify(vcl, vsl)))
    }

    /// Assign a motility class from curvilinear and straight-line velocity.
    pub fn classify(&self, vcl: f64, vsl: f64) -> MotilityClass {
        let t = &self.settings.thresholds;
        if vcl >= t.vcl_progressive && vsl >= t.vsl_progressive {
            MotilityClass::Progressive
        } else if vcl > t.vcl_motile {
            MotilityClass::NonProgressive
        } else {
            MotilityClass::Immotile
        }
    }

    /// Attach kinematics to a track, or record why they could not be computed.
    pub fn complete_track(&self, mut track: Track, frame_rate: f64) -> Track {
        match self.compute(&track.detections, frame_rate) {
            Ok((params, class)) => {
                track.kinematics = Some(params);
                track.motility_class = Some(class);
                track.rejection = None;
            }
            Err(e) => {
                if e.is_track_local() {
                    debug!("Dropping track {}: {}", track.track_id, e);
                } else {
                    warn!("Dropping track {}: {}", track.track_id, e);
                }
                track.kinematics = None;
                track.motility_class = None;
                track.rejection = Some(e.to_string());
            }
        }
        track
    }

    /// Complete every track. Tracks are independent of each other.
    pub fn complete_tracks(&self, tracks: Vec<Track>, frame_rate: f64) -> Vec<Track> {
        tracks
            .into_iter()
            .map(|t| self.complete_track(t, frame_rate))
            .collect()
    }
}

/// `numerator / denominator` in percent, 0 when the denominator is 0.
fn percent_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator * 100.0
    } else {
        0.0
    }
}
