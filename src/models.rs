//! Data models for the analyzer.
//!
//! This module contains the core data structures shared by the kinematics
//! calculator, the population aggregator, the quality assessment and the
//! job orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A single localized observation produced by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Horizontal position in pixels.
    pub x: f64,
    /// Vertical position in pixels.
    pub y: f64,
    /// Detector confidence score.
    #[serde(default)]
    pub confidence: f64,
    /// Index of the frame the detection belongs to.
    #[serde(default)]
    pub frame_number: u64,
    /// Frame timestamp in seconds.
    #[serde(default)]
    pub timestamp: f64,
}

#[cfg(test)]
impl Detection {
    pub fn new(x: f64, y: f64, frame_number: u64, timestamp: f64) -> Self {
        Self {
            x,
            y,
            confidence: 1.0,
            frame_number,
            timestamp,
        }
    }
}

/// Motility class of a single track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotilityClass {
    /// Actively moving along a mostly straight path.
    Progressive,
    /// Moving, but without net progression.
    NonProgressive,
    /// No meaningful movement.
    Immotile,
}

impl fmt::Display for MotilityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl MotilityClass {
    /// Stable snake_case identifier, as used in exports.
    pub fn as_str(&self) -> &'static str {
        match self {
            MotilityClass::Progressive => "progressive",
            MotilityClass::NonProgressive => "non_progressive",
            MotilityClass::Immotile => "immotile",
        }
    }
}

/// One of the eight kinematic parameters of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KinematicParameter {
    /// Curvilinear velocity.
    Vcl,
    /// Straight-line velocity.
    Vsl,
    /// Average path velocity.
    Vap,
    /// Linearity.
    Lin,
    /// Straightness.
    Str,
    /// Wobble.
    Wob,
    /// Amplitude of lateral head displacement.
    Alh,
    /// Beat-cross frequency.
    Bcf,
}

impl KinematicParameter {
    pub const ALL: [KinematicParameter; 8] = [
        KinematicParameter::Vcl,
        KinematicParameter::Vsl,
        KinematicParameter::Vap,
        KinematicParameter::Lin,
        KinematicParameter::Str,
        KinematicParameter::Wob,
        KinematicParameter::Alh,
        KinematicParameter::Bcf,
    ];

    /// Lowercase short name (`vcl`, `lin`, ...).
    pub fn name(&self) -> &'static str {
        match self {
            KinematicParameter::Vcl => "vcl",
            KinematicParameter::Vsl => "vsl",
            KinematicParameter::Vap => "vap",
            KinematicParameter::Lin => "lin",
            KinematicParameter::Str => "str",
            KinematicParameter::Wob => "wob",
            KinematicParameter::Alh => "alh",
            KinematicParameter::Bcf => "bcf",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            KinematicParameter::Vcl | KinematicParameter::Vsl | KinematicParameter::Vap => "μm/s",
            KinematicParameter::Lin | KinematicParameter::Str | KinematicParameter::Wob => "%",
            KinematicParameter::Alh => "μm",
            KinematicParameter::Bcf => "Hz",
        }
    }
}

impl fmt::Display for KinematicParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name().to_uppercase())
    }
}

/// The eight kinematic values of a completed track.
///
/// Either all eight are present (the track carries `Some(KinematicParams)`)
/// or none are.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KinematicParams {
    /// Curvilinear velocity (μm/s).
    pub vcl: f64,
    /// Straight-line velocity (μm/s).
    pub vsl: f64,
    /// Average path velocity (μm/s).
    pub vap: f64,
    /// Linearity, VSL / VCL (%).
    pub lin: f64,
    /// Straightness, VSL / VAP (%).
    pub str: f64,
    /// Wobble, VAP / VCL (%).
    pub wob: f64,
    /// Amplitude of lateral head displacement (μm).
    pub alh: f64,
    /// Beat-cross frequency (Hz).
    pub bcf: f64,
}

impl KinematicParams {
    /// Returns the value of a single parameter.
    pub fn get(&self, parameter: KinematicParameter) -> f64 {
        match parameter {
            KinematicParameter::Vcl => self.vcl,
            KinematicParameter::Vsl => self.vsl,
            KinematicParameter::Vap => self.vap,
            KinematicParameter::Lin => self.lin,
            KinematicParameter::Str => self.str,
            KinematicParameter::Wob => self.wob,
            KinematicParameter::Alh => self.alh,
            KinematicParameter::Bcf => self.bcf,
        }
    }

    /// Returns the first parameter holding a non-finite value, if any.
    pub fn first_non_finite(&self) -> Option<KinematicParameter> {
        KinematicParameter::ALL
            .into_iter()
            .find(|p| !self.get(*p).is_finite())
    }
}

/// An ordered sequence of detections sharing one identity across frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Track identity assigned by the tracker.
    pub track_id: u64,
    /// Detections in temporal order.
    pub detections: Vec<Detection>,
    /// First frame of the track.
    pub start_frame: u64,
    /// Last frame of the track.
    pub end_frame: u64,
    /// Elapsed time between first and last detection (seconds).
    pub duration: f64,
    /// Kinematics, once computed. `None` for tracks that were rejected.
    #[serde(default)]
    pub kinematics: Option<KinematicParams>,
    /// Motility class, assigned together with the kinematics.
    #[serde(default)]
    pub motility_class: Option<MotilityClass>,
    /// Why kinematics are missing, when they are.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection: Option<String>,
}

impl Track {
    /// Creates an uncompleted track from its detections.
    pub fn new(track_id: u64, detections: Vec<Detection>) -> Self {
        let (start_frame, end_frame, duration) = match (detections.first(), detections.last()) {
            (Some(first), Some(last)) => (
                first.frame_number,
                last.frame_number,
                last.timestamp - first.timestamp,
            ),
            _ => (0, 0, 0.0),
        };

        Self {
            track_id,
            detections,
            start_frame,
            end_frame,
            duration,
            kinematics: None,
            motility_class: None,
            rejection: None,
        }
    }

    /// Whether the track contributes to population statistics.
    pub fn has_kinematics(&self) -> bool {
        self.kinematics.is_some() && self.motility_class.is_some()
    }
}

/// Mean and standard deviation of one parameter across a population.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterStats {
    pub mean: f64,
    pub std: f64,
}

/// Population-level CASA metrics for one sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CasaMetrics {
    /// Number of valid tracks (video) or detections (image).
    pub total_count: usize,
    /// Concentration estimate (million/ml for video, per megapixel for images).
    pub concentration: f64,
    /// Progressive motility (%).
    pub progressive_motility: f64,
    /// Non-progressive motility (%).
    pub non_progressive_motility: f64,
    /// Progressive + non-progressive (%).
    pub total_motility: f64,
    /// Immotile (%).
    pub immotile: f64,
    pub vcl: ParameterStats,
    pub vsl: ParameterStats,
    pub vap: ParameterStats,
    pub lin: ParameterStats,
    pub str: ParameterStats,
    pub wob: ParameterStats,
    pub alh: ParameterStats,
    pub bcf: ParameterStats,
}

impl CasaMetrics {
    /// Metrics for a sample with no measurable motion: everything immotile.
    pub fn immotile_sample(total_count: usize, concentration: f64) -> Self {
        Self {
            total_count,
            concentration,
            progressive_motility: 0.0,
            non_progressive_motility: 0.0,
            total_motility: 0.0,
            immotile: 100.0,
            vcl: ParameterStats::default(),
            vsl: ParameterStats::default(),
            vap: ParameterStats::default(),
            lin: ParameterStats::default(),
            str: ParameterStats::default(),
            wob: ParameterStats::default(),
            alh: ParameterStats::default(),
            bcf: ParameterStats::default(),
        }
    }

    pub fn stats(&self, parameter: KinematicParameter) -> ParameterStats {
        match parameter {
            KinematicParameter::Vcl => self.vcl,
            KinematicParameter::Vsl => self.vsl,
            KinematicParameter::Vap => self.vap,
            KinematicParameter::Lin => self.lin,
            KinematicParameter::Str => self.str,
            KinematicParameter::Wob => self.wob,
            KinematicParameter::Alh => self.alh,
            KinematicParameter::Bcf => self.bcf,
        }
    }

    pub fn stats_mut(&mut self, parameter: KinematicParameter) -> &mut ParameterStats {
        match parameter {
            KinematicParameter::Vcl => &mut self.vcl,
            KinematicParameter::Vsl => &mut self.vsl,
            KinematicParameter::Vap => &mut self.vap,
            KinematicParameter::Lin => &mut self.lin,
            KinematicParameter::Str => &mut self.str,
            KinematicParameter::Wob => &mut self.wob,
            KinematicParameter::Alh => &mut self.alh,
            KinematicParameter::Bcf => &mut self.bcf,
        }
    }
}

/// Result of checking one population metric against its reference limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceStatus {
    Normal,
    BelowReference,
}

impl fmt::Display for ReferenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceStatus::Normal => write!(f, "normal"),
            ReferenceStatus::BelowReference => write!(f, "below_reference"),
        }
    }
}

/// Overall sample quality, keyed by how many checks fell below reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityGrade {
    Normal,
    Mild,
    Moderate,
    Severe,
}

impl fmt::Display for QualityGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityGrade::Normal => write!(f, "Normal"),
            QualityGrade::Mild => write!(f, "Mild impairment"),
            QualityGrade::Moderate => write!(f, "Moderate impairment"),
            QualityGrade::Severe => write!(f, "Severe impairment"),
        }
    }
}

/// Quality verdict for a sample against reference thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityAssessment {
    pub concentration_status: ReferenceStatus,
    pub progressive_motility_status: ReferenceStatus,
    pub total_motility_status: ReferenceStatus,
    pub overall_quality: QualityGrade,
    pub recommendations: Vec<String>,
}

/// Kind of input being analyzed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisType {
    Video,
    Image,
}

impl fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisType::Video => write!(f, "video"),
            AnalysisType::Image => write!(f, "image"),
        }
    }
}

/// Lifecycle state of an analysis job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Completed and failed jobs never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Video properties reported by the detector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoProperties {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub total_frames: u64,
    pub duration: f64,
}

/// Detection count at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CountSample {
    pub time: f64,
    pub count: usize,
}

/// Temporal density series for a video sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetrics {
    pub properties: VideoProperties,
    /// Detections per frame.
    pub frame_counts: Vec<usize>,
    /// Detections per megapixel per frame.
    pub frame_densities: Vec<f64>,
    pub count_over_time: Vec<CountSample>,
}

/// A grid cell holding an unusually high number of detections.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DensityRegion {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
    pub density: f64,
}

/// Spatial density regions for a still image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMetrics {
    pub width: u32,
    pub height: u32,
    pub detection_regions: Vec<DensityRegion>,
}

/// Metrics that only make sense for one kind of input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SampleMetrics {
    Video(VideoMetrics),
    Image(ImageMetrics),
}

/// Everything a completed analysis produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Size of the input in bytes, 0 when it could not be determined.
    #[serde(default)]
    pub file_size: u64,
    pub casa_metrics: CasaMetrics,
    /// All tracks, including rejected ones, for audit.
    #[serde(default)]
    pub tracks: Vec<Track>,
    pub sample_metrics: SampleMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assessment: Option<QualityAssessment>,
}

/// Which stage a job failure originated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Upstream,
    Persistence,
    Internal,
}

/// Error recorded on a failed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
}

/// The unit of work: one sample being analyzed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub id: String,
    /// Display name of the input.
    pub filename: String,
    /// Where the detection/tracking output is read from.
    pub input_path: PathBuf,
    pub analysis_type: AnalysisType,
    pub status: JobStatus,
    /// Progress in percent, 0 to 100.
    pub progress: f64,
    /// Human-readable description of the current step.
    pub message: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Wall-clock processing time in seconds.
    #[serde(default)]
    pub processing_time: Option<f64>,
    #[serde(default)]
    pub result: Option<AnalysisResult>,
    #[serde(default)]
    pub error: Option<JobFailure>,
    /// Whether the current terminal state has been written to durable storage.
    #[serde(default)]
    pub persisted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistence_error: Option<String>,
}

impl AnalysisJob {
    /// Creates a new job in the `pending` state.
    pub fn new(
        id: String,
        filename: String,
        input_path: PathBuf,
        analysis_type: AnalysisType,
    ) -> Self {
        Self {
            id,
            filename,
            input_path,
            analysis_type,
            status: JobStatus::Pending,
            progress: 0.0,
            message: "Queued".to_string(),
            created_at: Utc::now(),
            completed_at: None,
            processing_time: None,
            result: None,
            error: None,
            persisted: false,
            persistence_error: None,
        }
    }

    pub fn status_view(&self) -> JobStatusView {
        JobStatusView {
            id: self.id.clone(),
            status: self.status,
            progress: self.progress,
            message: self.message.clone(),
            created_at: self.created_at,
            completed_at: self.completed_at,
        }
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id.clone(),
            filename: self.filename.clone(),
            analysis_type: self.analysis_type,
            status: self.status,
            created_at: self.created_at,
        }
    }
}

/// Status of a job as exposed to readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub id: String,
    pub status: JobStatus,
    pub progress: f64,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// One line of the job listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: String,
    pub filename: String,
    pub analysis_type: AnalysisType,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
}
