//! Per-job processing: raw tracking data to a finished analysis result.

use crate::analysis::{self, density, ReferenceLimits};
use crate::config::Config;
use crate::error::{CasaError, CasaResult};
use crate::kinematics::{CalculatorSettings, KinematicsCalculator};
use crate::models::{
    AnalysisResult, AnalysisType, CasaMetrics, ImageMetrics, SampleMetrics, Track,
};
use crate::tracking::TrackingSource;
use std::path::Path;
use tracing::{debug, info};

/// Everything the pipeline needs besides the input itself.
#[derive(Debug, Clone)]
pub struct AnalysisSettings {
    pub calculator: CalculatorSettings,
    pub limits: ReferenceLimits,
    /// Million/ml attributed to each valid track.
    pub concentration_per_track: f64,
    /// Attach a quality assessment to video results.
    pub assess: bool,
    /// Maximum number of jobs processed at once.
    pub concurrency: usize,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            calculator: CalculatorSettings::default(),
            limits: ReferenceLimits::default(),
            concentration_per_track: 1.0,
            assess: true,
            concurrency: 4,
        }
    }
}

impl From<&Config> for AnalysisSettings {
    fn from(config: &Config) -> Self {
        Self {
            calculator: CalculatorSettings::from(config),
            limits: ReferenceLimits::from(config),
            concentration_per_track: config.calibration.concentration_per_track,
            assess: config.analysis.assess,
            concurrency: config.general.concurrency.max(1),
        }
    }
}

/// Run the analysis of one input, reporting progress through `progress`.
///
/// `progress` returning an error aborts the run; the orchestrator uses this
/// to stop work on jobs that were deleted in the meantime.
pub async fn run_analysis<F>(
    source: &dyn TrackingSource,
    settings: &AnalysisSettings,
    input: &Path,
    analysis_type: AnalysisType,
    mut progress: F,
) -> CasaResult<AnalysisResult>
where
    F: FnMut(f64, &str) -> CasaResult<()> + Send,
{
    progress(10.0, "Loading tracking data...")?;

    let file_size = match tokio::fs::metadata(input).await {
        Ok(meta) => meta.len(),
        Err(e) => {
            debug!("Could not stat {}: {}", input.display(), e);
            0
        }
    };

    let (casa_metrics, tracks, sample_metrics) = match analysis_type {
        AnalysisType::Video => analyze_video(source, settings, input, &mut progress).await?,
        AnalysisType::Image => analyze_image(source, input, &mut progress).await?,
    };

    // Image concentration is per megapixel and has no motility, so the
    // reference limits do not apply to it.
    let assessment = if settings.assess && analysis_type == AnalysisType::Video {
        progress(80.0, "Assessing sample quality...")?;
        Some(analysis::assess(&casa_metrics, &settings.limits))
    } else {
        None
    };

    progress(90.0, "Saving results...")?;

    Ok(AnalysisResult {
        file_size,
        casa_metrics,
        tracks,
        sample_metrics,
        assessment,
    })
}

async fn analyze_video<F>(
    source: &dyn TrackingSource,
    settings: &AnalysisSettings,
    input: &Path,
    progress: &mut F,
) -> CasaResult<(CasaMetrics, Vec<Track>, SampleMetrics)>
where
    F: FnMut(f64, &str) -> CasaResult<()> + Send,
{
    let tracking = source.process_video(input).await?;
    let fps = tracking.video_properties.fps;

    progress(
        30.0,
        &format!("Computing kinematics for {} tracks...", tracking.tracks.len()),
    )?;

    let tracks: Vec<Track> = tracking
        .tracks
        .into_iter()
        .map(|(id, detections)| Track::new(id, detections))
        .collect();

    let calculator = KinematicsCalculator::new(settings.calculator.clone());
    let tracks = tokio::task::spawn_blocking(move || calculator.complete_tracks(tracks, fps))
        .await
        .map_err(|e| CasaError::Internal(format!("kinematics task failed: {}", e)))?;

    progress(60.0, "Calculating CASA metrics...")?;

    let metrics = analysis::aggregate(&tracks, settings.concentration_per_track);
    info!(
        "{} of {} tracks usable, {:.1}% progressive",
        metrics.total_count,
        tracks.len(),
        metrics.progressive_motility
    );

    let sample = SampleMetrics::Video(density::video_metrics(
        tracking.video_properties,
        &tracking.frame_detections,
    ));

    Ok((metrics, tracks, sample))
}

async fn analyze_image<F>(
    source: &dyn TrackingSource,
    input: &Path,
    progress: &mut F,
) -> CasaResult<(CasaMetrics, Vec<Track>, SampleMetrics)>
where
    F: FnMut(f64, &str) -> CasaResult<()> + Send,
{
    let image = source.process_image(input).await?;
    let (width, height) = (image.image_properties.width, image.image_properties.height);

    progress(60.0, "Calculating metrics...")?;

    let count = image.detections.len();
    let metrics =
        CasaMetrics::immotile_sample(count, density::per_megapixel(count, width, height));
    let regions = density::detection_regions(&image.detections, width, height);
    info!(
        "{} detections, {} high-density regions",
        count,
        regions.len()
    );

    let sample = SampleMetrics::Image(ImageMetrics {
        width,
        height,
        detection_regions: regions,
    });

    Ok((metrics, Vec::new(), sample))
}
