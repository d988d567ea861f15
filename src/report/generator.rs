//! Markdown and JSON report generation.
//!
//! This module renders a finished analysis job as a human-readable
//! Markdown report or as pretty-printed JSON.

use crate::analysis::{class_distribution, fastest_tracks, rejected_count};
use crate::models::{
    AnalysisJob, AnalysisResult, CasaMetrics, ImageMetrics, JobStatus, KinematicParameter,
    MotilityClass, QualityAssessment, ReferenceStatus, SampleMetrics, Track, VideoMetrics,
};
use anyhow::Result;

/// Tracks listed individually in the report.
const REPORT_TRACK_LIMIT: usize = 20;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(job: &AnalysisJob) -> String {
    let mut output = String::new();

    // Title
    output.push_str("# CASA Analysis Report\n\n");

    output.push_str(&generate_metadata_section(job));

    match (&job.status, &job.result) {
        (JobStatus::Completed, Some(result)) => {
            output.push_str(&generate_summary_section(&result.casa_metrics));
            if let Some(assessment) = &result.assessment {
                output.push_str(&generate_assessment_section(assessment));
            }
            output.push_str(&generate_sample_section(result));
            if !result.tracks.is_empty() {
                output.push_str(&generate_tracks_section(&result.tracks));
            }
        }
        _ => {
            output.push_str("## Status\n\n");
            output.push_str(&format!(
                "Analysis is **{}**: {}\n\n",
                job.status, job.message
            ));
        }
    }

    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(job: &AnalysisJob) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Analysis ID:** `{}`\n", job.id));
    section.push_str(&format!("- **File:** {}\n", job.filename));
    section.push_str(&format!("- **Type:** {}\n", job.analysis_type));
    section.push_str(&format!("- **Status:** {}\n", job.status));
    section.push_str(&format!(
        "- **Created:** {}\n",
        job.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    if let Some(completed) = job.completed_at {
        section.push_str(&format!(
            "- **Completed:** {}\n",
            completed.format("%Y-%m-%d %H:%M:%S UTC")
        ));
    }
    if let Some(secs) = job.processing_time {
        section.push_str(&format!("- **Processing Time:** {:.2}s\n", secs));
    }
    if let Some(result) = &job.result {
        section.push_str(&format!("- **File Size:** {} bytes\n", result.file_size));
    }
    if let Some(error) = &job.error {
        section.push_str(&format!("- **Error:** {}\n", error.message));
    }
    section.push('\n');

    section
}

/// Generate the population summary section.
fn generate_summary_section(metrics: &CasaMetrics) -> String {
    let mut section = String::new();

    section.push_str("## Summary\n\n");
    section.push_str(&format!("- **Total Count:** {}\n", metrics.total_count));
    section.push_str(&format!(
        "- **Concentration:** {:.2}\n\n",
        metrics.concentration
    ));

    section.push_str("### Motility\n\n");
    section.push_str("| Progressive | Non-progressive | Immotile | **Total Motility** |\n");
    section.push_str("|:---:|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {:.1}% | {:.1}% | {:.1}% | **{:.1}%** |\n\n",
        metrics.progressive_motility,
        metrics.non_progressive_motility,
        metrics.immotile,
        metrics.total_motility
    ));

    section.push_str("### Kinematics\n\n");
    section.push_str("| Parameter | Mean | Std | Unit |\n");
    section.push_str("|:---|---:|---:|:---|\n");
    for parameter in KinematicParameter::ALL {
        let stats = metrics.stats(parameter);
        section.push_str(&format!(
            "| {} | {:.2} | {:.2} | {} |\n",
            parameter,
            stats.mean,
            stats.std,
            parameter.unit()
        ));
    }
    section.push('\n');

    section
}

fn status_badge(status: ReferenceStatus) -> &'static str {
    match status {
        ReferenceStatus::Normal => "✅ Normal",
        ReferenceStatus::BelowReference => "⚠️ Below reference",
    }
}

/// Generate the quality assessment section.
fn generate_assessment_section(assessment: &QualityAssessment) -> String {
    let mut section = String::new();

    section.push_str("## Quality Assessment\n\n");
    section.push_str(&format!(
        "**Overall:** {}\n\n",
        assessment.overall_quality
    ));
    section.push_str("| Check | Status |\n");
    section.push_str("|:---|:---|\n");
    section.push_str(&format!(
        "| Concentration | {} |\n",
        status_badge(assessment.concentration_status)
    ));
    section.push_str(&format!(
        "| Progressive motility | {} |\n",
        status_badge(assessment.progressive_motility_status)
    ));
    section.push_str(&format!(
        "| Total motility | {} |\n\n",
        status_badge(assessment.total_motility_status)
    ));

    if !assessment.recommendations.is_empty() {
        section.push_str("### Recommendations\n\n");
        for (i, rec) in assessment.recommendations.iter().enumerate() {
            section.push_str(&format!("{}. {}\n", i + 1, rec));
        }
        section.push('\n');
    }

    section
}

/// Generate the video or image specific section.
fn generate_sample_section(result: &AnalysisResult) -> String {
    match &result.sample_metrics {
        SampleMetrics::Video(video) => generate_video_section(video),
        SampleMetrics::Image(image) => generate_image_section(image),
    }
}

fn generate_video_section(video: &VideoMetrics) -> String {
    let mut section = String::new();
    let props = &video.properties;

    section.push_str("## Video\n\n");
    section.push_str(&format!(
        "- **Resolution:** {}x{}\n",
        props.width, props.height
    ));
    section.push_str(&format!("- **Frame Rate:** {:.2} fps\n", props.fps));
    section.push_str(&format!(
        "- **Frames:** {} ({:.2}s)\n",
        props.total_frames, props.duration
    ));

    if !video.frame_counts.is_empty() {
        let total: usize = video.frame_counts.iter().sum();
        let peak = video.frame_counts.iter().copied().max().unwrap_or(0);
        let mean = total as f64 / video.frame_counts.len() as f64;
        section.push_str(&format!(
            "- **Detections per Frame:** {:.1} mean, {} peak\n",
            mean, peak
        ));
    }
    section.push('\n');

    section
}

fn generate_image_section(image: &ImageMetrics) -> String {
    let mut section = String::new();

    section.push_str("## Image\n\n");
    section.push_str(&format!(
        "- **Resolution:** {}x{}\n",
        image.width, image.height
    ));
    section.push_str(&format!(
        "- **High-density Regions:** {}\n\n",
        image.detection_regions.len()
    ));

    if !image.detection_regions.is_empty() {
        section.push_str("| X | Y | Detections |\n");
        section.push_str("|:---|:---|:---:|\n");
        for region in &image.detection_regions {
            section.push_str(&format!(
                "| {:.0}-{:.0} | {:.0}-{:.0} | {:.0} |\n",
                region.x_min, region.x_max, region.y_min, region.y_max, region.density
            ));
        }
        section.push('\n');
    }

    section
}

/// Generate the per-track section.
fn generate_tracks_section(tracks: &[Track]) -> String {
    let mut section = String::new();

    section.push_str("## Tracks\n\n");

    let dist = class_distribution(tracks);
    section.push_str("| Class | Tracks |\n");
    section.push_str("|:---|:---:|\n");
    for class in [
        MotilityClass::Progressive,
        MotilityClass::NonProgressive,
        MotilityClass::Immotile,
    ] {
        section.push_str(&format!(
            "| {} | {} |\n",
            class,
            dist.get(&class).copied().unwrap_or(0)
        ));
    }
    let rejected = rejected_count(tracks);
    if rejected > 0 {
        section.push_str(&format!("| rejected | {} |\n", rejected));
    }
    section.push('\n');

    let fastest = fastest_tracks(tracks, REPORT_TRACK_LIMIT);
    if fastest.is_empty() {
        return section;
    }

    section.push_str(&format!("### Fastest {} Tracks\n\n", fastest.len()));
    section.push_str("| Track | Frames | VCL | VSL | VAP | LIN | STR | WOB | ALH | BCF | Class |\n");
    section.push_str("|:---|:---|---:|---:|---:|---:|---:|---:|---:|---:|:---|\n");
    for track in fastest {
        section.push_str(&generate_track_row(track));
    }
    section.push('\n');

    section
}

fn generate_track_row(track: &Track) -> String {
    let class = track
        .motility_class
        .map(|c| c.to_string())
        .unwrap_or_default();

    match track.kinematics {
        Some(k) => format!(
            "| {} | {}-{} | {:.1} | {:.1} | {:.1} | {:.1} | {:.1} | {:.1} | {:.2} | {:.1} | {} |\n",
            track.track_id,
            track.start_frame,
            track.end_frame,
            k.vcl,
            k.vsl,
            k.vap,
            k.lin,
            k.str,
            k.wob,
            k.alh,
            k.bcf,
            class
        ),
        None => format!(
            "| {} | {}-{} | | | | | | | | | {} |\n",
            track.track_id, track.start_frame, track.end_frame, class
        ),
    }
}

/// Generate the report footer.
fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str(&format!(
        "*Report generated by casa-analyzer v{}*\n",
        env!("CARGO_PKG_VERSION")
    ));

    footer
}

/// Generate a JSON report: the full job record.
pub fn generate_json_report(job: &AnalysisJob) -> Result<String> {
    serde_json::to_string_pretty(job).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{aggregate, assess, ReferenceLimits};
    use crate::models::{
        AnalysisType, Detection, DensityRegion, KinematicParams, VideoProperties,
    };
    use std::path::PathBuf;

    fn create_test_track(id: u64, vcl: f64, class: Option<MotilityClass>) -> Track {
        let mut track = Track::new(
            id,
            vec![
                Detection::new(0.0, 0.0, 0, 0.0),
                Detection::new(1.0, 0.0, 1, 0.1),
                Detection::new(2.0, 0.0, 2, 0.2),
            ],
        );
        if let Some(class) = class {
            track.kinematics = Some(KinematicParams {
                vcl,
                vsl: vcl / 2.0,
                vap: vcl / 1.5,
                lin: 50.0,
                str: 75.0,
                wob: 66.7,
                alh: 1.2,
                bcf: 3.0,
            });
            track.motility_class = Some(class);
        } else {
            track.rejection = Some("Invalid track: too short".to_string());
        }
        track
    }

    fn create_test_job() -> AnalysisJob {
        let tracks = vec![
            create_test_track(1, 80.0, Some(MotilityClass::Progressive)),
            create_test_track(2, 10.0, Some(MotilityClass::NonProgressive)),
            create_test_track(3, 0.0, None),
        ];
        let metrics = aggregate(&tracks, 1.0);
        let assessment = assess(&metrics, &ReferenceLimits::default());

        let mut job = AnalysisJob::new(
            "job-1".to_string(),
            "sample.avi".to_string(),
            PathBuf::from("sample.json"),
            AnalysisType::Video,
        );
        job.status = JobStatus::Completed;
        job.processing_time = Some(1.25);
        job.result = Some(AnalysisResult {
            file_size: 2048,
            casa_metrics: metrics,
            tracks,
            sample_metrics: SampleMetrics::Video(VideoMetrics {
                properties: VideoProperties {
                    width: 640,
                    height: 480,
                    fps: 30.0,
                    total_frames: 3,
                    duration: 0.1,
                },
                frame_counts: vec![2, 3, 4],
                frame_densities: vec![],
                count_over_time: vec![],
            }),
            assessment: Some(assessment),
        });
        job
    }

    #[test]
    fn test_generate_markdown_report() {
        let markdown = generate_markdown_report(&create_test_job());

        assert!(markdown.contains("# CASA Analysis Report"));
        assert!(markdown.contains("## Metadata"));
        assert!(markdown.contains("`job-1`"));
        assert!(markdown.contains("## Summary"));
        assert!(markdown.contains("| VCL | 45.00 |"));
        assert!(markdown.contains("## Quality Assessment"));
        assert!(markdown.contains("## Video"));
        assert!(markdown.contains("3.0 mean, 4 peak"));
        assert!(markdown.contains("| rejected | 1 |"));
        assert!(markdown.contains("### Fastest 2 Tracks"));
    }

    #[test]
    fn test_unfinished_job_has_status_only() {
        let mut job = create_test_job();
        job.status = JobStatus::Failed;
        job.result = None;
        job.message = "Analysis failed: decoder crashed".to_string();

        let markdown = generate_markdown_report(&job);
        assert!(markdown.contains("## Status"));
        assert!(markdown.contains("decoder crashed"));
        assert!(!markdown.contains("## Summary"));
    }

    #[test]
    fn test_generate_image_section() {
        let section = generate_image_section(&ImageMetrics {
            width: 100,
            height: 100,
            detection_regions: vec![DensityRegion {
                x_min: 0.0,
                x_max: 2.0,
                y_min: 4.0,
                y_max: 6.0,
                density: 3.0,
            }],
        });

        assert!(section.contains("100x100"));
        assert!(section.contains("| 0-2 | 4-6 | 3 |"));
    }

    #[test]
    fn test_track_row_without_kinematics() {
        let row = generate_track_row(&create_test_track(9, 0.0, None));
        assert!(row.starts_with("| 9 | 0-2 |"));
        assert_eq!(row.matches('|').count(), 12);
    }

    #[test]
    fn test_generate_json_report() {
        let json = generate_json_report(&create_test_job()).unwrap();

        assert!(json.contains("\"casa_metrics\""));
        assert!(json.contains("\"tracks\""));
        assert!(json.contains("\"type\": \"video\""));
    }
}
