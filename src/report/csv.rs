//! CSV views of an analysis: one population row and a per-track table.

use crate::models::{AnalysisJob, CasaMetrics, Track};
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Population summary of one analysis. Metric cells are empty without a result.
#[derive(Debug, Serialize)]
struct ResultsRow<'a> {
    analysis_id: &'a str,
    filename: &'a str,
    analysis_type: String,
    created_at: String,
    processing_time: Option<f64>,
    total_count: Option<usize>,
    concentration: Option<f64>,
    progressive_motility_pct: Option<f64>,
    non_progressive_motility_pct: Option<f64>,
    total_motility_pct: Option<f64>,
    immotile_pct: Option<f64>,
    vcl_mean: Option<f64>,
    vcl_std: Option<f64>,
    vsl_mean: Option<f64>,
    vsl_std: Option<f64>,
    vap_mean: Option<f64>,
    vap_std: Option<f64>,
    lin_mean: Option<f64>,
    lin_std: Option<f64>,
    str_mean: Option<f64>,
    str_std: Option<f64>,
    wob_mean: Option<f64>,
    wob_std: Option<f64>,
    alh_mean: Option<f64>,
    alh_std: Option<f64>,
    bcf_mean: Option<f64>,
    bcf_std: Option<f64>,
}

impl<'a> ResultsRow<'a> {
    fn new(job: &'a AnalysisJob) -> Self {
        let m: Option<&CasaMetrics> = job.result.as_ref().map(|r| &r.casa_metrics);
        Self {
            analysis_id: &job.id,
            filename: &job.filename,
            analysis_type: job.analysis_type.to_string(),
            created_at: job.created_at.to_rfc3339(),
            processing_time: job.processing_time,
            total_count: m.map(|m| m.total_count),
            concentration: m.map(|m| m.concentration),
            progressive_motility_pct: m.map(|m| m.progressive_motility),
            non_progressive_motility_pct: m.map(|m| m.non_progressive_motility),
            total_motility_pct: m.map(|m| m.total_motility),
            immotile_pct: m.map(|m| m.immotile),
            vcl_mean: m.map(|m| m.vcl.mean),
            vcl_std: m.map(|m| m.vcl.std),
            vsl_mean: m.map(|m| m.vsl.mean),
            vsl_std: m.map(|m| m.vsl.std),
            vap_mean: m.map(|m| m.vap.mean),
            vap_std: m.map(|m| m.vap.std),
            lin_mean: m.map(|m| m.lin.mean),
            lin_std: m.map(|m| m.lin.std),
            str_mean: m.map(|m| m.str.mean),
            str_std: m.map(|m| m.str.std),
            wob_mean: m.map(|m| m.wob.mean),
            wob_std: m.map(|m| m.wob.std),
            alh_mean: m.map(|m| m.alh.mean),
            alh_std: m.map(|m| m.alh.std),
            bcf_mean: m.map(|m| m.bcf.mean),
            bcf_std: m.map(|m| m.bcf.std),
        }
    }
}

/// One track. Tracks without kinematics get empty parameter cells.
#[derive(Debug, Serialize)]
struct TrackRow {
    track_id: u64,
    start_frame: u64,
    end_frame: u64,
    duration: f64,
    vcl: Option<f64>,
    vsl: Option<f64>,
    vap: Option<f64>,
    lin: Option<f64>,
    str: Option<f64>,
    wob: Option<f64>,
    alh: Option<f64>,
    bcf: Option<f64>,
    motility_class: Option<String>,
}

impl From<&Track> for TrackRow {
    fn from(track: &Track) -> Self {
        let k = track.kinematics.as_ref();
        Self {
            track_id: track.track_id,
            start_frame: track.start_frame,
            end_frame: track.end_frame,
            duration: track.duration,
            vcl: k.map(|k| k.vcl),
            vsl: k.map(|k| k.vsl),
            vap: k.map(|k| k.vap),
            lin: k.map(|k| k.lin),
            str: k.map(|k| k.str),
            wob: k.map(|k| k.wob),
            alh: k.map(|k| k.alh),
            bcf: k.map(|k| k.bcf),
            motility_class: track.motility_class.map(|c| c.to_string()),
        }
    }
}

fn write_results(job: &AnalysisJob, path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.serialize(ResultsRow::new(job))?;
    wtr.flush()?;
    Ok(())
}

fn write_tracks(tracks: &[Track], path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    for track in tracks {
        wtr.serialize(TrackRow::from(track))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write `<id>_results.csv` and, when there are tracks, `<id>_tracks.csv`
/// into `dir`. Returns the written paths.
pub fn write_csv_exports(job: &AnalysisJob, dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create export directory {}", dir.display()))?;

    let mut written = Vec::new();

    let results_path = dir.join(format!("{}_results.csv", job.id));
    write_results(job, &results_path)
        .with_context(|| format!("Failed to write {}", results_path.display()))?;
    written.push(results_path);

    if let Some(result) = job.result.as_ref().filter(|r| !r.tracks.is_empty()) {
        let tracks_path = dir.join(format!("{}_tracks.csv", job.id));
        write_tracks(&result.tracks, &tracks_path)
            .with_context(|| format!("Failed to write {}", tracks_path.display()))?;
        written.push(tracks_path);
    }

    Ok(written)
}
