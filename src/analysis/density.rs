//! Detection density: per-frame series for videos, hot spots for still images.

use crate::models::{CountSample, DensityRegion, Detection, VideoMetrics, VideoProperties};
use crate::tracking::FrameDetections;

/// Number of grid edges per axis; the grid has `GRID_EDGES - 1` cells per axis.
pub const GRID_EDGES: usize = 50;

/// Percentile of cell counts a cell must exceed to be reported.
const REGION_PERCENTILE: f64 = 75.0;

/// Detections per megapixel; 0 for an empty frame area.
pub fn per_megapixel(count: usize, width: u32, height: u32) -> f64 {
    let area = width as f64 * height as f64;
    if area > 0.0 {
        count as f64 / area * 1_000_000.0
    } else {
        0.0
    }
}

/// Build the temporal density series of a video.
pub fn video_metrics(properties: VideoProperties, frames: &[FrameDetections]) -> VideoMetrics {
    let frame_counts: Vec<usize> = frames.iter().map(|f| f.detection_count).collect();
    let frame_densities = frame_counts
        .iter()
        .map(|c| per_megapixel(*c, properties.width, properties.height))
        .collect();
    let count_over_time = frames
        .iter()
        .map(|f| CountSample {
            time: f.timestamp,
            count: f.detection_count,
        })
        .collect();

    VideoMetrics {
        properties,
        frame_counts,
        frame_densities,
        count_over_time,
    }
}

/// Grid cells whose detection count exceeds the 75th percentile of all cells.
///
/// Detections outside the frame are ignored; the last cell on each axis
/// includes its right edge.
pub fn detection_regions(detections: &[Detection], width: u32, height: u32) -> Vec<DensityRegion> {
    if detections.is_empty() || width == 0 || height == 0 {
        return Vec::new();
    }

    let cells = GRID_EDGES - 1;
    let (w, h) = (width as f64, height as f64);
    let (cell_w, cell_h) = (w / cells as f64, h / cells as f64);
    let mut grid = vec![vec![0usize; cells]; cells];

    for d in detections {
        if !(0.0..=w).contains(&d.x) || !(0.0..=h).contains(&d.y) {
            continue;
        }
        let i = ((d.x / cell_w) as usize).min(cells - 1);
        let j = ((d.y / cell_h) as usize).min(cells - 1);
        grid[i][j] += 1;
    }

    let mut counts: Vec<f64> = grid.iter().flatten().map(|c| *c as f64).collect();
    counts.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let threshold = percentile(&counts, REGION_PERCENTILE);

    let mut regions = Vec::new();
    for (i, column) in grid.iter().enumerate() {
        for (j, count) in column.iter().enumerate() {
            if *count as f64 > threshold {
                regions.push(DensityRegion {
                    x_min: i as f64 * cell_w,
                    x_max: (i + 1) as f64 * cell_w,
                    y_min: j as f64 * cell_h,
                    y_max: (j + 1) as f64 * cell_h,
                    density: *count as f64,
                });
            }
        }
    }

    regions
}

/// Percentile of sorted values with linear interpolation between ranks.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }

    let rank = q / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let fraction = rank - lower as f64;

    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}
