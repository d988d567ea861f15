//! Reads detector output that was written to disk as JSON.

use super::{ImageDetections, TrackingSource, VideoTracking};
use crate::error::{CasaError, CasaResult};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::path::Path;
use tracing::{debug, info};

/// Tracking source backed by JSON documents produced by the detector.
#[derive(Debug, Clone, Default)]
pub struct DetectionDumpSource;

impl DetectionDumpSource {
    pub fn new() -> Self {
        Self
    }

    async fn read_document<T: DeserializeOwned>(input: &Path) -> CasaResult<T> {
        let content = tokio::fs::read_to_string(input).await.map_err(|e| {
            CasaError::Upstream(format!(
                "could not read tracking data {}: {}",
                input.display(),
                e
            ))
        })?;

        serde_json::from_str(&content).map_err(|e| {
            CasaError::Upstream(format!(
                "malformed tracking data in {}: {}",
                input.display(),
                e
            ))
        })
    }
}

#[async_trait]
impl TrackingSource for DetectionDumpSource {
    async fn process_video(&self, input: &Path) -> CasaResult<VideoTracking> {
        debug!("Reading video tracking data from {}", input.display());
        let tracking: VideoTracking = Self::read_document(input).await?;

        let fps = tracking.video_properties.fps;
        if !(fps.is_finite() && fps > 0.0) {
            return Err(CasaError::Upstream(format!(
                "video reports an unusable frame rate ({})",
                fps
            )));
        }

        info!(
            "Loaded {} tracks over {} frames from {}",
            tracking.tracks.len(),
            tracking.frame_detections.len(),
            input.display()
        );
        Ok(tracking)
    }

    async fn process_image(&self, input: &Path) -> CasaResult<ImageDetections> {
        debug!("Reading image detections from {}", input.display());
        let detections: ImageDetections = Self::read_document(input).await?;

        info!(
            "Loaded {} detections from {}",
            detections.detections.len(),
            input.display()
        );
        Ok(detections)
    }
}
