//! Boundary to the external detection/tracking collaborator.
//!
//! The detector itself lives outside this crate. It is consumed through the
//! [`TrackingSource`] trait; [`DetectionDumpSource`] reads the JSON documents
//! the detector writes.

pub mod dump;

pub use dump::DetectionDumpSource;

use crate::error::CasaResult;
use crate::models::{Detection, VideoProperties};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Detection count of a single video frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameDetections {
    pub frame_number: u64,
    pub timestamp: f64,
    pub detection_count: usize,
}

/// Tracker output for a video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoTracking {
    pub video_properties: VideoProperties,
    #[serde(default)]
    pub frame_detections: Vec<FrameDetections>,
    /// Track identity to detections in temporal order.
    #[serde(default)]
    pub tracks: BTreeMap<u64, Vec<Detection>>,
}

/// Image dimensions reported by the detector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageProperties {
    pub width: u32,
    pub height: u32,
}

/// Detector output for a still image. Detections carry no track identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageDetections {
    pub image_properties: ImageProperties,
    #[serde(default)]
    pub detections: Vec<Detection>,
}

/// Produces raw detections and tracks for an input.
///
/// Failures must be reported as [`crate::error::CasaError::Upstream`].
#[async_trait]
pub trait TrackingSource: Send + Sync {
    async fn process_video(&self, input: &Path) -> CasaResult<VideoTracking>;

    async fn process_image(&self, input: &Path) -> CasaResult<ImageDetections>;
}
