//! Sample-level analysis.
//!
//! Aggregation of completed tracks into population metrics, quality
//! assessment against reference limits, and detection density.

pub mod aggregator;
pub mod assessment;
pub mod density;

pub use aggregator::*;
pub use assessment::{assess, ReferenceLimits};
