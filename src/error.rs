//! Error types for the analysis core.
//!
//! Track-local problems (`InvalidTrack`, `Numerical`) are recovered in place
//! by dropping the track. Everything else is surfaced on the job record or
//! returned to the caller of an orchestrator operation.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CasaError {
    /// Malformed or degenerate track input.
    #[error("Invalid track: {0}")]
    InvalidTrack(String),

    /// Non-finite result while computing kinematics.
    #[error("Numerical error: {0}")]
    Numerical(String),

    /// The detection/tracking collaborator failed or the source could not be read.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// The durable write of a job record failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Analysis not found: {0}")]
    NotFound(String),

    #[error("Analysis {id} is not ready (status: {status})")]
    NotReady { id: String, status: String },

    #[error("Analysis {0} has already finished")]
    JobTerminal(String),

    /// A background task died or an invariant was broken.
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type CasaResult<T> = std::result::Result<T, CasaError>;

impl CasaError {
    /// True for errors that only invalidate a single track.
    pub fn is_track_local(&self) -> bool {
        matches!(self, CasaError::InvalidTrack(_) | CasaError::Numerical(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_local_errors() {
        assert!(CasaError::InvalidTrack("short".into()).is_track_local());
        assert!(CasaError::Numerical("nan".into()).is_track_local());
        assert!(!CasaError::Upstream("gone".into()).is_track_local());
        assert!(!CasaError::NotFound("abc".into()).is_track_local());
    }

    #[test]
    fn test_not_ready_message() {
        let err = CasaError::NotReady {
            id: "abc".to_string(),
            status: "processing".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Analysis abc is not ready (status: processing)"
        );
    }
}
