//! Error taxonomy for the aggregation pipeline.
//!
//! Quality rejections (traces or matches failing a filter) are not errors and
//! never appear here; they are counted in [`crate::pipeline::RunStats`].
//! Cache corruption is handled inside [`crate::cache`] as a miss.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed configuration or CLI input. Fatal, raised before any work.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Zero-area, reversed, or out-of-range bounding box.
    #[error("invalid bounding box: {0}")]
    InvalidBoundingBox(String),

    /// Trace or map-matching service kept failing after all retry attempts.
    #[error("{stage} collaborator unavailable after {attempts} attempt(s): {message}")]
    CollaboratorUnavailable {
        stage: &'static str,
        attempts: u32,
        message: String,
    },

    /// The cache or results directory could not be created or written.
    #[error("cache store not writable at {}: {source}", path.display())]
    CacheUnwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Work was interrupted before completion.
    #[error("cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Returns `true` for failures that must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::InvalidInput(_)
                | PipelineError::InvalidBoundingBox(_)
                | PipelineError::CacheUnwritable { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(PipelineError::InvalidInput("x".into()).is_fatal());
        assert!(PipelineError::InvalidBoundingBox("x".into()).is_fatal());
        assert!(!PipelineError::Cancelled.is_fatal());
        assert!(
            !PipelineError::CollaboratorUnavailable {
                stage: "traces",
                attempts: 3,
                message: "timeout".into(),
            }
            .is_fatal()
        );
    }

    #[test]
    fn test_collaborator_message() {
        let err = PipelineError::CollaboratorUnavailable {
            stage: "map_matching",
            attempts: 2,
            message: "status 503".into(),
        };
        assert_eq!(
            err.to_string(),
            "map_matching collaborator unavailable after 2 attempt(s): status 503"
        );
    }
}
