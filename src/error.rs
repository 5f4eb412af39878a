//! Error types for the capture and analysis pipeline
use thiserror::Error;

/// Pipeline errors
///
/// `Clone` so a terminal failure can be fanned out to every downstream
/// stream through the latest-value channels.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// Input device could not be opened, formatted or activated
    #[error("Device error: {0}")]
    Device(String),

    /// A frame of the wrong length reached the analyzer
    #[error("Analysis error: expected {expected} samples, got {actual}")]
    Analysis { expected: usize, actual: usize },

    /// The producer stream closed with a failure
    #[error("Stream terminated: {0}")]
    StreamTerminated(String),
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
