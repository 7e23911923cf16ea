//! Error types for the recognition → generation → synthesis pipeline.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Pipeline stage an error or event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Recognize,
    Generate,
    Synthesize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Recognize => write!(f, "recognize"),
            Stage::Generate => write!(f, "generate"),
            Stage::Synthesize => write!(f, "synthesize"),
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    /// A preallocated buffer could not be obtained.
    #[error("Failed to allocate {size} byte buffer")]
    AllocationFailure { size: usize },

    /// Connection or transport failure talking to a backend.
    #[error("Network failure: {0}")]
    NetworkFailure(#[from] reqwest::Error),

    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: Stage, after: Duration },

    /// The backend answered with an unexpected status or shape.
    #[error("{stage} protocol error: {message}")]
    ProtocolError { stage: Stage, message: String },

    #[error("Recognition failed: {0}")]
    RecognitionError(String),

    #[error("Generation failed: {0}")]
    GenerationError(String),

    /// A response or utterance did not fit its fixed-capacity buffer.
    #[error("Buffer overflow: {attempted} bytes exceed capacity of {capacity}")]
    OverflowDropped { capacity: usize, attempted: usize },

    #[error("Playback failed: {0}")]
    Playback(String),

    #[error("Audio store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Pipeline cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Only transport failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::NetworkFailure(_))
    }

    pub(crate) fn playback(err: anyhow::Error) -> Self {
        PipelineError::Playback(format!("{:#}", err))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
