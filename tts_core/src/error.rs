use thiserror::Error;

use crate::wav::AudioFormat;

/// Errors produced while validating, streaming and assembling audio.
#[derive(Debug, Error)]
pub enum TtsError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Format mismatch: stream is {expected}, segment is {actual}")]
    FormatMismatch {
        expected: AudioFormat,
        actual: AudioFormat,
    },

    #[error("Segment {index} synthesis failed: {reason}")]
    SegmentSynthesisFailed { index: usize, reason: String },

    #[error("Sink busy: {0}")]
    SinkBusy(String),

    #[error("Sink I/O error: {0}")]
    SinkIo(#[from] std::io::Error),

    #[error("Malformed container: {0}")]
    MalformedContainer(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Too many failed segments: {skipped} of {attempted} skipped")]
    TooManyFailedSegments { skipped: usize, attempted: usize },
}

impl TtsError {
    /// Whether the caller may retry the operation that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TtsError::SinkBusy(_) | TtsError::SinkIo(_) | TtsError::SegmentSynthesisFailed { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, TtsError>;
