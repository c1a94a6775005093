//! Error types and handling
//!
//! Every failure the pipeline can surface, in one enum. Fatal variants abort
//! the recording to `Failed`; only dropped raw samples are recoverable and
//! those are counted rather than reported as errors.

use crate::sample::TrackKind;
use thiserror::Error;

/// Pipeline-wide error type
///
/// Cloneable so the terminal result of a recording can be handed back from
/// repeated `stop()` calls.
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("capture permission denied: {0}")]
    PermissionDenied(String),

    #[error("encoder failed to initialize: {0}")]
    EncoderInitFailed(String),

    #[error("encoding failed: {0}")]
    EncodeFailed(String),

    #[error("encoder is closed")]
    EncoderClosed,

    #[error("{0} track format redefined after registration")]
    FormatRedefinition(TrackKind),

    #[error("muxer has not been started")]
    MuxerNotStarted,

    #[error("muxer is closed")]
    MuxerClosed,

    #[error("container error: {0}")]
    Container(String),

    #[error("pre-start buffer overflow on {0} track")]
    PendingOverflow(TrackKind),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("recording already in progress")]
    AlreadyRecording,

    #[error("no recording in progress")]
    NotRecording,

    #[error("recording stopped before any media was produced")]
    EmptyRecording,

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Io(err.to_string())
    }
}

impl From<mp4::Error> for PipelineError {
    fn from(err: mp4::Error) -> Self {
        PipelineError::Container(err.to_string())
    }
}

/// Result type alias using PipelineError
pub type PipelineResult<T> = Result<T, PipelineError>;
