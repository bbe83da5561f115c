// Error types for the stage protocol
//
// Library modules return `FilterError`; the binary wraps it in `anyhow` at the
// edge. Each variant maps onto one of three kinds (configuration, submission,
// drain) and onto the numeric code the host pipeline expects.

use crate::engine::EngineError;
use crate::frame::PixelFormat;
use std::time::Duration;

/// Host code for invalid arguments (EINVAL).
pub const HOST_EINVAL: i32 = -22;
/// Host code for a frame that could not be processed (ENOSYS).
pub const HOST_ENOSYS: i32 = -38;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Raised once while configuring a stream; aborts setup.
    Configuration,
    /// Local to one frame or one emission call.
    Submission,
    /// Raised while flushing at end of stream; end of stream is not propagated.
    Drain,
}

#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("pixel format mismatch: expected {expected}, got {actual}")]
    FormatMismatch {
        expected: PixelFormat,
        actual: PixelFormat,
    },

    #[error("processor could not be created: {0}")]
    Create(#[source] EngineError),

    #[error("stage has no processor")]
    NotConfigured,

    #[error("processing failed for frame with pts {pts}: {source}")]
    Submission {
        pts: i64,
        #[source]
        source: EngineError,
    },

    #[error("output {index} of {count} could not be produced: {source}")]
    Output {
        index: usize,
        count: usize,
        #[source]
        source: EngineError,
    },

    #[error("downstream rejected frame with pts {pts}: {reason}")]
    Downstream { pts: i64, reason: String },

    #[error("drain stalled with {remaining} outputs pending after {polls} polls ({waited:?})")]
    DrainTimeout {
        remaining: usize,
        polls: u32,
        waited: Duration,
    },

    #[error("drain failed: {0}")]
    Drain(#[source] Box<FilterError>),

    #[error("stream failed while draining: {0}")]
    StreamFailed(String),
}

impl FilterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) | Self::FormatMismatch { .. } | Self::Create(_) => {
                ErrorKind::Configuration
            }
            Self::NotConfigured
            | Self::Submission { .. }
            | Self::Output { .. }
            | Self::Downstream { .. } => ErrorKind::Submission,
            Self::DrainTimeout { .. } | Self::Drain(_) | Self::StreamFailed(_) => ErrorKind::Drain,
        }
    }

    /// Numeric code handed back to the host pipeline.
    pub fn host_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Configuration => HOST_EINVAL,
            ErrorKind::Submission | ErrorKind::Drain => HOST_ENOSYS,
        }
    }

    /// Only a rejected submission leaves the stage ready for the next frame.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Submission { .. })
    }

    /// Tags an error raised while draining so callers see a drain failure.
    pub fn into_drain(self) -> FilterError {
        match self {
            Self::DrainTimeout { .. } | Self::Drain(_) | Self::StreamFailed(_) => self,
            other => Self::Drain(Box::new(other)),
        }
    }
}

pub type Result<T> = std::result::Result<T, FilterError>;
