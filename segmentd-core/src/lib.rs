//! Segmentd Core - On-demand HLS segment production
//!
//! This crate coordinates lazy production of media segments: callers ask for
//! a segment by index, the coordinator produces a read-ahead window around it
//! on first miss, and every later request is served from disk.

pub mod config;
pub mod tracing_setup;
pub mod transcoding;

// Re-export main types for convenient access
pub use config::{CoordinatorConfig, ProducerConfig, SegmentdConfig};
pub use transcoding::{
    CoordinatorError, FfmpegSegmentProducer, OptionsError, ProducerError, SegmentProducer,
    ServedSegment, TranscodeCoordinator, TranscodeOptions,
};

/// Errors that can bubble up from any segmentd subsystem.
#[derive(Debug, thiserror::Error)]
pub enum SegmentdError {
    #[error("Coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),

    #[error("Producer error: {0}")]
    Producer(#[from] ProducerError),

    #[error("Options error: {0}")]
    Options(#[from] OptionsError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SegmentdError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            SegmentdError::Coordinator(e) => match e {
                CoordinatorError::NotReady => "Segments are not available yet".to_string(),
                CoordinatorError::InvalidIndex { index, total } => {
                    format!("Segment {index} does not exist (input has {total} segments)")
                }
                CoordinatorError::Cancelled { index, .. } => {
                    format!("Request for segment {index} was cancelled")
                }
                CoordinatorError::ProductionFailed { index, reason } => {
                    format!("Could not produce segment {index}: {reason}")
                }
                _ => "Segment coordinator error occurred".to_string(),
            },
            SegmentdError::Producer(ProducerError::SpawnFailed { reason }) => {
                format!("Could not start encoder: {reason}")
            }
            SegmentdError::Producer(_) => "Encoder error occurred".to_string(),
            SegmentdError::Options(e) => format!("Invalid transcode options: {e}"),
            SegmentdError::Configuration { reason } => format!("Configuration error: {reason}"),
            SegmentdError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            SegmentdError::Configuration { .. }
                | SegmentdError::Options(_)
                | SegmentdError::Coordinator(CoordinatorError::InvalidIndex { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, SegmentdError>;
