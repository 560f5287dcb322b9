//! Segment producer abstraction
//!
//! The coordinator never encodes media itself. It hands a producer one
//! request per segment and only looks at whether the call succeeded.

use std::path::PathBuf;

use async_trait::async_trait;

use super::options::{AudioProfile, SegmentBounds, TranscodeOptions, VideoProfile};

/// Errors reported by a segment producer
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProducerError {
    #[error("Failed to spawn producer process: {reason}")]
    SpawnFailed { reason: String },

    #[error("Producer failed for segment {index}: {reason}")]
    ProcessFailed { index: usize, reason: String },

    #[error("Producer timed out for segment {index} after {seconds} seconds")]
    Timeout { index: usize, seconds: u64 },

    #[error("Producer reported success but wrote no output at {path}")]
    MissingOutput { path: PathBuf },

    #[error("I/O error: {reason}")]
    Io { reason: String },
}

impl From<std::io::Error> for ProducerError {
    fn from(error: std::io::Error) -> Self {
        ProducerError::Io {
            reason: error.to_string(),
        }
    }
}

/// Everything a producer needs to materialize one segment
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentRequest {
    pub index: usize,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub bounds: SegmentBounds,
    /// Seconds added to output timestamps
    pub timestamp_offset: f64,
    pub video: Option<VideoProfile>,
    pub audio: Option<AudioProfile>,
    /// Copy streams without re-encoding
    pub direct_play: bool,
}

impl SegmentRequest {
    /// Builds the request for `index`, or `None` when the index is out of range.
    pub fn from_options(options: &TranscodeOptions, index: usize) -> Option<Self> {
        let bounds = options.segment_bounds(index)?;

        Some(Self {
            index,
            input_path: options.input_path.clone(),
            output_path: options.segment_path(index),
            bounds,
            timestamp_offset: options.segment_offset,
            video: options.video.clone(),
            audio: options.audio.clone(),
            direct_play: options.direct_play,
        })
    }

    /// Artifact name the store records for this request.
    pub fn artifact(&self) -> String {
        self.output_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Materializes one segment file per call
///
/// On success the artifact must exist at `request.output_path`. Producers are
/// shared across tasks and may be called concurrently for different indices.
#[async_trait]
pub trait SegmentProducer: Send + Sync {
    /// Writes segment `request.index` to `request.output_path`.
    ///
    /// # Errors
    /// - `ProducerError::SpawnFailed` - The encoder could not be started
    /// - `ProducerError::ProcessFailed` - The encoder exited unsuccessfully
    /// - `ProducerError::Timeout` - The encoder exceeded its time limit
    /// - `ProducerError::MissingOutput` - No artifact was written
    async fn produce(&self, request: &SegmentRequest) -> Result<(), ProducerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_from_options() {
        let mut options = TranscodeOptions::new("/in.mkv", "/out", "clip", vec![0.0, 4.0, 8.0]);
        options.segment_offset = 1.5;
        options.direct_play = true;

        let request = SegmentRequest::from_options(&options, 1).unwrap();

        assert_eq!(request.index, 1);
        assert_eq!(request.output_path, PathBuf::from("/out/clip-00001.ts"));
        assert_eq!(request.bounds.start, 4.0);
        assert_eq!(request.bounds.duration, Some(4.0));
        assert_eq!(request.timestamp_offset, 1.5);
        assert!(request.direct_play);
        assert_eq!(request.artifact(), "clip-00001.ts");

        assert!(SegmentRequest::from_options(&options, 3).is_none());
    }
}
