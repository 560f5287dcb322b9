//! On-demand HLS segment transcoding
//!
//! Segments of an input are produced lazily when first requested. A
//! coordinator tracks produced segments in a store, shares in-flight
//! production between callers through a wait queue, and refuses requests
//! until its readiness gate is open. Encoding itself is delegated to a
//! `SegmentProducer`, normally ffmpeg.

pub mod coordinator;
pub mod ffmpeg;
pub mod guarded;
pub mod options;
pub mod producer;
pub mod readiness;
pub mod segment_store;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_producer;
pub mod wait_queue;
pub mod window;

pub use coordinator::{CoordinatorError, CoordinatorStats, ServedSegment, TranscodeCoordinator};
pub use ffmpeg::FfmpegSegmentProducer;
pub use guarded::Guarded;
pub use options::{
    AdaptiveProfile, AudioProfile, OptionsError, SegmentBounds, TranscodeOptions, VideoProfile,
    segment_filename,
};
pub use producer::{ProducerError, SegmentProducer, SegmentRequest};
pub use readiness::{GateReset, ReadinessGate};
pub use segment_store::{ClearReport, SegmentStore};
pub use wait_queue::{SegmentOutcome, SegmentWaitQueue, SegmentWaiter};
pub use window::WindowPolicy;
