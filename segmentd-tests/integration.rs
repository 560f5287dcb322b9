//! Integration tests for segmentd
//!
//! These tests drive the coordinator through its public API only, with the
//! mock producer from `segmentd-core`'s `test-utils` feature or with a stub
//! ffmpeg executable.

#[path = "integration/coordinator_scenarios.rs"]
mod coordinator_scenarios;

#[path = "integration/concurrent_serving.rs"]
mod concurrent_serving;

#[path = "integration/ffmpeg_pipeline.rs"]
mod ffmpeg_pipeline;
