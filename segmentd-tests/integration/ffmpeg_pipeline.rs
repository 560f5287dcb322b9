//! Coordinator over the ffmpeg producer, using stub executables in place of
//! a real ffmpeg binary.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use segmentd_core::config::{CoordinatorConfig, ProducerConfig};
use segmentd_core::transcoding::test_producer::create_test_options;
use segmentd_core::transcoding::{CoordinatorError, FfmpegSegmentProducer, TranscodeCoordinator};
use tokio_util::sync::CancellationToken;

/// Stub that answers `-version` and writes a fixed payload to its last argument.
const WRITING_STUB: &str = r#"#!/bin/sh
if [ "$1" = "-version" ]; then exit 0; fi
for last; do :; done
printf 'ts-data' > "$last"
"#;

/// Stub that fails like ffmpeg does on unreadable input.
const FAILING_STUB: &str = r#"#!/bin/sh
if [ "$1" = "-version" ]; then exit 0; fi
echo "test-input.mkv: Invalid data found when processing input" >&2
exit 1
"#;

/// Stub that never finishes on its own.
const HANGING_STUB: &str = r#"#!/bin/sh
if [ "$1" = "-version" ]; then exit 0; fi
sleep 30
"#;

#[cfg(unix)]
fn install_stub(dir: &Path, name: &str, script: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn create_ffmpeg_coordinator(
    output_dir: &Path,
    total: usize,
    producer_config: &ProducerConfig,
) -> TranscodeCoordinator {
    let options = create_test_options(output_dir, total);
    let config = CoordinatorConfig {
        segment_timeout: Some(Duration::from_secs(10)),
        prime_on_initialize: false,
        ..CoordinatorConfig::default()
    };
    let producer = FfmpegSegmentProducer::new(producer_config);
    TranscodeCoordinator::new(options, config, Arc::new(producer)).unwrap()
}
