//! End-to-end coordinator scenarios: windowing, readiness, caching, eviction.

use std::sync::Arc;
use std::time::Duration;

use segmentd_core::config::CoordinatorConfig;
use segmentd_core::transcoding::test_producer::{MockSegmentProducer, create_temp_options};
use segmentd_core::transcoding::{CoordinatorError, TranscodeCoordinator};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn create_scenario_config() -> CoordinatorConfig {
    CoordinatorConfig {
        segment_buffer_min: 3,
        segment_buffer_max: 5,
        segment_timeout: Some(Duration::from_secs(5)),
        window_concurrency: 1,
        prime_on_initialize: false,
    }
}

fn create_coordinator(
    total: usize,
    producer: &MockSegmentProducer,
) -> (TempDir, TranscodeCoordinator) {
    let (temp_dir, options) = create_temp_options(total);
    let coordinator =
        TranscodeCoordinator::new(options, create_scenario_config(), Arc::new(producer.clone()))
            .unwrap();
    (temp_dir, coordinator)
}

/// Waits until no scheduled segment is left unresolved.
async fn wait_for_idle(coordinator: &TranscodeCoordinator) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while coordinator.statistics().pending_segments > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("window production did not finish");
}
