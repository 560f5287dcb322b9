//! Concurrency properties: single production, cancellation isolation,
//! overlapping windows and failure isolation under many callers.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use proptest::prelude::*;
use segmentd_core::config::CoordinatorConfig;
use segmentd_core::transcoding::test_producer::{MockSegmentProducer, create_temp_options};
use segmentd_core::transcoding::{CoordinatorError, TranscodeCoordinator, WindowPolicy};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn create_ready_coordinator(
    total: usize,
    producer: &MockSegmentProducer,
    config: CoordinatorConfig,
) -> (TempDir, TranscodeCoordinator) {
    let (temp_dir, options) = create_temp_options(total);
    let coordinator =
        TranscodeCoordinator::new(options, config, Arc::new(producer.clone())).unwrap();
    coordinator.set_ready();
    (temp_dir, coordinator)
}

fn create_test_config() -> CoordinatorConfig {
    CoordinatorConfig {
        segment_timeout: Some(Duration::from_secs(5)),
        prime_on_initialize: false,
        ..CoordinatorConfig::default()
    }
}

async fn wait_for_idle(coordinator: &TranscodeCoordinator) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while coordinator.statistics().pending_segments > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("window production did not finish");
}


proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_cold_miss_produces_exactly_planned_window(
        total in 1usize..40,
        index_seed in 0usize..1000,
        buffer_min in 0usize..5,
        buffer_max in 1usize..8,
    ) {
        let index = index_seed % total;
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let producer = MockSegmentProducer::new();

        let invoked: Vec<usize> = runtime.block_on(async {
            let config = CoordinatorConfig {
                segment_buffer_min: buffer_min,
                segment_buffer_max: buffer_max,
                ..create_test_config()
            };
            let (_temp_dir, coordinator) = create_ready_coordinator(total, &producer, config);

            coordinator
                .serve_segment(index, &CancellationToken::new())
                .await
                .unwrap();
            wait_for_idle(&coordinator).await;

            (0..total).filter(|&i| producer.invocations(i) > 0).collect()
        });

        let expected: Vec<usize> = WindowPolicy::new(buffer_min, buffer_max)
            .plan(index, total)
            .collect();
        prop_assert!(invoked.contains(&index));
        prop_assert_eq!(invoked, expected);
    }

    #[test]
    fn prop_repeated_requests_never_reproduce(
        requests in proptest::collection::vec(0usize..20, 1..30),
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let producer = MockSegmentProducer::new();

        runtime.block_on(async {
            let (_temp_dir, coordinator) =
                create_ready_coordinator(20, &producer, create_test_config());
            let cancel = CancellationToken::new();
            for &index in &requests {
                coordinator.serve_segment(index, &cancel).await.unwrap();
            }
            wait_for_idle(&coordinator).await;
        });

        for index in 0..20 {
            prop_assert!(producer.invocations(index) <= 1);
        }
    }
}
