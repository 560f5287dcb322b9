//! Mock producer and fixtures for testing the coordinator.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use super::options::TranscodeOptions;
use super::producer::{ProducerError, SegmentProducer, SegmentRequest};

/// Segment producer that writes small placeholder files and records every call.
#[derive(Debug, Clone)]
pub struct MockSegmentProducer {
    invocations: Arc<Mutex<HashMap<usize, usize>>>,
    order: Arc<Mutex<Vec<usize>>>,
    failing: Arc<HashSet<usize>>,
    panicking: Arc<HashSet<usize>>,
    delay: Duration,
    release: Arc<watch::Sender<bool>>,
}

impl Default for MockSegmentProducer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSegmentProducer {
    /// Creates a producer that succeeds immediately for every index.
    pub fn new() -> Self {
        let (release, _) = watch::channel(true);
        Self {
            invocations: Arc::new(Mutex::new(HashMap::new())),
            order: Arc::new(Mutex::new(Vec::new())),
            failing: Arc::new(HashSet::new()),
            panicking: Arc::new(HashSet::new()),
            delay: Duration::ZERO,
            release: Arc::new(release),
        }
    }

    /// Sleeps for `delay` before writing each segment.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fails every call for the given indices.
    pub fn failing_on(mut self, indices: impl IntoIterator<Item = usize>) -> Self {
        self.failing = Arc::new(indices.into_iter().collect());
        self
    }

    /// Panics inside `produce` for the given indices.
    pub fn panicking_on(mut self, indices: impl IntoIterator<Item = usize>) -> Self {
        self.panicking = Arc::new(indices.into_iter().collect());
        self
    }

    /// Blocks every call until `release` is invoked.
    pub fn held(self) -> Self {
        self.release.send_replace(false);
        self
    }

    /// Lets blocked and future calls proceed.
    pub fn release(&self) {
        self.release.send_replace(true);
    }

    /// Number of calls made for `index`.
    pub fn invocations(&self, index: usize) -> usize {
        self.invocations.lock().get(&index).copied().unwrap_or(0)
    }

    /// Number of calls made for any index.
    pub fn total_invocations(&self) -> usize {
        self.invocations.lock().values().sum()
    }

    /// Indices in the order calls started.
    pub fn call_order(&self) -> Vec<usize> {
        self.order.lock().clone()
    }
}

#[async_trait]
impl SegmentProducer for MockSegmentProducer {
    async fn produce(&self, request: &SegmentRequest) -> Result<(), ProducerError> {
        *self.invocations.lock().entry(request.index).or_insert(0) += 1;
        self.order.lock().push(request.index);

        let mut release = self.release.subscribe();
        if release.wait_for(|released| *released).await.is_err() {
            return Err(ProducerError::ProcessFailed {
                index: request.index,
                reason: "mock producer dropped".to_string(),
            });
        }

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.panicking.contains(&request.index) {
            panic!("mock producer panicked on segment {}", request.index);
        }

        if self.failing.contains(&request.index) {
            return Err(ProducerError::ProcessFailed {
                index: request.index,
                reason: "mock failure".to_string(),
            });
        }

        tokio::fs::write(
            &request.output_path,
            format!("segment {}", request.index).as_bytes(),
        )
        .await?;

        Ok(())
    }
}

/// Options for `total` six-second segments of a fake input.
pub fn create_test_options(output_dir: &std::path::Path, total: usize) -> TranscodeOptions {
    let segment_times = (0..total).map(|i| i as f64 * 6.0).collect();
    TranscodeOptions::new("/media/test-input.mkv", output_dir, "prefix", segment_times)
}

/// Temporary output directory plus options pointing into it.
pub fn create_temp_options(total: usize) -> (tempfile::TempDir, TranscodeOptions) {
    let temp_dir = tempfile::tempdir().expect("failed to create temp dir");
    let options = create_test_options(temp_dir.path(), total);
    (temp_dir, options)
}
