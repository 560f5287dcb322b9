//! On-demand segment coordinator
//!
//! Serves segments by index. A miss schedules a read-ahead window around the
//! requested index and produces it in a background task; every caller waiting
//! on a scheduled index shares a single production of it.
//!
//! Production of one index always records the artifact in the store before
//! resolving its wait queue entry, so a woken caller finds the store entry.

use std::collections::BTreeSet;
use std::ops::Range;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use bytes::Bytes;
use futures::{FutureExt, StreamExt, stream};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, warn};
use uuid::Uuid;

use super::guarded::Guarded;
use super::options::TranscodeOptions;
use super::producer::{SegmentProducer, SegmentRequest};
use super::readiness::ReadinessGate;
use super::segment_store::{ClearReport, SegmentStore};
use super::wait_queue::{SegmentOutcome, SegmentWaitQueue, SegmentWaiter};
use super::window::WindowPolicy;
use crate::SegmentdError;
use crate::config::CoordinatorConfig;

/// Errors returned to callers of the coordinator
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoordinatorError {
    #[error("Coordinator is not ready to serve segments")]
    NotReady,

    #[error("Segment {index} is out of range (total segments: {total})")]
    InvalidIndex { index: usize, total: usize },

    #[error("Internal coordinator error for segment {index}: {reason}")]
    Internal { index: usize, reason: String },

    #[error("Wait for segment {index} cancelled: {reason}")]
    Cancelled { index: usize, reason: String },

    #[error("Production of segment {index} failed: {reason}")]
    ProductionFailed { index: usize, reason: String },

    #[error("I/O error: {reason}")]
    Io { reason: String },
}

impl CoordinatorError {
    /// Whether the same request may succeed when repeated later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoordinatorError::NotReady
                | CoordinatorError::Cancelled { .. }
                | CoordinatorError::ProductionFailed { .. }
        )
    }

    /// HTTP status a streaming layer should answer with.
    ///
    /// Cancellation maps to 499 (client closed request); the response is
    /// normally never written.
    pub fn status_code(&self) -> u16 {
        match self {
            CoordinatorError::NotReady => 503,
            CoordinatorError::InvalidIndex { .. } => 404,
            CoordinatorError::Cancelled { .. } => 499,
            CoordinatorError::Internal { .. }
            | CoordinatorError::ProductionFailed { .. }
            | CoordinatorError::Io { .. } => 500,
        }
    }
}

/// Segment available on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServedSegment {
    pub index: usize,
    /// Artifact name relative to the output directory
    pub artifact: String,
    pub path: PathBuf,
}

impl ServedSegment {
    /// Reads the whole artifact into memory.
    ///
    /// # Errors
    /// Returns the underlying I/O error if the file cannot be read, for example
    /// after `clear_segments` removed it.
    pub async fn read(&self) -> std::io::Result<Bytes> {
        tokio::fs::read(&self.path).await.map(Bytes::from)
    }
}

/// Coordinator statistics for monitoring
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorStats {
    /// Segments in the input
    pub total_segments: usize,
    /// Segments currently in the store
    pub produced_segments: usize,
    /// Segments scheduled but not yet resolved
    pub pending_segments: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Windows handed to a background production task
    pub windows_started: u64,
    /// Successful producer calls
    pub segments_produced: u64,
    /// Failed or panicked producer calls
    pub production_failures: u64,
    pub ready: bool,
    /// Cache hit rate percentage
    pub hit_rate: f64,
}

impl CoordinatorStats {
    /// Calculate hit rate percentage
    pub fn calculate_hit_rate(hits: u64, misses: u64) -> f64 {
        if hits + misses == 0 {
            0.0
        } else {
            (hits as f64) / ((hits + misses) as f64) * 100.0
        }
    }
}

/// Identifier attached to the logs of one production window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct WindowId(Uuid);

impl WindowId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for WindowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Default)]
struct Counters {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    windows_started: AtomicU64,
    segments_produced: AtomicU64,
    production_failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

enum Lookup {
    Hit(ServedSegment),
    Pending(SegmentWaiter),
}

struct CoordinatorInner {
    options: TranscodeOptions,
    config: CoordinatorConfig,
    policy: WindowPolicy,
    store: SegmentStore,
    queue: SegmentWaitQueue,
    readiness: ReadinessGate,
    producer: Arc<dyn SegmentProducer>,
    counters: Counters,
    span: Span,
}

/// Coordinates on-demand production of the segments of one input
///
/// Cheap to clone; clones share all state. The store, wait queue and
/// readiness gate each sit behind their own lock, and no lock is held across
/// an await point.
#[derive(Clone)]
pub struct TranscodeCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl std::fmt::Debug for TranscodeCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscodeCoordinator")
            .field("segment_prefix", &self.inner.options.segment_prefix)
            .field("total_segments", &self.total_segments())
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

impl TranscodeCoordinator {
    /// Creates a coordinator logging under a `coordinator` span for its prefix.
    ///
    /// The coordinator starts not ready. Call `initialize` or `set_ready`
    /// before serving.
    ///
    /// # Errors
    /// - `SegmentdError::Configuration` - `config` fails `CoordinatorConfig::validate`
    pub fn new(
        options: TranscodeOptions,
        config: CoordinatorConfig,
        producer: Arc<dyn SegmentProducer>,
    ) -> Result<Self, SegmentdError> {
        let span = tracing::info_span!("coordinator", prefix = %options.segment_prefix);
        Self::with_span(options, config, producer, span)
    }

    /// Creates a coordinator whose logs, including those of its background
    /// production tasks, are recorded under `span`.
    ///
    /// # Errors
    /// - `SegmentdError::Configuration` - `config` fails `CoordinatorConfig::validate`
    pub fn with_span(
        options: TranscodeOptions,
        config: CoordinatorConfig,
        producer: Arc<dyn SegmentProducer>,
        span: Span,
    ) -> Result<Self, SegmentdError> {
        config
            .validate()
            .map_err(|reason| SegmentdError::Configuration { reason })?;

        let store = SegmentStore::new(options.output_dir.clone());
        let policy = config.window_policy();

        Ok(Self {
            inner: Arc::new(CoordinatorInner {
                options,
                config,
                policy,
                store,
                queue: SegmentWaitQueue::new(),
                readiness: ReadinessGate::new(),
                producer,
                counters: Counters::default(),
                span,
            }),
        })
    }

    /// Returns segment `index`, producing it first if needed.
    ///
    /// A miss schedules the read-ahead window around `index` unless the
    /// segment is already scheduled. Cancelling `cancel`, or exceeding the
    /// configured segment timeout, only abandons this caller's wait.
    ///
    /// # Errors
    /// - `CoordinatorError::NotReady` - Called before the coordinator is ready
    /// - `CoordinatorError::InvalidIndex` - `index` is not below the segment count
    /// - `CoordinatorError::Cancelled` - The wait was cancelled or timed out
    /// - `CoordinatorError::ProductionFailed` - The producer failed for `index`
    /// - `CoordinatorError::Internal` - The segment resolved without a store entry
    pub async fn serve_segment(
        &self,
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<ServedSegment, CoordinatorError> {
        let inner = &self.inner;
        let waiter = match self.begin_serve(index)? {
            Lookup::Hit(served) => return Ok(served),
            Lookup::Pending(waiter) => waiter,
        };

        let outcome = match self.await_outcome(waiter, cancel).await {
            Ok(outcome) => outcome,
            Err(reason) => {
                debug!(parent: &inner.span, "Wait for segment {} ended: {}", index, reason);
                return Err(CoordinatorError::Cancelled { index, reason });
            }
        };

        match outcome {
            SegmentOutcome::Produced => match inner.store.get(index) {
                Some(artifact) => Ok(self.served(index, artifact)),
                None => {
                    error!(
                        parent: &inner.span,
                        "Segment {} resolved as produced but is missing from the store",
                        index
                    );
                    Err(CoordinatorError::Internal {
                        index,
                        reason: "resolved as produced but missing from the store".to_string(),
                    })
                }
            },
            SegmentOutcome::Failed { reason } => {
                Err(CoordinatorError::ProductionFailed { index, reason })
            }
        }
    }

    /// Prepares the coordinator for serving.
    ///
    /// Resets readiness, creates the output directory and, when configured,
    /// produces the first window before marking the coordinator ready. A
    /// failed or timed out priming segment is logged and does not prevent
    /// readiness.
    ///
    /// # Errors
    /// - `CoordinatorError::Io` - The output directory could not be created
    /// - `CoordinatorError::Cancelled` - `cancel` fired while priming; the
    ///   coordinator stays not ready
    pub async fn initialize(&self, cancel: &CancellationToken) -> Result<(), CoordinatorError> {
        let inner = &self.inner;
        self.reset_ready();

        tokio::fs::create_dir_all(&inner.options.output_dir)
            .await
            .map_err(|e| CoordinatorError::Io {
                reason: format!(
                    "failed to create output directory {}: {e}",
                    inner.options.output_dir.display()
                ),
            })?;

        let total = inner.options.total_segments();
        if inner.config.prime_on_initialize && total > 0 && !inner.store.is_produced(0) {
            let waiter = {
                let _entered = inner.span.enter();
                match inner.queue.lookup(0) {
                    Some(waiter) => Some(waiter),
                    None => self.schedule_window(0, total),
                }
            };

            if let Some(waiter) = waiter {
                let started = Instant::now();
                match self.await_outcome(waiter, cancel).await {
                    Ok(SegmentOutcome::Produced) => {
                        info!(parent: &inner.span, "Primed first segment in {:?}", started.elapsed());
                    }
                    Ok(SegmentOutcome::Failed { reason }) => {
                        error!(parent: &inner.span, "Failed to prime first segment: {}", reason);
                    }
                    Err(reason) if cancel.is_cancelled() => {
                        debug!(parent: &inner.span, "Priming interrupted: {}", reason);
                        return Err(CoordinatorError::Cancelled { index: 0, reason });
                    }
                    Err(reason) => {
                        warn!(parent: &inner.span, "First segment not primed: {}", reason);
                    }
                }
            }
        }

        self.set_ready();
        Ok(())
    }

    /// Waits until the coordinator becomes ready.
    ///
    /// Survives intermediate resets and keeps waiting for the next readiness.
    ///
    /// # Errors
    /// - `CoordinatorError::Cancelled` - `cancel` fired first
    pub async fn wait_until_ready(&self, cancel: &CancellationToken) -> Result<(), CoordinatorError> {
        loop {
            tokio::select! {
                result = self.inner.readiness.wait_ready() => {
                    if result.is_ok() {
                        return Ok(());
                    }
                    debug!(parent: &self.inner.span, "Readiness reset while waiting");
                }
                () = cancel.cancelled() => {
                    return Err(CoordinatorError::Cancelled {
                        index: 0,
                        reason: "cancelled while waiting for readiness".to_string(),
                    });
                }
            }
        }
    }

    /// Marks the coordinator not ready, e.g. before switching input profile.
    pub fn reset_ready(&self) {
        let _entered = self.inner.span.enter();
        self.inner.readiness.reset();
    }

    pub fn set_ready(&self) {
        let _entered = self.inner.span.enter();
        self.inner.readiness.set_ready();
    }

    pub fn is_ready(&self) -> bool {
        self.inner.readiness.is_ready()
    }

    /// Evicts every produced segment and deletes the artifacts from disk.
    ///
    /// Segments still being produced are unaffected and land in the store
    /// when they finish.
    pub async fn clear_segments(&self) -> ClearReport {
        let report = self
            .inner
            .store
            .clear_all()
            .instrument(self.inner.span.clone())
            .await;

        info!(
            parent: &self.inner.span,
            "Cleared {} segments ({} files removed)",
            report.evicted,
            report.files_removed
        );

        report
    }

    pub fn is_produced(&self, index: usize) -> bool {
        self.inner.store.is_produced(index)
    }

    pub fn total_segments(&self) -> usize {
        self.inner.options.total_segments()
    }

    /// Get coordinator statistics
    pub fn statistics(&self) -> CoordinatorStats {
        let counters = &self.inner.counters;
        let cache_hits = counters.cache_hits.load(Ordering::Relaxed);
        let cache_misses = counters.cache_misses.load(Ordering::Relaxed);

        CoordinatorStats {
            total_segments: self.total_segments(),
            produced_segments: self.inner.store.len(),
            pending_segments: self.inner.queue.pending_count(),
            cache_hits,
            cache_misses,
            windows_started: counters.windows_started.load(Ordering::Relaxed),
            segments_produced: counters.segments_produced.load(Ordering::Relaxed),
            production_failures: counters.production_failures.load(Ordering::Relaxed),
            ready: self.is_ready(),
            hit_rate: CoordinatorStats::calculate_hit_rate(cache_hits, cache_misses),
        }
    }

    /// Admission checks, store lookup and scheduling for `serve_segment`.
    fn begin_serve(&self, index: usize) -> Result<Lookup, CoordinatorError> {
        let inner = &self.inner;
        let _entered = inner.span.enter();

        if !inner.readiness.is_ready() {
            debug!("Rejecting segment {} request: not ready", index);
            return Err(CoordinatorError::NotReady);
        }

        let total = inner.options.total_segments();
        if index >= total {
            return Err(CoordinatorError::InvalidIndex { index, total });
        }

        if let Some(artifact) = inner.store.get(index) {
            Counters::bump(&inner.counters.cache_hits);
            debug!("Cache hit for segment {}", index);
            return Ok(Lookup::Hit(self.served(index, artifact)));
        }

        Counters::bump(&inner.counters.cache_misses);
        debug!("Cache miss for segment {}", index);

        if let Some(waiter) = inner.queue.lookup(index) {
            return Ok(Lookup::Pending(waiter));
        }

        match self.schedule_window(index, total) {
            Some(waiter) => Ok(Lookup::Pending(waiter)),
            None => {
                error!("Segment {} missing from wait queue after scheduling", index);
                Err(CoordinatorError::Internal {
                    index,
                    reason: "no pending entry after scheduling its window".to_string(),
                })
            }
        }
    }

    fn served(&self, index: usize, artifact: String) -> ServedSegment {
        ServedSegment {
            index,
            path: self.inner.store.path_for(&artifact),
            artifact,
        }
    }

    /// Enqueues the window around `index`, spawns production for the indices
    /// this call registered and returns a waiter for `index`.
    fn schedule_window(&self, index: usize, total: usize) -> Option<SegmentWaiter> {
        let window = self.inner.policy.plan(index, total);
        let (claimed, waiter) = self.inner.queue.enqueue_window(window.clone(), index);

        if !claimed.is_empty() {
            self.spawn_window(window, claimed);
        }

        waiter
    }

    fn spawn_window(&self, window: Range<usize>, claimed: Vec<usize>) {
        let inner = Arc::clone(&self.inner);
        let window_id = WindowId::new();

        Counters::bump(&inner.counters.windows_started);
        info!(
            "Window {} producing {} segments in {}..{}",
            window_id,
            claimed.len(),
            window.start,
            window.end
        );

        let span = inner.span.clone();
        tokio::spawn(async move { inner.produce_window(window_id, claimed).await }.instrument(span));
    }

    async fn await_outcome(
        &self,
        waiter: SegmentWaiter,
        cancel: &CancellationToken,
    ) -> Result<SegmentOutcome, String> {
        let wait = async {
            tokio::select! {
                outcome = waiter.wait() => Ok(outcome),
                () = cancel.cancelled() => Err("request cancelled".to_string()),
            }
        };

        match self.inner.config.segment_timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .unwrap_or_else(|_| Err(format!("timed out after {limit:?}"))),
            None => wait.await,
        }
    }
}

impl CoordinatorInner {
    async fn produce_window(&self, window_id: WindowId, claimed: Vec<usize>) {
        let started = Instant::now();
        let claim = WindowClaim::new(&self.queue, &claimed);
        let concurrency = self.config.window_concurrency.max(1);

        stream::iter(claimed)
            .for_each_concurrent(concurrency, |index| {
                let claim = &claim;
                async move {
                    let outcome = self.produce_segment(index).await;
                    claim.resolve(index, outcome);
                }
            })
            .await;

        info!("Window {} finished in {:?}", window_id, started.elapsed());
    }

    /// Produces one claimed index and records it in the store on success.
    async fn produce_segment(&self, index: usize) -> SegmentOutcome {
        // Re-registered after its previous entry resolved
        if self.store.is_produced(index) {
            debug!("Segment {} already in store, skipping producer", index);
            return SegmentOutcome::Produced;
        }

        let Some(request) = SegmentRequest::from_options(&self.options, index) else {
            return SegmentOutcome::Failed {
                reason: format!("segment {index} has no boundaries"),
            };
        };

        let started = Instant::now();
        let result = AssertUnwindSafe(self.producer.produce(&request))
            .catch_unwind()
            .await;

        let reason = match result {
            Ok(Ok(())) => {
                self.store.add(index, request.artifact());
                Counters::bump(&self.counters.segments_produced);
                debug!("Produced segment {} in {:?}", index, started.elapsed());
                return SegmentOutcome::Produced;
            }
            Ok(Err(e)) => e.to_string(),
            Err(panic) => format!("producer panicked: {}", panic_message(panic.as_ref())),
        };

        Counters::bump(&self.counters.production_failures);
        error!("Failed to produce segment {}: {}", index, reason);
        SegmentOutcome::Failed { reason }
    }
}

/// Indices a production task still owes a resolution
///
/// Whatever is left when the claim drops, for instance because the task was
/// aborted at runtime shutdown, is resolved as failed so no waiter hangs.
struct WindowClaim<'a> {
    queue: &'a SegmentWaitQueue,
    outstanding: Guarded<BTreeSet<usize>>,
}

impl<'a> WindowClaim<'a> {
    fn new(queue: &'a SegmentWaitQueue, indices: &[usize]) -> Self {
        Self {
            queue,
            outstanding: Guarded::new(indices.iter().copied().collect()),
        }
    }

    fn resolve(&self, index: usize, outcome: SegmentOutcome) {
        self.outstanding.write_with(|outstanding| outstanding.remove(&index));
        self.queue.resolve_and_remove(index, outcome);
    }
}

impl Drop for WindowClaim<'_> {
    fn drop(&mut self) {
        let abandoned = self.outstanding.write_with(std::mem::take);
        for index in abandoned {
            self.queue.resolve_and_remove(
                index,
                SegmentOutcome::Failed {
                    reason: "production task ended before the segment was produced".to_string(),
                },
            );
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}
