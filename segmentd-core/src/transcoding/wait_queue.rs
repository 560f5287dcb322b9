//! Wait queue of segments scheduled for production
//!
//! Each scheduled index holds one single-resolution signal. The producing task
//! resolves it exactly once; any number of callers can subscribe and await it,
//! and a caller that gives up only drops its own receiver.

use std::collections::HashMap;
use std::ops::Range;

use tokio::sync::watch;
use tracing::{debug, trace};

use super::guarded::Guarded;

/// How a scheduled segment finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentOutcome {
    /// Artifact was written and recorded in the store
    Produced,
    /// Producer failed for this index
    Failed { reason: String },
}

type Signal = watch::Sender<Option<SegmentOutcome>>;

/// Subscription to one scheduled segment
#[derive(Debug)]
pub struct SegmentWaiter {
    index: usize,
    receiver: watch::Receiver<Option<SegmentOutcome>>,
}

impl SegmentWaiter {
    /// Waits until the segment is resolved.
    ///
    /// Dropping the returned future (for example when a caller times out)
    /// leaves the signal and every other subscriber untouched. If the
    /// resolving side disappears without sending, the outcome is `Failed`.
    pub async fn wait(mut self) -> SegmentOutcome {
        let resolved = match self.receiver.wait_for(Option::is_some).await {
            Ok(value) => (*value).clone(),
            Err(_) => None,
        };

        resolved.unwrap_or_else(|| SegmentOutcome::Failed {
            reason: format!("segment {} was abandoned before completion", self.index),
        })
    }
}

fn register(pending: &mut HashMap<usize, Signal>, window: Range<usize>) -> Vec<usize> {
    window
        .filter(|index| {
            if pending.contains_key(index) {
                return false;
            }
            let (sender, _) = watch::channel(None);
            pending.insert(*index, sender);
            true
        })
        .collect()
}

/// Index to pending signal map guarded by its own read/write lock
#[derive(Debug, Default)]
pub struct SegmentWaitQueue {
    pending: Guarded<HashMap<usize, Signal>>,
}

impl SegmentWaitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pending signal for every index in `offset..offset + count`.
    ///
    /// Indices that already have a pending signal keep it, so subscribers of an
    /// overlapping window are never orphaned. Returns the indices registered
    /// by this call; the caller owns resolving exactly those.
    pub fn enqueue_range(&self, offset: usize, count: usize) -> Vec<usize> {
        let end = offset.saturating_add(count);
        let registered = self
            .pending
            .write_with(|pending| register(pending, offset..end));

        debug!(
            "Enqueued {} of {} segments in {}..{}",
            registered.len(),
            end - offset,
            offset,
            end
        );

        registered
    }

    /// Enqueues `window` and subscribes to `index` under the same write lock.
    ///
    /// The subscription is taken before anything registered here can be
    /// resolved, so it cannot miss the outcome. Returns the indices registered
    /// by this call and the waiter, which is `None` only when `index` lies
    /// outside `window` and nothing else has it pending.
    pub fn enqueue_window(
        &self,
        window: Range<usize>,
        index: usize,
    ) -> (Vec<usize>, Option<SegmentWaiter>) {
        let (start, end) = (window.start, window.end);
        let (registered, waiter) = self.pending.write_with(|pending| {
            let registered = register(pending, window);
            let waiter = pending.get(&index).map(|sender| SegmentWaiter {
                index,
                receiver: sender.subscribe(),
            });
            (registered, waiter)
        });

        debug!(
            "Enqueued {} of {} segments in {}..{} for segment {}",
            registered.len(),
            end.saturating_sub(start),
            start,
            end,
            index
        );

        (registered, waiter)
    }

    /// Resolves the pending signal for `index` and removes it.
    ///
    /// Wakes every current subscriber. Returns false when nothing was pending.
    pub fn resolve_and_remove(&self, index: usize, outcome: SegmentOutcome) -> bool {
        let Some(sender) = self.pending.write_with(|pending| pending.remove(&index)) else {
            trace!("No pending signal for segment {}", index);
            return false;
        };

        sender.send_replace(Some(outcome));
        true
    }

    /// Subscribes to the pending signal for `index`.
    pub fn lookup(&self, index: usize) -> Option<SegmentWaiter> {
        self.pending.read_with(|pending| {
            pending.get(&index).map(|sender| SegmentWaiter {
                index,
                receiver: sender.subscribe(),
            })
        })
    }

    /// Number of indices awaiting production.
    pub fn pending_count(&self) -> usize {
        self.pending.read_with(|pending| pending.len())
    }
}
