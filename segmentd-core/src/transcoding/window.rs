//! Read-ahead window planning
//!
//! A miss on one segment schedules a contiguous batch around it so that the
//! producer's startup cost is amortized and playback can run ahead.

use std::ops::Range;

/// Read-ahead bounds around a requested segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPolicy {
    /// Segments kept behind the requested index
    pub buffer_min: usize,
    /// Segments produced from the window start onwards, beyond `buffer_min`
    pub buffer_max: usize,
}

impl Default for WindowPolicy {
    fn default() -> Self {
        Self {
            buffer_min: 3,
            buffer_max: 5,
        }
    }
}

impl WindowPolicy {
    /// Creates a policy with explicit buffer sizes.
    pub fn new(buffer_min: usize, buffer_max: usize) -> Self {
        Self {
            buffer_min,
            buffer_max,
        }
    }

    /// Segment indices to schedule after a miss on `index`.
    ///
    /// Inputs with at most `buffer_max` segments are scheduled whole. Larger
    /// inputs get `buffer_min + buffer_max` segments starting `buffer_min`
    /// behind the request, clipped to `0..total`.
    pub fn plan(&self, index: usize, total: usize) -> Range<usize> {
        if total <= self.buffer_max {
            return 0..total;
        }

        let offset = index.saturating_sub(self.buffer_min);
        let limit = self.buffer_min + self.buffer_max;
        let end = offset.saturating_add(limit).min(total);

        offset.min(end)..end
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_window_clipped_at_end() {
        let policy = WindowPolicy::default();
        assert_eq!(policy.plan(6, 10), 3..10);
    }

    #[test]
    fn test_window_clipped_at_start() {
        let policy = WindowPolicy::default();
        assert_eq!(policy.plan(0, 20), 0..8);
        assert_eq!(policy.plan(2, 20), 0..8);
        assert_eq!(policy.plan(3, 20), 0..8);
        assert_eq!(policy.plan(4, 20), 1..9);
    }

    #[test]
    fn test_small_input_scheduled_whole() {
        let policy = WindowPolicy::default();
        assert_eq!(policy.plan(2, 4), 0..4);
        assert_eq!(policy.plan(4, 5), 0..5);
        assert_eq!(policy.plan(0, 0), 0..0);
    }

    #[test]
    fn test_window_with_zero_lookbehind() {
        let policy = WindowPolicy::new(0, 2);
        assert_eq!(policy.plan(5, 10), 5..7);
    }

    proptest! {
        #[test]
        fn test_window_contains_request(
            total in 1usize..500,
            seed in 0usize..500,
            buffer_min in 0usize..10,
            buffer_max in 1usize..10,
        ) {
            let index = seed % total;
            let window = WindowPolicy::new(buffer_min, buffer_max).plan(index, total);

            prop_assert!(window.contains(&index));
            prop_assert!(window.end <= total);

            if total > buffer_max {
                let offset = index.saturating_sub(buffer_min);
                prop_assert_eq!(window.start, offset);
                prop_assert_eq!(window.end, (offset + buffer_min + buffer_max).min(total));
            } else {
                prop_assert_eq!(window, 0..total);
            }
        }
    }
}
