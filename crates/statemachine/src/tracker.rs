//! Last-applied log position bookkeeping.

use common::LogPosition;
use parking_lot::RwLock;
use tracing::warn;

/// Records which log position the key-value state reflects.
///
/// `None` means nothing has been applied since the last snapshot resolution
/// found no usable snapshot. The apply path is the only writer; queries read
/// the position through a short shared lock that never waits on storage.
#[derive(Debug, Default)]
pub struct ConsistencyTracker {
    applied: RwLock<Option<LogPosition>>,
}

impl ConsistencyTracker {
    pub fn new(start: Option<LogPosition>) -> Self {
        Self {
            applied: RwLock::new(start),
        }
    }

    pub fn current(&self) -> Option<LogPosition> {
        *self.applied.read()
    }

    /// Record that the entry at `(term, index)` has been applied.
    ///
    /// # Panics
    ///
    /// Panics if `index` does not exceed the last applied index. The replica
    /// cannot continue once its applied state and the log disagree.
    pub fn advance(&self, term: u64, index: u64) -> LogPosition {
        let mut applied = self.applied.write();
        if let Some(previous) = *applied {
            assert!(
                index > previous.index,
                "non-increasing apply index {index} after {previous}"
            );
            if term < previous.term {
                warn!(term, previous_term = previous.term, index, "term went backwards");
            }
        }
        let position = LogPosition::new(term, index);
        *applied = Some(position);
        position
    }

    /// Replace the position wholesale after snapshot resolution.
    pub(crate) fn reset(&self, position: Option<LogPosition>) {
        *self.applied.write() = position;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn starts_at_sentinel() {
        assert_eq!(ConsistencyTracker::default().current(), None);
    }

    #[test]
    fn first_advance_accepts_any_index() {
        for index in [0, 1, 77] {
            let tracker = ConsistencyTracker::new(None);
            assert_eq!(tracker.advance(3, index), LogPosition::new(3, index));
            assert_eq!(tracker.current(), Some(LogPosition::new(3, index)));
        }
    }

    #[test]
    fn advance_after_snapshot_position() {
        let tracker = ConsistencyTracker::new(Some(LogPosition::new(2, 10)));
        tracker.advance(2, 11);
        assert_eq!(tracker.current(), Some(LogPosition::new(2, 11)));
    }

    #[test]
    fn gaps_are_allowed() {
        let tracker = ConsistencyTracker::new(None);
        tracker.advance(1, 1);
        tracker.advance(1, 5);
        assert_eq!(tracker.current(), Some(LogPosition::new(1, 5)));
    }

    #[test]
    #[should_panic(expected = "non-increasing apply index 5 after 1:5")]
    fn repeated_index_panics() {
        let tracker = ConsistencyTracker::new(None);
        tracker.advance(1, 5);
        tracker.advance(1, 5);
    }

    #[test]
    #[should_panic(expected = "non-increasing apply index")]
    fn lower_index_than_snapshot_panics() {
        let tracker = ConsistencyTracker::new(Some(LogPosition::new(1, 10)));
        tracker.advance(1, 9);
    }

    #[test]
    fn readers_never_observe_regression() {
        let tracker = Arc::new(ConsistencyTracker::new(None));
        let reader = {
            let tracker = Arc::clone(&tracker);
            thread::spawn(move || {
                let mut last = None;
                for _ in 0..10_000 {
                    let now = tracker.current();
                    assert!(now >= last);
                    last = now;
                }
            })
        };
        for index in 1..=10_000 {
            tracker.advance(1, index);
        }
        reader.join().unwrap();
        assert_eq!(tracker.current(), Some(LogPosition::new(1, 10_000)));
    }
}
