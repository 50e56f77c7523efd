use std::time::Duration;

use crate::state::snapshot::Snapshot;

/// Last known snapshot of the current question.
///
/// Only the reconciliation engine writes to the store; everything else reads.
#[derive(Debug, Clone, Default)]
pub struct LocalStateStore {
    current: Option<Snapshot>,
}

impl LocalStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot currently held, if any update has been applied yet.
    pub fn current(&self) -> Option<&Snapshot> {
        self.current.as_ref()
    }

    /// Index of the held question, or `None` before the first update.
    pub fn question_index(&self) -> Option<u32> {
        self.current.as_ref().map(|snapshot| snapshot.question_index)
    }

    pub fn timestamp_ms(&self) -> Option<i64> {
        self.current.as_ref().map(|snapshot| snapshot.timestamp_ms)
    }

    pub(crate) fn replace(&mut self, snapshot: Snapshot) {
        self.current = Some(snapshot);
    }

    pub(crate) fn current_mut(&mut self) -> Option<&mut Snapshot> {
        self.current.as_mut()
    }

    pub(crate) fn clear(&mut self) -> Option<Snapshot> {
        self.current.take()
    }
}

/// Whether a record written at `written_at_ms` may still be restored at `now_ms`.
///
/// Records from the future (clock skew) count as fresh.
pub fn is_fresh(written_at_ms: i64, now_ms: i64, window: Duration) -> bool {
    let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
    now_ms.saturating_sub(written_at_ms) < window_ms
}
