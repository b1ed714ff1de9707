// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the sync engine coordinator.

/// Engine activity, broadcast to watchers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No pass in flight
    Idle,
    /// A drain pass is running
    Draining,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Draining => write!(f, "Draining"),
        }
    }
}

/// Result of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainResult {
    /// Operations applied and removed from the queue
    pub processed: usize,
    /// Operations dropped after exhausting their retry budget
    pub failed: usize,
    /// Operations that failed and went back to the queue
    pub requeued: usize,
}

impl DrainResult {
    /// Whether the pass touched the processor at all.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.processed == 0 && self.failed == 0 && self.requeued == 0
    }
}

impl std::fmt::Display for DrainResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "processed={}, failed={}, requeued={}",
            self.processed, self.failed, self.requeued
        )
    }
}

/// Lifetime counters for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncStats {
    pub total_processed: u64,
    pub total_failed: u64,
    /// Passes that actually processed a non-empty queue
    pub passes: u64,
    pub draining: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_state_display() {
        assert_eq!(SyncState::Idle.to_string(), "Idle");
        assert_eq!(SyncState::Draining.to_string(), "Draining");
    }

    #[test]
    fn test_drain_result() {
        assert!(DrainResult::default().is_noop());

        let r = DrainResult { processed: 2, failed: 1, requeued: 0 };
        assert!(!r.is_noop());
        assert_eq!(r.to_string(), "processed=2, failed=1, requeued=0");
    }
}
