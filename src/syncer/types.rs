// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Synchronizer state, outcomes and errors.

use thiserror::Error;

use crate::change::InstanceKey;
use crate::remote::ClientError;
use crate::store::StoreError;

/// Where a sync run currently is. Tracked for logging; the walk itself is a
/// plain sequential loop, never a task per group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    /// Committing local-only deletions and building the change graph
    Preparing,
    /// Marking instances upload-active
    Locking,
    /// Walking the ordered group list; the index is the current group
    Walking(usize),
    /// Assembling and sending a changeset request
    Batching,
    /// Sending one group as an individual request
    SingleUnit,
    /// Committing accepted revisions to the store
    Committing,
    Done,
    Failed,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Preparing => write!(f, "preparing"),
            Self::Locking => write!(f, "locking"),
            Self::Walking(i) => write!(f, "walking({i})"),
            Self::Batching => write!(f, "batching"),
            Self::SingleUnit => write!(f, "single-unit"),
            Self::Committing => write!(f, "committing"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Why one instance was not synced. Recorded per instance; the run continues
/// past all of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The server understood and refused the change
    Rejected,
    /// A group this instance depends on did not sync first
    DependencyNotSynced,
    /// The run was canceled before this instance was sent
    Canceled,
}

impl FailureKind {
    /// Stable label used in metrics and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rejected => "rejected",
            Self::DependencyNotSynced => "dependency_not_synced",
            Self::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One instance that failed to sync, with the server's message when there
/// was one.
#[derive(Debug, Clone)]
pub struct InstanceFailure {
    pub key: InstanceKey,
    pub kind: FailureKind,
    pub message: Option<String>,
}

impl InstanceFailure {
    pub fn new(key: InstanceKey, kind: FailureKind, message: Option<String>) -> Self {
        Self { key, kind, message }
    }
}

/// Outcome of one sync run that did not fail fatally.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Groups fully synced
    pub synced: usize,
    /// Groups the run set out to sync
    pub total: usize,
    /// Instances that were not synced, in walk order
    pub failures: Vec<InstanceFailure>,
    /// True if the run stopped early on the caller's cancellation token
    pub canceled: bool,
    /// Created instances whose trailing server re-query failed. The
    /// instances themselves synced; only the refresh was lost.
    pub refresh_failures: Vec<(InstanceKey, String)>,
}

impl SyncReport {
    /// True if every group synced and nothing was skipped or canceled.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.synced == self.total && self.failures.is_empty() && !self.canceled
    }
}

/// Fatal sync failure. Per-instance rejections are not errors; they are
/// reported in [`SyncReport::failures`] and the run continues.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("failed to serialize change for upload: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A single instance exceeds the changeset byte limit on its own; no
    /// request shape can carry it.
    #[error("instance {key} serializes to {size} bytes, over the {limit} byte changeset limit")]
    InstanceTooLarge {
        key: InstanceKey,
        size: usize,
        limit: usize,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Transport-level client failure; the server's view of the repository
    /// is unknown, so the run aborts.
    #[error("transport failure: {0}")]
    Transport(#[source] ClientError),

    #[error("sync invariant violated: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(SyncState::Walking(3).to_string(), "walking(3)");
        assert_eq!(SyncState::SingleUnit.to_string(), "single-unit");
    }

    #[test]
    fn test_failure_kind_labels() {
        assert_eq!(FailureKind::Rejected.as_str(), "rejected");
        assert_eq!(
            FailureKind::DependencyNotSynced.to_string(),
            "dependency_not_synced"
        );
    }

    #[test]
    fn test_report_completeness() {
        let mut report = SyncReport {
            synced: 2,
            total: 2,
            ..SyncReport::default()
        };
        assert!(report.is_complete());

        report.failures.push(InstanceFailure::new(
            InstanceKey::new("Document", "d1"),
            FailureKind::Rejected,
            Some("conflict".into()),
        ));
        assert!(!report.is_complete());
    }

    #[test]
    fn test_instance_too_large_message() {
        let err = SyncError::InstanceTooLarge {
            key: InstanceKey::new("Document", "d1"),
            size: 4096,
            limit: 1024,
        };
        let text = err.to_string();
        assert!(text.contains("Document:d1"));
        assert!(text.contains("4096"));
    }
}
