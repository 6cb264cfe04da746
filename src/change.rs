// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local change records.
//!
//! A [`Changes`] value is the unordered bag of pending local edits produced
//! by the external change manager for one sync run: object property edits,
//! relationship edits, attached-file edits, creations and deletions. The
//! graph builder turns it into an ordered list of [`crate::ChangeGroup`]s.
//!
//! # Example
//!
//! ```
//! use change_sync::{Changes, ObjectChange, ChangeStatus, InstanceKey};
//!
//! let mut changes = Changes::default();
//! changes.objects.push(ObjectChange::new(
//!     InstanceKey::new("Document", "local-1"),
//!     ChangeStatus::Created,
//!     0,
//! ));
//! assert_eq!(changes.len(), 1);
//! ```

use serde::{Deserialize, Serialize};

/// Local identity of an object or relationship instance (class + local id).
///
/// Stable for the lifetime of a sync run. After the instance is created
/// remotely, the synchronizer rewrites the key across all still-pending
/// groups to the store's post-commit key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceKey {
    /// Schema class of the instance
    pub class: String,
    /// Local (cache-assigned) id
    pub id: String,
}

impl InstanceKey {
    pub fn new(class: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            id: id.into(),
        }
    }
}

impl std::fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.class, self.id)
    }
}

/// Remote-facing identity of an instance (class + remote id).
///
/// Undefined until the instance has been created on the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectReference {
    /// Schema class as known to the server (may be a subtype of the local class)
    pub class: String,
    /// Server-assigned id
    pub remote_id: String,
}

impl ObjectReference {
    pub fn new(class: impl Into<String>, remote_id: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            remote_id: remote_id.into(),
        }
    }
}

impl std::fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.class, self.remote_id)
    }
}

/// What happened to an instance locally. Every change record carries exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ChangeStatus {
    /// No pending change (the default for empty group slots)
    #[default]
    NoChange,
    /// Instance was created locally and does not exist remotely yet
    Created,
    /// Instance exists remotely and has local property edits
    Modified,
    /// Instance was deleted locally
    Deleted,
}

impl std::fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoChange => write!(f, "NoChange"),
            Self::Created => write!(f, "Created"),
            Self::Modified => write!(f, "Modified"),
            Self::Deleted => write!(f, "Deleted"),
        }
    }
}

/// A pending change to one object instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectChange {
    /// Instance the change applies to
    pub key: InstanceKey,
    /// Kind of change
    pub status: ChangeStatus,
    /// Insertion order the underlying diff was produced in.
    /// The sole sort key and tie-break used by the graph builder.
    pub sequence: u64,
}

impl ObjectChange {
    pub fn new(key: InstanceKey, status: ChangeStatus, sequence: u64) -> Self {
        Self {
            key,
            status,
            sequence,
        }
    }
}

/// A pending change to one relationship instance.
///
/// Carries the relationship's own instance key plus both endpoint keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipChange {
    /// The relationship instance's own change record
    pub change: ObjectChange,
    /// Source endpoint
    pub source: InstanceKey,
    /// Target endpoint
    pub target: InstanceKey,
}

impl RelationshipChange {
    pub fn new(change: ObjectChange, source: InstanceKey, target: InstanceKey) -> Self {
        Self {
            change,
            source,
            target,
        }
    }

    /// Key of the relationship instance itself.
    pub fn key(&self) -> &InstanceKey {
        &self.change.key
    }
}

/// A pending change to an instance's attached binary content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    /// Change record for the owning instance's file slot
    pub change: ObjectChange,
}

impl FileChange {
    pub fn new(change: ObjectChange) -> Self {
        Self { change }
    }

    /// Key of the instance whose file content changed.
    pub fn key(&self) -> &InstanceKey {
        &self.change.key
    }
}

/// All pending changes for one sync run.
///
/// Produced once by the external change manager. The core never mutates the
/// records except to rewrite instance keys after remote creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Changes {
    pub objects: Vec<ObjectChange>,
    pub relationships: Vec<RelationshipChange>,
    pub files: Vec<FileChange>,
}

impl Changes {
    /// Total number of change records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len() + self.relationships.len() + self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_key_display() {
        let key = InstanceKey::new("Document", "42");
        assert_eq!(format!("{}", key), "Document:42");
    }

    #[test]
    fn test_object_reference_display() {
        let reference = ObjectReference::new("Document", "srv-9");
        assert_eq!(format!("{}", reference), "Document:srv-9");
    }

    #[test]
    fn test_change_status_default_is_no_change() {
        assert_eq!(ChangeStatus::default(), ChangeStatus::NoChange);
    }

    #[test]
    fn test_relationship_change_key() {
        let rel = RelationshipChange::new(
            ObjectChange::new(
                InstanceKey::new("DocumentFolder", "r1"),
                ChangeStatus::Created,
                3,
            ),
            InstanceKey::new("Folder", "f1"),
            InstanceKey::new("Document", "d1"),
        );
        assert_eq!(rel.key(), &InstanceKey::new("DocumentFolder", "r1"));
        assert_eq!(rel.change.sequence, 3);
    }

    #[test]
    fn test_changes_len() {
        let mut changes = Changes::default();
        assert!(changes.is_empty());

        changes.objects.push(ObjectChange::new(
            InstanceKey::new("Document", "1"),
            ChangeStatus::Modified,
            0,
        ));
        changes.files.push(FileChange::new(ObjectChange::new(
            InstanceKey::new("Document", "1"),
            ChangeStatus::Modified,
            1,
        )));
        assert_eq!(changes.len(), 2);
        assert!(!changes.is_empty());
    }

    #[test]
    fn test_serialize_roundtrip() {
        let change = ObjectChange::new(InstanceKey::new("Document", "1"), ChangeStatus::Created, 7);
        let json = serde_json::to_string(&change).unwrap();
        let back: ObjectChange = serde_json::from_str(&json).unwrap();
        assert_eq!(back, change);
    }
}
