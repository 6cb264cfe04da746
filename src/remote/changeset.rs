// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Changeset assembly.
//!
//! A changeset is one network request carrying many instances' creations,
//! updates and deletions. The synchronizer assembles entries from eligible
//! consecutive groups; the wire encoding belongs to the repository client.

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::change::{InstanceKey, ObjectReference};

/// A relationship endpoint by its current best-known identifier: the local
/// key, or the remote identity if the instance was already created earlier
/// in this run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Endpoint {
    Local(InstanceKey),
    Remote(ObjectReference),
}

/// One instance's contribution to a changeset.
#[derive(Debug, Clone, Serialize)]
pub enum ChangesetEntry {
    CreateObject {
        key: InstanceKey,
        properties: Value,
    },
    ModifyObject {
        key: InstanceKey,
        reference: ObjectReference,
        properties: Value,
        tag: String,
    },
    DeleteObject {
        key: InstanceKey,
        reference: ObjectReference,
    },
    CreateRelationship {
        key: InstanceKey,
        properties: Value,
        source: Endpoint,
        target: Endpoint,
    },
    DeleteRelationship {
        key: InstanceKey,
        reference: ObjectReference,
    },
}

impl ChangesetEntry {
    /// Local key of the instance this entry is about.
    #[must_use]
    pub fn key(&self) -> &InstanceKey {
        match self {
            Self::CreateObject { key, .. }
            | Self::ModifyObject { key, .. }
            | Self::DeleteObject { key, .. }
            | Self::CreateRelationship { key, .. }
            | Self::DeleteRelationship { key, .. } => key,
        }
    }

    /// Serialized size of this entry, used to keep requests under the
    /// configured changeset byte limit.
    pub fn serialized_size(&self) -> Result<usize, serde_json::Error> {
        Ok(serde_json::to_vec(self)?.len())
    }
}

/// An assembled changeset request.
#[derive(Debug, Serialize)]
pub struct ChangesetPayload {
    /// Request id stamped on the batch for tracing and server-side dedup
    pub id: String,
    pub entries: Vec<ChangesetEntry>,
    #[serde(skip)]
    total_bytes: usize,
}

impl ChangesetPayload {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            entries: Vec::new(),
            total_bytes: 0,
        }
    }

    pub fn push(&mut self, entry: ChangesetEntry, serialized_size: usize) {
        self.entries.push(entry);
        self.total_bytes += serialized_size;
    }

    /// Number of instances in the request.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Accumulated serialized size of all entries.
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }
}

impl Default for ChangesetPayload {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(id: &str) -> ChangesetEntry {
        ChangesetEntry::CreateObject {
            key: InstanceKey::new("Document", id),
            properties: json!({"name": id}),
        }
    }

    #[test]
    fn test_entry_key() {
        let e = ChangesetEntry::DeleteRelationship {
            key: InstanceKey::new("Link", "r1"),
            reference: ObjectReference::new("Link", "srv-r1"),
        };
        assert_eq!(e.key(), &InstanceKey::new("Link", "r1"));
    }

    #[test]
    fn test_serialized_size_is_positive_and_stable() {
        let e = entry("d1");
        let size = e.serialized_size().unwrap();
        assert!(size > 0);
        assert_eq!(size, e.serialized_size().unwrap());
    }

    #[test]
    fn test_payload_accounting() {
        let mut payload = ChangesetPayload::new();
        assert!(payload.is_empty());

        let first = entry("d1");
        let first_size = first.serialized_size().unwrap();
        payload.push(first, first_size);
        let second = entry("d2");
        let second_size = second.serialized_size().unwrap();
        payload.push(second, second_size);

        assert_eq!(payload.len(), 2);
        assert_eq!(payload.total_bytes(), first_size + second_size);
        assert!(!payload.id.is_empty());
    }

    #[test]
    fn test_payload_ids_are_unique() {
        assert_ne!(ChangesetPayload::new().id, ChangesetPayload::new().id);
    }
}
