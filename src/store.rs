// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Revision store seam.
//!
//! The local persistent cache that records pending changes, persists
//! [`Revision`]s and stores attached files lives outside this crate; the
//! synchronizer only talks to it through [`RevisionStore`].

use std::collections::HashSet;
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::change::{Changes, InstanceKey, ObjectReference};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("instance not found")]
    NotFound,
    #[error("revision store error: {0}")]
    Backend(String),
}

/// One instance's pending diff and its target identity.
///
/// Owned by the revision store. The synchronizer reads it, assigns the
/// server identity after creation, and hands it back for commit.
#[derive(Debug, Clone)]
pub struct Revision {
    key: InstanceKey,
    reference: Option<ObjectReference>,
    properties: Value,
    tag: String,
}

impl Revision {
    pub fn new(
        key: InstanceKey,
        reference: Option<ObjectReference>,
        properties: Value,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            key,
            reference,
            properties,
            tag: tag.into(),
        }
    }

    #[must_use]
    pub fn key(&self) -> &InstanceKey {
        &self.key
    }

    /// Remote identity, once the instance exists on the server.
    #[must_use]
    pub fn reference(&self) -> Option<&ObjectReference> {
        self.reference.as_ref()
    }

    /// Only the changed properties, as produced by the external diff.
    #[must_use]
    pub fn properties(&self) -> &Value {
        &self.properties
    }

    /// Concurrency tag sent with property updates.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Record the server-assigned identity before committing.
    pub fn set_reference(&mut self, reference: ObjectReference) {
        self.reference = Some(reference);
    }
}

/// The change-manager / cache-adapter seam (external collaborator).
#[async_trait]
pub trait RevisionStore: Send + Sync {
    /// All pending changes, or only those touching `scope` when given.
    async fn get_pending_changes(
        &self,
        scope: Option<&HashSet<InstanceKey>>,
    ) -> Result<Changes, StoreError>;

    /// True if any local change is pending.
    async fn has_changes(&self) -> Result<bool, StoreError>;

    /// Commit deletions of instances that were never synced; they need no
    /// network round-trip.
    async fn commit_local_deletions(&self) -> Result<(), StoreError>;

    async fn read_revision(&self, key: &InstanceKey) -> Result<Revision, StoreError>;

    /// Transactionally apply a revision: the change stops being pending and
    /// the instance is reindexed under its remote identity, if one was
    /// assigned.
    async fn commit_revision(&self, revision: Revision) -> Result<(), StoreError>;

    /// Mark or unmark an instance as upload-active, blocking concurrent
    /// local edits mid-sync.
    async fn set_upload_active(&self, key: &InstanceKey, active: bool) -> Result<(), StoreError>;

    /// Local key of an instance known by its remote identity.
    async fn find_instance(&self, reference: &ObjectReference) -> Result<InstanceKey, StoreError>;

    /// Overwrite an instance's cached class and properties from a server
    /// query (used when the server assigned a different subtype).
    async fn update_instance(
        &self,
        key: &InstanceKey,
        reference: &ObjectReference,
        properties: Value,
    ) -> Result<(), StoreError>;

    /// Path of the locally stored file content for a file change.
    async fn file_path(&self, key: &InstanceKey) -> Result<PathBuf, StoreError>;

    /// Size in bytes of the locally stored file content.
    async fn file_size(&self, key: &InstanceKey) -> Result<u64, StoreError>;
}
