// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Individual group requests.
//!
//! Groups that cannot ride in a changeset (attached files, changesets
//! disabled or unsupported) are synced one request at a time: creation,
//! property update, file-content update or deletion, chosen from the
//! group's slots.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::change::{ChangeStatus, InstanceKey, ObjectReference};
use crate::graph::{ChangeGroup, GroupId};
use crate::metrics::{record_request, LatencyTimer};
use crate::progress::{RequestGuard, TransferCallback};
use crate::remote::{ClientError, CreateObjectSpec, CreatePayload, CreateRelationshipSpec};
use crate::syncer::types::{FailureKind, SyncError, SyncState};
use crate::syncer::SyncRun;

impl SyncRun<'_> {
    /// Sync one group with an individual request (or two, when the server
    /// requires file content in a separate upload).
    pub(crate) async fn sync_single(&mut self, id: GroupId) -> Result<(), SyncError> {
        debug!(state = %SyncState::SingleUnit, group = %id, "syncing group individually");
        if !self.graph.are_all_dependencies_synced(id) {
            self.fail_group(id, FailureKind::DependencyNotSynced, None);
            return Ok(());
        }

        let group = self.graph.get(id).clone();
        self.set_label(group_label(&group));

        let object_status = group.object_status();
        let relationship_status = group.relationship_status();
        if object_status == ChangeStatus::Created || relationship_status == ChangeStatus::Created {
            self.sync_creation(id, &group).await
        } else if object_status == ChangeStatus::Deleted
            || relationship_status == ChangeStatus::Deleted
        {
            self.sync_deletion(id, &group).await
        } else if object_status == ChangeStatus::Modified
            || relationship_status == ChangeStatus::Modified
        {
            self.sync_update(id, &group).await
        } else if group.file().is_some() {
            self.sync_file_update(id, &group).await
        } else {
            Err(SyncError::Internal(format!(
                "group {id} holds no pending change"
            )))
        }
    }

    /// Create the group's object and/or relationship, carrying the file
    /// content inline when the server allows it.
    async fn sync_creation(&mut self, id: GroupId, group: &ChangeGroup) -> Result<(), SyncError> {
        let mut payload = CreatePayload {
            object: None,
            relationship: None,
        };
        if let Some(object) = group.object() {
            let revision = self.store.read_revision(&object.key).await?;
            payload.object = Some(CreateObjectSpec {
                key: object.key.clone(),
                properties: revision.properties().clone(),
            });
        }
        if let Some(relationship) = group.relationship() {
            let revision = self.store.read_revision(relationship.key()).await?;
            payload.relationship = Some(CreateRelationshipSpec {
                key: relationship.key().clone(),
                properties: revision.properties().clone(),
                source: self.resolve_endpoint(&relationship.source),
                target: self.resolve_endpoint(&relationship.target),
            });
        }

        let file_path: Option<PathBuf> = match group.file() {
            Some(file) => Some(self.store.file_path(file.key()).await?),
            None => None,
        };
        let inline_file = file_path.is_some() && !self.capabilities.separate_file_upload;

        let guard = RequestGuard::new(&self.cancel);
        let callback = if inline_file {
            self.file_transfer_callback(&guard)
        } else {
            guard.transfer_callback(Arc::new(|_, _| {}))
        };
        let timer = LatencyTimer::new("create");
        let result = self
            .client
            .send_create(
                &payload,
                if inline_file { file_path.as_deref() } else { None },
                callback,
                guard.token(),
            )
            .await;
        drop(timer);
        drop(guard);

        let response = match result {
            Ok(response) => {
                record_request("create", "success");
                response
            }
            Err(e) => {
                record_request("create", client_error_status(&e));
                return self.fail_group_on_client_error(id, e);
            }
        };
        if inline_file {
            self.settle_file_progress();
        }

        if let Some(object) = group.object() {
            let mut revision = self.store.read_revision(&object.key).await?;
            revision.set_reference(response.reference.clone());
            self.store.commit_revision(revision).await?;
            let committed_key = self.store.find_instance(&response.reference).await?;
            self.record_assignment(&object.key, committed_key, response.reference.clone());
        }
        if let Some(relationship) = group.relationship() {
            // In an object+relationship group the relationship's identity
            // rides alongside the primary one; alone, it is the primary.
            let reference = if group.object().is_some() {
                response.relationship_reference.clone().ok_or_else(|| {
                    SyncError::Internal(format!(
                        "creation response for {} carries no relationship identity",
                        relationship.key()
                    ))
                })?
            } else {
                response.reference.clone()
            };
            let mut revision = self.store.read_revision(relationship.key()).await?;
            revision.set_reference(reference);
            self.store.commit_revision(revision).await?;
        }

        if let Some(file) = group.file() {
            if self.capabilities.separate_file_upload {
                // Object creation already committed; a file failure leaves
                // only the file change pending for the next run.
                let path = match file_path {
                    Some(path) => path,
                    None => self.store.file_path(file.key()).await?,
                };
                let guard = RequestGuard::new(&self.cancel);
                let callback = self.file_transfer_callback(&guard);
                let timer = LatencyTimer::new("update_file");
                let result = self
                    .client
                    .send_update_file(&response.reference, &path, callback, guard.token())
                    .await;
                drop(timer);
                drop(guard);
                match result {
                    Ok(()) => {
                        record_request("update_file", "success");
                        self.settle_file_progress();
                    }
                    Err(e) => {
                        record_request("update_file", client_error_status(&e));
                        return self.fail_instance_on_client_error(id, file.key().clone(), e);
                    }
                }
            }
        }

        self.mark_group_synced(id).await;
        Ok(())
    }

    /// Send the group's object or relationship deletion.
    async fn sync_deletion(&mut self, id: GroupId, group: &ChangeGroup) -> Result<(), SyncError> {
        let key = match (group.object(), group.relationship()) {
            (Some(object), _) => object.key.clone(),
            (None, Some(relationship)) => relationship.key().clone(),
            (None, None) => {
                return Err(SyncError::Internal(format!(
                    "deletion group {id} holds no change"
                )))
            }
        };
        let revision = self.store.read_revision(&key).await?;
        let reference = required_reference(&key, revision.reference())?;

        let timer = LatencyTimer::new("delete");
        let result = self
            .client
            .send_delete(&reference, self.cancel.child_token())
            .await;
        drop(timer);
        match result {
            Ok(()) => record_request("delete", "success"),
            Err(e) => {
                record_request("delete", client_error_status(&e));
                return self.fail_group_on_client_error(id, e);
            }
        }

        self.store.commit_revision(revision).await?;
        self.mark_group_synced(id).await;
        Ok(())
    }

    /// Send the group's property edits.
    async fn sync_update(&mut self, id: GroupId, group: &ChangeGroup) -> Result<(), SyncError> {
        let key = match (group.object(), group.relationship()) {
            (Some(object), _) => object.key.clone(),
            (None, Some(relationship)) => relationship.key().clone(),
            (None, None) => {
                return Err(SyncError::Internal(format!(
                    "update group {id} holds no change"
                )))
            }
        };
        let revision = self.store.read_revision(&key).await?;
        let reference = required_reference(&key, revision.reference())?;

        let guard = RequestGuard::new(&self.cancel);
        let callback = guard.transfer_callback(Arc::new(|_, _| {}));
        let timer = LatencyTimer::new("update");
        let result = self
            .client
            .send_update(
                &reference,
                revision.properties(),
                revision.tag(),
                callback,
                guard.token(),
            )
            .await;
        drop(timer);
        drop(guard);
        match result {
            Ok(()) => record_request("update", "success"),
            Err(e) => {
                record_request("update", client_error_status(&e));
                return self.fail_group_on_client_error(id, e);
            }
        }

        self.store.commit_revision(revision).await?;
        self.mark_group_synced(id).await;
        Ok(())
    }

    /// Replace the file content of an already-synced instance.
    async fn sync_file_update(&mut self, id: GroupId, group: &ChangeGroup) -> Result<(), SyncError> {
        let file = group
            .file()
            .ok_or_else(|| SyncError::Internal(format!("group {id} holds no file change")))?;
        let key = file.key().clone();
        let revision = self.store.read_revision(&key).await?;
        let reference = required_reference(&key, revision.reference())?;
        let path = self.store.file_path(&key).await?;

        let guard = RequestGuard::new(&self.cancel);
        let callback = self.file_transfer_callback(&guard);
        let timer = LatencyTimer::new("update_file");
        let result = self
            .client
            .send_update_file(&reference, &path, callback, guard.token())
            .await;
        drop(timer);
        drop(guard);
        match result {
            Ok(()) => {
                record_request("update_file", "success");
                self.settle_file_progress();
            }
            Err(e) => {
                record_request("update_file", client_error_status(&e));
                return self.fail_group_on_client_error(id, e);
            }
        }

        self.store.commit_revision(revision).await?;
        self.mark_group_synced(id).await;
        Ok(())
    }

    /// Transfer callback that folds the current file's bytes into the
    /// run-wide progress snapshot.
    fn file_transfer_callback(&self, guard: &RequestGuard) -> TransferCallback {
        let progress = Arc::clone(&self.progress);
        let on_progress = self.on_progress.clone();
        let base = progress.lock().bytes_synced;
        guard.transfer_callback(Arc::new(move |sent, total| {
            let snapshot = {
                let mut p = progress.lock();
                p.file_bytes_synced = sent;
                p.file_bytes_total = total;
                p.bytes_synced = base + sent;
                p.clone()
            };
            if let Some(ref callback) = on_progress {
                callback(&snapshot);
            }
        }))
    }

    /// Fold a finished file transfer into the run totals and clear the
    /// per-file fields.
    fn settle_file_progress(&mut self) {
        let mut p = self.progress.lock();
        p.file_bytes_synced = 0;
        p.file_bytes_total = 0;
    }

    /// Record a failure against a single instance of the group, keeping the
    /// group unsynced; transport failures stay fatal.
    fn fail_instance_on_client_error(
        &mut self,
        id: GroupId,
        key: InstanceKey,
        error: ClientError,
    ) -> Result<(), SyncError> {
        match error {
            ClientError::Rejected(message) => {
                self.failed.insert(id);
                self.record_failure(key, FailureKind::Rejected, Some(message));
                Ok(())
            }
            ClientError::Canceled => {
                self.failed.insert(id);
                self.record_failure(key, FailureKind::Canceled, None);
                Ok(())
            }
            e @ ClientError::Transport(_) => Err(SyncError::Transport(e)),
        }
    }
}

fn group_label(group: &ChangeGroup) -> String {
    if let Some(object) = group.object() {
        object.key.to_string()
    } else if let Some(relationship) = group.relationship() {
        relationship.key().to_string()
    } else if let Some(file) = group.file() {
        file.key().to_string()
    } else {
        String::new()
    }
}

fn client_error_status(error: &ClientError) -> &'static str {
    match error {
        ClientError::Rejected(_) => "rejected",
        ClientError::Canceled => "canceled",
        ClientError::Transport(_) => "error",
    }
}

fn required_reference(
    key: &InstanceKey,
    reference: Option<&ObjectReference>,
) -> Result<ObjectReference, SyncError> {
    reference.cloned().ok_or_else(|| {
        SyncError::Internal(format!("instance {key} has no remote identity to address"))
    })
}
