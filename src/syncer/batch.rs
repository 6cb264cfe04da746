// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Changeset batching.
//!
//! A run of consecutive file-free groups is sent in as few changeset
//! requests as the byte and instance-count limits allow. A group whose
//! entries would overflow the open request is not split; the request is
//! flushed and the group opens the next one. Entries are built per request,
//! after earlier requests have committed, so endpoint keys and identities
//! are current at send time.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tracing::debug;

use crate::change::{ChangeStatus, InstanceKey};
use crate::graph::GroupId;
use crate::metrics::{record_changeset, record_request, LatencyTimer};
use crate::progress::RequestGuard;
use crate::remote::changeset::{ChangesetEntry, ChangesetPayload};
use crate::remote::{ChangesetResponse, ClientError};
use crate::store::Revision;
use crate::syncer::types::{FailureKind, SyncError, SyncState};
use crate::syncer::SyncRun;

impl SyncRun<'_> {
    /// Sync the maximal run of consecutive file-free groups starting at
    /// `start`. Returns the index of the first group past the run.
    pub(crate) async fn sync_batch_run(&mut self, start: usize) -> Result<usize, SyncError> {
        debug!(state = %SyncState::Batching, start, "assembling changeset run");

        let mut queue: VecDeque<GroupId> = VecDeque::new();
        let mut member_set: HashSet<GroupId> = HashSet::new();
        let mut end = start;
        while end < self.graph.len() {
            let id = GroupId(end);
            let group = self.graph.get(id);
            if group.file().is_some() {
                break;
            }
            if group.is_synced() {
                end += 1;
                continue;
            }
            // A dependency that already failed is neither synced nor in the
            // run; the dependent cannot sync either.
            if !self.graph.are_all_unsynced_dependencies_in_set(id, &member_set) {
                self.fail_group(id, FailureKind::DependencyNotSynced, None);
                end += 1;
                continue;
            }
            queue.push_back(id);
            member_set.insert(id);
            end += 1;
        }

        let mut payload = ChangesetPayload::new();
        let mut request_members: Vec<GroupId> = Vec::new();
        let mut request_set: HashSet<GroupId> = HashSet::new();
        while let Some(id) = queue.pop_front() {
            if self.failed.contains(&id) {
                continue;
            }
            // Dependencies may have been rejected by an earlier request of
            // this same run.
            if !self.graph.are_all_unsynced_dependencies_in_set(id, &request_set) {
                self.fail_group(id, FailureKind::DependencyNotSynced, None);
                continue;
            }

            let entries = self.group_entries(id).await?;
            for (entry, size) in &entries {
                if *size > self.options.max_bytes {
                    return Err(SyncError::InstanceTooLarge {
                        key: entry.key().clone(),
                        size: *size,
                        limit: self.options.max_bytes,
                    });
                }
            }
            let entry_bytes: usize = entries.iter().map(|(_, size)| size).sum();
            let overflows = payload.total_bytes() + entry_bytes > self.options.max_bytes
                || payload.len() + entries.len() > self.options.max_instances;
            if !payload.is_empty() && overflows {
                // Flush and retry the group against the next, empty request;
                // its entries are rebuilt so endpoints stay current.
                queue.push_front(id);
                let members = std::mem::take(&mut request_members);
                request_set.clear();
                let sent = std::mem::replace(&mut payload, ChangesetPayload::new());
                if !self.flush_changeset(sent, &members).await? {
                    while let Some(rest) = queue.pop_front() {
                        if !self.failed.contains(&rest) {
                            self.fail_group(rest, FailureKind::Canceled, None);
                        }
                    }
                    return Ok(end);
                }
                continue;
            }

            for (entry, size) in entries {
                payload.push(entry, size);
            }
            request_members.push(id);
            request_set.insert(id);
        }

        if !payload.is_empty() {
            let members = std::mem::take(&mut request_members);
            self.flush_changeset(payload, &members).await?;
        }
        Ok(end)
    }

    /// Send one assembled changeset and commit its outcome. Returns false if
    /// the request was canceled and the rest of the run must not be sent.
    async fn flush_changeset(
        &mut self,
        payload: ChangesetPayload,
        members: &[GroupId],
    ) -> Result<bool, SyncError> {
        self.set_label(format!("changeset ({} instances)", payload.len()));
        debug!(
            request = %payload.id,
            instances = payload.len(),
            bytes = payload.total_bytes(),
            groups = members.len(),
            "sending changeset"
        );

        let guard = RequestGuard::new(&self.cancel);
        let callback = guard.transfer_callback(Arc::new(|_, _| {}));
        let timer = LatencyTimer::new("changeset");
        let result = self
            .client
            .send_changeset(&payload, callback, guard.token())
            .await;
        drop(timer);
        drop(guard);

        match result {
            Ok(response) => {
                record_request("changeset", "success");
                record_changeset(payload.len(), payload.total_bytes());
                self.apply_changeset_response(members, &response).await?;
                Ok(true)
            }
            Err(ClientError::Rejected(message)) => {
                record_request("changeset", "rejected");
                for &id in members {
                    self.fail_group(id, FailureKind::Rejected, Some(message.clone()));
                }
                Ok(true)
            }
            Err(ClientError::Canceled) => {
                record_request("changeset", "canceled");
                for &id in members {
                    self.fail_group(id, FailureKind::Canceled, None);
                }
                Ok(false)
            }
            Err(e @ ClientError::Transport(_)) => {
                record_request("changeset", "error");
                Err(SyncError::Transport(e))
            }
        }
    }

    /// Commit the per-instance outcome of one changeset request, in member
    /// order so identity assignments propagate to later members' endpoints.
    async fn apply_changeset_response(
        &mut self,
        members: &[GroupId],
        response: &ChangesetResponse,
    ) -> Result<(), SyncError> {
        debug!(state = %SyncState::Committing, groups = members.len(), "committing changeset outcome");
        for &id in members {
            // A rejected dependency earlier in this request fails the
            // dependent even though the server may have accepted it.
            if !self.graph.are_all_dependencies_synced(id) {
                self.fail_group(id, FailureKind::DependencyNotSynced, None);
                continue;
            }

            let object = self.graph.get(id).object().cloned();
            let relationship = self.graph.get(id).relationship().cloned();
            let mut synced = true;
            if let Some(change) = object {
                synced &= self
                    .commit_instance(&change.key, change.status, true, response)
                    .await?;
            }
            if let Some(change) = relationship {
                let key = change.key().clone();
                synced &= self
                    .commit_instance(&key, change.change.status, false, response)
                    .await?;
            }
            if synced {
                self.mark_group_synced(id).await;
            } else {
                self.failed.insert(id);
            }
        }
        Ok(())
    }

    /// Commit one instance's outcome. Returns false if the server rejected
    /// it; accepted siblings in the same group are still committed so the
    /// cache tracks what now exists remotely.
    async fn commit_instance(
        &mut self,
        key: &InstanceKey,
        status: ChangeStatus,
        is_object: bool,
        response: &ChangesetResponse,
    ) -> Result<bool, SyncError> {
        if let Some(message) = response.failed.get(key) {
            self.record_failure(key.clone(), FailureKind::Rejected, Some(message.clone()));
            return Ok(false);
        }

        let assigned = response.assigned.get(key).cloned();
        let mut revision = self.store.read_revision(key).await?;
        if let Some(ref reference) = assigned {
            revision.set_reference(reference.clone());
        }
        self.store.commit_revision(revision).await?;

        if let Some(reference) = assigned {
            if status == ChangeStatus::Created && is_object {
                let committed_key = self.store.find_instance(&reference).await?;
                self.record_assignment(key, committed_key, reference);
            }
        }
        Ok(true)
    }

    /// Build the wire entries for one group from its current revisions.
    async fn group_entries(
        &self,
        id: GroupId,
    ) -> Result<Vec<(ChangesetEntry, usize)>, SyncError> {
        let object = self.graph.get(id).object().cloned();
        let relationship = self.graph.get(id).relationship().cloned();

        let mut entries = Vec::with_capacity(2);
        if let Some(change) = object {
            let revision = self.store.read_revision(&change.key).await?;
            let entry = match change.status {
                ChangeStatus::Created => ChangesetEntry::CreateObject {
                    key: change.key.clone(),
                    properties: revision.properties().clone(),
                },
                ChangeStatus::Modified => ChangesetEntry::ModifyObject {
                    key: change.key.clone(),
                    reference: required_reference(&revision)?,
                    properties: revision.properties().clone(),
                    tag: revision.tag().to_string(),
                },
                ChangeStatus::Deleted => ChangesetEntry::DeleteObject {
                    key: change.key.clone(),
                    reference: required_reference(&revision)?,
                },
                ChangeStatus::NoChange => {
                    return Err(SyncError::Internal(format!(
                        "group {id} holds a NoChange object record"
                    )))
                }
            };
            let size = entry.serialized_size()?;
            entries.push((entry, size));
        }
        if let Some(change) = relationship {
            let key = change.key().clone();
            let revision = self.store.read_revision(&key).await?;
            let entry = match change.change.status {
                ChangeStatus::Created => ChangesetEntry::CreateRelationship {
                    key,
                    properties: revision.properties().clone(),
                    source: self.resolve_endpoint(&change.source),
                    target: self.resolve_endpoint(&change.target),
                },
                ChangeStatus::Modified => ChangesetEntry::ModifyObject {
                    key,
                    reference: required_reference(&revision)?,
                    properties: revision.properties().clone(),
                    tag: revision.tag().to_string(),
                },
                ChangeStatus::Deleted => ChangesetEntry::DeleteRelationship {
                    key,
                    reference: required_reference(&revision)?,
                },
                ChangeStatus::NoChange => {
                    return Err(SyncError::Internal(format!(
                        "group {id} holds a NoChange relationship record"
                    )))
                }
            };
            let size = entry.serialized_size()?;
            entries.push((entry, size));
        }
        Ok(entries)
    }
}

/// Remote identity a modify or delete entry must carry.
fn required_reference(
    revision: &Revision,
) -> Result<crate::change::ObjectReference, SyncError> {
    revision.reference().cloned().ok_or_else(|| {
        SyncError::Internal(format!(
            "instance {} has no remote identity for a modify or delete",
            revision.key()
        ))
    })
}
