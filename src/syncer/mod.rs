// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The local change synchronizer.
//!
//! [`LocalChangeSynchronizer`] walks the ordered group list produced by
//! [`crate::graph::build`] and pushes each group to the server, one request
//! in flight at a time. Consecutive file-free groups ride together in
//! changeset requests when the server supports them; everything else goes as
//! an individual request. Per-instance rejections are recorded and the walk
//! continues; only transport and store failures abort the run.
//!
//! # Example
//!
//! ```ignore
//! use change_sync::{LocalChangeSynchronizer, SyncConfig, SyncOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! let syncer = LocalChangeSynchronizer::new(store, client, SyncConfig::default());
//! let report = syncer
//!     .sync(None, SyncOptions::default(), None, CancellationToken::new())
//!     .await?;
//! println!("synced {}/{} groups", report.synced, report.total);
//! ```

mod batch;
mod single;
pub mod types;

pub use types::{FailureKind, InstanceFailure, SyncError, SyncReport, SyncState};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::change::{InstanceKey, ObjectReference};
use crate::config::SyncConfig;
use crate::graph::{self, ChangeGraph, GroupId};
use crate::metrics::{record_group_synced, record_instance_failure, record_sync_run};
use crate::progress::{ProgressCallback, SyncProgress};
use crate::remote::changeset::Endpoint;
use crate::remote::{Capabilities, ClientError, RepositoryClient};
use crate::store::RevisionStore;
use crate::sync_options::{EffectiveOptions, SyncOptions};

/// Pushes pending local changes to the remote repository.
///
/// One instance serves many sync runs; server capabilities are queried on
/// the first run and cached for the session.
pub struct LocalChangeSynchronizer {
    store: Arc<dyn RevisionStore>,
    client: Arc<dyn RepositoryClient>,
    config: SyncConfig,
    capabilities: OnceCell<Capabilities>,
}

impl LocalChangeSynchronizer {
    pub fn new(
        store: Arc<dyn RevisionStore>,
        client: Arc<dyn RepositoryClient>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            client,
            config,
            capabilities: OnceCell::new(),
        }
    }

    /// True if the store holds any pending local change.
    pub async fn has_local_changes(&self) -> Result<bool, SyncError> {
        Ok(self.store.has_changes().await?)
    }

    /// Run one synchronization pass.
    ///
    /// `scope` restricts the run to changes touching the given instances;
    /// `None` syncs everything pending. Progress is reported through
    /// `on_progress` after every group and during file transfers. Canceling
    /// `cancel` stops the walk before the next request; a request whose
    /// payload is already fully transmitted is left to finish so its outcome
    /// is not ambiguous.
    ///
    /// Per-instance failures do not abort the run; they are returned in the
    /// [`SyncReport`]. A transport or store failure aborts with an error,
    /// after releasing every upload-active mark this run set.
    #[tracing::instrument(skip_all, fields(scoped = scope.is_some()))]
    pub async fn sync(
        &self,
        scope: Option<HashSet<InstanceKey>>,
        options: SyncOptions,
        on_progress: Option<ProgressCallback>,
        cancel: CancellationToken,
    ) -> Result<SyncReport, SyncError> {
        let started = Instant::now();
        let result = self
            .sync_inner(scope, options, on_progress, cancel)
            .await;

        let status = match &result {
            Ok(report) if report.canceled => "canceled",
            Ok(report) if report.is_complete() => "done",
            Ok(_) => "partial",
            Err(_) => "failed",
        };
        record_sync_run(status, started.elapsed());
        result
    }

    async fn sync_inner(
        &self,
        scope: Option<HashSet<InstanceKey>>,
        options: SyncOptions,
        on_progress: Option<ProgressCallback>,
        cancel: CancellationToken,
    ) -> Result<SyncReport, SyncError> {
        let effective = options.resolve(&self.config);
        let capabilities = *self
            .capabilities
            .get_or_try_init(|| self.client.capabilities())
            .await
            .map_err(SyncError::Transport)?;

        debug!(state = %SyncState::Preparing, "starting sync run");
        self.store.commit_local_deletions().await?;
        let changes = self.store.get_pending_changes(scope.as_ref()).await?;
        let graph = graph::build(&changes);
        if graph.is_empty() {
            debug!("nothing to sync");
            return Ok(SyncReport::default());
        }
        info!(groups = graph.len(), changes = changes.len(), "change graph built");

        let mut bytes_total = 0;
        for (_, group) in graph.iter() {
            if let Some(file) = group.file() {
                bytes_total += self.store.file_size(file.key()).await?;
            }
        }

        let mut run = SyncRun {
            store: self.store.as_ref(),
            client: self.client.as_ref(),
            options: effective,
            capabilities,
            progress: Arc::new(Mutex::new(SyncProgress {
                bytes_total,
                groups_total: graph.len(),
                ..SyncProgress::default()
            })),
            graph,
            assigned: HashMap::new(),
            created: Vec::new(),
            failures: Vec::new(),
            failed: HashSet::new(),
            locked: HashSet::new(),
            on_progress,
            cancel,
        };

        // Upload-active marks are released on every exit path, including
        // fatal errors mid-walk.
        let walk_result = match run.lock_all(scope.as_ref()).await {
            Ok(()) => run.walk().await,
            Err(e) => Err(e),
        };
        run.unlock_remaining().await;
        let canceled = walk_result?;

        let mut refresh_failures = Vec::new();
        if effective.refresh_created && !canceled {
            refresh_failures = run.refresh_created().await;
        }

        let report = SyncReport {
            synced: run.graph.iter().filter(|(_, g)| g.is_synced()).count(),
            total: run.graph.len(),
            failures: run.failures,
            canceled,
            refresh_failures,
        };
        let final_state = if report.canceled {
            SyncState::Failed
        } else {
            SyncState::Done
        };
        info!(
            synced = report.synced,
            total = report.total,
            failures = report.failures.len(),
            canceled = report.canceled,
            state = %final_state,
            "sync run finished"
        );
        Ok(report)
    }
}

/// Mutable state of one sync run, shared by the walk, batching and
/// single-unit steps.
pub(crate) struct SyncRun<'a> {
    pub(crate) store: &'a dyn RevisionStore,
    pub(crate) client: &'a dyn RepositoryClient,
    pub(crate) options: EffectiveOptions,
    pub(crate) capabilities: Capabilities,
    pub(crate) graph: ChangeGraph,
    /// Remote identities assigned so far this run, keyed by both the key
    /// the instance had when sent and its post-commit key
    pub(crate) assigned: HashMap<InstanceKey, ObjectReference>,
    /// Created instances (post-commit key + identity) for the trailing
    /// refresh step
    pub(crate) created: Vec<(InstanceKey, ObjectReference)>,
    pub(crate) failures: Vec<InstanceFailure>,
    /// Groups recorded as failed, so cancellation does not double-report
    pub(crate) failed: HashSet<GroupId>,
    pub(crate) locked: HashSet<InstanceKey>,
    pub(crate) progress: Arc<Mutex<SyncProgress>>,
    pub(crate) on_progress: Option<ProgressCallback>,
    pub(crate) cancel: CancellationToken,
}

impl SyncRun<'_> {
    /// Mark every instance this run will touch as upload-active.
    pub(crate) async fn lock_all(
        &mut self,
        scope: Option<&HashSet<InstanceKey>>,
    ) -> Result<(), SyncError> {
        debug!(state = %SyncState::Locking, "marking instances upload-active");
        let mut keys: Vec<InstanceKey> = Vec::new();
        let mut seen = HashSet::new();
        for (_, group) in self.graph.iter() {
            for key in group.instance_keys() {
                if seen.insert(key.clone()) {
                    keys.push(key);
                }
            }
        }
        if let Some(scope) = scope {
            for key in scope {
                if seen.insert(key.clone()) {
                    keys.push(key.clone());
                }
            }
        }
        for key in keys {
            self.store.set_upload_active(&key, true).await?;
            self.locked.insert(key);
        }
        Ok(())
    }

    /// Walk the ordered group list. Returns true if the run was canceled.
    pub(crate) async fn walk(&mut self) -> Result<bool, SyncError> {
        let mut index = 0;
        while index < self.graph.len() {
            if self.cancel.is_cancelled() {
                self.cancel_remaining(index);
                return Ok(true);
            }
            let id = GroupId(index);
            if self.graph.get(id).is_synced() || self.failed.contains(&id) {
                index += 1;
                continue;
            }
            debug!(state = %SyncState::Walking(index), group = %id, "syncing group");

            let batchable = self.options.use_changesets
                && self.capabilities.supports_changesets
                && self.graph.get(id).file().is_none();
            if batchable {
                index = self.sync_batch_run(index).await?;
            } else {
                self.sync_single(id).await?;
                index += 1;
            }
        }
        Ok(false)
    }

    /// Trailing best-effort re-query of created instances, so the cache
    /// picks up server-assigned subtypes and computed properties.
    pub(crate) async fn refresh_created(&mut self) -> Vec<(InstanceKey, String)> {
        let mut refresh_failures = Vec::new();
        for (key, reference) in self.created.clone() {
            let remote = match self
                .client
                .query_instance(&reference, self.cancel.child_token())
                .await
            {
                Ok(remote) => remote,
                Err(e) => {
                    warn!(instance = %key, error = %e, "created-instance refresh query failed");
                    refresh_failures.push((key, e.to_string()));
                    continue;
                }
            };
            if let Err(e) = self
                .store
                .update_instance(&key, &remote.reference, remote.properties)
                .await
            {
                warn!(instance = %key, error = %e, "created-instance refresh commit failed");
                refresh_failures.push((key, e.to_string()));
            }
        }
        refresh_failures
    }

    /// Best-known wire identity of a relationship endpoint: the remote
    /// identity if it was assigned earlier this run, otherwise the local key.
    pub(crate) fn resolve_endpoint(&self, key: &InstanceKey) -> Endpoint {
        match self.assigned.get(key) {
            Some(reference) => Endpoint::Remote(reference.clone()),
            None => Endpoint::Local(key.clone()),
        }
    }

    /// Record a remote identity assignment: commit-time key rewrite across
    /// all pending groups plus the endpoint resolution map.
    pub(crate) fn record_assignment(
        &mut self,
        sent_key: &InstanceKey,
        committed_key: InstanceKey,
        reference: ObjectReference,
    ) {
        if &committed_key != sent_key {
            self.graph.rewrite_key(sent_key, &committed_key);
            if self.locked.remove(sent_key) {
                self.locked.insert(committed_key.clone());
            }
        }
        self.assigned.insert(sent_key.clone(), reference.clone());
        self.assigned.insert(committed_key.clone(), reference.clone());
        self.created.push((committed_key, reference));
    }

    pub(crate) fn record_failure(
        &mut self,
        key: InstanceKey,
        kind: FailureKind,
        message: Option<String>,
    ) {
        warn!(instance = %key, kind = %kind, message = message.as_deref().unwrap_or(""), "instance not synced");
        record_instance_failure(kind.as_str());
        self.failures.push(InstanceFailure::new(key, kind, message));
    }

    /// Record one failure per instance held by the group.
    pub(crate) fn fail_group(&mut self, id: GroupId, kind: FailureKind, message: Option<String>) {
        self.failed.insert(id);
        for key in self.graph.get(id).instance_keys() {
            self.record_failure(key, kind, message.clone());
        }
    }

    fn cancel_remaining(&mut self, from: usize) {
        for index in from..self.graph.len() {
            let id = GroupId(index);
            if !self.graph.get(id).is_synced() && !self.failed.contains(&id) {
                self.fail_group(id, FailureKind::Canceled, None);
            }
        }
    }

    /// Commit a group as synced: flag it, release its upload-active marks
    /// and report progress.
    pub(crate) async fn mark_group_synced(&mut self, id: GroupId) {
        self.graph.mark_synced(id);
        for key in self.graph.get(id).instance_keys() {
            self.unlock(&key).await;
        }
        record_group_synced();
        self.progress.lock().groups_synced += 1;
        self.report_progress();
    }

    pub(crate) async fn unlock(&mut self, key: &InstanceKey) {
        if self.locked.remove(key) {
            if let Err(e) = self.store.set_upload_active(key, false).await {
                warn!(instance = %key, error = %e, "failed to clear upload-active mark");
            }
        }
    }

    pub(crate) async fn unlock_remaining(&mut self) {
        let keys: Vec<InstanceKey> = self.locked.iter().cloned().collect();
        for key in keys {
            self.unlock(&key).await;
        }
    }

    pub(crate) fn set_label(&mut self, label: String) {
        self.progress.lock().label = label;
        self.report_progress();
    }

    pub(crate) fn report_progress(&self) {
        if let Some(ref callback) = self.on_progress {
            let snapshot = self.progress.lock().clone();
            callback(&snapshot);
        }
    }

    /// Map a client error on a non-batched request: rejection and
    /// cancellation are per-group outcomes, transport failures are fatal.
    pub(crate) fn fail_group_on_client_error(
        &mut self,
        id: GroupId,
        error: ClientError,
    ) -> Result<(), SyncError> {
        match error {
            ClientError::Rejected(message) => {
                self.fail_group(id, FailureKind::Rejected, Some(message));
                Ok(())
            }
            ClientError::Canceled => {
                self.fail_group(id, FailureKind::Canceled, None);
                Ok(())
            }
            e @ ClientError::Transport(_) => Err(SyncError::Transport(e)),
        }
    }
}
