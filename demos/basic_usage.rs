// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Minimal end-to-end sync run against in-memory fakes.
//!
//! Run with: `cargo run --example basic_usage`

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use change_sync::remote::changeset::ChangesetPayload;
use change_sync::{
    Capabilities, ChangeStatus, Changes, ChangesetResponse, ClientError, CreatePayload,
    CreateResponse, InstanceKey, LocalChangeSynchronizer, ObjectChange, ObjectReference,
    RelationshipChange, RemoteInstance, RepositoryClient, Revision, RevisionStore, StoreError,
    SyncConfig, SyncOptions, TransferCallback,
};

/// In-memory cache holding two pending creations and one relationship.
struct DemoStore {
    changes: Changes,
    revisions: Mutex<HashMap<InstanceKey, Revision>>,
}

impl DemoStore {
    fn new() -> Self {
        let folder = InstanceKey::new("Folder", "local-f1");
        let document = InstanceKey::new("Document", "local-d1");

        let mut changes = Changes::default();
        changes
            .objects
            .push(ObjectChange::new(folder.clone(), ChangeStatus::Created, 0));
        changes
            .objects
            .push(ObjectChange::new(document.clone(), ChangeStatus::Created, 1));
        changes.relationships.push(RelationshipChange::new(
            ObjectChange::new(
                InstanceKey::new("FolderDocument", "local-r1"),
                ChangeStatus::Created,
                2,
            ),
            folder.clone(),
            document.clone(),
        ));

        let mut revisions = HashMap::new();
        revisions.insert(
            folder.clone(),
            Revision::new(folder, None, json!({"name": "Inbox"}), "v0"),
        );
        revisions.insert(
            document.clone(),
            Revision::new(document, None, json!({"title": "Quarterly report"}), "v0"),
        );
        let relationship = InstanceKey::new("FolderDocument", "local-r1");
        revisions.insert(
            relationship.clone(),
            Revision::new(relationship, None, json!({}), "v0"),
        );

        Self {
            changes,
            revisions: Mutex::new(revisions),
        }
    }
}

#[async_trait]
impl RevisionStore for DemoStore {
    async fn get_pending_changes(
        &self,
        _scope: Option<&HashSet<InstanceKey>>,
    ) -> Result<Changes, StoreError> {
        Ok(self.changes.clone())
    }

    async fn has_changes(&self) -> Result<bool, StoreError> {
        Ok(!self.changes.is_empty())
    }

    async fn commit_local_deletions(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn read_revision(&self, key: &InstanceKey) -> Result<Revision, StoreError> {
        self.revisions
            .lock()
            .get(key)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn commit_revision(&self, revision: Revision) -> Result<(), StoreError> {
        println!(
            "  store: committed {} as {}",
            revision.key(),
            revision
                .reference()
                .map_or_else(|| "(no identity)".to_string(), ToString::to_string)
        );
        Ok(())
    }

    async fn set_upload_active(&self, key: &InstanceKey, active: bool) -> Result<(), StoreError> {
        println!("  store: upload-active {active} for {key}");
        Ok(())
    }

    async fn find_instance(&self, reference: &ObjectReference) -> Result<InstanceKey, StoreError> {
        Ok(InstanceKey::new(&reference.class, &reference.remote_id))
    }

    async fn update_instance(
        &self,
        key: &InstanceKey,
        reference: &ObjectReference,
        _properties: Value,
    ) -> Result<(), StoreError> {
        println!("  store: refreshed {key} from {reference}");
        Ok(())
    }

    async fn file_path(&self, _key: &InstanceKey) -> Result<PathBuf, StoreError> {
        Err(StoreError::NotFound)
    }

    async fn file_size(&self, _key: &InstanceKey) -> Result<u64, StoreError> {
        Err(StoreError::NotFound)
    }
}

/// Fake server that accepts everything and assigns sequential identities.
struct DemoClient {
    next_id: Mutex<u64>,
}

impl DemoClient {
    fn assign(&self, class: &str) -> ObjectReference {
        let mut next = self.next_id.lock();
        *next += 1;
        ObjectReference::new(class, format!("srv-{next}"))
    }
}

#[async_trait]
impl RepositoryClient for DemoClient {
    async fn capabilities(&self) -> Result<Capabilities, ClientError> {
        Ok(Capabilities {
            supports_changesets: true,
            separate_file_upload: false,
        })
    }

    async fn send_changeset(
        &self,
        payload: &ChangesetPayload,
        progress: TransferCallback,
        _cancel: CancellationToken,
    ) -> Result<ChangesetResponse, ClientError> {
        println!("  client: changeset {} ({} instances)", payload.id, payload.len());
        progress(1, 1);
        let mut response = ChangesetResponse::default();
        for entry in &payload.entries {
            let key = entry.key();
            response.assigned.insert(key.clone(), self.assign(&key.class));
        }
        Ok(response)
    }

    async fn send_create(
        &self,
        payload: &CreatePayload,
        _file: Option<&Path>,
        progress: TransferCallback,
        _cancel: CancellationToken,
    ) -> Result<CreateResponse, ClientError> {
        progress(1, 1);
        let class = payload
            .object
            .as_ref()
            .map(|o| o.key.class.as_str())
            .unwrap_or("FolderDocument");
        Ok(CreateResponse {
            reference: self.assign(class),
            relationship_reference: payload
                .object
                .as_ref()
                .and(payload.relationship.as_ref())
                .map(|r| self.assign(&r.key.class)),
        })
    }

    async fn send_update(
        &self,
        _reference: &ObjectReference,
        _properties: &Value,
        _tag: &str,
        progress: TransferCallback,
        _cancel: CancellationToken,
    ) -> Result<(), ClientError> {
        progress(1, 1);
        Ok(())
    }

    async fn send_update_file(
        &self,
        _reference: &ObjectReference,
        _file: &Path,
        progress: TransferCallback,
        _cancel: CancellationToken,
    ) -> Result<(), ClientError> {
        progress(1, 1);
        Ok(())
    }

    async fn send_delete(
        &self,
        _reference: &ObjectReference,
        _cancel: CancellationToken,
    ) -> Result<(), ClientError> {
        Ok(())
    }

    async fn query_instance(
        &self,
        reference: &ObjectReference,
        _cancel: CancellationToken,
    ) -> Result<RemoteInstance, ClientError> {
        Ok(RemoteInstance {
            reference: reference.clone(),
            properties: json!({"server_side": true}),
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "change_sync=debug".into()),
        )
        .init();

    let syncer = LocalChangeSynchronizer::new(
        Arc::new(DemoStore::new()),
        Arc::new(DemoClient {
            next_id: Mutex::new(0),
        }),
        SyncConfig::default(),
    );

    println!("syncing local changes...");
    let report = syncer
        .sync(
            None,
            SyncOptions::default(),
            Some(Arc::new(|p| {
                println!(
                    "  progress: {}/{} groups ({:.0}%)",
                    p.groups_synced,
                    p.groups_total,
                    p.fraction() * 100.0
                );
            })),
            CancellationToken::new(),
        )
        .await?;

    println!(
        "done: {}/{} groups synced, {} failures",
        report.synced,
        report.total,
        report.failures.len()
    );
    for failure in &report.failures {
        println!("  failed: {} ({})", failure.key, failure.kind);
    }
    Ok(())
}
