// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Repository client seam.
//!
//! The wire-level client that issues object/relationship/file/changeset
//! requests lives outside this crate; the synchronizer drives it through
//! [`RepositoryClient`]. Wire encoding is the client's concern.

pub mod changeset;

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::change::{InstanceKey, ObjectReference};
use crate::progress::TransferCallback;
use changeset::{ChangesetPayload, Endpoint};

#[derive(Error, Debug)]
pub enum ClientError {
    /// The server understood and refused the change. Recorded against the
    /// instance; does not abort the run.
    #[error("rejected by server: {0}")]
    Rejected(String),
    /// The request was canceled before its payload was fully transmitted.
    #[error("request canceled")]
    Canceled,
    /// Transport-level failure (connection, timeout, malformed response).
    #[error("transport error: {0}")]
    Transport(String),
}

/// What the server session supports. Queried once per session and cached.
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    /// Server accepts multi-instance changeset requests
    pub supports_changesets: bool,
    /// Object creation and file-content upload must be two separate requests
    pub separate_file_upload: bool,
}

/// Payload of a single-unit creation request: an object, a relationship, or
/// an object carrying its first relationship (and optionally a file).
#[derive(Debug, Clone)]
pub struct CreatePayload {
    pub object: Option<CreateObjectSpec>,
    pub relationship: Option<CreateRelationshipSpec>,
}

#[derive(Debug, Clone)]
pub struct CreateObjectSpec {
    pub key: InstanceKey,
    pub properties: Value,
}

#[derive(Debug, Clone)]
pub struct CreateRelationshipSpec {
    pub key: InstanceKey,
    pub properties: Value,
    pub source: Endpoint,
    pub target: Endpoint,
}

/// Identities assigned by a creation request.
#[derive(Debug, Clone)]
pub struct CreateResponse {
    pub reference: ObjectReference,
    /// Identity of the relationship created in the same request, if any
    pub relationship_reference: Option<ObjectReference>,
}

/// Instance state fetched back from the server.
#[derive(Debug, Clone)]
pub struct RemoteInstance {
    pub reference: ObjectReference,
    pub properties: Value,
}

/// Per-instance outcome of a changeset request.
///
/// Instances absent from both maps were accepted without a new identity
/// (updates and deletions).
#[derive(Debug, Clone, Default)]
pub struct ChangesetResponse {
    /// Newly assigned identities, keyed by the local key that was sent
    pub assigned: HashMap<InstanceKey, ObjectReference>,
    /// Server-rejected instances with the server's message
    pub failed: HashMap<InstanceKey, String>,
}

/// The remote repository seam (external collaborator).
#[async_trait]
pub trait RepositoryClient: Send + Sync {
    /// Advertised server capabilities. The synchronizer calls this at most
    /// once per session.
    async fn capabilities(&self) -> Result<Capabilities, ClientError>;

    /// Send one changeset carrying multiple instances' creations, updates
    /// and deletions.
    async fn send_changeset(
        &self,
        payload: &ChangesetPayload,
        progress: TransferCallback,
        cancel: CancellationToken,
    ) -> Result<ChangesetResponse, ClientError>;

    /// Create an object and/or relationship, optionally with an initial
    /// file payload.
    async fn send_create(
        &self,
        payload: &CreatePayload,
        file: Option<&Path>,
        progress: TransferCallback,
        cancel: CancellationToken,
    ) -> Result<CreateResponse, ClientError>;

    /// Update an instance's changed properties under a concurrency tag.
    async fn send_update(
        &self,
        reference: &ObjectReference,
        properties: &Value,
        tag: &str,
        progress: TransferCallback,
        cancel: CancellationToken,
    ) -> Result<(), ClientError>;

    /// Replace an instance's attached file content.
    async fn send_update_file(
        &self,
        reference: &ObjectReference,
        file: &Path,
        progress: TransferCallback,
        cancel: CancellationToken,
    ) -> Result<(), ClientError>;

    /// Delete an object or relationship instance.
    async fn send_delete(
        &self,
        reference: &ObjectReference,
        cancel: CancellationToken,
    ) -> Result<(), ClientError>;

    /// Fetch an instance back, including the concrete class the server
    /// assigned.
    async fn query_instance(
        &self,
        reference: &ObjectReference,
        cancel: CancellationToken,
    ) -> Result<RemoteInstance, ClientError>;
}
