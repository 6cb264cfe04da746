// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # change-sync
//!
//! Offline-change synchronization for a local-first caching client: turns
//! the bag of pending local edits into an ordered list of dependency-aware
//! change groups, then pushes them to the remote repository one request in
//! flight at a time.
//!
//! ## Architecture
//!
//! ```text
//!                     ┌──────────────────────┐
//!                     │ LocalChangeSynchronizer
//!                     │  sequential walk,    │
//!                     │  batching, progress  │
//!                     └──────┬───────┬───────┘
//!                            │       │
//!              ┌─────────────┘       └─────────────┐
//!              ▼                                   ▼
//!     ┌─────────────────┐                 ┌─────────────────┐
//!     │  graph::build   │                 │  RequestGuard   │
//!     │  Changes →      │                 │  per-request    │
//!     │  ChangeGraph    │                 │  cancellation   │
//!     └─────────────────┘                 └─────────────────┘
//!              │                                   │
//!              ▼                                   ▼
//!     ┌─────────────────┐                 ┌─────────────────┐
//!     │  RevisionStore  │                 │ RepositoryClient│
//!     │  (local cache)  │                 │  (wire client)  │
//!     └─────────────────┘                 └─────────────────┘
//! ```
//!
//! The two traits at the bottom are the seams: the local cache that owns
//! pending changes and revisions implements [`RevisionStore`], the
//! wire-level client implements [`RepositoryClient`]. Everything between
//! them is this crate.
//!
//! ## Key behaviors
//!
//! - **Insertion-order output**: groups sync in the order changes were
//!   recorded; dependency edges always point backward, so no sort pass runs
//!   over the graph.
//! - **Changeset batching**: consecutive file-free groups ride together in
//!   changeset requests, split under configurable byte and instance-count
//!   limits, when the server supports them.
//! - **Identity propagation**: a server-assigned identity is committed to
//!   the store and rewritten across all still-pending groups, so later
//!   relationship endpoints address the instance correctly.
//! - **Per-instance failure isolation**: a rejected instance is recorded
//!   and skipped, along with everything depending on it; the run continues.
//! - **Transmission-aware cancellation**: canceling stops the walk before
//!   the next request, but a request whose payload is already fully
//!   transmitted runs to completion so its outcome is never ambiguous.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use change_sync::{LocalChangeSynchronizer, SyncConfig, SyncOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! let syncer = LocalChangeSynchronizer::new(store, client, SyncConfig::default());
//!
//! let report = syncer
//!     .sync(
//!         None,                      // sync everything pending
//!         SyncOptions::default(),
//!         Some(Arc::new(|p| println!("{:.0}%", p.fraction() * 100.0))),
//!         CancellationToken::new(),
//!     )
//!     .await?;
//!
//! for failure in &report.failures {
//!     eprintln!("{}: {}", failure.key, failure.kind);
//! }
//! ```

pub mod change;
pub mod config;
pub mod graph;
pub mod metrics;
pub mod progress;
pub mod remote;
pub mod store;
pub mod sync_options;
pub mod syncer;

pub use change::{
    ChangeStatus, Changes, FileChange, InstanceKey, ObjectChange, ObjectReference,
    RelationshipChange,
};
pub use config::SyncConfig;
pub use graph::{ChangeGraph, ChangeGroup, GroupId};
pub use progress::{ProgressCallback, RequestGuard, SyncProgress, TransferCallback};
pub use remote::{
    Capabilities, ChangesetResponse, ClientError, CreateObjectSpec, CreatePayload,
    CreateRelationshipSpec, CreateResponse, RemoteInstance, RepositoryClient,
};
pub use store::{Revision, RevisionStore, StoreError};
pub use sync_options::{EffectiveOptions, SyncOptions};
pub use syncer::{
    FailureKind, InstanceFailure, LocalChangeSynchronizer, SyncError, SyncReport, SyncState,
};
