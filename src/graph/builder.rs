// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Graph construction from a bag of pending changes.
//!
//! Three insertion passes, each in ascending `sequence` order:
//!
//! 1. every changed object gets its own group;
//! 2. a file change merges into its object's group only when that object is
//!    `Created` (a creation request may carry an initial file payload);
//!    otherwise it becomes a standalone group — a property update and a file
//!    upload are distinct wire operations;
//! 3. a relationship change merges into an endpoint's group when that
//!    endpoint is `Created`, its relationship slot is free, and the other
//!    endpoint will already exist remotely by then (not pending, or ordered
//!    earlier). Target endpoint is tried before source. Otherwise it becomes
//!    a standalone group with explicit dependency edges to its endpoints'
//!    pending groups.
//!
//! Output order is exactly insertion order; no sort pass. That order already
//! satisfies "dependencies occur no later than the group itself", including
//! for relationship cycles among newly created objects: the cycle is broken
//! by leaving the earliest object's first relationship unassigned and synced
//! as a trailing standalone group once all participants exist.

use std::collections::HashMap;

use tracing::debug;

use crate::change::{ChangeStatus, Changes, InstanceKey, RelationshipChange};

use super::group::{ChangeGraph, ChangeGroup, GroupId};

/// Build the ordered change dependency graph for one sync run.
///
/// Deterministic, pure and total: re-running on an unchanged [`Changes`]
/// value yields an identical ordered list.
#[must_use]
pub fn build(changes: &Changes) -> ChangeGraph {
    let mut graph = ChangeGraph::default();
    // Object groups indexed by instance key, for merge lookups
    let mut by_key: HashMap<InstanceKey, GroupId> = HashMap::new();

    let mut objects: Vec<_> = changes
        .objects
        .iter()
        .filter(|c| c.status != ChangeStatus::NoChange)
        .collect();
    objects.sort_by_key(|c| c.sequence);

    for change in objects {
        let mut group = ChangeGroup::new();
        group.object = Some(change.clone());
        let id = graph.push(group);
        by_key.insert(change.key.clone(), id);
    }

    let mut files: Vec<_> = changes
        .files
        .iter()
        .filter(|c| c.change.status != ChangeStatus::NoChange)
        .collect();
    files.sort_by_key(|c| c.change.sequence);

    for file in files {
        let merged = by_key.get(file.key()).copied().and_then(|id| {
            (graph.get(id).object_status() == ChangeStatus::Created).then_some(id)
        });
        match merged {
            Some(id) => {
                graph.get_mut(id).file = Some((*file).clone());
            }
            None => {
                let mut group = ChangeGroup::new();
                group.file = Some((*file).clone());
                graph.push(group);
            }
        }
    }

    let mut relationships: Vec<_> = changes
        .relationships
        .iter()
        .filter(|c| c.change.status != ChangeStatus::NoChange)
        .collect();
    relationships.sort_by_key(|c| c.change.sequence);

    for relationship in relationships {
        // Only creations can ride in a creation request. Target endpoint
        // first, then source; this tie-break is contract.
        if relationship.change.status == ChangeStatus::Created
            && (try_merge(&mut graph, &by_key, relationship, Endpoint::Target)
                || try_merge(&mut graph, &by_key, relationship, Endpoint::Source))
        {
            continue;
        }

        let mut group = ChangeGroup::new();
        group.relationship = Some(relationship.clone());
        let id = graph.push(group);
        for endpoint in [&relationship.source, &relationship.target] {
            if let Some(&dep) = by_key.get(endpoint) {
                graph.get_mut(id).add_dependency(dep);
            }
        }
    }

    debug!(
        groups = graph.len(),
        changes = changes.len(),
        "change dependency graph built"
    );
    graph
}

#[derive(Clone, Copy)]
enum Endpoint {
    Target,
    Source,
}

/// Merge `relationship` into the group of the given endpoint, if legal.
///
/// Legal iff the endpoint has a pending `Created` object group whose
/// relationship slot is still free, and the other endpoint is either not
/// pending or its group precedes the candidate in the output order.
fn try_merge(
    graph: &mut ChangeGraph,
    by_key: &HashMap<InstanceKey, GroupId>,
    relationship: &RelationshipChange,
    endpoint: Endpoint,
) -> bool {
    let (candidate_key, other_key) = match endpoint {
        Endpoint::Target => (&relationship.target, &relationship.source),
        Endpoint::Source => (&relationship.source, &relationship.target),
    };

    let Some(&candidate) = by_key.get(candidate_key) else {
        return false;
    };
    if graph.get(candidate).object_status() != ChangeStatus::Created
        || graph.get(candidate).relationship.is_some()
    {
        return false;
    }

    let other = by_key.get(other_key).copied();
    if let Some(other_group) = other {
        // The other endpoint must already exist remotely when the candidate
        // group syncs.
        if other_group >= candidate {
            return false;
        }
    }

    graph.get_mut(candidate).relationship = Some(relationship.clone());
    if let Some(other_group) = other {
        // Backward edge so a failed endpoint also fails this relationship
        graph.get_mut(candidate).add_dependency(other_group);
    }
    true
}
