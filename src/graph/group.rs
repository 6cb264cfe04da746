// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Change groups and the arena that owns them.

use std::collections::HashSet;

use crate::change::{ChangeStatus, FileChange, InstanceKey, ObjectChange, RelationshipChange};

/// Index of a [`ChangeGroup`] in its [`ChangeGraph`] arena.
///
/// Ids are assigned in creation order, so `a < b` means group `a` was
/// appended before group `b` and syncs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupId(pub(crate) usize);

impl GroupId {
    /// Position of the group in the ordered output list.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The minimal unit of synchronization.
///
/// Holds at most one object change, one relationship change and one file
/// change (empty slots mean `NoChange`), a `synced` flag, and dependency
/// edges to earlier groups. Groups are created by [`super::build`] and owned
/// by the [`ChangeGraph`] arena for the lifetime of one sync run; edges are
/// arena indices, never shared-ownership handles.
#[derive(Debug, Clone)]
pub struct ChangeGroup {
    pub(crate) object: Option<ObjectChange>,
    pub(crate) relationship: Option<RelationshipChange>,
    pub(crate) file: Option<FileChange>,
    pub(crate) synced: bool,
    pub(crate) dependencies: Vec<GroupId>,
}

impl ChangeGroup {
    pub(crate) fn new() -> Self {
        Self {
            object: None,
            relationship: None,
            file: None,
            synced: false,
            dependencies: Vec::new(),
        }
    }

    #[must_use]
    pub fn object(&self) -> Option<&ObjectChange> {
        self.object.as_ref()
    }

    #[must_use]
    pub fn relationship(&self) -> Option<&RelationshipChange> {
        self.relationship.as_ref()
    }

    #[must_use]
    pub fn file(&self) -> Option<&FileChange> {
        self.file.as_ref()
    }

    #[must_use]
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Status of the object slot (`NoChange` when empty).
    #[must_use]
    pub fn object_status(&self) -> ChangeStatus {
        self.object.as_ref().map_or(ChangeStatus::NoChange, |c| c.status)
    }

    /// Status of the relationship slot (`NoChange` when empty).
    #[must_use]
    pub fn relationship_status(&self) -> ChangeStatus {
        self.relationship
            .as_ref()
            .map_or(ChangeStatus::NoChange, |c| c.change.status)
    }

    /// True if `key` is the object, relationship or file instance held by
    /// this group. Used to evict a failed instance's downstream effects from
    /// an in-flight batch.
    #[must_use]
    pub fn contains(&self, key: &InstanceKey) -> bool {
        self.object.as_ref().is_some_and(|c| &c.key == key)
            || self.relationship.as_ref().is_some_and(|c| c.key() == key)
            || self.file.as_ref().is_some_and(|c| c.key() == key)
    }

    /// True if this group has a dependency edge to `other`.
    #[must_use]
    pub fn does_depend_on(&self, other: GroupId) -> bool {
        self.dependencies.contains(&other)
    }

    pub(crate) fn add_dependency(&mut self, other: GroupId) {
        if !self.dependencies.contains(&other) {
            self.dependencies.push(other);
        }
    }

    /// Dependency edges of this group, in insertion order.
    #[must_use]
    pub fn dependencies(&self) -> &[GroupId] {
        &self.dependencies
    }

    /// Instance keys of the changes held by this group, deduplicated.
    ///
    /// These are the instances the synchronizer locks while the group is
    /// pending.
    #[must_use]
    pub fn instance_keys(&self) -> Vec<InstanceKey> {
        let mut keys = Vec::with_capacity(3);
        if let Some(ref c) = self.object {
            keys.push(c.key.clone());
        }
        if let Some(ref c) = self.relationship {
            if !keys.contains(c.key()) {
                keys.push(c.key().clone());
            }
        }
        if let Some(ref c) = self.file {
            if !keys.contains(c.key()) {
                keys.push(c.key().clone());
            }
        }
        keys
    }
}

/// Arena of [`ChangeGroup`]s for one sync run, in sync order.
///
/// The builder creates all groups up front; the synchronizer only reads
/// them, marks them synced, and rewrites keys after remote creation.
#[derive(Debug, Clone, Default)]
pub struct ChangeGraph {
    pub(crate) groups: Vec<ChangeGroup>,
}

impl ChangeGraph {
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: GroupId) -> &ChangeGroup {
        &self.groups[id.0]
    }

    pub(crate) fn get_mut(&mut self, id: GroupId) -> &mut ChangeGroup {
        &mut self.groups[id.0]
    }

    /// Groups in sync order, with their ids.
    pub fn iter(&self) -> impl Iterator<Item = (GroupId, &ChangeGroup)> {
        self.groups.iter().enumerate().map(|(i, g)| (GroupId(i), g))
    }

    pub(crate) fn push(&mut self, group: ChangeGroup) -> GroupId {
        self.groups.push(group);
        GroupId(self.groups.len() - 1)
    }

    pub(crate) fn mark_synced(&mut self, id: GroupId) {
        self.groups[id.0].synced = true;
    }

    /// True if every dependency of `id` has synced.
    #[must_use]
    pub fn are_all_dependencies_synced(&self, id: GroupId) -> bool {
        self.groups[id.0]
            .dependencies
            .iter()
            .all(|dep| self.groups[dep.0].synced)
    }

    /// True if every not-yet-synced dependency of `id` is a member of `set`.
    ///
    /// Used to validate that a proposed batch is internally self-consistent:
    /// a group may join a changeset only if its unsynced dependencies ride in
    /// the same request.
    #[must_use]
    pub fn are_all_unsynced_dependencies_in_set(&self, id: GroupId, set: &HashSet<GroupId>) -> bool {
        self.groups[id.0]
            .dependencies
            .iter()
            .all(|dep| self.groups[dep.0].synced || set.contains(dep))
    }

    /// Rewrite `old` to `new` wherever it appears in a not-yet-synced group:
    /// as an object key, a relationship's own key or endpoint, or a file key.
    ///
    /// Called after the server assigns a remote identity; later groups
    /// reference endpoints by the key that existed when the graph was built,
    /// so this is mandatory for correctness, not an optimization.
    pub(crate) fn rewrite_key(&mut self, old: &InstanceKey, new: &InstanceKey) {
        for group in self.groups.iter_mut().filter(|g| !g.synced) {
            if let Some(ref mut c) = group.object {
                if &c.key == old {
                    c.key = new.clone();
                }
            }
            if let Some(ref mut c) = group.relationship {
                if &c.change.key == old {
                    c.change.key = new.clone();
                }
                if &c.source == old {
                    c.source = new.clone();
                }
                if &c.target == old {
                    c.target = new.clone();
                }
            }
            if let Some(ref mut c) = group.file {
                if &c.change.key == old {
                    c.change.key = new.clone();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::ChangeStatus;

    fn object_group(class: &str, id: &str, status: ChangeStatus) -> ChangeGroup {
        let mut group = ChangeGroup::new();
        group.object = Some(ObjectChange::new(InstanceKey::new(class, id), status, 0));
        group
    }

    #[test]
    fn test_contains_checks_all_slots() {
        let mut group = object_group("Document", "d1", ChangeStatus::Created);
        group.relationship = Some(RelationshipChange::new(
            ObjectChange::new(InstanceKey::new("Link", "r1"), ChangeStatus::Created, 1),
            InstanceKey::new("Folder", "f1"),
            InstanceKey::new("Document", "d1"),
        ));
        group.file = Some(FileChange::new(ObjectChange::new(
            InstanceKey::new("Document", "d1"),
            ChangeStatus::Created,
            2,
        )));

        assert!(group.contains(&InstanceKey::new("Document", "d1")));
        assert!(group.contains(&InstanceKey::new("Link", "r1")));
        // Endpoints are references, not held instances
        assert!(!group.contains(&InstanceKey::new("Folder", "f1")));
    }

    #[test]
    fn test_dependency_edges() {
        let mut graph = ChangeGraph::default();
        let a = graph.push(object_group("Document", "a", ChangeStatus::Created));
        let b = graph.push(object_group("Document", "b", ChangeStatus::Created));
        graph.get_mut(b).add_dependency(a);
        graph.get_mut(b).add_dependency(a); // idempotent

        assert!(graph.get(b).does_depend_on(a));
        assert!(!graph.get(a).does_depend_on(b));
        assert_eq!(graph.get(b).dependencies().len(), 1);
    }

    #[test]
    fn test_all_dependencies_synced() {
        let mut graph = ChangeGraph::default();
        let a = graph.push(object_group("Document", "a", ChangeStatus::Created));
        let b = graph.push(object_group("Document", "b", ChangeStatus::Created));
        graph.get_mut(b).add_dependency(a);

        assert!(!graph.are_all_dependencies_synced(b));
        graph.mark_synced(a);
        assert!(graph.are_all_dependencies_synced(b));
    }

    #[test]
    fn test_unsynced_dependencies_in_set() {
        let mut graph = ChangeGraph::default();
        let a = graph.push(object_group("Document", "a", ChangeStatus::Created));
        let b = graph.push(object_group("Document", "b", ChangeStatus::Created));
        graph.get_mut(b).add_dependency(a);

        let mut set = HashSet::new();
        assert!(!graph.are_all_unsynced_dependencies_in_set(b, &set));
        set.insert(a);
        assert!(graph.are_all_unsynced_dependencies_in_set(b, &set));

        // A synced dependency no longer needs to ride in the set
        graph.mark_synced(a);
        assert!(graph.are_all_unsynced_dependencies_in_set(b, &HashSet::new()));
    }

    #[test]
    fn test_rewrite_key_skips_synced_groups() {
        let old = InstanceKey::new("Document", "local-1");
        let new = InstanceKey::new("Document", "srv-1");

        let mut graph = ChangeGraph::default();
        let a = graph.push(object_group("Document", "local-1", ChangeStatus::Created));
        let mut dependent = ChangeGroup::new();
        dependent.relationship = Some(RelationshipChange::new(
            ObjectChange::new(InstanceKey::new("Link", "r1"), ChangeStatus::Created, 1),
            old.clone(),
            InstanceKey::new("Folder", "f1"),
        ));
        let b = graph.push(dependent);

        graph.mark_synced(a);
        graph.rewrite_key(&old, &new);

        // The synced group keeps its original key
        assert_eq!(graph.get(a).object().unwrap().key, old);
        // The pending relationship endpoint observes the rewrite
        assert_eq!(graph.get(b).relationship().unwrap().source, new);
    }
}
