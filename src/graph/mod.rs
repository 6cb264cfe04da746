// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Change dependency graph.
//!
//! [`build`] turns the unordered [`crate::Changes`] bag into an ordered
//! arena of [`ChangeGroup`]s — the minimal sync units the synchronizer
//! walks. Group order already satisfies every dependency edge: a group's
//! dependencies occur no later than the group itself.
//!
//! The builder is pure and synchronous; it never performs I/O and never
//! fails. Illegal inputs produce degenerate but valid groupings.

mod builder;
mod group;

pub use builder::build;
pub use group::{ChangeGraph, ChangeGroup, GroupId};
