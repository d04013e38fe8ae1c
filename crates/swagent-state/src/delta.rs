//! Structural diff between two versions of a keyed collection.
//!
//! The diff is a single ordered merge over both maps, so it costs time
//! proportional to their combined size. Maps that are the same snapshot and
//! nodes that are the same allocation are skipped without comparing fields;
//! any other pair of nodes counts as changed when they compare unequal.
//!
//! Iteration follows key order, so repeated diffs of the same inputs emit
//! records in the same sequence.
//!
//! # Example
//!
//! ```
//! use std::ops::ControlFlow;
//! use swagent_state::{MapDelta, NodeMap, Mirror};
//!
//! let old: NodeMap<Mirror> = NodeMap::new();
//! let mut new = old.clone();
//! new.insert(Mirror::new("span0"));
//!
//! let mut added = Vec::new();
//! let _ = MapDelta::new(&old, &new).for_each_added(|mirror| {
//!     added.push(mirror.name.clone());
//!     ControlFlow::Continue(())
//! });
//! assert_eq!(added, vec!["span0".to_string()]);
//! ```

use itertools::{EitherOrBoth, Itertools};
use std::ops::ControlFlow;
use std::sync::Arc;

use crate::node_map::{Node, NodeMap};

/// One record of a collection diff.
#[derive(Debug)]
pub enum DeltaValue<'a, V> {
    Added(&'a Arc<V>),
    Removed(&'a Arc<V>),
    Changed(&'a Arc<V>, &'a Arc<V>),
}

impl<'a, V> DeltaValue<'a, V> {
    /// The node as it was before, if any.
    pub fn old(&self) -> Option<&'a Arc<V>> {
        match *self {
            DeltaValue::Added(_) => None,
            DeltaValue::Removed(old) | DeltaValue::Changed(old, _) => Some(old),
        }
    }

    /// The node as it is after, if any.
    pub fn new(&self) -> Option<&'a Arc<V>> {
        match *self {
            DeltaValue::Removed(_) => None,
            DeltaValue::Added(new) | DeltaValue::Changed(_, new) => Some(new),
        }
    }
}

impl<V> Clone for DeltaValue<'_, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V> Copy for DeltaValue<'_, V> {}

/// Parents whose embedded child collections are diffed recursively.
pub trait CoarseIdentity {
    /// True when an identity-relevant field differs, in which case the
    /// parent is reported as one coarse change and its children are not
    /// diffed.
    fn coarse_differs(&self, other: &Self) -> bool;
}

/// One record of a nested diff.
#[derive(Debug)]
pub enum NestedDelta<'a, P> {
    Added(&'a Arc<P>),
    Removed(&'a Arc<P>),
    /// Coarse fields differ; the parent is replaced as a whole.
    Coarse { old: &'a Arc<P>, new: &'a Arc<P> },
    /// Coarse fields match; the caller diffs the children.
    Children { old: &'a Arc<P>, new: &'a Arc<P> },
}

/// Lazy diff of two versions of one collection.
pub struct MapDelta<'a, V: Node> {
    old: Option<&'a NodeMap<V>>,
    new: Option<&'a NodeMap<V>>,
}

impl<'a, V: Node> MapDelta<'a, V> {
    pub fn new(old: &'a NodeMap<V>, new: &'a NodeMap<V>) -> Self {
        Self {
            old: Some(old),
            new: Some(new),
        }
    }

    /// Diff where a missing side counts as an empty collection.
    ///
    /// Used for child tables of a parent that was added or removed.
    pub fn between(old: Option<&'a NodeMap<V>>, new: Option<&'a NodeMap<V>>) -> Self {
        Self { old, new }
    }

    /// Merge walk in key order.
    pub fn iter(&self) -> impl Iterator<Item = DeltaValue<'a, V>> + 'a {
        let same_snapshot = match (self.old, self.new) {
            (Some(old), Some(new)) => old.ptr_eq(new),
            (None, None) => true,
            _ => false,
        };
        let old_iter = self
            .old
            .filter(|_| !same_snapshot)
            .into_iter()
            .flat_map(|map| map.iter());
        let new_iter = self
            .new
            .filter(|_| !same_snapshot)
            .into_iter()
            .flat_map(|map| map.iter());

        old_iter
            .merge_join_by(new_iter, |(old_key, _), (new_key, _)| old_key.cmp(new_key))
            .filter_map(|pair| match pair {
                EitherOrBoth::Left((_, old)) => Some(DeltaValue::Removed(old)),
                EitherOrBoth::Right((_, new)) => Some(DeltaValue::Added(new)),
                EitherOrBoth::Both((_, old), (_, new)) => {
                    if Arc::ptr_eq(old, new) || old == new {
                        None
                    } else {
                        Some(DeltaValue::Changed(old, new))
                    }
                }
            })
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    pub fn for_each_changed<F>(&self, mut changed: F) -> ControlFlow<()>
    where
        F: FnMut(&'a Arc<V>, &'a Arc<V>) -> ControlFlow<()>,
    {
        for value in self.iter() {
            if let DeltaValue::Changed(old, new) = value {
                changed(old, new)?;
            }
        }
        ControlFlow::Continue(())
    }

    pub fn for_each_added<F>(&self, mut added: F) -> ControlFlow<()>
    where
        F: FnMut(&'a Arc<V>) -> ControlFlow<()>,
    {
        for value in self.iter() {
            if let DeltaValue::Added(new) = value {
                added(new)?;
            }
        }
        ControlFlow::Continue(())
    }

    pub fn for_each_removed<F>(&self, mut removed: F) -> ControlFlow<()>
    where
        F: FnMut(&'a Arc<V>) -> ControlFlow<()>,
    {
        for value in self.iter() {
            if let DeltaValue::Removed(old) = value {
                removed(old)?;
            }
        }
        ControlFlow::Continue(())
    }

    /// Walks every record with a handler per kind, in one pass.
    pub fn for_each_delta<C, A, R>(&self, mut changed: C, mut added: A, mut removed: R) -> ControlFlow<()>
    where
        C: FnMut(&'a Arc<V>, &'a Arc<V>) -> ControlFlow<()>,
        A: FnMut(&'a Arc<V>) -> ControlFlow<()>,
        R: FnMut(&'a Arc<V>) -> ControlFlow<()>,
    {
        for value in self.iter() {
            match value {
                DeltaValue::Changed(old, new) => changed(old, new)?,
                DeltaValue::Added(new) => added(new)?,
                DeltaValue::Removed(old) => removed(old)?,
            }
        }
        ControlFlow::Continue(())
    }

    /// Walks every record with only add and remove handlers; a changed node
    /// is reported as the removal of the old node followed by the addition
    /// of the new one.
    pub fn for_each_added_removed<A, R>(&self, mut added: A, mut removed: R) -> ControlFlow<()>
    where
        A: FnMut(&'a Arc<V>) -> ControlFlow<()>,
        R: FnMut(&'a Arc<V>) -> ControlFlow<()>,
    {
        for value in self.iter() {
            match value {
                DeltaValue::Changed(old, new) => {
                    removed(old)?;
                    added(new)?;
                }
                DeltaValue::Added(new) => added(new)?,
                DeltaValue::Removed(old) => removed(old)?,
            }
        }
        ControlFlow::Continue(())
    }
}

impl<'a, V: Node + CoarseIdentity> MapDelta<'a, V> {
    /// Like [`MapDelta::iter`], but classifies changed parents by whether
    /// their coarse identity moved.
    pub fn nested_iter(&self) -> impl Iterator<Item = NestedDelta<'a, V>> + 'a {
        self.iter().map(|value| match value {
            DeltaValue::Added(new) => NestedDelta::Added(new),
            DeltaValue::Removed(old) => NestedDelta::Removed(old),
            DeltaValue::Changed(old, new) if old.coarse_differs(new) => {
                NestedDelta::Coarse { old, new }
            }
            DeltaValue::Changed(old, new) => NestedDelta::Children { old, new },
        })
    }
}
