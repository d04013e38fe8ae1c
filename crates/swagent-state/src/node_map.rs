//! Persistent keyed collection used at every level of the state tree.
//!
//! A [`NodeMap`] is an immutable snapshot: cloning it is a reference-count
//! bump, and mutating a clone copies only the ordered map spine while the
//! untouched nodes stay shared with every other version that holds them.
//! A node is never edited in place once it is reachable from more than one
//! map; [`NodeMap::modify`] replaces it with an edited copy.
//!
//! Like `SyncMap`-style maps elsewhere, nothing here auto-creates entries:
//! lookups return `Option` and modifications of missing keys report `false`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// An entity stored in a [`NodeMap`].
pub trait Node: Clone + PartialEq + fmt::Debug {
    type Key: Ord + Clone + fmt::Debug;

    /// Stable key of this node inside its collection.
    fn key(&self) -> Self::Key;
}

/// Copy-on-write ordered map from a node's key to the shared node.
pub struct NodeMap<V: Node> {
    inner: Arc<BTreeMap<V::Key, Arc<V>>>,
}

impl<V: Node> NodeMap<V> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BTreeMap::new()),
        }
    }

    pub fn get(&self, key: &V::Key) -> Option<&Arc<V>> {
        self.inner.get(key)
    }

    pub fn contains_key(&self, key: &V::Key) -> bool {
        self.inner.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Iterates in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&V::Key, &Arc<V>)> {
        self.inner.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &V::Key> {
        self.inner.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &Arc<V>> {
        self.inner.values()
    }

    /// Inserts `node` under its own key, returning the node it replaced.
    pub fn insert(&mut self, node: V) -> Option<Arc<V>> {
        self.insert_node(Arc::new(node))
    }

    /// Inserts an already shared node.
    pub fn insert_node(&mut self, node: Arc<V>) -> Option<Arc<V>> {
        Arc::make_mut(&mut self.inner).insert(node.key(), node)
    }

    pub fn remove(&mut self, key: &V::Key) -> Option<Arc<V>> {
        if !self.inner.contains_key(key) {
            return None;
        }
        Arc::make_mut(&mut self.inner).remove(key)
    }

    /// Replaces the node at `key` with an edited copy.
    ///
    /// The edit must not change the node's key. Returns `false` if there is
    /// no node at `key`.
    pub fn modify<F>(&mut self, key: &V::Key, edit: F) -> bool
    where
        F: FnOnce(&mut V),
    {
        let Some(current) = self.inner.get(key) else {
            return false;
        };
        let mut node = V::clone(current);
        edit(&mut node);
        debug_assert!(node.key() == *key, "node key changed during modify");
        Arc::make_mut(&mut self.inner).insert(key.clone(), Arc::new(node));
        true
    }

    /// Returns true if both maps are the same snapshot.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<V: Node> Clone for NodeMap<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: Node> Default for NodeMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Node> PartialEq for NodeMap<V> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.inner == other.inner
    }
}

impl<V: Node> fmt::Debug for NodeMap<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.inner.iter()).finish()
    }
}

impl<V: Node> FromIterator<V> for NodeMap<V> {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        let map = iter
            .into_iter()
            .map(|node| (node.key(), Arc::new(node)))
            .collect();
        Self {
            inner: Arc::new(map),
        }
    }
}

// Serialized as a plain sequence of nodes; keys are recomputed on load.
impl<V: Node + Serialize> Serialize for NodeMap<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.inner.values().map(|node| node.as_ref()))
    }
}

impl<'de, V: Node + Deserialize<'de>> Deserialize<'de> for NodeMap<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Vec::<V>::deserialize(deserializer)?.into_iter().collect())
    }
}
