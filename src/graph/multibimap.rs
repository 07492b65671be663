// src/graph/multibimap.rs

//! Insertion-ordered bidirectional multimap.
//!
//! Keys map to ordered value lists; every value belongs to exactly one
//! key. Both directions are O(1). Iteration yields keys in first-insert
//! order, which the planner relies on for deterministic group order.

use std::collections::HashMap;
use std::hash::Hash;

use indexmap::IndexMap;

#[derive(Debug, Clone)]
pub struct MultiBiMap<K, V> {
    forward: IndexMap<K, Vec<V>>,
    reverse: HashMap<V, K>,
}

impl<K, V> MultiBiMap<K, V>
where
    K: Hash + Eq + Clone,
    V: Hash + Eq + Clone,
{
    pub fn new() -> Self {
        MultiBiMap {
            forward: IndexMap::new(),
            reverse: HashMap::new(),
        }
    }

    /// Append `value` to `key`'s list. A value already owned by another
    /// key is rebound (the previous binding is dropped).
    pub fn add(&mut self, key: K, value: V) {
        if let Some(old) = self.reverse.insert(value.clone(), key.clone()) {
            if let Some(list) = self.forward.get_mut(&old) {
                list.retain(|v| v != &value);
            }
        }
        self.forward.entry(key).or_default().push(value);
    }

    pub fn add_all<I: IntoIterator<Item = V>>(&mut self, key: K, values: I) {
        for value in values {
            self.add(key.clone(), value);
        }
    }

    /// Values belonging to `key`, in insertion order.
    pub fn values_of(&self, key: &K) -> &[V] {
        self.forward.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The key owning `value`.
    pub fn key_of(&self, value: &V) -> Option<&K> {
        self.reverse.get(value)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.forward.contains_key(key)
    }

    pub fn contains_value(&self, value: &V) -> bool {
        self.reverse.contains_key(value)
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Position of `key` in insertion order.
    pub fn index_of(&self, key: &K) -> Option<usize> {
        self.forward.get_index_of(key)
    }

    /// Key and values at insertion position `index`.
    pub fn get_index(&self, index: usize) -> Option<(&K, &[V])> {
        self.forward
            .get_index(index)
            .map(|(k, vs)| (k, vs.as_slice()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &[V])> {
        self.forward.iter().map(|(k, vs)| (k, vs.as_slice()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.forward.keys()
    }
}

impl<K, V> Default for MultiBiMap<K, V>
where
    K: Hash + Eq + Clone,
    V: Hash + Eq + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
