//! Ordered registry map that never creates entries implicitly.
//!
//! Topology registries are looked up far more often than they are grown,
//! and a lookup for an unknown switch or link must surface as "not found"
//! rather than quietly materialising a default entity. `SyncMap` makes
//! every entry-creating call explicit:
//! - `get()` returns `Option<&V>`
//! - `get_mut()` returns `Option<&mut V>`
//! - `update()` applies a closure to an existing entry only
//! - `get_or_insert_with()` is the one call that creates
//!
//! Iteration is ordered by key so persisted snapshots and scans are stable.

use std::collections::BTreeMap;
use thiserror::Error;

/// Error type for SyncMap operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncMapError {
    #[error("Key not found")]
    KeyNotFound,

    #[error("Key already present")]
    KeyExists,
}

/// An ordered map wrapper that never auto-creates entries.
///
/// # Example
///
/// ```
/// use topo_common::SyncMap;
///
/// let mut map: SyncMap<String, i32> = SyncMap::new();
///
/// // get() returns None for missing keys (doesn't create entry)
/// assert!(map.get(&"missing".to_string()).is_none());
///
/// // Must explicitly insert
/// map.insert("key".to_string(), 42);
/// assert_eq!(map.get(&"key".to_string()), Some(&42));
/// ```
#[derive(Debug, Clone)]
pub struct SyncMap<K, V> {
    inner: BTreeMap<K, V>,
}

impl<K, V> SyncMap<K, V>
where
    K: Ord,
{
    /// Creates a new empty map.
    pub fn new() -> Self {
        Self {
            inner: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }

    /// Returns a reference to the value for the given key.
    ///
    /// **This never creates entries.**
    pub fn get(&self, key: &K) -> Option<&V> {
        self.inner.get(key)
    }

    /// Returns a mutable reference to the value for the given key.
    ///
    /// **This never creates entries.**
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.inner.get_mut(key)
    }

    /// Applies `f` to an existing entry and returns its result.
    ///
    /// Fails with [`SyncMapError::KeyNotFound`] for a missing key; the map
    /// is left untouched in that case.
    pub fn update<R, F>(&mut self, key: &K, f: F) -> Result<R, SyncMapError>
    where
        F: FnOnce(&mut V) -> R,
    {
        self.inner
            .get_mut(key)
            .map(f)
            .ok_or(SyncMapError::KeyNotFound)
    }

    /// Inserts a key-value pair into the map.
    ///
    /// Returns the old value if the key was already present.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.inner.insert(key, value)
    }

    /// Inserts a new entry, refusing to overwrite an existing one.
    pub fn insert_new(&mut self, key: K, value: V) -> Result<&mut V, SyncMapError> {
        match self.inner.entry(key) {
            std::collections::btree_map::Entry::Occupied(_) => Err(SyncMapError::KeyExists),
            std::collections::btree_map::Entry::Vacant(slot) => Ok(slot.insert(value)),
        }
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.inner.remove(key)
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    /// Returns an iterator over key-value pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.inner.iter()
    }

    /// Returns a mutable iterator over key-value pairs in key order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&K, &mut V)> {
        self.inner.iter_mut()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.inner.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.inner.values()
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.inner.values_mut()
    }

    /// Gets the value for a key, or inserts one built by `f`.
    ///
    /// Unlike `get()`, this method **will** create an entry if the key
    /// is not present. The returned flag is true when it did.
    pub fn get_or_insert_with<F>(&mut self, key: K, f: F) -> (&mut V, bool)
    where
        F: FnOnce() -> V,
    {
        match self.inner.entry(key) {
            std::collections::btree_map::Entry::Occupied(slot) => (slot.into_mut(), false),
            std::collections::btree_map::Entry::Vacant(slot) => (slot.insert(f()), true),
        }
    }
}

impl<K, V> Default for SyncMap<K, V>
where
    K: Ord,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> FromIterator<(K, V)> for SyncMap<K, V>
where
    K: Ord,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Entity {
        enabled: bool,
    }

    #[test]
    fn test_basic_operations() {
        let mut map: SyncMap<String, i32> = SyncMap::new();

        assert!(map.is_empty());
        assert!(map.get(&"key".to_string()).is_none());

        map.insert("key".to_string(), 42);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&"key".to_string()), Some(&42));

        map.remove(&"key".to_string());
        assert!(map.is_empty());
    }

    #[test]
    fn test_get_never_creates() {
        let mut map: SyncMap<String, i32> = SyncMap::new();

        assert!(map.get(&"missing".to_string()).is_none());
        assert!(map.get_mut(&"missing".to_string()).is_none());
        assert!(map.is_empty());
    }

    #[test]
    fn test_update_requires_existing_key() {
        let mut map: SyncMap<String, Entity> = SyncMap::new();

        let missing = map.update(&"sw1".to_string(), |e| e.enabled = true);
        assert_eq!(missing, Err(SyncMapError::KeyNotFound));
        assert!(map.is_empty());

        map.insert("sw1".to_string(), Entity { enabled: false });
        let changed = map
            .update(&"sw1".to_string(), |e| {
                let was = e.enabled;
                e.enabled = true;
                was != e.enabled
            })
            .unwrap();
        assert!(changed);
        assert_eq!(map.get(&"sw1".to_string()), Some(&Entity { enabled: true }));
    }

    #[test]
    fn test_insert_new_refuses_overwrite() {
        let mut map: SyncMap<String, i32> = SyncMap::new();
        map.insert_new("key".to_string(), 1).unwrap();
        assert_eq!(
            map.insert_new("key".to_string(), 2),
            Err(SyncMapError::KeyExists)
        );
        assert_eq!(map.get(&"key".to_string()), Some(&1));
    }

    #[test]
    fn test_get_or_insert_with() {
        let mut map: SyncMap<String, i32> = SyncMap::new();

        let (value, created) = map.get_or_insert_with("key".to_string(), || 42);
        assert_eq!(*value, 42);
        assert!(created);

        let (value, created) = map.get_or_insert_with("key".to_string(), || 100);
        assert_eq!(*value, 42);
        assert!(!created);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_iteration_is_key_ordered() {
        let map: SyncMap<String, i32> = [("b", 2), ("a", 1), ("c", 3)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let keys: Vec<&String> = map.keys().collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }
}
