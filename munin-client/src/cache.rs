//! # Session Cache
//!
//! Purpose: Remember replies that cannot change during a session (version,
//! service lists, configs) so they cost one round-trip at most.
//!
//! Entries never expire; the cache lives and dies with its client. Values are
//! cloned out on every hit, so store cheap handles (`Arc`) rather than
//! owned records.

use hashbrown::HashMap;

/// String-keyed memo table.
#[derive(Debug)]
pub struct Cache<V> {
    entries: HashMap<String, V>,
}

impl<V> Default for Cache<V> {
    fn default() -> Self {
        Cache {
            entries: HashMap::new(),
        }
    }
}

impl<V: Clone> Cache<V> {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored value for `key`, or runs `compute` once and stores
    /// its result. A failed `compute` stores nothing.
    pub fn fetch_or_compute<E, F>(&mut self, key: &str, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        if let Some(value) = self.entries.get(key) {
            return Ok(value.clone());
        }
        let value = compute()?;
        self.entries.insert(key.to_string(), value.clone());
        Ok(value)
    }

    /// Stored value for `key`, without computing anything.
    pub fn get(&self, key: &str) -> Option<V> {
        self.entries.get(key).cloned()
    }

    /// True when `key` has been stored.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
