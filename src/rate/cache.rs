//! TTL cache for clip metadata
//!
//! Entries carry their insertion instant; a stale entry is evicted by the
//! access that finds it, there is no sweeper task.

use dashmap::DashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};
use tracing::trace;

/// Clip metadata gathered from separate responses
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClipMeta {
    pub name: Option<String>,
    /// Length in beats
    pub length: Option<f64>,
    pub has_content: Option<bool>,
}

pub type ClipCache = TtlCache<(usize, usize), ClipMeta>;

pub struct TtlCache<K: Eq + Hash, V> {
    entries: DashMap<K, (V, Instant)>,
    ttl: Duration,
}

impl<K: Eq + Hash + Clone + std::fmt::Debug, V: Clone + Default> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn insert(&self, key: K, value: V) {
        self.entries.insert(key, (value, Instant::now()));
    }

    /// Fresh value for `key`; a stale entry is removed on the way
    pub fn get(&self, key: &K) -> Option<V> {
        let fresh = {
            let entry = self.entries.get(key)?;
            let (value, inserted) = entry.value();
            let fresh = if inserted.elapsed() <= self.ttl {
                Some(value.clone())
            } else {
                None
            };
            fresh
        };

        if fresh.is_none() {
            let ttl = self.ttl;
            if self
                .entries
                .remove_if(key, |_, (_, inserted)| inserted.elapsed() > ttl)
                .is_some()
            {
                trace!("Evicted stale cache entry {:?}", key);
            }
        }
        fresh
    }

    /// Modify the entry for `key` in place, starting from a default value
    /// when it is missing or stale, and refresh its timestamp
    pub fn update<F>(&self, key: K, f: F)
    where
        F: FnOnce(&mut V),
    {
        let mut entry = self
            .entries
            .entry(key)
            .or_insert_with(|| (V::default(), Instant::now()));
        if entry.1.elapsed() > self.ttl {
            entry.0 = V::default();
        }
        f(&mut entry.0);
        entry.1 = Instant::now();
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, (value, _))| value)
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Entry count, stale ones included until they are accessed
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
