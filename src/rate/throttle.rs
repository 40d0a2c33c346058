//! Per-key throttle with trailing coalescing
//!
//! The first value offered for a key passes straight through and opens a
//! window. Values offered inside the window overwrite each other; the last
//! one is released by `drain_due` once the window closes, which also opens
//! the next window. One emission per window per key, nothing lost. A
//! trailing value equal to the last emitted one is not emitted again.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;

struct Slot<V> {
    window_end: Instant,
    interval: Duration,
    pending: Option<V>,
    last: V,
}

pub struct Throttle<K, V> {
    slots: HashMap<K, Slot<V>>,
}

impl<K, V> Default for Throttle<K, V> {
    fn default() -> Self {
        Self {
            slots: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone, V: Clone + PartialEq> Throttle<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a value; returns it when it may be emitted right away
    pub fn offer(&mut self, key: K, value: V, interval: Duration, now: Instant) -> Option<V> {
        match self.slots.get_mut(&key) {
            Some(slot) if now < slot.window_end => {
                slot.pending = Some(value);
                None
            }
            _ => {
                self.slots.insert(
                    key,
                    Slot {
                        window_end: now + interval,
                        interval,
                        pending: None,
                        last: value.clone(),
                    },
                );
                Some(value)
            }
        }
    }

    /// Release coalesced values whose window has closed
    pub fn drain_due(&mut self, now: Instant) -> Vec<V> {
        let mut due = Vec::new();

        self.slots.retain(|_, slot| {
            if now < slot.window_end {
                return true;
            }
            match slot.pending.take() {
                Some(value) if value != slot.last => {
                    slot.last = value.clone();
                    due.push(value);
                    slot.window_end = now + slot.interval;
                    true
                }
                // Idle window expired, or nothing new to say
                _ => false,
            }
        });

        due
    }

    /// Earliest instant at which `drain_due` will release something
    pub fn next_deadline(&self) -> Option<Instant> {
        self.slots
            .values()
            .filter(|slot| slot.pending.is_some())
            .map(|slot| slot.window_end)
            .min()
    }

    pub fn pending(&self) -> usize {
        self.slots.values().filter(|s| s.pending.is_some()).count()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }
}
