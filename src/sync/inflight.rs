//! Echo suppression and write reconciliation bookkeeping
//!
//! `InFlight` marks entities whose remote update is being applied right now;
//! outbound intents for those keys are echoes of our own publish and must not
//! be transmitted. `PendingWrites` remembers local writes until the remote
//! confirms them, overrides them or the confirm timeout passes.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::session::EntityKey;

/// Inbound values closer than this to the pending value count as a match
const VALUE_EPSILON: f64 = 1e-4;

#[derive(Default)]
pub struct InFlight {
    keys: Mutex<HashMap<EntityKey, usize>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `key` in flight until the returned guard is dropped
    pub fn enter(&self, key: EntityKey) -> InFlightGuard<'_> {
        *self.keys.lock().entry(key).or_insert(0) += 1;
        InFlightGuard { set: self, key }
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        self.keys.lock().contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.keys.lock().is_empty()
    }
}

pub struct InFlightGuard<'a> {
    set: &'a InFlight,
    key: EntityKey,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut keys = self.set.keys.lock();
        if let Some(count) = keys.get_mut(&self.key) {
            *count -= 1;
            if *count == 0 {
                keys.remove(&self.key);
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingWrite {
    value: f64,
    written_at: Instant,
}

/// What to do with an inbound value for a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Apply it; `reconciled` is true when it confirmed a local write
    Apply { reconciled: bool },
    /// Differs from a fresh local write: an older remote state, ignore
    Stale,
}

#[derive(Default)]
pub struct PendingWrites {
    writes: Mutex<HashMap<EntityKey, PendingWrite>>,
}

impl PendingWrites {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a local write; a newer write replaces an older one
    pub fn begin(&self, key: EntityKey, value: f64, now: Instant) {
        self.writes.lock().insert(
            key,
            PendingWrite {
                value,
                written_at: now,
            },
        );
    }

    /// Decide on an inbound value and settle the pending write if any
    pub fn check_inbound(&self, key: EntityKey, value: f64, now: Instant, grace: Duration) -> Verdict {
        let mut writes = self.writes.lock();
        let Some(pending) = writes.get(&key).copied() else {
            return Verdict::Apply { reconciled: false };
        };

        if (pending.value - value).abs() < VALUE_EPSILON {
            writes.remove(&key);
            return Verdict::Apply { reconciled: true };
        }

        if now.saturating_duration_since(pending.written_at) < grace {
            return Verdict::Stale;
        }

        // Remote wins after the grace window
        writes.remove(&key);
        Verdict::Apply { reconciled: false }
    }

    /// Remove and return writes older than `timeout`
    pub fn take_expired(&self, now: Instant, timeout: Duration) -> Vec<(EntityKey, f64)> {
        let mut expired = Vec::new();
        self.writes.lock().retain(|key, pending| {
            if now.saturating_duration_since(pending.written_at) >= timeout {
                expired.push((*key, pending.value));
                false
            } else {
                true
            }
        });
        expired
    }

    /// Forget a write that never made it onto the wire
    pub fn cancel(&self, key: &EntityKey) {
        self.writes.lock().remove(key);
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        self.writes.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.writes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.writes.lock().clear();
    }
}
