use std::ops::Deref;
use std::sync::{Arc, Mutex};

use log::debug;

use crate::store::{lock_recover, ChangeKind, PropertyStore, UpdatePolicy};

pub fn timer_store_name(game_type: &str) -> String {
    format!("{game_type}.timers")
}

/// Read-only view of one time keeper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeKeeper {
    pub required_count: u32,
    pub sample_count: u32,
    pub total_duration: i64,
}

impl TimeKeeper {
    /// All `required_count` slots hold a sample.
    pub fn is_full(&self) -> bool {
        self.sample_count >= self.required_count
    }
}

/// Named time keepers stored in one property store.
///
/// A keeper keeps the last `required_count` duration samples in a ring; once
/// full, a new sample evicts the oldest one. Samples of `0` record that
/// something happened without a duration.
///
/// Layout per keeper `k`: `k.required`, `k.count`, `k.next`, `k.total` and
/// one slot `k.<i>` per sample.
#[derive(Debug)]
pub struct TimerData {
    store: Arc<PropertyStore>,
    // Keeper updates touch several keys and must not interleave.
    update: Mutex<()>,
}

fn slot_key(key: &str, suffix: &str) -> String {
    format!("{key}.{suffix}")
}

struct KeeperKeys {
    required: String,
    count: String,
    next: String,
    total: String,
}

impl KeeperKeys {
    fn new(key: &str) -> Self {
        Self {
            required: slot_key(key, "required"),
            count: slot_key(key, "count"),
            next: slot_key(key, "next"),
            total: slot_key(key, "total"),
        }
    }
}

impl TimerData {
    pub fn new(game_type: &str) -> Self {
        Self {
            store: Arc::new(PropertyStore::new(&timer_store_name(game_type))),
            update: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<PropertyStore> {
        &self.store
    }

    /// Create the keeper if needed. An existing keeper with a different
    /// `required_count` is reset.
    pub fn ensure_time_keeper(&self, key: &str, required_count: u32) {
        let required_count = required_count.max(1);
        let _update = lock_recover(&self.update);
        let existing = self.store.get_value(&KeeperKeys::new(key).required, 0);
        if existing == i64::from(required_count) {
            return;
        }
        if existing != 0 {
            debug!(
                "timers[{}]: resizing keeper {} from {} to {}",
                self.store.name(),
                key,
                existing,
                required_count
            );
            self.clear_keeper(key, existing);
        }
        let keys = KeeperKeys::new(key);
        self.store.put_values(&[
            (keys.required.as_str(), i64::from(required_count), UpdatePolicy::Always),
            (keys.count.as_str(), 0, UpdatePolicy::Always),
            (keys.next.as_str(), 0, UpdatePolicy::Always),
            (keys.total.as_str(), 0, UpdatePolicy::Always),
        ]);
    }

    /// Append a sample. Returns the updated keeper, or `None` when the keeper
    /// was never ensured.
    pub fn on_time_keeper_update(&self, key: &str, duration: i64) -> Option<TimeKeeper> {
        let _update = lock_recover(&self.update);
        let keys = KeeperKeys::new(key);
        let required = self.store.get_value(&keys.required, 0);
        if required <= 0 {
            debug!("timers[{}]: sample for unknown keeper {}", self.store.name(), key);
            return None;
        }
        let count = self.store.get_value(&keys.count, 0);
        let next = self.store.get_value(&keys.next, 0);
        let slot = slot_key(key, &next.to_string());
        let evicted = if count >= required {
            self.store.get_value(&slot, 0)
        } else {
            0
        };
        let total = self
            .store
            .get_value(&keys.total, 0)
            .saturating_sub(evicted)
            .saturating_add(duration);

        let _batch = self.store.silent(ChangeKind::Update);
        self.store.put_values(&[
            (slot.as_str(), duration, UpdatePolicy::Always),
            (keys.next.as_str(), (next + 1) % required, UpdatePolicy::Always),
            (keys.count.as_str(), (count + 1).min(required), UpdatePolicy::Always),
            (keys.total.as_str(), total, UpdatePolicy::Always),
        ]);
        Some(TimeKeeper {
            required_count: required as u32,
            sample_count: (count + 1).min(required) as u32,
            total_duration: total,
        })
    }

    pub fn remove_time_keeper(&self, key: &str) {
        let _update = lock_recover(&self.update);
        let required = self.store.get_value(&KeeperKeys::new(key).required, 0);
        if required > 0 {
            self.clear_keeper(key, required);
        }
    }

    pub fn get_time_keeper(&self, key: &str) -> Option<TimeKeeper> {
        let snapshot = self.store.snapshot();
        let read = |suffix: &str| snapshot.get(&slot_key(key, suffix)).copied();
        let required = read("required").filter(|r| *r > 0)?;
        Some(TimeKeeper {
            required_count: required as u32,
            sample_count: read("count").unwrap_or(0) as u32,
            total_duration: read("total").unwrap_or(0),
        })
    }

    fn clear_keeper(&self, key: &str, required: i64) {
        let _batch = self.store.silent(ChangeKind::Update);
        for suffix in ["required", "count", "next", "total"] {
            self.store.remove_key(&slot_key(key, suffix));
        }
        for i in 0..required {
            self.store.remove_key(&slot_key(key, &i.to_string()));
        }
    }
}

impl Deref for TimerData {
    type Target = PropertyStore;

    fn deref(&self) -> &PropertyStore {
        &self.store
    }
}
