//! # Property stores
//!
//! A [`PropertyStore`] is a named `key → i64` bag shared between the game
//! modules that write gameplay telemetry and the achievements that observe it.
//!
//! - Every read-modify-write runs under the store's own mutex, so concurrent
//!   `increment` calls from the UI thread and game threads never lose updates.
//! - Listeners are notified synchronously after the lock has been released.
//!   A listener may therefore write to the same store from inside its callback.
//! - A listener that returns an error or panics is logged and skipped; the
//!   remaining listeners still receive the event.
//! - [`PropertyStore::silent`] returns a guard that buffers changed keys and
//!   emits exactly one [`ChangeEvent`] when the outermost guard is dropped.
//!
//! The compacted string form is implemented alongside, in `compact.rs`.

mod compact;

pub use compact::DataCorruptError;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use log::{error, trace};

use crate::errors::EngineError;
use crate::logutil::escape_log;
use crate::metrics;

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Lock a mutex, recovering the data if a panicking holder poisoned it.
pub(crate) fn lock_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Process-unique identity of a store, used by listeners to filter events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreId(u64);

/// Handle returned by [`PropertyStore::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Write policy for [`PropertyStore::put_value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePolicy {
    /// Overwrite unconditionally.
    Always,
    /// Overwrite only if the new value differs from the stored one by at
    /// least the given delta. Used to throttle noisy telemetry.
    Threshold(i64),
}

impl UpdatePolicy {
    fn accepts(self, old: Option<i64>, new: i64) -> bool {
        match (self, old) {
            (_, None) | (UpdatePolicy::Always, _) => true,
            (UpdatePolicy::Threshold(delta), Some(old)) => {
                new.abs_diff(old) >= delta.unsigned_abs()
            }
        }
    }
}

/// Kind of change carried by a [`ChangeEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Update,
    /// Emitted once when a game instance is closed.
    Close,
}

/// Notification delivered to every listener of a store.
///
/// Delivery is at-least-once per logical change; listeners must tolerate
/// seeing the same key twice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub store_id: StoreId,
    pub store_name: Arc<str>,
    pub changed_keys: BTreeSet<String>,
    pub kind: ChangeKind,
}

impl ChangeEvent {
    pub fn is_from(&self, store: &PropertyStore) -> bool {
        self.store_id == store.id()
    }

    pub fn touches(&self, key: &str) -> bool {
        self.changed_keys.contains(key)
    }

    /// Any changed key starts with `prefix`.
    pub fn touches_prefix(&self, prefix: &str) -> bool {
        self.changed_keys.iter().any(|k| k.starts_with(prefix))
    }

    pub fn is_close(&self) -> bool {
        self.kind == ChangeKind::Close
    }
}

/// Observer of store changes.
pub trait StoreListener: Send + Sync {
    fn on_data_event(&self, event: &ChangeEvent) -> Result<(), EngineError>;
}

#[derive(Debug)]
struct StoreInner {
    values: BTreeMap<String, i64>,
    silent_depth: u32,
    silent_kind: ChangeKind,
    buffered: BTreeSet<String>,
}

impl StoreInner {
    /// Record a changed key. Returns `true` when the caller must notify now.
    fn note_change(&mut self, key: &str) -> bool {
        if self.silent_depth > 0 {
            self.buffered.insert(key.to_string());
            false
        } else {
            true
        }
    }
}

pub struct PropertyStore {
    id: StoreId,
    name: Arc<str>,
    inner: Mutex<StoreInner>,
    listeners: Mutex<Vec<(ListenerId, Weak<dyn StoreListener>)>>,
}

impl fmt::Debug for PropertyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyStore")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("len", &self.len())
            .finish()
    }
}

impl PropertyStore {
    pub fn new(name: &str) -> Self {
        Self::with_values(name, BTreeMap::new())
    }

    pub(crate) fn with_values(name: &str, values: BTreeMap<String, i64>) -> Self {
        Self {
            id: StoreId(NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed)),
            name: Arc::from(name),
            inner: Mutex::new(StoreInner {
                values,
                silent_depth: 0,
                silent_kind: ChangeKind::Update,
                buffered: BTreeSet::new(),
            }),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> StoreId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        lock_recover(&self.inner).values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key(&self, key: &str) -> bool {
        lock_recover(&self.inner).values.contains_key(key)
    }

    pub fn get_value(&self, key: &str, default: i64) -> i64 {
        lock_recover(&self.inner)
            .values
            .get(key)
            .copied()
            .unwrap_or(default)
    }

    /// Copy of every key/value pair, in ascending key order.
    pub fn snapshot(&self) -> BTreeMap<String, i64> {
        lock_recover(&self.inner).values.clone()
    }

    /// Store `value` under `key` if `policy` allows it and return the value
    /// actually stored afterwards.
    pub fn put_value(&self, key: &str, value: i64, policy: UpdatePolicy) -> i64 {
        let (stored, notify) = {
            let mut inner = lock_recover(&self.inner);
            let old = inner.values.get(key).copied();
            if !policy.accepts(old, value) || old == Some(value) {
                return old.unwrap_or(value);
            }
            inner.values.insert(key.to_string(), value);
            (value, inner.note_change(key))
        };
        if notify {
            self.dispatch(self.event_for([key.to_string()], ChangeKind::Update));
        }
        stored
    }

    /// Add `delta` to the value under `key` (or `default` when absent) and
    /// return the new value.
    pub fn increment(&self, key: &str, delta: i64, default: i64) -> i64 {
        let (updated, notify) = {
            let mut inner = lock_recover(&self.inner);
            let current = inner.values.get(key).copied().unwrap_or(default);
            let updated = current.saturating_add(delta);
            let existed = inner.values.insert(key.to_string(), updated).is_some();
            if existed && delta == 0 {
                return updated;
            }
            (updated, inner.note_change(key))
        };
        if notify {
            self.dispatch(self.event_for([key.to_string()], ChangeKind::Update));
        }
        updated
    }

    /// Batch variant of [`put_value`](Self::put_value): one event covers all
    /// accepted writes.
    pub fn put_values(&self, entries: &[(&str, i64, UpdatePolicy)]) {
        let changed = {
            let mut inner = lock_recover(&self.inner);
            let mut changed = BTreeSet::new();
            for (key, value, policy) in entries {
                let old = inner.values.get(*key).copied();
                if policy.accepts(old, *value) && old != Some(*value) {
                    inner.values.insert((*key).to_string(), *value);
                    changed.insert((*key).to_string());
                }
            }
            if inner.silent_depth > 0 {
                inner.buffered.extend(changed);
                return;
            }
            changed
        };
        if !changed.is_empty() {
            self.dispatch(self.event_for(changed, ChangeKind::Update));
        }
    }

    pub fn remove_key(&self, key: &str) -> Option<i64> {
        let (removed, notify) = {
            let mut inner = lock_recover(&self.inner);
            let removed = inner.values.remove(key)?;
            (removed, inner.note_change(key))
        };
        if notify {
            self.dispatch(self.event_for([key.to_string()], ChangeKind::Update));
        }
        Some(removed)
    }

    /// Replace every value without notifying listeners. Used when restoring
    /// persisted content or starting a fresh game session.
    pub(crate) fn replace_values(&self, values: BTreeMap<String, i64>) {
        lock_recover(&self.inner).values = values;
    }

    pub fn add_listener(&self, listener: Weak<dyn StoreListener>) -> ListenerId {
        let id = ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed));
        lock_recover(&self.listeners).push((id, listener));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = lock_recover(&self.listeners);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        let mut listeners = lock_recover(&self.listeners);
        listeners.retain(|(_, l)| l.strong_count() > 0);
        listeners.len()
    }

    /// Buffer changes until the returned guard (and every outer guard) is
    /// dropped, then emit a single event of `kind`.
    pub fn silent(&self, kind: ChangeKind) -> SilentChanges<'_> {
        let mut inner = lock_recover(&self.inner);
        if inner.silent_depth == 0 {
            inner.silent_kind = kind;
        } else if kind == ChangeKind::Close {
            inner.silent_kind = ChangeKind::Close;
        }
        inner.silent_depth += 1;
        SilentChanges { store: self }
    }

    fn end_silent(&self) {
        let event = {
            let mut inner = lock_recover(&self.inner);
            inner.silent_depth = inner.silent_depth.saturating_sub(1);
            if inner.silent_depth > 0 {
                return;
            }
            let kind = inner.silent_kind;
            inner.silent_kind = ChangeKind::Update;
            let keys = std::mem::take(&mut inner.buffered);
            if keys.is_empty() && kind != ChangeKind::Close {
                return;
            }
            self.event_for(keys, kind)
        };
        self.dispatch(event);
    }

    fn event_for(&self, keys: impl IntoIterator<Item = String>, kind: ChangeKind) -> ChangeEvent {
        ChangeEvent {
            store_id: self.id,
            store_name: Arc::clone(&self.name),
            changed_keys: keys.into_iter().collect(),
            kind,
        }
    }

    fn dispatch(&self, event: ChangeEvent) {
        let listeners: Vec<Arc<dyn StoreListener>> = {
            let mut guard = lock_recover(&self.listeners);
            guard.retain(|(_, l)| l.strong_count() > 0);
            guard.iter().filter_map(|(_, l)| l.upgrade()).collect()
        };
        if listeners.is_empty() {
            return;
        }
        metrics::inc_events_dispatched();
        trace!(
            "store[{}]: {:?} {:?} -> {} listener(s)",
            self.name,
            event.kind,
            event.changed_keys,
            listeners.len()
        );
        for listener in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener.on_data_event(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    metrics::inc_listener_failures();
                    error!("store[{}]: listener failed: {}", self.name, escape_log(&e.to_string()));
                }
                Err(_) => {
                    metrics::inc_listener_failures();
                    error!(
                        "store[{}]: listener panicked handling {:?}",
                        self.name, event.changed_keys
                    );
                }
            }
        }
    }
}

/// Guard returned by [`PropertyStore::silent`]. Flushes on drop, including
/// early returns and unwinding.
#[must_use = "changes are flushed when the guard is dropped"]
pub struct SilentChanges<'a> {
    store: &'a PropertyStore,
}

impl Drop for SilentChanges<'_> {
    fn drop(&mut self) {
        self.store.end_silent();
    }
}
