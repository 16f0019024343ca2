//! Domain-flavoured wrappers around [`PropertyStore`].
//!
//! - [`GameInstanceData`]: one play session of a game type, `OPEN → CLOSED`.
//! - [`TypeAggregateData`]: shared by every session of one game type.
//! - [`MiscData`]: global, shared by every game.
//! - [`TimerData`]: named time keepers collecting duration samples.
//!
//! All of them deref to the wrapped store so games call `increment` and
//! `put_value` directly.

pub mod game_instance;
pub mod timer;

pub use game_instance::{GameInstanceData, KEY_CLOSED, KEY_SOLVED_LEVEL, LEVEL_NOT_SOLVED};
pub use timer::{TimeKeeper, TimerData};

use std::ops::Deref;
use std::sync::Arc;

use crate::store::PropertyStore;

/// Store name of the global [`MiscData`].
pub const MISC_STORE_NAME: &str = "misc";

pub fn aggregate_store_name(game_type: &str) -> String {
    format!("{game_type}.aggregate")
}

/// Properties aggregated over every session of one game type
/// (best times, lifetime counters).
#[derive(Debug, Clone)]
pub struct TypeAggregateData {
    game_type: String,
    store: Arc<PropertyStore>,
}

impl TypeAggregateData {
    pub fn new(game_type: &str) -> Self {
        Self {
            game_type: game_type.to_string(),
            store: Arc::new(PropertyStore::new(&aggregate_store_name(game_type))),
        }
    }

    pub fn game_type(&self) -> &str {
        &self.game_type
    }

    pub fn store(&self) -> &Arc<PropertyStore> {
        &self.store
    }

    /// Keep the smaller of the stored value and `candidate`. Returns `true`
    /// when `candidate` became the new best.
    pub fn record_minimum(&self, key: &str, candidate: i64) -> bool {
        let current = self.store.get_value(key, i64::MAX);
        if candidate < current {
            self.store.put_value(key, candidate, crate::store::UpdatePolicy::Always);
            true
        } else {
            false
        }
    }
}

impl Deref for TypeAggregateData {
    type Target = PropertyStore;

    fn deref(&self) -> &PropertyStore {
        &self.store
    }
}

/// Global properties that belong to no single game (reward totals,
/// cross-game chain triggers).
#[derive(Debug, Clone)]
pub struct MiscData {
    store: Arc<PropertyStore>,
}

impl MiscData {
    pub fn new() -> Self {
        Self {
            store: Arc::new(PropertyStore::new(MISC_STORE_NAME)),
        }
    }

    pub fn store(&self) -> &Arc<PropertyStore> {
        &self.store
    }
}

impl Default for MiscData {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for MiscData {
    type Target = PropertyStore;

    fn deref(&self) -> &PropertyStore {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_keeps_minimum() {
        let agg = TypeAggregateData::new("tinyhack");
        assert_eq!(agg.name(), "tinyhack.aggregate");
        assert!(agg.record_minimum("best_ms", 9_000));
        assert!(!agg.record_minimum("best_ms", 12_000));
        assert!(agg.record_minimum("best_ms", 4_500));
        assert_eq!(agg.get_value("best_ms", 0), 4_500);
    }
}
