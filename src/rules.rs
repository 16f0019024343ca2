//! Reusable [`AchievementRule`] building blocks.
//!
//! Each rule takes the stores it needs in its constructor and does its own
//! event filtering. Delivery is at-least-once, so counting rules keep an
//! "already counted" marker in the session store and clear it once achieved.

use std::fmt;
use std::sync::Arc;

use crate::achievement::{time_reward, AchievementRule, Progress, TimeRewardScale};
use crate::errors::EngineError;
use crate::registry::GameData;
use crate::scoped::{TypeAggregateData, KEY_SOLVED_LEVEL, LEVEL_NOT_SOLVED};
use crate::store::{ChangeEvent, PropertyStore, UpdatePolicy};

/// Counts solved sessions: one delta per closed session whose solved level
/// is at least `min_level`.
pub struct SolvedCountRule {
    instance: Arc<PropertyStore>,
    marker: String,
    min_level: i64,
}

impl SolvedCountRule {
    pub fn new(data: &GameData, marker: &str) -> Self {
        Self {
            instance: Arc::clone(data.instance.store()),
            marker: marker.to_string(),
            min_level: LEVEL_NOT_SOLVED + 1,
        }
    }

    pub fn min_level(mut self, level: i64) -> Self {
        self.min_level = level.max(LEVEL_NOT_SOLVED + 1);
        self
    }
}

impl AchievementRule for SolvedCountRule {
    fn stores(&self) -> Vec<Arc<PropertyStore>> {
        vec![Arc::clone(&self.instance)]
    }

    fn on_data_event(
        &mut self,
        progress: &mut Progress<'_>,
        event: &ChangeEvent,
    ) -> Result<(), EngineError> {
        if !event.is_from(&self.instance) || !event.is_close() {
            return Ok(());
        }
        if self.instance.get_value(KEY_SOLVED_LEVEL, LEVEL_NOT_SOLVED) < self.min_level {
            return Ok(());
        }
        if self.instance.get_value(&self.marker, 0) != 0 {
            return Ok(());
        }
        self.instance.put_value(&self.marker, 1, UpdatePolicy::Always);
        progress.discover();
        progress.achieve_delta(1);
        Ok(())
    }

    fn on_achieved(&mut self) {
        self.instance.remove_key(&self.marker);
    }
}

/// Tracks `key` of `store`; the achievement value follows the key and the
/// achievement completes once the key reaches the target.
pub struct KeyThresholdRule {
    store: Arc<PropertyStore>,
    key: String,
}

impl KeyThresholdRule {
    pub fn new(store: Arc<PropertyStore>, key: &str) -> Self {
        Self {
            store,
            key: key.to_string(),
        }
    }
}

impl AchievementRule for KeyThresholdRule {
    fn stores(&self) -> Vec<Arc<PropertyStore>> {
        vec![Arc::clone(&self.store)]
    }

    fn on_data_event(
        &mut self,
        progress: &mut Progress<'_>,
        event: &ChangeEvent,
    ) -> Result<(), EngineError> {
        if event.is_from(&self.store) && event.touches(&self.key) {
            progress.raise_value(self.store.get_value(&self.key, 0));
        }
        Ok(())
    }
}

/// Achieves on a solved session; the reward is derived from the best
/// completion time kept in the type aggregate under `best_key`.
pub struct BestTimeRule {
    instance: Arc<PropertyStore>,
    aggregate: TypeAggregateData,
    best_key: String,
    scale: TimeRewardScale,
}

impl BestTimeRule {
    pub fn new(data: &GameData, best_key: &str, scale: TimeRewardScale) -> Self {
        Self {
            instance: Arc::clone(data.instance.store()),
            aggregate: data.aggregate.clone(),
            best_key: best_key.to_string(),
            scale,
        }
    }

    fn best_time(&self) -> Option<i64> {
        let best = self.aggregate.get_value(&self.best_key, 0);
        (best > 0).then_some(best)
    }
}

impl AchievementRule for BestTimeRule {
    fn stores(&self) -> Vec<Arc<PropertyStore>> {
        vec![Arc::clone(&self.instance)]
    }

    fn on_data_event(
        &mut self,
        progress: &mut Progress<'_>,
        event: &ChangeEvent,
    ) -> Result<(), EngineError> {
        if event.is_from(&self.instance)
            && event.is_close()
            && self.instance.get_value(KEY_SOLVED_LEVEL, LEVEL_NOT_SOLVED) > LEVEL_NOT_SOLVED
        {
            progress.achieve_after_dependency_check();
        }
        Ok(())
    }

    fn reward(&self, base: u32) -> u32 {
        self.best_time()
            .map_or(base, |best| time_reward(best, &self.scale))
    }

    fn reward_description(&self, base: u32) -> String {
        match self.best_time() {
            Some(best) => format!("{} points (best {} ms)", self.reward(base), best),
            None => format!("up to {} points", self.scale.perfect),
        }
    }
}

/// "Do it `required` times within a cumulative `limit`": completes when the
/// time keeper `key` is full and its total duration is at most `limit`.
pub struct TimeKeeperRule {
    data: Arc<GameData>,
    key: String,
    prefix: String,
    limit: i64,
}

impl TimeKeeperRule {
    pub fn new(data: Arc<GameData>, key: &str, required: u32, limit: i64) -> Self {
        data.timers.ensure_time_keeper(key, required);
        Self {
            prefix: format!("{key}."),
            key: key.to_string(),
            data,
            limit,
        }
    }
}

impl AchievementRule for TimeKeeperRule {
    fn stores(&self) -> Vec<Arc<PropertyStore>> {
        vec![Arc::clone(self.data.timers.store())]
    }

    fn on_data_event(
        &mut self,
        progress: &mut Progress<'_>,
        event: &ChangeEvent,
    ) -> Result<(), EngineError> {
        if !event.is_from(self.data.timers.store()) || !event.touches_prefix(&self.prefix) {
            return Ok(());
        }
        let Some(keeper) = self.data.timers.get_time_keeper(&self.key) else {
            return Ok(());
        };
        if keeper.sample_count > 0 {
            progress.discover();
        }
        if keeper.is_full() && keeper.total_duration <= self.limit {
            progress.achieve_after_dependency_check();
        }
        Ok(())
    }
}

/// Completes when the chain trigger `key` of `store` becomes non-zero.
pub struct TriggerKeyRule {
    store: Arc<PropertyStore>,
    key: String,
}

impl TriggerKeyRule {
    pub fn new(store: Arc<PropertyStore>, key: &str) -> Self {
        Self {
            store,
            key: key.to_string(),
        }
    }
}

impl AchievementRule for TriggerKeyRule {
    fn stores(&self) -> Vec<Arc<PropertyStore>> {
        vec![Arc::clone(&self.store)]
    }

    fn on_data_event(
        &mut self,
        progress: &mut Progress<'_>,
        event: &ChangeEvent,
    ) -> Result<(), EngineError> {
        if event.is_from(&self.store) && self.store.get_value(&self.key, 0) != 0 {
            progress.achieve_after_dependency_check();
        }
        Ok(())
    }
}

type EventFn = dyn FnMut(&mut Progress<'_>, &ChangeEvent) -> Result<(), EngineError> + Send;

/// Wraps an arbitrary closure.
pub struct ClosureRule {
    stores: Vec<Arc<PropertyStore>>,
    handler: Box<EventFn>,
}

impl ClosureRule {
    pub fn new<F>(stores: Vec<Arc<PropertyStore>>, handler: F) -> Self
    where
        F: FnMut(&mut Progress<'_>, &ChangeEvent) -> Result<(), EngineError> + Send + 'static,
    {
        Self {
            stores,
            handler: Box::new(handler),
        }
    }
}

impl fmt::Debug for ClosureRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClosureRule")
            .field("stores", &self.stores.len())
            .finish()
    }
}

impl AchievementRule for ClosureRule {
    fn stores(&self) -> Vec<Arc<PropertyStore>> {
        self.stores.clone()
    }

    fn on_data_event(
        &mut self,
        progress: &mut Progress<'_>,
        event: &ChangeEvent,
    ) -> Result<(), EngineError> {
        (self.handler)(progress, event)
    }
}
