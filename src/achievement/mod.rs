//! # Achievements
//!
//! An [`Achievement`] is a small state machine driven by change events of
//! the stores its rule subscribes to:
//!
//! ```text
//! NotDiscovered --discover--> Discovered
//! {NotDiscovered, Discovered} --achieve--> AchievedUnclaimed
//! AchievedUnclaimed --claim_reward--> AchievedClaimed
//! ```
//!
//! The per-achievement behaviour lives in an [`AchievementRule`]. The rule
//! filters each [`ChangeEvent`] and moves progress through the
//! [`Progress`] primitives. When the achievement is achieved it drops its
//! store subscriptions and, if its definition names a chain trigger, writes
//! that key so a dependent achievement can react.
//!
//! Daily achievements additionally carry a [`DailyStatus`]; a day rollover
//! resets their value (and a claimed state back to `Discovered`) unless the
//! reward is still waiting to be claimed.
//!
//! ## Re-entrancy
//!
//! A rule may write to stores while it handles an event, which can dispatch
//! straight back into the same achievement. Events are queued and drained by
//! whichever caller holds the achievement lock, so no handler ever recurses
//! into itself.

pub mod progress;
pub mod reward;

pub use progress::Progress;
pub use reward::{time_reward, TimeRewardScale};

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, TryLockError, Weak};

use log::{debug, error, info};
use serde::{Deserialize, Serialize};

use crate::dependency::Dependency;
use crate::errors::EngineError;
use crate::metrics;
use crate::store::{lock_recover, ChangeEvent, ListenerId, PropertyStore, StoreListener, UpdatePolicy};

/// Reward used when a definition does not set one.
pub const DEFAULT_REWARD: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AchievementState {
    NotDiscovered,
    Discovered,
    AchievedUnclaimed,
    AchievedClaimed,
}

impl AchievementState {
    pub fn is_achieved(self) -> bool {
        matches!(
            self,
            AchievementState::AchievedUnclaimed | AchievementState::AchievedClaimed
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            AchievementState::NotDiscovered => "hidden",
            AchievementState::Discovered => "open",
            AchievementState::AchievedUnclaimed => "claimable",
            AchievementState::AchievedClaimed => "claimed",
        }
    }

    fn code(self) -> u8 {
        match self {
            AchievementState::NotDiscovered => 0,
            AchievementState::Discovered => 1,
            AchievementState::AchievedUnclaimed => 2,
            AchievementState::AchievedClaimed => 3,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(AchievementState::NotDiscovered),
            1 => Some(AchievementState::Discovered),
            2 => Some(AchievementState::AchievedUnclaimed),
            3 => Some(AchievementState::AchievedClaimed),
            _ => None,
        }
    }
}

/// Lock-free copy of an achievement's state, shared with dependencies.
#[derive(Debug)]
pub struct StatusCell(AtomicU8);

impl StatusCell {
    pub fn new(state: AchievementState) -> Self {
        Self(AtomicU8::new(state.code()))
    }

    pub fn get(&self) -> AchievementState {
        AchievementState::from_code(self.0.load(Ordering::Acquire))
            .unwrap_or(AchievementState::NotDiscovered)
    }

    pub(crate) fn set(&self, state: AchievementState) {
        self.0.store(state.code(), Ordering::Release);
    }
}

/// Key written (value `1`) into `store` when the achievement is achieved.
#[derive(Debug, Clone)]
pub struct ChainTrigger {
    pub store: Arc<PropertyStore>,
    pub key: String,
}

/// Static description of one achievement.
#[derive(Debug, Clone)]
pub struct AchievementDefinition {
    pub id: u32,
    pub level: u32,
    pub reward: u32,
    pub target: i64,
    pub discovered: bool,
    pub daily: bool,
    pub description: String,
    pub trigger: Option<ChainTrigger>,
}

impl AchievementDefinition {
    pub fn new(id: u32, target: i64) -> Self {
        Self {
            id,
            level: 1,
            reward: DEFAULT_REWARD,
            target: target.max(1),
            discovered: false,
            daily: false,
            description: String::new(),
            trigger: None,
        }
    }

    pub fn level(mut self, level: u32) -> Self {
        self.level = level;
        self
    }

    pub fn reward(mut self, reward: u32) -> Self {
        self.reward = reward;
        self
    }

    pub fn discovered(mut self) -> Self {
        self.discovered = true;
        self
    }

    pub fn daily(mut self) -> Self {
        self.daily = true;
        self
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn triggers(mut self, store: Arc<PropertyStore>, key: &str) -> Self {
        self.trigger = Some(ChainTrigger {
            store,
            key: key.to_string(),
        });
        self
    }
}

/// Behaviour of one concrete achievement.
pub trait AchievementRule: Send {
    /// Stores the achievement listens to between `init` and achieving.
    fn stores(&self) -> Vec<Arc<PropertyStore>>;

    /// Filter `event` and move `progress`. Called only while not achieved.
    fn on_data_event(
        &mut self,
        progress: &mut Progress<'_>,
        event: &ChangeEvent,
    ) -> Result<(), EngineError>;

    /// Runs once right after achieving, before the chain trigger is written.
    /// Clear "already counted" marker keys here.
    fn on_achieved(&mut self) {}

    fn reward(&self, base: u32) -> u32 {
        base
    }

    fn reward_description(&self, base: u32) -> String {
        format!("{} points", self.reward(base))
    }
}

/// Rotation bookkeeping of a daily achievement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DailyStatus {
    /// Day number (days since CE) of the last reset.
    pub last_reset_day: Option<i64>,
    pub available_today: bool,
}

pub(crate) struct Tracking {
    state: AchievementState,
    value: i64,
    dependencies: Vec<Arc<dyn Dependency>>,
    daily: Option<DailyStatus>,
}

impl Tracking {
    fn is_available(&self) -> bool {
        self.daily.map_or(true, |d| d.available_today)
    }
}

struct Core {
    tracking: Tracking,
    rule: Box<dyn AchievementRule>,
    initialized: bool,
}

/// Snapshot handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AchievementView {
    pub game_type: String,
    pub id: u32,
    pub level: u32,
    pub state: AchievementState,
    pub value: i64,
    pub target: i64,
    pub reward: u32,
    pub description: String,
    pub reward_description: String,
    pub daily: bool,
}

pub struct Achievement {
    game_type: String,
    definition: AchievementDefinition,
    status: Arc<StatusCell>,
    core: Mutex<Core>,
    pending: Mutex<VecDeque<ChangeEvent>>,
    subscriptions: Mutex<Vec<(Arc<PropertyStore>, ListenerId)>>,
    state_store: Option<Arc<PropertyStore>>,
    me: Weak<Achievement>,
}

impl fmt::Debug for Achievement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Achievement")
            .field("game_type", &self.game_type)
            .field("id", &self.definition.id)
            .field("state", &self.status.get())
            .finish()
    }
}

fn field_key(id: u32, field: &str) -> String {
    format!("{id}.{field}")
}

fn restore_tracking(definition: &AchievementDefinition, store: Option<&PropertyStore>) -> Tracking {
    let initial = if definition.discovered {
        AchievementState::Discovered
    } else {
        AchievementState::NotDiscovered
    };
    let mut tracking = Tracking {
        state: initial,
        value: 0,
        dependencies: Vec::new(),
        daily: definition.daily.then(DailyStatus::default),
    };
    let Some(store) = store else {
        return tracking;
    };
    let id = definition.id;
    let code = store.get_value(&field_key(id, "state"), -1);
    if let Some(state) = u8::try_from(code).ok().and_then(AchievementState::from_code) {
        tracking.state = state.max(initial);
    }
    tracking.value = store
        .get_value(&field_key(id, "value"), 0)
        .clamp(0, definition.target);
    if let Some(daily) = tracking.daily.as_mut() {
        let day_key = field_key(id, "day");
        if store.contains_key(&day_key) {
            daily.last_reset_day = Some(store.get_value(&day_key, 0));
        }
        daily.available_today = store.get_value(&field_key(id, "avail"), 0) != 0;
    }
    tracking
}

impl Achievement {
    /// Build an achievement, restoring persisted progress from `state_store`
    /// when given.
    pub fn new(
        game_type: &str,
        definition: AchievementDefinition,
        rule: Box<dyn AchievementRule>,
        state_store: Option<Arc<PropertyStore>>,
    ) -> Arc<Self> {
        let tracking = restore_tracking(&definition, state_store.as_deref());
        let status = Arc::new(StatusCell::new(tracking.state));
        Arc::new_cyclic(|me| Achievement {
            game_type: game_type.to_string(),
            definition,
            status,
            core: Mutex::new(Core {
                tracking,
                rule,
                initialized: false,
            }),
            pending: Mutex::new(VecDeque::new()),
            subscriptions: Mutex::new(Vec::new()),
            state_store,
            me: me.clone(),
        })
    }

    pub fn id(&self) -> u32 {
        self.definition.id
    }

    pub fn level(&self) -> u32 {
        self.definition.level
    }

    pub fn target(&self) -> i64 {
        self.definition.target
    }

    pub fn game_type(&self) -> &str {
        &self.game_type
    }

    pub fn description(&self) -> &str {
        &self.definition.description
    }

    pub fn is_daily(&self) -> bool {
        self.definition.daily
    }

    pub fn label(&self) -> String {
        format!("{}#{}", self.game_type, self.definition.id)
    }

    pub fn state(&self) -> AchievementState {
        self.status.get()
    }

    pub fn status(&self) -> Arc<StatusCell> {
        Arc::clone(&self.status)
    }

    pub fn value(&self) -> i64 {
        self.with_core(|core| core.tracking.value)
    }

    pub fn daily_status(&self) -> Option<DailyStatus> {
        self.with_core(|core| core.tracking.daily)
    }

    /// Non-daily achievements are always available.
    pub fn is_available(&self) -> bool {
        self.with_core(|core| core.tracking.is_available())
    }

    /// Current reward, computed by the rule from the base reward.
    pub fn reward(&self) -> u32 {
        self.with_core(|core| core.rule.reward(self.definition.reward))
    }

    pub fn reward_description(&self) -> String {
        self.with_core(|core| core.rule.reward_description(self.definition.reward))
    }

    pub fn view(&self) -> AchievementView {
        self.with_core(|core| AchievementView {
            game_type: self.game_type.clone(),
            id: self.definition.id,
            level: self.definition.level,
            state: core.tracking.state,
            value: core.tracking.value,
            target: self.definition.target,
            reward: core.rule.reward(self.definition.reward),
            description: self.definition.description.clone(),
            reward_description: core.rule.reward_description(self.definition.reward),
            daily: self.definition.daily,
        })
    }

    /// Wire a dependency. Only allowed before [`init`](Self::init).
    pub fn add_dependency(&self, dependency: Arc<dyn Dependency>) -> Result<(), EngineError> {
        self.with_core(|core| {
            if core.initialized {
                return Err(EngineError::BootstrapOrder(format!(
                    "dependency {} added to {} after init",
                    dependency.describe(),
                    self.label()
                )));
            }
            debug!("achievement[{}]: depends on {}", self.label(), dependency.describe());
            core.tracking.dependencies.push(dependency);
            Ok(())
        })
    }

    pub fn dependency_count(&self) -> usize {
        self.with_core(|core| core.tracking.dependencies.len())
    }

    /// `(game_type, id)` of every achievement this one depends on.
    pub fn dependency_referents(&self) -> Vec<(String, u32)> {
        self.with_core(|core| {
            core.tracking
                .dependencies
                .iter()
                .filter_map(|d| d.referent())
                .collect()
        })
    }

    pub fn dependencies_fulfilled(&self) -> bool {
        self.with_core(|core| core.tracking.dependencies.iter().all(|d| d.evaluate()))
    }

    /// Subscribe to the rule's stores. Achieved achievements stay silent.
    pub fn init(&self) -> Result<(), EngineError> {
        self.with_core(|core| {
            if core.initialized {
                return Err(EngineError::BootstrapOrder(format!(
                    "{} initialized twice",
                    self.label()
                )));
            }
            core.initialized = true;
            if !core.tracking.state.is_achieved() {
                self.subscribe(core.rule.as_ref());
            }
            Ok(())
        })
    }

    pub fn subscription_count(&self) -> usize {
        lock_recover(&self.subscriptions).len()
    }

    fn subscribe(&self, rule: &dyn AchievementRule) {
        let mut subscriptions = lock_recover(&self.subscriptions);
        if !subscriptions.is_empty() {
            return;
        }
        for store in rule.stores() {
            let listener: Weak<dyn StoreListener> = self.me.clone();
            let id = store.add_listener(listener);
            subscriptions.push((store, id));
        }
    }

    fn unsubscribe(&self) {
        let subscriptions = std::mem::take(&mut *lock_recover(&self.subscriptions));
        for (store, id) in subscriptions {
            store.remove_listener(id);
        }
    }

    /// Run `f` against this achievement's progress, then settle the outcome
    /// (persist, unsubscribe, chain trigger) and drain queued events.
    pub fn with_progress<R>(&self, f: impl FnOnce(&mut Progress<'_>) -> R) -> R {
        self.with_core(|core| {
            let mut progress = Progress::new(self, &mut core.tracking);
            let result = f(&mut progress);
            let (dirty, achieved_now) = progress.finish();
            self.settle(core, dirty, achieved_now);
            result
        })
    }

    /// Every lock of `core` outside event delivery goes through here. Events
    /// queued by other threads while `f` ran are handled once it returns.
    fn with_core<R>(&self, f: impl FnOnce(&mut Core) -> R) -> R {
        let result = {
            let mut core = lock_recover(&self.core);
            f(&mut core)
        };
        if let Err(e) = self.drain_pending() {
            error!("achievement[{}]: queued event failed: {}", self.label(), e);
            metrics::inc_listener_failures();
        }
        result
    }

    pub fn discover(&self) {
        self.with_progress(|p| p.discover());
    }

    pub fn achieve(&self) -> bool {
        self.with_progress(|p| p.achieve())
    }

    pub fn achieve_after_dependency_check(&self) -> bool {
        self.with_progress(|p| p.achieve_after_dependency_check())
    }

    pub fn achieve_delta(&self, delta: i64) -> bool {
        self.with_progress(|p| p.achieve_delta(delta))
    }

    pub fn add_delta_if_not_achieved(&self, delta: i64) -> bool {
        self.with_progress(|p| p.add_delta_if_not_achieved(delta))
    }

    pub fn achieve_progress_percent(&self, percent: u8) -> bool {
        self.with_progress(|p| p.achieve_progress_percent(percent))
    }

    /// Grant the reward. Only succeeds from `AchievedUnclaimed`.
    pub fn claim_reward(&self) -> Result<u32, EngineError> {
        self.with_core(|core| {
            let state = core.tracking.state;
            if state != AchievementState::AchievedUnclaimed {
                return Err(EngineError::NotClaimable {
                    id: self.definition.id,
                    state,
                });
            }
            core.tracking.state = AchievementState::AchievedClaimed;
            self.status.set(AchievementState::AchievedClaimed);
            self.persist(&core.tracking);
            let points = core.rule.reward(self.definition.reward);
            metrics::record_reward_claimed(points);
            info!("achievement[{}]: claimed {} points", self.label(), points);
            Ok(points)
        })
    }

    /// Day rollover for daily achievements. Returns `true` if a reset
    /// happened for `day`.
    pub(crate) fn reset_for_day(&self, day: i64) -> bool {
        self.with_core(|core| {
            let state = core.tracking.state;
            let Some(daily) = core.tracking.daily.as_mut() else {
                return false;
            };
            if daily.last_reset_day == Some(day) {
                return false;
            }
            daily.last_reset_day = Some(day);
            if state != AchievementState::AchievedUnclaimed {
                daily.available_today = false;
                core.tracking.value = 0;
                if state == AchievementState::AchievedClaimed {
                    core.tracking.state = AchievementState::Discovered;
                    self.status.set(AchievementState::Discovered);
                    if core.initialized {
                        self.subscribe(core.rule.as_ref());
                    }
                }
            }
            self.persist(&core.tracking);
            debug!("achievement[{}]: daily reset for day {}", self.label(), day);
            true
        })
    }

    pub(crate) fn set_available(&self, available: bool) {
        self.with_core(|core| {
            let Some(daily) = core.tracking.daily.as_mut() else {
                return;
            };
            daily.available_today = available;
            if available && core.tracking.state == AchievementState::NotDiscovered {
                core.tracking.state = AchievementState::Discovered;
                self.status.set(AchievementState::Discovered);
            }
            self.persist(&core.tracking);
        })
    }

    fn settle(&self, core: &mut Core, dirty: bool, achieved_now: bool) {
        if dirty {
            self.persist(&core.tracking);
        }
        if achieved_now {
            core.rule.on_achieved();
            self.unsubscribe();
            if let Some(trigger) = &self.definition.trigger {
                debug!("achievement[{}]: writing chain trigger {}", self.label(), trigger.key);
                trigger.store.put_value(&trigger.key, 1, UpdatePolicy::Always);
            }
        }
    }

    fn persist(&self, tracking: &Tracking) {
        let Some(store) = &self.state_store else {
            return;
        };
        let id = self.definition.id;
        let state_key = field_key(id, "state");
        let value_key = field_key(id, "value");
        let mut entries = vec![
            (state_key.as_str(), i64::from(tracking.state.code()), UpdatePolicy::Always),
            (value_key.as_str(), tracking.value, UpdatePolicy::Always),
        ];
        let day_key = field_key(id, "day");
        let avail_key = field_key(id, "avail");
        if let Some(daily) = tracking.daily {
            if let Some(day) = daily.last_reset_day {
                entries.push((day_key.as_str(), day, UpdatePolicy::Always));
            }
            entries.push((avail_key.as_str(), i64::from(daily.available_today), UpdatePolicy::Always));
        }
        store.put_values(&entries);
    }

    fn handle_event(&self, core: &mut Core, event: &ChangeEvent) -> Result<(), EngineError> {
        if core.tracking.state.is_achieved() || !core.tracking.is_available() {
            return Ok(());
        }
        let Core { tracking, rule, .. } = &mut *core;
        let mut progress = Progress::new(self, tracking);
        let result = if progress.retry_completion() {
            Ok(())
        } else {
            rule.on_data_event(&mut progress, event)
        };
        let (dirty, achieved_now) = progress.finish();
        self.settle(core, dirty, achieved_now);
        result
    }

    fn drain_pending(&self) -> Result<(), EngineError> {
        let mut first_error = None;
        loop {
            let mut core = match self.core.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                // The holder of the lock drains what we queued.
                Err(TryLockError::WouldBlock) => break,
            };
            loop {
                let next = lock_recover(&self.pending).pop_front();
                let Some(event) = next else {
                    break;
                };
                if let Err(e) = self.handle_event(&mut core, &event) {
                    first_error.get_or_insert(e);
                }
            }
            drop(core);
            if lock_recover(&self.pending).is_empty() {
                break;
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl StoreListener for Achievement {
    fn on_data_event(&self, event: &ChangeEvent) -> Result<(), EngineError> {
        lock_recover(&self.pending).push_back(event.clone());
        self.drain_pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::{DependencyFactory, FeatureFlags};
    use std::collections::BTreeMap;

    /// Counts one step per change of `key`.
    struct StepRule {
        store: Arc<PropertyStore>,
        key: &'static str,
    }

    impl AchievementRule for StepRule {
        fn stores(&self) -> Vec<Arc<PropertyStore>> {
            vec![Arc::clone(&self.store)]
        }

        fn on_data_event(
            &mut self,
            progress: &mut Progress<'_>,
            event: &ChangeEvent,
        ) -> Result<(), EngineError> {
            if event.is_from(&self.store) && event.touches(self.key) {
                progress.achieve_delta(1);
            }
            Ok(())
        }
    }

    fn step_achievement(target: i64) -> (Arc<Achievement>, Arc<PropertyStore>) {
        let store = Arc::new(PropertyStore::new("steps"));
        let rule = StepRule {
            store: Arc::clone(&store),
            key: "step",
        };
        let achievement = Achievement::new(
            "steps",
            AchievementDefinition::new(1, target).discovered(),
            Box::new(rule),
            None,
        );
        achievement.init().unwrap();
        (achievement, store)
    }

    fn purchase_gate(flags: &Arc<FeatureFlags>) -> Arc<dyn Dependency> {
        let oracle: Arc<dyn crate::dependency::FeatureOracle> = flags.clone();
        DependencyFactory::new(BTreeMap::new(), oracle)
            .require_purchased("gate")
            .unwrap()
    }

    #[test]
    fn five_events_achieve_on_the_fifth() {
        let (achievement, store) = step_achievement(5);
        for i in 1..=4 {
            store.increment("step", 1, 0);
            assert_eq!(achievement.state(), AchievementState::Discovered, "after {i}");
        }
        store.increment("step", 1, 0);
        assert_eq!(achievement.state(), AchievementState::AchievedUnclaimed);
        assert_eq!(achievement.value(), 5);
        assert_eq!(achievement.subscription_count(), 0);
        assert_eq!(store.listener_count(), 0);

        assert_eq!(achievement.claim_reward().unwrap(), DEFAULT_REWARD);
        assert_eq!(achievement.state(), AchievementState::AchievedClaimed);
    }

    #[test]
    fn deltas_after_achieving_are_no_ops() {
        let (achievement, _) = step_achievement(2);
        assert!(!achievement.achieve_delta(1));
        assert!(achievement.achieve_delta(5));
        assert!(!achievement.achieve_delta(1));
        assert_eq!(achievement.value(), 2);
        assert_eq!(achievement.state(), AchievementState::AchievedUnclaimed);
    }

    #[test]
    fn claim_only_from_unclaimed() {
        let (achievement, _) = step_achievement(3);
        assert!(matches!(
            achievement.claim_reward(),
            Err(EngineError::NotClaimable { state: AchievementState::Discovered, .. })
        ));
        achievement.achieve();
        assert!(achievement.claim_reward().is_ok());
        assert!(matches!(
            achievement.claim_reward(),
            Err(EngineError::NotClaimable { state: AchievementState::AchievedClaimed, .. })
        ));
    }

    #[test]
    fn dependency_check_drops_signal_but_plain_achieve_bypasses() {
        let flags = Arc::new(FeatureFlags::new());
        let store = Arc::new(PropertyStore::new("gated"));
        let make = || {
            let a = Achievement::new(
                "gated",
                AchievementDefinition::new(7, 1),
                Box::new(StepRule {
                    store: Arc::clone(&store),
                    key: "step",
                }),
                None,
            );
            a.add_dependency(purchase_gate(&flags)).unwrap();
            a.init().unwrap();
            a
        };

        let checked = make();
        assert!(!checked.achieve_after_dependency_check());
        assert_eq!(checked.state(), AchievementState::NotDiscovered);

        let bypassing = make();
        assert!(bypassing.achieve());
        assert_eq!(bypassing.state(), AchievementState::AchievedUnclaimed);
    }

    #[test]
    fn kept_delta_completes_once_dependencies_hold() {
        let flags = Arc::new(FeatureFlags::new());
        let (achievement, store) = {
            let store = Arc::new(PropertyStore::new("kept"));
            let a = Achievement::new(
                "kept",
                AchievementDefinition::new(1, 3),
                Box::new(StepRule {
                    store: Arc::clone(&store),
                    key: "unrelated",
                }),
                None,
            );
            a.add_dependency(purchase_gate(&flags)).unwrap();
            a.init().unwrap();
            (a, store)
        };

        assert!(!achievement.add_delta_if_not_achieved(5));
        assert_eq!(achievement.value(), 3);
        assert!(!achievement.achieve_delta(1));
        assert_eq!(achievement.state(), AchievementState::NotDiscovered);

        flags.purchase("gate");
        store.increment("anything", 1, 0);
        assert_eq!(achievement.state(), AchievementState::AchievedUnclaimed);
    }

    #[test]
    fn progress_percent_is_monotonic() {
        let (achievement, _) = step_achievement(200);
        achievement.achieve_progress_percent(40);
        assert_eq!(achievement.value(), 80);
        achievement.achieve_progress_percent(10);
        assert_eq!(achievement.value(), 80);
        achievement.achieve_progress_percent(100);
        assert_eq!(achievement.state(), AchievementState::AchievedUnclaimed);
    }

    #[test]
    fn dependencies_after_init_are_rejected() {
        let (achievement, _) = step_achievement(1);
        let flags = Arc::new(FeatureFlags::new());
        assert!(matches!(
            achievement.add_dependency(purchase_gate(&flags)),
            Err(EngineError::BootstrapOrder(_))
        ));
        assert!(matches!(achievement.init(), Err(EngineError::BootstrapOrder(_))));
    }

    #[test]
    fn event_delivered_while_a_reader_holds_the_core_is_not_lost() {
        let (achievement, store) = step_achievement(1);
        let value_during_read = achievement.with_core(|core| {
            let writer = Arc::clone(&store);
            std::thread::spawn(move || {
                writer.increment("step", 1, 0);
            })
            .join()
            .unwrap();
            core.tracking.value
        });
        assert_eq!(value_during_read, 0);
        assert_eq!(achievement.state(), AchievementState::AchievedUnclaimed);
        assert_eq!(achievement.value(), 1);
    }

    /// Fails on every event it sees.
    struct BrokenRule {
        store: Arc<PropertyStore>,
    }

    impl AchievementRule for BrokenRule {
        fn stores(&self) -> Vec<Arc<PropertyStore>> {
            vec![Arc::clone(&self.store)]
        }

        fn on_data_event(&mut self, _: &mut Progress<'_>, _: &ChangeEvent) -> Result<(), EngineError> {
            Err(EngineError::Listener("broken rule".to_string()))
        }
    }

    #[test]
    fn queued_event_failures_are_counted() {
        let store = Arc::new(PropertyStore::new("broken"));
        let achievement = Achievement::new(
            "broken",
            AchievementDefinition::new(1, 1),
            Box::new(BrokenRule {
                store: Arc::clone(&store),
            }),
            None,
        );
        achievement.init().unwrap();
        let before = metrics::snapshot().listener_failures;
        achievement.with_core(|_| {
            let writer = Arc::clone(&store);
            std::thread::spawn(move || {
                writer.increment("any", 1, 0);
            })
            .join()
            .unwrap();
        });
        assert!(metrics::snapshot().listener_failures > before);
    }

    /// Writes its own marker key while handling an event.
    struct ReentrantRule {
        store: Arc<PropertyStore>,
    }

    impl AchievementRule for ReentrantRule {
        fn stores(&self) -> Vec<Arc<PropertyStore>> {
            vec![Arc::clone(&self.store)]
        }

        fn on_data_event(
            &mut self,
            progress: &mut Progress<'_>,
            event: &ChangeEvent,
        ) -> Result<(), EngineError> {
            if event.touches("hit") {
                self.store.increment("echo", 1, 0);
                progress.achieve_delta(1);
            }
            Ok(())
        }
    }

    #[test]
    fn reentrant_writes_are_queued_not_recursed() {
        let store = Arc::new(PropertyStore::new("echo"));
        let achievement = Achievement::new(
            "echo",
            AchievementDefinition::new(1, 10),
            Box::new(ReentrantRule {
                store: Arc::clone(&store),
            }),
            None,
        );
        achievement.init().unwrap();
        store.increment("hit", 1, 0);
        store.increment("hit", 1, 0);
        assert_eq!(achievement.value(), 2);
        assert_eq!(store.get_value("echo", 0), 2);
    }

    #[test]
    fn chain_trigger_and_persisted_state() {
        let misc = Arc::new(PropertyStore::new("misc"));
        let state = Arc::new(PropertyStore::new("achievements.steps"));
        let store = Arc::new(PropertyStore::new("steps"));
        let definition = AchievementDefinition::new(3, 2).triggers(Arc::clone(&misc), "steps.done");
        let achievement = Achievement::new(
            "steps",
            definition.clone(),
            Box::new(StepRule {
                store: Arc::clone(&store),
                key: "step",
            }),
            Some(Arc::clone(&state)),
        );
        achievement.init().unwrap();
        achievement.achieve_delta(2);
        assert_eq!(misc.get_value("steps.done", 0), 1);

        let restored = Achievement::new(
            "steps",
            definition,
            Box::new(StepRule {
                store: Arc::clone(&store),
                key: "step",
            }),
            Some(state),
        );
        assert_eq!(restored.state(), AchievementState::AchievedUnclaimed);
        assert_eq!(restored.value(), 2);
        restored.init().unwrap();
        assert_eq!(restored.subscription_count(), 0);
    }
}
