//! # Achievement registry
//!
//! The registry owns the table of named, persisted stores and drives the
//! bootstrap of every [`AchievementHolder`] in three strict phases:
//!
//! 1. **make**: every [`HolderBlueprint`] constructs its achievements. No
//!    cross references exist yet.
//! 2. **wire**: every blueprint adds dependencies through a
//!    [`DependencyFactory`] that now knows all achievements of all holders.
//! 3. **init**: every achievement subscribes to its stores.
//!
//! Bootstrap succeeds at most once; a failed attempt leaves the registry
//! empty and may be retried. A dependency on something that was never made
//! fails the bootstrap with [`EngineError::MissingDependency`], a cycle among
//! achievement dependencies with [`EngineError::Config`].
//!
//! Stores handed to [`AchievementRegistry::manage`] are restored from the
//! [`PersistenceBackend`] immediately and written back by
//! [`AchievementRegistry::save_all`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use log::{debug, info};

use crate::achievement::{
    Achievement, AchievementDefinition, AchievementRule, AchievementView, StatusCell,
};
use crate::dependency::{DependencyFactory, FeatureOracle};
use crate::errors::EngineError;
use crate::persistence::PersistenceBackend;
use crate::scoped::{GameInstanceData, MiscData, TimerData, TypeAggregateData};
use crate::store::{lock_recover, PropertyStore};

/// `MiscData` key accumulating every claimed reward.
pub const KEY_REWARD_TOTAL: &str = "reward.total";

pub fn achievement_state_store_name(game_type: &str) -> String {
    format!("achievements.{game_type}")
}

/// Scoped stores of one game type.
#[derive(Debug)]
pub struct GameData {
    pub instance: GameInstanceData,
    pub aggregate: TypeAggregateData,
    pub timers: TimerData,
}

/// An achievement definition together with its rule, as produced by
/// [`HolderBlueprint::make_achievements`].
pub type AchievementSpec = (AchievementDefinition, Box<dyn AchievementRule>);

/// Game-side description of one holder.
pub trait HolderBlueprint: Send {
    fn game_type(&self) -> &str;

    /// Daily holders are rotated by a `DailyScheduler`.
    fn is_daily(&self) -> bool {
        false
    }

    /// Phase 1. Build definitions and rules; stores come from `registry`.
    fn make_achievements(
        &mut self,
        registry: &AchievementRegistry,
    ) -> Result<Vec<AchievementSpec>, EngineError>;

    /// Phase 2. Runs once every holder has made its achievements.
    fn add_dependencies(
        &mut self,
        _holder: &AchievementHolder,
        _dependencies: &DependencyFactory,
    ) -> Result<(), EngineError> {
        Ok(())
    }
}

/// The achievements of one game type, sorted by ascending id.
#[derive(Debug)]
pub struct AchievementHolder {
    game_type: String,
    daily: bool,
    achievements: Vec<Arc<Achievement>>,
}

impl AchievementHolder {
    fn new(game_type: &str, daily: bool, mut achievements: Vec<Arc<Achievement>>) -> Result<Self, EngineError> {
        achievements.sort_by_key(|a| a.id());
        if let Some(pair) = achievements.windows(2).find(|w| w[0].id() == w[1].id()) {
            return Err(EngineError::DuplicateAchievement {
                game_type: game_type.to_string(),
                id: pair[0].id(),
            });
        }
        Ok(Self {
            game_type: game_type.to_string(),
            daily,
            achievements,
        })
    }

    pub fn game_type(&self) -> &str {
        &self.game_type
    }

    pub fn is_daily(&self) -> bool {
        self.daily
    }

    pub fn len(&self) -> usize {
        self.achievements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.achievements.is_empty()
    }

    pub fn get(&self, id: u32) -> Option<&Arc<Achievement>> {
        self.achievements
            .binary_search_by_key(&id, |a| a.id())
            .ok()
            .map(|i| &self.achievements[i])
    }

    pub fn require(&self, id: u32) -> Result<&Arc<Achievement>, EngineError> {
        self.get(id).ok_or_else(|| EngineError::UnknownAchievement {
            game_type: self.game_type.clone(),
            id,
        })
    }

    /// Every achievement, including unavailable dailies.
    pub fn achievements(&self) -> &[Arc<Achievement>] {
        &self.achievements
    }

    /// What the presentation layer may show: ascending id, daily
    /// achievements that are not available today left out.
    pub fn list_achievements(&self) -> Vec<Arc<Achievement>> {
        self.achievements
            .iter()
            .filter(|a| a.is_available())
            .cloned()
            .collect()
    }

    pub fn views(&self) -> Vec<AchievementView> {
        self.list_achievements().iter().map(|a| a.view()).collect()
    }

    fn init(&self) -> Result<(), EngineError> {
        for achievement in &self.achievements {
            achievement.init()?;
        }
        Ok(())
    }
}

pub struct AchievementRegistry {
    backend: Arc<dyn PersistenceBackend>,
    oracle: Arc<dyn FeatureOracle>,
    stores: Mutex<BTreeMap<String, Arc<PropertyStore>>>,
    game_data: Mutex<BTreeMap<String, Arc<GameData>>>,
    holders: RwLock<BTreeMap<String, Arc<AchievementHolder>>>,
    misc: MiscData,
    bootstrap_lock: Mutex<()>,
    bootstrapped: AtomicBool,
}

impl AchievementRegistry {
    pub fn new(backend: Arc<dyn PersistenceBackend>, oracle: Arc<dyn FeatureOracle>) -> Self {
        let registry = Self {
            backend,
            oracle,
            stores: Mutex::new(BTreeMap::new()),
            game_data: Mutex::new(BTreeMap::new()),
            holders: RwLock::new(BTreeMap::new()),
            misc: MiscData::new(),
            bootstrap_lock: Mutex::new(()),
            bootstrapped: AtomicBool::new(false),
        };
        registry.adopt(Arc::clone(registry.misc.store()));
        registry
    }

    pub fn oracle(&self) -> &Arc<dyn FeatureOracle> {
        &self.oracle
    }

    fn adopt(&self, store: Arc<PropertyStore>) -> Arc<PropertyStore> {
        let data = self.backend.read(store.name());
        store.restore_or_reset(data.as_deref());
        lock_recover(&self.stores).insert(store.name().to_string(), Arc::clone(&store));
        store
    }

    /// Register `store` under its name and restore its saved content.
    /// Managing a second, different store under a taken name is an error.
    pub fn manage(&self, store: Arc<PropertyStore>) -> Result<Arc<PropertyStore>, EngineError> {
        if let Some(existing) = lock_recover(&self.stores).get(store.name()) {
            if existing.id() == store.id() {
                return Ok(Arc::clone(existing));
            }
            return Err(EngineError::Config(format!(
                "store name {} is already managed",
                store.name()
            )));
        }
        debug!("registry: managing store {}", store.name());
        Ok(self.adopt(store))
    }

    /// Raw compacted content saved for `name`, if any.
    pub fn load(&self, name: &str) -> Option<String> {
        self.backend.read(name)
    }

    pub fn store(&self, name: &str) -> Option<Arc<PropertyStore>> {
        lock_recover(&self.stores).get(name).cloned()
    }

    pub fn store_names(&self) -> Vec<String> {
        lock_recover(&self.stores).keys().cloned().collect()
    }

    pub fn misc(&self) -> &MiscData {
        &self.misc
    }

    /// Scoped stores of `game_type`, created on first use. The aggregate and
    /// timer stores are managed; the instance store is per session and is
    /// not.
    pub fn game_data(&self, game_type: &str) -> Arc<GameData> {
        let mut table = lock_recover(&self.game_data);
        if let Some(data) = table.get(game_type) {
            return Arc::clone(data);
        }
        let data = Arc::new(GameData {
            instance: GameInstanceData::new(game_type),
            aggregate: TypeAggregateData::new(game_type),
            timers: TimerData::new(game_type),
        });
        self.adopt(Arc::clone(data.aggregate.store()));
        self.adopt(Arc::clone(data.timers.store()));
        table.insert(game_type.to_string(), Arc::clone(&data));
        data
    }

    /// Run the three bootstrap phases over `blueprints`. Once a call has
    /// succeeded every further call is rejected.
    pub fn bootstrap(&self, blueprints: Vec<Box<dyn HolderBlueprint>>) -> Result<(), EngineError> {
        let _running = lock_recover(&self.bootstrap_lock);
        if self.bootstrapped.load(Ordering::SeqCst) {
            return Err(EngineError::BootstrapOrder(
                "registry is already bootstrapped".to_string(),
            ));
        }
        self.run_bootstrap(blueprints)?;
        self.bootstrapped.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// State store of `game_type`, reused when an earlier failed bootstrap
    /// already managed it.
    fn state_store(&self, game_type: &str) -> Result<Arc<PropertyStore>, EngineError> {
        let name = achievement_state_store_name(game_type);
        match self.store(&name) {
            Some(store) => Ok(store),
            None => self.manage(Arc::new(PropertyStore::new(&name))),
        }
    }

    fn run_bootstrap(&self, mut blueprints: Vec<Box<dyn HolderBlueprint>>) -> Result<(), EngineError> {
        debug!("registry: make phase for {} holders", blueprints.len());
        let mut holders = Vec::with_capacity(blueprints.len());
        for blueprint in blueprints.iter_mut() {
            let game_type = blueprint.game_type().to_string();
            if holders.iter().any(|h: &AchievementHolder| h.game_type == game_type) {
                return Err(EngineError::Config(format!(
                    "holder {game_type} registered twice"
                )));
            }
            let state_store = self.state_store(&game_type)?;
            let achievements = blueprint
                .make_achievements(self)?
                .into_iter()
                .map(|(definition, rule)| {
                    Achievement::new(&game_type, definition, rule, Some(Arc::clone(&state_store)))
                })
                .collect();
            holders.push(AchievementHolder::new(&game_type, blueprint.is_daily(), achievements)?);
        }

        debug!("registry: wire phase");
        let mut statuses: BTreeMap<(String, u32), Arc<StatusCell>> = BTreeMap::new();
        for holder in &holders {
            for achievement in &holder.achievements {
                statuses.insert((holder.game_type.clone(), achievement.id()), achievement.status());
            }
        }
        let factory = DependencyFactory::new(statuses, Arc::clone(&self.oracle));
        for (blueprint, holder) in blueprints.iter_mut().zip(&holders) {
            blueprint.add_dependencies(holder, &factory)?;
        }
        if let Some(cycle) = find_dependency_cycle(&dependency_edges(&holders)) {
            let path: Vec<String> = cycle.iter().map(|(t, id)| format!("{t}#{id}")).collect();
            return Err(EngineError::Config(format!(
                "dependency cycle: {}",
                path.join(" -> ")
            )));
        }

        debug!("registry: init phase");
        for holder in &holders {
            holder.init()?;
        }

        let mut table = self.holders.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        for holder in holders {
            info!(
                "registry: holder {} ready with {} achievements",
                holder.game_type,
                holder.len()
            );
            table.insert(holder.game_type.clone(), Arc::new(holder));
        }
        Ok(())
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped.load(Ordering::SeqCst)
    }

    pub fn holder(&self, game_type: &str) -> Result<Arc<AchievementHolder>, EngineError> {
        self.holders
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(game_type)
            .cloned()
            .ok_or_else(|| EngineError::UnknownHolder(game_type.to_string()))
    }

    /// Every holder, by ascending game type.
    pub fn holders(&self) -> Vec<Arc<AchievementHolder>> {
        self.holders
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn achievement(&self, game_type: &str, id: u32) -> Result<Arc<Achievement>, EngineError> {
        Ok(Arc::clone(self.holder(game_type)?.require(id)?))
    }

    pub fn list_achievements(&self, game_type: &str) -> Result<Vec<AchievementView>, EngineError> {
        Ok(self.holder(game_type)?.views())
    }

    /// Claim the reward of `game_type#id` and add it to the reward total.
    pub fn claim_reward(&self, game_type: &str, id: u32) -> Result<u32, EngineError> {
        let points = self.achievement(game_type, id)?.claim_reward()?;
        self.misc.increment(KEY_REWARD_TOTAL, i64::from(points), 0);
        Ok(points)
    }

    pub fn reward_total(&self) -> i64 {
        self.misc.get_value(KEY_REWARD_TOTAL, 0)
    }

    /// Compact every managed store and hand the batch to the backend.
    /// Returns the number of stores written.
    pub fn save_all(&self) -> Result<usize, EngineError> {
        let batch: BTreeMap<String, String> = lock_recover(&self.stores)
            .iter()
            .map(|(name, store)| (name.clone(), store.compact()))
            .collect();
        self.backend.write_batch(&batch)?;
        debug!("registry: saved {} stores", batch.len());
        Ok(batch.len())
    }
}

type Node = (String, u32);

fn dependency_edges(holders: &[AchievementHolder]) -> BTreeMap<Node, Vec<Node>> {
    holders
        .iter()
        .flat_map(|holder| holder.achievements.iter())
        .map(|a| ((a.game_type().to_string(), a.id()), a.dependency_referents()))
        .collect()
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// First cycle of the dependency graph as a path starting and ending on the
/// same achievement.
fn find_dependency_cycle(edges: &BTreeMap<Node, Vec<Node>>) -> Option<Vec<Node>> {
    fn visit(
        node: &Node,
        edges: &BTreeMap<Node, Vec<Node>>,
        marks: &mut BTreeMap<Node, Mark>,
        path: &mut Vec<Node>,
    ) -> Option<Vec<Node>> {
        match marks.get(node) {
            Some(Mark::Done) => return None,
            Some(Mark::Visiting) => {
                let start = path.iter().position(|n| n == node).unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push(node.clone());
                return Some(cycle);
            }
            None => {}
        }
        marks.insert(node.clone(), Mark::Visiting);
        path.push(node.clone());
        for next in edges.get(node).into_iter().flatten() {
            if let Some(cycle) = visit(next, edges, marks, path) {
                return Some(cycle);
            }
        }
        path.pop();
        marks.insert(node.clone(), Mark::Done);
        None
    }

    let mut marks = BTreeMap::new();
    for node in edges.keys() {
        let mut path = Vec::new();
        if let Some(cycle) = visit(node, edges, &mut marks, &mut path) {
            return Some(cycle);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::achievement::{AchievementState, Progress};
    use crate::dependency::FeatureFlags;
    use crate::persistence::MemoryBackend;
    use crate::store::ChangeEvent;

    struct CloseRule {
        store: Arc<PropertyStore>,
    }

    impl AchievementRule for CloseRule {
        fn stores(&self) -> Vec<Arc<PropertyStore>> {
            vec![Arc::clone(&self.store)]
        }

        fn on_data_event(
            &mut self,
            progress: &mut Progress<'_>,
            event: &ChangeEvent,
        ) -> Result<(), EngineError> {
            if event.is_close() {
                progress.achieve_delta(1);
            }
            Ok(())
        }
    }

    struct Blueprint {
        game_type: &'static str,
        ids: Vec<u32>,
        needs: Option<(&'static str, u32)>,
    }

    impl HolderBlueprint for Blueprint {
        fn game_type(&self) -> &str {
            self.game_type
        }

        fn make_achievements(
            &mut self,
            registry: &AchievementRegistry,
        ) -> Result<Vec<AchievementSpec>, EngineError> {
            let data = registry.game_data(self.game_type);
            Ok(self
                .ids
                .iter()
                .map(|&id| {
                    let rule: Box<dyn AchievementRule> = Box::new(CloseRule {
                        store: Arc::clone(data.instance.store()),
                    });
                    (AchievementDefinition::new(id, 1).discovered(), rule)
                })
                .collect())
        }

        fn add_dependencies(
            &mut self,
            holder: &AchievementHolder,
            dependencies: &DependencyFactory,
        ) -> Result<(), EngineError> {
            if let Some((game_type, id)) = self.needs {
                let dependency = dependencies.require_achieved(game_type, id)?;
                for achievement in holder.achievements() {
                    achievement.add_dependency(Arc::clone(&dependency))?;
                }
            }
            Ok(())
        }
    }

    fn registry(backend: Arc<MemoryBackend>) -> AchievementRegistry {
        AchievementRegistry::new(backend, Arc::new(FeatureFlags::new()))
    }

    #[test]
    fn holders_list_in_ascending_id_order() {
        let registry = registry(Arc::new(MemoryBackend::new()));
        registry
            .bootstrap(vec![Box::new(Blueprint {
                game_type: "slots",
                ids: vec![3, 1, 2],
                needs: None,
            })])
            .unwrap();
        let ids: Vec<u32> = registry
            .list_achievements("slots")
            .unwrap()
            .iter()
            .map(|v| v.id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(matches!(registry.holder("chess"), Err(EngineError::UnknownHolder(_))));
    }

    #[test]
    fn failed_bootstrap_can_be_retried_but_success_is_final() {
        let registry = registry(Arc::new(MemoryBackend::new()));
        let result = registry.bootstrap(vec![Box::new(Blueprint {
            game_type: "slots",
            ids: vec![1, 1],
            needs: None,
        })]);
        assert!(matches!(result, Err(EngineError::DuplicateAchievement { id: 1, .. })));
        assert!(!registry.is_bootstrapped());
        assert!(registry.holder("slots").is_err());

        registry
            .bootstrap(vec![Box::new(Blueprint {
                game_type: "slots",
                ids: vec![1],
                needs: None,
            })])
            .unwrap();
        assert!(registry.is_bootstrapped());
        assert_eq!(registry.holder("slots").unwrap().len(), 1);
        assert!(matches!(
            registry.bootstrap(Vec::new()),
            Err(EngineError::BootstrapOrder(_))
        ));
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let registry = registry(Arc::new(MemoryBackend::new()));
        let result = registry.bootstrap(vec![Box::new(Blueprint {
            game_type: "slots",
            ids: vec![1],
            needs: Some(("slots", 1)),
        })]);
        match result {
            Err(EngineError::Config(message)) => {
                assert!(message.contains("slots#1 -> slots#1"), "{message}")
            }
            other => panic!("expected a cycle error, got {other:?}"),
        }
        assert!(!registry.is_bootstrapped());
    }

    #[test]
    fn mutual_dependency_across_holders_is_a_cycle() {
        let registry = registry(Arc::new(MemoryBackend::new()));
        let result = registry.bootstrap(vec![
            Box::new(Blueprint {
                game_type: "slots",
                ids: vec![1],
                needs: Some(("tinyhack", 1)),
            }),
            Box::new(Blueprint {
                game_type: "tinyhack",
                ids: vec![1],
                needs: Some(("slots", 1)),
            }),
        ]);
        assert!(matches!(result, Err(EngineError::Config(ref m)) if m.starts_with("dependency cycle")));
    }

    #[test]
    fn cycle_search_ignores_shared_referents() {
        let node = |t: &str, id: u32| (t.to_string(), id);
        let mut edges = BTreeMap::new();
        edges.insert(node("a", 1), vec![node("c", 1)]);
        edges.insert(node("b", 1), vec![node("c", 1)]);
        edges.insert(node("c", 1), vec![]);
        assert_eq!(find_dependency_cycle(&edges), None);

        edges.insert(node("c", 1), vec![node("b", 1)]);
        edges.insert(node("b", 1), vec![node("a", 1)]);
        let cycle = find_dependency_cycle(&edges).unwrap();
        assert_eq!(cycle.first(), cycle.last());
        assert_eq!(cycle.len(), 4);
    }

    #[test]
    fn missing_dependency_fails_bootstrap() {
        let registry = registry(Arc::new(MemoryBackend::new()));
        let result = registry.bootstrap(vec![Box::new(Blueprint {
            game_type: "slots",
            ids: vec![1],
            needs: Some(("chess", 9)),
        })]);
        assert!(matches!(result, Err(EngineError::MissingDependency(_))));
    }

    #[test]
    fn cross_holder_dependency_and_reward_ledger() {
        let backend = Arc::new(MemoryBackend::new());
        let registry = registry(Arc::clone(&backend));
        registry
            .bootstrap(vec![
                Box::new(Blueprint {
                    game_type: "tinyhack",
                    ids: vec![1],
                    needs: Some(("slots", 1)),
                }),
                Box::new(Blueprint {
                    game_type: "slots",
                    ids: vec![1],
                    needs: None,
                }),
            ])
            .unwrap();

        let tinyhack = registry.game_data("tinyhack");
        tinyhack.instance.load(None).unwrap();
        tinyhack.instance.close(1).unwrap();
        let gated = registry.achievement("tinyhack", 1).unwrap();
        assert_eq!(gated.state(), AchievementState::Discovered);

        let slots = registry.game_data("slots");
        slots.instance.load(None).unwrap();
        slots.instance.close(1).unwrap();
        assert_eq!(
            registry.achievement("slots", 1).unwrap().state(),
            AchievementState::AchievedUnclaimed
        );

        assert_eq!(registry.claim_reward("slots", 1).unwrap(), 10);
        assert!(registry.claim_reward("slots", 1).is_err());
        assert_eq!(registry.reward_total(), 10);

        assert!(registry.save_all().unwrap() >= 3);
        assert!(backend.read("achievements.slots").is_some());
    }

    #[test]
    fn manage_restores_and_rejects_name_clash() {
        let backend = Arc::new(MemoryBackend::new());
        let seeded = PropertyStore::new("custom");
        seeded.increment("visits", 4, 0);
        backend.write("custom", &seeded.compact()).unwrap();

        let registry = registry(Arc::clone(&backend));
        let store = registry.manage(Arc::new(PropertyStore::new("custom"))).unwrap();
        assert_eq!(store.get_value("visits", 0), 4);
        assert!(registry.manage(Arc::clone(&store)).is_ok());
        assert!(matches!(
            registry.manage(Arc::new(PropertyStore::new("custom"))),
            Err(EngineError::Config(_))
        ));
        assert_eq!(registry.load("missing"), None);
    }
}
