//! Data-driven holder definitions.
//!
//! A seeds file is a JSON list of holders, each with its achievements, the
//! rule driving them and their dependencies:
//!
//! ```json
//! [{
//!   "game_type": "tinyhack",
//!   "achievements": [{
//!     "id": 1, "target": 5, "discovered": true,
//!     "description": "Solve five dungeons",
//!     "rule": { "kind": "solved_count" },
//!     "requires": [{ "kind": "unlocked", "game_type": "tinyhack" }],
//!     "triggers": "tinyhack.veteran"
//!   }]
//! }]
//! ```
//!
//! Trigger keys live in the global misc store. Unknown rule or requirement
//! kinds fail the parse.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::achievement::{AchievementDefinition, AchievementRule, TimeRewardScale, DEFAULT_REWARD};
use crate::dependency::{Dependency, DependencyFactory};
use crate::errors::EngineError;
use crate::registry::{AchievementHolder, AchievementRegistry, AchievementSpec, HolderBlueprint};
use crate::rules::{BestTimeRule, KeyThresholdRule, SolvedCountRule, TimeKeeperRule, TriggerKeyRule};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HolderSeed {
    pub game_type: String,
    #[serde(default)]
    pub daily: bool,
    pub achievements: Vec<AchievementSeed>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AchievementSeed {
    pub id: u32,
    #[serde(default = "default_level")]
    pub level: u32,
    #[serde(default = "default_reward")]
    pub reward: u32,
    #[serde(default = "default_target")]
    pub target: i64,
    #[serde(default)]
    pub discovered: bool,
    #[serde(default)]
    pub description: String,
    /// Game type whose stores the rule observes; defaults to the holder's.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game: Option<String>,
    pub rule: RuleSeed,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<RequirementSeed>,
    /// Misc store key written when achieved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggers: Option<String>,
}

fn default_level() -> u32 {
    1
}

fn default_reward() -> u32 {
    DEFAULT_REWARD
}

fn default_target() -> i64 {
    1
}

fn default_min_level() -> i64 {
    1
}

/// Which scoped store a [`RuleSeed::KeyThreshold`] watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreScope {
    Instance,
    Aggregate,
    Timers,
    Misc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleSeed {
    SolvedCount {
        #[serde(default = "default_min_level")]
        min_level: i64,
    },
    KeyThreshold {
        scope: StoreScope,
        key: String,
    },
    BestTime {
        best_key: String,
        scale: TimeRewardScale,
    },
    TimeKeeper {
        key: String,
        required: u32,
        limit: i64,
    },
    Trigger {
        key: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequirementSeed {
    Achieved { game_type: String, id: u32 },
    Claimed { game_type: String, id: u32 },
    Purchased { feature: String },
    Unlocked { game_type: String },
}

impl RequirementSeed {
    fn resolve(&self, deps: &DependencyFactory) -> Result<Arc<dyn Dependency>, EngineError> {
        match self {
            RequirementSeed::Achieved { game_type, id } => deps.require_achieved(game_type, *id),
            RequirementSeed::Claimed { game_type, id } => deps.require_claimed(game_type, *id),
            RequirementSeed::Purchased { feature } => deps.require_purchased(feature),
            RequirementSeed::Unlocked { game_type } => deps.require_unlocked(game_type),
        }
    }
}

pub fn parse_seeds(contents: &str) -> Result<Vec<HolderSeed>, EngineError> {
    let seeds: Vec<HolderSeed> = serde_json::from_str(contents)?;
    for holder in &seeds {
        if holder.game_type.trim().is_empty() {
            return Err(EngineError::Config("holder with empty game_type".to_string()));
        }
        if let Some(bad) = holder.achievements.iter().find(|a| a.target <= 0) {
            return Err(EngineError::Config(format!(
                "{}#{} has non-positive target {}",
                holder.game_type, bad.id, bad.target
            )));
        }
    }
    Ok(seeds)
}

/// Load holder seeds from a JSON file.
pub fn load_seeds_from_json<P: AsRef<Path>>(path: P) -> Result<Vec<HolderSeed>, EngineError> {
    let contents = fs::read_to_string(path.as_ref())?;
    parse_seeds(&contents)
}

pub fn blueprints(seeds: Vec<HolderSeed>) -> Vec<Box<dyn HolderBlueprint>> {
    seeds
        .into_iter()
        .map(|seed| Box::new(SeedHolder::new(seed)) as Box<dyn HolderBlueprint>)
        .collect()
}

/// [`HolderBlueprint`] built from a [`HolderSeed`].
#[derive(Debug, Clone)]
pub struct SeedHolder {
    seed: HolderSeed,
}

impl SeedHolder {
    pub fn new(seed: HolderSeed) -> Self {
        Self { seed }
    }

    fn build_rule(
        &self,
        achievement: &AchievementSeed,
        registry: &AchievementRegistry,
    ) -> Box<dyn AchievementRule> {
        let game = achievement.game.as_deref().unwrap_or(&self.seed.game_type);
        let data = registry.game_data(game);
        match &achievement.rule {
            RuleSeed::SolvedCount { min_level } => Box::new(
                SolvedCountRule::new(&data, &format!("counted.{}.{}", self.seed.game_type, achievement.id))
                    .min_level(*min_level),
            ),
            RuleSeed::KeyThreshold { scope, key } => {
                let store = match scope {
                    StoreScope::Instance => Arc::clone(data.instance.store()),
                    StoreScope::Aggregate => Arc::clone(data.aggregate.store()),
                    StoreScope::Timers => Arc::clone(data.timers.store()),
                    StoreScope::Misc => Arc::clone(registry.misc().store()),
                };
                Box::new(KeyThresholdRule::new(store, key))
            }
            RuleSeed::BestTime { best_key, scale } => {
                Box::new(BestTimeRule::new(&data, best_key, *scale))
            }
            RuleSeed::TimeKeeper { key, required, limit } => {
                Box::new(TimeKeeperRule::new(Arc::clone(&data), key, *required, *limit))
            }
            RuleSeed::Trigger { key } => {
                Box::new(TriggerKeyRule::new(Arc::clone(registry.misc().store()), key))
            }
        }
    }
}

impl HolderBlueprint for SeedHolder {
    fn game_type(&self) -> &str {
        &self.seed.game_type
    }

    fn is_daily(&self) -> bool {
        self.seed.daily
    }

    fn make_achievements(
        &mut self,
        registry: &AchievementRegistry,
    ) -> Result<Vec<AchievementSpec>, EngineError> {
        let mut specs = Vec::with_capacity(self.seed.achievements.len());
        for seed in &self.seed.achievements {
            let mut definition = AchievementDefinition::new(seed.id, seed.target)
                .level(seed.level)
                .reward(seed.reward)
                .describe(&seed.description);
            if seed.discovered {
                definition = definition.discovered();
            }
            if self.seed.daily {
                definition = definition.daily();
            }
            if let Some(key) = &seed.triggers {
                definition = definition.triggers(Arc::clone(registry.misc().store()), key);
            }
            specs.push((definition, self.build_rule(seed, registry)));
        }
        Ok(specs)
    }

    fn add_dependencies(
        &mut self,
        holder: &AchievementHolder,
        dependencies: &DependencyFactory,
    ) -> Result<(), EngineError> {
        for seed in &self.seed.achievements {
            let achievement = holder.require(seed.id)?;
            for requirement in &seed.requires {
                achievement.add_dependency(requirement.resolve(dependencies)?)?;
            }
        }
        Ok(())
    }
}

/// Seeds written by `trophyrack init`.
pub fn starter_seeds() -> Vec<HolderSeed> {
    let achievement = |id: u32, target: i64, description: &str, rule: RuleSeed| AchievementSeed {
        id,
        level: 1,
        reward: DEFAULT_REWARD,
        target,
        discovered: true,
        description: description.to_string(),
        game: None,
        rule,
        requires: Vec::new(),
        triggers: None,
    };
    let solved = RuleSeed::SolvedCount { min_level: 1 };

    let mut first_win = achievement(1, 1, "Solve your first dungeon", solved.clone());
    first_win.triggers = Some("tinyhack.first_win".to_string());
    let mut speedrun = achievement(
        3,
        1,
        "Solve a dungeon quickly",
        RuleSeed::BestTime {
            best_key: "best_ms".to_string(),
            scale: TimeRewardScale {
                fast: 60_000,
                slow: 3_600_000,
                min: 10,
                max: 50,
                perfect: 100,
            },
        },
    );
    speedrun.level = 2;
    let mut marathon = achievement(
        4,
        1,
        "Play three sessions within ten minutes in total",
        RuleSeed::TimeKeeper {
            key: "sessions".to_string(),
            required: 3,
            limit: 600_000,
        },
    );
    marathon.discovered = false;
    let mut follow_up = achievement(
        1,
        1,
        "Win a dungeon, then come back to the slots",
        RuleSeed::Trigger {
            key: "tinyhack.first_win".to_string(),
        },
    );
    follow_up.requires.push(RequirementSeed::Achieved {
        game_type: "tinyhack".to_string(),
        id: 1,
    });
    let daily = |id: u32, game: &str, description: &str| {
        let mut seed = achievement(id, 2, description, solved.clone());
        seed.game = Some(game.to_string());
        seed
    };

    vec![
        HolderSeed {
            game_type: "tinyhack".to_string(),
            daily: false,
            achievements: vec![
                first_win,
                achievement(2, 5, "Solve five dungeons", solved.clone()),
                speedrun,
                marathon,
            ],
        },
        HolderSeed {
            game_type: "slots".to_string(),
            daily: false,
            achievements: vec![
                follow_up,
                achievement(
                    2,
                    100,
                    "Play a hundred slot sessions",
                    RuleSeed::KeyThreshold {
                        scope: StoreScope::Aggregate,
                        key: "sessions".to_string(),
                    },
                ),
            ],
        },
        HolderSeed {
            game_type: "daily".to_string(),
            daily: true,
            achievements: vec![
                daily(1, "tinyhack", "Solve two dungeons today"),
                daily(2, "slots", "Win two slot sessions today"),
                daily(3, "sudoku", "Solve two sudokus today"),
                daily(4, "memory", "Solve two memory boards today"),
                daily(5, "racer", "Finish two races today"),
            ],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::achievement::AchievementState;
    use crate::dependency::FeatureFlags;
    use crate::persistence::MemoryBackend;

    const SEEDS: &str = r#"[
        {
            "game_type": "tinyhack",
            "achievements": [
                { "id": 2, "target": 2, "discovered": true, "rule": { "kind": "solved_count" } },
                { "id": 1, "rule": { "kind": "solved_count", "min_level": 3 },
                  "requires": [{ "kind": "purchased", "feature": "pro" }] }
            ]
        }
    ]"#;

    fn registry() -> AchievementRegistry {
        AchievementRegistry::new(Arc::new(MemoryBackend::new()), Arc::new(FeatureFlags::new()))
    }

    #[test]
    fn parses_defaults() {
        let seeds = parse_seeds(SEEDS).unwrap();
        let second = &seeds[0].achievements[1];
        assert_eq!(second.level, 1);
        assert_eq!(second.reward, DEFAULT_REWARD);
        assert_eq!(second.target, 1);
        assert_eq!(second.rule, RuleSeed::SolvedCount { min_level: 3 });
        assert!(!seeds[0].daily);
    }

    #[test]
    fn unknown_rule_kind_is_an_error() {
        let bad = r#"[{ "game_type": "x", "achievements": [{ "id": 1, "rule": { "kind": "teleport" } }] }]"#;
        assert!(matches!(parse_seeds(bad), Err(EngineError::Json(_))));
        let zero = r#"[{ "game_type": "x", "achievements": [{ "id": 1, "target": 0, "rule": { "kind": "solved_count" } }] }]"#;
        assert!(matches!(parse_seeds(zero), Err(EngineError::Config(_))));
    }

    #[test]
    fn seeded_holder_plays_through() {
        let registry = registry();
        registry.bootstrap(blueprints(parse_seeds(SEEDS).unwrap())).unwrap();
        let data = registry.game_data("tinyhack");
        for _ in 0..2 {
            data.instance.load(None).unwrap();
            data.instance.close(3).unwrap();
        }
        let holder = registry.holder("tinyhack").unwrap();
        assert_eq!(holder.require(2).unwrap().state(), AchievementState::AchievedUnclaimed);
        // Needs the "pro" purchase.
        assert_eq!(holder.require(1).unwrap().value(), 0);
        assert_eq!(holder.require(1).unwrap().dependency_count(), 1);
    }

    #[test]
    fn starter_seeds_bootstrap_and_round_trip() {
        let seeds = starter_seeds();
        let json = serde_json::to_string_pretty(&seeds).unwrap();
        assert_eq!(parse_seeds(&json).unwrap(), seeds);

        let registry = registry();
        registry.bootstrap(blueprints(seeds)).unwrap();
        assert_eq!(registry.holders().len(), 3);
        assert!(registry.holder("daily").unwrap().is_daily());
    }
}
