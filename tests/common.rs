//! Test utilities & fixtures shared by the integration tests.

use std::sync::Arc;

use trophyrack::dependency::FeatureFlags;
use trophyrack::persistence::PersistenceBackend;
use trophyrack::registry::AchievementRegistry;
use trophyrack::seeds;

/// Seeds used across integration tests: a counting holder, a chained holder
/// gated on the first one, and a daily holder observing both games.
pub const SEEDS: &str = r#"[
    {
        "game_type": "tinyhack",
        "achievements": [
            { "id": 1, "target": 5, "discovered": true, "reward": 25,
              "description": "Solve five dungeons",
              "rule": { "kind": "solved_count" },
              "triggers": "tinyhack.veteran" },
            { "id": 2, "target": 3, "description": "Three quick runs",
              "rule": { "kind": "time_keeper", "key": "runs", "required": 3, "limit": 1000 } }
        ]
    },
    {
        "game_type": "slots",
        "achievements": [
            { "id": 1, "description": "Veteran bonus",
              "rule": { "kind": "trigger", "key": "tinyhack.veteran" },
              "requires": [{ "kind": "achieved", "game_type": "tinyhack", "id": 1 }] },
            { "id": 2, "target": 50, "discovered": true,
              "rule": { "kind": "key_threshold", "scope": "aggregate", "key": "spins" },
              "requires": [{ "kind": "purchased", "feature": "slots_pro" }] }
        ]
    },
    {
        "game_type": "daily",
        "daily": true,
        "achievements": [
            { "id": 1, "target": 2, "game": "tinyhack", "rule": { "kind": "solved_count" } },
            { "id": 2, "target": 2, "game": "tinyhack", "rule": { "kind": "solved_count", "min_level": 2 } },
            { "id": 3, "target": 1, "game": "slots", "rule": { "kind": "solved_count" } },
            { "id": 4, "target": 3, "game": "slots", "rule": { "kind": "solved_count" } },
            { "id": 5, "target": 1, "game": "tinyhack", "rule": { "kind": "solved_count", "min_level": 3 } }
        ]
    }
]"#;

/// Bootstrapped registry over `backend` with the shared seeds.
#[allow(dead_code)]
pub fn registry_with(
    backend: Arc<dyn PersistenceBackend>,
    flags: Arc<FeatureFlags>,
) -> AchievementRegistry {
    let registry = AchievementRegistry::new(backend, flags);
    let holders = seeds::parse_seeds(SEEDS).expect("seeds parse");
    registry
        .bootstrap(seeds::blueprints(holders))
        .expect("bootstrap");
    registry
}

/// One full session: open, a bit of telemetry, close with `level`.
#[allow(dead_code)]
pub fn play(registry: &AchievementRegistry, game: &str, level: i64) {
    let data = registry.game_data(game);
    data.instance.load(None).expect("fresh session");
    data.instance.increment("moves", 7, 0);
    data.instance.close(level).expect("first close");
}
