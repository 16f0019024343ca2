use std::sync::Arc;

use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::SeedableRng;
use trophyrack::achievement::AchievementState;
use trophyrack::daily::{DailyScheduler, DEFAULT_MAX_PER_DAY};
use trophyrack::dependency::FeatureFlags;
use trophyrack::persistence::{MemoryBackend, PersistenceBackend};
use trophyrack::registry::AchievementRegistry;

mod common;
use common::{play, registry_with};

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, d).unwrap()
}

fn scheduler(registry: &AchievementRegistry, seed: u64) -> DailyScheduler {
    DailyScheduler::new(
        registry.holder("daily").unwrap(),
        DEFAULT_MAX_PER_DAY,
        StdRng::seed_from_u64(seed),
    )
}

#[test]
fn two_of_five_become_available_and_same_day_refresh_adds_none() {
    let registry = registry_with(Arc::new(MemoryBackend::new()), Arc::new(FeatureFlags::new()));
    assert!(registry.list_achievements("daily").unwrap().is_empty());

    let mut daily = scheduler(&registry, 42);
    assert_eq!(daily.refresh(day(1)), 5);
    let first: Vec<u32> = daily.list_available().iter().map(|a| a.id()).collect();
    assert_eq!(first.len(), 2);

    assert_eq!(daily.refresh(day(1)), 0);
    let again: Vec<u32> = daily.list_available().iter().map(|a| a.id()).collect();
    assert_eq!(first, again);

    let listed: Vec<u32> = registry
        .list_achievements("daily")
        .unwrap()
        .iter()
        .map(|v| v.id)
        .collect();
    assert_eq!(listed, first);
}

#[test]
fn unavailable_dailies_ignore_gameplay() {
    let registry = registry_with(Arc::new(MemoryBackend::new()), Arc::new(FeatureFlags::new()));
    let mut daily = scheduler(&registry, 9);
    daily.refresh(day(2));
    let holder = registry.holder("daily").unwrap();

    for _ in 0..3 {
        play(&registry, "tinyhack", 3);
    }
    for achievement in holder.achievements() {
        let watches_tinyhack = [1, 2, 5].contains(&achievement.id());
        if achievement.is_available() && watches_tinyhack {
            assert!(achievement.state().is_achieved(), "#{} should be achieved", achievement.id());
        } else {
            assert!(!achievement.state().is_achieved(), "#{} should be idle", achievement.id());
        }
    }
}

#[test]
fn rotation_state_persists_and_unclaimed_rewards_carry_over() {
    let backend = Arc::new(MemoryBackend::new());
    let kept_id;
    {
        let registry = registry_with(backend.clone(), Arc::new(FeatureFlags::new()));
        let mut daily = scheduler(&registry, 5);
        daily.refresh(day(3));
        let kept = Arc::clone(&daily.list_available()[0]);
        kept.achieve();
        kept_id = kept.id();
        registry.save_all().unwrap();
    }
    assert!(backend.read("achievements.daily").is_some());

    let registry = registry_with(backend, Arc::new(FeatureFlags::new()));
    let mut daily = scheduler(&registry, 6);
    // Same day after a restart: nothing to reset.
    assert_eq!(daily.refresh(day(3)), 0);
    assert_eq!(daily.list_available().len(), 2);

    daily.refresh(day(4));
    let kept = registry.achievement("daily", kept_id).unwrap();
    assert_eq!(kept.state(), AchievementState::AchievedUnclaimed);
    assert!(kept.is_available());
    assert_eq!(daily.list_available().len(), 2);
    assert_eq!(registry.claim_reward("daily", kept_id).unwrap(), 10);
}
