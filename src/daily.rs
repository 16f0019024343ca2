//! Daily rotation of a holder's daily achievements.
//!
//! On the first [`DailyScheduler::refresh`] of a day every daily achievement
//! is reset (value back to zero, claimed ones rediscovered); an achieved but
//! unclaimed achievement keeps its state and stays available so the reward
//! cannot be lost. After a reset, a random subset of the reset candidates is
//! made available until `max_per_day` achievements are available.

use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::achievement::Achievement;
use crate::metrics;
use crate::registry::AchievementHolder;

pub const DEFAULT_MAX_PER_DAY: usize = 2;

/// Day number used for `last_reset_day`.
pub fn day_number(date: NaiveDate) -> i64 {
    i64::from(date.num_days_from_ce())
}

pub struct DailyScheduler {
    holder: Arc<AchievementHolder>,
    max_per_day: usize,
    rng: StdRng,
}

impl DailyScheduler {
    pub fn new(holder: Arc<AchievementHolder>, max_per_day: usize, rng: StdRng) -> Self {
        Self {
            holder,
            max_per_day,
            rng,
        }
    }

    /// Scheduler with an entropy-seeded RNG.
    pub fn from_entropy(holder: Arc<AchievementHolder>, max_per_day: usize) -> Self {
        Self::new(holder, max_per_day, StdRng::from_entropy())
    }

    pub fn holder(&self) -> &Arc<AchievementHolder> {
        &self.holder
    }

    pub fn max_per_day(&self) -> usize {
        self.max_per_day
    }

    fn dailies(&self) -> impl Iterator<Item = &Arc<Achievement>> {
        self.holder.achievements().iter().filter(|a| a.is_daily())
    }

    /// Reset for `today` if not done yet and activate a fresh subset.
    /// Returns the number of achievements reset.
    pub fn refresh(&mut self, today: NaiveDate) -> usize {
        let day = day_number(today);
        let reset = self.dailies().filter(|a| a.reset_for_day(day)).count();
        if reset > 0 {
            metrics::add_daily_resets(reset as u64);
            info!(
                "daily: {} reset {} achievements for {}",
                self.holder.game_type(),
                reset,
                today
            );
            self.activate_daily_subset();
        }
        reset
    }

    /// Make random unavailable dailies available until `max_per_day` are.
    /// Returns the number newly activated.
    pub fn activate_daily_subset(&mut self) -> usize {
        let available = self.dailies().filter(|a| a.is_available()).count();
        let room = self.max_per_day.saturating_sub(available);
        if room == 0 {
            return 0;
        }
        let mut candidates: Vec<Arc<Achievement>> = self
            .dailies()
            .filter(|a| !a.is_available())
            .cloned()
            .collect();
        candidates.shuffle(&mut self.rng);
        candidates.truncate(room);
        for achievement in &candidates {
            debug!("daily: activating {}", achievement.label());
            achievement.set_available(true);
        }
        candidates.len()
    }

    /// Daily achievements available today, ascending id.
    pub fn list_available(&self) -> Vec<Arc<Achievement>> {
        self.dailies().filter(|a| a.is_available()).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::achievement::{AchievementDefinition, AchievementRule, AchievementState, Progress};
    use crate::dependency::FeatureFlags;
    use crate::errors::EngineError;
    use crate::persistence::MemoryBackend;
    use crate::registry::{AchievementRegistry, AchievementSpec, HolderBlueprint};
    use crate::store::{ChangeEvent, PropertyStore};

    struct Idle;

    impl AchievementRule for Idle {
        fn stores(&self) -> Vec<Arc<PropertyStore>> {
            Vec::new()
        }

        fn on_data_event(&mut self, _: &mut Progress<'_>, _: &ChangeEvent) -> Result<(), EngineError> {
            Ok(())
        }
    }

    struct Dailies(usize);

    impl HolderBlueprint for Dailies {
        fn game_type(&self) -> &str {
            "daily"
        }

        fn is_daily(&self) -> bool {
            true
        }

        fn make_achievements(&mut self, _: &AchievementRegistry) -> Result<Vec<AchievementSpec>, EngineError> {
            Ok((1..=self.0 as u32)
                .map(|id| {
                    let rule: Box<dyn AchievementRule> = Box::new(Idle);
                    (AchievementDefinition::new(id, 1).daily(), rule)
                })
                .collect())
        }
    }

    fn scheduler(count: usize, seed: u64) -> DailyScheduler {
        let registry = AchievementRegistry::new(Arc::new(MemoryBackend::new()), Arc::new(FeatureFlags::new()));
        registry.bootstrap(vec![Box::new(Dailies(count))]).unwrap();
        DailyScheduler::new(registry.holder("daily").unwrap(), DEFAULT_MAX_PER_DAY, StdRng::seed_from_u64(seed))
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn activates_exactly_max_per_day() {
        let mut daily = scheduler(5, 7);
        assert!(daily.holder().list_achievements().is_empty());
        assert_eq!(daily.refresh(date(1)), 5);
        assert_eq!(daily.list_available().len(), 2);

        assert_eq!(daily.refresh(date(1)), 0);
        assert_eq!(daily.activate_daily_subset(), 0);
        assert_eq!(daily.list_available().len(), 2);
        assert_eq!(daily.holder().list_achievements().len(), 2);
    }

    #[test]
    fn unclaimed_reward_survives_rollover() {
        let mut daily = scheduler(5, 3);
        daily.refresh(date(1));
        let kept = Arc::clone(&daily.list_available()[0]);
        let claimed = Arc::clone(&daily.list_available()[1]);
        kept.achieve();
        claimed.achieve();
        claimed.claim_reward().unwrap();

        daily.refresh(date(2));
        assert_eq!(kept.state(), AchievementState::AchievedUnclaimed);
        assert!(kept.is_available());
        assert_eq!(claimed.state(), AchievementState::Discovered);
        assert_eq!(claimed.value(), 0);
        // The kept one occupies one of the two slots.
        assert_eq!(daily.list_available().len(), 2);
    }

    #[test]
    fn same_seed_same_selection() {
        let pick = |seed| {
            let mut daily = scheduler(5, seed);
            daily.refresh(date(4));
            daily.list_available().iter().map(|a| a.id()).collect::<Vec<_>>()
        };
        assert_eq!(pick(11), pick(11));
    }
}
