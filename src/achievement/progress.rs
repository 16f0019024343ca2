use log::{debug, info};

use super::{Achievement, AchievementState, Tracking};
use crate::metrics;

/// Mutable view of one achievement handed to its rule.
///
/// Every primitive is a no-op once the achievement is achieved, so rules can
/// call them unconditionally.
pub struct Progress<'a> {
    achievement: &'a Achievement,
    tracking: &'a mut Tracking,
    dirty: bool,
    achieved_now: bool,
}

impl<'a> Progress<'a> {
    pub(super) fn new(achievement: &'a Achievement, tracking: &'a mut Tracking) -> Self {
        Self {
            achievement,
            tracking,
            dirty: false,
            achieved_now: false,
        }
    }

    /// `(dirty, achieved_now)`
    pub(super) fn finish(self) -> (bool, bool) {
        (self.dirty, self.achieved_now)
    }

    pub fn id(&self) -> u32 {
        self.achievement.id()
    }

    pub fn target(&self) -> i64 {
        self.achievement.target()
    }

    pub fn value(&self) -> i64 {
        self.tracking.value
    }

    pub fn state(&self) -> AchievementState {
        self.tracking.state
    }

    pub fn is_achieved(&self) -> bool {
        self.tracking.state.is_achieved()
    }

    pub fn dependencies_fulfilled(&self) -> bool {
        self.tracking.dependencies.iter().all(|d| d.evaluate())
    }

    fn set_state(&mut self, state: AchievementState) {
        self.tracking.state = state;
        self.achievement.status.set(state);
        self.dirty = true;
    }

    fn set_value(&mut self, value: i64) {
        let value = value.clamp(0, self.target());
        if value != self.tracking.value {
            self.tracking.value = value;
            self.dirty = true;
        }
    }

    /// Reveal the achievement without achieving it.
    pub fn discover(&mut self) {
        if self.tracking.state == AchievementState::NotDiscovered {
            self.set_state(AchievementState::Discovered);
        }
    }

    /// Move to `AchievedUnclaimed` without looking at dependencies.
    /// Returns `true` if this call performed the transition.
    pub fn achieve(&mut self) -> bool {
        if self.is_achieved() {
            return false;
        }
        let target = self.target();
        self.set_value(target);
        self.set_state(AchievementState::AchievedUnclaimed);
        self.achieved_now = true;
        metrics::inc_achievements_achieved();
        info!("achievement[{}]: achieved", self.achievement.label());
        true
    }

    /// Achieve only if every dependency holds; otherwise drop the signal.
    pub fn achieve_after_dependency_check(&mut self) -> bool {
        if self.is_achieved() {
            return false;
        }
        if !self.dependencies_fulfilled() {
            debug!(
                "achievement[{}]: dependencies unmet, signal dropped",
                self.achievement.label()
            );
            return false;
        }
        self.achieve()
    }

    /// Add `delta` and achieve once the target is reached. While dependencies
    /// are unmet the delta is dropped.
    pub fn achieve_delta(&mut self, delta: i64) -> bool {
        if self.is_achieved() {
            return false;
        }
        if !self.dependencies_fulfilled() {
            debug!(
                "achievement[{}]: dependencies unmet, delta {} dropped",
                self.achievement.label(),
                delta
            );
            return false;
        }
        let value = self.tracking.value.saturating_add(delta);
        self.set_value(value);
        if self.tracking.value >= self.target() {
            return self.achieve();
        }
        false
    }

    /// Add `delta` even while dependencies are unmet. The kept value completes
    /// the achievement on the first event after the dependencies hold.
    pub fn add_delta_if_not_achieved(&mut self, delta: i64) -> bool {
        if self.is_achieved() {
            return false;
        }
        let value = self.tracking.value.saturating_add(delta);
        self.set_value(value);
        self.retry_completion()
    }

    /// Raise the value to `percent`% of the target; never lowers it.
    pub fn achieve_progress_percent(&mut self, percent: u8) -> bool {
        let percent = i64::from(percent.min(100));
        let value = self.target().saturating_mul(percent) / 100;
        self.raise_value(value)
    }

    /// Raise the value to `value` (monotonic) through the dependency check.
    pub fn raise_value(&mut self, value: i64) -> bool {
        if self.is_achieved() {
            return false;
        }
        if !self.dependencies_fulfilled() {
            return false;
        }
        if value > self.tracking.value {
            self.set_value(value);
        }
        if self.tracking.value >= self.target() {
            return self.achieve();
        }
        false
    }

    /// Complete a value that already reached the target while dependencies
    /// were unmet.
    pub fn retry_completion(&mut self) -> bool {
        if !self.is_achieved() && self.tracking.value >= self.target() {
            return self.achieve_after_dependency_check();
        }
        false
    }
}
