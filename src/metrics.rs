//! Process-wide engine counters.
//! Cheap relaxed atomics; read them through [`snapshot`].
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

static EVENTS_DISPATCHED: AtomicU64 = AtomicU64::new(0);
static LISTENER_FAILURES: AtomicU64 = AtomicU64::new(0);
static ACHIEVEMENTS_ACHIEVED: AtomicU64 = AtomicU64::new(0);
static REWARDS_CLAIMED: AtomicU64 = AtomicU64::new(0);
static REWARD_POINTS_GRANTED: AtomicU64 = AtomicU64::new(0);
static CORRUPT_LOADS: AtomicU64 = AtomicU64::new(0);
static DAILY_RESETS: AtomicU64 = AtomicU64::new(0);

static SESSION_COUNTERS: OnceLock<Mutex<HashMap<String, SessionCounter>>> = OnceLock::new();

pub fn inc_events_dispatched() {
    EVENTS_DISPATCHED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_listener_failures() {
    LISTENER_FAILURES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_achievements_achieved() {
    ACHIEVEMENTS_ACHIEVED.fetch_add(1, Ordering::Relaxed);
}
pub fn record_reward_claimed(points: u32) {
    REWARDS_CLAIMED.fetch_add(1, Ordering::Relaxed);
    REWARD_POINTS_GRANTED.fetch_add(points as u64, Ordering::Relaxed);
}
pub fn inc_corrupt_loads() {
    CORRUPT_LOADS.fetch_add(1, Ordering::Relaxed);
}
pub fn add_daily_resets(count: u64) {
    DAILY_RESETS.fetch_add(count, Ordering::Relaxed);
}

/// Per game type session bookkeeping, fed by game instance open/close.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionCounter {
    pub opened: u64,
    pub closed: u64,
    pub solved: u64,
}

fn session_counter_lock() -> &'static Mutex<HashMap<String, SessionCounter>> {
    SESSION_COUNTERS.get_or_init(|| Mutex::new(HashMap::new()))
}

pub fn record_session_open(game_type: &str) -> SessionCounter {
    let mut guard = session_counter_lock()
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let counter = guard.entry(game_type.to_string()).or_default();
    counter.opened = counter.opened.saturating_add(1);
    *counter
}

pub fn record_session_close(game_type: &str, solved: bool) -> SessionCounter {
    let mut guard = session_counter_lock()
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let counter = guard.entry(game_type.to_string()).or_default();
    counter.closed = counter.closed.saturating_add(1);
    if solved {
        counter.solved = counter.solved.saturating_add(1);
    }
    *counter
}

pub fn session_counters_snapshot() -> HashMap<String, SessionCounter> {
    session_counter_lock()
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .clone()
}

#[derive(Debug, Default, Clone)]
pub struct Snapshot {
    pub events_dispatched: u64,
    pub listener_failures: u64,
    pub achievements_achieved: u64,
    pub rewards_claimed: u64,
    pub reward_points_granted: u64,
    pub corrupt_loads: u64,
    pub daily_resets: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        events_dispatched: EVENTS_DISPATCHED.load(Ordering::Relaxed),
        listener_failures: LISTENER_FAILURES.load(Ordering::Relaxed),
        achievements_achieved: ACHIEVEMENTS_ACHIEVED.load(Ordering::Relaxed),
        rewards_claimed: REWARDS_CLAIMED.load(Ordering::Relaxed),
        reward_points_granted: REWARD_POINTS_GRANTED.load(Ordering::Relaxed),
        corrupt_loads: CORRUPT_LOADS.load(Ordering::Relaxed),
        daily_resets: DAILY_RESETS.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_open_close_updates_counters() {
        // Unique slug so parallel tests touching the shared table do not interfere.
        let slug = "metrics-test-game";
        let opened = record_session_open(slug);
        assert_eq!(opened.opened, 1);
        assert_eq!(opened.closed, 0);

        let closed = record_session_close(slug, true);
        assert_eq!(closed.closed, 1);
        assert_eq!(closed.solved, 1);

        let snapshot = session_counters_snapshot();
        let counter = snapshot.get(slug).expect("counter for slug");
        assert_eq!(counter.opened, 1);
        assert_eq!(counter.solved, 1);
    }

    #[test]
    fn counters_are_monotonic() {
        let before = snapshot();
        inc_corrupt_loads();
        record_reward_claimed(25);
        let after = snapshot();
        assert!(after.corrupt_loads > before.corrupt_loads);
        assert!(after.reward_points_granted >= before.reward_points_granted + 25);
    }
}
