//! Read-only preconditions that gate achieving.
//!
//! A [`Dependency`] is evaluated every time an achievement wants to move to
//! `AchievedUnclaimed` through a dependency-checked path. Evaluation never
//! takes an achievement lock: achievement predicates read the lock-free
//! [`StatusCell`] of their referent, feature predicates ask the injected
//! [`FeatureOracle`].

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock};

use log::warn;

use crate::achievement::{AchievementState, StatusCell};
use crate::errors::EngineError;

pub trait Dependency: Send + Sync + fmt::Debug {
    fn evaluate(&self) -> bool;

    /// Short human readable form, used in logs and error messages.
    fn describe(&self) -> String;

    /// `(game_type, id)` of the achievement this predicate reads, if any.
    /// Bootstrap uses it to reject cyclic dependency graphs.
    fn referent(&self) -> Option<(String, u32)> {
        None
    }
}

/// Purchase and unlock queries answered by the host application.
pub trait FeatureOracle: Send + Sync {
    fn is_purchased(&self, feature: &str) -> bool;
    fn is_unlocked(&self, game_type: &str) -> bool;

    /// Whether `feature` is a key the host knows about at all.
    fn knows_feature(&self, _feature: &str) -> bool {
        true
    }
}

/// In-memory [`FeatureOracle`] for embedding and tests.
#[derive(Debug, Default)]
pub struct FeatureFlags {
    purchased: RwLock<HashSet<String>>,
    unlocked: RwLock<HashSet<String>>,
}

impl FeatureFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn purchase(&self, feature: &str) {
        self.purchased
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(feature.to_string());
    }

    pub fn unlock(&self, game_type: &str) {
        self.unlocked
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(game_type.to_string());
    }
}

impl FeatureOracle for FeatureFlags {
    fn is_purchased(&self, feature: &str) -> bool {
        self.purchased
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains(feature)
    }

    fn is_unlocked(&self, game_type: &str) -> bool {
        self.unlocked
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains(game_type)
    }
}

#[derive(Debug)]
pub struct AchievementAchieved {
    game_type: String,
    id: u32,
    status: Arc<StatusCell>,
}

impl Dependency for AchievementAchieved {
    fn evaluate(&self) -> bool {
        self.status.get().is_achieved()
    }

    fn describe(&self) -> String {
        format!("achieved {}#{}", self.game_type, self.id)
    }

    fn referent(&self) -> Option<(String, u32)> {
        Some((self.game_type.clone(), self.id))
    }
}

#[derive(Debug)]
pub struct AchievementClaimed {
    game_type: String,
    id: u32,
    status: Arc<StatusCell>,
}

impl Dependency for AchievementClaimed {
    fn evaluate(&self) -> bool {
        self.status.get() == AchievementState::AchievedClaimed
    }

    fn describe(&self) -> String {
        format!("claimed {}#{}", self.game_type, self.id)
    }

    fn referent(&self) -> Option<(String, u32)> {
        Some((self.game_type.clone(), self.id))
    }
}

pub struct FeaturePurchased {
    feature: String,
    oracle: Arc<dyn FeatureOracle>,
}

impl fmt::Debug for FeaturePurchased {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeaturePurchased")
            .field("feature", &self.feature)
            .finish()
    }
}

impl Dependency for FeaturePurchased {
    fn evaluate(&self) -> bool {
        self.oracle.is_purchased(&self.feature)
    }

    fn describe(&self) -> String {
        format!("purchased {}", self.feature)
    }
}

pub struct TypeUnlocked {
    game_type: String,
    oracle: Arc<dyn FeatureOracle>,
}

impl fmt::Debug for TypeUnlocked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeUnlocked")
            .field("game_type", &self.game_type)
            .finish()
    }
}

impl Dependency for TypeUnlocked {
    fn evaluate(&self) -> bool {
        self.oracle.is_unlocked(&self.game_type)
    }

    fn describe(&self) -> String {
        format!("unlocked {}", self.game_type)
    }
}

/// Builds dependencies once every holder has made its achievements.
///
/// The plain constructors return `None` when the referent is unknown. The
/// `require_*` variants turn that into [`EngineError::MissingDependency`];
/// holders use those, so a dangling reference fails the bootstrap.
pub struct DependencyFactory {
    statuses: BTreeMap<(String, u32), Arc<StatusCell>>,
    known_types: HashSet<String>,
    oracle: Arc<dyn FeatureOracle>,
}

impl DependencyFactory {
    pub fn new(
        statuses: BTreeMap<(String, u32), Arc<StatusCell>>,
        oracle: Arc<dyn FeatureOracle>,
    ) -> Self {
        let known_types = statuses.keys().map(|(t, _)| t.clone()).collect();
        Self {
            statuses,
            known_types,
            oracle,
        }
    }

    fn status(&self, game_type: &str, id: u32) -> Option<Arc<StatusCell>> {
        self.statuses.get(&(game_type.to_string(), id)).cloned()
    }

    pub fn achievement_achieved(&self, game_type: &str, id: u32) -> Option<Arc<dyn Dependency>> {
        let status = self.status(game_type, id)?;
        Some(Arc::new(AchievementAchieved {
            game_type: game_type.to_string(),
            id,
            status,
        }))
    }

    pub fn achievement_claimed(&self, game_type: &str, id: u32) -> Option<Arc<dyn Dependency>> {
        let status = self.status(game_type, id)?;
        Some(Arc::new(AchievementClaimed {
            game_type: game_type.to_string(),
            id,
            status,
        }))
    }

    pub fn feature_purchased(&self, feature: &str) -> Option<Arc<dyn Dependency>> {
        if !self.oracle.knows_feature(feature) {
            return None;
        }
        Some(Arc::new(FeaturePurchased {
            feature: feature.to_string(),
            oracle: Arc::clone(&self.oracle),
        }))
    }

    pub fn type_unlocked(&self, game_type: &str) -> Option<Arc<dyn Dependency>> {
        if !self.known_types.contains(game_type) {
            return None;
        }
        Some(Arc::new(TypeUnlocked {
            game_type: game_type.to_string(),
            oracle: Arc::clone(&self.oracle),
        }))
    }

    pub fn require_achieved(&self, game_type: &str, id: u32) -> Result<Arc<dyn Dependency>, EngineError> {
        require(self.achievement_achieved(game_type, id), || {
            format!("achievement {game_type}#{id} is not registered")
        })
    }

    pub fn require_claimed(&self, game_type: &str, id: u32) -> Result<Arc<dyn Dependency>, EngineError> {
        require(self.achievement_claimed(game_type, id), || {
            format!("achievement {game_type}#{id} is not registered")
        })
    }

    pub fn require_purchased(&self, feature: &str) -> Result<Arc<dyn Dependency>, EngineError> {
        require(self.feature_purchased(feature), || {
            format!("feature {feature} is unknown")
        })
    }

    pub fn require_unlocked(&self, game_type: &str) -> Result<Arc<dyn Dependency>, EngineError> {
        require(self.type_unlocked(game_type), || {
            format!("game type {game_type} has no holder")
        })
    }
}

fn require(
    dependency: Option<Arc<dyn Dependency>>,
    what: impl FnOnce() -> String,
) -> Result<Arc<dyn Dependency>, EngineError> {
    dependency.ok_or_else(|| {
        let what = what();
        warn!("registry: missing dependency: {}", what);
        EngineError::MissingDependency(what)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory(oracle: Arc<FeatureFlags>) -> (DependencyFactory, Arc<StatusCell>) {
        let cell = Arc::new(StatusCell::new(AchievementState::Discovered));
        let mut statuses = BTreeMap::new();
        statuses.insert(("slots".to_string(), 1), Arc::clone(&cell));
        (DependencyFactory::new(statuses, oracle), cell)
    }

    #[test]
    fn achievement_predicates_follow_status() {
        let (deps, cell) = factory(Arc::new(FeatureFlags::new()));
        let achieved = deps.achievement_achieved("slots", 1).unwrap();
        let claimed = deps.achievement_claimed("slots", 1).unwrap();
        assert!(!achieved.evaluate());

        cell.set(AchievementState::AchievedUnclaimed);
        assert!(achieved.evaluate());
        assert!(!claimed.evaluate());

        cell.set(AchievementState::AchievedClaimed);
        assert!(achieved.evaluate() && claimed.evaluate());
        assert_eq!(claimed.describe(), "claimed slots#1");
        assert_eq!(achieved.referent(), Some(("slots".to_string(), 1)));
    }

    #[test]
    fn unknown_referents_yield_none_or_error() {
        let (deps, _) = factory(Arc::new(FeatureFlags::new()));
        assert!(deps.achievement_achieved("slots", 2).is_none());
        assert!(deps.type_unlocked("chess").is_none());
        assert!(matches!(
            deps.require_achieved("chess", 1),
            Err(EngineError::MissingDependency(_))
        ));
    }

    #[test]
    fn feature_predicates_ask_the_oracle() {
        let flags = Arc::new(FeatureFlags::new());
        let (deps, _) = factory(Arc::clone(&flags));
        let bought = deps.require_purchased("pro_pack").unwrap();
        let unlocked = deps.require_unlocked("slots").unwrap();
        assert!(!bought.evaluate() && !unlocked.evaluate());
        assert!(bought.referent().is_none() && unlocked.referent().is_none());
        flags.purchase("pro_pack");
        flags.unlock("slots");
        assert!(bought.evaluate() && unlocked.evaluate());
    }
}
