use thiserror::Error;

use crate::achievement::AchievementState;
use crate::store::DataCorruptError;

/// Errors that can arise while bootstrapping or driving the achievement engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A compacted store could not be decoded.
    #[error("corrupt store data: {0}")]
    DataCorrupt(#[from] DataCorruptError),

    /// Wrapper around IO errors from the persistence backend.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrapper around seed / persistence file parse errors.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Returned when no holder is registered for a game type.
    #[error("unknown holder: {0}")]
    UnknownHolder(String),

    /// Returned when an achievement id does not exist inside a holder.
    #[error("unknown achievement {game_type}#{id}")]
    UnknownAchievement { game_type: String, id: u32 },

    /// Two achievements of one holder share an id.
    #[error("duplicate achievement {game_type}#{id}")]
    DuplicateAchievement { game_type: String, id: u32 },

    /// Claim attempted from a state other than achieved-unclaimed.
    #[error("achievement {id} cannot be claimed while {state:?}")]
    NotClaimable { id: u32, state: AchievementState },

    /// A game instance was closed a second time.
    #[error("game instance {0} is already closed")]
    InstanceClosed(String),

    /// A dependency referent was not registered when dependencies were wired.
    #[error("missing dependency: {0}")]
    MissingDependency(String),

    /// Bootstrap phases were run out of order.
    #[error("bootstrap order violated: {0}")]
    BootstrapOrder(String),

    /// A listener reported a failure while handling a change event.
    #[error("listener failure: {0}")]
    Listener(String),

    /// Seed or configuration content is structurally valid but unusable.
    #[error("invalid configuration: {0}")]
    Config(String),
}
