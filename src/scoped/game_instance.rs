use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, warn};

use crate::errors::EngineError;
use crate::metrics;
use crate::store::{ChangeKind, DataCorruptError, PropertyStore, UpdatePolicy};

/// Written once by [`GameInstanceData::close`].
pub const KEY_SOLVED_LEVEL: &str = "solved_level";
/// Set to 1 when the instance is closed; survives a save/load cycle.
pub const KEY_CLOSED: &str = "closed";
/// Level passed to `close` when the player gave up or lost.
pub const LEVEL_NOT_SOLVED: i64 = 0;

pub fn instance_store_name(game_type: &str) -> String {
    format!("{game_type}.instance")
}

/// Data of the current play session of one game type.
///
/// The game writes telemetry while the session is open and calls
/// [`close`](Self::close) exactly once at the end. [`load`](Self::load)
/// starts the next session (fresh or resumed) on the same store, so
/// achievements subscribed once keep observing every session.
#[derive(Debug)]
pub struct GameInstanceData {
    game_type: String,
    store: Arc<PropertyStore>,
    closed: AtomicBool,
}

impl GameInstanceData {
    pub fn new(game_type: &str) -> Self {
        Self {
            game_type: game_type.to_string(),
            store: Arc::new(PropertyStore::new(&instance_store_name(game_type))),
            closed: AtomicBool::new(false),
        }
    }

    pub fn game_type(&self) -> &str {
        &self.game_type
    }

    pub fn store(&self) -> &Arc<PropertyStore> {
        &self.store
    }

    /// Begin a session. `None` starts fresh; `Some` resumes a saved one.
    ///
    /// Listeners are not notified. Corrupt data leaves a fresh open session
    /// behind and the decode error is returned so the caller can log it.
    pub fn load(&self, compacted: Option<&str>) -> Result<(), DataCorruptError> {
        metrics::record_session_open(&self.game_type);
        let result = match compacted {
            None => {
                self.store.restore_or_reset(None);
                Ok(())
            }
            Some(data) => self.store.restore_from(data).inspect_err(|e| {
                warn!(
                    "instance[{}]: cannot resume session ({}), starting fresh",
                    self.game_type, e
                );
                self.store.restore_or_reset(None);
            }),
        };
        let closed = self.store.get_value(KEY_CLOSED, 0) != 0;
        self.closed.store(closed, Ordering::SeqCst);
        debug!("instance[{}]: session loaded (closed={})", self.game_type, closed);
        result
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn solved_level(&self) -> i64 {
        self.store.get_value(KEY_SOLVED_LEVEL, LEVEL_NOT_SOLVED)
    }

    pub fn is_solved(&self) -> bool {
        self.solved_level() > LEVEL_NOT_SOLVED
    }

    /// Close the session with `solved_level` ([`LEVEL_NOT_SOLVED`] when the
    /// game was lost). Emits a single `Close` event. A second call is
    /// rejected and emits nothing.
    pub fn close(&self, solved_level: i64) -> Result<(), EngineError> {
        if self
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("instance[{}]: ignoring second close", self.game_type);
            return Err(EngineError::InstanceClosed(self.game_type.clone()));
        }
        metrics::record_session_close(&self.game_type, solved_level > LEVEL_NOT_SOLVED);
        let _close = self.store.silent(ChangeKind::Close);
        self.store.put_values(&[
            (KEY_SOLVED_LEVEL, solved_level, UpdatePolicy::Always),
            (KEY_CLOSED, 1, UpdatePolicy::Always),
        ]);
        Ok(())
    }
}

impl Deref for GameInstanceData {
    type Target = PropertyStore;

    fn deref(&self) -> &PropertyStore {
        &self.store
    }
}
