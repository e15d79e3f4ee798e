use crate::mission::Action;
use crate::state::persistent::save;
use crate::state::{PersistentStorage, SystemState};
use tracing::{debug, error};

/// Writes the persistent state back to storage whenever it changed.
pub struct PersistentStateSaveTask {
    storage: Box<dyn PersistentStorage>,
}

impl PersistentStateSaveTask {
    pub fn new(storage: Box<dyn PersistentStorage>) -> Self {
        Self { storage }
    }

    /// Saves the state if it changed since the last successful save.
    ///
    /// Returns whether the storage now holds the current state.
    pub fn flush(&mut self, state: &mut SystemState) -> bool {
        if !state.persistent.is_modified() {
            return true;
        }

        match save(&state.persistent, self.storage.as_mut()) {
            Ok(size) => {
                debug!(size, "persistent state saved");
                state.persistent.mark_saved();
                true
            }
            // Still modified, so the save is retried later.
            Err(err) => {
                error!("unable to save persistent state: {}", err);
                false
            }
        }
    }
}

impl Action<SystemState> for PersistentStateSaveTask {
    fn condition(&self, state: &SystemState) -> bool {
        state.persistent.is_modified()
    }

    fn execute(&mut self, state: &mut SystemState) {
        self.flush(state);
    }
}

impl core::fmt::Debug for PersistentStateSaveTask {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PersistentStateSaveTask").finish_non_exhaustive()
    }
}
