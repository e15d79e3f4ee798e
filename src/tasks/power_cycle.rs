use super::beacon::rebase;
use crate::devices::{PowerControl, ScrubbingStatus};
use crate::mission::{Action, NotifyTimeChanged, Shared};
use crate::state::SystemState;
use core::cell::Cell;
use core::time::Duration;
use std::sync::Arc;
use tracing::{error, info};

pub const DEFAULT_POWER_CYCLE_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// Power cycles the OBC once a day, unless a scrubber is busy.
pub struct PeriodicPowerCycleTask {
    power: Shared<dyn PowerControl>,
    scrubbing: Arc<ScrubbingStatus>,
    period: Duration,
    boot_time: Cell<Option<Duration>>,
}

impl PeriodicPowerCycleTask {
    pub fn new(power: Shared<dyn PowerControl>, scrubbing: Arc<ScrubbingStatus>, period: Duration) -> Self {
        Self {
            power,
            scrubbing,
            period,
            boot_time: Cell::new(None),
        }
    }

    pub fn boot_time(&self) -> Option<Duration> {
        self.boot_time.get()
    }
}

impl Action<SystemState> for PeriodicPowerCycleTask {
    fn condition(&self, state: &SystemState) -> bool {
        let boot_time = match self.boot_time.get() {
            Some(boot_time) => boot_time,
            None => {
                self.boot_time.set(Some(state.time));
                state.time
            }
        };

        state.time.saturating_sub(boot_time) >= self.period && !self.scrubbing.any_in_progress()
    }

    fn execute(&mut self, _state: &mut SystemState) {
        info!("triggering periodic power cycle");
        if let Err(err) = self.power.borrow_mut().power_cycle() {
            error!("periodic power cycle failed: {}", err);
        }
    }
}

impl NotifyTimeChanged for PeriodicPowerCycleTask {
    fn on_time_changed(&mut self, previous: Duration, current: Duration) {
        self.boot_time.set(self.boot_time.get().map(|boot| rebase(boot, previous, current)));
    }
}

impl core::fmt::Debug for PeriodicPowerCycleTask {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PeriodicPowerCycleTask")
            .field("period", &self.period)
            .field("boot_time", &self.boot_time.get())
            .finish_non_exhaustive()
    }
}
