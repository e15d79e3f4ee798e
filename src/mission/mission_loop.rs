use super::descriptor::{ActionDescriptor, UpdateDescriptor, UpdateResult, VerifyDescriptor, VerifyResult};
use core::time::Duration;
use embedded_hal::delay::DelayNs;
use heapless::Vec;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, warn};

pub const MAX_UPDATES: usize = 16;
pub const MAX_VERIFIES: usize = 8;
pub const MAX_ACTIONS: usize = 32;

pub const DEFAULT_CYCLE_PERIOD: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MissionError {
    #[error("update table full, cannot register '{0}'")]
    TooManyUpdates(&'static str),
    #[error("verify table full, cannot register '{0}'")]
    TooManyVerifies(&'static str),
    #[error("action table full, cannot register '{0}'")]
    TooManyActions(&'static str),
    #[error("time observer table full")]
    TooManyTimeObservers,
}

/// Outcome of one mission cycle, in execution order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub updates: Vec<(&'static str, UpdateResult), MAX_UPDATES>,
    pub verifications: Vec<(&'static str, VerifyResult), MAX_VERIFIES>,
    pub executed: Vec<&'static str, MAX_ACTIONS>,
}

impl CycleReport {
    pub fn update_result(&self, name: &str) -> Option<UpdateResult> {
        self.updates.iter().find(|(n, _)| *n == name).map(|(_, result)| *result)
    }

    pub fn was_executed(&self, name: &str) -> bool {
        self.executed.iter().any(|executed| *executed == name)
    }

    pub fn has_failures(&self) -> bool {
        self.updates.iter().any(|(_, result)| *result == UpdateResult::Failure)
            || self.verifications.iter().any(|(_, result)| *result == VerifyResult::Failure)
    }
}

/// Periodic update / verify / dispatch cycle over a state `S`.
///
/// The loop owns the state. Descriptors only borrow it for the duration of
/// a single call, and run in the order they were registered.
pub struct MissionLoop<S> {
    state: S,
    updates: Vec<UpdateDescriptor<S>, MAX_UPDATES>,
    verifies: Vec<VerifyDescriptor<S>, MAX_VERIFIES>,
    actions: Vec<ActionDescriptor<S>, MAX_ACTIONS>,
    period: Duration,
    cycle_count: u64,
}

impl<S: 'static> MissionLoop<S> {
    pub fn new(state: S, period: Duration) -> Self {
        Self {
            state,
            updates: Vec::new(),
            verifies: Vec::new(),
            actions: Vec::new(),
            period,
            cycle_count: 0,
        }
    }

    pub fn add_update(&mut self, update: UpdateDescriptor<S>) -> Result<(), MissionError> {
        self.updates
            .push(update)
            .map_err(|rejected| MissionError::TooManyUpdates(rejected.name()))
    }

    pub fn add_verify(&mut self, verify: VerifyDescriptor<S>) -> Result<(), MissionError> {
        self.verifies
            .push(verify)
            .map_err(|rejected| MissionError::TooManyVerifies(rejected.name()))
    }

    pub fn add_action(&mut self, action: ActionDescriptor<S>) -> Result<(), MissionError> {
        self.actions
            .push(action)
            .map_err(|rejected| MissionError::TooManyActions(rejected.name()))
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    /// Direct access between cycles, for commands arriving from outside the loop.
    pub fn state_mut(&mut self) -> &mut S {
        &mut self.state
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    pub fn action_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.actions.iter().map(ActionDescriptor::name)
    }

    pub fn run_cycle(&mut self) -> CycleReport {
        self.cycle_count += 1;
        let mut report = CycleReport {
            cycle: self.cycle_count,
            ..CycleReport::default()
        };

        for update in &mut self.updates {
            let result = update.run(&mut self.state);
            match result {
                UpdateResult::Ok => {}
                UpdateResult::Warning => warn!(name = update.name(), "update finished with warning"),
                UpdateResult::Failure => error!(name = update.name(), "update failed"),
            }
            // Report capacity matches the update table.
            let _ = report.updates.push((update.name(), result));
        }

        for verify in &self.verifies {
            let result = verify.run(&self.state);
            if result == VerifyResult::Failure {
                warn!(name = verify.name(), "state verification failed");
            }
            let _ = report.verifications.push((verify.name(), result));
        }

        let mut runnable: Vec<usize, MAX_ACTIONS> = Vec::new();
        for (index, action) in self.actions.iter().enumerate() {
            if action.is_runnable(&self.state) {
                let _ = runnable.push(index);
            }
        }

        debug_assert!(runnable.windows(2).all(|pair| pair[0] < pair[1]));

        // Conditions are not re-checked: the runnable set is fixed for the cycle.
        for index in runnable {
            let action = &mut self.actions[index];
            debug!(name = action.name(), "executing action");
            action.execute(&mut self.state);
            let _ = report.executed.push(action.name());
        }

        debug!(
            cycle = report.cycle,
            executed = report.executed.len(),
            "mission cycle complete"
        );

        report
    }

    /// Runs cycles back to back, sleeping one period after each, until
    /// `keep_running` returns `false`.
    pub fn run<D: DelayNs>(
        &mut self,
        delay: &mut D,
        mut keep_running: impl FnMut(&CycleReport, &S) -> bool,
    ) {
        let period_ms = u32::try_from(self.period.as_millis()).unwrap_or(u32::MAX);

        loop {
            let report = self.run_cycle();
            if !keep_running(&report, &self.state) {
                break;
            }
            delay.delay_ms(period_ms);
        }
    }
}

impl<S: core::fmt::Debug> core::fmt::Debug for MissionLoop<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MissionLoop")
            .field("state", &self.state)
            .field("updates", &self.updates.len())
            .field("verifies", &self.verifies.len())
            .field("actions", &self.actions.len())
            .field("period", &self.period)
            .field("cycle_count", &self.cycle_count)
            .finish()
    }
}
