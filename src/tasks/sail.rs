//! Solar sail release sequence.
//!
//! The sequence is a fixed table of power switch operations. Steps without a
//! post-delay run back to back inside one action call; a step with a delay
//! hands control back to the mission loop until the delay has passed.

use crate::devices::{DeviceError, PowerControl, SailChannel};
use super::beacon::rebase;
use crate::mission::{Action, NotifyTimeChanged, Shared, Update, UpdateResult, Verify, VerifyResult};
use crate::state::{SailPersistentState, SailState, SystemState};
use core::time::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

const BURN_TIME: Duration = Duration::from_secs(2 * 60);
const SWITCH_SETTLE_TIME: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SailOperation {
    EnableThermalKnife(SailChannel),
    DisableThermalKnife(SailChannel),
    EnableBurnSwitch(SailChannel),
    DisableBurnSwitch(SailChannel),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SailStep {
    pub operation: SailOperation,
    pub delay_after: Duration,
}

const fn step(operation: SailOperation, delay_after: Duration) -> SailStep {
    SailStep { operation, delay_after }
}

pub const SAIL_STEPS: [SailStep; 8] = [
    step(SailOperation::EnableThermalKnife(SailChannel::Main), SWITCH_SETTLE_TIME),
    step(SailOperation::EnableBurnSwitch(SailChannel::Main), BURN_TIME),
    step(SailOperation::DisableBurnSwitch(SailChannel::Main), Duration::ZERO),
    step(SailOperation::DisableThermalKnife(SailChannel::Main), Duration::ZERO),
    step(SailOperation::EnableThermalKnife(SailChannel::Redundant), SWITCH_SETTLE_TIME),
    step(SailOperation::EnableBurnSwitch(SailChannel::Redundant), BURN_TIME),
    step(SailOperation::DisableBurnSwitch(SailChannel::Redundant), Duration::ZERO),
    step(SailOperation::DisableThermalKnife(SailChannel::Redundant), Duration::ZERO),
];

pub struct SailTask {
    power: Shared<dyn PowerControl>,
    auto_open_time: Option<Duration>,
    step: usize,
    next_step_not_before: Duration,
    in_progress: bool,
    open_requested: bool,
}

impl SailTask {
    pub fn new(power: Shared<dyn PowerControl>, auto_open_time: Option<Duration>) -> Self {
        Self {
            power,
            auto_open_time,
            step: 0,
            next_step_not_before: Duration::ZERO,
            in_progress: false,
            open_requested: false,
        }
    }

    /// Records a request to open the sail, consumed by the next update.
    ///
    /// The next update starts a sequence only if none is running by then; a
    /// running sequence is never restarted. Returns `false` when a sequence
    /// was already running at the time of the request.
    pub fn request_open(&mut self) -> bool {
        self.open_requested = true;
        !self.in_progress
    }

    pub fn has_pending_request(&self) -> bool {
        self.open_requested
    }

    pub fn current_step(&self) -> usize {
        self.step
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress
    }

    fn should_start(&self, state: &SystemState) -> bool {
        match *state.persistent.get::<SailPersistentState>() {
            // Interrupted by a reset, start over.
            SailPersistentState::Opening => true,
            SailPersistentState::Opened => false,
            SailPersistentState::Closed => self.auto_open_time.is_some_and(|at| state.time >= at),
        }
    }

    fn start(&mut self, state: &mut SystemState) {
        info!("sail opening sequence started");
        self.in_progress = true;
        self.step = 0;
        self.next_step_not_before = state.time;
        state.persistent.set(SailPersistentState::Opening);
    }

    fn finish(&mut self, state: &mut SystemState) {
        info!("sail opening sequence complete");
        self.in_progress = false;
        state.sail_state = SailState::OpeningStopped;
        state.persistent.set(SailPersistentState::Opened);
    }

    fn perform(&mut self, operation: SailOperation) -> Result<(), DeviceError> {
        let mut power = self.power.borrow_mut();
        match operation {
            SailOperation::EnableThermalKnife(channel) => power.set_thermal_knife(channel, true),
            SailOperation::DisableThermalKnife(channel) => power.set_thermal_knife(channel, false),
            SailOperation::EnableBurnSwitch(channel) => power.set_burn_switch(channel, true),
            SailOperation::DisableBurnSwitch(channel) => power.set_burn_switch(channel, false),
        }
    }
}

impl Update<SystemState> for SailTask {
    fn update(&mut self, state: &mut SystemState) -> UpdateResult {
        let requested = core::mem::take(&mut self.open_requested);
        if self.in_progress {
            if requested {
                debug!(step = self.step, "sail opening already in progress, request dropped");
            }
        } else if requested || self.should_start(state) {
            self.start(state);
        }

        state.sail_state = if self.in_progress {
            SailState::Opening
        } else if *state.persistent.get::<SailPersistentState>() == SailPersistentState::Opened {
            SailState::OpeningStopped
        } else {
            SailState::Waiting
        };

        UpdateResult::Ok
    }
}

impl Action<SystemState> for SailTask {
    fn condition(&self, state: &SystemState) -> bool {
        self.in_progress && state.time >= self.next_step_not_before && self.step < SAIL_STEPS.len()
    }

    fn execute(&mut self, state: &mut SystemState) {
        while let Some(&SailStep { operation, delay_after }) = SAIL_STEPS.get(self.step) {
            if let Err(err) = self.perform(operation) {
                // Same step is retried next cycle.
                error!(step = self.step, ?operation, "sail step failed: {}", err);
                return;
            }

            debug!(step = self.step, ?operation, "sail step done");
            self.step += 1;

            if delay_after > Duration::ZERO {
                self.next_step_not_before = state.time + delay_after;
                break;
            }
        }

        if self.step >= SAIL_STEPS.len() {
            self.finish(state);
        }
    }
}

impl NotifyTimeChanged for SailTask {
    fn on_time_changed(&mut self, previous: Duration, current: Duration) {
        if self.in_progress {
            self.next_step_not_before = rebase(self.next_step_not_before, previous, current);
        }
    }
}

/// Checks the volatile sail state against what is persisted.
#[derive(Debug, Default, Clone, Copy)]
pub struct SailConsistencyVerify;

impl Verify<SystemState> for SailConsistencyVerify {
    fn verify(&self, state: &SystemState) -> VerifyResult {
        let persisted = *state.persistent.get::<SailPersistentState>();
        let consistent = matches!(
            (state.sail_state, persisted),
            (SailState::Waiting, SailPersistentState::Closed)
                | (SailState::Opening, SailPersistentState::Opening)
                | (SailState::OpeningStopped, SailPersistentState::Opened)
        );

        if consistent {
            VerifyResult::Ok
        } else {
            VerifyResult::Failure
        }
    }
}

impl core::fmt::Debug for SailTask {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SailTask")
            .field("auto_open_time", &self.auto_open_time)
            .field("step", &self.step)
            .field("next_step_not_before", &self.next_step_not_before)
            .field("in_progress", &self.in_progress)
            .field("open_requested", &self.open_requested)
            .finish_non_exhaustive()
    }
}
