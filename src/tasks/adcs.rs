use crate::devices::AdcsCoordinator;
use crate::mission::{ActionDescriptor, CompositeAction, Shared, Update, UpdateResult};
use crate::state::{AdcsConfiguration, AdcsMode, SystemState};
use core::time::Duration;
use serde::{Deserialize, Serialize};
use std::rc::Rc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetumblingWindow {
    /// Earliest mission time detumbling may start.
    pub start_delay: Duration,
    /// Mission time after which detumbling is stopped.
    pub window_end: Duration,
}

impl Default for DetumblingWindow {
    fn default() -> Self {
        Self {
            start_delay: Duration::from_secs(40 * 60),
            window_end: Duration::from_secs(3 * 60 * 60),
        }
    }
}

/// Mirrors the coordinator mode into `SystemState::adcs_mode`.
pub struct AdcsModeUpdate {
    coordinator: Shared<dyn AdcsCoordinator>,
}

impl AdcsModeUpdate {
    pub fn new(coordinator: Shared<dyn AdcsCoordinator>) -> Self {
        Self { coordinator }
    }
}

impl Update<SystemState> for AdcsModeUpdate {
    fn update(&mut self, state: &mut SystemState) -> UpdateResult {
        state.adcs_mode = self.coordinator.borrow().current_mode();
        UpdateResult::Ok
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DetumblingState {
    #[default]
    Idle,
    Detumbling,
    Finished,
}

/// Runs built-in detumbling inside the configured mission-time window.
///
/// Start and stop are separate actions sharing one scheduling slot. Both
/// are retried every cycle until the coordinator accepts the request.
pub struct AdcsPrimaryTask {
    coordinator: Shared<dyn AdcsCoordinator>,
    window: DetumblingWindow,
    detumbling: DetumblingState,
}

impl AdcsPrimaryTask {
    pub fn new(coordinator: Shared<dyn AdcsCoordinator>, window: DetumblingWindow) -> Self {
        Self {
            coordinator,
            window,
            detumbling: DetumblingState::Idle,
        }
    }

    pub fn detumbling_state(&self) -> DetumblingState {
        self.detumbling
    }

    pub fn can_start(&self, state: &SystemState) -> bool {
        state.time >= self.window.start_delay
            && state.time < self.window.window_end
            && state.adcs_mode == AdcsMode::Stopped
            && state.antenna_state.deployed
            && !state.persistent.get::<AdcsConfiguration>().builtin_detumbling_disabled
    }

    pub fn start(&mut self, _state: &mut SystemState) {
        match self.coordinator.borrow_mut().enable_builtin_detumbling() {
            Ok(()) => {
                info!("builtin detumbling enabled");
                self.detumbling = DetumblingState::Detumbling;
            }
            Err(err) => warn!("unable to enable builtin detumbling: {}", err),
        }
    }

    pub fn can_stop(&self, state: &SystemState) -> bool {
        state.time >= self.window.window_end
            && self.detumbling == DetumblingState::Detumbling
            && state.adcs_mode != AdcsMode::Stopped
    }

    pub fn stop(&mut self, _state: &mut SystemState) {
        match self.coordinator.borrow_mut().stop() {
            Ok(()) => {
                info!("detumbling window over, adcs stopped");
                self.detumbling = DetumblingState::Finished;
            }
            Err(err) => warn!("unable to stop adcs: {}", err),
        }
    }

    pub fn build_action(task: &Shared<Self>) -> ActionDescriptor<SystemState> {
        let start_condition = Rc::clone(task);
        let start_action = Rc::clone(task);
        let stop_condition = Rc::clone(task);
        let stop_action = Rc::clone(task);

        CompositeAction::new(
            "adcs.detumbling",
            [
                ActionDescriptor::new(
                    "adcs.detumbling.start",
                    move |state: &SystemState| start_condition.borrow().can_start(state),
                    move |state: &mut SystemState| start_action.borrow_mut().start(state),
                ),
                ActionDescriptor::new(
                    "adcs.detumbling.stop",
                    move |state: &SystemState| stop_condition.borrow().can_stop(state),
                    move |state: &mut SystemState| stop_action.borrow_mut().stop(state),
                ),
            ],
        )
        .build()
    }
}

impl core::fmt::Debug for AdcsPrimaryTask {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AdcsPrimaryTask")
            .field("window", &self.window)
            .field("detumbling", &self.detumbling)
            .finish_non_exhaustive()
    }
}
