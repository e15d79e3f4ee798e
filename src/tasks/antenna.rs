use super::beacon::rebase;
use crate::devices::AntennaDriver;
use crate::mission::{Action, NotifyTimeChanged, Update, UpdateResult};
use crate::state::{AntennaConfiguration, AntennaState, SystemState};
use core::time::Duration;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AntennaDeploymentConfig {
    /// Radio silence required after launch before anything is deployed.
    pub silent_period: Duration,
    pub retry_interval: Duration,
    pub max_attempts: u8,
}

impl Default for AntennaDeploymentConfig {
    fn default() -> Self {
        Self {
            silent_period: Duration::from_secs(30 * 60),
            retry_interval: Duration::from_secs(60),
            max_attempts: 8,
        }
    }
}

/// Mirrors antenna hardware status and deploys the antennas once the
/// silent period is over.
pub struct AntennaTask {
    driver: Box<dyn AntennaDriver>,
    config: AntennaDeploymentConfig,
    attempts: u8,
    next_attempt_not_before: Duration,
}

impl AntennaTask {
    pub fn new(driver: Box<dyn AntennaDriver>, config: AntennaDeploymentConfig) -> Self {
        Self {
            driver,
            config,
            attempts: 0,
            next_attempt_not_before: Duration::ZERO,
        }
    }

    pub fn attempts(&self) -> u8 {
        self.attempts
    }
}

impl Update<SystemState> for AntennaTask {
    fn update(&mut self, state: &mut SystemState) -> UpdateResult {
        match self.driver.deployment_status() {
            Ok(status) => {
                state.antenna_state = AntennaState::from_deployment_state(status);
                UpdateResult::Ok
            }
            Err(err) => {
                error!("unable to read antenna deployment status: {}", err);
                UpdateResult::Failure
            }
        }
    }
}

impl Action<SystemState> for AntennaTask {
    fn condition(&self, state: &SystemState) -> bool {
        if state.persistent.get::<AntennaConfiguration>().deployment_disabled {
            return false;
        }

        !state.antenna_state.deployed
            && state.time >= self.config.silent_period
            && state.time >= self.next_attempt_not_before
            && self.attempts < self.config.max_attempts
    }

    fn execute(&mut self, state: &mut SystemState) {
        self.attempts += 1;
        self.next_attempt_not_before = state.time + self.config.retry_interval;

        match self.driver.deploy() {
            Ok(()) => info!(attempt = self.attempts, "antenna deployment started"),
            Err(err) => warn!(attempt = self.attempts, "antenna deployment request failed: {}", err),
        }

        if self.attempts >= self.config.max_attempts {
            error!(attempts = self.attempts, "antenna deployment attempts exhausted");
        }
    }
}

impl NotifyTimeChanged for AntennaTask {
    fn on_time_changed(&mut self, previous: Duration, current: Duration) {
        if self.attempts > 0 {
            self.next_attempt_not_before = rebase(self.next_attempt_not_before, previous, current);
        }
    }
}

impl core::fmt::Debug for AntennaTask {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AntennaTask")
            .field("config", &self.config)
            .field("attempts", &self.attempts)
            .field("next_attempt_not_before", &self.next_attempt_not_before)
            .finish_non_exhaustive()
    }
}
