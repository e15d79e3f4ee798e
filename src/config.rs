//! Mission tunables, loaded from JSON.

use crate::comm::{CommConfig, DEFAULT_SECURITY_CODE};
use crate::tasks::{AntennaDeploymentConfig, DetumblingWindow};
use core::time::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MissionConfig {
    pub cycle_period_ms: u64,
    pub antenna_silent_period_s: u64,
    pub antenna_retry_interval_s: u64,
    pub antenna_max_attempts: u8,
    pub detumbling_start_delay_s: u64,
    pub detumbling_window_end_s: u64,
    pub beacon_interval_s: u64,
    /// Mission time of the automatic sail opening; `None` waits for a command.
    pub sail_auto_open_s: Option<u64>,
    pub power_cycle_period_s: u64,
    pub security_code: u32,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            cycle_period_ms: 10_000,
            antenna_silent_period_s: 30 * 60,
            antenna_retry_interval_s: 60,
            antenna_max_attempts: 8,
            detumbling_start_delay_s: 40 * 60,
            detumbling_window_end_s: 3 * 60 * 60,
            beacon_interval_s: 5 * 60,
            sail_auto_open_s: Some(40 * 24 * 60 * 60),
            power_cycle_period_s: 24 * 60 * 60,
            security_code: DEFAULT_SECURITY_CODE,
        }
    }
}

impl MissionConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cycle_period_ms == 0 {
            return Err(ConfigError::Invalid("cycle period must be non-zero"));
        }
        if self.antenna_max_attempts == 0 {
            return Err(ConfigError::Invalid("antenna deployment needs at least one attempt"));
        }
        if self.detumbling_start_delay_s >= self.detumbling_window_end_s {
            return Err(ConfigError::Invalid("detumbling window ends before it starts"));
        }
        if self.beacon_interval_s == 0 {
            return Err(ConfigError::Invalid("beacon interval must be non-zero"));
        }
        if self.power_cycle_period_s == 0 {
            return Err(ConfigError::Invalid("power cycle period must be non-zero"));
        }
        Ok(())
    }

    pub fn cycle_period(&self) -> Duration {
        Duration::from_millis(self.cycle_period_ms)
    }

    pub fn antenna(&self) -> AntennaDeploymentConfig {
        AntennaDeploymentConfig {
            silent_period: Duration::from_secs(self.antenna_silent_period_s),
            retry_interval: Duration::from_secs(self.antenna_retry_interval_s),
            max_attempts: self.antenna_max_attempts,
        }
    }

    pub fn detumbling_window(&self) -> DetumblingWindow {
        DetumblingWindow {
            start_delay: Duration::from_secs(self.detumbling_start_delay_s),
            window_end: Duration::from_secs(self.detumbling_window_end_s),
        }
    }

    pub fn beacon_interval(&self) -> Duration {
        Duration::from_secs(self.beacon_interval_s)
    }

    pub fn sail_auto_open_time(&self) -> Option<Duration> {
        self.sail_auto_open_s.map(Duration::from_secs)
    }

    pub fn power_cycle_period(&self) -> Duration {
        Duration::from_secs(self.power_cycle_period_s)
    }

    pub fn comm(&self) -> CommConfig {
        CommConfig {
            security_code: self.security_code,
        }
    }
}
