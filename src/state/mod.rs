//! Satellite state shared by every mission task during a cycle.

pub mod persistent;

pub use persistent::{
    AdcsConfiguration, AntennaConfiguration, ErrorCountersConfig, MemoryStorage, MessageSettings,
    PersistentObject, PersistentState, PersistentStateError, PersistentStorage, SailPersistentState,
    StorageError, TimeCorrectionConfig,
};

use core::time::Duration;
use serde::{Deserialize, Serialize};

pub const ANTENNA_COUNT: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AntennaState {
    pub deployed: bool,
    pub deployment_state: [bool; ANTENNA_COUNT],
}

impl AntennaState {
    /// Mirrors a hardware status readout. The antenna set counts as
    /// deployed as soon as any element is out.
    pub fn from_deployment_state(deployment_state: [bool; ANTENNA_COUNT]) -> Self {
        Self {
            deployed: deployment_state.iter().any(|&deployed| deployed),
            deployment_state,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SailState {
    #[default]
    Waiting,
    Opening,
    OpeningStopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AdcsMode {
    #[default]
    Stopped,
    BuiltinDetumbling,
    ExperimentalDetumbling,
    ExperimentalSunpointing,
    Disabled,
}

/// Everything a mission cycle observes and decides on.
///
/// Owned by the mission loop; tasks only see it for the duration of a single
/// update, condition or action call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemState {
    /// Mission time, never moves backwards within a cycle.
    pub time: Duration,
    pub antenna_state: AntennaState,
    pub sail_state: SailState,
    pub adcs_mode: AdcsMode,
    pub persistent: PersistentState,
}

impl SystemState {
    pub fn new(persistent: PersistentState) -> Self {
        Self {
            persistent,
            ..Self::default()
        }
    }
}
