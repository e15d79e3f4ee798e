//! Hardware collaborators the mission tasks drive.
//!
//! Only the calls the mission loop makes are modelled here. Flight builds
//! back these traits with the real device drivers; [`crate::simulation`]
//! provides in-memory stand-ins.

use crate::state::{AdcsMode, ANTENNA_COUNT};
use crate::transport::I2cError;
use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("bus transfer failed: {0}")]
    Bus(#[from] I2cError),
    #[error("device is not responding")]
    NotResponding,
    #[error("device rejected the request")]
    Rejected,
}

pub trait AntennaDriver {
    /// Per-element deployment switch readout.
    fn deployment_status(&mut self) -> Result<[bool; ANTENNA_COUNT], DeviceError>;

    /// Starts automatic deployment of every element.
    fn deploy(&mut self) -> Result<(), DeviceError>;
}

pub trait AdcsCoordinator {
    fn current_mode(&self) -> AdcsMode;
    fn enable_builtin_detumbling(&mut self) -> Result<(), DeviceError>;
    fn stop(&mut self) -> Result<(), DeviceError>;
}

/// One of the two redundant sail release channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SailChannel {
    Main,
    Redundant,
}

pub trait PowerControl {
    fn set_thermal_knife(&mut self, channel: SailChannel, enabled: bool) -> Result<(), DeviceError>;
    fn set_burn_switch(&mut self, channel: SailChannel, enabled: bool) -> Result<(), DeviceError>;

    /// Cuts and restores OBC power. Never returns on flight hardware.
    fn power_cycle(&mut self) -> Result<(), DeviceError>;
}

/// Mission clock (RTC corrected by the MCU timer on the flight unit).
pub trait TimeSource {
    fn current_time(&mut self) -> Result<Duration, DeviceError>;
    fn set_time(&mut self, time: Duration) -> Result<(), DeviceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScrubbingKind {
    PrimaryFlash,
    SecondaryFlash,
    Bootloader,
    SafeMode,
}

impl ScrubbingKind {
    pub const ALL: [ScrubbingKind; 4] = [
        ScrubbingKind::PrimaryFlash,
        ScrubbingKind::SecondaryFlash,
        ScrubbingKind::Bootloader,
        ScrubbingKind::SafeMode,
    ];

    fn index(self) -> usize {
        match self {
            ScrubbingKind::PrimaryFlash => 0,
            ScrubbingKind::SecondaryFlash => 1,
            ScrubbingKind::Bootloader => 2,
            ScrubbingKind::SafeMode => 3,
        }
    }
}

/// Busy flags raised by the background scrubbers.
///
/// Written from the scrubbing threads, read by the mission loop.
#[derive(Debug, Default)]
pub struct ScrubbingStatus {
    busy: [AtomicBool; 4],
}

impl ScrubbingStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_in_progress(&self, kind: ScrubbingKind, in_progress: bool) {
        self.busy[kind.index()].store(in_progress, Ordering::Release);
    }

    pub fn is_in_progress(&self, kind: ScrubbingKind) -> bool {
        self.busy[kind.index()].load(Ordering::Acquire)
    }

    pub fn any_in_progress(&self) -> bool {
        ScrubbingKind::ALL.iter().any(|&kind| self.is_in_progress(kind))
    }
}
