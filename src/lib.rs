//! # On-board computer mission software
//!
//! Flight logic for a CubeSat on-board computer: a periodic mission loop
//! that observes, checks and acts on a shared satellite state, plus the
//! protocol driver for the half-duplex COMM transceiver.
//!
//! ## Quick Start
//!
//! ```rust
//! use obc::config::MissionConfig;
//! use obc::mission::shared;
//! use obc::obc::{Obc, ObcDevices};
//! use obc::simulation::*;
//! use std::sync::Arc;
//!
//! let config = MissionConfig::default();
//! let clock = SimulatedClock::default();
//! let devices = ObcDevices {
//!     comm_bus: SimulatedTransceiver::new(),
//!     comm_delay: NoDelay,
//!     clock: Box::new(clock.clone()),
//!     rtc: None,
//!     antenna: Box::new(SimulatedAntenna::new()),
//!     adcs: shared(SimulatedAdcs::new()),
//!     power: shared(SimulatedEps::new()),
//!     storage: Box::new(SimulatedFram::new()),
//!     scrubbing: Arc::default(),
//! };
//!
//! let mut obc = Obc::new(devices, &config).unwrap();
//! let (report, _request) = obc.step();
//! assert_eq!(report.cycle, 1);
//! ```
//!
//! ## Architecture
//!
//! - [`transport`] - Bus abstraction and its fallback/error-limit decorators
//! - [`comm`] - COMM transceiver driver and frame model
//! - [`state`] - `SystemState` and the persisted state it carries
//! - [`mission`] - Descriptors and the update/verify/dispatch loop
//! - [`tasks`] - Mission tasks (time, antenna, ADCS, sail, beacon, power cycle, persistence)
//! - [`devices`] - Hardware collaborator interfaces
//! - [`config`] - Mission tunables
//! - [`obc`] - Composition root
//! - [`simulation`] - In-memory hardware

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::must_use_candidate)]

pub mod comm;
pub mod config;
pub mod devices;
pub mod mission;
pub mod obc;
pub mod simulation;
pub mod state;
pub mod tasks;
pub mod transport;

// Re-export main public types for convenience
pub use comm::{CommDriver, Frame, FrameType};
pub use config::MissionConfig;
pub use mission::{ActionDescriptor, CompositeAction, MissionLoop, UpdateDescriptor};
pub use obc::{Obc, ObcDevices};
pub use state::{PersistentState, SystemState};
