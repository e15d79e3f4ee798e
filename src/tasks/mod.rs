//! Mission tasks operating on [`SystemState`](crate::state::SystemState).

pub mod adcs;
pub mod antenna;
pub mod beacon;
pub mod persistence;
pub mod power_cycle;
pub mod sail;
pub mod time;

pub use adcs::{AdcsModeUpdate, AdcsPrimaryTask, DetumblingState, DetumblingWindow};
pub use antenna::{AntennaDeploymentConfig, AntennaTask};
pub use beacon::{Beacon, BeaconUpdateTask, DEFAULT_BEACON_INTERVAL};
pub use persistence::PersistentStateSaveTask;
pub use power_cycle::{PeriodicPowerCycleTask, DEFAULT_POWER_CYCLE_PERIOD};
pub use sail::{SailConsistencyVerify, SailOperation, SailStep, SailTask, SAIL_STEPS};
pub use time::{TimeTask, MAX_TIME_OBSERVERS};
