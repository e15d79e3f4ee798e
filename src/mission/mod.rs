//! Mission control loop: descriptors and the cycle that runs them.

pub mod descriptor;
pub mod mission_loop;

pub use descriptor::{
    shared, Action, ActionDescriptor, CompositeAction, NotifyTimeChanged, Shared, Update,
    UpdateDescriptor, UpdateResult, Verify, VerifyDescriptor, VerifyResult,
};
pub use mission_loop::{
    CycleReport, MissionError, MissionLoop, DEFAULT_CYCLE_PERIOD, MAX_ACTIONS, MAX_UPDATES,
    MAX_VERIFIES,
};
