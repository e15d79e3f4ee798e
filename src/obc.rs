//! Composition root: builds every task once at boot and wires it into the
//! mission loop.
//!
//! The [`Obc`] owns the loop and keeps typed handles to the tasks that take
//! requests from outside the loop (ground commands, operator time sets).
//! Those handles live exactly as long as the `Obc`, which lives for the
//! whole process.

use crate::comm::{CommDriver, FrameTransmitter, FrameType};
use crate::config::{ConfigError, MissionConfig};
use crate::devices::{AdcsCoordinator, AntennaDriver, PowerControl, ScrubbingStatus, TimeSource};
use crate::mission::{
    shared, ActionDescriptor, CycleReport, MissionError, MissionLoop, Shared, UpdateDescriptor,
    VerifyDescriptor,
};
use crate::state::persistent::load_or_default;
use crate::state::{ErrorCountersConfig, PersistentStorage, SystemState};
use crate::tasks::{
    AdcsModeUpdate, AdcsPrimaryTask, AntennaTask, BeaconUpdateTask, PeriodicPowerCycleTask,
    PersistentStateSaveTask, SailConsistencyVerify, SailTask, TimeTask,
};
use crate::transport::{ErrorHandlingBus, I2cBus};
use core::cell::Ref;
use core::time::Duration;
use embedded_hal::delay::DelayNs;
use std::rc::Rc;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum ObcError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Mission(#[from] MissionError),
}

/// Hardware handed to the OBC at boot.
pub struct ObcDevices<B, D> {
    pub comm_bus: B,
    pub comm_delay: D,
    pub clock: Box<dyn TimeSource>,
    /// External RTC blended into mission time, if fitted.
    pub rtc: Option<Box<dyn TimeSource>>,
    pub antenna: Box<dyn AntennaDriver>,
    pub adcs: Shared<dyn AdcsCoordinator>,
    pub power: Shared<dyn PowerControl>,
    pub storage: Box<dyn PersistentStorage>,
    pub scrubbing: Arc<ScrubbingStatus>,
}

/// Wraps a bus so that `limit` consecutive failures power cycle the OBC.
fn with_power_cycle_recovery<B: I2cBus>(
    bus: B,
    limit: u8,
    power: Shared<dyn PowerControl>,
) -> ErrorHandlingBus<B> {
    ErrorHandlingBus::new(bus, limit, move || {
        warn!("bus error limit reached, power cycling");
        if let Err(err) = power.borrow_mut().power_cycle() {
            error!("recovery power cycle failed: {}", err);
        }
    })
}

pub struct Obc<B, D> {
    mission: MissionLoop<SystemState>,
    comm: Shared<CommDriver<ErrorHandlingBus<B>, D>>,
    power: Shared<dyn PowerControl>,
    save: Shared<PersistentStateSaveTask>,
    time: Shared<TimeTask>,
    sail: Shared<SailTask>,
    beacon: Shared<BeaconUpdateTask>,
    antenna: Shared<AntennaTask>,
    adcs: Shared<AdcsPrimaryTask>,
}

impl<B: I2cBus + 'static, D: DelayNs + 'static> Obc<B, D> {
    pub fn new(devices: ObcDevices<B, D>, config: &MissionConfig) -> Result<Self, ObcError> {
        config.validate()?;

        let ObcDevices {
            comm_bus,
            comm_delay,
            clock,
            rtc,
            antenna,
            adcs,
            power,
            mut storage,
            scrubbing,
        } = devices;

        let persistent = load_or_default(storage.as_mut());

        let comm_limit = persistent.get::<ErrorCountersConfig>().comm_limit.max(1);
        let comm_bus = with_power_cycle_recovery(comm_bus, comm_limit, Rc::clone(&power));
        let comm = shared(CommDriver::new(comm_bus, comm_delay, config.comm()));
        let transmitter: Shared<dyn FrameTransmitter> = comm.clone();

        let time = match rtc {
            Some(rtc) => TimeTask::new(clock).with_rtc(rtc),
            None => TimeTask::new(clock),
        };
        let time = shared(time);
        let antenna = shared(AntennaTask::new(antenna, config.antenna()));
        let adcs_mode = shared(AdcsModeUpdate::new(Rc::clone(&adcs)));
        let adcs = shared(AdcsPrimaryTask::new(adcs, config.detumbling_window()));
        let sail = shared(SailTask::new(Rc::clone(&power), config.sail_auto_open_time()));
        let beacon = shared(BeaconUpdateTask::new(transmitter, config.beacon_interval()));
        let power_cycle = shared(PeriodicPowerCycleTask::new(
            Rc::clone(&power),
            scrubbing,
            config.power_cycle_period(),
        ));
        let save = shared(PersistentStateSaveTask::new(storage));

        time.borrow_mut().add_observer(antenna.clone())?;
        time.borrow_mut().add_observer(sail.clone())?;
        time.borrow_mut().add_observer(beacon.clone())?;
        time.borrow_mut().add_observer(power_cycle.clone())?;

        let mut mission = MissionLoop::new(SystemState::new(persistent), config.cycle_period());

        // Time first: everything after it compares against the fresh value.
        mission.add_update(UpdateDescriptor::for_task("time", &time))?;
        mission.add_update(UpdateDescriptor::for_task("antenna", &antenna))?;
        mission.add_update(UpdateDescriptor::for_task("adcs.mode", &adcs_mode))?;
        mission.add_update(UpdateDescriptor::for_task("sail", &sail))?;

        mission.add_verify(VerifyDescriptor::for_task("sail.consistency", &shared(SailConsistencyVerify)))?;

        mission.add_action(ActionDescriptor::for_task("antenna.deploy", &antenna))?;
        mission.add_action(AdcsPrimaryTask::build_action(&adcs))?;
        mission.add_action(ActionDescriptor::for_task("sail.open", &sail))?;
        mission.add_action(ActionDescriptor::for_task("beacon", &beacon))?;
        mission.add_action(ActionDescriptor::for_task("power_cycle", &power_cycle))?;
        // Changes made during dispatch are caught by the flush in `run_cycle`.
        mission.add_action(ActionDescriptor::for_task("persistent_state.save", &save))?;

        info!(
            period_ms = config.cycle_period_ms,
            actions = mission.action_names().count(),
            "obc initialised"
        );

        Ok(Self {
            mission,
            comm,
            power,
            save,
            time,
            sail,
            beacon,
            antenna,
            adcs,
        })
    }

    /// One mission cycle. The persistent state is on storage when it returns.
    pub fn run_cycle(&mut self) -> CycleReport {
        let report = self.mission.run_cycle();
        // The save condition was evaluated before any action ran.
        self.save.borrow_mut().flush(self.mission.state_mut());
        report
    }

    /// Drains the COMM receiver and acts on the ground's request.
    pub fn poll_comm(&mut self) -> FrameType {
        let request = self.comm.borrow_mut().poll_hardware();

        match request {
            FrameType::None => {}
            FrameType::SendBeacon => {
                info!("beacon requested by ground");
                self.beacon.borrow_mut().request_immediate();
            }
            FrameType::Reboot => {
                warn!("reboot requested by ground");
                self.save.borrow_mut().flush(self.mission.state_mut());
                if let Err(err) = self.power.borrow_mut().power_cycle() {
                    error!("reboot power cycle failed: {}", err);
                }
            }
        }

        request
    }

    /// One mission cycle followed by a COMM poll.
    pub fn step(&mut self) -> (CycleReport, FrameType) {
        let report = self.run_cycle();
        let request = self.poll_comm();
        (report, request)
    }

    pub fn run(&mut self, delay: &mut impl DelayNs, mut keep_running: impl FnMut(&CycleReport, &SystemState) -> bool) {
        let period_ms = u32::try_from(self.mission.period().as_millis()).unwrap_or(u32::MAX);

        loop {
            let (report, _) = self.step();
            if !keep_running(&report, self.mission.state()) {
                break;
            }
            delay.delay_ms(period_ms);
        }
    }

    pub fn request_sail_deploy(&self) -> bool {
        self.sail.borrow_mut().request_open()
    }

    pub fn set_time(&self, time: Duration) -> bool {
        self.time.borrow_mut().set_time(time)
    }

    pub fn state(&self) -> &SystemState {
        self.mission.state()
    }

    pub fn state_mut(&mut self) -> &mut SystemState {
        self.mission.state_mut()
    }

    pub fn cycle_count(&self) -> u64 {
        self.mission.cycle_count()
    }

    pub fn comm(&self) -> Ref<'_, CommDriver<ErrorHandlingBus<B>, D>> {
        self.comm.borrow()
    }

    pub fn sail(&self) -> Ref<'_, SailTask> {
        self.sail.borrow()
    }

    pub fn beacon(&self) -> Ref<'_, BeaconUpdateTask> {
        self.beacon.borrow()
    }

    pub fn antenna(&self) -> Ref<'_, AntennaTask> {
        self.antenna.borrow()
    }

    pub fn adcs(&self) -> Ref<'_, AdcsPrimaryTask> {
        self.adcs.borrow()
    }
}

impl<B, D> core::fmt::Debug for Obc<B, D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Obc")
            .field("cycle", &self.mission.cycle_count())
            .field("state", self.mission.state())
            .finish_non_exhaustive()
    }
}
