use obc::comm::FrameTransmitter;
use obc::devices::{AdcsCoordinator, PowerControl, SailChannel, ScrubbingKind, ScrubbingStatus};
use obc::mission::{shared, Action, NotifyTimeChanged, Shared, Update, UpdateResult, Verify, VerifyResult};
use obc::simulation::{EpsSwitch, SimulatedAdcs, SimulatedAntenna, SimulatedClock, SimulatedEps, SimulatedFram};
use obc::state::persistent::read_persistent_state;
use obc::state::{
    AdcsConfiguration, AdcsMode, AntennaConfiguration, PersistentState, SailPersistentState, SailState,
    SystemState,
};
use obc::tasks::{
    AdcsModeUpdate, AdcsPrimaryTask, AntennaDeploymentConfig, AntennaTask, Beacon, BeaconUpdateTask,
    DetumblingState, DetumblingWindow, PeriodicPowerCycleTask, PersistentStateSaveTask, SailConsistencyVerify,
    SailTask, TimeTask, SAIL_STEPS,
};
use std::sync::Arc;
use std::time::Duration;

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn mins(m: u64) -> Duration {
    Duration::from_secs(m * 60)
}

fn state_at(time: Duration) -> SystemState {
    SystemState {
        time,
        ..SystemState::default()
    }
}

// Antenna deployment

#[test]
fn test_antenna_waits_for_silent_period() {
    let antenna = SimulatedAntenna::new();
    let mut task = AntennaTask::new(Box::new(antenna.clone()), AntennaDeploymentConfig::default());

    let mut state = state_at(mins(29));
    assert_eq!(task.update(&mut state), UpdateResult::Ok);
    assert!(!task.condition(&state));

    state.time = mins(30);
    assert!(task.condition(&state));

    task.execute(&mut state);
    assert_eq!(antenna.deploy_requests(), 1);

    task.update(&mut state);
    assert!(state.antenna_state.deployed);
    assert!(!task.condition(&state));
}

#[test]
fn test_antenna_retries_after_interval() {
    let antenna = SimulatedAntenna::new();
    antenna.set_jammed(true);
    let mut task = AntennaTask::new(Box::new(antenna.clone()), AntennaDeploymentConfig::default());

    let mut state = state_at(mins(30));
    task.update(&mut state);
    task.execute(&mut state);
    task.update(&mut state);
    assert!(!state.antenna_state.deployed);

    state.time = mins(30) + secs(30);
    assert!(!task.condition(&state));

    state.time = mins(31);
    assert!(task.condition(&state));
    task.execute(&mut state);
    assert_eq!(task.attempts(), 2);
    assert_eq!(antenna.deploy_requests(), 2);
}

#[test]
fn test_antenna_retry_follows_time_change() {
    let antenna = SimulatedAntenna::new();
    antenna.set_jammed(true);
    let mut task = AntennaTask::new(Box::new(antenna.clone()), AntennaDeploymentConfig::default());

    let mut state = state_at(mins(30));
    task.update(&mut state);
    task.execute(&mut state);

    task.on_time_changed(mins(30), mins(40));
    state.time = mins(40) + secs(30);
    assert!(!task.condition(&state));

    state.time = mins(41);
    assert!(task.condition(&state));
}

#[test]
fn test_antenna_gives_up_after_max_attempts() {
    let antenna = SimulatedAntenna::new();
    antenna.set_jammed(true);
    let config = AntennaDeploymentConfig {
        max_attempts: 2,
        ..AntennaDeploymentConfig::default()
    };
    let mut task = AntennaTask::new(Box::new(antenna.clone()), config);

    let mut state = state_at(mins(30));
    for minute in 30..40 {
        state.time = mins(minute);
        task.update(&mut state);
        if task.condition(&state) {
            task.execute(&mut state);
        }
    }

    assert_eq!(antenna.deploy_requests(), 2);
    assert!(!task.condition(&state));
    // Exhaustion is not persisted.
    assert!(!state.persistent.get::<AntennaConfiguration>().deployment_disabled);
}

#[test]
fn test_antenna_deployment_disabled_by_ground() {
    let mut task = AntennaTask::new(Box::new(SimulatedAntenna::new()), AntennaDeploymentConfig::default());
    let mut state = state_at(mins(45));
    state.persistent.set(AntennaConfiguration { deployment_disabled: true });

    task.update(&mut state);
    assert!(!task.condition(&state));
}

#[test]
fn test_antenna_status_failure_reported() {
    let antenna = SimulatedAntenna::new();
    antenna.set_deployed([true, false, false, false]);
    let mut task = AntennaTask::new(Box::new(antenna.clone()), AntennaDeploymentConfig::default());

    let mut state = SystemState::default();
    task.update(&mut state);
    assert!(state.antenna_state.deployed);

    antenna.set_failing(true);
    assert_eq!(task.update(&mut state), UpdateResult::Failure);
    // Last good readout is kept.
    assert!(state.antenna_state.deployed);
}

// Sail

fn sail_task(eps: &SimulatedEps, auto_open: Option<Duration>) -> SailTask {
    let power: Shared<dyn PowerControl> = shared(eps.clone());
    SailTask::new(power, auto_open)
}

fn sail_cycle(task: &mut SailTask, state: &mut SystemState, time: Duration) {
    state.time = time;
    task.update(state);
    if task.condition(state) {
        task.execute(state);
    }
}

#[test]
fn test_sail_sequence_timeline() {
    let eps = SimulatedEps::new();
    let mut task = sail_task(&eps, None);
    let mut state = SystemState::default();

    assert!(task.request_open());
    sail_cycle(&mut task, &mut state, secs(100));
    assert_eq!(task.current_step(), 1);
    assert_eq!(state.sail_state, SailState::Opening);
    assert_eq!(*state.persistent.get::<SailPersistentState>(), SailPersistentState::Opening);

    // Knife settle time not over yet.
    sail_cycle(&mut task, &mut state, secs(101));
    assert_eq!(task.current_step(), 1);

    sail_cycle(&mut task, &mut state, secs(102));
    assert_eq!(task.current_step(), 2);

    // Burn in progress.
    sail_cycle(&mut task, &mut state, secs(221));
    assert_eq!(task.current_step(), 2);

    sail_cycle(&mut task, &mut state, secs(222));
    assert_eq!(task.current_step(), 5);

    sail_cycle(&mut task, &mut state, secs(224));
    assert_eq!(task.current_step(), 6);

    sail_cycle(&mut task, &mut state, secs(344));
    assert_eq!(task.current_step(), SAIL_STEPS.len());
    assert!(!task.is_in_progress());
    assert_eq!(state.sail_state, SailState::OpeningStopped);
    assert_eq!(*state.persistent.get::<SailPersistentState>(), SailPersistentState::Opened);

    assert_eq!(
        eps.operations(),
        vec![
            (EpsSwitch::ThermalKnife(SailChannel::Main), true),
            (EpsSwitch::BurnSwitch(SailChannel::Main), true),
            (EpsSwitch::BurnSwitch(SailChannel::Main), false),
            (EpsSwitch::ThermalKnife(SailChannel::Main), false),
            (EpsSwitch::ThermalKnife(SailChannel::Redundant), true),
            (EpsSwitch::BurnSwitch(SailChannel::Redundant), true),
            (EpsSwitch::BurnSwitch(SailChannel::Redundant), false),
            (EpsSwitch::ThermalKnife(SailChannel::Redundant), false),
        ]
    );

    sail_cycle(&mut task, &mut state, secs(400));
    assert_eq!(state.sail_state, SailState::OpeningStopped);
    assert_eq!(eps.operations().len(), 8);
}

#[test]
fn test_sail_request_during_run_is_ignored() {
    let eps = SimulatedEps::new();
    let mut task = sail_task(&eps, None);
    let mut state = SystemState::default();

    task.request_open();
    sail_cycle(&mut task, &mut state, secs(10));
    sail_cycle(&mut task, &mut state, secs(12));
    assert_eq!(task.current_step(), 2);

    assert!(!task.request_open());
    assert!(!task.request_open());
    assert!(task.has_pending_request());

    sail_cycle(&mut task, &mut state, secs(13));
    assert_eq!(task.current_step(), 2);
    assert!(task.is_in_progress());
    // Consumed by the update, the running sequence carries on.
    assert!(!task.has_pending_request());

    for time in [132, 134, 254] {
        sail_cycle(&mut task, &mut state, secs(time));
    }
    assert!(!task.is_in_progress());

    sail_cycle(&mut task, &mut state, secs(300));
    assert!(!task.is_in_progress());
    assert_eq!(eps.operations().len(), SAIL_STEPS.len());
}

#[test]
fn test_sail_request_after_completion_restarts() {
    let eps = SimulatedEps::new();
    let mut task = sail_task(&eps, None);
    let mut state = SystemState::default();
    state.persistent.set(SailPersistentState::Opened);

    sail_cycle(&mut task, &mut state, secs(10));
    assert!(eps.operations().is_empty());

    assert!(task.request_open());
    assert!(task.has_pending_request());
    sail_cycle(&mut task, &mut state, secs(20));

    assert!(task.is_in_progress());
    assert!(!task.has_pending_request());
    assert_eq!(task.current_step(), 1);
    assert_eq!(*state.persistent.get::<SailPersistentState>(), SailPersistentState::Opening);
}

#[test]
fn test_sail_burn_follows_time_change() {
    let eps = SimulatedEps::new();
    let mut task = sail_task(&eps, None);
    let mut state = SystemState::default();

    task.request_open();
    sail_cycle(&mut task, &mut state, secs(100));
    sail_cycle(&mut task, &mut state, secs(102));
    assert_eq!(task.current_step(), 2);

    // Burn ends 120 s after it started, whatever the clock says.
    task.on_time_changed(secs(102), secs(2));
    sail_cycle(&mut task, &mut state, secs(121));
    assert_eq!(task.current_step(), 2);
    sail_cycle(&mut task, &mut state, secs(122));
    assert_eq!(task.current_step(), 5);

    task.on_time_changed(secs(122), secs(10_122));
    sail_cycle(&mut task, &mut state, secs(10_123));
    assert_eq!(task.current_step(), 5);
    sail_cycle(&mut task, &mut state, secs(10_124));
    assert_eq!(task.current_step(), 6);
}

#[test]
fn test_sail_opens_automatically() {
    let eps = SimulatedEps::new();
    let mut task = sail_task(&eps, Some(secs(1000)));
    let mut state = SystemState::default();

    sail_cycle(&mut task, &mut state, secs(999));
    assert_eq!(state.sail_state, SailState::Waiting);
    assert!(eps.operations().is_empty());

    sail_cycle(&mut task, &mut state, secs(1000));
    assert_eq!(state.sail_state, SailState::Opening);
    assert_eq!(task.current_step(), 1);
}

#[test]
fn test_sail_resumes_after_reset() {
    let eps = SimulatedEps::new();
    let mut task = sail_task(&eps, None);
    let mut state = SystemState::default();
    state.persistent.set(SailPersistentState::Opening);

    sail_cycle(&mut task, &mut state, secs(5));
    assert!(task.is_in_progress());
    assert_eq!(eps.operations(), vec![(EpsSwitch::ThermalKnife(SailChannel::Main), true)]);
}

#[test]
fn test_sail_not_reopened_after_completion() {
    let eps = SimulatedEps::new();
    let mut task = sail_task(&eps, Some(secs(0)));
    let mut state = SystemState::default();
    state.persistent.set(SailPersistentState::Opened);

    sail_cycle(&mut task, &mut state, secs(5000));
    assert!(!task.is_in_progress());
    assert_eq!(state.sail_state, SailState::OpeningStopped);
    assert!(eps.operations().is_empty());
}

#[test]
fn test_sail_step_failure_retried() {
    let eps = SimulatedEps::new();
    let mut task = sail_task(&eps, None);
    let mut state = SystemState::default();

    eps.set_failing(true);
    task.request_open();
    sail_cycle(&mut task, &mut state, secs(10));
    assert_eq!(task.current_step(), 0);
    assert!(task.condition(&state));

    eps.set_failing(false);
    sail_cycle(&mut task, &mut state, secs(20));
    assert_eq!(task.current_step(), 1);
}

#[test]
fn test_sail_consistency() {
    let verify = SailConsistencyVerify;
    let mut state = SystemState::default();
    assert_eq!(verify.verify(&state), VerifyResult::Ok);

    state.sail_state = SailState::Opening;
    assert_eq!(verify.verify(&state), VerifyResult::Failure);

    state.persistent.set(SailPersistentState::Opening);
    assert_eq!(verify.verify(&state), VerifyResult::Ok);

    state.persistent.set(SailPersistentState::Opened);
    assert_eq!(verify.verify(&state), VerifyResult::Failure);

    state.sail_state = SailState::OpeningStopped;
    assert_eq!(verify.verify(&state), VerifyResult::Ok);
}

// ADCS

struct AdcsFixture {
    adcs: SimulatedAdcs,
    mode: AdcsModeUpdate,
    task: Shared<AdcsPrimaryTask>,
    state: SystemState,
}

impl AdcsFixture {
    fn new() -> Self {
        let adcs = SimulatedAdcs::new();
        let coordinator: Shared<dyn AdcsCoordinator> = shared(adcs.clone());
        let mut state = SystemState::default();
        state.antenna_state.deployed = true;

        Self {
            adcs,
            mode: AdcsModeUpdate::new(coordinator.clone()),
            task: shared(AdcsPrimaryTask::new(coordinator, DetumblingWindow::default())),
            state,
        }
    }

    /// Runs the update and the detumbling slot; returns whether the slot ran.
    fn cycle(&mut self, time: Duration) -> bool {
        self.state.time = time;
        self.mode.update(&mut self.state);

        let mut action = AdcsPrimaryTask::build_action(&self.task);
        let runnable = action.is_runnable(&self.state);
        if runnable {
            action.execute(&mut self.state);
        }
        runnable
    }
}

#[test]
fn test_detumbling_inside_window() {
    let mut fixture = AdcsFixture::new();

    assert!(!fixture.cycle(mins(39)));
    assert!(fixture.cycle(mins(40)));
    assert_eq!(fixture.adcs.mode(), AdcsMode::BuiltinDetumbling);
    assert_eq!(fixture.task.borrow().detumbling_state(), DetumblingState::Detumbling);

    assert!(!fixture.cycle(mins(90)));
    assert_eq!(fixture.state.adcs_mode, AdcsMode::BuiltinDetumbling);

    assert!(fixture.cycle(mins(180)));
    assert_eq!(fixture.adcs.mode(), AdcsMode::Stopped);
    assert_eq!(fixture.task.borrow().detumbling_state(), DetumblingState::Finished);

    assert!(!fixture.cycle(mins(200)));
    assert_eq!(fixture.adcs.requests(), (1, 1));
}

#[test]
fn test_detumbling_needs_deployed_antenna() {
    let mut fixture = AdcsFixture::new();
    fixture.state.antenna_state.deployed = false;

    assert!(!fixture.cycle(mins(60)));
    assert_eq!(fixture.adcs.requests(), (0, 0));
}

#[test]
fn test_detumbling_disabled_in_persistent_state() {
    let mut fixture = AdcsFixture::new();
    fixture.state.persistent.set(AdcsConfiguration {
        builtin_detumbling_disabled: true,
    });

    assert!(!fixture.cycle(mins(60)));
}

#[test]
fn test_rejected_detumbling_start_retried() {
    let mut fixture = AdcsFixture::new();
    fixture.adcs.set_rejecting(true);

    assert!(fixture.cycle(mins(41)));
    assert_eq!(fixture.task.borrow().detumbling_state(), DetumblingState::Idle);

    fixture.adcs.set_rejecting(false);
    assert!(fixture.cycle(mins(42)));
    assert_eq!(fixture.task.borrow().detumbling_state(), DetumblingState::Detumbling);
    assert_eq!(fixture.adcs.requests(), (2, 0));
}

// Beacon

#[derive(Default)]
struct RecordingTransmitter {
    frames: Vec<Vec<u8>>,
    rejecting: bool,
}

impl FrameTransmitter for RecordingTransmitter {
    fn send_frame(&mut self, frame: &[u8]) -> bool {
        if self.rejecting {
            return false;
        }
        self.frames.push(frame.to_vec());
        true
    }
}

fn deployed_state_at(time: Duration) -> SystemState {
    let mut state = state_at(time);
    state.antenna_state.deployed = true;
    state
}

#[test]
fn test_beacon_silent_until_antenna_deployed() {
    let transmitter = shared(RecordingTransmitter::default());
    let task = BeaconUpdateTask::new(transmitter.clone(), mins(5));

    assert!(!task.condition(&state_at(mins(60))));
    assert!(task.condition(&deployed_state_at(mins(60))));
}

#[test]
fn test_beacon_sent_every_interval() {
    let transmitter = shared(RecordingTransmitter::default());
    let mut task = BeaconUpdateTask::new(transmitter.clone(), mins(5));

    let mut state = deployed_state_at(mins(31));
    task.execute(&mut state);
    assert_eq!(task.last_sent(), Some(mins(31)));

    state.time = mins(35);
    assert!(!task.condition(&state));
    state.time = mins(36);
    assert!(task.condition(&state));

    let frames = transmitter.borrow().frames.clone();
    assert_eq!(frames.len(), 1);
    let beacon = Beacon::decode(&frames[0]).unwrap();
    assert_eq!(beacon.timestamp_ms, 31 * 60 * 1000);
    assert!(beacon.antenna_deployed);
}

#[test]
fn test_rejected_beacon_retried() {
    let transmitter = shared(RecordingTransmitter {
        rejecting: true,
        ..RecordingTransmitter::default()
    });
    let mut task = BeaconUpdateTask::new(transmitter.clone(), mins(5));

    let mut state = deployed_state_at(mins(40));
    task.execute(&mut state);
    assert_eq!(task.last_sent(), None);
    assert!(task.condition(&state));

    transmitter.borrow_mut().rejecting = false;
    task.execute(&mut state);
    assert_eq!(task.last_sent(), Some(mins(40)));
}

#[test]
fn test_forced_beacon_ignores_interval() {
    let transmitter = shared(RecordingTransmitter::default());
    let mut task = BeaconUpdateTask::new(transmitter.clone(), mins(5));

    let mut state = deployed_state_at(mins(40));
    task.execute(&mut state);

    state.time = mins(41);
    assert!(!task.condition(&state));
    task.request_immediate();
    assert!(task.condition(&state));

    task.execute(&mut state);
    assert!(!task.condition(&state));
    assert_eq!(transmitter.borrow().frames.len(), 2);
}

#[test]
fn test_beacon_follows_time_change() {
    let clock = SimulatedClock::new(mins(100));
    let transmitter = shared(RecordingTransmitter::default());
    let beacon = shared(BeaconUpdateTask::new(transmitter.clone(), mins(5)));
    let mut time = TimeTask::new(Box::new(clock.clone()));
    time.add_observer(beacon.clone()).unwrap();

    let mut state = deployed_state_at(Duration::ZERO);
    time.update(&mut state);
    beacon.borrow_mut().execute(&mut state);
    assert_eq!(beacon.borrow().last_sent(), Some(mins(100)));

    // Clock moved back by an hour: the beacon schedule moves with it.
    assert!(time.set_time(mins(40)));
    time.update(&mut state);
    assert_eq!(state.time, mins(40));
    assert_eq!(beacon.borrow().last_sent(), Some(mins(40)));

    clock.set(mins(44));
    time.update(&mut state);
    assert!(!beacon.borrow().condition(&state));

    clock.set(mins(45));
    time.update(&mut state);
    assert!(beacon.borrow().condition(&state));
}

// Periodic power cycle

fn power_cycle_task(eps: &SimulatedEps, scrubbing: &Arc<ScrubbingStatus>) -> PeriodicPowerCycleTask {
    let power: Shared<dyn PowerControl> = shared(eps.clone());
    PeriodicPowerCycleTask::new(power, Arc::clone(scrubbing), Duration::from_secs(24 * 60 * 60))
}

#[test]
fn test_power_cycle_after_a_day() {
    let eps = SimulatedEps::new();
    let scrubbing = Arc::new(ScrubbingStatus::new());
    let mut task = power_cycle_task(&eps, &scrubbing);

    let mut state = state_at(mins(10));
    assert!(!task.condition(&state));
    assert_eq!(task.boot_time(), Some(mins(10)));

    state.time = mins(10) + secs(24 * 60 * 60) - secs(1);
    assert!(!task.condition(&state));

    state.time = mins(10) + secs(24 * 60 * 60);
    assert!(task.condition(&state));
    task.execute(&mut state);
    assert_eq!(eps.power_cycles(), 1);
}

#[test]
fn test_power_cycle_waits_for_scrubbing() {
    let eps = SimulatedEps::new();
    let scrubbing = Arc::new(ScrubbingStatus::new());
    let task = power_cycle_task(&eps, &scrubbing);

    let mut state = SystemState::default();
    task.condition(&state);

    state.time = secs(25 * 60 * 60);
    scrubbing.set_in_progress(ScrubbingKind::Bootloader, true);
    assert!(!task.condition(&state));

    scrubbing.set_in_progress(ScrubbingKind::Bootloader, false);
    assert!(task.condition(&state));
}

#[test]
fn test_power_cycle_boot_time_follows_time_change() {
    let eps = SimulatedEps::new();
    let scrubbing = Arc::new(ScrubbingStatus::new());
    let mut task = power_cycle_task(&eps, &scrubbing);

    task.condition(&state_at(mins(60)));
    task.on_time_changed(mins(60), mins(600));
    assert_eq!(task.boot_time(), Some(mins(600)));
}

// Persistent state save

#[test]
fn test_modified_state_saved() {
    let fram = SimulatedFram::new();
    let mut task = PersistentStateSaveTask::new(Box::new(fram.clone()));

    let mut state = SystemState::default();
    assert!(!task.condition(&state));

    state.persistent.set(SailPersistentState::Opened);
    assert!(task.condition(&state));
    task.execute(&mut state);
    assert!(!state.persistent.is_modified());

    let mut restored = PersistentState::default();
    read_persistent_state(&fram.contents(), &mut restored).unwrap();
    assert_eq!(*restored.get::<SailPersistentState>(), SailPersistentState::Opened);
}

#[test]
fn test_flush_reports_storage_state() {
    let fram = SimulatedFram::new();
    let mut task = PersistentStateSaveTask::new(Box::new(fram.clone()));
    let mut state = SystemState::default();

    // Nothing to write.
    assert!(task.flush(&mut state));

    state.persistent.set(SailPersistentState::Opened);
    fram.set_failing(true);
    assert!(!task.flush(&mut state));
    assert!(state.persistent.is_modified());

    fram.set_failing(false);
    assert!(task.flush(&mut state));
    assert!(!state.persistent.is_modified());
}

#[test]
fn test_failed_save_retried() {
    let fram = SimulatedFram::new();
    fram.set_failing(true);
    let mut task = PersistentStateSaveTask::new(Box::new(fram.clone()));

    let mut state = SystemState::default();
    state.persistent.set(SailPersistentState::Opening);
    task.execute(&mut state);
    assert!(state.persistent.is_modified());
    assert!(task.condition(&state));

    fram.set_failing(false);
    task.execute(&mut state);
    assert!(!state.persistent.is_modified());
}
