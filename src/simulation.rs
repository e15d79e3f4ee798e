//! In-memory hardware used by the simulator binary and end-to-end tests.
//!
//! Every simulated device is a cheap handle around shared model state, so a
//! test can hand one clone to the OBC and keep another to inspect and poke
//! the device.

use crate::comm::{
    ReceiverCommand, TransmitterCommand, FRAME_HEADER_SIZE, RECEIVER_ADDRESS, TRANSMITTER_ADDRESS,
};
use crate::devices::{AdcsCoordinator, AntennaDriver, DeviceError, PowerControl, SailChannel, TimeSource};
use crate::state::{AdcsMode, MemoryStorage, PersistentStorage, StorageError, ANTENNA_COUNT};
use crate::transport::{Address, I2cBus, I2cError};
use core::cell::{Cell, RefCell};
use core::time::Duration;
use embedded_hal::delay::DelayNs;
use std::collections::VecDeque;
use std::rc::Rc;

/// Frames the transmitter buffers before it starts rejecting.
pub const TRANSMITTER_QUEUE_CAPACITY: usize = 40;

const REJECTED: u8 = 0xFF;

#[derive(Debug, Default)]
struct TransceiverModel {
    uplink: VecDeque<Vec<u8>>,
    downlink: VecDeque<Vec<u8>>,
    receiver_response: Vec<u8>,
    transmitter_response: Vec<u8>,
    receiver_watchdog_resets: u32,
    transmitter_watchdog_resets: u32,
    bit_rate: Option<u8>,
    offline: bool,
}

impl TransceiverModel {
    fn receiver_command(&mut self, data: &[u8]) -> Result<(), I2cError> {
        match data.first().copied() {
            Some(c) if c == ReceiverCommand::GetFrameCount as u8 => {
                let count = u16::try_from(self.uplink.len()).unwrap_or(u16::MAX);
                self.receiver_response = count.to_le_bytes().to_vec();
            }
            Some(c) if c == ReceiverCommand::GetFrame as u8 => {
                let frame = self.uplink.front().map_or(&[][..], Vec::as_slice);
                let size = u16::try_from(frame.len()).unwrap_or(u16::MAX);
                let mut response = Vec::with_capacity(FRAME_HEADER_SIZE + frame.len());
                response.extend_from_slice(&size.to_le_bytes());
                // Doppler offset and RSSI.
                response.extend_from_slice(&[0x10, 0x02, 0x80, 0x01]);
                response.extend_from_slice(frame);
                self.receiver_response = response;
            }
            Some(c) if c == ReceiverCommand::RemoveFrame as u8 => {
                self.uplink.pop_front();
            }
            Some(c) if c == ReceiverCommand::ResetWatchdog as u8 => {
                self.receiver_watchdog_resets += 1;
            }
            _ => return Err(I2cError::Nack),
        }
        Ok(())
    }

    fn transmitter_command(&mut self, data: &[u8]) -> Result<(), I2cError> {
        match data.split_first() {
            Some((&c, frame)) if c == TransmitterCommand::SendFrame as u8 => {
                let response = if self.downlink.len() < TRANSMITTER_QUEUE_CAPACITY {
                    self.downlink.push_back(frame.to_vec());
                    u8::try_from(TRANSMITTER_QUEUE_CAPACITY - self.downlink.len()).unwrap_or(0)
                } else {
                    REJECTED
                };
                self.transmitter_response = vec![response];
            }
            Some((&c, &[rate])) if c == TransmitterCommand::SetBitRate as u8 => {
                self.bit_rate = Some(rate);
            }
            Some((&c, _)) if c == TransmitterCommand::ResetWatchdog as u8 => {
                self.transmitter_watchdog_resets += 1;
            }
            _ => return Err(I2cError::Nack),
        }
        Ok(())
    }
}

/// TRXVU-style transceiver answering on the receiver and transmitter addresses.
#[derive(Debug, Clone, Default)]
pub struct SimulatedTransceiver {
    model: Rc<RefCell<TransceiverModel>>,
}

impl SimulatedTransceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a raw uplink frame in the receiver.
    pub fn uplink(&self, frame: &[u8]) {
        self.model.borrow_mut().uplink.push_back(frame.to_vec());
    }

    /// Queues a telecommand frame: security code followed by the command byte.
    pub fn uplink_command(&self, security_code: u32, command: u8) {
        let mut frame = security_code.to_be_bytes().to_vec();
        frame.push(command);
        self.uplink(&frame);
    }

    pub fn pending_uplink(&self) -> usize {
        self.model.borrow().uplink.len()
    }

    pub fn pending_downlink(&self) -> usize {
        self.model.borrow().downlink.len()
    }

    /// Empties the transmitter queue as if every frame went out over the air.
    pub fn transmit_all(&self) -> Vec<Vec<u8>> {
        self.model.borrow_mut().downlink.drain(..).collect()
    }

    pub fn watchdog_resets(&self) -> (u32, u32) {
        let model = self.model.borrow();
        (model.receiver_watchdog_resets, model.transmitter_watchdog_resets)
    }

    pub fn bit_rate(&self) -> Option<u8> {
        self.model.borrow().bit_rate
    }

    /// An offline transceiver NACKs every transfer.
    pub fn set_offline(&self, offline: bool) {
        self.model.borrow_mut().offline = offline;
    }
}

impl I2cBus for SimulatedTransceiver {
    fn write(&mut self, address: Address, data: &[u8]) -> Result<(), I2cError> {
        let mut model = self.model.borrow_mut();
        if model.offline {
            return Err(I2cError::Nack);
        }

        match address {
            RECEIVER_ADDRESS => model.receiver_command(data),
            TRANSMITTER_ADDRESS => model.transmitter_command(data),
            _ => Err(I2cError::Nack),
        }
    }

    fn read(&mut self, address: Address, buffer: &mut [u8]) -> Result<(), I2cError> {
        let model = self.model.borrow();
        if model.offline {
            return Err(I2cError::Nack);
        }

        let response = match address {
            RECEIVER_ADDRESS => &model.receiver_response,
            TRANSMITTER_ADDRESS => &model.transmitter_response,
            _ => return Err(I2cError::Nack),
        };

        buffer.fill(0);
        let available = response.len().min(buffer.len());
        buffer[..available].copy_from_slice(&response[..available]);
        Ok(())
    }

    fn write_read(&mut self, address: Address, output: &[u8], input: &mut [u8]) -> Result<(), I2cError> {
        self.write(address, output)?;
        self.read(address, input)
    }
}

#[derive(Debug, Default)]
struct AntennaModel {
    deployed: [bool; ANTENNA_COUNT],
    deploy_requests: u32,
    jammed: bool,
    failing: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SimulatedAntenna {
    model: Rc<RefCell<AntennaModel>>,
}

impl SimulatedAntenna {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deploy_requests(&self) -> u32 {
        self.model.borrow().deploy_requests
    }

    /// A jammed antenna accepts deploy requests but never comes out.
    pub fn set_jammed(&self, jammed: bool) {
        self.model.borrow_mut().jammed = jammed;
    }

    pub fn set_failing(&self, failing: bool) {
        self.model.borrow_mut().failing = failing;
    }

    pub fn set_deployed(&self, deployed: [bool; ANTENNA_COUNT]) {
        self.model.borrow_mut().deployed = deployed;
    }
}

impl AntennaDriver for SimulatedAntenna {
    fn deployment_status(&mut self) -> Result<[bool; ANTENNA_COUNT], DeviceError> {
        let model = self.model.borrow();
        if model.failing {
            return Err(DeviceError::NotResponding);
        }
        Ok(model.deployed)
    }

    fn deploy(&mut self) -> Result<(), DeviceError> {
        let mut model = self.model.borrow_mut();
        if model.failing {
            return Err(DeviceError::NotResponding);
        }

        model.deploy_requests += 1;
        if !model.jammed {
            model.deployed = [true; ANTENNA_COUNT];
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct AdcsModel {
    mode: AdcsMode,
    rejecting: bool,
    start_requests: u32,
    stop_requests: u32,
}

#[derive(Debug, Clone, Default)]
pub struct SimulatedAdcs {
    model: Rc<RefCell<AdcsModel>>,
}

impl SimulatedAdcs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> AdcsMode {
        self.model.borrow().mode
    }

    pub fn set_rejecting(&self, rejecting: bool) {
        self.model.borrow_mut().rejecting = rejecting;
    }

    /// Number of (start, stop) requests received.
    pub fn requests(&self) -> (u32, u32) {
        let model = self.model.borrow();
        (model.start_requests, model.stop_requests)
    }
}

impl AdcsCoordinator for SimulatedAdcs {
    fn current_mode(&self) -> AdcsMode {
        self.model.borrow().mode
    }

    fn enable_builtin_detumbling(&mut self) -> Result<(), DeviceError> {
        let mut model = self.model.borrow_mut();
        model.start_requests += 1;
        if model.rejecting {
            return Err(DeviceError::Rejected);
        }
        model.mode = AdcsMode::BuiltinDetumbling;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        let mut model = self.model.borrow_mut();
        model.stop_requests += 1;
        if model.rejecting {
            return Err(DeviceError::Rejected);
        }
        model.mode = AdcsMode::Stopped;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpsSwitch {
    ThermalKnife(SailChannel),
    BurnSwitch(SailChannel),
}

#[derive(Debug, Default)]
struct EpsModel {
    operations: Vec<(EpsSwitch, bool)>,
    power_cycles: u32,
    failing: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SimulatedEps {
    model: Rc<RefCell<EpsModel>>,
}

impl SimulatedEps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every switch operation, in order, with the requested state.
    pub fn operations(&self) -> Vec<(EpsSwitch, bool)> {
        self.model.borrow().operations.clone()
    }

    pub fn power_cycles(&self) -> u32 {
        self.model.borrow().power_cycles
    }

    pub fn set_failing(&self, failing: bool) {
        self.model.borrow_mut().failing = failing;
    }

    fn switch(&self, switch: EpsSwitch, enabled: bool) -> Result<(), DeviceError> {
        let mut model = self.model.borrow_mut();
        if model.failing {
            return Err(DeviceError::Bus(I2cError::Nack));
        }
        model.operations.push((switch, enabled));
        Ok(())
    }
}

impl PowerControl for SimulatedEps {
    fn set_thermal_knife(&mut self, channel: SailChannel, enabled: bool) -> Result<(), DeviceError> {
        self.switch(EpsSwitch::ThermalKnife(channel), enabled)
    }

    fn set_burn_switch(&mut self, channel: SailChannel, enabled: bool) -> Result<(), DeviceError> {
        self.switch(EpsSwitch::BurnSwitch(channel), enabled)
    }

    fn power_cycle(&mut self) -> Result<(), DeviceError> {
        let mut model = self.model.borrow_mut();
        if model.failing {
            return Err(DeviceError::Bus(I2cError::Nack));
        }
        model.power_cycles += 1;
        Ok(())
    }
}

/// Mission clock driven by the caller.
#[derive(Debug, Clone, Default)]
pub struct SimulatedClock {
    now: Rc<Cell<Duration>>,
}

impl SimulatedClock {
    pub fn new(start: Duration) -> Self {
        Self {
            now: Rc::new(Cell::new(start)),
        }
    }

    pub fn now(&self) -> Duration {
        self.now.get()
    }

    pub fn advance(&self, step: Duration) {
        self.now.set(self.now.get() + step);
    }

    pub fn set(&self, time: Duration) {
        self.now.set(time);
    }
}

impl TimeSource for SimulatedClock {
    fn current_time(&mut self) -> Result<Duration, DeviceError> {
        Ok(self.now.get())
    }

    fn set_time(&mut self, time: Duration) -> Result<(), DeviceError> {
        self.now.set(time);
        Ok(())
    }
}

/// FRAM region whose contents outlive the OBC that writes it.
#[derive(Debug, Clone, Default)]
pub struct SimulatedFram {
    region: Rc<RefCell<MemoryStorage>>,
}

impl SimulatedFram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.region.borrow().region().to_vec()
    }

    pub fn set_failing(&self, failing: bool) {
        self.region.borrow_mut().set_failing(failing);
    }
}

impl PersistentStorage for SimulatedFram {
    fn read(&mut self, buffer: &mut [u8]) -> Result<(), StorageError> {
        self.region.borrow_mut().read(buffer)
    }

    fn write(&mut self, data: &[u8]) -> Result<(), StorageError> {
        self.region.borrow_mut().write(data)
    }
}

/// Delay that returns immediately; simulated time is advanced explicitly.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDelay;

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}
