//! Driver for the half-duplex COMM transceiver.
//!
//! The transceiver exposes two I2C devices: a receiver holding a queue of
//! uplinked frames and a transmitter accepting downlink frames. Neither
//! supports clock stretching, so every request that expects a reply is a
//! write, a short settling delay and a separate read.

pub mod frame;

pub use frame::{Frame, FrameType, FRAME_HEADER_SIZE, MAX_DOWNLINK_FRAME_SIZE, RECEIVE_BUFFER_SIZE};

use crate::transport::{Address, I2cBus, I2cError};
use embedded_hal::delay::DelayNs;
use heapless::Vec;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use tracing::{debug, error, info, warn};

pub const RECEIVER_ADDRESS: Address = 0x60;
pub const TRANSMITTER_ADDRESS: Address = 0x61;

/// Number of download attempts for a single frame before giving up.
pub const FRAME_RETRY_COUNT: u8 = 3;

/// Time the transceiver needs between a request and its reply.
const RESPONSE_SETTLE_TIME_MS: u32 = 2;

/// Remaining-capacity reply meaning the transmitter refused the frame.
const FRAME_REJECTED: u8 = 0xFF;

/// Uplink command byte requesting an immediate beacon.
pub const BEACON_REQUEST_COMMAND: u8 = 0xAE;

pub const DEFAULT_SECURITY_CODE: u32 = 0xBAAD_F00D;

const SEND_FRAME_BUFFER_SIZE: usize = MAX_DOWNLINK_FRAME_SIZE + 1;
const_assert!(SEND_FRAME_BUFFER_SIZE > MAX_DOWNLINK_FRAME_SIZE);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReceiverCommand {
    GetFrameCount = 0x21,
    GetFrame = 0x22,
    RemoveFrame = 0x24,
    ResetWatchdog = 0xCC,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransmitterCommand {
    SendFrame = 0x10,
    SetBitRate = 0x28,
    ResetWatchdog = 0xCC,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum BitRate {
    Comm1200 = 1,
    Comm2400 = 2,
    Comm4800 = 4,
    Comm9600 = 8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommConfig {
    /// Code every uplinked frame must start with (big endian).
    pub security_code: u32,
}

impl Default for CommConfig {
    fn default() -> Self {
        Self {
            security_code: DEFAULT_SECURITY_CODE,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommStats {
    pub frames_received: u32,
    pub frames_dropped: u32,
    pub frames_sent: u32,
    pub frames_rejected: u32,
    pub watchdog_resets: u32,
}

/// Anything that can queue a frame for downlink.
pub trait FrameTransmitter {
    /// Returns `true` once the frame has been accepted for transmission.
    fn send_frame(&mut self, frame: &[u8]) -> bool;
}

#[derive(Debug)]
pub struct CommDriver<B, D> {
    bus: B,
    delay: D,
    config: CommConfig,
    stats: CommStats,
}

impl<B: I2cBus, D: DelayNs> CommDriver<B, D> {
    pub fn new(bus: B, delay: D, config: CommConfig) -> Self {
        Self {
            bus,
            delay,
            config,
            stats: CommStats::default(),
        }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn stats(&self) -> &CommStats {
        &self.stats
    }

    pub fn release(self) -> (B, D) {
        (self.bus, self.delay)
    }

    pub fn send_command(&mut self, address: Address, command: u8) -> bool {
        match self.bus.write(address, &[command]) {
            Ok(()) => true,
            Err(err) => {
                log_transport_error("command", address, command, err);
                false
            }
        }
    }

    /// Writes `request`, waits for the device to prepare its reply and reads
    /// exactly `response.len()` bytes.
    pub fn send_buffer_with_response(
        &mut self,
        address: Address,
        request: &[u8],
        response: &mut [u8],
    ) -> bool {
        let Some(&command) = request.first() else {
            error!(address, "refusing to send empty request");
            return false;
        };

        if let Err(err) = self.bus.write(address, request) {
            log_transport_error("request", address, command, err);
            return false;
        }

        self.delay.delay_ms(RESPONSE_SETTLE_TIME_MS);

        if let Err(err) = self.bus.read(address, response) {
            log_transport_error("response", address, command, err);
            return false;
        }

        true
    }

    pub fn get_frame_count(&mut self) -> Option<u16> {
        let mut response = [0u8; 2];
        if !self.send_buffer_with_response(
            RECEIVER_ADDRESS,
            &[ReceiverCommand::GetFrameCount as u8],
            &mut response,
        ) {
            return None;
        }

        Some(u16::from_le_bytes(response))
    }

    /// Drains the receiver queue and keeps both watchdogs alive.
    ///
    /// Returns the most significant request found among the drained frames.
    pub fn poll_hardware(&mut self) -> FrameType {
        let mut result = FrameType::None;

        match self.get_frame_count() {
            None => error!("unable to get frame count"),
            Some(0) => {}
            Some(frame_count) => {
                debug!(frame_count, "processing received frames");
                for _ in 0..frame_count {
                    result = result.merge(self.process_single_frame());
                }
            }
        }

        if !self.reset_watchdog_receiver() {
            error!("unable to reset receiver watchdog");
        }

        if !self.reset_watchdog_transmitter() {
            error!("unable to reset transmitter watchdog");
        }

        result
    }

    /// Downloads, interprets and removes the frame at the head of the
    /// receiver queue. The frame is removed even when it could not be read
    /// so one corrupt frame never wedges the queue.
    pub fn process_single_frame(&mut self) -> FrameType {
        let mut buffer = [0u8; RECEIVE_BUFFER_SIZE];

        let result = match self.get_frame(&mut buffer, FRAME_RETRY_COUNT) {
            Some(frame) => {
                self.stats.frames_received = self.stats.frames_received.saturating_add(1);
                self.handle_frame(&frame)
            }
            None => {
                error!("unable to receive frame");
                self.stats.frames_dropped = self.stats.frames_dropped.saturating_add(1);
                FrameType::None
            }
        };

        if !self.remove_frame_internal() {
            error!("unable to remove frame from receiver buffer");
        }

        result
    }

    /// Interprets a verified frame: `[security code: u32 BE][command: u8]`.
    pub fn handle_frame(&self, frame: &Frame) -> FrameType {
        let Some((code, rest)) = frame.payload().split_first_chunk::<4>() else {
            debug!("frame too short for security code");
            return FrameType::None;
        };

        if u32::from_be_bytes(*code) != self.config.security_code {
            warn!("ignoring frame with invalid security code");
            return FrameType::None;
        }

        match rest.first() {
            None => {
                debug!("frame has no command");
                FrameType::None
            }
            Some(&BEACON_REQUEST_COMMAND) => {
                info!("received beacon request");
                FrameType::SendBeacon
            }
            Some(&command) => {
                info!(command, "received reboot request");
                FrameType::Reboot
            }
        }
    }

    /// Downloads the head frame, retrying until it verifies. A retry count
    /// of zero performs no bus traffic.
    pub fn get_frame(&mut self, buffer: &mut [u8], retry_count: u8) -> Option<Frame> {
        for attempt in 1..=retry_count {
            match self.receive_frame_internal(buffer) {
                Some(frame) if frame.verify() => return Some(frame),
                Some(frame) => warn!(
                    attempt,
                    full_frame_size = frame.full_frame_size(),
                    captured = frame.payload().len(),
                    "received invalid frame"
                ),
                None => warn!(attempt, "frame download failed"),
            }
        }

        None
    }

    /// Two-phase download: the first read learns the frame size, the second
    /// fetches the header plus as much of the frame as `buffer` holds.
    pub fn receive_frame_internal(&mut self, buffer: &mut [u8]) -> Option<Frame> {
        if buffer.len() < 2 {
            error!(capacity = buffer.len(), "receive buffer cannot hold frame size");
            return None;
        }

        let request = [ReceiverCommand::GetFrame as u8];
        if !self.send_buffer_with_response(RECEIVER_ADDRESS, &request, &mut buffer[..2]) {
            return None;
        }

        let size = u16::from_le_bytes([buffer[0], buffer[1]]);
        let span = buffer.len().min(usize::from(size) + FRAME_HEADER_SIZE);

        if !self.send_buffer_with_response(RECEIVER_ADDRESS, &request, &mut buffer[..span]) {
            return None;
        }

        let received = &buffer[..span];
        let full_frame_size = received
            .first_chunk::<2>()
            .map_or(0, |bytes| u16::from_le_bytes(*bytes));

        // A short second read still yields a frame; verification rejects it.
        let content: &[u8] = match received.get(FRAME_HEADER_SIZE..) {
            Some(content) => content,
            None => {
                error!(received_len = span, "frame response shorter than frame header");
                &[]
            }
        };

        Some(Frame::new(full_frame_size, content))
    }

    pub fn remove_frame_internal(&mut self) -> bool {
        self.send_command(RECEIVER_ADDRESS, ReceiverCommand::RemoveFrame as u8)
    }

    pub fn reset_watchdog_receiver(&mut self) -> bool {
        let ok = self.send_command(RECEIVER_ADDRESS, ReceiverCommand::ResetWatchdog as u8);
        if ok {
            self.stats.watchdog_resets = self.stats.watchdog_resets.saturating_add(1);
        }
        ok
    }

    pub fn reset_watchdog_transmitter(&mut self) -> bool {
        let ok = self.send_command(TRANSMITTER_ADDRESS, TransmitterCommand::ResetWatchdog as u8);
        if ok {
            self.stats.watchdog_resets = self.stats.watchdog_resets.saturating_add(1);
        }
        ok
    }

    pub fn send_frame(&mut self, frame: &[u8]) -> bool {
        if frame.len() > MAX_DOWNLINK_FRAME_SIZE {
            error!(size = frame.len(), "frame too long for downlink");
            return false;
        }

        let mut command: Vec<u8, SEND_FRAME_BUFFER_SIZE> = Vec::new();
        let assembled =
            command.push(TransmitterCommand::SendFrame as u8).is_ok() && command.extend_from_slice(frame).is_ok();
        debug_assert!(assembled, "send buffer holds the command byte plus a maximum sized frame");
        if !assembled {
            error!(size = frame.len(), "unable to assemble send frame command");
            return false;
        }

        let mut remaining = [0u8; 1];
        if !self.send_buffer_with_response(TRANSMITTER_ADDRESS, &command, &mut remaining) {
            return false;
        }

        if remaining[0] == FRAME_REJECTED {
            error!("transmitter rejected frame");
            self.stats.frames_rejected = self.stats.frames_rejected.saturating_add(1);
            return false;
        }

        self.stats.frames_sent = self.stats.frames_sent.saturating_add(1);
        debug!(remaining = remaining[0], "frame queued for downlink");
        true
    }

    pub fn set_transmitter_bit_rate(&mut self, bitrate: BitRate) -> bool {
        let command = [TransmitterCommand::SetBitRate as u8, bitrate as u8];
        match self.bus.write(TRANSMITTER_ADDRESS, &command) {
            Ok(()) => true,
            Err(err) => {
                log_transport_error("bit rate", TRANSMITTER_ADDRESS, command[0], err);
                false
            }
        }
    }
}

impl<B: I2cBus, D: DelayNs> FrameTransmitter for CommDriver<B, D> {
    fn send_frame(&mut self, frame: &[u8]) -> bool {
        CommDriver::send_frame(self, frame)
    }
}

fn log_transport_error(phase: &'static str, address: Address, command: u8, err: I2cError) {
    error!(
        phase,
        address,
        command,
        code = err.code(),
        class = ?err.class(),
        "comm transfer failed: {}",
        err
    );
}
