#![allow(dead_code)]

use embedded_hal::delay::DelayNs;
use obc::transport::{Address, I2cBus, I2cError};
use std::cell::Cell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

pub const SECURITY_CODE: u32 = obc::comm::DEFAULT_SECURITY_CODE;

/// Scripted bus: records every write and answers reads based on the last
/// command byte written to the same address.
#[derive(Debug, Default)]
pub struct MockBus {
    pub writes: Vec<(Address, Vec<u8>)>,
    pub reads: Vec<(Address, usize)>,
    responses: HashMap<(Address, u8), VecDeque<Vec<u8>>>,
    failing_writes: HashSet<(Address, u8)>,
    failing_reads: HashSet<(Address, u8)>,
    last_command: HashMap<Address, u8>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a reply for reads following `command`. The last queued reply
    /// keeps being served once the queue is down to one entry.
    pub fn respond(&mut self, address: Address, command: u8, response: &[u8]) {
        self.responses
            .entry((address, command))
            .or_default()
            .push_back(response.to_vec());
    }

    pub fn fail_write(&mut self, address: Address, command: u8) {
        self.failing_writes.insert((address, command));
    }

    pub fn fail_read(&mut self, address: Address, command: u8) {
        self.failing_reads.insert((address, command));
    }

    pub fn writes_of(&self, address: Address, command: u8) -> usize {
        self.writes
            .iter()
            .filter(|(a, data)| *a == address && data.first() == Some(&command))
            .count()
    }

    /// First byte of every write to `address`, in order.
    pub fn commands(&self, address: Address) -> Vec<u8> {
        self.writes
            .iter()
            .filter(|(a, _)| *a == address)
            .filter_map(|(_, data)| data.first().copied())
            .collect()
    }
}

impl I2cBus for MockBus {
    fn write(&mut self, address: Address, data: &[u8]) -> Result<(), I2cError> {
        self.writes.push((address, data.to_vec()));
        let command = data.first().copied().unwrap_or_default();
        self.last_command.insert(address, command);

        if self.failing_writes.contains(&(address, command)) {
            return Err(I2cError::Nack);
        }
        Ok(())
    }

    fn read(&mut self, address: Address, buffer: &mut [u8]) -> Result<(), I2cError> {
        self.reads.push((address, buffer.len()));
        let command = self.last_command.get(&address).copied().unwrap_or_default();

        if self.failing_reads.contains(&(address, command)) {
            return Err(I2cError::Timeout);
        }

        buffer.fill(0);
        if let Some(queue) = self.responses.get_mut(&(address, command)) {
            let response = if queue.len() > 1 {
                queue.pop_front().unwrap_or_default()
            } else {
                queue.front().cloned().unwrap_or_default()
            };
            let available = response.len().min(buffer.len());
            buffer[..available].copy_from_slice(&response[..available]);
        }
        Ok(())
    }

    fn write_read(&mut self, address: Address, output: &[u8], input: &mut [u8]) -> Result<(), I2cError> {
        self.write(address, output)?;
        self.read(address, input)
    }
}

/// Delay that only adds up how long it was asked to wait.
#[derive(Debug, Clone, Default)]
pub struct RecordingDelay {
    pub total_ns: Rc<Cell<u64>>,
}

impl DelayNs for RecordingDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ns.set(self.total_ns.get() + u64::from(ns));
    }
}

/// Receiver reply to GetFrame: size, Doppler, RSSI, then the frame.
pub fn frame_response(frame: &[u8]) -> Vec<u8> {
    let mut response = (frame.len() as u16).to_le_bytes().to_vec();
    response.extend_from_slice(&[0x00, 0x01, 0x00, 0x02]);
    response.extend_from_slice(frame);
    response
}

/// Telecommand frame: security code (big endian) followed by a command.
pub fn telecommand(security_code: u32, command: u8) -> Vec<u8> {
    let mut frame = security_code.to_be_bytes().to_vec();
    frame.push(command);
    frame
}
