use crate::comm::{FrameTransmitter, MAX_DOWNLINK_FRAME_SIZE};
use crate::mission::{Action, NotifyTimeChanged, Shared};
use crate::state::{AdcsMode, MessageSettings, SailState, SystemState};
use bincode::config::standard;
use bincode::error::{DecodeError, EncodeError};
use core::time::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

pub const DEFAULT_BEACON_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Status frame downlinked periodically once the antennas are out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beacon {
    #[serde(with = "serde_bytes")]
    pub callsign: Vec<u8>,
    pub timestamp_ms: u64,
    pub antenna_deployed: bool,
    pub sail_state: SailState,
    pub adcs_mode: AdcsMode,
}

impl Beacon {
    pub fn from_state(state: &SystemState) -> Self {
        Self {
            callsign: state.persistent.get::<MessageSettings>().callsign.as_bytes().to_vec(),
            timestamp_ms: u64::try_from(state.time.as_millis()).unwrap_or(u64::MAX),
            antenna_deployed: state.antenna_state.deployed,
            sail_state: state.sail_state,
            adcs_mode: state.adcs_mode,
        }
    }

    pub fn encode(&self, buffer: &mut [u8]) -> Result<usize, EncodeError> {
        bincode::serde::encode_into_slice(self, buffer, standard())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        bincode::serde::decode_from_slice(bytes, standard()).map(|(beacon, _)| beacon)
    }
}

/// Sends the beacon every interval, or right away when forced.
pub struct BeaconUpdateTask {
    transmitter: Shared<dyn FrameTransmitter>,
    interval: Duration,
    last_sent: Option<Duration>,
    force: bool,
}

impl BeaconUpdateTask {
    pub fn new(transmitter: Shared<dyn FrameTransmitter>, interval: Duration) -> Self {
        Self {
            transmitter,
            interval,
            last_sent: None,
            force: false,
        }
    }

    /// Sends at the next opportunity regardless of the interval.
    pub fn request_immediate(&mut self) {
        self.force = true;
    }

    pub fn last_sent(&self) -> Option<Duration> {
        self.last_sent
    }
}

impl Action<SystemState> for BeaconUpdateTask {
    fn condition(&self, state: &SystemState) -> bool {
        if !state.antenna_state.deployed {
            return false;
        }

        self.force
            || self
                .last_sent
                .map_or(true, |sent| state.time.saturating_sub(sent) >= self.interval)
    }

    fn execute(&mut self, state: &mut SystemState) {
        let mut frame = [0u8; MAX_DOWNLINK_FRAME_SIZE];
        let size = match Beacon::from_state(state).encode(&mut frame) {
            Ok(size) => size,
            Err(err) => {
                error!("unable to encode beacon: {}", err);
                return;
            }
        };

        if self.transmitter.borrow_mut().send_frame(&frame[..size]) {
            debug!(size, "beacon sent");
            self.last_sent = Some(state.time);
            self.force = false;
        } else {
            warn!("beacon not accepted, retrying next cycle");
        }
    }
}

impl NotifyTimeChanged for BeaconUpdateTask {
    fn on_time_changed(&mut self, previous: Duration, current: Duration) {
        self.last_sent = self.last_sent.map(|sent| rebase(sent, previous, current));
    }
}

/// Moves `timestamp` by the same amount mission time jumped.
pub(crate) fn rebase(timestamp: Duration, previous: Duration, current: Duration) -> Duration {
    if current >= previous {
        timestamp.saturating_add(current - previous)
    } else {
        timestamp.saturating_sub(previous - current)
    }
}

impl core::fmt::Debug for BeaconUpdateTask {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BeaconUpdateTask")
            .field("interval", &self.interval)
            .field("last_sent", &self.last_sent)
            .field("force", &self.force)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_beacon_fits_downlink_frame() {
        let mut state = SystemState::default();
        state.time = Duration::from_secs(3600);
        state.antenna_state.deployed = true;

        let beacon = Beacon::from_state(&state);
        let mut frame = [0u8; MAX_DOWNLINK_FRAME_SIZE];
        let size = beacon.encode(&mut frame).unwrap();

        assert!(size <= MAX_DOWNLINK_FRAME_SIZE);
        let decoded = Beacon::decode(&frame[..size]).unwrap();
        assert_eq!(decoded.callsign, b"SP9PWS");
        assert_eq!(decoded.timestamp_ms, 3_600_000);
    }

    #[test]
    fn test_rebase_follows_time_jump() {
        let sent = Duration::from_secs(100);
        assert_eq!(rebase(sent, Duration::from_secs(150), Duration::from_secs(250)), Duration::from_secs(200));
        assert_eq!(rebase(sent, Duration::from_secs(150), Duration::from_secs(20)), Duration::ZERO);
    }
}
