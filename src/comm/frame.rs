use heapless::Vec;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;

/// Largest frame the transmitter accepts for downlink.
pub const MAX_DOWNLINK_FRAME_SIZE: usize = 235;

/// Size prefix, Doppler offset and RSSI that precede every received frame.
pub const FRAME_HEADER_SIZE: usize = 6;

/// Receive buffer large enough for a header plus a maximum sized frame.
pub const RECEIVE_BUFFER_SIZE: usize = MAX_DOWNLINK_FRAME_SIZE + FRAME_HEADER_SIZE;

const_assert!(MAX_DOWNLINK_FRAME_SIZE <= u16::MAX as usize);
const_assert!(RECEIVE_BUFFER_SIZE > FRAME_HEADER_SIZE);

pub type FrameContent = Vec<u8, RECEIVE_BUFFER_SIZE>;

/// Frame pulled from the receiver queue.
///
/// `full_frame_size` is what the transceiver claims the frame holds; the
/// content is whatever was actually captured. The two only agree for a
/// complete download.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    full_frame_size: u16,
    content: FrameContent,
}

impl Frame {
    /// Builds a frame from captured bytes. Bytes beyond the content
    /// capacity are dropped, which leaves the frame incomplete.
    pub fn new(full_frame_size: u16, content: &[u8]) -> Self {
        let captured = content.len().min(RECEIVE_BUFFER_SIZE);
        let mut buffer = FrameContent::new();
        // Cannot fail, length is clamped to capacity above.
        let _ = buffer.extend_from_slice(&content[..captured]);

        Self {
            full_frame_size,
            content: buffer,
        }
    }

    pub fn full_frame_size(&self) -> u16 {
        self.full_frame_size
    }

    pub fn payload(&self) -> &[u8] {
        &self.content
    }

    pub fn is_size_valid(&self) -> bool {
        usize::from(self.full_frame_size) <= MAX_DOWNLINK_FRAME_SIZE
    }

    pub fn is_complete(&self) -> bool {
        self.content.len() == usize::from(self.full_frame_size)
    }

    pub fn verify(&self) -> bool {
        self.is_size_valid() && self.is_complete()
    }
}

/// What the ground asked for in an uplinked frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FrameType {
    #[default]
    None,
    SendBeacon,
    Reboot,
}

impl FrameType {
    /// Folds two frame results into the most significant one: a reboot
    /// request always wins, a beacon request only beats no request.
    #[must_use]
    pub fn merge(self, other: FrameType) -> FrameType {
        match (self, other) {
            (FrameType::Reboot, _) | (_, FrameType::Reboot) => FrameType::Reboot,
            (FrameType::SendBeacon, _) | (_, FrameType::SendBeacon) => FrameType::SendBeacon,
            _ => FrameType::None,
        }
    }
}
