//! State that survives a reset.
//!
//! The persisted image is `[magic][bincode body][magic]`. An image whose
//! envelope or body does not check out is rejected as a whole and the
//! in-memory state is left as it was.

use arrayvec::ArrayString;
use bincode::config::standard;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

pub const PERSISTENT_STATE_MAGIC: [u8; 4] = [0xEE, 0x77, 0xAA, 0x55];

/// Size of the storage region reserved for the persisted image.
pub const PERSISTENT_STATE_SIZE: usize = 256;

const MAGIC_SIZE: usize = PERSISTENT_STATE_MAGIC.len();
const CALLSIGN_CAPACITY: usize = 16;
const DEFAULT_CALLSIGN: &str = "SP9PWS";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistentStateError {
    #[error("buffer of {0} bytes cannot hold persistent state")]
    BufferTooSmall(usize),
    #[error("leading magic mismatch")]
    LeadingMagicMismatch,
    #[error("trailing magic mismatch")]
    TrailingMagicMismatch,
    #[error("encoding failed: {0}")]
    Encode(String),
    #[error("decoding failed: {0}")]
    Decode(String),
    #[error("storage access failed: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("storage region holds {capacity} bytes, {requested} requested")]
    OutOfRange { capacity: usize, requested: usize },
    #[error("storage device not responding")]
    DeviceFailure,
}

/// Weights used to blend the MCU timer with the external RTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeCorrectionConfig {
    pub mcu_timer_weight: i16,
    pub external_timer_weight: i16,
}

impl Default for TimeCorrectionConfig {
    fn default() -> Self {
        Self {
            mcu_timer_weight: 1,
            external_timer_weight: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AntennaConfiguration {
    pub deployment_disabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSettings {
    pub callsign: ArrayString<CALLSIGN_CAPACITY>,
}

impl Default for MessageSettings {
    fn default() -> Self {
        Self {
            callsign: ArrayString::from(DEFAULT_CALLSIGN).unwrap_or_default(),
        }
    }
}

/// Consecutive COMM bus failures tolerated before the OBC power cycles itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCountersConfig {
    pub comm_limit: u8,
}

impl Default for ErrorCountersConfig {
    fn default() -> Self {
        Self { comm_limit: 5 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SailPersistentState {
    #[default]
    Closed,
    Opening,
    Opened,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AdcsConfiguration {
    pub builtin_detumbling_disabled: bool,
}

/// Value object stored in [`PersistentState`], addressed by its type.
pub trait PersistentObject: Clone + Serialize + DeserializeOwned + 'static {
    fn slot(state: &PersistentState) -> &Self;
    fn slot_mut(state: &mut PersistentState) -> &mut Self;
}

macro_rules! persistent_state {
    ($($field:ident: $object:ty),+ $(,)?) => {
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        pub struct PersistentState {
            $($field: $object,)+
            #[serde(skip)]
            modified: bool,
        }

        $(
            impl PersistentObject for $object {
                fn slot(state: &PersistentState) -> &Self {
                    &state.$field
                }

                fn slot_mut(state: &mut PersistentState) -> &mut Self {
                    &mut state.$field
                }
            }
        )+
    };
}

persistent_state! {
    time_correction: TimeCorrectionConfig,
    antenna: AntennaConfiguration,
    message: MessageSettings,
    error_counters: ErrorCountersConfig,
    sail: SailPersistentState,
    adcs: AdcsConfiguration,
}

impl PersistentState {
    pub fn get<T: PersistentObject>(&self) -> &T {
        T::slot(self)
    }

    /// Replaces the stored object and flags the state for saving.
    pub fn set<T: PersistentObject>(&mut self, value: T) {
        *T::slot_mut(self) = value;
        self.modified = true;
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn mark_saved(&mut self) {
        self.modified = false;
    }
}

/// Serializes `state` into `buffer`, returning the number of bytes used.
pub fn write_persistent_state(
    state: &PersistentState,
    buffer: &mut [u8],
) -> Result<usize, PersistentStateError> {
    if buffer.len() < 2 * MAGIC_SIZE {
        return Err(PersistentStateError::BufferTooSmall(buffer.len()));
    }

    let body_end = buffer.len() - MAGIC_SIZE;
    buffer[..MAGIC_SIZE].copy_from_slice(&PERSISTENT_STATE_MAGIC);

    let body_len = bincode::serde::encode_into_slice(state, &mut buffer[MAGIC_SIZE..body_end], standard())
        .map_err(|err| PersistentStateError::Encode(err.to_string()))?;

    let trailer = MAGIC_SIZE + body_len;
    buffer[trailer..trailer + MAGIC_SIZE].copy_from_slice(&PERSISTENT_STATE_MAGIC);

    Ok(trailer + MAGIC_SIZE)
}

/// Restores `state` from `buffer`; on error `state` is not touched.
pub fn read_persistent_state(
    buffer: &[u8],
    state: &mut PersistentState,
) -> Result<(), PersistentStateError> {
    if buffer.len() < 2 * MAGIC_SIZE {
        return Err(PersistentStateError::BufferTooSmall(buffer.len()));
    }

    if buffer[..MAGIC_SIZE] != PERSISTENT_STATE_MAGIC {
        return Err(PersistentStateError::LeadingMagicMismatch);
    }

    let (decoded, body_len): (PersistentState, usize) =
        bincode::serde::decode_from_slice(&buffer[MAGIC_SIZE..], standard())
            .map_err(|err| PersistentStateError::Decode(err.to_string()))?;

    let trailer = MAGIC_SIZE + body_len;
    match buffer.get(trailer..trailer + MAGIC_SIZE) {
        Some(magic) if magic == PERSISTENT_STATE_MAGIC => {}
        _ => return Err(PersistentStateError::TrailingMagicMismatch),
    }

    *state = decoded;
    Ok(())
}

/// Non-volatile region holding the persisted image (FRAM on the flight unit).
pub trait PersistentStorage {
    fn read(&mut self, buffer: &mut [u8]) -> Result<(), StorageError>;
    fn write(&mut self, data: &[u8]) -> Result<(), StorageError>;
}

/// Storage region kept in RAM; starts erased (all `0xFF`).
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    region: Vec<u8>,
    failing: bool,
}

impl MemoryStorage {
    pub fn new(size: usize) -> Self {
        Self {
            region: vec![0xFF; size],
            failing: false,
        }
    }

    pub fn region(&self) -> &[u8] {
        &self.region
    }

    pub fn region_mut(&mut self) -> &mut [u8] {
        &mut self.region
    }

    /// Makes every subsequent access fail, as a dead FRAM would.
    pub fn set_failing(&mut self, failing: bool) {
        self.failing = failing;
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new(PERSISTENT_STATE_SIZE)
    }
}

impl PersistentStorage for MemoryStorage {
    fn read(&mut self, buffer: &mut [u8]) -> Result<(), StorageError> {
        if self.failing {
            return Err(StorageError::DeviceFailure);
        }
        let source = self.region.get(..buffer.len()).ok_or(StorageError::OutOfRange {
            capacity: self.region.len(),
            requested: buffer.len(),
        })?;
        buffer.copy_from_slice(source);
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), StorageError> {
        if self.failing {
            return Err(StorageError::DeviceFailure);
        }
        let capacity = self.region.len();
        let target = self.region.get_mut(..data.len()).ok_or(StorageError::OutOfRange {
            capacity,
            requested: data.len(),
        })?;
        target.copy_from_slice(data);
        Ok(())
    }
}

pub fn save(
    state: &PersistentState,
    storage: &mut dyn PersistentStorage,
) -> Result<usize, PersistentStateError> {
    let mut buffer = [0u8; PERSISTENT_STATE_SIZE];
    let used = write_persistent_state(state, &mut buffer)?;
    storage.write(&buffer[..used])?;
    Ok(used)
}

pub fn load(
    storage: &mut dyn PersistentStorage,
    state: &mut PersistentState,
) -> Result<(), PersistentStateError> {
    let mut buffer = [0u8; PERSISTENT_STATE_SIZE];
    storage.read(&mut buffer)?;
    read_persistent_state(&buffer, state)
}

/// Boot-time load: an unreadable image falls back to defaults.
pub fn load_or_default(storage: &mut dyn PersistentStorage) -> PersistentState {
    let mut state = PersistentState::default();
    match load(storage, &mut state) {
        Ok(()) => info!("persistent state restored"),
        Err(err) => warn!("persistent state unavailable, using defaults: {}", err),
    }
    state
}
