//! Byte-oriented bus abstraction shared by every device driver.
//!
//! Drivers only ever see [`I2cBus`]. Cross-cutting policies (fallback to a
//! redundant bus, power cycling after repeated failures) are layered on as
//! decorators that are composed once at boot and never rewired.

use embedded_hal::delay::DelayNs;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

/// 7-bit device address on the bus.
pub type Address = u8;

/// Failure reported by a bus transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum I2cError {
    #[error("device did not acknowledge")]
    Nack,
    #[error("bus error")]
    BusError,
    #[error("arbitration lost")]
    ArbitrationLost,
    #[error("peripheral usage fault")]
    UsageFault,
    #[error("driver software fault")]
    SoftwareFault,
    #[error("bus line latched")]
    LineLatched,
    #[error("transfer timed out")]
    Timeout,
    #[error("transfer failed")]
    Failure,
    #[error("bus line was already latched")]
    LineAlreadyLatched,
}

/// Coarse grouping used when reporting transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    IoError,
    Timeout,
    ProtocolError,
}

impl I2cError {
    /// Raw result code as reported by the bus peripheral driver.
    pub fn code(self) -> i8 {
        match self {
            I2cError::Nack => -1,
            I2cError::BusError => -2,
            I2cError::ArbitrationLost => -3,
            I2cError::UsageFault => -4,
            I2cError::SoftwareFault => -5,
            I2cError::LineLatched => -6,
            I2cError::Timeout => -7,
            I2cError::Failure => -8,
            I2cError::LineAlreadyLatched => -9,
        }
    }

    pub fn class(self) -> ErrorClass {
        match self {
            I2cError::Timeout => ErrorClass::Timeout,
            I2cError::UsageFault | I2cError::SoftwareFault | I2cError::Failure => {
                ErrorClass::ProtocolError
            }
            I2cError::Nack
            | I2cError::BusError
            | I2cError::ArbitrationLost
            | I2cError::LineLatched
            | I2cError::LineAlreadyLatched => ErrorClass::IoError,
        }
    }
}

/// Addressed, half-duplex byte transport.
pub trait I2cBus {
    fn write(&mut self, address: Address, data: &[u8]) -> Result<(), I2cError>;

    fn read(&mut self, address: Address, buffer: &mut [u8]) -> Result<(), I2cError>;

    /// Write followed by a repeated-start read in a single transaction.
    fn write_read(
        &mut self,
        address: Address,
        output: &[u8],
        input: &mut [u8],
    ) -> Result<(), I2cError>;
}

impl<B: I2cBus + ?Sized> I2cBus for &mut B {
    fn write(&mut self, address: Address, data: &[u8]) -> Result<(), I2cError> {
        (**self).write(address, data)
    }

    fn read(&mut self, address: Address, buffer: &mut [u8]) -> Result<(), I2cError> {
        (**self).read(address, buffer)
    }

    fn write_read(
        &mut self,
        address: Address,
        output: &[u8],
        input: &mut [u8],
    ) -> Result<(), I2cError> {
        (**self).write_read(address, output, input)
    }
}

/// Routes every transaction to a primary bus and repeats it once on the
/// secondary bus when the primary fails.
#[derive(Debug)]
pub struct FallbackBus<P, S> {
    primary: P,
    secondary: S,
}

impl<P: I2cBus, S: I2cBus> FallbackBus<P, S> {
    pub fn new(primary: P, secondary: S) -> Self {
        Self { primary, secondary }
    }

    pub fn primary_mut(&mut self) -> &mut P {
        &mut self.primary
    }

    pub fn secondary_mut(&mut self) -> &mut S {
        &mut self.secondary
    }

    fn on_primary_error(address: Address, err: I2cError) {
        warn!(address, code = err.code(), "primary bus failed, falling back to secondary bus");
    }
}

impl<P: I2cBus, S: I2cBus> I2cBus for FallbackBus<P, S> {
    fn write(&mut self, address: Address, data: &[u8]) -> Result<(), I2cError> {
        self.primary.write(address, data).or_else(|err| {
            Self::on_primary_error(address, err);
            self.secondary.write(address, data)
        })
    }

    fn read(&mut self, address: Address, buffer: &mut [u8]) -> Result<(), I2cError> {
        match self.primary.read(address, buffer) {
            Ok(()) => Ok(()),
            Err(err) => {
                Self::on_primary_error(address, err);
                self.secondary.read(address, buffer)
            }
        }
    }

    fn write_read(
        &mut self,
        address: Address,
        output: &[u8],
        input: &mut [u8],
    ) -> Result<(), I2cError> {
        match self.primary.write_read(address, output, input) {
            Ok(()) => Ok(()),
            Err(err) => {
                Self::on_primary_error(address, err);
                self.secondary.write_read(address, output, input)
            }
        }
    }
}

/// Counts consecutive transport failures and fires a recovery hook (in
/// flight: an EPS power cycle of the affected bus) once the limit is hit.
pub struct ErrorHandlingBus<B> {
    inner: B,
    consecutive_errors: u8,
    error_limit: u8,
    on_limit: Box<dyn FnMut()>,
}

impl<B: I2cBus> ErrorHandlingBus<B> {
    pub fn new(inner: B, error_limit: u8, on_limit: impl FnMut() + 'static) -> Self {
        debug_assert!(error_limit > 0, "error limit must be non-zero");

        Self {
            inner,
            consecutive_errors: 0,
            error_limit: error_limit.max(1),
            on_limit: Box::new(on_limit),
        }
    }

    pub fn consecutive_errors(&self) -> u8 {
        self.consecutive_errors
    }

    pub fn inner_mut(&mut self) -> &mut B {
        &mut self.inner
    }

    fn track(&mut self, address: Address, result: Result<(), I2cError>) -> Result<(), I2cError> {
        match result {
            Ok(()) => self.consecutive_errors = 0,
            Err(err) => {
                self.consecutive_errors = self.consecutive_errors.saturating_add(1);
                if self.consecutive_errors >= self.error_limit {
                    error!(
                        address,
                        code = err.code(),
                        errors = self.consecutive_errors,
                        "bus error limit reached, triggering recovery"
                    );
                    self.consecutive_errors = 0;
                    (self.on_limit)();
                }
            }
        }
        result
    }
}

impl<B: I2cBus> I2cBus for ErrorHandlingBus<B> {
    fn write(&mut self, address: Address, data: &[u8]) -> Result<(), I2cError> {
        let result = self.inner.write(address, data);
        self.track(address, result)
    }

    fn read(&mut self, address: Address, buffer: &mut [u8]) -> Result<(), I2cError> {
        let result = self.inner.read(address, buffer);
        self.track(address, result)
    }

    fn write_read(
        &mut self,
        address: Address,
        output: &[u8],
        input: &mut [u8],
    ) -> Result<(), I2cError> {
        let result = self.inner.write_read(address, output, input);
        self.track(address, result)
    }
}

impl<B> core::fmt::Debug for ErrorHandlingBus<B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ErrorHandlingBus")
            .field("consecutive_errors", &self.consecutive_errors)
            .field("error_limit", &self.error_limit)
            .finish_non_exhaustive()
    }
}

/// Blocking delay backed by the host scheduler.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdDelay;

impl DelayNs for StdDelay {
    fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(std::time::Duration::from_nanos(u64::from(ns)));
    }
}
