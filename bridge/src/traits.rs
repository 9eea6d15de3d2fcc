//! # Platform Seams
//!
//! The engine never touches hardware directly. Everything it needs from the
//! board is expressed as a small trait so the same session code runs on the
//! microcontroller and against the simulated module in tests:
//!
//! - **Transport**: any `embedded_io::{Read, Write, ReadReady}` serial port
//! - **Clock**: millisecond time source plus blocking delay
//! - **NvStorage**: byte-range access to the settings EEPROM
//! - **RomReader**: accessor for fragments stored in program memory
//!
//! ## Design Rationale
//!
//! 1. **Testability**: fake transports and clocks drive every blocking path
//! 2. **Bounded blocking**: all waits are spins against [`Clock::now_ms`]
//! 3. **No callbacks**: the caller always gets control back with a status

use thiserror::Error;

/// Errors produced by the serial link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkError {
    /// The underlying transport reported an I/O failure
    #[error("transport error: {0:?}")]
    Io(embedded_io::ErrorKind),
    /// The expected text did not arrive before the deadline
    #[error("timed out waiting for the module")]
    Timeout,
}

impl LinkError {
    /// Collapse any transport error into its portable kind
    pub fn io<E: embedded_io::Error>(e: E) -> Self {
        LinkError::Io(e.kind())
    }
}

/// Result type alias for link operations
pub type LinkResult<T> = Result<T, LinkError>;

/// Millisecond time source used by every bounded spin
pub trait Clock {
    /// Monotonic milliseconds since an arbitrary epoch
    fn now_ms(&self) -> u64;

    /// Block for roughly `ms` milliseconds
    fn delay_ms(&mut self, ms: u32);

    /// Milliseconds elapsed since `start`
    fn elapsed_since(&self, start: u64) -> u64 {
        self.now_ms().saturating_sub(start)
    }
}

/// Byte-addressed non-volatile storage (EEPROM get/put)
pub trait NvStorage {
    /// Storage-specific error
    type Error: core::fmt::Debug;

    /// Fill `buf` with the bytes starting at `offset`
    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Store `data` starting at `offset`
    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), Self::Error>;
}

/// Reads one byte of a fragment that lives in program memory
///
/// On Harvard targets this goes through the flash accessor; on flat
/// address spaces it is a plain index.
pub type RomReader = fn(&'static [u8], usize) -> u8;

/// [`RomReader`] for targets where program memory is directly addressable
pub fn flat_rom_read(data: &'static [u8], index: usize) -> u8 {
    data[index]
}
