//! Bit-banging SPI master.
//!
//! Drives the core's `ui_in` pins the way the reference bus client does:
//!
//! 1. pull `nCS` low with `SCLK` low for one tick
//! 2. for each of the 16 bits, MSB first: set `COPI` with `SCLK` low and hold
//!    for half a period, then raise `SCLK` and hold for half a period
//! 3. release `nCS`, drop `SCLK`, and idle for `idle_ticks`
//!
//! With the default 50-tick half period the bus clock is oversampled 100×.

use thiserror::Error;

use crate::peripherals::{Direction, Frame, FRAME_BITS};
use crate::{Peripheral, Pins};

/// Default `SCLK` half period in ticks
pub const DEFAULT_HALF_PERIOD: u64 = 50;
/// Default idle gap after each transaction in ticks
pub const DEFAULT_IDLE_TICKS: u64 = 600;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DriverError {
    #[error("address 0x{0:02X} does not fit in 7 bits")]
    AddressOutOfRange(u8),
    #[error("abort must happen before bit {max}, got {got}")]
    AbortLength { got: u8, max: u8 },
    #[error("SCLK half period must be at least one tick")]
    ZeroHalfPeriod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiMaster {
    pub half_period: u64,
    pub idle_ticks: u64,
}

impl Default for SpiMaster {
    fn default() -> Self {
        SpiMaster { half_period: DEFAULT_HALF_PERIOD, idle_ticks: DEFAULT_IDLE_TICKS }
    }
}

impl SpiMaster {
    pub fn new(half_period: u64, idle_ticks: u64) -> Result<Self, DriverError> {
        if half_period == 0 {
            return Err(DriverError::ZeroHalfPeriod);
        }
        Ok(SpiMaster { half_period, idle_ticks })
    }

    pub fn write(&self, p: &mut Peripheral, address: u8, data: u8) -> Result<(), DriverError> {
        self.transfer(p, Direction::Write, address, data)
    }

    /// Send a read frame. The core returns no data; `data` fills the low byte.
    pub fn read(&self, p: &mut Peripheral, address: u8, data: u8) -> Result<(), DriverError> {
        self.transfer(p, Direction::Read, address, data)
    }

    /// Send one complete 16-bit frame.
    pub fn transfer(
        &self,
        p: &mut Peripheral,
        direction: Direction,
        address: u8,
        data: u8,
    ) -> Result<(), DriverError> {
        let word = Self::encode(direction, address, data)?;
        self.shift_out(p, word, FRAME_BITS);
        Ok(())
    }

    /// Send only the first `bits` bits of a frame, then release `nCS`.
    pub fn abort_after(
        &self,
        p: &mut Peripheral,
        direction: Direction,
        address: u8,
        data: u8,
        bits: u8,
    ) -> Result<(), DriverError> {
        if bits >= FRAME_BITS {
            return Err(DriverError::AbortLength { got: bits, max: FRAME_BITS });
        }
        let word = Self::encode(direction, address, data)?;
        self.shift_out(p, word, bits);
        Ok(())
    }

    fn encode(direction: Direction, address: u8, data: u8) -> Result<u16, DriverError> {
        if address > 0x7F {
            return Err(DriverError::AddressOutOfRange(address));
        }
        Ok(Frame { direction, address, data }.to_bits())
    }

    fn shift_out(&self, p: &mut Peripheral, word: u16, bits: u8) {
        p.set_inputs(Pins::bus(false, false, false));
        p.tick();

        for i in 0..bits {
            let bit = (word >> (FRAME_BITS - 1 - i)) & 1 != 0;
            p.set_inputs(Pins::bus(false, bit, false));
            p.run(self.half_period);
            p.set_inputs(Pins::bus(false, bit, true));
            p.run(self.half_period);
        }

        p.set_inputs(Pins::bus(true, false, false));
        p.run(self.idle_ticks);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_range_checked() {
        let mut p = Peripheral::default();
        let spi = SpiMaster::default();
        assert_eq!(spi.write(&mut p, 0x80, 0), Err(DriverError::AddressOutOfRange(0x80)));
        assert_eq!(p.tick_count(), 0);
    }

    #[test]
    fn test_abort_length_checked() {
        let mut p = Peripheral::default();
        let spi = SpiMaster::default();
        assert_eq!(
            spi.abort_after(&mut p, Direction::Write, 0, 0, 16),
            Err(DriverError::AbortLength { got: 16, max: 16 })
        );
    }

    #[test]
    fn test_transaction_length() {
        let mut p = Peripheral::default();
        let spi = SpiMaster::new(10, 20).unwrap();
        spi.write(&mut p, 0x01, 0x5A).unwrap();
        assert_eq!(p.tick_count(), 1 + 16 * 20 + 20);
        assert_eq!(p.uio_out(), 0x5A);
        assert!(p.pins().ncs());
    }

    #[test]
    fn test_short_half_period_still_decodes() {
        // Two ticks per level is the floor for a two-stage synchronizer.
        let mut p = Peripheral::default();
        let spi = SpiMaster::new(2, 4).unwrap();
        spi.write(&mut p, 0x00, 0x96).unwrap();
        assert_eq!(p.uo_out(), 0x96);
    }

    #[test]
    fn test_zero_half_period_rejected() {
        assert_eq!(SpiMaster::new(0, 0), Err(DriverError::ZeroHalfPeriod));
    }
}
