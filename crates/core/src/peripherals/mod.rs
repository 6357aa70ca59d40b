//! Peripheral blocks of the SPI-controlled PWM core.
//!
//! - [`BusSync`]: two-or-more-stage synchronizers for `nCS`/`SCLK`/`COPI` plus `SCLK` edge detection
//! - [`SpiSlave`]: 16-bit frame decoder (R/W + 7-bit address + 8-bit data)
//! - [`RegisterFile`]: `OUT`, `AUX`, `PWM_EN`, `DUTY`
//! - [`Pwm`]: free-running 8-bit counter/comparator
//! - [`output`]: combinational pin mapping

mod sync;
mod spi;
mod registers;
mod pwm;
pub mod output;

pub use sync::{BusSync, EdgeDetector, Synchronizer, SyncedBus, MAX_STAGES, MIN_STAGES};
pub use spi::{DecodeEvent, DecoderState, Direction, Frame, SpiSlave, FRAME_BITS};
pub use registers::{RegisterFile, REG_AUX, REG_DUTY, REG_OUT, REG_PWM_EN};
pub use pwm::{Pwm, PWM_STEPS};
