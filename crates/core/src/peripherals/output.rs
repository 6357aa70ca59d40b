//! Output pin driver.
//!
//! Combinational mapping from register state to the `uo_out`/`uio_out`
//! buses. Bit 0 of `uo_out` is taken from the PWM comparator when `PWM_EN`
//! is set, otherwise from `OUT` bit 0.

use super::RegisterFile;

/// Output enables for `uio`. The auxiliary bus is always driven.
pub const UIO_OE: u8 = 0xFF;

/// Primary output bus value.
pub fn primary(regs: &RegisterFile, pwm_level: bool) -> u8 {
    let bit0 = if regs.pwm_en { pwm_level as u8 } else { regs.out & 1 };
    (regs.out & 0xFE) | bit0
}

/// Auxiliary output bus value.
pub fn aux(regs: &RegisterFile) -> u8 {
    regs.aux
}
