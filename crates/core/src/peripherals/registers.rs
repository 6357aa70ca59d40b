//! Configuration register file.
//!
//! | Addr | Width | Register |
//! |------|-------|----------|
//! | 0x00 | 8     | `OUT` primary output value |
//! | 0x01 | 8     | `AUX` auxiliary output value |
//! | 0x02 | 1     | `PWM_EN` bit 0 routes the PWM onto output bit 0 |
//! | 0x04 | 8     | `DUTY` PWM duty, 0–255 |
//!
//! Writes to any other address are accepted and dropped.

use serde::{Deserialize, Serialize};

/// Register addresses
pub const REG_OUT: u8 = 0x00;
pub const REG_AUX: u8 = 0x01;
pub const REG_PWM_EN: u8 = 0x02;
pub const REG_DUTY: u8 = 0x04;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterFile {
    pub out: u8,
    pub aux: u8,
    pub pwm_en: bool,
    pub duty: u8,
}

impl RegisterFile {
    pub fn new() -> Self {
        RegisterFile::default()
    }

    pub fn reset(&mut self) {
        *self = RegisterFile::new();
    }

    /// Returns true if addr is a defined register.
    pub fn is_defined(addr: u8) -> bool {
        matches!(addr, REG_OUT | REG_AUX | REG_PWM_EN | REG_DUTY)
    }

    /// Store `value` masked to the register width. Returns true if addr is handled.
    pub fn write(&mut self, addr: u8, value: u8) -> bool {
        match addr {
            REG_OUT => self.out = value,
            REG_AUX => self.aux = value,
            REG_PWM_EN => self.pwm_en = value & 1 != 0,
            REG_DUTY => self.duty = value,
            _ => return false,
        }
        true
    }

    /// Internal view of a register. Undefined addresses read as 0.
    pub fn read(&self, addr: u8) -> u8 {
        match addr {
            REG_OUT => self.out,
            REG_AUX => self.aux,
            REG_PWM_EN => self.pwm_en as u8,
            REG_DUTY => self.duty,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_defined() {
        let mut regs = RegisterFile::new();
        assert!(regs.write(REG_OUT, 0xF0));
        assert!(regs.write(REG_AUX, 0xCC));
        assert!(regs.write(REG_DUTY, 0x80));
        assert_eq!(regs.read(REG_OUT), 0xF0);
        assert_eq!(regs.read(REG_AUX), 0xCC);
        assert_eq!(regs.read(REG_DUTY), 0x80);
    }

    #[test]
    fn test_pwm_enable_masked() {
        let mut regs = RegisterFile::new();
        regs.write(REG_PWM_EN, 0xFF);
        assert_eq!(regs.read(REG_PWM_EN), 0x01);
        regs.write(REG_PWM_EN, 0xFE);
        assert_eq!(regs.read(REG_PWM_EN), 0x00);
    }

    #[test]
    fn test_undefined_addresses_ignored() {
        let mut regs = RegisterFile::new();
        regs.write(REG_OUT, 0x5A);
        let before = regs;
        for addr in (0u8..128).filter(|a| !RegisterFile::is_defined(*a)) {
            assert!(!regs.write(addr, 0xAA));
            assert_eq!(regs.read(addr), 0);
        }
        assert_eq!(regs, before);
    }

    #[test]
    fn test_last_write_wins() {
        let mut regs = RegisterFile::new();
        regs.write(REG_DUTY, 0xCF);
        regs.write(REG_DUTY, 0x01);
        assert_eq!(regs.read(REG_DUTY), 0x01);
    }
}
