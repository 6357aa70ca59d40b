//! Simulator configuration.
//!
//! Every field has a default so a partial TOML table is enough:
//!
//! ```toml
//! clock_hz = 10000000
//! sync_stages = 2
//! pwm_prescale = 13
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::peripherals::{MAX_STAGES, MIN_STAGES, PWM_STEPS};

/// Core tick rate used by the reference bus client: 10 MHz (100 ns).
pub const DEFAULT_CLOCK_HZ: u32 = 10_000_000;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("clock_hz must be non-zero")]
    ZeroClock,
    #[error("sync_stages must be in {min}..={max}, got {got}")]
    SyncStages { got: u8, min: u8, max: u8 },
    #[error("pwm_prescale must be at least 1")]
    ZeroPrescale,
    #[error("PWM frequency {0} Hz is not reachable")]
    UnreachableFrequency(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PeripheralConfig {
    /// Tick frequency in Hz. Only used to convert tick counts to time.
    pub clock_hz: u32,
    /// Flip-flops in each input synchronizer.
    pub sync_stages: u8,
    /// Ticks per PWM counter step.
    pub pwm_prescale: u32,
}

impl Default for PeripheralConfig {
    fn default() -> Self {
        PeripheralConfig {
            clock_hz: DEFAULT_CLOCK_HZ,
            sync_stages: MIN_STAGES,
            pwm_prescale: 1,
        }
    }
}

impl PeripheralConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.clock_hz == 0 {
            return Err(ConfigError::ZeroClock);
        }
        if !(MIN_STAGES..=MAX_STAGES).contains(&self.sync_stages) {
            return Err(ConfigError::SyncStages {
                got: self.sync_stages,
                min: MIN_STAGES,
                max: MAX_STAGES,
            });
        }
        if self.pwm_prescale == 0 {
            return Err(ConfigError::ZeroPrescale);
        }
        Ok(())
    }

    /// Pick the prescaler whose PWM frequency is closest to `hz`.
    ///
    /// 10 MHz and 3 kHz gives 13 (≈ 3004.8 Hz).
    pub fn with_pwm_frequency(mut self, hz: f64) -> Result<Self, ConfigError> {
        if !(hz.is_finite() && hz > 0.0) {
            return Err(ConfigError::UnreachableFrequency(hz));
        }
        let ideal = self.clock_hz as f64 / (PWM_STEPS as f64 * hz);
        let prescale = ideal.round();
        if prescale < 1.0 || prescale > u32::MAX as f64 {
            return Err(ConfigError::UnreachableFrequency(hz));
        }
        self.pwm_prescale = prescale as u32;
        Ok(self)
    }

    /// PWM output frequency in Hz.
    pub fn pwm_frequency_hz(&self) -> f64 {
        self.clock_hz as f64 / (PWM_STEPS as f64 * self.pwm_prescale.max(1) as f64)
    }
}
