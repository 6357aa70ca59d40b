//! PWM generator.
//!
//! Free-running 8-bit counter compared against the live duty register. The
//! counter advances once every `prescale` ticks and wraps 255 → 0, so the
//! period is `256 * prescale` ticks whatever the duty. The output is high
//! while `counter < duty`: duty 0 never goes high, duty 255 is low for one
//! count per period.

/// Number of counter steps in one PWM period.
pub const PWM_STEPS: u32 = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pwm {
    counter: u8,
    prescale: u32,
    divider: u32,
}

impl Pwm {
    /// `prescale` of 0 is treated as 1.
    pub fn new(prescale: u32) -> Self {
        Pwm { counter: 0, prescale: prescale.max(1), divider: 0 }
    }

    pub fn reset(&mut self) {
        *self = Pwm::new(self.prescale);
    }

    /// Advance one tick.
    pub fn tick(&mut self) {
        self.divider += 1;
        if self.divider >= self.prescale {
            self.divider = 0;
            self.counter = self.counter.wrapping_add(1);
        }
    }

    /// Comparator output for the given duty.
    pub fn level(&self, duty: u8) -> bool {
        self.counter < duty
    }

    pub fn counter(&self) -> u8 {
        self.counter
    }

    pub fn prescale(&self) -> u32 {
        self.prescale
    }

    /// Period length in ticks.
    pub fn period_ticks(&self) -> u64 {
        PWM_STEPS as u64 * self.prescale as u64
    }

    /// Output frequency for a given tick rate.
    pub fn frequency_hz(&self, clock_hz: u32) -> f64 {
        clock_hz as f64 / self.period_ticks() as f64
    }

    /// Capture state for save state.
    pub fn save_state(&self) -> crate::savestate::PwmState {
        crate::savestate::PwmState {
            counter: self.counter,
            prescale: self.prescale,
            divider: self.divider,
        }
    }

    /// Restore state from save state.
    pub fn load_state(&mut self, s: &crate::savestate::PwmState) {
        self.counter = s.counter;
        self.prescale = s.prescale.max(1);
        self.divider = s.divider;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn high_ticks(pwm: &mut Pwm, duty: u8) -> u64 {
        let mut high = 0;
        for _ in 0..pwm.period_ticks() {
            pwm.tick();
            if pwm.level(duty) {
                high += 1;
            }
        }
        high
    }

    #[test]
    fn test_counter_wraps() {
        let mut pwm = Pwm::new(1);
        for _ in 0..255 {
            pwm.tick();
        }
        assert_eq!(pwm.counter(), 255);
        pwm.tick();
        assert_eq!(pwm.counter(), 0);
    }

    #[test]
    fn test_duty_high_time() {
        let mut pwm = Pwm::new(1);
        assert_eq!(high_ticks(&mut pwm, 0), 0);
        assert_eq!(high_ticks(&mut pwm, 0x80), 128);
        assert_eq!(high_ticks(&mut pwm, 0xFF), 255);
    }

    #[test]
    fn test_prescale_stretches_period() {
        let mut pwm = Pwm::new(13);
        assert_eq!(pwm.period_ticks(), 3328);
        assert_eq!(high_ticks(&mut pwm, 0x80), 128 * 13);
        let hz = pwm.frequency_hz(10_000_000);
        assert!(hz > 3000.0 && hz < 3010.0, "{}", hz);
    }

    #[test]
    fn test_zero_prescale_is_one() {
        let pwm = Pwm::new(0);
        assert_eq!(pwm.prescale(), 1);
    }
}
