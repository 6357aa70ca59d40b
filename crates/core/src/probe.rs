//! Waveform probe for one bit of `uo_out`.
//!
//! Ticks the core while watching a single output bit and timestamps its
//! transitions with the core tick count. [`WaveformProbe::measure`] follows
//! the reference client's procedure: run to a low level, align on the next
//! rising edge, then time the high phase and the full cycle.

use thiserror::Error;

use crate::Peripheral;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("no {edge} edge on uo_out[{bit}] within {ticks} ticks")]
    Timeout { bit: u8, edge: &'static str, ticks: u64 },
}

/// A pin-level transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    /// Core tick after which the new level was visible
    pub tick: u64,
    /// Level after the transition (true = high)
    pub level: bool,
}

/// One measured PWM cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Measurement {
    /// Rising edge to rising edge
    pub period_ticks: u64,
    /// Rising edge to falling edge
    pub high_ticks: u64,
}

impl Measurement {
    pub fn frequency_hz(&self, clock_hz: u32) -> f64 {
        clock_hz as f64 / self.period_ticks as f64
    }

    pub fn duty_percent(&self) -> f64 {
        self.high_ticks as f64 / self.period_ticks as f64 * 100.0
    }
}

/// Transitions seen during [`WaveformProbe::observe`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observation {
    pub start_tick: u64,
    pub end_tick: u64,
    pub initial_level: bool,
    pub edges: Vec<Edge>,
    pub rising: usize,
    pub falling: usize,
    pub final_level: bool,
}

impl Observation {
    /// Longest stretch of ticks spent at `level`, including the open
    /// stretches at either end of the window.
    pub fn longest(&self, level: bool) -> u64 {
        let mut longest = 0;
        let mut since = self.start_tick;
        let mut current = self.initial_level;
        for edge in &self.edges {
            if current == level {
                longest = longest.max(edge.tick - since);
            }
            since = edge.tick;
            current = edge.level;
        }
        if current == level {
            longest = longest.max(self.end_tick - since);
        }
        longest
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveformProbe {
    bit: u8,
}

impl WaveformProbe {
    /// Probe `uo_out[bit]`. `bit` is masked to 0..=7.
    pub fn new(bit: u8) -> Self {
        WaveformProbe { bit: bit & 7 }
    }

    pub fn level(&self, p: &Peripheral) -> bool {
        p.uo_out() & (1 << self.bit) != 0
    }

    /// Tick until the probed bit reads `level`, giving up at `deadline`.
    fn wait_for(
        &self,
        p: &mut Peripheral,
        level: bool,
        deadline: u64,
        budget: u64,
    ) -> Result<u64, ProbeError> {
        while self.level(p) != level {
            if p.tick_count() >= deadline {
                return Err(ProbeError::Timeout {
                    bit: self.bit,
                    edge: if level { "rising" } else { "falling" },
                    ticks: budget,
                });
            }
            p.tick();
        }
        Ok(p.tick_count())
    }

    /// Measure one full cycle, spending at most `timeout_ticks` ticks.
    pub fn measure(
        &self,
        p: &mut Peripheral,
        timeout_ticks: u64,
    ) -> Result<Measurement, ProbeError> {
        let deadline = p.tick_count() + timeout_ticks;
        self.wait_for(p, false, deadline, timeout_ticks)?;
        let rise = self.wait_for(p, true, deadline, timeout_ticks)?;
        let fall = self.wait_for(p, false, deadline, timeout_ticks)?;
        let next_rise = self.wait_for(p, true, deadline, timeout_ticks)?;
        Ok(Measurement { period_ticks: next_rise - rise, high_ticks: fall - rise })
    }

    /// Run `ticks` ticks and record every transition of the probed bit.
    pub fn observe(&self, p: &mut Peripheral, ticks: u64) -> Observation {
        let mut level = self.level(p);
        let mut obs = Observation {
            start_tick: p.tick_count(),
            initial_level: level,
            ..Default::default()
        };
        for _ in 0..ticks {
            p.tick();
            let now = self.level(p);
            if now != level {
                obs.edges.push(Edge { tick: p.tick_count(), level: now });
                if now {
                    obs.rising += 1;
                } else {
                    obs.falling += 1;
                }
                level = now;
            }
        }
        obs.final_level = level;
        obs.end_tick = p.tick_count();
        obs
    }
}
