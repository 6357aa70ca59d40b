//! TOML scenario scripts.
//!
//! A scenario is an optional `[config]` table plus an ordered list of
//! `[[step]]` tables, each tagged by `op`:
//!
//! ```toml
//! pwm_hz = 3000.0
//!
//! [[step]]
//! op = "reset"
//!
//! [[step]]
//! op = "write"
//! address = 0x04
//! data = 0x80
//!
//! [[step]]
//! op = "measure"
//! min_hz = 2970.0
//! max_hz = 3030.0
//! ```
//!
//! Any failed expectation stops the run with an error.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use spi_pwm_core::driver::SpiMaster;
use spi_pwm_core::peripherals::Direction;
use spi_pwm_core::probe::{Measurement, WaveformProbe};
use spi_pwm_core::{Peripheral, PeripheralConfig};
use std::path::Path;
use tracing::info;

fn default_reset_ticks() -> u64 {
    5
}
fn default_timeout() -> u64 {
    10_000
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    /// Hold `rst_n` low for `ticks`, then release it for the same count
    Reset {
        #[serde(default = "default_reset_ticks")]
        ticks: u64,
    },
    Write { address: u8, data: u8 },
    Read {
        address: u8,
        #[serde(default)]
        data: u8,
    },
    /// Release `nCS` after `bits` bits of a frame
    Abort { address: u8, data: u8, bits: u8 },
    Wait { ticks: u64 },
    ExpectPrimary { value: u8 },
    ExpectAux { value: u8 },
    Measure {
        #[serde(default)]
        bit: u8,
        #[serde(default = "default_timeout")]
        timeout: u64,
        min_hz: Option<f64>,
        max_hz: Option<f64>,
        /// Expected duty in percent
        duty: Option<f64>,
    },
    /// No low-to-high transition on `uo_out[bit]` for `ticks`
    NoRise {
        #[serde(default)]
        bit: u8,
        ticks: u64,
        #[serde(default)]
        tolerance: u64,
    },
    /// No high-to-low transition on `uo_out[bit]` for `ticks`
    NoFall {
        #[serde(default)]
        bit: u8,
        ticks: u64,
        /// Low stretches up to this many ticks are ignored
        #[serde(default)]
        tolerance: u64,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    pub config: Option<PeripheralConfig>,
    /// Overrides `config.pwm_prescale` with the closest prescaler
    pub pwm_hz: Option<f64>,
    pub half_period: Option<u64>,
    pub idle_ticks: Option<u64>,
    #[serde(default, rename = "step")]
    pub steps: Vec<Step>,
}

#[derive(Debug, Default)]
pub struct Report {
    pub steps: usize,
    pub measurements: Vec<Measurement>,
}

impl Scenario {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading scenario {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing scenario {}", path.display()))
    }

    /// Effective configuration: the scenario's own table, or `base`.
    pub fn config(&self, base: PeripheralConfig) -> Result<PeripheralConfig> {
        let config = self.config.unwrap_or(base);
        let config = match self.pwm_hz {
            Some(hz) => config.with_pwm_frequency(hz)?,
            None => config,
        };
        config.validate()?;
        Ok(config)
    }

    /// Bus master timing, falling back to `base` for unset fields.
    pub fn master(&self, base: SpiMaster) -> Result<SpiMaster> {
        Ok(SpiMaster::new(
            self.half_period.unwrap_or(base.half_period),
            self.idle_ticks.unwrap_or(base.idle_ticks),
        )?)
    }

    pub fn run(&self, p: &mut Peripheral, spi: &SpiMaster) -> Result<Report> {
        let mut report = Report::default();
        for (i, step) in self.steps.iter().enumerate() {
            run_step(p, spi, step, &mut report).with_context(|| {
                format!("step {} ({:?}) at tick {}", i + 1, step, p.tick_count())
            })?;
            report.steps += 1;
        }
        Ok(report)
    }
}

fn run_step(p: &mut Peripheral, spi: &SpiMaster, step: &Step, report: &mut Report) -> Result<()> {
    match *step {
        Step::Reset { ticks } => {
            p.set_reset(true);
            p.run(ticks);
            p.set_reset(false);
            p.run(ticks);
        }
        Step::Write { address, data } => {
            info!("write 0x{:02X} <- 0x{:02X}", address, data);
            spi.write(p, address, data)?;
        }
        Step::Read { address, data } => {
            info!("read 0x{:02X}", address);
            spi.read(p, address, data)?;
        }
        Step::Abort { address, data, bits } => {
            info!("abort write 0x{:02X} after {} bits", address, bits);
            spi.abort_after(p, Direction::Write, address, data, bits)?;
        }
        Step::Wait { ticks } => p.run(ticks),
        Step::ExpectPrimary { value } => {
            if p.uo_out() != value {
                bail!("expected uo_out 0x{:02X}, got 0x{:02X}", value, p.uo_out());
            }
        }
        Step::ExpectAux { value } => {
            if p.uio_out() != value {
                bail!("expected uio_out 0x{:02X}, got 0x{:02X}", value, p.uio_out());
            }
        }
        Step::Measure { bit, timeout, min_hz, max_hz, duty } => {
            let m = WaveformProbe::new(bit).measure(p, timeout)?;
            let hz = m.frequency_hz(p.config().clock_hz);
            info!(
                "uo_out[{}]: period {} ticks, high {} ticks, {:.1} Hz, {:.2}% duty",
                bit, m.period_ticks, m.high_ticks, hz, m.duty_percent()
            );
            if let Some(min) = min_hz {
                if hz < min {
                    bail!("frequency {:.1} Hz below {:.1} Hz", hz, min);
                }
            }
            if let Some(max) = max_hz {
                if hz > max {
                    bail!("frequency {:.1} Hz above {:.1} Hz", hz, max);
                }
            }
            if let Some(expected) = duty {
                if m.duty_percent() != expected {
                    bail!("duty {:.2}% != expected {:.2}%", m.duty_percent(), expected);
                }
            }
            report.measurements.push(m);
        }
        Step::NoRise { bit, ticks, tolerance } => {
            let obs = WaveformProbe::new(bit).observe(p, ticks);
            let high = obs.longest(true);
            if high > tolerance {
                bail!("uo_out[{}] was high for {} ticks ({} rising edges)", bit, high, obs.rising);
            }
        }
        Step::NoFall { bit, ticks, tolerance } => {
            let obs = WaveformProbe::new(bit).observe(p, ticks);
            let low = obs.longest(false);
            if low > tolerance {
                bail!("uo_out[{}] was low for {} ticks ({} falling edges)", bit, low, obs.falling);
            }
        }
    }
    Ok(())
}
