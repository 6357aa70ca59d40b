//! # spi-pwm-core
//!
//! Tick-accurate model of a small SPI-controlled output peripheral: a
//! register file written over a 16-bit serial protocol, a direct output
//! driver, and an 8-bit PWM generator that can take over output bit 0.
//!
//! ## Architecture
//!
//! - [`Peripheral`]: Top-level core that wires synchronizers, decoder, registers and PWM
//! - [`Pins`]: Input pin levels (`ui_in`, `rst_n`) sampled every tick
//! - [`peripherals`]: `BusSync`, `SpiSlave`, `RegisterFile`, `Pwm`, output mapping
//! - [`config`]: Clock rate, synchronizer depth, PWM prescaler
//! - [`driver`]: Bit-banging SPI master used as the protocol client
//! - [`probe`]: Edge-timestamping waveform measurement on an output bit
//! - [`savestate`]: Compressed checkpoints of the full tick-domain state
//!
//! ## Pin map
//!
//! | Pin | Signal |
//! |-----|--------|
//! | `ui_in[0]` | `SCLK` |
//! | `ui_in[1]` | `COPI` |
//! | `ui_in[2]` | `nCS` (active low) |
//! | `uo_out[7:0]` | primary output, bit 0 optionally PWM |
//! | `uio_out[7:0]` | auxiliary output |
//! | `rst_n` | synchronous reset (active low) |
//!
//! ## Tick order
//!
//! Each [`Peripheral::tick`] samples the pins into the synchronizers, lets
//! the decoder capture at most one bit, commits a completed write frame to
//! the register file, then steps the PWM counter. Outputs are derived from
//! the resulting state and can be read between ticks.

pub mod config;
pub mod driver;
pub mod peripherals;
pub mod probe;
pub mod savestate;

use serde::{Deserialize, Serialize};
use tracing::debug;

pub use config::{ConfigError, PeripheralConfig};
use peripherals::{BusSync, DecodeEvent, Direction, Frame, Pwm, RegisterFile, SpiSlave};

/// `ui_in` bit carrying `SCLK`
pub const UI_SCLK: u8 = 0;
/// `ui_in` bit carrying `COPI`
pub const UI_COPI: u8 = 1;
/// `ui_in` bit carrying `nCS`
pub const UI_NCS: u8 = 2;

/// Input pin levels applied to the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pins {
    pub ui_in: u8,
    /// Active-low reset
    pub rst_n: bool,
}

impl Default for Pins {
    /// Bus idle (`nCS` high) and reset released.
    fn default() -> Self {
        Pins { ui_in: 1 << UI_NCS, rst_n: true }
    }
}

impl Pins {
    /// Pack the three bus signals into `ui_in`.
    pub fn bus(ncs: bool, copi: bool, sclk: bool) -> u8 {
        ((ncs as u8) << UI_NCS) | ((copi as u8) << UI_COPI) | ((sclk as u8) << UI_SCLK)
    }

    pub fn ncs(&self) -> bool {
        self.ui_in & (1 << UI_NCS) != 0
    }
    pub fn copi(&self) -> bool {
        self.ui_in & (1 << UI_COPI) != 0
    }
    pub fn sclk(&self) -> bool {
        self.ui_in & (1 << UI_SCLK) != 0
    }
}

/// Protocol-level counters. None of these conditions is an error for the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusStats {
    /// Write frames committed to a defined register
    pub writes: u64,
    /// Write frames addressed to an undefined register
    pub writes_ignored: u64,
    /// Read frames (accepted, no data returned)
    pub reads: u64,
    /// Partial frames dropped by `nCS` rising early
    pub aborted: u64,
}

/// The peripheral core: synchronizers, frame decoder, register file, PWM.
#[derive(Debug)]
pub struct Peripheral {
    config: PeripheralConfig,
    tick: u64,
    pins: Pins,
    sync: BusSync,
    spi: SpiSlave,
    regs: RegisterFile,
    pwm: Pwm,
    stats: BusStats,
    /// Frame completed during the last tick, if any
    last_frame: Option<Frame>,
}

impl Default for Peripheral {
    fn default() -> Self {
        Peripheral::build(PeripheralConfig::default())
    }
}

impl Peripheral {
    /// Create a core in its power-on state.
    pub fn new(config: PeripheralConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Peripheral::build(config))
    }

    fn build(config: PeripheralConfig) -> Self {
        Peripheral {
            config,
            tick: 0,
            pins: Pins::default(),
            sync: BusSync::new(config.sync_stages),
            spi: SpiSlave::new(),
            regs: RegisterFile::new(),
            pwm: Pwm::new(config.pwm_prescale),
            stats: BusStats::default(),
            last_frame: None,
        }
    }

    /// Return every register, the decoder, synchronizers and PWM counter to
    /// power-on state. The tick count keeps running.
    pub fn reset(&mut self) {
        self.sync.reset();
        self.spi.reset();
        self.regs.reset();
        self.pwm.reset();
        self.stats = BusStats::default();
        self.last_frame = None;
    }

    pub fn config(&self) -> &PeripheralConfig {
        &self.config
    }

    // ─── Inputs ────────────────────────────────────────────────────────────

    pub fn set_pins(&mut self, pins: Pins) {
        self.pins = pins;
    }

    pub fn set_inputs(&mut self, ui_in: u8) {
        self.pins.ui_in = ui_in;
    }

    /// Drive `rst_n`. `asserted = true` pulls it low.
    pub fn set_reset(&mut self, asserted: bool) {
        self.pins.rst_n = !asserted;
    }

    pub fn pins(&self) -> Pins {
        self.pins
    }

    // ─── Tick domain ───────────────────────────────────────────────────────

    /// Advance the core by one tick.
    pub fn tick(&mut self) {
        self.tick += 1;
        self.last_frame = None;

        if !self.pins.rst_n {
            self.reset();
            return;
        }

        let bus = self.sync.sample(self.pins.ncs(), self.pins.sclk(), self.pins.copi());
        match self.spi.tick(&bus) {
            Some(DecodeEvent::Complete(frame)) => self.commit(frame),
            Some(DecodeEvent::Aborted { .. }) => self.stats.aborted += 1,
            None => {}
        }

        self.pwm.tick();
    }

    /// Advance `ticks` ticks with the current pin levels.
    pub fn run(&mut self, ticks: u64) {
        for _ in 0..ticks {
            self.tick();
        }
    }

    fn commit(&mut self, frame: Frame) {
        self.last_frame = Some(frame);
        match frame.direction {
            Direction::Write => {
                if self.regs.write(frame.address, frame.data) {
                    self.stats.writes += 1;
                } else {
                    self.stats.writes_ignored += 1;
                    debug!(
                        address = frame.address,
                        data = frame.data,
                        "write to undefined register ignored"
                    );
                }
            }
            Direction::Read => {
                self.stats.reads += 1;
                debug!(address = frame.address, "read frame accepted, no data returned");
            }
        }
    }

    // ─── Outputs ───────────────────────────────────────────────────────────

    /// Current PWM comparator level.
    pub fn pwm_level(&self) -> bool {
        self.pwm.level(self.regs.duty)
    }

    /// Primary output bus.
    pub fn uo_out(&self) -> u8 {
        peripherals::output::primary(&self.regs, self.pwm_level())
    }

    /// Auxiliary output bus.
    pub fn uio_out(&self) -> u8 {
        peripherals::output::aux(&self.regs)
    }

    /// Output enables for the auxiliary bus.
    pub fn uio_oe(&self) -> u8 {
        peripherals::output::UIO_OE
    }

    // ─── Inspection ────────────────────────────────────────────────────────

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn registers(&self) -> &RegisterFile {
        &self.regs
    }

    /// Direct register access for test setup, bypassing the bus.
    pub fn registers_mut(&mut self) -> &mut RegisterFile {
        &mut self.regs
    }

    pub fn pwm(&self) -> &Pwm {
        &self.pwm
    }

    pub fn decoder(&self) -> &SpiSlave {
        &self.spi
    }

    pub fn stats(&self) -> BusStats {
        self.stats
    }

    /// Frame completed on the most recent tick.
    pub fn last_frame(&self) -> Option<Frame> {
        self.last_frame
    }

    /// Tick count converted to nanoseconds at the configured clock.
    pub fn elapsed_ns(&self) -> u64 {
        (self.tick as u128 * 1_000_000_000 / self.config.clock_hz as u128) as u64
    }

    // ─── Checkpoints ───────────────────────────────────────────────────────

    /// Capture state for save state.
    pub fn save_state(&self) -> savestate::SaveState {
        savestate::SaveState {
            config: self.config,
            tick: self.tick,
            pins: self.pins,
            sync: self.sync,
            spi: self.spi.save_state(),
            regs: self.regs,
            pwm: self.pwm.save_state(),
            stats: self.stats,
        }
    }

    /// Rebuild a core from a checkpoint.
    pub fn from_state(s: &savestate::SaveState) -> Result<Self, savestate::StateError> {
        let mut p = Peripheral::new(s.config)?;
        p.load_state(s)?;
        Ok(p)
    }

    /// Restore state from save state. An inconsistent checkpoint leaves the
    /// core untouched.
    pub fn load_state(&mut self, s: &savestate::SaveState) -> Result<(), savestate::StateError> {
        s.validate()?;
        self.config = s.config;
        self.tick = s.tick;
        self.pins = s.pins;
        self.sync = s.sync;
        self.spi.load_state(&s.spi);
        self.regs = s.regs;
        self.pwm.load_state(&s.pwm);
        self.stats = s.stats;
        self.last_frame = None;
        Ok(())
    }
}
