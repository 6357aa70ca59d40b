//! SPI-controlled PWM peripheral simulator.
//!
//! Runs a TOML scenario, a list of `--write` transactions, or both, against
//! the tick-domain model and prints the resulting pin state:
//!
//! ```text
//! spi-pwm-sim scenarios/pwm_freq.toml
//! spi-pwm-sim --pwm-hz 3000 --write 04=80 --write 00=01 --write 02=01 --measure
//! spi-pwm-sim --write 00=F0 --save-state fwd.state
//! spi-pwm-sim --load-state fwd.state --run 100000 --measure
//! ```
//!
//! Log verbosity follows `RUST_LOG`, or `-v` / `-vv` when it is unset.

mod scenario;

use anyhow::{bail, Context, Result};
use clap::Parser;
use spi_pwm_core::driver::SpiMaster;
use spi_pwm_core::probe::WaveformProbe;
use spi_pwm_core::{savestate, Peripheral, PeripheralConfig};
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use scenario::Scenario;

/// Ticks `rst_n` is held low (and then high) at power-on.
const POWER_ON_RESET_TICKS: u64 = 5;

#[derive(Parser, Debug)]
#[command(version, about = "Tick-accurate SPI-controlled PWM peripheral simulator")]
struct Args {
    /// Scenario file to run
    scenario: Option<PathBuf>,

    /// Peripheral configuration (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Choose the PWM prescaler closest to this output frequency
    #[arg(long)]
    pwm_hz: Option<f64>,

    /// SCLK half period in ticks
    #[arg(long)]
    half_period: Option<u64>,

    /// Idle ticks after each transaction
    #[arg(long)]
    idle: Option<u64>,

    /// Register write as hex ADDR=DATA (repeatable)
    #[arg(long = "write", value_name = "ADDR=DATA", value_parser = parse_write)]
    writes: Vec<(u8, u8)>,

    /// Ticks to run after the scenario and writes
    #[arg(long, default_value_t = 0)]
    run: u64,

    /// Measure one PWM cycle on uo_out[0] at the end
    #[arg(long)]
    measure: bool,

    /// Resume from a checkpoint instead of powering on
    #[arg(long)]
    load_state: Option<PathBuf>,

    /// Write a checkpoint when done
    #[arg(long)]
    save_state: Option<PathBuf>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn parse_hex(s: &str) -> Result<u8, String> {
    let s = s.trim();
    let s = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    u8::from_str_radix(s, 16).map_err(|e| format!("'{}': {}", s, e))
}

fn parse_write(s: &str) -> Result<(u8, u8), String> {
    let (addr, data) = s.split_once('=').ok_or_else(|| format!("expected ADDR=DATA, got '{}'", s))?;
    let addr = parse_hex(addr)?;
    if addr > 0x7F {
        return Err(format!("address 0x{:02X} does not fit in 7 bits", addr));
    }
    Ok((addr, parse_hex(data)?))
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_target(false)
        .init();
}

/// Merge `--config`/`--pwm-hz` with the scenario's `[config]`/`pwm_hz`.
fn load_config(args: &Args, scenario: &Scenario) -> Result<PeripheralConfig> {
    let base = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))?
        }
        None => PeripheralConfig::default(),
    };
    let config = scenario.config(base)?;
    let config = match args.pwm_hz {
        Some(hz) => config.with_pwm_frequency(hz)?,
        None => config,
    };
    config.validate()?;
    Ok(config)
}

/// Refuse configuration inputs that would otherwise be silently overridden.
fn check_config_sources(args: &Args, scenario: &Scenario) -> Result<()> {
    if args.load_state.is_some() {
        let overrides = [
            ("--config", args.config.is_some()),
            ("--pwm-hz", args.pwm_hz.is_some()),
            ("scenario [config]", scenario.config.is_some()),
            ("scenario pwm_hz", scenario.pwm_hz.is_some()),
        ];
        if let Some((name, _)) = overrides.iter().find(|(_, set)| *set) {
            bail!(
                "{} cannot be combined with --load-state; the checkpoint carries its own configuration",
                name
            );
        }
    }
    if args.config.is_some() && scenario.config.is_some() {
        bail!("scenario has its own [config] table; drop --config or the table");
    }
    if args.pwm_hz.is_some() && scenario.pwm_hz.is_some() {
        bail!("scenario sets pwm_hz; drop --pwm-hz or the scenario key");
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let scenario = match &args.scenario {
        Some(path) => Scenario::load(path)?,
        None => Scenario::default(),
    };
    check_config_sources(&args, &scenario)?;

    let mut base = SpiMaster::default();
    if let Some(half) = args.half_period {
        base.half_period = half;
    }
    if let Some(idle) = args.idle {
        base.idle_ticks = idle;
    }
    let spi = scenario.master(base)?;

    let mut p = match &args.load_state {
        Some(path) => {
            let state = savestate::load_from_file(path)
                .with_context(|| format!("loading checkpoint {}", path.display()))?;
            info!("resumed {} at tick {}", path.display(), state.tick);
            Peripheral::from_state(&state)?
        }
        None => {
            let config = load_config(&args, &scenario)?;
            let mut p = Peripheral::new(config)?;
            p.set_reset(true);
            p.run(POWER_ON_RESET_TICKS);
            p.set_reset(false);
            p.run(POWER_ON_RESET_TICKS);
            p
        }
    };
    debug!(
        config = ?p.config(),
        half_period = spi.half_period,
        idle = spi.idle_ticks,
        "configured"
    );
    info!("PWM {:.1} Hz (prescale {})", p.config().pwm_frequency_hz(), p.config().pwm_prescale);

    if !scenario.steps.is_empty() {
        let report = scenario.run(&mut p, &spi)?;
        info!("scenario: {} steps passed", report.steps);
    }

    for &(addr, data) in &args.writes {
        info!("write 0x{:02X} <- 0x{:02X}", addr, data);
        spi.write(&mut p, addr, data)?;
    }
    p.run(args.run);

    if args.measure {
        let timeout = p.pwm().period_ticks() * 4;
        let m = WaveformProbe::new(0).measure(&mut p, timeout)?;
        println!(
            "pwm: period {} ticks, high {} ticks, {:.1} Hz, {:.2}% duty",
            m.period_ticks,
            m.high_ticks,
            m.frequency_hz(p.config().clock_hz),
            m.duty_percent()
        );
    }

    let stats = p.stats();
    println!(
        "tick {} ({} ns): uo_out=0x{:02X} uio_out=0x{:02X} uio_oe=0x{:02X}",
        p.tick_count(), p.elapsed_ns(), p.uo_out(), p.uio_out(), p.uio_oe()
    );
    println!(
        "bus: {} writes, {} ignored, {} reads, {} aborted",
        stats.writes, stats.writes_ignored, stats.reads, stats.aborted
    );

    if let Some(path) = &args.save_state {
        savestate::save_to_file(&p.save_state(), path)
            .with_context(|| format!("saving checkpoint {}", path.display()))?;
        info!("saved {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_write() {
        assert_eq!(parse_write("04=80"), Ok((0x04, 0x80)));
        assert_eq!(parse_write("0x01=0xcc"), Ok((0x01, 0xCC)));
        assert!(parse_write("80=00").is_err());
        assert!(parse_write("0400").is_err());
        assert!(parse_write("04=1FF").is_err());
    }

    #[test]
    fn test_args() {
        let args = Args::try_parse_from([
            "spi-pwm-sim", "--pwm-hz", "3000", "--write", "04=80", "--write", "02=01", "-vv",
        ])
        .unwrap();
        assert_eq!(args.writes, vec![(0x04, 0x80), (0x02, 0x01)]);
        assert_eq!(args.verbose, 2);
        assert_eq!(load_config(&args, &Scenario::default()).unwrap().pwm_prescale, 13);
    }

    #[test]
    fn test_checkpoint_refuses_config_overrides() {
        let args =
            Args::try_parse_from(["spi-pwm-sim", "--load-state", "a.state", "--pwm-hz", "3000"])
                .unwrap();
        let err = check_config_sources(&args, &Scenario::default()).unwrap_err();
        assert!(err.to_string().contains("--pwm-hz"));

        let scenario = Scenario::parse("pwm_hz = 3000.0\n").unwrap();
        let args = Args::try_parse_from(["spi-pwm-sim", "--load-state", "a.state"]).unwrap();
        assert!(check_config_sources(&args, &scenario).is_err());
        assert!(check_config_sources(&args, &Scenario::default()).is_ok());
    }

    #[test]
    fn test_scenario_config_conflicts_with_flag() {
        let scenario = Scenario::parse("[config]\nsync_stages = 3\n").unwrap();
        let args = Args::try_parse_from(["spi-pwm-sim", "--config", "cfg.toml"]).unwrap();
        assert!(check_config_sources(&args, &scenario).is_err());

        let args = Args::try_parse_from(["spi-pwm-sim", "--pwm-hz", "3000"]).unwrap();
        check_config_sources(&args, &scenario).unwrap();
        let config = load_config(&args, &scenario).unwrap();
        assert_eq!(config.sync_stages, 3);
        assert_eq!(config.pwm_prescale, 13);

        let scenario = Scenario::parse("pwm_hz = 3000.0\n").unwrap();
        assert!(check_config_sources(&args, &scenario).is_err());
    }
}
