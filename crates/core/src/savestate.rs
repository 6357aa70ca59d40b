//! Simulator checkpoints.
//!
//! Captures the whole tick-domain state so a scenario can be forked from a
//! configured point or resumed later. This is a harness facility: the
//! modelled device itself forgets everything on reset.
//!
//! ## File format
//!
//! ```text
//! +------------------+
//! | Magic "SPWM"     |  4 bytes
//! +------------------+
//! | Format version   |  u32 little-endian (currently 1)
//! +------------------+
//! | Compressed data  |  deflate-compressed bincode payload
//! +------------------+
//! ```

use serde::{Serialize, Deserialize};
use std::path::Path;
use thiserror::Error;

use crate::config::PeripheralConfig;
use crate::peripherals::{BusSync, DecoderState, RegisterFile, FRAME_BITS};
use crate::{BusStats, Pins};

/// Magic bytes identifying a checkpoint file.
const MAGIC: &[u8; 4] = b"SPWM";
/// Current checkpoint format version.
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("checkpoint I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("checkpoint encoding: {0}")]
    Encode(#[from] bincode::Error),
    #[error("checkpoint too small ({0} bytes)")]
    TooSmall(usize),
    #[error("not a checkpoint (bad magic)")]
    BadMagic,
    #[error("unsupported checkpoint version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },
    #[error("checkpoint decompression failed: {0}")]
    Decompress(String),
    #[error("checkpoint configuration rejected: {0}")]
    Config(#[from] crate::config::ConfigError),
    #[error("checkpoint {field} is {found}, configuration requires {expected}")]
    Mismatch { field: &'static str, found: u32, expected: u32 },
    #[error("checkpoint {field} is {found}, must be below {limit}")]
    OutOfRange { field: &'static str, found: u32, limit: u32 },
}

// ─── Per-component state structs ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpiState {
    pub state: DecoderState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PwmState {
    pub counter: u8,
    pub prescale: u32,
    pub divider: u32,
}

// ─── Top-level save state ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveState {
    pub config: PeripheralConfig,
    pub tick: u64,
    pub pins: Pins,
    pub sync: BusSync,
    pub spi: SpiState,
    pub regs: RegisterFile,
    pub pwm: PwmState,
    pub stats: BusStats,
}

impl SaveState {
    /// Check that every component agrees with the stored configuration.
    pub fn validate(&self) -> Result<(), StateError> {
        self.config.validate()?;

        let expected = self.config.sync_stages as u32;
        for (field, chain) in [
            ("sync.ncs.stages", &self.sync.ncs),
            ("sync.sclk.stages", &self.sync.sclk),
            ("sync.copi.stages", &self.sync.copi),
        ] {
            if chain.stages() as u32 != expected {
                return Err(StateError::Mismatch { field, found: chain.stages() as u32, expected });
            }
        }

        if self.pwm.prescale != self.config.pwm_prescale {
            return Err(StateError::Mismatch {
                field: "pwm.prescale",
                found: self.pwm.prescale,
                expected: self.config.pwm_prescale,
            });
        }
        if self.pwm.divider >= self.pwm.prescale {
            return Err(StateError::OutOfRange {
                field: "pwm.divider",
                found: self.pwm.divider,
                limit: self.pwm.prescale,
            });
        }

        if let DecoderState::Receiving { bit_count, .. } = self.spi.state {
            if bit_count >= FRAME_BITS {
                return Err(StateError::OutOfRange {
                    field: "spi.bit_count",
                    found: bit_count as u32,
                    limit: FRAME_BITS as u32,
                });
            }
        }
        Ok(())
    }
}

// ─── Encoding ───────────────────────────────────────────────────────────────

/// Serialize, compress and prefix with the header.
pub fn to_bytes(state: &SaveState) -> Result<Vec<u8>, StateError> {
    let payload = bincode::serialize(state)?;
    let compressed = miniz_oxide::deflate::compress_to_vec(&payload, 6);

    let mut out = Vec::with_capacity(HEADER_LEN + compressed.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&compressed);
    Ok(out)
}

/// Verify the header, decompress and deserialize.
pub fn from_bytes(data: &[u8]) -> Result<SaveState, StateError> {
    if data.len() < HEADER_LEN {
        return Err(StateError::TooSmall(data.len()));
    }
    if &data[0..4] != MAGIC {
        return Err(StateError::BadMagic);
    }
    let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    if version != FORMAT_VERSION {
        return Err(StateError::Version { found: version, expected: FORMAT_VERSION });
    }

    let decompressed = miniz_oxide::inflate::decompress_to_vec(&data[HEADER_LEN..])
        .map_err(|e| StateError::Decompress(format!("{:?}", e)))?;

    let state: SaveState = bincode::deserialize(&decompressed)?;
    state.validate()?;
    Ok(state)
}

// ─── File I/O ───────────────────────────────────────────────────────────────

pub fn save_to_file(state: &SaveState, path: &Path) -> Result<(), StateError> {
    std::fs::write(path, to_bytes(state)?)?;
    Ok(())
}

pub fn load_from_file(path: &Path) -> Result<SaveState, StateError> {
    from_bytes(&std::fs::read(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Peripheral;

    #[test]
    fn test_header_checks() {
        assert!(matches!(from_bytes(b"SPW"), Err(StateError::TooSmall(3))));
        assert!(matches!(from_bytes(b"ABES\x01\0\0\0xx"), Err(StateError::BadMagic)));
        assert!(matches!(
            from_bytes(b"SPWM\x02\0\0\0xx"),
            Err(StateError::Version { found: 2, expected: 1 })
        ));
        assert!(matches!(from_bytes(b"SPWM\x01\0\0\0\xff\xff"), Err(StateError::Decompress(_))));
    }

    #[test]
    fn test_bytes_preserve_state() {
        let mut p = Peripheral::default();
        p.registers_mut().write(0x04, 0x80);
        p.run(1234);
        let bytes = to_bytes(&p.save_state()).unwrap();
        assert_eq!(&bytes[0..4], b"SPWM");

        let s = from_bytes(&bytes).unwrap();
        assert_eq!(s.tick, 1234);
        assert_eq!(s.regs.duty, 0x80);
        assert_eq!(s.pwm.counter, p.pwm().counter());
    }

    fn pack(payload: &[u8]) -> Vec<u8> {
        let mut out = MAGIC.to_vec();
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&miniz_oxide::deflate::compress_to_vec(payload, 6));
        out
    }

    #[test]
    fn test_corrupt_stage_count_rejected() {
        let p = Peripheral::default();
        let mut payload = bincode::serialize(&p.save_state()).unwrap();
        // config (9) + tick (8) + pins (2), then sync.ncs.stages
        assert_eq!(payload[19], 2);
        payload[19] = 0;

        let err = from_bytes(&pack(&payload)).unwrap_err();
        assert!(matches!(
            err,
            StateError::Mismatch { field: "sync.ncs.stages", found: 0, expected: 2 }
        ));
    }

    #[test]
    fn test_stage_count_must_match_config() {
        let cfg = PeripheralConfig { sync_stages: 4, ..Default::default() };
        let mut s = Peripheral::new(cfg).unwrap().save_state();
        s.config.sync_stages = 2;
        let err = from_bytes(&to_bytes(&s).unwrap()).unwrap_err();
        assert!(matches!(err, StateError::Mismatch { found: 4, expected: 2, .. }));
    }

    #[test]
    fn test_prescale_must_match_config() {
        let mut s = Peripheral::default().save_state();
        s.pwm.prescale = 13;
        let err = from_bytes(&to_bytes(&s).unwrap()).unwrap_err();
        assert!(matches!(
            err,
            StateError::Mismatch { field: "pwm.prescale", found: 13, expected: 1 }
        ));

        let mut s = Peripheral::default().save_state();
        s.pwm.divider = 1;
        assert!(matches!(s.validate(), Err(StateError::OutOfRange { field: "pwm.divider", .. })));
    }

    #[test]
    fn test_load_state_rejects_inconsistent_checkpoint() {
        let mut s = Peripheral::default().save_state();
        s.spi.state = DecoderState::Receiving { bit_count: 16, shift: 0 };
        let mut p = Peripheral::default();
        p.run(10);
        assert!(p.load_state(&s).is_err());
        assert_eq!(p.tick_count(), 10);
        assert!(Peripheral::from_state(&s).is_err());
    }

    #[test]
    fn test_file_roundtrip() {
        let path = std::env::temp_dir().join(format!("spwm-{}.state", std::process::id()));
        let p = Peripheral::default();
        save_to_file(&p.save_state(), &path).unwrap();
        let s = load_from_file(&path).unwrap();
        assert_eq!(s.tick, 0);
        std::fs::remove_file(&path).ok();
    }
}
