//! SPI slave frame decoder.
//!
//! Reassembles 16-bit frames from the synchronized `nCS`/`SCLK`/`COPI`
//! signals. Bits are captured MSB first on each rising `SCLK` edge while
//! `nCS` is low:
//!
//! ```text
//!  15  14 .......... 8  7 ........... 0
//! +---+---------------+---------------+
//! |R/W|   address     |     data      |
//! +---+---------------+---------------+
//! ```
//!
//! The sixteenth bit completes the frame and it is handed back to the caller
//! in the same tick. Raising `nCS` earlier throws the partial frame away.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::sync::SyncedBus;

/// Number of bits in one frame.
pub const FRAME_BITS: u8 = 16;

/// Transfer direction carried in bit 15.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Read,
    Write,
}

/// A complete, valid frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub direction: Direction,
    /// 7-bit register address (0–127)
    pub address: u8,
    pub data: u8,
}

impl Frame {
    /// Split a raw 16-bit shift register value into its fields.
    pub fn from_bits(bits: u16) -> Self {
        Frame {
            direction: if bits & 0x8000 != 0 { Direction::Write } else { Direction::Read },
            address: ((bits >> 8) & 0x7F) as u8,
            data: bits as u8,
        }
    }

    /// Pack the frame in wire order. The address is truncated to 7 bits.
    pub fn to_bits(&self) -> u16 {
        let rw = match self.direction {
            Direction::Write => 0x8000,
            Direction::Read => 0,
        };
        rw | (((self.address & 0x7F) as u16) << 8) | self.data as u16
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecoderState {
    /// `nCS` deasserted, or a frame just completed
    Idle,
    /// `nCS` asserted, `bit_count` bits (0..15) shifted into `shift`
    Receiving { bit_count: u8, shift: u16 },
}

/// Result of one decoder tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeEvent {
    /// The sixteenth bit arrived.
    Complete(Frame),
    /// `nCS` rose mid-frame after `bits` bits.
    Aborted { bits: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpiSlave {
    pub state: DecoderState,
}

impl SpiSlave {
    pub fn new() -> Self {
        SpiSlave { state: DecoderState::Idle }
    }

    pub fn reset(&mut self) {
        *self = SpiSlave::new();
    }

    /// Advance the decoder by one tick using synchronized bus levels.
    pub fn tick(&mut self, bus: &SyncedBus) -> Option<DecodeEvent> {
        if bus.ncs {
            return match std::mem::replace(&mut self.state, DecoderState::Idle) {
                DecoderState::Receiving { bit_count, .. } if bit_count > 0 => {
                    debug!(bits = bit_count, "frame aborted by nCS deassertion");
                    Some(DecodeEvent::Aborted { bits: bit_count })
                }
                _ => None,
            };
        }

        let (bit_count, shift) = match self.state {
            DecoderState::Idle => (0, 0),
            DecoderState::Receiving { bit_count, shift } => (bit_count, shift),
        };

        if !bus.sclk_rise {
            self.state = DecoderState::Receiving { bit_count, shift };
            return None;
        }

        let shift = (shift << 1) | bus.copi as u16;
        let bit_count = bit_count + 1;
        trace!(bit = bus.copi as u8, bit_count, "captured bit");

        if bit_count == FRAME_BITS {
            self.state = DecoderState::Idle;
            let frame = Frame::from_bits(shift);
            debug!(
                direction = ?frame.direction,
                address = frame.address,
                data = frame.data,
                "frame complete"
            );
            Some(DecodeEvent::Complete(frame))
        } else {
            self.state = DecoderState::Receiving { bit_count, shift };
            None
        }
    }

    /// Number of bits captured in the frame currently being received.
    pub fn bits_received(&self) -> u8 {
        match self.state {
            DecoderState::Idle => 0,
            DecoderState::Receiving { bit_count, .. } => bit_count,
        }
    }

    /// Capture state for save state.
    pub fn save_state(&self) -> crate::savestate::SpiState {
        crate::savestate::SpiState { state: self.state }
    }

    /// Restore state from save state.
    pub fn load_state(&mut self, s: &crate::savestate::SpiState) {
        self.state = s.state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus(ncs: bool, copi: bool, sclk_rise: bool) -> SyncedBus {
        SyncedBus { ncs, sclk: sclk_rise, copi, sclk_rise }
    }

    fn clock_word(spi: &mut SpiSlave, word: u16, bits: u8) -> Option<DecodeEvent> {
        let mut last = None;
        for i in 0..bits {
            let b = (word >> (15 - i)) & 1 != 0;
            spi.tick(&bus(false, b, false));
            last = spi.tick(&bus(false, b, true));
        }
        last
    }

    #[test]
    fn test_frame_fields() {
        let f = Frame::from_bits(0x80F0);
        assert_eq!(f.direction, Direction::Write);
        assert_eq!(f.address, 0x00);
        assert_eq!(f.data, 0xF0);

        let f = Frame::from_bits(0x41EF);
        assert_eq!(f.direction, Direction::Read);
        assert_eq!(f.address, 0x41);
        assert_eq!(f.data, 0xEF);
        assert_eq!(f.to_bits(), 0x41EF);
    }

    #[test]
    fn test_full_frame() {
        let mut spi = SpiSlave::new();
        let ev = clock_word(&mut spi, 0x81CC, 16);
        assert_eq!(
            ev,
            Some(DecodeEvent::Complete(Frame {
                direction: Direction::Write,
                address: 0x01,
                data: 0xCC,
            }))
        );
        assert_eq!(spi.state, DecoderState::Idle);
    }

    #[test]
    fn test_partial_frame_discarded() {
        let mut spi = SpiSlave::new();
        assert_eq!(clock_word(&mut spi, 0x84FF, 9), None);
        assert_eq!(spi.bits_received(), 9);
        assert_eq!(spi.tick(&bus(true, false, false)), Some(DecodeEvent::Aborted { bits: 9 }));
        assert_eq!(spi.state, DecoderState::Idle);
    }

    #[test]
    fn test_edges_ignored_while_deselected() {
        let mut spi = SpiSlave::new();
        for _ in 0..20 {
            assert_eq!(spi.tick(&bus(true, true, true)), None);
        }
        assert_eq!(spi.bits_received(), 0);
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut spi = SpiSlave::new();
        assert!(matches!(clock_word(&mut spi, 0x8001, 16), Some(DecodeEvent::Complete(_))));
        let ev = clock_word(&mut spi, 0x8402, 16);
        assert_eq!(
            ev,
            Some(DecodeEvent::Complete(Frame {
                direction: Direction::Write,
                address: 0x04,
                data: 0x02,
            }))
        );
    }
}
