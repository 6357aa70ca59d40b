//! Clock-domain crossing for the external bus pins.
//!
//! `nCS`, `SCLK` and `COPI` are driven by the bus master with no relation to
//! the core tick. Each one is shifted through a chain of flip-flops before the
//! frame decoder looks at it, and the clock additionally feeds an
//! [`EdgeDetector`] so a bit is captured once per rising edge no matter how
//! many ticks the clock stays high.

use serde::{Deserialize, Serialize};

/// Minimum number of flip-flops in a synchronizer chain.
pub const MIN_STAGES: u8 = 2;
/// Maximum number of flip-flops in a synchronizer chain (one `u8` of history).
pub const MAX_STAGES: u8 = 8;

/// Multi-stage flip-flop chain for a single asynchronous input.
///
/// Bit 0 of `chain` is the first stage; the output is the last stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Synchronizer {
    stages: u8,
    chain: u8,
    idle: bool,
}

impl Synchronizer {
    /// Create a chain of `stages` flip-flops, all holding `idle`.
    ///
    /// `stages` is clamped to `MIN_STAGES..=MAX_STAGES`.
    pub fn new(stages: u8, idle: bool) -> Self {
        let stages = stages.clamp(MIN_STAGES, MAX_STAGES);
        let mut s = Synchronizer { stages, chain: 0, idle };
        s.reset();
        s
    }

    /// Refill every stage with the idle level.
    pub fn reset(&mut self) {
        self.chain = if self.idle { self.mask() } else { 0 };
    }

    fn mask(&self) -> u8 {
        if self.stages >= 8 { 0xFF } else { (1u8 << self.stages) - 1 }
    }

    /// Clock one raw sample into the chain and return the synchronized level.
    pub fn sample(&mut self, raw: bool) -> bool {
        self.chain = ((self.chain << 1) | raw as u8) & self.mask();
        self.output()
    }

    /// Level presented by the last stage.
    pub fn output(&self) -> bool {
        self.chain & (1 << (self.stages - 1)) != 0
    }

    pub fn stages(&self) -> u8 {
        self.stages
    }
}

/// Rising/falling edge detection against the previous synchronized sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeDetector {
    prev: bool,
}

impl EdgeDetector {
    pub fn new(initial: bool) -> Self {
        EdgeDetector { prev: initial }
    }

    /// Feed the current level. Returns `(rising, falling)`.
    pub fn update(&mut self, level: bool) -> (bool, bool) {
        let rising = level && !self.prev;
        let falling = !level && self.prev;
        self.prev = level;
        (rising, falling)
    }

    pub fn level(&self) -> bool {
        self.prev
    }
}

/// The three bus inputs after synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncedBus {
    /// `nCS` level (true = deasserted).
    pub ncs: bool,
    /// `SCLK` level.
    pub sclk: bool,
    /// `COPI` level.
    pub copi: bool,
    /// Rising edge of `SCLK` detected this tick.
    pub sclk_rise: bool,
}

/// Synchronizers for `nCS`, `SCLK`, `COPI` plus the `SCLK` edge detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusSync {
    pub ncs: Synchronizer,
    pub sclk: Synchronizer,
    pub copi: Synchronizer,
    pub sclk_edge: EdgeDetector,
}

impl BusSync {
    /// Bus-idle levels: `nCS` high, `SCLK` low, `COPI` low.
    pub fn new(stages: u8) -> Self {
        BusSync {
            ncs: Synchronizer::new(stages, true),
            sclk: Synchronizer::new(stages, false),
            copi: Synchronizer::new(stages, false),
            sclk_edge: EdgeDetector::new(false),
        }
    }

    pub fn reset(&mut self) {
        self.ncs.reset();
        self.sclk.reset();
        self.copi.reset();
        self.sclk_edge = EdgeDetector::new(false);
    }

    /// Sample the raw pins for one tick.
    pub fn sample(&mut self, ncs: bool, sclk: bool, copi: bool) -> SyncedBus {
        let ncs = self.ncs.sample(ncs);
        let sclk = self.sclk.sample(sclk);
        let copi = self.copi.sample(copi);
        let (sclk_rise, _) = self.sclk_edge.update(sclk);
        SyncedBus { ncs, sclk, copi, sclk_rise }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_stage_latency() {
        let mut s = Synchronizer::new(2, false);
        assert!(!s.sample(true));
        assert!(s.sample(true));
        assert!(s.sample(false));
        assert!(!s.sample(false));
    }

    #[test]
    fn test_stage_count_clamped() {
        assert_eq!(Synchronizer::new(0, false).stages(), MIN_STAGES);
        assert_eq!(Synchronizer::new(12, false).stages(), MAX_STAGES);
    }

    #[test]
    fn test_eight_stages() {
        let mut s = Synchronizer::new(8, true);
        for _ in 0..7 {
            assert!(s.sample(false));
        }
        assert!(!s.sample(false));
    }

    #[test]
    fn test_single_rise_per_edge() {
        let mut bus = BusSync::new(2);
        let mut rises = 0;
        for _ in 0..10 {
            if bus.sample(false, false, false).sclk_rise {
                rises += 1;
            }
        }
        for _ in 0..50 {
            if bus.sample(false, true, false).sclk_rise {
                rises += 1;
            }
        }
        for _ in 0..50 {
            if bus.sample(false, false, false).sclk_rise {
                rises += 1;
            }
        }
        assert_eq!(rises, 1);
    }

    #[test]
    fn test_idle_levels() {
        let bus = BusSync::new(3);
        assert!(bus.ncs.output());
        assert!(!bus.sclk.output());
        assert!(!bus.copi.output());
    }
}
