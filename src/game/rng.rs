//! Deterministic linear congruential generator
//!
//! Every peer derives the round grid from the same 32-bit seed, so the
//! generator must only use wrapping integer arithmetic.

const MULTIPLIER: u32 = 1_664_525;
const INCREMENT: u32 = 1_013_904_223;
const TWO_POW_32: f64 = 4_294_967_296.0;

/// Counter-based PRNG shared by all peers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LcgRng {
    state: u32,
}

impl LcgRng {
    pub fn new(seed: u32) -> Self {
        Self { state: seed }
    }

    /// Advance the state and return it
    pub fn next_u32(&mut self) -> u32 {
        self.state = self.state.wrapping_mul(MULTIPLIER).wrapping_add(INCREMENT);
        self.state
    }

    /// Uniform float in [0, 1)
    pub fn next_unit_float(&mut self) -> f64 {
        f64::from(self.next_u32()) / TWO_POW_32
    }
}
