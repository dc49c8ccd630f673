//! Seeded pseudo-random number generator
//!
//! The opponent never touches ambient randomness: every draw goes through a
//! `RandomSource`, so a fixed seed replays the same match.

/// Injectable source of randomness for the opponent policy.
pub trait RandomSource {
    /// Generate next u64
    fn next_u64(&mut self) -> u64;

    /// Uniform float in [0, 1)
    fn next_unit(&mut self) -> f64 {
        // 53 high bits fill the f64 mantissa exactly
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Generate a value in range [0, max)
    fn next_range(&mut self, max: u32) -> u32 {
        if max == 0 {
            return 0;
        }
        ((self.next_u64() >> 32) as u32) % max
    }
}

/// Seeded random number generator
///
/// Deterministic: same seed = same sequence
#[derive(Clone, Debug)]
pub struct SeededRng {
    state: u64,
}

impl SeededRng {
    /// Create a new RNG from a 64-bit seed
    pub fn new(seed: u64) -> Self {
        // xorshift has a fixed point at zero
        let state = (seed ^ 0x9e3779b97f4a7c15) | 1;

        // Warm up the generator
        let mut rng = Self { state };
        for _ in 0..8 {
            rng.next_u64();
        }

        rng
    }

    /// Derive an independent stream, e.g. one for the opponent and one for
    /// random player picks.
    pub fn fork(&mut self, stream: u64) -> Self {
        Self::new(self.next_u64() ^ stream.wrapping_mul(0x517cc1b727220a95))
    }
}

impl RandomSource for SeededRng {
    fn next_u64(&mut self) -> u64 {
        // xorshift64*
        self.state ^= self.state >> 12;
        self.state ^= self.state << 25;
        self.state ^= self.state >> 27;
        self.state.wrapping_mul(0x2545f4914f6cdd1d)
    }
}
