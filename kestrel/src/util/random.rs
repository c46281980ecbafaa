//! Seedable pseudo-random numbers.
//!
//! Nothing in the kernel needs good randomness, only reproducible
//! interleavings: every random decision (scheduling jitter, the lottery
//! scheduler, vehicle draws) comes from a [`RandomSource`] that is seeded
//! explicitly.

/// A source of pseudo-random numbers.
pub trait RandomSource {
    /// The next 32 random bits.
    fn next_u32(&mut self) -> u32;

    /// A number in `0..bound`. `bound` of zero is treated as one.
    fn below(&mut self, bound: u32) -> u32 {
        self.next_u32() % bound.max(1)
    }

    /// A coin flip.
    fn coin(&mut self) -> bool {
        self.next_u32() & 1 == 1
    }
}

/// Linear congruential generator (the classic 1103515245 / 12345 one).
#[derive(Clone, Debug)]
pub struct Lcg {
    state: u64,
}

impl Lcg {
    /// A generator seeded with `seed`.
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn step(&mut self) -> u32 {
        self.state = self
            .state
            .wrapping_mul(1103515245)
            .wrapping_add(12345)
            & 0xffff_ffff;
        (self.state >> 16) as u32 & 0x7fff
    }
}

impl RandomSource for Lcg {
    fn next_u32(&mut self) -> u32 {
        // High 15 bits of three steps.
        let (a, b, c) = (self.step(), self.step(), self.step());
        (a << 17) ^ (b << 2) ^ c
    }
}

