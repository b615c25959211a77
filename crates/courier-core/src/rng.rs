//! Random source abstraction used for retry jitter.
//!
//! In production this wraps the thread-local RNG. Tests inject a fixed or
//! scripted source so backoff delays are exact.

use rand::Rng;

/// Abstraction over random number generation.
pub trait RandomSource: Send {
    /// Generate a random `f64` in `[0.0, 1.0)`.
    fn next_f64(&mut self) -> f64;
}

/// Random source backed by `rand`'s thread-local generator.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_f64(&mut self) -> f64 {
        rand::rng().random::<f64>()
    }
}
