//! Test random sources: deterministic `RandomSource` implementations.

use courier_core::rng::RandomSource;

/// Always returns the wrapped value. `FixedRandom(0.0)` disables jitter
/// while still exercising the jitter path.
#[derive(Debug, Clone, Copy)]
pub struct FixedRandom(pub f64);

impl RandomSource for FixedRandom {
    fn next_f64(&mut self) -> f64 {
        self.0
    }
}

/// Returns values from a predetermined sequence. Panics if the sequence is
/// exhausted.
#[derive(Debug)]
pub struct SequenceRandom {
    values: Vec<f64>,
    index: usize,
}

impl SequenceRandom {
    /// Create a new `SequenceRandom` with the given values.
    #[must_use]
    pub fn new(values: Vec<f64>) -> Self {
        Self { values, index: 0 }
    }
}

impl RandomSource for SequenceRandom {
    fn next_f64(&mut self) -> f64 {
        let value = self.values[self.index];
        self.index += 1;
        value
    }
}
