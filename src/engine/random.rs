//! Randomness behind a trait so outcome draws are reproducible under test.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// Source of uniform samples in `[0, 1)`.
pub trait RandomSource: Send + Sync {
    fn next_uniform(&self) -> f64;
}

/// Largest f64 strictly below 1.0.
const BELOW_ONE: f64 = 1.0 - f64::EPSILON / 2.0;

/// Force a sample into `[0, 1)`. NaN maps to 0.
pub fn clamp_unit(sample: f64) -> f64 {
    if sample.is_nan() {
        0.0
    } else {
        sample.clamp(0.0, BELOW_ONE)
    }
}

/// Thread-local OS-seeded generator. The production default.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_uniform(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

/// Deterministic generator from a fixed seed.
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn next_uniform(&self) -> f64 {
        self.rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .gen::<f64>()
    }
}

/// Cycles through a fixed list of samples. Handy for forcing an outcome.
pub struct SequenceRandom {
    values: Vec<f64>,
    next: AtomicUsize,
}

impl SequenceRandom {
    pub fn new(values: Vec<f64>) -> Self {
        Self {
            values,
            next: AtomicUsize::new(0),
        }
    }

    /// Always returns the same sample.
    pub fn constant(value: f64) -> Self {
        Self::new(vec![value])
    }

    /// How many samples have been drawn.
    pub fn draws(&self) -> usize {
        self.next.load(Ordering::SeqCst)
    }
}

impl RandomSource for SequenceRandom {
    fn next_uniform(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let i = self.next.fetch_add(1, Ordering::SeqCst);
        self.values[i % self.values.len()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_unit() {
        assert_eq!(clamp_unit(0.25), 0.25);
        assert_eq!(clamp_unit(-3.0), 0.0);
        assert_eq!(clamp_unit(f64::NAN), 0.0);
        assert!(clamp_unit(1.0) < 1.0);
        assert!(clamp_unit(7.5) < 1.0);
    }

    #[test]
    fn test_seeded_is_reproducible() {
        let a = SeededRandom::new(42);
        let b = SeededRandom::new(42);
        for _ in 0..100 {
            assert_eq!(a.next_uniform(), b.next_uniform());
        }
    }

    #[test]
    fn test_thread_random_in_range() {
        for _ in 0..1000 {
            let x = ThreadRandom.next_uniform();
            assert!((0.0..1.0).contains(&x));
        }
    }

    #[test]
    fn test_sequence_cycles() {
        let seq = SequenceRandom::new(vec![0.1, 0.5, 0.95]);
        assert_eq!(seq.next_uniform(), 0.1);
        assert_eq!(seq.next_uniform(), 0.5);
        assert_eq!(seq.next_uniform(), 0.95);
        assert_eq!(seq.next_uniform(), 0.1);
        assert_eq!(seq.draws(), 4);
    }
}
