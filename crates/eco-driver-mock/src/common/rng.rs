//! Seeded RNG wrapper for reproducible noise.
//!
//! Mock devices share this so tests can pin a seed and get the same noise
//! and the same flaky-condition pattern on every run.

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Seeded random number generator
pub struct MockRng {
    inner: Mutex<ChaCha8Rng>,
}

impl MockRng {
    /// Create a new RNG with optional seed.
    /// If seed is None, uses a random seed from the OS.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => ChaCha8Rng::seed_from_u64(s),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            inner: Mutex::new(rng),
        }
    }

    /// True with probability `rate` (clamped to `[0, 1]`).
    pub fn should_fail(&self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        self.inner.lock().gen_range(0.0..1.0) < rate
    }

    /// Uniform noise in `[-amplitude, amplitude]`.
    pub fn noise(&self, amplitude: f64) -> f64 {
        if amplitude <= 0.0 {
            return 0.0;
        }
        self.inner.lock().gen_range(-amplitude..=amplitude)
    }
}

impl Default for MockRng {
    fn default() -> Self {
        Self::new(None)
    }
}

impl std::fmt::Debug for MockRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRng")
            .field("inner", &"<Mutex<ChaCha8Rng>>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_noise_deterministic() {
        let a = MockRng::new(Some(42));
        let b = MockRng::new(Some(42));
        for _ in 0..10 {
            assert_eq!(a.noise(1.0), b.noise(1.0));
        }
    }

    #[test]
    fn test_noise_bounds() {
        let rng = MockRng::new(Some(7));
        for _ in 0..1000 {
            let n = rng.noise(0.5);
            assert!((-0.5..=0.5).contains(&n));
        }
        assert_eq!(rng.noise(0.0), 0.0);
    }

    #[test]
    fn test_should_fail_extremes() {
        let rng = MockRng::new(Some(42));
        for _ in 0..100 {
            assert!(!rng.should_fail(0.0));
            assert!(rng.should_fail(1.0));
        }
    }

    #[test]
    fn test_should_fail_probability() {
        let rng = MockRng::new(Some(42));
        let samples = 10_000;
        let failures = (0..samples).filter(|_| rng.should_fail(0.3)).count();
        // 30% of 10000, within 10%
        assert!((2700..3300).contains(&failures), "got {failures}");
    }
}
