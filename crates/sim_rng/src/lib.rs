//! Seedable variate stream for the race simulator.
//!
//! Backed by ChaCha8: fixed integer arithmetic, identical output for the
//! same seed on every platform build. Normals come from the trigonometric
//! Box-Muller transform so uniform consumption is exact and auditable:
//! `normal` burns two uniforms, `normal_batch(n)` burns `ceil(n/2) * 2`.

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

const TAU: f64 = std::f64::consts::TAU;

pub struct SimRng {
    inner: ChaCha8Rng,
}

impl SimRng {
    pub fn seeded(seed: u64) -> Self {
        Self {
            inner: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Unseeded stream from OS entropy. Not reproducible, but the variate
    /// quality is the same as the seeded path.
    pub fn from_entropy() -> Self {
        Self {
            inner: ChaCha8Rng::from_entropy(),
        }
    }

    /// Uniform in `[0, 1)`: the top 53 bits of one 64-bit output scaled by
    /// 2^-53.
    pub fn next_uniform(&mut self) -> f64 {
        (self.inner.next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// One normal variate from a full Box-Muller pair; the sine half of
    /// the pair is discarded so consumption stays fixed at two uniforms.
    pub fn normal(&mut self, mean: f64, std: f64) -> f64 {
        let (z0, _z1) = self.normal_pair();
        mean + std * z0
    }

    /// `n` normal variates from `ceil(n/2)` Box-Muller pairs. Odd `n`
    /// discards the final spare.
    pub fn normal_batch(&mut self, n: usize, mean: f64, std: f64) -> Vec<f64> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            let (z0, z1) = self.normal_pair();
            out.push(mean + std * z0);
            if out.len() < n {
                out.push(mean + std * z1);
            }
        }
        out
    }

    fn normal_pair(&mut self) -> (f64, f64) {
        // Guard the log argument away from zero; next_uniform can return
        // exactly 0.0.
        let u1 = self.next_uniform().max(f64::MIN_POSITIVE);
        let u2 = self.next_uniform();
        let radius = (-2.0 * u1.ln()).sqrt();
        let angle = TAU * u2;
        (radius * angle.cos(), radius * angle.sin())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_stream() {
        let mut a = SimRng::seeded(42);
        let mut b = SimRng::seeded(42);
        for _ in 0..256 {
            assert_eq!(a.next_uniform().to_bits(), b.next_uniform().to_bits());
        }
    }

    #[test]
    fn different_seeds_diverge() {
        let mut a = SimRng::seeded(1);
        let mut b = SimRng::seeded(2);
        let same = (0..64)
            .filter(|_| a.next_uniform() == b.next_uniform())
            .count();
        assert!(same < 4);
    }

    #[test]
    fn uniforms_stay_in_half_open_range() {
        let mut rng = SimRng::seeded(7);
        for _ in 0..10_000 {
            let u = rng.next_uniform();
            assert!((0.0..1.0).contains(&u));
        }
    }

    #[test]
    fn normal_consumes_exactly_two_uniforms() {
        let mut probe = SimRng::seeded(99);
        probe.next_uniform();
        probe.next_uniform();
        let expected_next = probe.next_uniform();

        let mut rng = SimRng::seeded(99);
        let _ = rng.normal(0.0, 1.0);
        assert_eq!(rng.next_uniform().to_bits(), expected_next.to_bits());
    }

    #[test]
    fn batch_consumes_whole_pairs() {
        // 5 variates -> 3 pairs -> 6 uniforms.
        let mut probe = SimRng::seeded(123);
        for _ in 0..6 {
            probe.next_uniform();
        }
        let expected_next = probe.next_uniform();

        let mut rng = SimRng::seeded(123);
        let batch = rng.normal_batch(5, 0.0, 1.0);
        assert_eq!(batch.len(), 5);
        assert_eq!(rng.next_uniform().to_bits(), expected_next.to_bits());
    }

    #[test]
    fn batch_matches_sequential_pairs() {
        let mut a = SimRng::seeded(5);
        let batch = a.normal_batch(4, 2.0, 0.5);

        let mut b = SimRng::seeded(5);
        let mut seq = Vec::new();
        for _ in 0..2 {
            let (z0, z1) = b.normal_pair();
            seq.push(2.0 + 0.5 * z0);
            seq.push(2.0 + 0.5 * z1);
        }
        assert_eq!(batch, seq);
    }

    #[test]
    fn normal_moments_are_sane() {
        let mut rng = SimRng::seeded(2024);
        let n = 50_000;
        let samples = rng.normal_batch(n, 3.0, 2.0);
        let mean = samples.iter().sum::<f64>() / n as f64;
        let var = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
        assert!((mean - 3.0).abs() < 0.05, "mean drifted: {mean}");
        assert!((var - 4.0).abs() < 0.15, "variance drifted: {var}");
    }
}
