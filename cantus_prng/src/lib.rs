// Deterministic, portable pseudo-random number generator.
//
// Implements xoshiro256++ (Blackman & Vigna, 2019) with SplitMix64 seeding,
// plus the sampling helpers the harmonization engine needs: categorical
// draws over unnormalized weights and temperature-scaled draws over a
// probability vector (the infilling sampler's core operation).
//
// Every stochastic decision in the workspace draws from a `CantusRng`: the
// infilling controller's per-cell sampling and the random policy. Parallel
// episodes each seed their own generator. Given a seed, a whole harmonization
// run is reproducible.
//
// **Critical constraint: determinism.** The core generator uses integer
// arithmetic only. The float helpers derive from it in a fixed order, so two
// generators with the same state always make the same draws.

use serde::{Deserialize, Serialize};

/// Floor added to probabilities before taking logs in `sample_tempered`.
const LOG_FLOOR: f64 = 1e-8;

/// Xoshiro256++ PRNG.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CantusRng {
    s: [u64; 4],
}

impl CantusRng {
    /// Create a new PRNG seeded from a `u64`.
    ///
    /// Uses SplitMix64 to expand the seed into the 256-bit internal state.
    pub fn new(seed: u64) -> Self {
        let mut sm = seed;
        Self {
            s: [
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
            ],
        }
    }

    /// Generate the next `u64` in the sequence.
    pub fn next_u64(&mut self) -> u64 {
        let result = (self.s[0].wrapping_add(self.s[3]))
            .rotate_left(23)
            .wrapping_add(self.s[0]);

        let t = self.s[1] << 17;

        self.s[2] ^= self.s[0];
        self.s[3] ^= self.s[1];
        self.s[1] ^= self.s[2];
        self.s[0] ^= self.s[3];

        self.s[2] ^= t;
        self.s[3] = self.s[3].rotate_left(45);

        result
    }

    /// Generate a uniform `f64` in [0, 1) from the upper 53 bits.
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Generate a uniform random integer in `[low, high)`.
    ///
    /// Uses rejection sampling to avoid modulo bias.
    /// Panics if `low >= high`.
    pub fn range_u64(&mut self, low: u64, high: u64) -> u64 {
        assert!(low < high, "range_u64: low must be less than high");
        let range = high - low;
        if range.is_power_of_two() {
            return low + (self.next_u64() & (range - 1));
        }
        let threshold = range.wrapping_neg() % range;
        loop {
            let r = self.next_u64();
            if r >= threshold {
                return low + (r % range);
            }
        }
    }

    /// Generate a uniform random `usize` in `[low, high)`.
    pub fn range_usize(&mut self, low: usize, high: usize) -> usize {
        self.range_u64(low as u64, high as u64) as usize
    }

    /// Generate a uniform random `i16` in `[low, high]` (inclusive).
    ///
    /// Panics if `low > high`.
    pub fn range_i16_inclusive(&mut self, low: i16, high: i16) -> i16 {
        assert!(low <= high, "range_i16_inclusive: low must be <= high");
        let span = (high as i32 - low as i32 + 1) as u64;
        (low as i32 + self.range_u64(0, span) as i32) as i16
    }

    /// Draw an index with probability proportional to `weights[i]`.
    ///
    /// Negative and non-finite weights count as zero. Returns `None` when the
    /// slice is empty or carries no positive mass.
    pub fn sample_weighted(&mut self, weights: &[f64]) -> Option<usize> {
        let clean = |w: f64| if w.is_finite() && w > 0.0 { w } else { 0.0 };
        let total: f64 = weights.iter().map(|&w| clean(w)).sum();
        if total <= 0.0 {
            return None;
        }
        let target = self.next_f64() * total;
        let mut cumulative = 0.0;
        let mut last_positive = None;
        for (i, &w) in weights.iter().enumerate() {
            let w = clean(w);
            if w == 0.0 {
                continue;
            }
            cumulative += w;
            last_positive = Some(i);
            if target < cumulative {
                return Some(i);
            }
        }
        // Rounding can leave target == total; the last positive entry owns it.
        last_positive
    }

    /// Draw an index from a probability vector reshaped by `temperature`.
    ///
    /// Each probability becomes a logit `ln(p + 1e-8) / temperature`, the
    /// logits are softmaxed, and one index is drawn. Temperatures below 1
    /// sharpen the distribution toward its mode; above 1 flatten it. Entries
    /// with zero probability stay excluded. Returns `None` if nothing has
    /// positive probability or the temperature is not a positive finite
    /// number.
    pub fn sample_tempered(&mut self, probs: &[f64], temperature: f64) -> Option<usize> {
        if !(temperature.is_finite() && temperature > 0.0) {
            return None;
        }
        let logits: Vec<Option<f64>> = probs
            .iter()
            .map(|&p| {
                if p.is_finite() && p > 0.0 {
                    Some((p + LOG_FLOOR).ln() / temperature)
                } else {
                    None
                }
            })
            .collect();
        let max = logits
            .iter()
            .flatten()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        if !max.is_finite() {
            return None;
        }
        let weights: Vec<f64> = logits
            .iter()
            .map(|l| l.map_or(0.0, |l| (l - max).exp()))
            .collect();
        self.sample_weighted(&weights)
    }
}

/// SplitMix64, used only for seeding xoshiro256++ from a single `u64`.
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_stream() {
        let mut a = CantusRng::new(42);
        let mut b = CantusRng::new(42);
        for _ in 0..1000 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn f64_in_unit_range() {
        let mut rng = CantusRng::new(12345);
        for _ in 0..10_000 {
            let v = rng.next_f64();
            assert!((0.0..1.0).contains(&v), "f64 out of range: {v}");
        }
    }

    #[test]
    fn inclusive_i16_range_reaches_both_ends() {
        let mut rng = CantusRng::new(3);
        let mut saw_low = false;
        let mut saw_high = false;
        for _ in 0..10_000 {
            let v = rng.range_i16_inclusive(-2, 2);
            assert!((-2..=2).contains(&v));
            saw_low |= v == -2;
            saw_high |= v == 2;
        }
        assert!(saw_low && saw_high);
    }

    #[test]
    fn weighted_sampling_skips_zero_mass() {
        let mut rng = CantusRng::new(9);
        for _ in 0..1000 {
            let i = rng.sample_weighted(&[0.0, 1.0, -3.0, f64::NAN, 2.0]).unwrap();
            assert!(i == 1 || i == 4, "sampled zero-mass index {i}");
        }
        assert_eq!(rng.sample_weighted(&[]), None);
        assert_eq!(rng.sample_weighted(&[0.0, 0.0]), None);
    }

    #[test]
    fn weighted_sampling_follows_proportions() {
        let mut rng = CantusRng::new(11);
        let mut counts = [0usize; 2];
        for _ in 0..10_000 {
            counts[rng.sample_weighted(&[1.0, 3.0]).unwrap()] += 1;
        }
        let share = counts[1] as f64 / 10_000.0;
        assert!((0.70..0.80).contains(&share), "expected ~75%, got {share}");
    }

    #[test]
    fn low_temperature_concentrates_on_mode() {
        let probs = [0.2, 0.5, 0.3];
        let mut rng = CantusRng::new(5);
        let mode_hits = (0..2000)
            .filter(|_| rng.sample_tempered(&probs, 0.05) == Some(1))
            .count();
        assert!(mode_hits > 1950, "cold sampling should pick the mode, got {mode_hits}");
    }

    #[test]
    fn tempered_sampling_rejects_bad_temperature() {
        let mut rng = CantusRng::new(1);
        assert_eq!(rng.sample_tempered(&[0.5, 0.5], 0.0), None);
        assert_eq!(rng.sample_tempered(&[0.5, 0.5], f64::NAN), None);
        assert_eq!(rng.sample_tempered(&[0.0, 0.0], 1.0), None);
    }

    #[test]
    fn serialization_roundtrip_continues_stream() {
        let mut rng = CantusRng::new(42);
        for _ in 0..100 {
            rng.next_u64();
        }
        let json = serde_json::to_string(&rng).unwrap();
        let mut restored: CantusRng = serde_json::from_str(&json).unwrap();
        for _ in 0..100 {
            assert_eq!(rng.next_u64(), restored.next_u64());
        }
    }
}
