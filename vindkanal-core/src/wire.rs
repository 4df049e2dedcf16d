//! ## vindkanal-core::wire
//! **Randomized wire parameters: base ± spread under a sampling distribution**
//!
//! Every impairment metric is a [`WireValue`]: a fixed scalar when
//! `spread == 0`, otherwise sampled per use. Deterministic accept/reject
//! decisions (MTU, buffer capacity) use the bounds instead of a sample so
//! that a single packet's fate is not itself random unless configured to be.

use rand::rngs::SmallRng;
use rand::Rng;

/// Sampling distribution of a [`WireValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Distribution {
    #[default]
    Uniform,
    Gaussian,
}

/// `spread` maps to roughly three standard deviations, keeping ~98% of
/// Gaussian samples inside `[base - spread, base + spread]`.
const SIGMA: f64 = 1.0 / 3.0;

/// One randomized impairment parameter.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WireValue {
    pub base: f64,
    pub spread: f64,
    pub distribution: Distribution,
}

impl WireValue {
    /// `spread` is clamped to be non-negative.
    pub fn new(base: f64, spread: f64, distribution: Distribution) -> Self {
        Self {
            base,
            spread: spread.max(0.0),
            distribution,
        }
    }

    pub fn fixed(base: f64) -> Self {
        Self::new(base, 0.0, Distribution::Uniform)
    }

    /// Best-case value, `base - spread`.
    #[inline]
    pub fn lower_bound(&self) -> f64 {
        self.base - self.spread
    }

    /// Worst-case value, `base + spread`.
    #[inline]
    pub fn upper_bound(&self) -> f64 {
        self.base + self.spread
    }

    /// Draws one value. A zero spread short-circuits to `base`.
    pub fn sample(&self, rng: &mut SmallRng) -> f64 {
        if self.spread == 0.0 {
            return self.base;
        }

        match self.distribution {
            Distribution::Uniform => self.base + self.spread * (rng.random::<f64>() * 2.0 - 1.0),
            Distribution::Gaussian => {
                // Polar Box-Muller with rejection of pairs outside the unit circle.
                loop {
                    let x = rng.random::<f64>() * 2.0 - 1.0;
                    let y = rng.random::<f64>() * 2.0 - 1.0;
                    let r2 = x * x + y * y;
                    if r2 > 0.0 && r2 < 1.0 {
                        let mag = x * ((-2.0 * r2.ln()) / r2).sqrt();
                        return self.base + self.spread * SIGMA * mag;
                    }
                }
            }
        }
    }
}

/// Impairment metrics carried by every condition state, per direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    Delay,
    Dup,
    Loss,
    BurstyLoss,
    Mtu,
    ChanBufSize,
    Bandwidth,
    Speed,
    Noise,
}

pub const METRIC_COUNT: usize = 9;

impl Metric {
    pub const ALL: [Metric; METRIC_COUNT] = [
        Metric::Delay,
        Metric::Dup,
        Metric::Loss,
        Metric::BurstyLoss,
        Metric::Mtu,
        Metric::ChanBufSize,
        Metric::Bandwidth,
        Metric::Speed,
        Metric::Noise,
    ];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Metric::Delay => 0,
            Metric::Dup => 1,
            Metric::Loss => 2,
            Metric::BurstyLoss => 3,
            Metric::Mtu => 4,
            Metric::ChanBufSize => 5,
            Metric::Bandwidth => 6,
            Metric::Speed => 7,
            Metric::Noise => 8,
        }
    }

    /// Management-protocol spelling of the metric.
    pub fn name(self) -> &'static str {
        match self {
            Metric::Delay => "delay",
            Metric::Dup => "dup",
            Metric::Loss => "loss",
            Metric::BurstyLoss => "lostburst",
            Metric::Mtu => "mtu",
            Metric::ChanBufSize => "chanbufsize",
            Metric::Bandwidth => "bandwidth",
            Metric::Speed => "speed",
            Metric::Noise => "noise",
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn zero_spread_is_deterministic() {
        let mut rng = SmallRng::seed_from_u64(7);
        let value = WireValue::fixed(42.5);
        for _ in 0..100 {
            assert_eq!(value.sample(&mut rng), 42.5);
        }
    }

    #[test]
    fn uniform_samples_stay_inside_bounds() {
        let mut rng = SmallRng::seed_from_u64(7);
        let value = WireValue::new(50.0, 10.0, Distribution::Uniform);
        for _ in 0..10_000 {
            let s = value.sample(&mut rng);
            assert!(s >= value.lower_bound() && s <= value.upper_bound());
        }
    }

    #[test]
    fn gaussian_samples_mostly_inside_bounds() {
        let mut rng = SmallRng::seed_from_u64(7);
        let value = WireValue::new(0.0, 30.0, Distribution::Gaussian);
        let inside = (0..10_000)
            .map(|_| value.sample(&mut rng))
            .filter(|s| *s >= value.lower_bound() && *s <= value.upper_bound())
            .count();
        // spread = 3 sigma, so ~98% of the mass is inside the band.
        assert!(inside >= 9_500, "only {inside} of 10000 inside bounds");
    }

    #[test]
    fn negative_spread_is_clamped() {
        let value = WireValue::new(10.0, -5.0, Distribution::Uniform);
        assert_eq!(value.spread, 0.0);
        assert_eq!(value.upper_bound(), 10.0);
    }

    #[test]
    fn metric_indices_match_all_order() {
        for (i, metric) in Metric::ALL.iter().enumerate() {
            assert_eq!(metric.index(), i);
        }
    }
}
