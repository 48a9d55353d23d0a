use crate::model::performance::Distribution;
use log::warn;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const MAX_GAUSSIAN_DRAWS: usize = 1000;

/// A reproducible series of random values drawn from one distribution.
///
/// Values are generated on demand and remembered, so a value can be queried again by its index
/// and correlated distributions build each value on top of the previous one.
#[derive(Debug, Clone)]
pub struct RandomNumberProvider {
    distribution: Distribution,
    rng: ChaCha8Rng,
    series: Vec<f64>,
}

impl RandomNumberProvider {
    pub fn new(distribution: Distribution, seed: u64) -> Self {
        let distribution = match distribution {
            Distribution::CompensatingTriangle {
                degree_of_correlation,
                lower_limit,
                upper_limit,
                lower_clip,
                upper_clip,
            } if degree_of_correlation <= 0.0 => {
                warn!(
                    "Degree of correlation {} is not positive, using 1..!",
                    degree_of_correlation
                );
                Distribution::CompensatingTriangle {
                    degree_of_correlation: 1.0,
                    lower_limit,
                    upper_limit,
                    lower_clip,
                    upper_clip,
                }
            }
            other => other,
        };

        Self {
            distribution,
            rng: ChaCha8Rng::seed_from_u64(seed),
            series: Vec::new(),
        }
    }

    pub fn distribution(&self) -> &Distribution {
        &self.distribution
    }

    /// Restarts the series from a new seed.
    pub fn set_seed(&mut self, seed: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self.series.clear();
    }

    /// Starts a correlated series at `value` (clamped to what the distribution can produce).
    /// Uncorrelated distributions ignore it.
    pub fn set_initial_value(&mut self, value: f64) {
        let value = match self.distribution {
            Distribution::BrownianNoise {
                lower_limit,
                upper_limit,
                ..
            } => value.clamp(lower_limit.min(upper_limit), upper_limit.max(lower_limit)),
            Distribution::CompensatingTriangle {
                lower_clip,
                upper_clip,
                ..
            } => clip(value, lower_clip, upper_clip),
            _ => return,
        };
        self.series.clear();
        self.series.push(value);
    }

    /// Value at an integer position of the series. Negative positions read position 0.
    pub fn value(&mut self, index: i64) -> f64 {
        let index = index.max(0) as usize;

        if let Distribution::List { values } = &self.distribution {
            if values.is_empty() {
                return 0.0;
            }
            return values[index % values.len()];
        }

        while self.series.len() <= index {
            let next = self.next_value();
            self.series.push(next);
        }
        self.series[index]
    }

    /// Value at a fractional position, interpolated linearly between its integer neighbours.
    pub fn value_at(&mut self, index: f64) -> f64 {
        let index = index.max(0.0);
        let base = index.floor();
        let rest = index - base;
        let a = self.value(base as i64);
        if rest <= 0.0 {
            return a;
        }
        let b = self.value(base as i64 + 1);
        a + (b - a) * rest
    }

    fn next_value(&mut self) -> f64 {
        match self.distribution.clone() {
            Distribution::Uniform {
                lower_limit,
                upper_limit,
            } => self.uniform(lower_limit, upper_limit),
            Distribution::Gaussian {
                standard_deviation,
                lower_limit,
                upper_limit,
            } => self.gaussian(standard_deviation, lower_limit, upper_limit),
            Distribution::Triangular {
                lower_limit,
                upper_limit,
                mode,
                lower_clip,
                upper_clip,
            } => {
                let value = self.triangular(lower_limit, upper_limit, mode);
                clip(value, lower_clip, upper_clip)
            }
            Distribution::BrownianNoise {
                max_step_width,
                lower_limit,
                upper_limit,
            } => match self.series.last().copied() {
                None => self.uniform(lower_limit, upper_limit),
                Some(previous) => {
                    let step = (self.rng.r#gen::<f64>() - 0.5) * 2.0 * max_step_width;
                    reflect(previous + step, lower_limit, upper_limit)
                }
            },
            Distribution::CompensatingTriangle {
                degree_of_correlation,
                lower_limit,
                upper_limit,
                lower_clip,
                upper_clip,
            } => match self.series.last().copied() {
                None => self.uniform(lower_clip, upper_clip),
                Some(previous) => {
                    let low = previous - (previous - lower_limit) / degree_of_correlation;
                    let high = previous + (upper_limit - previous) / degree_of_correlation;
                    let value = self
                        .triangular(low, high, previous)
                        .clamp(lower_limit.min(upper_limit), upper_limit.max(lower_limit));
                    clip(value, lower_clip, upper_clip)
                }
            },
            Distribution::List { .. } => 0.0,
        }
    }

    fn uniform(&mut self, lower: f64, upper: f64) -> f64 {
        lower + self.rng.r#gen::<f64>() * (upper - lower)
    }

    /// Box-Muller transform, redrawn until the value lands within the limits.
    fn gaussian(&mut self, sigma: f64, lower: f64, upper: f64) -> f64 {
        if sigma == 0.0 {
            return 0.0f64.clamp(lower.min(upper), upper.max(lower));
        }

        let mut value = 0.0;
        for _ in 0..MAX_GAUSSIAN_DRAWS {
            let u1: f64 = 1.0 - self.rng.r#gen::<f64>();
            let u2: f64 = self.rng.r#gen::<f64>();
            value = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos() * sigma;
            if value >= lower && value <= upper {
                return value;
            }
        }
        value.clamp(lower.min(upper), upper.max(lower))
    }

    fn triangular(&mut self, lower: f64, upper: f64, mode: f64) -> f64 {
        if upper == lower {
            return lower;
        }
        let scale = upper - lower;
        let ca = mode - lower;
        let f = ca / scale;
        let r: f64 = self.rng.r#gen();
        if r < f {
            lower + (r * scale * ca).sqrt()
        } else {
            upper - ((1.0 - r) * scale * (upper - mode)).sqrt()
        }
    }
}

fn clip(value: f64, low: f64, high: f64) -> f64 {
    if value > high {
        high
    } else if value < low {
        low
    } else {
        value
    }
}

/// Folds a random walk step back into `[lower, upper]`.
fn reflect(value: f64, lower: f64, upper: f64) -> f64 {
    let (lower, upper) = (lower.min(upper), upper.max(lower));
    let mut value = value;
    if value > upper {
        value = upper - (value - upper);
    }
    if value < lower {
        value = lower + (lower - value);
    }
    value.clamp(lower, upper)
}

/// Draws one value from a triangular distribution between `low` and `high` peaking at `mode`.
pub fn triangular_once(rng: &mut ChaCha8Rng, low: f64, high: f64, mode: f64) -> f64 {
    let (low, high) = (low.min(high), high.max(low));
    if high == low {
        return low;
    }
    let mode = mode.clamp(low, high);
    let scale = high - low;
    let ca = mode - low;
    let r: f64 = rng.r#gen();
    if r < ca / scale {
        low + (r * scale * ca).sqrt()
    } else {
        high - ((1.0 - r) * scale * (high - mode)).sqrt()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn uniform() -> Distribution {
        Distribution::Uniform {
            lower_limit: -10.0,
            upper_limit: 10.0,
        }
    }

    #[test]
    fn same_seed_same_series() {
        env_logger::try_init().unwrap_or(());

        let mut a = RandomNumberProvider::new(uniform(), 42);
        let mut b = RandomNumberProvider::new(uniform(), 42);
        let first: Vec<f64> = (0..32).map(|i| a.value(i)).collect();
        let second: Vec<f64> = (0..32).map(|i| b.value(i)).collect();
        assert_eq!(first, second);
        assert!(first.iter().all(|v| (-10.0..=10.0).contains(v)));

        // reading backwards returns remembered values
        assert_eq!(a.value(3), first[3]);

        a.set_seed(43);
        assert_ne!(a.value(0), first[0]);
        a.set_seed(42);
        assert_eq!(a.value(0), first[0]);
    }

    #[test]
    fn fractional_positions_interpolate() {
        let mut provider = RandomNumberProvider::new(uniform(), 7);
        let a = provider.value(2);
        let b = provider.value(3);
        assert!((provider.value_at(2.25) - (a + (b - a) * 0.25)).abs() < 1e-12);
        assert_eq!(provider.value_at(-4.0), provider.value(0));
    }

    #[test]
    fn gaussian_respects_limits() {
        let mut provider = RandomNumberProvider::new(
            Distribution::Gaussian {
                standard_deviation: 30.0,
                lower_limit: -5.0,
                upper_limit: 5.0,
            },
            1,
        );
        for i in 0..500 {
            let value = provider.value(i);
            assert!((-5.0..=5.0).contains(&value));
        }

        let mut flat = RandomNumberProvider::new(
            Distribution::Gaussian {
                standard_deviation: 0.0,
                lower_limit: -5.0,
                upper_limit: 5.0,
            },
            1,
        );
        assert_eq!(flat.value(10), 0.0);
    }

    #[test]
    fn triangular_clips() {
        let mut provider = RandomNumberProvider::new(
            Distribution::Triangular {
                lower_limit: -20.0,
                upper_limit: 20.0,
                mode: 0.0,
                lower_clip: -8.0,
                upper_clip: 12.0,
            },
            99,
        );
        for i in 0..500 {
            let value = provider.value(i);
            assert!((-8.0..=12.0).contains(&value));
        }
    }

    #[test]
    fn brownian_steps_are_bounded() {
        let mut provider = RandomNumberProvider::new(
            Distribution::BrownianNoise {
                max_step_width: 2.0,
                lower_limit: -10.0,
                upper_limit: 10.0,
            },
            5,
        );
        let mut previous = provider.value(0);
        for i in 1..1000 {
            let value = provider.value(i);
            assert!((-10.0..=10.0).contains(&value));
            assert!((value - previous).abs() <= 2.0 + 1e-9);
            previous = value;
        }
    }

    #[test]
    fn compensating_triangle_and_initial_value() {
        let mut provider = RandomNumberProvider::new(
            Distribution::CompensatingTriangle {
                degree_of_correlation: 0.0,
                lower_limit: -10.0,
                upper_limit: 10.0,
                lower_clip: -6.0,
                upper_clip: 6.0,
            },
            11,
        );
        assert!(matches!(
            provider.distribution(),
            Distribution::CompensatingTriangle { degree_of_correlation, .. } if *degree_of_correlation == 1.0
        ));

        provider.set_initial_value(40.0);
        assert_eq!(provider.value(0), 6.0);
        for i in 1..300 {
            assert!((-6.0..=6.0).contains(&provider.value(i)));
        }
    }

    #[test]
    fn list_cycles() {
        let mut provider =
            RandomNumberProvider::new(Distribution::List { values: vec![1.0, 2.0, 3.0] }, 0);
        let values: Vec<f64> = (0..7).map(|i| provider.value(i)).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0, 1.0, 2.0, 3.0, 1.0]);
        assert_eq!(provider.value_at(0.5), 1.5);

        let mut empty = RandomNumberProvider::new(Distribution::List { values: vec![] }, 0);
        assert_eq!(empty.value(4), 0.0);
    }

    #[test]
    fn triangular_once_stays_in_range() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..200 {
            let value = triangular_once(&mut rng, 4.0, 2.0, 4.0);
            assert!((2.0..=4.0).contains(&value));
        }
        assert_eq!(triangular_once(&mut rng, 1.0, 1.0, 1.0), 1.0);
    }
}
