//! # Tweedie Response Family
//!
//! Compound Poisson-gamma distribution with power index `1 < p < 2` and a log link.
//! It puts a point mass at zero and a continuous density on the positive reals, which
//! is the shape of abundance counts with many empty samples.
//!
//! The density has no closed form for `y > 0`; it is evaluated with the series of
//! Dunn & Smyth (2005), summing the terms around the largest one on the log scale.

use serde::Serialize;

/// Smallest and largest power the estimator will consider.
pub const MIN_POWER: f64 = 1.01;
pub const MAX_POWER: f64 = 1.99;

/// Terms this far below the largest on the log scale no longer change the sum.
const SERIES_DROP: f64 = 37.0;
const SERIES_MAX_TERMS: usize = 20_000;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Tweedie {
    pub power: f64,
}

impl Tweedie {
    pub fn new(power: f64) -> Self {
        Self {
            power: power.clamp(MIN_POWER, MAX_POWER),
        }
    }

    pub fn variance(&self, mu: f64) -> f64 {
        mu.powf(self.power)
    }

    /// IRLS working weight for the log link: `(dmu/deta)^2 / V(mu) = mu^(2-p)`.
    pub fn working_weight(&self, mu: f64) -> f64 {
        mu.powf(2.0 - self.power)
    }

    /// Unit deviance `d(y, mu)`.
    pub fn unit_deviance(&self, y: f64, mu: f64) -> f64 {
        let p = self.power;
        let mu_term = mu.powf(2.0 - p) / (2.0 - p);
        if y <= 0.0 {
            2.0 * mu_term
        } else {
            let y_term = y.powf(2.0 - p) / ((1.0 - p) * (2.0 - p));
            let cross = y * mu.powf(1.0 - p) / (1.0 - p);
            (2.0 * (y_term - cross + mu_term)).max(0.0)
        }
    }

    pub fn deviance(&self, y: &[f64], mu: &[f64]) -> f64 {
        y.iter()
            .zip(mu)
            .map(|(&yi, &mi)| self.unit_deviance(yi, mi))
            .sum()
    }

    /// Pearson estimate of the dispersion with `residual_df` residual degrees of freedom.
    pub fn pearson_scale(&self, y: &[f64], mu: &[f64], residual_df: f64) -> f64 {
        let chi2: f64 = y
            .iter()
            .zip(mu)
            .map(|(&yi, &mi)| (yi - mi).powi(2) / self.variance(mi))
            .sum();
        chi2 / residual_df.max(1.0)
    }

    /// Log-density (or log-probability at zero) of one observation.
    pub fn log_density(&self, y: f64, mu: f64, phi: f64) -> f64 {
        let p = self.power;
        let mu_term = mu.powf(2.0 - p) / (2.0 - p);
        if y <= 0.0 {
            return -mu_term / phi;
        }
        let exponent = (y * mu.powf(1.0 - p) / (1.0 - p) - mu_term) / phi;
        -y.ln() + log_series(y, phi, p) + exponent
    }

    pub fn log_likelihood(&self, y: &[f64], mu: &[f64], phi: f64) -> f64 {
        y.iter()
            .zip(mu)
            .map(|(&yi, &mi)| self.log_density(yi, mi, phi))
            .sum()
    }
}

/// `log sum_j W_j` of the Dunn-Smyth series for `y > 0`.
///
/// `W_j = z^j / (j! Gamma(-j alpha))` with `alpha = (2-p)/(1-p)` and
/// `log z = -alpha log y + alpha log(p-1) - (1-alpha) log phi - log(2-p)`.
fn log_series(y: f64, phi: f64, p: f64) -> f64 {
    let alpha = (2.0 - p) / (1.0 - p);
    let log_z =
        -alpha * y.ln() + alpha * (p - 1.0).ln() - (1.0 - alpha) * phi.ln() - (2.0 - p).ln();
    let log_w = |j: usize| -> f64 {
        let jf = j as f64;
        jf * log_z - libm::lgamma(jf + 1.0) - libm::lgamma(-jf * alpha)
    };

    // The terms peak near j = y^(2-p) / (phi (2-p)).
    let j_peak = ((y.powf(2.0 - p) / (phi * (2.0 - p))).round() as usize).max(1);
    let peak = log_w(j_peak);

    let mut terms = vec![peak];
    let mut j = j_peak + 1;
    while j - j_peak < SERIES_MAX_TERMS {
        let w = log_w(j);
        terms.push(w);
        if w < peak - SERIES_DROP {
            break;
        }
        j += 1;
    }
    let mut j = j_peak;
    while j > 1 && j_peak - j < SERIES_MAX_TERMS {
        j -= 1;
        let w = log_w(j);
        terms.push(w);
        if w < peak - SERIES_DROP {
            break;
        }
    }

    let max = terms.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    max + terms.iter().map(|w| (w - max).exp()).sum::<f64>().ln()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn deviance_vanishes_at_the_observation() {
        let family = Tweedie::new(1.4);
        for &y in &[0.5, 1.0, 7.0, 120.0] {
            assert!(family.unit_deviance(y, y).abs() < 1e-9);
            assert!(family.unit_deviance(y, y * 1.3) > 0.0);
        }
        assert_relative_eq!(
            family.unit_deviance(0.0, 2.0),
            2.0 * 2.0_f64.powf(0.6) / 0.6,
            epsilon = 1e-12
        );
    }

    #[test]
    fn density_integrates_to_one_with_correct_mean() {
        let family = Tweedie::new(1.5);
        let (mu, phi) = (2.0, 1.0);
        let zero_mass = family.log_density(0.0, mu, phi).exp();

        // Trapezoid rule on the continuous part.
        let step = 0.002;
        let upper = 60.0;
        let steps = (upper / step) as usize;
        let mut mass = 0.0;
        let mut mean = 0.0;
        let mut previous: Option<(f64, f64)> = None;
        for i in 1..=steps {
            let y = i as f64 * step;
            let f = family.log_density(y, mu, phi).exp();
            if let Some((py, pf)) = previous {
                mass += 0.5 * (pf + f) * step;
                mean += 0.5 * (py * pf + y * f) * step;
            } else {
                // The density is finite at 0+ for p = 1.5; the first sliver is a rectangle.
                mass += f * step;
                mean += 0.5 * y * f * step;
            }
            previous = Some((y, f));
        }
        assert_relative_eq!(zero_mass + mass, 1.0, epsilon = 2e-3);
        assert_relative_eq!(mean, mu, epsilon = 5e-3);
    }

    #[test]
    fn zero_probability_matches_poisson_count_of_no_events() {
        let family = Tweedie::new(1.3);
        let (mu, phi): (f64, f64) = (0.8, 1.7);
        let lambda = mu.powf(0.7) / (phi * 0.7);
        assert_relative_eq!(family.log_density(0.0, mu, phi), -lambda, epsilon = 1e-12);
    }

    #[test]
    fn power_is_kept_inside_the_open_interval() {
        assert_eq!(Tweedie::new(0.5).power, MIN_POWER);
        assert_eq!(Tweedie::new(2.5).power, MAX_POWER);
    }
}
