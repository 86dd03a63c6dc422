//! Line-profile and background components.
//!
//! The set of profile kinds is closed: the solver assembles Jacobian columns
//! by matching on every kind, so adding one means adding its `value` and
//! `derivatives` here.
//!
//! Parameter layouts:
//!
//! - `Gaussian`: `[peak, centroid, width]`, with `width` the standard deviation
//!   `f(λ) = peak * exp(-(λ - centroid)² / (2 width²))`
//! - `Polynomial`: `[c0, c1, ..., c_degree]`
//!   `f(λ) = Σ c_k (λ - reference)^k`

use serde::{Deserialize, Serialize};

const GAUSSIAN_PARAMS: [&str; 3] = ["peak", "centroid", "width"];

/// Indices of the Gaussian parameters within its own block.
pub const PEAK: usize = 0;
pub const CENTROID: usize = 1;
pub const WIDTH: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Profile {
    Gaussian {
        /// Wavelength range where the line is expected (used for initial guesses).
        #[serde(default)]
        window: Option<(f64, f64)>,
    },
    Polynomial {
        degree: usize,
        /// Expansion point; keeps the coefficients well conditioned.
        reference: f64,
    },
}

impl Profile {
    pub fn param_count(&self) -> usize {
        match self {
            Profile::Gaussian { .. } => 3,
            Profile::Polynomial { degree, .. } => degree + 1,
        }
    }

    pub fn param_name(&self, i: usize) -> String {
        match self {
            Profile::Gaussian { .. } => GAUSSIAN_PARAMS[i].to_string(),
            Profile::Polynomial { .. } => format!("c{i}"),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Profile::Gaussian { .. } => "gaussian",
            Profile::Polynomial { .. } => "polynomial",
        }
    }

    pub fn is_gaussian(&self) -> bool {
        matches!(self, Profile::Gaussian { .. })
    }

    /// Evaluate the profile at `lambda` given this component's parameters.
    pub fn value(&self, lambda: f64, p: &[f64]) -> f64 {
        match self {
            Profile::Gaussian { .. } => {
                let (peak, centroid, width) = (p[PEAK], p[CENTROID], p[WIDTH]);
                let w2 = width * width;
                if w2 == 0.0 {
                    return 0.0;
                }
                let d = lambda - centroid;
                peak * (-0.5 * d * d / w2).exp()
            }
            Profile::Polynomial { reference, .. } => {
                // Horner.
                let t = lambda - reference;
                p.iter().rev().fold(0.0, |acc, &c| acc * t + c)
            }
        }
    }

    /// Partial derivatives of `value` w.r.t. this component's parameters.
    ///
    /// `out` must have length `param_count()`.
    pub fn derivatives(&self, lambda: f64, p: &[f64], out: &mut [f64]) {
        match self {
            Profile::Gaussian { .. } => {
                let (peak, centroid, width) = (p[PEAK], p[CENTROID], p[WIDTH]);
                let w2 = width * width;
                if w2 == 0.0 {
                    out.iter_mut().for_each(|v| *v = 0.0);
                    return;
                }
                let d = lambda - centroid;
                let e = (-0.5 * d * d / w2).exp();
                out[PEAK] = e;
                out[CENTROID] = peak * e * d / w2;
                out[WIDTH] = peak * e * d * d / (w2 * width);
            }
            Profile::Polynomial { reference, .. } => {
                let t = lambda - reference;
                let mut pow = 1.0;
                for v in out.iter_mut() {
                    *v = pow;
                    pow *= t;
                }
            }
        }
    }
}

/// A named component of a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    pub profile: Profile,
}

impl Component {
    pub fn gaussian(name: impl Into<String>, window: Option<(f64, f64)>) -> Self {
        Self {
            name: name.into(),
            profile: Profile::Gaussian { window },
        }
    }

    pub fn polynomial(name: impl Into<String>, degree: usize, reference: f64) -> Self {
        Self {
            name: name.into(),
            profile: Profile::Polynomial { degree, reference },
        }
    }
}

/// Area under a Gaussian: `peak * width * sqrt(2π)`.
pub fn gaussian_integral(peak: f64, width: f64) -> f64 {
    peak * width.abs() * (2.0 * std::f64::consts::PI).sqrt()
}

/// Full width at half maximum of a Gaussian with standard deviation `width`.
pub fn gaussian_fwhm(width: f64) -> f64 {
    2.0 * (2.0 * std::f64::consts::LN_2).sqrt() * width.abs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric_derivatives(profile: &Profile, lambda: f64, p: &[f64]) -> Vec<f64> {
        (0..p.len())
            .map(|j| {
                let h = 1e-6 * p[j].abs().max(1e-3);
                let mut hi = p.to_vec();
                let mut lo = p.to_vec();
                hi[j] += h;
                lo[j] -= h;
                (profile.value(lambda, &hi) - profile.value(lambda, &lo)) / (2.0 * h)
            })
            .collect()
    }

    #[test]
    fn gaussian_peaks_at_centroid() {
        let g = Profile::Gaussian { window: None };
        let p = [10.0, 195.0, 0.05];
        assert!((g.value(195.0, &p) - 10.0).abs() < 1e-12);
        // one sigma away: exp(-1/2)
        let v = g.value(195.05, &p);
        assert!((v - 10.0 * (-0.5f64).exp()).abs() < 1e-9);
    }

    #[test]
    fn analytic_derivatives_match_finite_differences() {
        let cases = [
            (Profile::Gaussian { window: None }, vec![10.0, 195.0, 0.05], 195.03),
            (Profile::Polynomial { degree: 2, reference: 195.0 }, vec![2.0, -0.5, 0.3], 195.4),
        ];
        for (profile, p, lambda) in cases {
            let mut analytic = vec![0.0; p.len()];
            profile.derivatives(lambda, &p, &mut analytic);
            let numeric = numeric_derivatives(&profile, lambda, &p);
            for (a, n) in analytic.iter().zip(numeric.iter()) {
                assert!((a - n).abs() < 1e-5 * (1.0 + n.abs()), "{a} vs {n}");
            }
        }
    }

    #[test]
    fn zero_width_gaussian_is_flat_zero() {
        let g = Profile::Gaussian { window: None };
        let p = [10.0, 195.0, 0.0];
        assert_eq!(g.value(195.0, &p), 0.0);
        let mut d = [1.0; 3];
        g.derivatives(195.0, &p, &mut d);
        assert_eq!(d, [0.0; 3]);
    }

    #[test]
    fn fwhm_and_integral() {
        assert!((gaussian_fwhm(1.0) - 2.354_820_045).abs() < 1e-8);
        assert!((gaussian_integral(1.0, 1.0) - 2.506_628_275).abs() < 1e-8);
    }
}
