//! Synthetic cube generation from a template.
//!
//! Every pixel gets its own "true" parameter vector (template literals
//! perturbed by Gaussian jitter), the model is evaluated on a regular
//! wavelength axis and Gaussian noise with a constant sigma is added.
//! Generation is fully determined by the seed.

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;
use tracing::debug;

use crate::domain::{PixelMask, SpectralCube};
use crate::error::FitError;
use crate::models::{CENTROID, PEAK, Profile, WIDTH};
use crate::template::Template;

/// Padding added on each side of the line windows when no axis range is given,
/// as a fraction of the covered span.
const AXIS_PADDING: f64 = 0.25;

#[derive(Debug, Clone)]
pub struct SynthOptions {
    pub nx: usize,
    pub ny: usize,
    pub n_wave: usize,
    /// Wavelength range; derived from the Gaussian windows when `None`.
    pub wave_range: Option<(f64, f64)>,
    /// Noise standard deviation (also written as the per-sample uncertainty).
    pub noise: f64,
    /// Relative jitter of the true parameters between pixels.
    pub variation: f64,
    /// Probability that a pixel is flagged in the cube mask.
    pub masked_fraction: f64,
    /// Probability that a single sample is replaced by a missing value.
    pub missing_fraction: f64,
    pub seed: u64,
}

impl Default for SynthOptions {
    fn default() -> Self {
        Self {
            nx: 16,
            ny: 16,
            n_wave: 48,
            wave_range: None,
            noise: 0.2,
            variation: 0.1,
            masked_fraction: 0.0,
            missing_fraction: 0.0,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyntheticCube {
    pub cube: SpectralCube,
    /// True full parameter vector per pixel, `[y][x]` order.
    pub truth: Vec<Vec<f64>>,
}

impl SyntheticCube {
    pub fn truth_at(&self, x: usize, y: usize) -> &[f64] {
        let (nx, _) = crate::domain::CubeView::shape(&self.cube);
        &self.truth[y * nx + x]
    }
}

pub fn generate_cube(template: &Template, options: &SynthOptions) -> Result<SyntheticCube, FitError> {
    if options.nx == 0 || options.ny == 0 {
        return Err(FitError::InvalidConfig("synthetic cube needs nx, ny > 0".into()));
    }
    if options.n_wave < 2 {
        return Err(FitError::InvalidConfig("synthetic cube needs at least 2 wavelengths".into()));
    }
    if !(options.noise.is_finite() && options.noise > 0.0) {
        return Err(FitError::InvalidConfig(format!("noise must be > 0, got {}", options.noise)));
    }
    if !(options.variation.is_finite() && options.variation >= 0.0) {
        return Err(FitError::InvalidConfig(format!(
            "variation must be >= 0, got {}",
            options.variation
        )));
    }
    for (name, p) in [
        ("masked fraction", options.masked_fraction),
        ("missing fraction", options.missing_fraction),
    ] {
        if !(0.0..=1.0).contains(&p) {
            return Err(FitError::InvalidConfig(format!("{name} must be in [0, 1], got {p}")));
        }
    }

    let (w0, w1) = match options.wave_range {
        Some(r) => r,
        None => default_range(template)?,
    };
    if !(w0.is_finite() && w1.is_finite() && w1 > w0) {
        return Err(FitError::InvalidConfig(format!("invalid wavelength range [{w0}, {w1}]")));
    }
    let step = (w1 - w0) / (options.n_wave - 1) as f64;
    let wavelength: Vec<f64> = (0..options.n_wave).map(|i| w0 + step * i as f64).collect();

    let mut rng = StdRng::seed_from_u64(options.seed);
    let unit = Normal::new(0.0, 1.0).map_err(|e| FitError::InvalidConfig(format!("noise distribution: {e}")))?;

    let n_pix = options.nx * options.ny;
    let mut truth = Vec::with_capacity(n_pix);
    let mut intensity = Vec::with_capacity(n_pix * options.n_wave);
    let mut uncertainty = Vec::with_capacity(n_pix * options.n_wave);
    let mut masked = Vec::with_capacity(n_pix);

    for _ in 0..n_pix {
        let p = jitter(template, options.variation, &mut rng, &unit);
        for &w in &wavelength {
            if rng.gen_bool(options.missing_fraction) {
                intensity.push(f64::NAN);
            } else {
                intensity.push(template.evaluate(w, &p) + options.noise * unit.sample(&mut rng));
            }
            uncertainty.push(options.noise);
        }
        masked.push(rng.gen_bool(options.masked_fraction));
        truth.push(p);
    }

    let mut cube = SpectralCube::new(options.nx, options.ny, wavelength, intensity, uncertainty)?;
    if masked.iter().any(|&m| m) {
        cube = cube.with_mask(PixelMask::from_flags(options.nx, options.ny, masked)?)?;
    }
    debug!(
        nx = options.nx,
        ny = options.ny,
        n_wave = options.n_wave,
        seed = options.seed,
        "synthetic cube generated"
    );

    Ok(SyntheticCube { cube, truth })
}

/// Template literals with per-pixel jitter, clamped into bounds and with
/// fixed values and ties applied.
fn jitter(template: &Template, variation: f64, rng: &mut StdRng, unit: &Normal<f64>) -> Vec<f64> {
    let mut p: Vec<f64> = template.params().iter().map(|s| s.value).collect();
    for (k, c) in template.components().iter().enumerate() {
        let base = template.component_range(k).start;
        match c.profile {
            Profile::Gaussian { .. } => {
                let width = p[base + WIDTH].abs();
                p[base + PEAK] *= 1.0 + variation * unit.sample(rng);
                p[base + CENTROID] += variation * width * unit.sample(rng);
                p[base + WIDTH] *= 1.0 + 0.5 * variation * unit.sample(rng);
            }
            Profile::Polynomial { .. } => {
                for j in template.component_range(k) {
                    p[j] *= 1.0 + variation * unit.sample(rng);
                }
            }
        }
    }
    for (v, spec) in p.iter_mut().zip(template.params()) {
        *v = spec.clamp(*v);
    }
    template.expand(&p)
}

fn default_range(template: &Template) -> Result<(f64, f64), FitError> {
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for k in 0..template.components().len() {
        if let Some((a, b)) = template.gaussian_window(k) {
            lo = lo.min(a);
            hi = hi.max(b);
        }
    }
    if !(lo.is_finite() && hi.is_finite() && hi > lo) {
        return Err(FitError::InvalidConfig(
            "template has no line windows; give an explicit wavelength range".into(),
        ));
    }
    let pad = AXIS_PADDING * (hi - lo);
    Ok((lo - pad, hi + pad))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CubeView;
    use crate::template::TemplateBuilder;

    fn template() -> Template {
        TemplateBuilder::new("t")
            .gaussian("line", None, 10.0, 195.0, 0.05)
            .polynomial("bg", 195.0, &[2.0])
            .build()
            .unwrap()
    }

    #[test]
    fn same_seed_same_cube() {
        let opts = SynthOptions {
            nx: 3,
            ny: 2,
            ..SynthOptions::default()
        };
        let a = generate_cube(&template(), &opts).unwrap();
        let b = generate_cube(&template(), &opts).unwrap();
        assert_eq!(a.truth, b.truth);
        assert_eq!(a.cube.intensity(), b.cube.intensity());

        let c = generate_cube(&template(), &SynthOptions { seed: 7, ..opts }).unwrap();
        assert_ne!(a.cube.intensity(), c.cube.intensity());
    }

    #[test]
    fn axis_covers_line_window() {
        let s = generate_cube(&template(), &SynthOptions::default()).unwrap();
        let w = s.cube.wavelength();
        assert_eq!(w.len(), 48);
        // window 195 ± 0.25 padded by a quarter of its span
        assert!((w[0] - 194.625).abs() < 1e-9);
        assert!((w[47] - 195.375).abs() < 1e-9);
        assert!(s.cube.mask().is_none());
    }

    #[test]
    fn truth_respects_bounds_and_ties() {
        let t = TemplateBuilder::new("t")
            .gaussian("a", None, 10.0, 195.0, 0.05)
            .gaussian("b", None, 4.0, 195.3, 0.05)
            .bounds("a.peak", 9.0, 11.0)
            .tie("b.width", "a.width", 1.0, 0.0)
            .build()
            .unwrap();
        let opts = SynthOptions {
            nx: 5,
            ny: 5,
            variation: 0.5,
            ..SynthOptions::default()
        };
        let s = generate_cube(&t, &opts).unwrap();
        for p in &s.truth {
            assert!((9.0..=11.0).contains(&p[0]));
            assert_eq!(p[5], p[2]);
        }
    }

    #[test]
    fn masks_and_missing_samples() {
        let opts = SynthOptions {
            nx: 4,
            ny: 4,
            masked_fraction: 1.0,
            missing_fraction: 1.0,
            ..SynthOptions::default()
        };
        let s = generate_cube(&template(), &opts).unwrap();
        assert_eq!(s.cube.mask().unwrap().masked_count(), 16);
        assert_eq!(s.cube.spectrum_at(2, 3).usable_count(), 0);
    }

    #[test]
    fn rejects_bad_options() {
        let bad = SynthOptions {
            noise: 0.0,
            ..SynthOptions::default()
        };
        assert!(generate_cube(&template(), &bad).is_err());

        let only_background = TemplateBuilder::new("bg")
            .polynomial("bg", 0.0, &[1.0])
            .build()
            .unwrap();
        assert!(generate_cube(&only_background, &SynthOptions::default()).is_err());
    }
}
