//! Initial parameter estimates from one spectrum.
//!
//! Policy per component kind:
//!
//! - background: median of usable samples outside every Gaussian window,
//!   falling back to the mean of the first and last usable samples
//! - Gaussian peak: maximum usable intensity in the window minus background
//! - Gaussian centroid: wavelength of that maximum
//! - Gaussian width: see `WidthEstimate`
//! - polynomial: `c0` = background level, higher orders keep template values
//!
//! Estimation never fails. Anything that cannot be estimated (no usable
//! samples, empty window, non-finite result) keeps the template literal.
//! Estimates are clamped into bounds, then fixed values and ties are applied.

use std::cmp::Ordering;

use crate::domain::Spectrum;
use crate::math::median;
use crate::models::{CENTROID, PEAK, Profile, WIDTH};
use crate::template::Template;

/// Fraction of the Gaussian window width used as the default width guess.
pub const DEFAULT_WIDTH_FRACTION: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WidthEstimate {
    /// `fraction * window width`.
    Fraction(f64),
    /// The template's literal width.
    Template,
    /// Second moment of the background-subtracted window.
    Moment,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GuessOptions {
    pub width: WidthEstimate,
}

impl Default for GuessOptions {
    fn default() -> Self {
        Self {
            width: WidthEstimate::Fraction(DEFAULT_WIDTH_FRACTION),
        }
    }
}

/// Estimate a full initial parameter vector for `spectrum`.
///
/// Deterministic: the same inputs always give the same vector.
pub fn estimate_initial(spectrum: &Spectrum<'_>, template: &Template, options: &GuessOptions) -> Vec<f64> {
    let specs = template.params();
    let mut out: Vec<f64> = specs.iter().map(|p| p.value).collect();

    let usable: Vec<(f64, f64)> = spectrum.usable().collect();
    if usable.is_empty() {
        return finalize(template, out);
    }

    let n_comp = template.components().len();
    let windows: Vec<Option<(f64, f64)>> = (0..n_comp).map(|k| template.gaussian_window(k)).collect();
    let background = estimate_background(&usable, &windows);

    for (k, component) in template.components().iter().enumerate() {
        let base = template.component_range(k).start;
        match component.profile {
            Profile::Gaussian { .. } => {
                let Some((lo, hi)) = windows[k] else {
                    continue;
                };
                let in_window: Vec<(f64, f64)> = usable
                    .iter()
                    .copied()
                    .filter(|&(w, _)| w >= lo && w <= hi)
                    .collect();
                let Some((centroid, peak_y)) = first_maximum(&in_window) else {
                    continue;
                };

                out[base + PEAK] = peak_y - background;
                out[base + CENTROID] = centroid;
                out[base + WIDTH] = match options.width {
                    WidthEstimate::Fraction(f) => f * (hi - lo),
                    WidthEstimate::Template => specs[base + WIDTH].value,
                    WidthEstimate::Moment => {
                        moment_width(&in_window, background).unwrap_or(specs[base + WIDTH].value)
                    }
                };
            }
            Profile::Polynomial { .. } => {
                out[base] = background;
            }
        }
    }

    finalize(template, out)
}

/// Replace non-finite estimates, clamp into bounds, apply fixed values and ties.
fn finalize(template: &Template, mut out: Vec<f64>) -> Vec<f64> {
    for (v, spec) in out.iter_mut().zip(template.params()) {
        if !v.is_finite() {
            *v = spec.value;
        }
        *v = spec.clamp(*v);
    }
    template.constraints().apply(&mut out);
    out
}

fn estimate_background(usable: &[(f64, f64)], windows: &[Option<(f64, f64)>]) -> f64 {
    let outside = usable
        .iter()
        .filter(|&&(w, _)| {
            windows
                .iter()
                .flatten()
                .all(|&(lo, hi)| w < lo || w > hi)
        })
        .map(|&(_, y)| y);

    if let Some(m) = median(outside) {
        return m;
    }

    // Every sample is inside some line window: use the spectrum edges.
    let first = usable[0].1;
    let last = usable[usable.len() - 1].1;
    0.5 * (first + last)
}

/// First sample holding the maximum intensity.
fn first_maximum(samples: &[(f64, f64)]) -> Option<(f64, f64)> {
    samples.iter().copied().fold(None, |best, s| match best {
        Some(b) if s.1.partial_cmp(&b.1) != Some(Ordering::Greater) => Some(b),
        _ => Some(s),
    })
}

fn moment_width(samples: &[(f64, f64)], background: f64) -> Option<f64> {
    let mut sw = 0.0;
    let mut swl = 0.0;
    for &(w, y) in samples {
        let wt = (y - background).max(0.0);
        sw += wt;
        swl += wt * w;
    }
    if sw <= 0.0 {
        return None;
    }
    let mean = swl / sw;
    let var = samples
        .iter()
        .map(|&(w, y)| (y - background).max(0.0) * (w - mean) * (w - mean))
        .sum::<f64>()
        / sw;
    (var > 0.0).then(|| var.sqrt())
}
