//! Shared domain types.
//!
//! These are the value objects that cross module boundaries:
//!
//! - input: `Spectrum` views over a `CubeView`, plus an optional `PixelMask`
//! - per-pixel output: `FitParameters`, `PixelFitOutcome`, `StatusCode`
//! - run configuration: `FitConfig`

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::FitError;
use crate::fit::{GuessOptions, SolverOptions};

/// One pixel's spectrum: a borrowed view, never mutated by the engine.
///
/// A sample is *usable* when its intensity and uncertainty are finite and the
/// uncertainty is strictly positive. Unusable samples (missing data, saturated
/// pixels flagged with a negative error, ...) are ignored by the fit.
#[derive(Debug, Clone, Copy)]
pub struct Spectrum<'a> {
    pub wavelength: &'a [f64],
    pub intensity: &'a [f64],
    pub uncertainty: &'a [f64],
}

impl<'a> Spectrum<'a> {
    pub fn new(wavelength: &'a [f64], intensity: &'a [f64], uncertainty: &'a [f64]) -> Self {
        Self {
            wavelength,
            intensity,
            uncertainty,
        }
    }

    pub fn len(&self) -> usize {
        self.intensity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intensity.is_empty()
    }

    #[inline]
    pub fn is_usable(&self, i: usize) -> bool {
        let y = self.intensity[i];
        let s = self.uncertainty[i];
        y.is_finite() && s.is_finite() && s > 0.0
    }

    pub fn usable_count(&self) -> usize {
        (0..self.len()).filter(|&i| self.is_usable(i)).count()
    }

    /// Iterate `(wavelength, intensity)` over usable samples only.
    pub fn usable(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        (0..self.len())
            .filter(|&i| self.is_usable(i))
            .map(|i| (self.wavelength[i], self.intensity[i]))
    }

    /// Check the sample arrays agree with the wavelength axis.
    pub fn check_shape(&self) -> Result<(), FitError> {
        let n = self.wavelength.len();
        if self.intensity.len() != n {
            return Err(FitError::dimension("spectrum intensity", n, self.intensity.len()));
        }
        if self.uncertainty.len() != n {
            return Err(FitError::dimension("spectrum uncertainty", n, self.uncertainty.len()));
        }
        Ok(())
    }
}

/// Read-only access to a spectral cube, as supplied by a cube reader.
///
/// Pixel coordinates are `(x, y)` with `x < nx`, `y < ny`.
pub trait CubeView: Sync {
    /// `(nx, ny)`.
    fn shape(&self) -> (usize, usize);

    /// Wavelength axis shared by every pixel (strictly increasing).
    fn wavelength(&self) -> &[f64];

    fn spectrum_at(&self, x: usize, y: usize) -> Spectrum<'_>;
}

/// Per-pixel boolean mask; `true` means "do not fit this pixel".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelMask {
    nx: usize,
    ny: usize,
    masked: Vec<bool>,
}

impl PixelMask {
    /// A mask with every pixel enabled.
    pub fn none(nx: usize, ny: usize) -> Self {
        Self {
            nx,
            ny,
            masked: vec![false; nx * ny],
        }
    }

    /// A mask with every pixel excluded.
    pub fn all(nx: usize, ny: usize) -> Self {
        Self {
            nx,
            ny,
            masked: vec![true; nx * ny],
        }
    }

    /// Build from a row-major (`y` outer, `x` inner) flag vector.
    pub fn from_flags(nx: usize, ny: usize, masked: Vec<bool>) -> Result<Self, FitError> {
        if masked.len() != nx * ny {
            return Err(FitError::dimension("pixel mask", nx * ny, masked.len()));
        }
        Ok(Self { nx, ny, masked })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.nx, self.ny)
    }

    pub fn is_masked(&self, x: usize, y: usize) -> bool {
        self.masked[y * self.nx + x]
    }

    pub fn set(&mut self, x: usize, y: usize, masked: bool) {
        self.masked[y * self.nx + x] = masked;
    }

    pub fn masked_count(&self) -> usize {
        self.masked.iter().filter(|m| **m).count()
    }

    pub fn flags(&self) -> &[bool] {
        &self.masked
    }
}

/// Per-pixel outcome of a fit.
///
/// Only `Converged` (and, by policy, a single saturated bound) means the
/// parameters can be trusted without further inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    Converged,
    MaxIterationsReached,
    SingularJacobian,
    /// More than one free parameter ended exactly on a bound.
    BoundsViolated,
    /// The pixel was masked (or had no usable samples); the solver never ran.
    InputMasked,
    /// The run was cancelled before this pixel was reached.
    NotFitted,
}

impl StatusCode {
    pub const ALL: [StatusCode; 6] = [
        StatusCode::Converged,
        StatusCode::MaxIterationsReached,
        StatusCode::SingularJacobian,
        StatusCode::BoundsViolated,
        StatusCode::InputMasked,
        StatusCode::NotFitted,
    ];

    pub fn label(self) -> &'static str {
        match self {
            StatusCode::Converged => "converged",
            StatusCode::MaxIterationsReached => "max_iterations",
            StatusCode::SingularJacobian => "singular_jacobian",
            StatusCode::BoundsViolated => "bounds_violated",
            StatusCode::InputMasked => "input_masked",
            StatusCode::NotFitted => "not_fitted",
        }
    }

    /// Small integer code, stable across releases (used in CSV exports).
    pub fn code(self) -> u8 {
        match self {
            StatusCode::Converged => 0,
            StatusCode::MaxIterationsReached => 1,
            StatusCode::SingularJacobian => 2,
            StatusCode::BoundsViolated => 3,
            StatusCode::InputMasked => 4,
            StatusCode::NotFitted => 5,
        }
    }

    pub fn is_converged(self) -> bool {
        self == StatusCode::Converged
    }
}

/// Fitted parameter vector plus its 1-sigma uncertainties.
#[derive(Debug, Clone, PartialEq)]
pub struct FitParameters {
    pub values: Vec<f64>,
    pub uncertainties: Vec<f64>,
}

impl FitParameters {
    pub fn nan(n: usize) -> Self {
        Self {
            values: vec![f64::NAN; n],
            uncertainties: vec![f64::NAN; n],
        }
    }
}

/// Result of one solver invocation on one pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelFitOutcome {
    pub params: FitParameters,
    pub chi2: f64,
    /// Usable samples minus free parameters (saturating at zero).
    pub dof: usize,
    pub iterations: usize,
    /// Free parameters sitting exactly on a finite bound at the end of the fit.
    pub n_at_bound: usize,
    pub status: StatusCode,
}

impl PixelFitOutcome {
    /// Outcome recorded for pixels the solver never touched.
    pub fn skipped(n_params: usize, status: StatusCode) -> Self {
        Self {
            params: FitParameters::nan(n_params),
            chi2: f64::NAN,
            dof: 0,
            iterations: 0,
            n_at_bound: 0,
            status,
        }
    }

    pub fn masked(n_params: usize) -> Self {
        Self::skipped(n_params, StatusCode::InputMasked)
    }

    pub fn reduced_chi2(&self) -> f64 {
        if self.dof == 0 {
            f64::NAN
        } else {
            self.chi2 / self.dof as f64
        }
    }
}

/// A full `cubefit fit` run's configuration as understood by the pipeline.
///
/// This is derived from CLI flags (plus defaults).
#[derive(Debug, Clone)]
pub struct FitConfig {
    pub cube_path: PathBuf,
    pub template_path: PathBuf,
    pub output: Option<PathBuf>,
    pub export_dir: Option<PathBuf>,

    /// Worker threads (0 = one per core).
    pub jobs: usize,
    pub solver: SolverOptions,
    pub guess: GuessOptions,

    pub summary: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unusable_samples_are_skipped() {
        let w = [1.0, 2.0, 3.0, 4.0];
        let y = [1.0, f64::NAN, 3.0, 4.0];
        let s = [1.0, 1.0, 0.0, -1.0];
        let spec = Spectrum::new(&w, &y, &s);
        assert_eq!(spec.usable_count(), 1);
        assert_eq!(spec.usable().collect::<Vec<_>>(), vec![(1.0, 1.0)]);
    }

    #[test]
    fn mask_from_flags_checks_length() {
        assert!(PixelMask::from_flags(2, 2, vec![false; 3]).is_err());
        let mut m = PixelMask::none(3, 2);
        m.set(2, 1, true);
        assert!(m.is_masked(2, 1));
        assert!(!m.is_masked(1, 1));
        assert_eq!(m.masked_count(), 1);
    }

    #[test]
    fn reduced_chi2_is_nan_without_dof() {
        let o = PixelFitOutcome::masked(3);
        assert!(o.reduced_chi2().is_nan());
        assert_eq!(o.status, StatusCode::InputMasked);
    }
}
