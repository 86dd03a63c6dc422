//! In-memory spectral cube.
//!
//! Samples are stored flattened as `[y][x][wavelength]`, so one pixel's
//! spectrum is a contiguous slice.

use crate::domain::{CubeView, PixelMask, Spectrum};
use crate::error::FitError;

#[derive(Debug, Clone)]
pub struct SpectralCube {
    nx: usize,
    ny: usize,
    wavelength: Vec<f64>,
    intensity: Vec<f64>,
    uncertainty: Vec<f64>,
    mask: Option<PixelMask>,
}

impl SpectralCube {
    pub fn new(
        nx: usize,
        ny: usize,
        wavelength: Vec<f64>,
        intensity: Vec<f64>,
        uncertainty: Vec<f64>,
    ) -> Result<Self, FitError> {
        if nx == 0 || ny == 0 {
            return Err(FitError::format("cube", format!("empty spatial shape {nx}x{ny}")));
        }
        check_wavelength_axis(&wavelength)?;

        let expected = nx * ny * wavelength.len();
        if intensity.len() != expected {
            return Err(FitError::dimension("cube intensity", expected, intensity.len()));
        }
        if uncertainty.len() != expected {
            return Err(FitError::dimension("cube uncertainty", expected, uncertainty.len()));
        }

        Ok(Self {
            nx,
            ny,
            wavelength,
            intensity,
            uncertainty,
            mask: None,
        })
    }

    /// Attach a pixel mask shipped with the cube.
    pub fn with_mask(mut self, mask: PixelMask) -> Result<Self, FitError> {
        let (mx, my) = mask.shape();
        if mx != self.nx || my != self.ny {
            return Err(FitError::dimension("pixel mask", self.nx * self.ny, mx * my));
        }
        self.mask = Some(mask);
        Ok(self)
    }

    pub fn mask(&self) -> Option<&PixelMask> {
        self.mask.as_ref()
    }

    pub fn n_wave(&self) -> usize {
        self.wavelength.len()
    }

    pub fn intensity(&self) -> &[f64] {
        &self.intensity
    }

    pub fn uncertainty(&self) -> &[f64] {
        &self.uncertainty
    }

    fn range(&self, x: usize, y: usize) -> std::ops::Range<usize> {
        let nw = self.wavelength.len();
        let start = (y * self.nx + x) * nw;
        start..start + nw
    }
}

impl CubeView for SpectralCube {
    fn shape(&self) -> (usize, usize) {
        (self.nx, self.ny)
    }

    fn wavelength(&self) -> &[f64] {
        &self.wavelength
    }

    fn spectrum_at(&self, x: usize, y: usize) -> Spectrum<'_> {
        let r = self.range(x, y);
        Spectrum::new(
            &self.wavelength,
            &self.intensity[r.clone()],
            &self.uncertainty[r],
        )
    }
}

/// The wavelength axis must be non-empty, finite and strictly increasing.
pub fn check_wavelength_axis(wavelength: &[f64]) -> Result<(), FitError> {
    if wavelength.is_empty() {
        return Err(FitError::format("wavelength axis", "no samples"));
    }
    if wavelength.iter().any(|w| !w.is_finite()) {
        return Err(FitError::format("wavelength axis", "non-finite value"));
    }
    if wavelength.windows(2).any(|w| w[1] <= w[0]) {
        return Err(FitError::format("wavelength axis", "not strictly increasing"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spectrum_at_slices_the_right_pixel() {
        let w = vec![1.0, 2.0];
        // 2x2 pixels, value encodes (x, y, k)
        let mut data = Vec::new();
        for y in 0..2 {
            for x in 0..2 {
                for k in 0..2 {
                    data.push((100 * y + 10 * x + k) as f64);
                }
            }
        }
        let cube = SpectralCube::new(2, 2, w, data, vec![1.0; 8]).unwrap();
        let s = cube.spectrum_at(1, 1);
        assert_eq!(s.intensity, &[110.0, 111.0]);
        let s = cube.spectrum_at(1, 0);
        assert_eq!(s.intensity, &[10.0, 11.0]);
    }

    #[test]
    fn rejects_bad_shapes() {
        let err = SpectralCube::new(2, 2, vec![1.0, 2.0], vec![0.0; 7], vec![1.0; 8]).unwrap_err();
        assert!(matches!(err, FitError::DimensionMismatch { expected: 8, found: 7, .. }));

        assert!(SpectralCube::new(1, 1, vec![2.0, 1.0], vec![0.0; 2], vec![1.0; 2]).is_err());
    }
}
