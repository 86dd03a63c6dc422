//! Cube JSON files.
//!
//! Flattened `[y][x][wavelength]` arrays; `null` marks a missing sample.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{CubeView, PixelMask, SpectralCube};
use crate::error::FitError;
use crate::io::{nan_to_none, none_to_nan, read_json, write_json};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CubeFile {
    pub nx: usize,
    pub ny: usize,
    pub wavelength: Vec<f64>,
    pub intensity: Vec<Option<f64>>,
    pub uncertainty: Vec<Option<f64>>,
    /// `true` = masked, `[y][x]` order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<Vec<bool>>,
}

impl CubeFile {
    pub fn into_cube(self) -> Result<SpectralCube, FitError> {
        let cube = SpectralCube::new(
            self.nx,
            self.ny,
            self.wavelength,
            none_to_nan(self.intensity),
            none_to_nan(self.uncertainty),
        )?;
        match self.mask {
            Some(flags) => cube.with_mask(PixelMask::from_flags(self.nx, self.ny, flags)?),
            None => Ok(cube),
        }
    }

    pub fn from_cube(cube: &SpectralCube) -> Self {
        let (nx, ny) = cube.shape();
        Self {
            nx,
            ny,
            wavelength: cube.wavelength().to_vec(),
            intensity: nan_to_none(cube.intensity()),
            uncertainty: nan_to_none(cube.uncertainty()),
            mask: cube.mask().map(|m| m.flags().to_vec()),
        }
    }
}

pub fn read_cube(path: &Path) -> Result<SpectralCube, FitError> {
    let file: CubeFile = read_json(path, "cube JSON")?;
    let cube = file.into_cube()?;
    let (nx, ny) = cube.shape();
    debug!(path = %path.display(), nx, ny, n_wave = cube.n_wave(), "cube loaded");
    Ok(cube)
}

pub fn write_cube(path: &Path, cube: &SpectralCube) -> Result<(), FitError> {
    write_json(path, "cube JSON", &CubeFile::from_cube(cube))
}
