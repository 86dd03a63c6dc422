//! Domain types used throughout the engine.
//!
//! This module defines:
//!
//! - spectra, cube access and pixel masks (`Spectrum`, `CubeView`, `PixelMask`)
//! - the in-memory cube (`SpectralCube`)
//! - per-pixel fit outputs (`PixelFitOutcome`, `StatusCode`)
//! - the run configuration (`FitConfig`)

pub mod cube;
pub mod types;

pub use cube::*;
pub use types::*;
