//! The fitting engine.
//!
//! Responsibilities:
//!
//! - estimate an initial parameter vector per spectrum
//! - minimize chi2 per pixel with bounded, tied Levenberg-Marquardt
//! - run every pixel of a cube in parallel and collect a `FitResult`

pub mod guess;
pub mod orchestrator;
pub mod result;
pub mod solver;

pub use guess::*;
pub use orchestrator::*;
pub use result::*;
pub use solver::*;
