//! `cube-fit` library crate.
//!
//! Template-driven Levenberg-Marquardt line fitting for spectral cubes. The
//! binary (`cubefit`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - the fitting engine is reusable from other front-ends
//!
//! Entry points: build a `template::Template`, wrap the data in a
//! `domain::CubeView`, call `fit::fit_cube`, read maps off the `fit::FitResult`.

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod logging;
pub mod math;
pub mod models;
pub mod plot;
pub mod report;
pub mod template;
