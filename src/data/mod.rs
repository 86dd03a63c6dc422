//! Input data sources that are not files: synthetic cubes for demos and tests.

pub mod sample;

pub use sample::*;
