//! Mathematical utilities: normal-equation linear algebra and robust statistics.

pub mod linalg;
pub mod stats;

pub use linalg::*;
pub use stats::*;
