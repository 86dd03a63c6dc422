//! Analytic profile models.
//!
//! Models are implemented as small, pure functions so that fitting code can
//! stay generic over the component kind.

pub mod component;

pub use component::*;
