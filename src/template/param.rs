//! Per-parameter attributes.

use serde::{Deserialize, Serialize};

/// Linear tie: `p[self] = scale * p[target] + offset`.
///
/// `scale = 1, offset = 0` is the identity tie (e.g. two lines sharing a width).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tie {
    pub target: usize,
    pub scale: f64,
    pub offset: f64,
}

impl Tie {
    pub fn identity(target: usize) -> Self {
        Self {
            target,
            scale: 1.0,
            offset: 0.0,
        }
    }

    pub fn linear(target: usize, scale: f64, offset: f64) -> Self {
        Self {
            target,
            scale,
            offset,
        }
    }
}

/// Template attributes of one parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    /// Literal default; also the value used when the parameter is fixed.
    pub value: f64,
    pub lower: f64,
    pub upper: f64,
    pub fixed: bool,
    pub tie: Option<Tie>,
}

impl ParamSpec {
    /// Free, unbounded parameter.
    pub fn new(value: f64) -> Self {
        Self {
            value,
            lower: f64::NEG_INFINITY,
            upper: f64::INFINITY,
            fixed: false,
            tie: None,
        }
    }

    pub fn bounded(mut self, lower: f64, upper: f64) -> Self {
        self.lower = lower;
        self.upper = upper;
        self
    }

    pub fn fixed(mut self) -> Self {
        self.fixed = true;
        self
    }

    pub fn tied(mut self, tie: Tie) -> Self {
        self.tie = Some(tie);
        self
    }

    /// Clamp into `[lower, upper]`.
    #[inline]
    pub fn clamp(&self, v: f64) -> f64 {
        v.max(self.lower).min(self.upper)
    }
}
