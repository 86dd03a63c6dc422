//! Reporting utilities: per-parameter summaries and formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the fitting code stays clean and testable
//! - output changes are localized

pub mod format;

pub use format::*;

use crate::fit::FitResult;
use crate::math::{finite_range, median};

/// Distribution of one fitted parameter over the converged pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSummary {
    pub name: String,
    pub n: usize,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub median_uncertainty: f64,
}

/// Summarize every parameter over converged pixels (NaN when there are none).
pub fn summarize_parameters(result: &FitResult) -> Vec<ParamSummary> {
    let converged: Vec<bool> = result.status_map().iter().map(|s| s.is_converged()).collect();
    result
        .param_names()
        .iter()
        .enumerate()
        .map(|(j, name)| {
            let values: Vec<f64> = pick(result.parameter_plane(j).unwrap_or(&[]), &converged);
            let errors: Vec<f64> = pick(result.uncertainty_plane(j).unwrap_or(&[]), &converged);
            let (min, max) = finite_range(&values).unwrap_or((f64::NAN, f64::NAN));
            ParamSummary {
                name: name.clone(),
                n: values.iter().filter(|v| v.is_finite()).count(),
                median: median(values.iter().copied()).unwrap_or(f64::NAN),
                min,
                max,
                median_uncertainty: median(errors).unwrap_or(f64::NAN),
            }
        })
        .collect()
}

fn pick(plane: &[f64], keep: &[bool]) -> Vec<f64> {
    plane
        .iter()
        .zip(keep)
        .filter(|&(_, &k)| k)
        .map(|(&v, _)| v)
        .collect()
}
