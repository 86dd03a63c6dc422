//! Fit result JSON files (save / load).
//!
//! Arrays keep the in-memory layout: parameter planes concatenated, each in
//! `[y][x]` order. Non-finite numbers are written as `null`.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::StatusCode;
use crate::error::FitError;
use crate::fit::{ComponentSummary, FitResult};
use crate::io::{nan_to_none, none_to_nan, read_json, write_json};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultFile {
    pub tool: String,
    pub template: String,
    pub created_at: DateTime<Utc>,
    pub nx: usize,
    pub ny: usize,
    pub param_names: Vec<String>,
    pub components: Vec<ComponentSummary>,
    pub values: Vec<Option<f64>>,
    pub uncertainties: Vec<Option<f64>>,
    pub chi2: Vec<Option<f64>>,
    pub dof: Vec<usize>,
    pub iterations: Vec<usize>,
    pub n_at_bound: Vec<usize>,
    pub status: Vec<StatusCode>,
}

impl ResultFile {
    pub fn from_result(result: &FitResult) -> Self {
        Self {
            tool: "cubefit".to_string(),
            template: result.template_name.clone(),
            created_at: result.created_at,
            nx: result.nx,
            ny: result.ny,
            param_names: result.param_names.clone(),
            components: result.components.clone(),
            values: nan_to_none(&result.values),
            uncertainties: nan_to_none(&result.uncertainties),
            chi2: nan_to_none(&result.chi2),
            dof: result.dof.clone(),
            iterations: result.iterations.clone(),
            n_at_bound: result.n_at_bound.clone(),
            status: result.status.clone(),
        }
    }

    pub fn into_result(self) -> Result<FitResult, FitError> {
        let n_pix = self.nx * self.ny;
        let n_values = n_pix * self.param_names.len();
        check_len("values", n_values, self.values.len())?;
        check_len("uncertainties", n_values, self.uncertainties.len())?;
        check_len("chi2", n_pix, self.chi2.len())?;
        check_len("dof", n_pix, self.dof.len())?;
        check_len("iterations", n_pix, self.iterations.len())?;
        check_len("n_at_bound", n_pix, self.n_at_bound.len())?;
        check_len("status", n_pix, self.status.len())?;

        Ok(FitResult {
            template_name: self.template,
            nx: self.nx,
            ny: self.ny,
            param_names: self.param_names,
            components: self.components,
            values: none_to_nan(self.values),
            uncertainties: none_to_nan(self.uncertainties),
            chi2: none_to_nan(self.chi2),
            dof: self.dof,
            iterations: self.iterations,
            n_at_bound: self.n_at_bound,
            status: self.status,
            created_at: self.created_at,
        })
    }
}

fn check_len(what: &str, expected: usize, found: usize) -> Result<(), FitError> {
    if expected != found {
        return Err(FitError::dimension(format!("result {what}"), expected, found));
    }
    Ok(())
}

pub fn save_fit(path: &Path, result: &FitResult) -> Result<(), FitError> {
    write_json(path, "result JSON", &ResultFile::from_result(result))?;
    info!(path = %path.display(), "fit result saved");
    Ok(())
}

pub fn load_fit(path: &Path) -> Result<FitResult, FitError> {
    let file: ResultFile = read_json(path, "result JSON")?;
    file.into_result()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FitParameters, PixelFitOutcome};
    use crate::template::TemplateBuilder;

    fn sample_result() -> FitResult {
        let t = TemplateBuilder::new("t")
            .gaussian("line", None, 1.0, 195.0, 0.05)
            .build()
            .unwrap();
        let ok = PixelFitOutcome {
            params: FitParameters {
                values: vec![3.0, 195.01, 0.04],
                uncertainties: vec![0.1, f64::NAN, 0.01],
            },
            chi2: 12.5,
            dof: 10,
            iterations: 7,
            n_at_bound: 1,
            status: StatusCode::Converged,
        };
        FitResult::from_outcomes(&t, 2, 1, &[ok, PixelFitOutcome::masked(3)])
    }

    #[test]
    fn survives_json_round_trip() {
        let r = sample_result();
        let json = serde_json::to_string(&ResultFile::from_result(&r)).unwrap();
        let back = serde_json::from_str::<ResultFile>(&json).unwrap().into_result().unwrap();

        assert_eq!(back.shape(), (2, 1));
        assert_eq!(back.created_at(), r.created_at());
        assert_eq!(back.status_map(), r.status_map());
        assert_eq!(back.components(), r.components());
        let o = back.outcome(0, 0).unwrap();
        assert_eq!(o.params.values, vec![3.0, 195.01, 0.04]);
        assert!(o.params.uncertainties[1].is_nan());
        assert_eq!((o.chi2, o.dof, o.iterations, o.n_at_bound), (12.5, 10, 7, 1));
        assert!(back.chi2_map().get(1, 0).is_nan());
    }

    #[test]
    fn rejects_truncated_arrays() {
        let mut f = ResultFile::from_result(&sample_result());
        f.status.pop();
        assert!(matches!(f.into_result(), Err(FitError::DimensionMismatch { .. })));
    }
}
