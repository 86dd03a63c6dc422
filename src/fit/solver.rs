//! Levenberg-Marquardt nonlinear least squares with bounds and ties.
//!
//! Given a residual function `r(p)` (n residuals, P parameters) we minimize
//! `chi2 = Σ r_i²` over the *free* parameters only:
//!
//! - fixed parameters keep their template value
//! - tied parameters are recomputed from their root after every step, and
//!   their Jacobian column is folded into the root's column (chain rule)
//! - each proposed free component is clamped into its bounds, and a parameter
//!   pushed against its bound is held for that iteration (MPFIT's pegging)
//!
//! Each iteration solves the Marquardt-scaled system
//!
//! ```text
//! (A + λ diag(A)) δ = -g      A = JᵀJ, g = Jᵀr
//! ```
//!
//! and accepts the step when the actual chi2 reduction is a reasonable
//! fraction of the reduction predicted by the linearized model (trust-region
//! ratio). λ shrinks after an accepted step and grows after a rejected one.
//!
//! Numerical trouble is reported through `StatusCode`, never as an error:
//! a singular normal matrix (over the columns not held) returns the last valid parameters flagged
//! `SingularJacobian`.

use nalgebra::{DMatrix, DVector};

use crate::domain::{FitParameters, PixelFitOutcome, Spectrum, StatusCode};
use crate::error::FitError;
use crate::math::{invert_spd, is_singular, solve_damped};
use crate::template::{Constraints, ParamRole, SpectrumResiduals, Template};

const LAMBDA_MIN: f64 = 1e-12;
/// Damping this large means no step can reduce chi2 any further.
const LAMBDA_MAX: f64 = 1e16;
/// Minimum actual/predicted reduction ratio for accepting a step.
const ACCEPT_RATIO: f64 = 1e-4;

/// A least-squares problem as seen by the solver.
///
/// Parameter slices are always full-length (P) with fixed values and ties
/// already applied.
pub trait ResidualFunction {
    fn n_residuals(&self) -> usize;

    fn n_params(&self) -> usize;

    /// Residuals that actually constrain the fit (for degrees of freedom).
    fn n_effective(&self) -> usize {
        self.n_residuals()
    }

    fn residuals(&self, params: &[f64], out: &mut [f64]);

    /// `∂r_i/∂p_j` for all P parameters into an `n x P` matrix.
    fn jacobian(&self, params: &[f64], out: &mut DMatrix<f64>);
}

/// Solver tuning knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverOptions {
    pub max_iterations: usize,
    /// Relative chi2 decrease / relative step norm convergence threshold.
    pub tolerance: f64,
    pub initial_lambda: f64,
    /// Factor applied to λ after a rejected step.
    pub lambda_up: f64,
    /// Factor applied to λ after an accepted step.
    pub lambda_down: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            tolerance: 1e-10,
            initial_lambda: 1e-3,
            lambda_up: 10.0,
            lambda_down: 0.1,
        }
    }
}

impl SolverOptions {
    pub fn validate(&self) -> Result<(), FitError> {
        if self.max_iterations == 0 {
            return Err(FitError::InvalidConfig("max iterations must be >= 1".into()));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(FitError::InvalidConfig(format!(
                "tolerance must be finite and > 0 (got {})",
                self.tolerance
            )));
        }
        if !(self.initial_lambda.is_finite() && self.initial_lambda > 0.0) {
            return Err(FitError::InvalidConfig("initial lambda must be > 0".into()));
        }
        if !(self.lambda_up > 1.0 && self.lambda_down > 0.0 && self.lambda_down < 1.0) {
            return Err(FitError::InvalidConfig(
                "lambda factors must satisfy up > 1 and 0 < down < 1".into(),
            ));
        }
        Ok(())
    }
}

/// Scratch buffers owned by one worker and reused across pixels.
///
/// Every buffer is fully overwritten before it is read, so results never
/// depend on which pixels a worker handled before.
#[derive(Debug, Clone)]
pub struct SolverWorkspace {
    residuals: Vec<f64>,
    trial_residuals: Vec<f64>,
    params: Vec<f64>,
    trial: Vec<f64>,
    jacobian: DMatrix<f64>,
    free_jacobian: DMatrix<f64>,
}

impl Default for SolverWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

impl SolverWorkspace {
    pub fn new() -> Self {
        Self {
            residuals: Vec::new(),
            trial_residuals: Vec::new(),
            params: Vec::new(),
            trial: Vec::new(),
            jacobian: DMatrix::zeros(0, 0),
            free_jacobian: DMatrix::zeros(0, 0),
        }
    }

    fn prepare(&mut self, n: usize, p: usize, k: usize) {
        self.residuals.resize(n, 0.0);
        self.trial_residuals.resize(n, 0.0);
        self.params.resize(p, 0.0);
        self.trial.resize(p, 0.0);
        if self.jacobian.shape() != (n, p) {
            self.jacobian = DMatrix::zeros(n, p);
        }
        if self.free_jacobian.shape() != (n, k) {
            self.free_jacobian = DMatrix::zeros(n, k);
        }
    }
}

/// Minimize `Σ r(p)²` starting from `initial`.
pub fn solve<R: ResidualFunction + ?Sized>(
    f: &R,
    initial: &[f64],
    constraints: &Constraints,
    options: &SolverOptions,
    ws: &mut SolverWorkspace,
) -> PixelFitOutcome {
    let n = f.n_residuals();
    let p = constraints.len();
    debug_assert_eq!(initial.len(), p);
    debug_assert_eq!(f.n_params(), p);

    let free = constraints.free_indices();
    let k = free.len();
    ws.prepare(n, p, k);

    ws.params.copy_from_slice(initial);
    constraints.clamp_free(&mut ws.params);
    constraints.apply(&mut ws.params);

    f.residuals(&ws.params, &mut ws.residuals);
    let mut chi2 = sum_sq(&ws.residuals);
    let dof = f.n_effective().saturating_sub(k);

    if !chi2.is_finite() {
        return finish(f, constraints, ws, chi2, dof, 0, StatusCode::SingularJacobian);
    }
    if k == 0 {
        return finish(f, constraints, ws, chi2, dof, 0, StatusCode::Converged);
    }

    let tol = options.tolerance;
    let mut lambda = options.initial_lambda;
    let mut status = StatusCode::MaxIterationsReached;
    let mut iterations = 0;

    'outer: for iter in 1..=options.max_iterations {
        iterations = iter;

        f.jacobian(&ws.params, &mut ws.jacobian);
        constraints.fold_jacobian(&ws.jacobian, &mut ws.free_jacobian);
        let jt = ws.free_jacobian.transpose();
        let a = &jt * &ws.free_jacobian;
        let g = &jt * DVector::from_column_slice(&ws.residuals);

        let held = held_columns(&a, &g, free, constraints, &ws.params);
        let active: Vec<usize> = (0..k).filter(|&c| !held[c]).collect();
        if active.is_empty() {
            status = StatusCode::Converged;
            break;
        }
        let a_active = a.select_rows(&active).select_columns(&active);
        let g_active = g.select_rows(&active);
        if is_singular(&a_active) {
            status = StatusCode::SingularJacobian;
            break;
        }

        loop {
            let Some(delta) = solve_damped(&a_active, &g_active, lambda) else {
                lambda *= options.lambda_up;
                if lambda > LAMBDA_MAX {
                    status = StatusCode::Converged;
                    break 'outer;
                }
                continue;
            };

            ws.trial.copy_from_slice(&ws.params);
            for (&c, &d) in active.iter().zip(delta.iter()) {
                let i = free[c];
                ws.trial[i] = constraints.clamp(i, ws.params[i] + d);
            }
            constraints.apply(&mut ws.trial);

            // Clamping may shorten the step; judge what is actually taken.
            let step = DVector::from_iterator(k, free.iter().map(|&i| ws.trial[i] - ws.params[i]));
            let step_norm = step.norm();
            if step_norm == 0.0 {
                // Every proposed move is blocked by a bound.
                status = StatusCode::Converged;
                break 'outer;
            }

            f.residuals(&ws.trial, &mut ws.trial_residuals);
            let trial_chi2 = sum_sq(&ws.trial_residuals);

            let predicted = -(2.0 * step.dot(&g) + step.dot(&(&a * &step)));
            let actual = chi2 - trial_chi2;
            let rho = if predicted > 0.0 {
                actual / predicted
            } else if actual > 0.0 {
                1.0
            } else {
                -1.0
            };

            if trial_chi2.is_finite() && rho > ACCEPT_RATIO {
                let param_norm = free
                    .iter()
                    .map(|&i| ws.trial[i] * ws.trial[i])
                    .sum::<f64>()
                    .sqrt();
                let rel_drop = if chi2 > 0.0 { actual / chi2 } else { 0.0 };

                std::mem::swap(&mut ws.params, &mut ws.trial);
                std::mem::swap(&mut ws.residuals, &mut ws.trial_residuals);
                chi2 = trial_chi2;
                lambda = (lambda * options.lambda_down).max(LAMBDA_MIN);

                if chi2 == 0.0 || rel_drop < tol || step_norm <= tol * (param_norm + tol) {
                    status = StatusCode::Converged;
                    break 'outer;
                }
                break;
            }

            lambda *= options.lambda_up;
            if lambda > LAMBDA_MAX {
                status = StatusCode::Converged;
                break 'outer;
            }
        }
    }

    finish(f, constraints, ws, chi2, dof, iterations, status)
}

/// Free columns held for one iteration.
///
/// A parameter on a bound whose descent direction points outside it is
/// pegged. While anything is pegged, columns that vanish entirely are held
/// too: a line shape under an amplitude pinned at zero has no gradient.
fn held_columns(
    a: &DMatrix<f64>,
    g: &DVector<f64>,
    free: &[usize],
    constraints: &Constraints,
    params: &[f64],
) -> Vec<bool> {
    let (lower, upper) = (constraints.lower(), constraints.upper());
    let mut held: Vec<bool> = free
        .iter()
        .enumerate()
        .map(|(c, &i)| {
            // The descent direction is -g.
            let at_lower = lower[i].is_finite() && params[i] == lower[i] && g[c] > 0.0;
            let at_upper = upper[i].is_finite() && params[i] == upper[i] && g[c] < 0.0;
            at_lower || at_upper
        })
        .collect();
    if held.contains(&true) {
        for (c, h) in held.iter_mut().enumerate() {
            if a[(c, c)] == 0.0 {
                *h = true;
            }
        }
    }
    held
}

fn finish<R: ResidualFunction + ?Sized>(
    f: &R,
    constraints: &Constraints,
    ws: &mut SolverWorkspace,
    chi2: f64,
    dof: usize,
    iterations: usize,
    status: StatusCode,
) -> PixelFitOutcome {
    let n_at_bound = constraints.count_at_bound(&ws.params);
    // A single saturated parameter is common in physically valid fits
    // (e.g. a weak line pinned at zero peak); two or more is flagged.
    let status = if status == StatusCode::Converged && n_at_bound > 1 {
        StatusCode::BoundsViolated
    } else {
        status
    };

    let free_sigma = if chi2.is_finite() && dof > 0 {
        free_uncertainties(f, constraints, ws, chi2 / dof as f64, n_at_bound)
    } else {
        None
    };

    let free = constraints.free_indices();
    let uncertainties = constraints
        .roles()
        .iter()
        .enumerate()
        .map(|(i, role)| {
            let sigma_of = |j: usize| {
                let c = free.iter().position(|&x| x == j)?;
                free_sigma.as_ref().map(|s| s[c])
            };
            match *role {
                ParamRole::Free => sigma_of(i).unwrap_or(f64::NAN),
                ParamRole::Fixed(_) => f64::NAN,
                ParamRole::Tied { root, scale, .. } => {
                    sigma_of(root).map(|s| scale.abs() * s).unwrap_or(f64::NAN)
                }
            }
        })
        .collect();

    PixelFitOutcome {
        params: FitParameters {
            values: ws.params.clone(),
            uncertainties,
        },
        chi2,
        dof,
        iterations,
        n_at_bound,
        status,
    }
}

/// `sqrt(diag((JᵀJ)⁻¹) * reduced_chi2)` at the final parameters.
///
/// With a parameter on a bound, columns that vanish there (a line shape under
/// a zero amplitude) are left out of the covariance and get NaN.
fn free_uncertainties<R: ResidualFunction + ?Sized>(
    f: &R,
    constraints: &Constraints,
    ws: &mut SolverWorkspace,
    reduced_chi2: f64,
    n_at_bound: usize,
) -> Option<Vec<f64>> {
    let k = constraints.free_indices().len();
    if k == 0 {
        return Some(Vec::new());
    }
    f.jacobian(&ws.params, &mut ws.jacobian);
    constraints.fold_jacobian(&ws.jacobian, &mut ws.free_jacobian);
    let a = ws.free_jacobian.transpose() * &ws.free_jacobian;

    let kept: Vec<usize> = (0..k)
        .filter(|&c| n_at_bound == 0 || a[(c, c)] != 0.0)
        .collect();
    let mut sigma = vec![f64::NAN; k];
    if kept.is_empty() {
        return Some(sigma);
    }
    let a_kept = a.select_rows(&kept).select_columns(&kept);
    if is_singular(&a_kept) {
        return None;
    }
    let cov = invert_spd(&a_kept)?;
    for (r, &c) in kept.iter().enumerate() {
        let var = cov[(r, r)] * reduced_chi2;
        if var.is_finite() && var >= 0.0 {
            sigma[c] = var.sqrt();
        }
    }
    Some(sigma)
}

fn sum_sq(r: &[f64]) -> f64 {
    r.iter().map(|v| v * v).sum()
}

/// Per-pixel solver seam used by the orchestrator.
///
/// The production implementation is `LevenbergMarquardt`; tests substitute
/// counting stubs.
pub trait PixelSolver: Sync {
    fn fit_pixel(
        &self,
        template: &Template,
        spectrum: Spectrum<'_>,
        initial: &[f64],
        workspace: &mut SolverWorkspace,
    ) -> PixelFitOutcome;
}

#[derive(Debug, Clone, Default)]
pub struct LevenbergMarquardt {
    pub options: SolverOptions,
}

impl LevenbergMarquardt {
    pub fn new(options: SolverOptions) -> Self {
        Self { options }
    }
}

impl PixelSolver for LevenbergMarquardt {
    fn fit_pixel(
        &self,
        template: &Template,
        spectrum: Spectrum<'_>,
        initial: &[f64],
        workspace: &mut SolverWorkspace,
    ) -> PixelFitOutcome {
        let residuals = SpectrumResiduals::new(template, spectrum);
        solve(
            &residuals,
            initial,
            template.constraints(),
            &self.options,
            workspace,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::TemplateBuilder;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand_distr::{Distribution, Normal};

    fn axis() -> Vec<f64> {
        (0..40).map(|i| 194.6 + 0.02 * i as f64).collect()
    }

    fn line_template() -> Template {
        TemplateBuilder::new("fe_xii_195")
            .gaussian("line", None, 8.0, 195.0, 0.05)
            .polynomial("bg", 195.0, &[1.0])
            .build()
            .unwrap()
    }

    fn synth(t: &Template, truth: &[f64], wave: &[f64]) -> Vec<f64> {
        let full = t.expand(truth);
        wave.iter().map(|&w| t.evaluate(w, &full)).collect()
    }

    fn fit(t: &Template, wave: &[f64], flux: &[f64], err: &[f64], initial: &[f64]) -> PixelFitOutcome {
        let solver = LevenbergMarquardt::default();
        let mut ws = SolverWorkspace::new();
        solver.fit_pixel(t, Spectrum::new(wave, flux, err), initial, &mut ws)
    }

    #[test]
    fn recovers_noise_free_gaussian_plus_constant() {
        let t = line_template();
        let wave = axis();
        let truth = [10.0, 195.0, 0.05, 2.0];
        let flux = synth(&t, &truth, &wave);
        let err = vec![1.0; wave.len()];

        let out = fit(&t, &wave, &flux, &err, &[8.0, 195.02, 0.07, 1.5]);
        assert_eq!(out.status, StatusCode::Converged, "{out:?}");
        for (got, want) in out.params.values.iter().zip(truth.iter()) {
            assert!(((got - want) / want).abs() < 1e-4, "got {got}, want {want}");
        }
        assert!(out.chi2 < 1e-12);
        assert_eq!(out.dof, wave.len() - 4);
    }

    #[test]
    fn fixed_parameters_never_move() {
        let t = TemplateBuilder::new("fixed")
            .gaussian("line", None, 8.0, 195.0, 0.06)
            .polynomial("bg", 195.0, &[1.0])
            .fix("line.width")
            .build()
            .unwrap();
        let wave = axis();
        let truth_t = line_template();
        let flux = synth(&truth_t, &[10.0, 195.0, 0.05, 2.0], &wave);
        let err = vec![1.0; wave.len()];

        let out = fit(&t, &wave, &flux, &err, &[8.0, 195.01, 0.5, 1.0]);
        assert_eq!(out.params.values[2], 0.06);
        assert!(out.params.uncertainties[2].is_nan());
        assert!(out.params.uncertainties[0].is_finite());
    }

    #[test]
    fn tied_parameters_equal_their_target_at_convergence() {
        let t = TemplateBuilder::new("pair")
            .gaussian("a", None, 10.0, 195.0, 0.05)
            .gaussian("b", None, 4.0, 195.3, 0.05)
            .polynomial("bg", 195.0, &[2.0])
            .tie("b.width", "a.width", 1.0, 0.0)
            .tie("b.centroid", "a.centroid", 1.0, 0.3)
            .build()
            .unwrap();
        let wave = axis();
        let truth = t.defaults();
        let flux = synth(&t, &truth, &wave);
        let err = vec![1.0; wave.len()];

        let out = fit(&t, &wave, &flux, &err, &[8.0, 195.01, 0.06, 3.0, 0.0, 0.0, 1.5]);
        let v = &out.params.values;
        assert_eq!(v[5], v[2], "widths tied");
        assert_eq!(v[4], v[1] + 0.3, "centroids tied with offset");
        assert!((v[1] - 195.0).abs() < 1e-6);
        assert!((v[3] - 4.0).abs() < 1e-4);
        assert_eq!(out.params.uncertainties[5], out.params.uncertainties[2]);
    }

    #[test]
    fn constant_spectrum_does_not_converge_silently() {
        let t = line_template();
        let wave = axis();
        let flux = vec![3.0; wave.len()];
        let err = vec![1.0; wave.len()];

        // Zero peak makes centroid and width columns vanish.
        let out = fit(&t, &wave, &flux, &err, &[0.0, 195.0, 0.05, 3.0]);
        assert!(
            matches!(
                out.status,
                StatusCode::SingularJacobian | StatusCode::MaxIterationsReached
            ),
            "{:?}",
            out.status
        );
        assert!(out.params.values.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn one_saturated_bound_converges_two_are_flagged() {
        let wave = axis();
        let truth_t = line_template();
        let flux = synth(&truth_t, &[10.0, 195.0, 0.05, 2.0], &wave);
        let err = vec![1.0; wave.len()];

        let one = TemplateBuilder::new("one")
            .gaussian("line", None, 9.0, 195.0, 0.05)
            .polynomial("bg", 195.0, &[1.0])
            .bounds("line.peak", 0.0, 9.9)
            .build()
            .unwrap();
        let out = fit(&one, &wave, &flux, &err, &[9.0, 195.01, 0.05, 1.5]);
        assert_eq!(out.params.values[0], 9.9);
        assert_eq!(out.n_at_bound, 1);
        assert_eq!(out.status, StatusCode::Converged, "{out:?}");

        let two = TemplateBuilder::new("two")
            .gaussian("line", None, 9.0, 195.0, 0.045)
            .polynomial("bg", 195.0, &[1.0])
            .bounds("line.peak", 0.0, 9.9)
            .bounds("line.width", 0.0, 0.0495)
            .build()
            .unwrap();
        let out = fit(&two, &wave, &flux, &err, &[9.0, 195.01, 0.045, 1.5]);
        assert_eq!(out.n_at_bound, 2);
        assert_eq!(out.status, StatusCode::BoundsViolated, "{out:?}");
    }

    #[test]
    fn absorption_dip_pins_emission_peak_at_zero() {
        let wave = axis();
        let flux: Vec<f64> = wave
            .iter()
            .map(|&w| 2.0 - 0.5 * (-0.5 * ((w - 195.05) / 0.04).powi(2)).exp())
            .collect();
        let err = vec![1.0; wave.len()];
        let mean = flux.iter().sum::<f64>() / flux.len() as f64;

        let out = fit(&line_template(), &wave, &flux, &err, &[0.0, 195.05, 0.04, 2.0]);
        assert_eq!(out.status, StatusCode::Converged, "{out:?}");
        assert_eq!(out.n_at_bound, 1);
        assert_eq!(out.params.values[0], 0.0);
        assert!((out.params.values[3] - mean).abs() < 1e-9);

        // The line shape is undetermined under a zero peak.
        let s = &out.params.uncertainties;
        assert!(s[1].is_nan() && s[2].is_nan(), "{s:?}");
        assert!(s[0].is_finite() && s[3].is_finite(), "{s:?}");
    }

    #[test]
    fn noisy_fit_reports_sensible_uncertainties() {
        let t = line_template();
        let wave = axis();
        let clean = synth(&t, &[100.0, 195.0, 0.05, 20.0], &wave);
        let mut rng = StdRng::seed_from_u64(7);
        let noise = Normal::new(0.0, 1.0).unwrap();
        let err: Vec<f64> = clean.iter().map(|v| v.sqrt()).collect();
        let flux: Vec<f64> = clean
            .iter()
            .zip(err.iter())
            .map(|(v, s)| v + s * noise.sample(&mut rng))
            .collect();

        let out = fit(&t, &wave, &flux, &err, &[80.0, 195.01, 0.06, 15.0]);
        assert_eq!(out.status, StatusCode::Converged);
        let s = &out.params.uncertainties;
        assert!(s.iter().all(|v| v.is_finite() && *v > 0.0), "{s:?}");
        // Centroid within a few sigma of the truth.
        assert!((out.params.values[1] - 195.0).abs() < 5.0 * s[1]);
        assert!(out.reduced_chi2() < 3.0);
    }

    #[test]
    fn solver_is_generic_over_residual_functions() {
        // y = a * exp(-b t)
        struct Decay {
            t: Vec<f64>,
            y: Vec<f64>,
        }
        impl ResidualFunction for Decay {
            fn n_residuals(&self) -> usize {
                self.t.len()
            }
            fn n_params(&self) -> usize {
                2
            }
            fn residuals(&self, p: &[f64], out: &mut [f64]) {
                for i in 0..self.t.len() {
                    out[i] = self.y[i] - p[0] * (-p[1] * self.t[i]).exp();
                }
            }
            fn jacobian(&self, p: &[f64], out: &mut DMatrix<f64>) {
                for i in 0..self.t.len() {
                    let e = (-p[1] * self.t[i]).exp();
                    out[(i, 0)] = -e;
                    out[(i, 1)] = p[0] * self.t[i] * e;
                }
            }
        }

        let t: Vec<f64> = (0..20).map(|i| i as f64 * 0.25).collect();
        let y = t.iter().map(|&x| 3.0 * (-0.7 * x).exp()).collect();
        let f = Decay { t, y };
        let specs = vec![crate::template::ParamSpec::new(1.0), crate::template::ParamSpec::new(0.1)];
        let c = Constraints::from_specs(&specs, &["a".into(), "b".into()]).unwrap();
        let out = solve(&f, &[1.0, 0.1], &c, &SolverOptions::default(), &mut SolverWorkspace::new());
        assert_eq!(out.status, StatusCode::Converged);
        assert!((out.params.values[0] - 3.0).abs() < 1e-6);
        assert!((out.params.values[1] - 0.7).abs() < 1e-6);
    }

    #[test]
    fn options_are_validated() {
        assert!(SolverOptions::default().validate().is_ok());
        let bad = SolverOptions {
            tolerance: 0.0,
            ..SolverOptions::default()
        };
        assert!(bad.validate().is_err());
    }
}
