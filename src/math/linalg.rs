//! Normal-equation helpers for the Levenberg-Marquardt solver.
//!
//! The solver works on `A = JᵀJ` (k x k, k = free parameters, typically < 10),
//! so dense factorizations from nalgebra are plenty fast.
//!
//! Conditioning is judged on the *scaled* matrix `D^-1/2 A D^-1/2`
//! (`D = diag(A)`), which makes the check independent of parameter units:
//! a peak in counts and a centroid in Ångström would otherwise look
//! ill-conditioned purely because of scale.

use nalgebra::{DMatrix, DVector};

/// Reciprocal condition number below which `A` counts as singular.
pub const RCOND_MIN: f64 = 1e-12;

/// `true` if the normal matrix is not safely invertible.
pub fn is_singular(a: &DMatrix<f64>) -> bool {
    let k = a.nrows();
    if k == 0 {
        return false;
    }
    if a.iter().any(|v| !v.is_finite()) {
        return true;
    }

    let diag: Vec<f64> = (0..k).map(|i| a[(i, i)]).collect();
    if diag.iter().any(|&d| d <= 0.0) {
        // A parameter with no influence on any residual.
        return true;
    }

    let scaled = DMatrix::from_fn(k, k, |i, j| a[(i, j)] / (diag[i] * diag[j]).sqrt());
    let sv = scaled.svd(false, false).singular_values;
    let max = sv.iter().cloned().fold(0.0, f64::max);
    let min = sv.iter().cloned().fold(f64::INFINITY, f64::min);
    !(max > 0.0 && min / max >= RCOND_MIN)
}

/// Solve the Marquardt-damped system `(A + λ diag(A)) δ = -g`.
///
/// Returns `None` if the damped matrix cannot be factorized or the step is
/// not finite.
pub fn solve_damped(a: &DMatrix<f64>, g: &DVector<f64>, lambda: f64) -> Option<DVector<f64>> {
    let mut m = a.clone();
    for i in 0..m.nrows() {
        m[(i, i)] += lambda * a[(i, i)];
    }
    let rhs = -g.clone();

    let step = match m.clone().cholesky() {
        Some(chol) => chol.solve(&rhs),
        None => m.lu().solve(&rhs)?,
    };

    step.iter().all(|v| v.is_finite()).then_some(step)
}

/// Inverse of a symmetric positive-definite matrix (the covariance).
pub fn invert_spd(a: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let inv = match a.clone().cholesky() {
        Some(chol) => chol.inverse(),
        None => a.clone().try_inverse()?,
    };
    inv.iter().all(|v| v.is_finite()).then_some(inv)
}
