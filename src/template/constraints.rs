//! Bounds, fixed values and the tie graph.
//!
//! Ties are validated and resolved once, when the template is built:
//!
//! - every tie target must be in range
//! - following ties from any parameter must end at a non-tied *root*
//!   (cycles are rejected via a visited-set walk)
//! - chains are composed, so `a -> b -> c` is stored as one linear relation
//!   `a = scale * c + offset`
//!
//! At fit time the solver only sees `Free` parameters; fixed and tied values
//! are recomputed with `apply` after every step.

use std::collections::HashSet;

use nalgebra::DMatrix;

use crate::error::FitError;
use crate::template::param::ParamSpec;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamRole {
    Free,
    Fixed(f64),
    /// `p = scale * p[root] + offset`, with `root` not tied.
    Tied { root: usize, scale: f64, offset: f64 },
}

/// Solver-facing view of a template's parameter attributes.
#[derive(Debug, Clone)]
pub struct Constraints {
    lower: Vec<f64>,
    upper: Vec<f64>,
    roles: Vec<ParamRole>,
    free: Vec<usize>,
}

impl Constraints {
    /// Validate `specs` and resolve the tie graph.
    ///
    /// `names` is only used for error messages.
    pub fn from_specs(specs: &[ParamSpec], names: &[String]) -> Result<Self, FitError> {
        let n = specs.len();
        let name = |i: usize| names.get(i).cloned().unwrap_or_else(|| format!("#{i}"));

        for (i, s) in specs.iter().enumerate() {
            if s.lower.is_nan() || s.upper.is_nan() {
                return Err(FitError::invalid_template(format!("{}: NaN bound", name(i))));
            }
            if s.lower > s.upper {
                return Err(FitError::invalid_template(format!(
                    "{}: lower bound {} > upper bound {}",
                    name(i),
                    s.lower,
                    s.upper
                )));
            }
            if !s.value.is_finite() {
                return Err(FitError::invalid_template(format!(
                    "{}: non-finite initial value",
                    name(i)
                )));
            }
            if s.fixed && s.tie.is_some() {
                return Err(FitError::invalid_template(format!(
                    "{}: parameter is both fixed and tied",
                    name(i)
                )));
            }
            if s.fixed && (s.value < s.lower || s.value > s.upper) {
                return Err(FitError::invalid_template(format!(
                    "{}: fixed value {} outside [{}, {}]",
                    name(i),
                    s.value,
                    s.lower,
                    s.upper
                )));
            }
            if let Some(tie) = s.tie {
                if tie.target >= n {
                    return Err(FitError::invalid_template(format!(
                        "{}: tie target {} out of range (template has {n} parameters)",
                        name(i),
                        tie.target
                    )));
                }
                if !(tie.scale.is_finite() && tie.scale != 0.0 && tie.offset.is_finite()) {
                    return Err(FitError::invalid_template(format!(
                        "{}: tie scale must be finite and non-zero, offset finite",
                        name(i)
                    )));
                }
            }
        }

        let mut roles = Vec::with_capacity(n);
        for (i, s) in specs.iter().enumerate() {
            let role = if s.fixed {
                ParamRole::Fixed(s.value)
            } else if s.tie.is_some() {
                resolve_tie(specs, i).map_err(|cycle| {
                    let path: Vec<String> = cycle.into_iter().map(name).collect();
                    FitError::invalid_template(format!("tie cycle: {}", path.join(" -> ")))
                })?
            } else {
                ParamRole::Free
            };
            roles.push(role);
        }

        let free = roles
            .iter()
            .enumerate()
            .filter_map(|(i, r)| matches!(r, ParamRole::Free).then_some(i))
            .collect();

        Ok(Self {
            lower: specs.iter().map(|s| s.lower).collect(),
            upper: specs.iter().map(|s| s.upper).collect(),
            roles,
            free,
        })
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    pub fn roles(&self) -> &[ParamRole] {
        &self.roles
    }

    pub fn role(&self, i: usize) -> ParamRole {
        self.roles[i]
    }

    /// Indices of parameters the solver varies, in template order.
    pub fn free_indices(&self) -> &[usize] {
        &self.free
    }

    pub fn lower(&self) -> &[f64] {
        &self.lower
    }

    pub fn upper(&self) -> &[f64] {
        &self.upper
    }

    #[inline]
    pub fn clamp(&self, i: usize, v: f64) -> f64 {
        v.max(self.lower[i]).min(self.upper[i])
    }

    /// Overwrite fixed and tied entries from the free ones.
    ///
    /// Roots are never tied, so a single pass is enough.
    pub fn apply(&self, params: &mut [f64]) {
        for (i, role) in self.roles.iter().enumerate() {
            if let ParamRole::Fixed(v) = *role {
                params[i] = v;
            }
        }
        for (i, role) in self.roles.iter().enumerate() {
            if let ParamRole::Tied { root, scale, offset } = *role {
                params[i] = scale * params[root] + offset;
            }
        }
    }

    /// Clamp every free entry into its bounds.
    pub fn clamp_free(&self, params: &mut [f64]) {
        for &i in &self.free {
            params[i] = self.clamp(i, params[i]);
        }
    }

    /// Reduce a full `n x P` Jacobian to the `n x k` free-parameter Jacobian.
    ///
    /// A tied parameter contributes `scale * ∂r/∂p_tied` to its root's column
    /// (chain rule); fixed parameters and ties to fixed roots contribute nothing.
    pub fn fold_jacobian(&self, full: &DMatrix<f64>, out: &mut DMatrix<f64>) {
        let n = full.nrows();
        for (c, &j) in self.free.iter().enumerate() {
            for r in 0..n {
                out[(r, c)] = full[(r, j)];
            }
        }
        for (i, role) in self.roles.iter().enumerate() {
            let ParamRole::Tied { root, scale, .. } = *role else {
                continue;
            };
            let Some(c) = self.free.iter().position(|&j| j == root) else {
                continue;
            };
            for r in 0..n {
                out[(r, c)] += scale * full[(r, i)];
            }
        }
    }

    /// Number of free parameters sitting exactly on a finite bound.
    pub fn count_at_bound(&self, params: &[f64]) -> usize {
        self.free
            .iter()
            .filter(|&&i| {
                let v = params[i];
                (self.lower[i].is_finite() && v == self.lower[i])
                    || (self.upper[i].is_finite() && v == self.upper[i])
            })
            .count()
    }
}

/// Follow ties from `start` to a non-tied root, composing the linear relations.
///
/// Returns the visited path on a cycle.
fn resolve_tie(specs: &[ParamSpec], start: usize) -> Result<ParamRole, Vec<usize>> {
    let mut visited = HashSet::new();
    let mut path = vec![start];
    visited.insert(start);

    let mut scale = 1.0;
    let mut offset = 0.0;
    let mut current = start;

    while let Some(tie) = specs[current].tie {
        // p_start = scale * p_current + offset and p_current = s * p_target + o
        offset += scale * tie.offset;
        scale *= tie.scale;
        path.push(tie.target);
        if !visited.insert(tie.target) {
            return Err(path);
        }
        current = tie.target;
    }

    Ok(ParamRole::Tied {
        root: current,
        scale,
        offset,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::param::Tie;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("p{i}")).collect()
    }

    #[test]
    fn chains_are_composed_to_the_root() {
        let specs = vec![
            ParamSpec::new(1.0),
            ParamSpec::new(0.0).tied(Tie::linear(0, 2.0, 1.0)),
            ParamSpec::new(0.0).tied(Tie::linear(1, 3.0, 0.5)),
        ];
        let c = Constraints::from_specs(&specs, &names(3)).unwrap();
        assert_eq!(c.free_indices(), &[0]);
        // p2 = 3 * (2 * p0 + 1) + 0.5 = 6 p0 + 3.5
        assert_eq!(
            c.role(2),
            ParamRole::Tied {
                root: 0,
                scale: 6.0,
                offset: 3.5
            }
        );

        let mut p = vec![2.0, 0.0, 0.0];
        c.apply(&mut p);
        assert_eq!(p, vec![2.0, 5.0, 15.5]);
    }

    #[test]
    fn cycles_and_bad_targets_are_rejected() {
        let specs = vec![
            ParamSpec::new(1.0).tied(Tie::identity(1)),
            ParamSpec::new(1.0).tied(Tie::identity(0)),
        ];
        let err = Constraints::from_specs(&specs, &names(2)).unwrap_err();
        assert!(err.to_string().contains("cycle"), "{err}");

        let specs = vec![ParamSpec::new(1.0).tied(Tie::identity(0))];
        assert!(Constraints::from_specs(&specs, &names(1)).is_err());

        let specs = vec![ParamSpec::new(1.0).tied(Tie::identity(7))];
        let err = Constraints::from_specs(&specs, &names(1)).unwrap_err();
        assert!(err.to_string().contains("out of range"), "{err}");
    }

    #[test]
    fn bad_bounds_are_rejected() {
        let specs = vec![ParamSpec::new(1.0).bounded(2.0, 0.0)];
        assert!(matches!(
            Constraints::from_specs(&specs, &names(1)),
            Err(FitError::InvalidTemplate(_))
        ));

        let specs = vec![ParamSpec::new(5.0).bounded(0.0, 1.0).fixed()];
        assert!(Constraints::from_specs(&specs, &names(1)).is_err());
    }

    #[test]
    fn fold_jacobian_adds_tied_columns_to_root() {
        let specs = vec![
            ParamSpec::new(1.0),
            ParamSpec::new(1.0).fixed(),
            ParamSpec::new(1.0).tied(Tie::linear(0, 2.0, 0.0)),
        ];
        let c = Constraints::from_specs(&specs, &names(3)).unwrap();
        let full = DMatrix::from_row_slice(2, 3, &[1.0, 10.0, 100.0, 2.0, 20.0, 200.0]);
        let mut out = DMatrix::zeros(2, 1);
        c.fold_jacobian(&full, &mut out);
        assert_eq!(out[(0, 0)], 201.0);
        assert_eq!(out[(1, 0)], 402.0);
    }

    #[test]
    fn counts_free_parameters_on_bounds() {
        let specs = vec![
            ParamSpec::new(0.0).bounded(0.0, 1.0),
            ParamSpec::new(1.0).bounded(0.0, 1.0),
            ParamSpec::new(0.5).bounded(0.0, 1.0),
            ParamSpec::new(0.0).bounded(0.0, 1.0).fixed(),
        ];
        let c = Constraints::from_specs(&specs, &names(4)).unwrap();
        assert_eq!(c.count_at_bound(&[0.0, 1.0, 0.5, 0.0]), 2);
    }
}
