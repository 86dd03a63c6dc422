//! Fit templates: the composite model applied to every spectrum.
//!
//! A template is an ordered list of components plus one `ParamSpec` per
//! parameter of the flattened vector (components concatenated in order).
//! It is immutable once built, and building it is where every structural check
//! happens, so a template that exists is always safe to fit with.

pub mod builder;
pub mod constraints;
pub mod param;
pub mod residual;

pub use builder::*;
pub use constraints::*;
pub use param::*;
pub use residual::*;

use nalgebra::DMatrix;
use tracing::debug;

use crate::domain::Spectrum;
use crate::error::FitError;
use crate::models::{Component, Profile};

#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    components: Vec<Component>,
    params: Vec<ParamSpec>,
    names: Vec<String>,
    /// First parameter index of each component.
    offsets: Vec<usize>,
    constraints: Constraints,
}

impl Template {
    pub fn new(
        name: impl Into<String>,
        components: Vec<Component>,
        params: Vec<ParamSpec>,
    ) -> Result<Self, FitError> {
        let name = name.into();
        if components.is_empty() {
            return Err(FitError::invalid_template("template has no components"));
        }

        let mut offsets = Vec::with_capacity(components.len());
        let mut names = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for c in &components {
            if !seen.insert(c.name.as_str()) {
                return Err(FitError::invalid_template(format!(
                    "duplicate component name '{}'",
                    c.name
                )));
            }
            if let Profile::Gaussian { window: Some((lo, hi)) } = c.profile {
                if !(lo.is_finite() && hi.is_finite() && lo < hi) {
                    return Err(FitError::invalid_template(format!(
                        "{}: invalid window [{lo}, {hi}]",
                        c.name
                    )));
                }
            }
            offsets.push(names.len());
            for k in 0..c.profile.param_count() {
                names.push(format!("{}.{}", c.name, c.profile.param_name(k)));
            }
        }

        if params.len() != names.len() {
            return Err(FitError::invalid_template(format!(
                "components define {} parameters but {} were given",
                names.len(),
                params.len()
            )));
        }

        let constraints = Constraints::from_specs(&params, &names)?;
        debug!(
            template = %name,
            components = components.len(),
            params = params.len(),
            free = constraints.free_indices().len(),
            "template built"
        );

        Ok(Self {
            name,
            components,
            params,
            names,
            offsets,
            constraints,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    pub fn param_names(&self) -> &[String] {
        &self.names
    }

    pub fn constraints(&self) -> &Constraints {
        &self.constraints
    }

    /// Parameter index range of component `k`.
    pub fn component_range(&self, k: usize) -> std::ops::Range<usize> {
        let start = self.offsets[k];
        start..start + self.components[k].profile.param_count()
    }

    /// Look up a parameter by its `component.param` name.
    pub fn param_index(&self, name: &str) -> Result<usize, FitError> {
        self.names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| FitError::UnknownParameter(name.to_string()))
    }

    /// Literal default vector (with fixed values and ties applied).
    pub fn defaults(&self) -> Vec<f64> {
        self.expand(&self.params.iter().map(|p| p.value).collect::<Vec<_>>())
    }

    /// Resolve fixed and tied parameters of `params` into a full vector.
    pub fn expand(&self, params: &[f64]) -> Vec<f64> {
        let mut out = params.to_vec();
        self.constraints.apply(&mut out);
        out
    }

    /// Wavelength window of a Gaussian component, used for initial guesses.
    ///
    /// Explicit window if given; else the centroid bounds when both are finite;
    /// else the literal centroid ± 5 literal widths.
    pub fn gaussian_window(&self, k: usize) -> Option<(f64, f64)> {
        let Profile::Gaussian { window } = self.components[k].profile else {
            return None;
        };
        if window.is_some() {
            return window;
        }
        let base = self.offsets[k];
        let centroid = &self.params[base + crate::models::CENTROID];
        if centroid.lower.is_finite() && centroid.upper.is_finite() && centroid.lower < centroid.upper {
            return Some((centroid.lower, centroid.upper));
        }
        let half = 5.0 * self.params[base + crate::models::WIDTH].value.abs();
        Some((centroid.value - half, centroid.value + half))
    }

    /// Model value at `lambda` for an already expanded parameter vector.
    pub fn evaluate(&self, lambda: f64, expanded: &[f64]) -> f64 {
        self.components
            .iter()
            .enumerate()
            .map(|(k, c)| c.profile.value(lambda, &expanded[self.component_range(k)]))
            .sum()
    }

    /// Value of a single component at `lambda`.
    pub fn evaluate_component(&self, k: usize, lambda: f64, expanded: &[f64]) -> f64 {
        self.components[k]
            .profile
            .value(lambda, &expanded[self.component_range(k)])
    }

    /// Normalized residuals `(observed - model) / sigma` at `params`.
    ///
    /// Fixed and tied entries of `params` are resolved first. Unusable samples
    /// give a zero residual.
    pub fn build_residual(&self, spectrum: &Spectrum<'_>, params: &[f64]) -> Result<Vec<f64>, FitError> {
        if params.len() != self.param_count() {
            return Err(FitError::dimension("parameter vector", self.param_count(), params.len()));
        }
        spectrum.check_shape()?;
        let expanded = self.expand(params);
        let mut out = vec![0.0; spectrum.len()];
        self.residuals_into(spectrum, &expanded, &mut out);
        Ok(out)
    }

    /// Hot-path residuals: no shape checks, `expanded` must already be resolved.
    pub(crate) fn residuals_into(&self, spectrum: &Spectrum<'_>, expanded: &[f64], out: &mut [f64]) {
        for (i, r) in out.iter_mut().enumerate() {
            *r = if spectrum.is_usable(i) {
                let model = self.evaluate(spectrum.wavelength[i], expanded);
                (spectrum.intensity[i] - model) / spectrum.uncertainty[i]
            } else {
                0.0
            };
        }
    }

    /// `∂r_i/∂p_j` for every parameter (tied and fixed included): `n x P`.
    pub(crate) fn residual_jacobian_into(
        &self,
        spectrum: &Spectrum<'_>,
        expanded: &[f64],
        out: &mut DMatrix<f64>,
    ) {
        out.fill(0.0);
        let mut scratch = [0.0; 16];
        let mut heap = Vec::new();
        for i in 0..spectrum.len() {
            if !spectrum.is_usable(i) {
                continue;
            }
            let lambda = spectrum.wavelength[i];
            let inv_sigma = 1.0 / spectrum.uncertainty[i];
            for (k, c) in self.components.iter().enumerate() {
                let range = self.component_range(k);
                let m = range.len();
                let d: &mut [f64] = if m <= scratch.len() {
                    &mut scratch[..m]
                } else {
                    heap.resize(m, 0.0);
                    &mut heap[..]
                };
                c.profile.derivatives(lambda, &expanded[range.clone()], d);
                for (j, &dv) in range.zip(d.iter()) {
                    // r = (y - f) / sigma
                    out[(i, j)] = -dv * inv_sigma;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gaussian_plus_constant() -> Template {
        TemplateBuilder::new("fe_xii_195")
            .gaussian("line", None, 10.0, 195.0, 0.05)
            .polynomial("bg", 195.0, &[2.0])
            .build()
            .unwrap()
    }

    #[test]
    fn param_names_follow_component_order() {
        let t = gaussian_plus_constant();
        assert_eq!(
            t.param_names(),
            &["line.peak", "line.centroid", "line.width", "bg.c0"]
        );
        assert_eq!(t.param_index("line.width").unwrap(), 2);
        assert!(matches!(t.param_index("nope"), Err(FitError::UnknownParameter(_))));
    }

    #[test]
    fn residual_is_zero_at_true_parameters() {
        let t = gaussian_plus_constant();
        let truth = [10.0, 195.0, 0.05, 2.0];
        let wave: Vec<f64> = (0..30).map(|i| 194.7 + 0.02 * i as f64).collect();
        let flux: Vec<f64> = wave.iter().map(|&w| t.evaluate(w, &truth)).collect();
        let err = vec![0.5; wave.len()];
        let spec = Spectrum::new(&wave, &flux, &err);

        let r = t.build_residual(&spec, &truth).unwrap();
        assert!(r.iter().all(|v| v.abs() < 1e-12));

        let r = t.build_residual(&spec, &[11.0, 195.0, 0.05, 2.0]).unwrap();
        assert!(r.iter().any(|v| v.abs() > 0.1));
    }

    #[test]
    fn build_residual_resolves_ties_and_fixed_values() {
        let t = TemplateBuilder::new("pair")
            .gaussian("a", None, 5.0, 195.0, 0.05)
            .gaussian("b", None, 3.0, 195.5, 0.05)
            .polynomial("bg", 195.0, &[1.0])
            .tie("b.width", "a.width", 1.0, 0.0)
            .tie("b.centroid", "a.centroid", 1.0, 0.5)
            .fix("bg.c0")
            .build()
            .unwrap();

        let wave: Vec<f64> = (0..60).map(|i| 194.6 + 0.025 * i as f64).collect();
        let truth = t.defaults();
        let flux: Vec<f64> = wave.iter().map(|&w| t.evaluate(w, &truth)).collect();
        let err = vec![1.0; wave.len()];
        let spec = Spectrum::new(&wave, &flux, &err);

        // Garbage in the tied/fixed slots is ignored.
        let mut p = truth.clone();
        p[t.param_index("b.width").unwrap()] = 99.0;
        p[t.param_index("b.centroid").unwrap()] = -1.0;
        p[t.param_index("bg.c0").unwrap()] = 1e6;
        let r = t.build_residual(&spec, &p).unwrap();
        assert!(r.iter().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn build_residual_checks_vector_length() {
        let t = gaussian_plus_constant();
        let wave = [195.0];
        let spec = Spectrum::new(&wave, &[1.0], &[1.0]);
        assert!(matches!(
            t.build_residual(&spec, &[1.0, 2.0]),
            Err(FitError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn window_falls_back_to_centroid_bounds() {
        let t = TemplateBuilder::new("w")
            .gaussian("line", None, 10.0, 195.0, 0.05)
            .bounds("line.centroid", 194.9, 195.1)
            .build()
            .unwrap();
        assert_eq!(t.gaussian_window(0), Some((194.9, 195.1)));

        let t = gaussian_plus_constant();
        let (lo, hi) = t.gaussian_window(0).unwrap();
        assert!((lo - 194.75).abs() < 1e-12 && (hi - 195.25).abs() < 1e-12);
        assert_eq!(t.gaussian_window(1), None);
    }

    #[test]
    fn duplicate_component_names_are_invalid() {
        let err = TemplateBuilder::new("dup")
            .gaussian("a", None, 1.0, 195.0, 0.05)
            .gaussian("a", None, 1.0, 195.2, 0.05)
            .build()
            .unwrap_err();
        assert!(matches!(err, FitError::InvalidTemplate(_)));
    }
}
