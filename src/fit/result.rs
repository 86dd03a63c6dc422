//! Cube-shaped fit results and the maps derived from them.
//!
//! Storage is parameter-major: plane `j` holds parameter `j` for every pixel
//! (`[y][x]` order), so a parameter map is a single contiguous slice.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{PixelFitOutcome, FitParameters, StatusCode};
use crate::error::FitError;
use crate::models::{CENTROID, PEAK, Profile, WIDTH, gaussian_fwhm, gaussian_integral};
use crate::template::Template;

/// Speed of light in km/s.
pub const SPEED_OF_LIGHT_KMS: f64 = 299_792.458;

/// What the result remembers about each template component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSummary {
    pub name: String,
    pub kind: String,
    pub first_param: usize,
    pub n_params: usize,
    /// Literal centroid of a Gaussian, used as the default rest wavelength.
    pub rest_wavelength: Option<f64>,
}

impl ComponentSummary {
    pub fn from_template(template: &Template) -> Vec<Self> {
        template
            .components()
            .iter()
            .enumerate()
            .map(|(k, c)| {
                let range = template.component_range(k);
                let rest_wavelength = match c.profile {
                    Profile::Gaussian { .. } => Some(template.params()[range.start + CENTROID].value),
                    Profile::Polynomial { .. } => None,
                };
                ComponentSummary {
                    name: c.name.clone(),
                    kind: c.profile.kind_name().to_string(),
                    first_param: range.start,
                    n_params: range.len(),
                    rest_wavelength,
                }
            })
            .collect()
    }

    pub fn is_gaussian(&self) -> bool {
        self.kind == "gaussian"
    }
}

/// A dense 2-D map in `[y][x]` order.
#[derive(Debug, Clone, PartialEq)]
pub struct Map2D {
    pub nx: usize,
    pub ny: usize,
    pub values: Vec<f64>,
}

impl Map2D {
    pub fn get(&self, x: usize, y: usize) -> f64 {
        self.values[y * self.nx + x]
    }

    pub fn finite_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_finite()).count()
    }
}

/// Model evaluated on the wavelength axis for one pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct FitProfile {
    pub wavelength: Vec<f64>,
    pub total: Vec<f64>,
    /// One curve per template component, in template order.
    pub components: Vec<Vec<f64>>,
}

#[derive(Debug, Clone)]
pub struct FitResult {
    pub(crate) template_name: String,
    pub(crate) nx: usize,
    pub(crate) ny: usize,
    pub(crate) param_names: Vec<String>,
    pub(crate) components: Vec<ComponentSummary>,
    pub(crate) values: Vec<f64>,
    pub(crate) uncertainties: Vec<f64>,
    pub(crate) chi2: Vec<f64>,
    pub(crate) dof: Vec<usize>,
    pub(crate) iterations: Vec<usize>,
    pub(crate) n_at_bound: Vec<usize>,
    pub(crate) status: Vec<StatusCode>,
    pub(crate) created_at: DateTime<Utc>,
}

impl FitResult {
    /// Assemble a result from per-pixel outcomes in `[y][x]` order.
    pub fn from_outcomes(template: &Template, nx: usize, ny: usize, outcomes: &[PixelFitOutcome]) -> Self {
        let n_pix = nx * ny;
        let n_params = template.param_count();
        debug_assert_eq!(outcomes.len(), n_pix);

        let mut values = vec![f64::NAN; n_params * n_pix];
        let mut uncertainties = vec![f64::NAN; n_params * n_pix];
        for (pix, o) in outcomes.iter().enumerate() {
            for j in 0..n_params {
                values[j * n_pix + pix] = o.params.values[j];
                uncertainties[j * n_pix + pix] = o.params.uncertainties[j];
            }
        }

        Self {
            template_name: template.name().to_string(),
            nx,
            ny,
            param_names: template.param_names().to_vec(),
            components: ComponentSummary::from_template(template),
            values,
            uncertainties,
            chi2: outcomes.iter().map(|o| o.chi2).collect(),
            dof: outcomes.iter().map(|o| o.dof).collect(),
            iterations: outcomes.iter().map(|o| o.iterations).collect(),
            n_at_bound: outcomes.iter().map(|o| o.n_at_bound).collect(),
            status: outcomes.iter().map(|o| o.status).collect(),
            created_at: Utc::now(),
        }
    }

    pub fn template_name(&self) -> &str {
        &self.template_name
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.nx, self.ny)
    }

    pub fn n_pixels(&self) -> usize {
        self.nx * self.ny
    }

    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }

    pub fn components(&self) -> &[ComponentSummary] {
        &self.components
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn param_index(&self, name: &str) -> Result<usize, FitError> {
        self.param_names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| FitError::UnknownParameter(name.to_string()))
    }

    /// Contiguous plane of parameter `index`.
    pub fn parameter_plane(&self, index: usize) -> Option<&[f64]> {
        let n = self.n_pixels();
        (index < self.param_names.len()).then(|| &self.values[index * n..(index + 1) * n])
    }

    pub fn uncertainty_plane(&self, index: usize) -> Option<&[f64]> {
        let n = self.n_pixels();
        (index < self.param_names.len()).then(|| &self.uncertainties[index * n..(index + 1) * n])
    }

    pub fn parameter_map(&self, name: &str) -> Result<Map2D, FitError> {
        let j = self.param_index(name)?;
        Ok(self.map(self.values[j * self.n_pixels()..(j + 1) * self.n_pixels()].to_vec()))
    }

    pub fn uncertainty_map(&self, name: &str) -> Result<Map2D, FitError> {
        let j = self.param_index(name)?;
        Ok(self.map(self.uncertainties[j * self.n_pixels()..(j + 1) * self.n_pixels()].to_vec()))
    }

    pub fn chi2_map(&self) -> Map2D {
        self.map(self.chi2.clone())
    }

    /// `chi2 / dof`; NaN where dof is zero.
    pub fn reduced_chi2_map(&self) -> Map2D {
        self.map(
            self.chi2
                .iter()
                .zip(&self.dof)
                .map(|(&c, &d)| if d == 0 { f64::NAN } else { c / d as f64 })
                .collect(),
        )
    }

    pub fn status_map(&self) -> &[StatusCode] {
        &self.status
    }

    /// Status as numeric codes, for export and rendering.
    pub fn status_code_map(&self) -> Map2D {
        self.map(self.status.iter().map(|s| s.code() as f64).collect())
    }

    pub fn iterations_map(&self) -> Map2D {
        self.map(self.iterations.iter().map(|&i| i as f64).collect())
    }

    pub fn status_at(&self, x: usize, y: usize) -> StatusCode {
        self.status[y * self.nx + x]
    }

    /// Reassemble the per-pixel outcome at `(x, y)`.
    pub fn outcome(&self, x: usize, y: usize) -> Result<PixelFitOutcome, FitError> {
        let pix = self.pixel_index(x, y)?;
        let n = self.n_pixels();
        let p = self.param_names.len();
        Ok(PixelFitOutcome {
            params: FitParameters {
                values: (0..p).map(|j| self.values[j * n + pix]).collect(),
                uncertainties: (0..p).map(|j| self.uncertainties[j * n + pix]).collect(),
            },
            chi2: self.chi2[pix],
            dof: self.dof[pix],
            iterations: self.iterations[pix],
            n_at_bound: self.n_at_bound[pix],
            status: self.status[pix],
        })
    }

    /// Pixel count per status, every status present (zero counts included).
    pub fn status_counts(&self) -> BTreeMap<StatusCode, usize> {
        let mut counts: BTreeMap<StatusCode, usize> = StatusCode::ALL.iter().map(|&s| (s, 0)).collect();
        for s in &self.status {
            *counts.entry(*s).or_default() += 1;
        }
        counts
    }

    /// Doppler velocity (km/s) of a Gaussian component's centroid.
    ///
    /// `rest` defaults to the template's literal centroid. Pixels that did not
    /// converge are NaN.
    pub fn velocity_map(&self, component: &str, rest: Option<f64>) -> Result<Map2D, FitError> {
        let c = self.gaussian(component)?;
        let rest = match rest.or(c.rest_wavelength) {
            Some(r) if r.is_finite() && r > 0.0 => r,
            other => {
                return Err(FitError::InvalidConfig(format!(
                    "rest wavelength for '{component}' must be positive, got {other:?}"
                )));
            }
        };
        let centroid = self.plane(c.first_param + CENTROID);
        Ok(self.map(
            centroid
                .iter()
                .zip(&self.status)
                .map(|(&v, s)| {
                    if s.is_converged() {
                        (v - rest) / rest * SPEED_OF_LIGHT_KMS
                    } else {
                        f64::NAN
                    }
                })
                .collect(),
        ))
    }

    /// Integrated line intensity `peak * width * sqrt(2π)`.
    pub fn intensity_map(&self, component: &str) -> Result<Map2D, FitError> {
        let c = self.gaussian(component)?;
        let peak = self.plane(c.first_param + PEAK);
        let width = self.plane(c.first_param + WIDTH);
        Ok(self.map(
            peak.iter()
                .zip(width)
                .map(|(&p, &w)| gaussian_integral(p, w))
                .collect(),
        ))
    }

    pub fn fwhm_map(&self, component: &str) -> Result<Map2D, FitError> {
        let c = self.gaussian(component)?;
        Ok(self.map(
            self.plane(c.first_param + WIDTH)
                .iter()
                .map(|&w| gaussian_fwhm(w))
                .collect(),
        ))
    }

    /// Evaluate the stored fit at `(x, y)` on `wavelength`.
    pub fn fit_profile(
        &self,
        template: &Template,
        wavelength: &[f64],
        x: usize,
        y: usize,
    ) -> Result<FitProfile, FitError> {
        if template.param_names() != self.param_names.as_slice() {
            return Err(FitError::dimension(
                "template parameters",
                self.param_names.len(),
                template.param_count(),
            ));
        }
        let outcome = self.outcome(x, y)?;
        let params = &outcome.params.values;

        let components = (0..template.components().len())
            .map(|k| {
                wavelength
                    .iter()
                    .map(|&w| template.evaluate_component(k, w, params))
                    .collect()
            })
            .collect();
        let total = wavelength.iter().map(|&w| template.evaluate(w, params)).collect();

        Ok(FitProfile {
            wavelength: wavelength.to_vec(),
            total,
            components,
        })
    }

    fn pixel_index(&self, x: usize, y: usize) -> Result<usize, FitError> {
        if x >= self.nx || y >= self.ny {
            return Err(FitError::InvalidConfig(format!(
                "pixel ({x}, {y}) outside {}x{} result",
                self.nx, self.ny
            )));
        }
        Ok(y * self.nx + x)
    }

    fn plane(&self, j: usize) -> &[f64] {
        let n = self.n_pixels();
        &self.values[j * n..(j + 1) * n]
    }

    fn gaussian(&self, name: &str) -> Result<&ComponentSummary, FitError> {
        let c = self
            .components
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| FitError::UnknownParameter(format!("{name}.centroid")))?;
        if !c.is_gaussian() {
            return Err(FitError::InvalidConfig(format!(
                "component '{name}' is a {}, not a gaussian",
                c.kind
            )));
        }
        Ok(c)
    }

    fn map(&self, values: Vec<f64>) -> Map2D {
        Map2D {
            nx: self.nx,
            ny: self.ny,
            values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::TemplateBuilder;

    fn template() -> Template {
        TemplateBuilder::new("t")
            .gaussian("line", None, 1.0, 195.0, 0.05)
            .polynomial("bg", 195.0, &[0.0])
            .build()
            .unwrap()
    }

    fn outcome(values: [f64; 4], status: StatusCode) -> PixelFitOutcome {
        PixelFitOutcome {
            params: FitParameters {
                values: values.to_vec(),
                uncertainties: vec![0.1; 4],
            },
            chi2: 8.0,
            dof: 4,
            iterations: 5,
            n_at_bound: 0,
            status,
        }
    }

    fn result() -> FitResult {
        let t = template();
        let outcomes = vec![
            outcome([10.0, 195.0, 0.05, 2.0], StatusCode::Converged),
            outcome([10.0, 195.0 * (1.0 + 10.0 / SPEED_OF_LIGHT_KMS), 0.05, 2.0], StatusCode::Converged),
            outcome([1.0, 196.0, 0.05, 2.0], StatusCode::MaxIterationsReached),
            PixelFitOutcome::masked(4),
        ];
        FitResult::from_outcomes(&t, 2, 2, &outcomes)
    }

    #[test]
    fn planes_are_parameter_major() {
        let r = result();
        assert_eq!(r.parameter_plane(1).unwrap()[1], r.parameter_map("line.centroid").unwrap().get(1, 0));
        assert_eq!(r.parameter_map("bg.c0").unwrap().values[..3], [2.0, 2.0, 2.0]);
        assert!(r.parameter_map("bg.c0").unwrap().values[3].is_nan());
        assert!(r.parameter_plane(4).is_none());
        assert!(matches!(r.parameter_map("line.sigma"), Err(FitError::UnknownParameter(_))));

        let o = r.outcome(0, 1).unwrap();
        assert_eq!(o.status, StatusCode::MaxIterationsReached);
        assert_eq!(o.params.values[1], 196.0);
        assert!(r.outcome(2, 0).is_err());
    }

    #[test]
    fn statistic_maps() {
        let r = result();
        assert_eq!(r.reduced_chi2_map().get(0, 0), 2.0);
        assert!(r.reduced_chi2_map().get(1, 1).is_nan());
        assert_eq!(r.iterations_map().get(1, 0), 5.0);
        assert_eq!(r.status_code_map().get(1, 1), StatusCode::InputMasked.code() as f64);

        let counts = r.status_counts();
        assert_eq!(counts[&StatusCode::Converged], 2);
        assert_eq!(counts[&StatusCode::InputMasked], 1);
        assert_eq!(counts[&StatusCode::NotFitted], 0);
    }

    #[test]
    fn velocity_uses_converged_pixels_only() {
        let r = result();
        let v = r.velocity_map("line", None).unwrap();
        assert!(v.get(0, 0).abs() < 1e-9);
        assert!((v.get(1, 0) - 10.0).abs() < 1e-6);
        assert!(v.get(0, 1).is_nan());
        assert!(v.get(1, 1).is_nan());

        assert!(r.velocity_map("bg", None).is_err());
        assert!(r.velocity_map("missing", None).is_err());
        assert!(r.velocity_map("line", Some(0.0)).is_err());
    }

    #[test]
    fn intensity_and_fwhm() {
        let r = result();
        let i = r.intensity_map("line").unwrap();
        let expected = 10.0 * 0.05 * (2.0 * std::f64::consts::PI).sqrt();
        assert!((i.get(0, 0) - expected).abs() < 1e-12);

        let f = r.fwhm_map("line").unwrap();
        assert!((f.get(0, 0) - 0.05 * 2.354_820_045).abs() < 1e-8);
    }

    #[test]
    fn profile_matches_template_evaluation() {
        let r = result();
        let t = template();
        let wave = [194.9, 195.0, 195.1];
        let p = r.fit_profile(&t, &wave, 0, 0).unwrap();
        assert_eq!(p.components.len(), 2);
        assert!((p.total[1] - 12.0).abs() < 1e-12);
        for i in 0..3 {
            assert!((p.components[0][i] + p.components[1][i] - p.total[i]).abs() < 1e-12);
        }
    }
}
