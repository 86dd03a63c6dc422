//! Programmatic template construction.
//!
//! Parameters are addressed by `component.param` name; names are resolved when
//! `build` is called, so constraints may reference components added later.
//!
//! Defaults: Gaussian `peak` and `width` are bounded below by zero, everything
//! else is unbounded.

use crate::error::FitError;
use crate::models::Component;
use crate::template::{ParamSpec, Template, Tie};

#[derive(Debug, Clone)]
enum Constraint {
    Bounds(String, f64, f64),
    Fix(String),
    Tie {
        param: String,
        target: String,
        scale: f64,
        offset: f64,
    },
}

#[derive(Debug, Clone)]
pub struct TemplateBuilder {
    name: String,
    components: Vec<Component>,
    params: Vec<ParamSpec>,
    constraints: Vec<Constraint>,
}

impl TemplateBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            components: Vec::new(),
            params: Vec::new(),
            constraints: Vec::new(),
        }
    }

    pub fn gaussian(
        mut self,
        name: impl Into<String>,
        window: Option<(f64, f64)>,
        peak: f64,
        centroid: f64,
        width: f64,
    ) -> Self {
        self.components.push(Component::gaussian(name, window));
        self.params.push(ParamSpec::new(peak).bounded(0.0, f64::INFINITY));
        self.params.push(ParamSpec::new(centroid));
        self.params.push(ParamSpec::new(width).bounded(0.0, f64::INFINITY));
        self
    }

    /// Polynomial background; its degree is `coefficients.len() - 1`.
    pub fn polynomial(mut self, name: impl Into<String>, reference: f64, coefficients: &[f64]) -> Self {
        let degree = coefficients.len().saturating_sub(1);
        self.components.push(Component::polynomial(name, degree, reference));
        if coefficients.is_empty() {
            self.params.push(ParamSpec::new(0.0));
        }
        self.params
            .extend(coefficients.iter().map(|&c| ParamSpec::new(c)));
        self
    }

    pub fn bounds(mut self, param: impl Into<String>, lower: f64, upper: f64) -> Self {
        self.constraints
            .push(Constraint::Bounds(param.into(), lower, upper));
        self
    }

    pub fn fix(mut self, param: impl Into<String>) -> Self {
        self.constraints.push(Constraint::Fix(param.into()));
        self
    }

    /// `param = scale * target + offset`.
    pub fn tie(
        mut self,
        param: impl Into<String>,
        target: impl Into<String>,
        scale: f64,
        offset: f64,
    ) -> Self {
        self.constraints.push(Constraint::Tie {
            param: param.into(),
            target: target.into(),
            scale,
            offset,
        });
        self
    }

    pub fn build(self) -> Result<Template, FitError> {
        let names: Vec<String> = self
            .components
            .iter()
            .flat_map(|c| {
                (0..c.profile.param_count())
                    .map(move |k| format!("{}.{}", c.name, c.profile.param_name(k)))
            })
            .collect();
        let index = |name: &str| {
            names
                .iter()
                .position(|n| n == name)
                .ok_or_else(|| FitError::invalid_template(format!("unknown parameter '{name}'")))
        };

        let mut params = self.params;
        for c in &self.constraints {
            match c {
                Constraint::Bounds(p, lo, hi) => {
                    let i = index(p)?;
                    params[i].lower = *lo;
                    params[i].upper = *hi;
                }
                Constraint::Fix(p) => {
                    params[index(p)?].fixed = true;
                }
                Constraint::Tie {
                    param,
                    target,
                    scale,
                    offset,
                } => {
                    let i = index(param)?;
                    params[i].tie = Some(Tie::linear(index(target)?, *scale, *offset));
                }
            }
        }

        Template::new(self.name, self.components, params)
    }
}
