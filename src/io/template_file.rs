//! Template JSON files.
//!
//! Parameters are keyed by their local name inside each component
//! (`peak`, `centroid`, `width`, `c0`, ...), and ties refer to their target by
//! full name (`line.width`). Everything goes through `Template::new`, so a file
//! that loads is a valid template.
//!
//! ```json
//! {
//!   "name": "fe_xii_195",
//!   "components": [
//!     { "name": "line", "kind": "gaussian", "window": [194.9, 195.2],
//!       "params": { "peak": { "value": 10.0, "lower": 0.0 },
//!                   "centroid": { "value": 195.12 },
//!                   "width": { "value": 0.03, "lower": 0.0 } } },
//!     { "name": "bg", "kind": "polynomial", "degree": 0, "reference": 195.0,
//!       "params": { "c0": { "value": 1.0 } } }
//!   ]
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::FitError;
use crate::io::{read_json, write_json};
use crate::models::{Component, Profile};
use crate::template::{ParamSpec, Template, Tie};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateFile {
    pub name: String,
    pub components: Vec<ComponentEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentEntry {
    pub name: String,
    #[serde(flatten)]
    pub profile: Profile,
    pub params: BTreeMap<String, ParamEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamEntry {
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper: Option<f64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub fixed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tie: Option<TieEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TieEntry {
    /// Full name of the target parameter (`component.param`).
    pub target: String,
    #[serde(default = "unit_scale")]
    pub scale: f64,
    #[serde(default)]
    pub offset: f64,
}

fn unit_scale() -> f64 {
    1.0
}

impl TemplateFile {
    pub fn into_template(self) -> Result<Template, FitError> {
        let mut full_names = Vec::new();
        for c in &self.components {
            for k in 0..c.profile.param_count() {
                full_names.push(format!("{}.{}", c.name, c.profile.param_name(k)));
            }
        }

        let mut components = Vec::with_capacity(self.components.len());
        let mut params = Vec::with_capacity(full_names.len());
        for entry in self.components {
            let mut remaining = entry.params;
            for k in 0..entry.profile.param_count() {
                let local = entry.profile.param_name(k);
                let p = remaining.remove(&local).ok_or_else(|| {
                    FitError::invalid_template(format!("{}: missing parameter '{local}'", entry.name))
                })?;
                params.push(param_spec(p, &full_names)?);
            }
            if let Some(extra) = remaining.keys().next() {
                return Err(FitError::UnknownParameter(format!("{}.{extra}", entry.name)));
            }
            components.push(Component {
                name: entry.name,
                profile: entry.profile,
            });
        }

        Template::new(self.name, components, params)
    }

    pub fn from_template(template: &Template) -> Self {
        let names = template.param_names();
        let components = template
            .components()
            .iter()
            .enumerate()
            .map(|(k, c)| {
                let params = template
                    .component_range(k)
                    .enumerate()
                    .map(|(local, j)| {
                        let spec = &template.params()[j];
                        let entry = ParamEntry {
                            value: spec.value,
                            lower: spec.lower.is_finite().then_some(spec.lower),
                            upper: spec.upper.is_finite().then_some(spec.upper),
                            fixed: spec.fixed,
                            tie: spec.tie.map(|t| TieEntry {
                                target: names[t.target].clone(),
                                scale: t.scale,
                                offset: t.offset,
                            }),
                        };
                        (c.profile.param_name(local), entry)
                    })
                    .collect();
                ComponentEntry {
                    name: c.name.clone(),
                    profile: c.profile.clone(),
                    params,
                }
            })
            .collect();

        Self {
            name: template.name().to_string(),
            components,
        }
    }
}

fn param_spec(p: ParamEntry, names: &[String]) -> Result<ParamSpec, FitError> {
    let tie = match p.tie {
        Some(t) => {
            let target = names
                .iter()
                .position(|n| *n == t.target)
                .ok_or(FitError::UnknownParameter(t.target))?;
            Some(Tie::linear(target, t.scale, t.offset))
        }
        None => None,
    };
    Ok(ParamSpec {
        value: p.value,
        lower: p.lower.unwrap_or(f64::NEG_INFINITY),
        upper: p.upper.unwrap_or(f64::INFINITY),
        fixed: p.fixed,
        tie,
    })
}

pub fn read_template(path: &Path) -> Result<Template, FitError> {
    let file: TemplateFile = read_json(path, "template JSON")?;
    file.into_template()
}

pub fn write_template(path: &Path, template: &Template) -> Result<(), FitError> {
    write_json(path, "template JSON", &TemplateFile::from_template(template))
}
