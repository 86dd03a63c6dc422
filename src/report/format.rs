//! Formatted terminal output for `cubefit`.

use std::time::Duration;

use crate::domain::{FitConfig, PixelFitOutcome, StatusCode};
use crate::fit::FitResult;
use crate::report::{ParamSummary, summarize_parameters};
use crate::template::{ParamRole, Template};

/// Format the full run summary (status counts + parameter table).
pub fn format_run_summary(result: &FitResult, config: &FitConfig, elapsed: Duration) -> String {
    let mut out = String::new();
    let (nx, ny) = result.shape();

    out.push_str("=== cubefit - template fit ===\n");
    out.push_str(&format!("Cube: {}\n", config.cube_path.display()));
    out.push_str(&format!(
        "Template: {} ({})\n",
        result.template_name(),
        config.template_path.display()
    ));
    out.push_str(&format!(
        "Pixels: {} ({nx}x{ny}) | {:.2}s\n",
        result.n_pixels(),
        elapsed.as_secs_f64()
    ));

    out.push_str("\nStatus:\n");
    out.push_str(&format_status_counts(result));

    out.push_str("\nParameters (converged pixels):\n");
    out.push_str(&format_param_table(&summarize_parameters(result)));
    out
}

pub fn format_status_counts(result: &FitResult) -> String {
    let total = result.n_pixels().max(1) as f64;
    let mut out = String::new();
    for (status, n) in result.status_counts() {
        if n == 0 && status != StatusCode::Converged {
            continue;
        }
        out.push_str(&format!(
            "  {:<18} {:>8} {:>6.1}%\n",
            status.label(),
            n,
            100.0 * n as f64 / total
        ));
    }
    out
}

pub fn format_param_table(rows: &[ParamSummary]) -> String {
    let mut out = String::new();
    out.push_str(
        format!(
            "{:<28} {:>6} {:>14} {:>14} {:>14} {:>12}",
            "parameter", "n", "median", "min", "max", "median_err"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(&format!(
        "{:-<28} {:-<6} {:-<14} {:-<14} {:-<14} {:-<12}\n",
        "", "", "", "", "", ""
    ));
    for r in rows {
        out.push_str(
            format!(
                "{:<28} {:>6} {:>14} {:>14} {:>14} {:>12}",
                truncate(&r.name, 28),
                r.n,
                fmt_num(r.median),
                fmt_num(r.min),
                fmt_num(r.max),
                fmt_num(r.median_uncertainty),
            )
            .trim_end(),
        );
        out.push('\n');
    }
    out
}

/// Describe a template: components and per-parameter constraints.
pub fn format_template(template: &Template) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Template: {} | {} components | {} parameters ({} free)\n",
        template.name(),
        template.components().len(),
        template.param_count(),
        template.constraints().free_indices().len()
    ));

    let names = template.param_names();
    for (k, c) in template.components().iter().enumerate() {
        out.push_str(&format!("- {} [{}]", c.name, c.profile.kind_name()));
        if let Some((lo, hi)) = template.gaussian_window(k) {
            out.push_str(&format!(" window=[{lo:.4}, {hi:.4}]"));
        }
        out.push('\n');
        for j in template.component_range(k) {
            let spec = &template.params()[j];
            let role = match template.constraints().role(j) {
                ParamRole::Free => "free".to_string(),
                ParamRole::Fixed(v) => format!("fixed={}", fmt_num(v)),
                ParamRole::Tied { root, scale, offset } => {
                    format!("tied={} * {} + {}", fmt_num(scale), names[root], fmt_num(offset))
                }
            };
            out.push_str(&format!(
                "    {:<28} {:>14} [{}, {}] {role}\n",
                names[j],
                fmt_num(spec.value),
                fmt_num(spec.lower),
                fmt_num(spec.upper)
            ));
        }
    }
    out
}

/// One pixel's outcome with parameter values and 1-sigma errors.
pub fn format_pixel(result: &FitResult, x: usize, y: usize, outcome: &PixelFitOutcome) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Pixel ({x}, {y}): {} | chi2={} dof={} reduced={} iterations={} at_bound={}\n",
        outcome.status.label(),
        fmt_num(outcome.chi2),
        outcome.dof,
        fmt_num(outcome.reduced_chi2()),
        outcome.iterations,
        outcome.n_at_bound
    ));
    for (name, (v, e)) in result
        .param_names()
        .iter()
        .zip(outcome.params.values.iter().zip(&outcome.params.uncertainties))
    {
        out.push_str(&format!("  {:<28} {:>14} +/- {}\n", name, fmt_num(*v), fmt_num(*e)));
    }
    out
}

fn fmt_num(v: f64) -> String {
    if v.is_nan() {
        "nan".to_string()
    } else if v.is_infinite() {
        if v > 0.0 { "inf".to_string() } else { "-inf".to_string() }
    } else if v != 0.0 && (v.abs() >= 1e6 || v.abs() < 1e-3) {
        format!("{v:.4e}")
    } else {
        format!("{v:.6}")
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out = String::new();
    for (i, ch) in s.chars().enumerate() {
        if i + 1 >= max {
            break;
        }
        out.push(ch);
    }
    out.push('.');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::TemplateBuilder;

    #[test]
    fn numbers_format_compactly() {
        assert_eq!(fmt_num(f64::NAN), "nan");
        assert_eq!(fmt_num(f64::NEG_INFINITY), "-inf");
        assert_eq!(fmt_num(0.0), "0.000000");
        assert_eq!(fmt_num(195.12), "195.120000");
        assert_eq!(fmt_num(2.5e-5), "2.5000e-5");
    }

    #[test]
    fn template_listing_shows_roles() {
        let t = TemplateBuilder::new("pair")
            .gaussian("a", None, 5.0, 195.0, 0.05)
            .gaussian("b", None, 3.0, 195.5, 0.05)
            .tie("b.width", "a.width", 1.0, 0.0)
            .fix("b.peak")
            .build()
            .unwrap();
        let txt = format_template(&t);
        assert!(txt.starts_with("Template: pair | 2 components | 6 parameters (4 free)\n"));
        assert!(txt.contains("fixed=3.000000"));
        assert!(txt.contains("tied=1.000000 * a.width + 0.000000"));
    }

    #[test]
    fn truncate_marks_cut_names() {
        assert_eq!(truncate("abcdef", 4), "abc.");
        assert_eq!(truncate("abc", 4), "abc");
    }
}
