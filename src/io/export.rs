//! CSV exports.
//!
//! Meant to be easy to consume in spreadsheets or downstream scripts: one row
//! per pixel, empty cells for missing values.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::FitError;
use crate::fit::{FitResult, Map2D};
use crate::io::io_error;

fn cell(v: f64) -> String {
    if v.is_finite() { format!("{v:.10}") } else { String::new() }
}

fn csv_error(e: csv::Error) -> FitError {
    FitError::format("CSV export", e)
}

/// Write one map as `x,y,<column>`.
pub fn write_map_csv<W: Write>(writer: W, column: &str, map: &Map2D) -> Result<(), FitError> {
    let mut w = csv::Writer::from_writer(writer);
    w.write_record(["x", "y", column]).map_err(csv_error)?;
    for y in 0..map.ny {
        for x in 0..map.nx {
            w.write_record([x.to_string(), y.to_string(), cell(map.get(x, y))])
                .map_err(csv_error)?;
        }
    }
    w.flush().map_err(|e| FitError::format("CSV export", e))
}

/// Write every parameter, its uncertainty and the fit statistics per pixel.
pub fn write_result_csv<W: Write>(writer: W, result: &FitResult) -> Result<(), FitError> {
    let mut w = csv::Writer::from_writer(writer);

    let mut header = vec!["x".to_string(), "y".to_string()];
    for name in result.param_names() {
        header.push(name.clone());
        header.push(format!("{name}.err"));
    }
    header.extend(["chi2", "reduced_chi2", "iterations", "status"].map(String::from));
    w.write_record(&header).map_err(csv_error)?;

    let (nx, ny) = result.shape();
    let reduced = result.reduced_chi2_map();
    let chi2 = result.chi2_map();
    for y in 0..ny {
        for x in 0..nx {
            let o = result.outcome(x, y)?;
            let mut row = vec![x.to_string(), y.to_string()];
            for (v, e) in o.params.values.iter().zip(&o.params.uncertainties) {
                row.push(cell(*v));
                row.push(cell(*e));
            }
            row.push(cell(chi2.get(x, y)));
            row.push(cell(reduced.get(x, y)));
            row.push(o.iterations.to_string());
            row.push(o.status.label().to_string());
            w.write_record(&row).map_err(csv_error)?;
        }
    }
    w.flush().map_err(|e| FitError::format("CSV export", e))
}

/// Export the per-pixel table plus one map per parameter into `dir`.
///
/// Returns the files written.
pub fn export_result_dir(dir: &Path, result: &FitResult) -> Result<Vec<PathBuf>, FitError> {
    std::fs::create_dir_all(dir).map_err(|e| io_error(dir, e))?;
    let mut written = Vec::new();

    let table = dir.join("pixels.csv");
    write_result_csv(File::create(&table).map_err(|e| io_error(&table, e))?, result)?;
    written.push(table);

    for name in result.param_names() {
        let path = dir.join(format!("{name}.csv"));
        let map = result.parameter_map(name)?;
        write_map_csv(File::create(&path).map_err(|e| io_error(&path, e))?, name, &map)?;
        written.push(path);
    }

    let path = dir.join("status.csv");
    write_map_csv(
        File::create(&path).map_err(|e| io_error(&path, e))?,
        "status",
        &result.status_code_map(),
    )?;
    written.push(path);

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FitParameters, PixelFitOutcome, StatusCode};
    use crate::template::TemplateBuilder;

    fn result() -> FitResult {
        let t = TemplateBuilder::new("t")
            .polynomial("bg", 0.0, &[1.0])
            .build()
            .unwrap();
        let ok = PixelFitOutcome {
            params: FitParameters {
                values: vec![2.5],
                uncertainties: vec![0.5],
            },
            chi2: 4.0,
            dof: 2,
            iterations: 3,
            n_at_bound: 0,
            status: StatusCode::Converged,
        };
        FitResult::from_outcomes(&t, 2, 1, &[ok, PixelFitOutcome::masked(1)])
    }

    #[test]
    fn map_csv_has_one_row_per_pixel() {
        let mut buf = Vec::new();
        let r = result();
        write_map_csv(&mut buf, "bg.c0", &r.parameter_map("bg.c0").unwrap()).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["x,y,bg.c0", "0,0,2.5000000000", "1,0,"]);
    }

    #[test]
    fn result_csv_lists_parameters_and_status() {
        let mut buf = Vec::new();
        write_result_csv(&mut buf, &result()).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("x,y,bg.c0,bg.c0.err,chi2,reduced_chi2,iterations,status")
        );
        assert_eq!(
            lines.next(),
            Some("0,0,2.5000000000,0.5000000000,4.0000000000,2.0000000000,3,converged")
        );
        assert_eq!(lines.next(), Some("1,0,,,,,0,input_masked"));
    }
}
