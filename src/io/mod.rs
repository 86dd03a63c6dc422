//! Input/output helpers.
//!
//! - template JSON read/write (`template_file`)
//! - cube JSON read/write (`cube_file`)
//! - fit result JSON save/load (`result_file`)
//! - CSV exports of maps and per-pixel tables (`export`)
//!
//! JSON has no NaN or infinity, so missing numbers travel as `null` and
//! unbounded parameter limits are simply omitted.

pub mod cube_file;
pub mod export;
pub mod result_file;
pub mod template_file;

pub use cube_file::*;
pub use export::*;
pub use result_file::*;
pub use template_file::*;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::FitError;

fn io_error(path: &Path, source: std::io::Error) -> FitError {
    FitError::Io {
        path: path.display().to_string(),
        source,
    }
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path, what: &str) -> Result<T, FitError> {
    let file = File::open(path).map_err(|e| io_error(path, e))?;
    serde_json::from_reader(std::io::BufReader::new(file)).map_err(|e| FitError::format(what, e))
}

pub(crate) fn write_json<T: Serialize>(path: &Path, what: &str, value: &T) -> Result<(), FitError> {
    let file = File::create(path).map_err(|e| io_error(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value).map_err(|e| FitError::format(what, e))?;
    writer.flush().map_err(|e| io_error(path, e))
}

pub(crate) fn nan_to_none(values: &[f64]) -> Vec<Option<f64>> {
    values.iter().map(|&v| v.is_finite().then_some(v)).collect()
}

pub(crate) fn none_to_nan(values: Vec<Option<f64>>) -> Vec<f64> {
    values.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect()
}
