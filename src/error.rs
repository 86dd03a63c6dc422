//! Error types.
//!
//! Two layers:
//!
//! - `FitError`: typed library errors. These are *structural* failures (bad
//!   template, malformed cube, unreadable file) that abort a whole run.
//!   Per-pixel numerical trouble is never an error; it is recorded as a
//!   `StatusCode` in the fit result.
//! - `AppError`: what the `cubefit` binary reports, carrying a process exit code.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FitError {
    /// Structural defect in a template (tie cycle, bad bounds, ...).
    #[error("invalid template: {0}")]
    InvalidTemplate(String),

    /// A spectrum (or mask/uncertainty plane) disagrees with the cube shape.
    #[error("dimension mismatch in {what}: expected {expected}, found {found}")]
    DimensionMismatch {
        what: String,
        expected: usize,
        found: usize,
    },

    /// A parameter name that the template does not define.
    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),

    /// Invalid run configuration (solver options, pixel coordinates, ...).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed {what}: {message}")]
    Format { what: String, message: String },
}

impl FitError {
    pub fn invalid_template(message: impl Into<String>) -> Self {
        FitError::InvalidTemplate(message.into())
    }

    pub fn dimension(what: impl Into<String>, expected: usize, found: usize) -> Self {
        FitError::DimensionMismatch {
            what: what.into(),
            expected,
            found,
        }
    }

    pub fn format(what: impl Into<String>, message: impl std::fmt::Display) -> Self {
        FitError::Format {
            what: what.into(),
            message: message.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl From<FitError> for AppError {
    fn from(err: FitError) -> Self {
        // 2 = bad input/config, 3 = template, 4 = data/fit.
        let exit_code = match &err {
            FitError::InvalidConfig(_) | FitError::Io { .. } | FitError::Format { .. } => 2,
            FitError::InvalidTemplate(_) | FitError::UnknownParameter(_) => 3,
            FitError::DimensionMismatch { .. } => 4,
        };
        AppError::new(exit_code, err.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_errors_map_to_exit_codes() {
        let e: AppError = FitError::invalid_template("cycle").into();
        assert_eq!(e.exit_code(), 3);
        assert!(e.to_string().contains("cycle"));

        let e: AppError = FitError::dimension("spectrum", 10, 9).into();
        assert_eq!(e.exit_code(), 4);

        let e: AppError = FitError::InvalidConfig("tolerance".into()).into();
        assert_eq!(e.exit_code(), 2);
    }
}
