//! The `cubefit fit` workflow, kept apart from presentation:
//! read cube + template -> fit every pixel -> save / export.

use std::time::{Duration, Instant};

use tracing::info;

use crate::domain::{CubeView, FitConfig, SpectralCube};
use crate::error::AppError;
use crate::fit::{FitOptions, FitResult, fit_cube};
use crate::io::{export_result_dir, read_cube, read_template, save_fit};
use crate::template::Template;

/// All computed outputs of a single `cubefit fit` run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub cube: SpectralCube,
    pub template: Template,
    pub result: FitResult,
    pub elapsed: Duration,
}

/// Execute the full fitting pipeline, including optional save/export.
pub fn run_fit(config: &FitConfig) -> Result<RunOutput, AppError> {
    let template = read_template(&config.template_path)?;
    let cube = read_cube(&config.cube_path)?;

    let output = fit_loaded(config, cube, template)?;

    if let Some(path) = &config.output {
        save_fit(path, &output.result)?;
    }
    if let Some(dir) = &config.export_dir {
        let files = export_result_dir(dir, &output.result)?;
        info!(dir = %dir.display(), files = files.len(), "CSV export written");
    }
    Ok(output)
}

/// Fit an already loaded cube; the mask shipped with the cube is honored.
pub fn fit_loaded(config: &FitConfig, cube: SpectralCube, template: Template) -> Result<RunOutput, AppError> {
    let options = FitOptions {
        solver: config.solver.clone(),
        guess: config.guess,
        jobs: config.jobs,
    };

    let started = Instant::now();
    let result = fit_cube(&cube, &template, cube.mask(), &options)?;
    let elapsed = started.elapsed();

    let (nx, ny) = cube.shape();
    info!(
        pixels = nx * ny,
        seconds = elapsed.as_secs_f64(),
        "fit pipeline finished"
    );

    Ok(RunOutput {
        cube,
        template,
        result,
        elapsed,
    })
}
