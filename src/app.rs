//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments and sets up logging
//! - dispatches to `fit`, `synth`, `inspect` and `map`
//! - prints reports/plots
//! - writes optional exports

use std::fs::File;

use clap::Parser;
use tracing::info;

use crate::cli::{Cli, Command, FitArgs, InspectArgs, MapArgs, MapKind, SynthArgs, WidthMode};
use crate::data::{SynthOptions, generate_cube};
use crate::domain::{CubeView, FitConfig};
use crate::error::AppError;
use crate::fit::{FitResult, GuessOptions, Map2D, SolverOptions, WidthEstimate};
use crate::io::{load_fit, read_cube, read_template, write_cube, write_map_csv};

pub mod pipeline;

/// Entry point for the `cubefit` binary.
pub fn run() -> Result<(), AppError> {
    // A missing .env is fine; it only supplies CUBEFIT_LOG / RUST_LOG.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    crate::logging::setup_logging(&cli.log_level)?;

    match cli.command {
        Command::Fit(args) => handle_fit(args),
        Command::Synth(args) => handle_synth(args),
        Command::Inspect(args) => handle_inspect(args),
        Command::Map(args) => handle_map(args),
    }
}

fn handle_fit(args: FitArgs) -> Result<(), AppError> {
    let config = fit_config_from_args(&args)?;
    let run = pipeline::run_fit(&config)?;

    if config.summary {
        println!(
            "{}",
            crate::report::format_run_summary(&run.result, &config, run.elapsed)
        );
    }
    Ok(())
}

fn handle_synth(args: SynthArgs) -> Result<(), AppError> {
    let template = read_template(&args.template)?;
    let options = SynthOptions {
        nx: args.nx,
        ny: args.ny,
        n_wave: args.n_wave,
        wave_range: args.wave_min.zip(args.wave_max),
        noise: args.noise,
        variation: args.variation,
        masked_fraction: args.masked_fraction,
        missing_fraction: args.missing_fraction,
        seed: args.seed,
    };
    let synth = generate_cube(&template, &options)?;
    write_cube(&args.output, &synth.cube)?;

    let (nx, ny) = synth.cube.shape();
    info!(path = %args.output.display(), nx, ny, "synthetic cube written");
    Ok(())
}

fn handle_inspect(args: InspectArgs) -> Result<(), AppError> {
    let template = read_template(&args.template)?;
    println!("{}", crate::report::format_template(&template));

    let (Some(result_path), Some(cube_path), Some(x), Some(y)) = (&args.result, &args.cube, args.x, args.y) else {
        return Ok(());
    };

    let result = load_fit(result_path)?;
    let cube = read_cube(cube_path)?;
    if result.shape() != cube.shape() {
        return Err(AppError::new(
            4,
            format!(
                "Result shape {:?} does not match cube shape {:?}.",
                result.shape(),
                cube.shape()
            ),
        ));
    }

    let outcome = result.outcome(x, y)?;
    println!("{}", crate::report::format_pixel(&result, x, y, &outcome));

    let profile = result.fit_profile(&template, cube.wavelength(), x, y)?;
    let spectrum = cube.spectrum_at(x, y);
    println!(
        "{}",
        crate::plot::render_profile(&spectrum, &profile, args.width, args.height)
    );
    Ok(())
}

fn handle_map(args: MapArgs) -> Result<(), AppError> {
    let result = load_fit(&args.result)?;
    let (map, title) = select_map(&result, &args)?;

    match &args.csv {
        Some(path) => {
            let file = File::create(path)
                .map_err(|e| AppError::new(2, format!("Failed to create map CSV '{}': {e}", path.display())))?;
            write_map_csv(file, &title, &map)?;
            info!(path = %path.display(), map = %title, "map exported");
        }
        None => println!("{}", crate::plot::render_map(&map, &title)),
    }
    Ok(())
}

fn select_map(result: &FitResult, args: &MapArgs) -> Result<(Map2D, String), AppError> {
    let name = || {
        args.name
            .clone()
            .ok_or_else(|| AppError::new(2, format!("--name is required for --kind {:?}.", args.kind)))
    };

    let out = match args.kind {
        MapKind::Param => {
            let n = name()?;
            (result.parameter_map(&n)?, n)
        }
        MapKind::Error => {
            let n = name()?;
            (result.uncertainty_map(&n)?, format!("{n}.err"))
        }
        MapKind::Velocity => {
            let n = name()?;
            (result.velocity_map(&n, args.rest)?, format!("{n}.velocity_kms"))
        }
        MapKind::Intensity => {
            let n = name()?;
            (result.intensity_map(&n)?, format!("{n}.intensity"))
        }
        MapKind::Fwhm => {
            let n = name()?;
            (result.fwhm_map(&n)?, format!("{n}.fwhm"))
        }
        MapKind::Chi2 => (result.chi2_map(), "chi2".to_string()),
        MapKind::ReducedChi2 => (result.reduced_chi2_map(), "reduced_chi2".to_string()),
        MapKind::Status => (result.status_code_map(), "status".to_string()),
        MapKind::Iterations => (result.iterations_map(), "iterations".to_string()),
    };
    Ok(out)
}

pub fn fit_config_from_args(args: &FitArgs) -> Result<FitConfig, AppError> {
    let width = match args.width_estimate {
        WidthMode::Fraction => {
            if !(args.width_fraction.is_finite() && args.width_fraction > 0.0) {
                return Err(AppError::new(
                    2,
                    format!("--width-fraction must be > 0, got {}.", args.width_fraction),
                ));
            }
            WidthEstimate::Fraction(args.width_fraction)
        }
        WidthMode::Template => WidthEstimate::Template,
        WidthMode::Moment => WidthEstimate::Moment,
    };

    let solver = SolverOptions {
        max_iterations: args.max_iterations,
        tolerance: args.tolerance,
        initial_lambda: args.initial_lambda,
        ..SolverOptions::default()
    };
    solver.validate()?;

    Ok(FitConfig {
        cube_path: args.cube.clone(),
        template_path: args.template.clone(),
        output: args.output.clone(),
        export_dir: args.export_dir.clone(),
        jobs: args.jobs,
        solver,
        guess: GuessOptions { width },
        summary: !args.no_summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fit_args(extra: &[&str]) -> FitArgs {
        let mut argv = vec!["cubefit", "fit", "--cube", "c.json", "--template", "t.json"];
        argv.extend_from_slice(extra);
        match Cli::parse_from(argv).command {
            Command::Fit(a) => a,
            _ => panic!("expected fit"),
        }
    }

    #[test]
    fn config_from_args_maps_solver_and_guess_options() {
        let cfg = fit_config_from_args(&fit_args(&["--max-iterations", "50", "--width-estimate", "moment", "-j", "3"]))
            .unwrap();
        assert_eq!(cfg.solver.max_iterations, 50);
        assert_eq!(cfg.guess.width, WidthEstimate::Moment);
        assert_eq!(cfg.jobs, 3);
        assert!(cfg.summary);
    }

    #[test]
    fn invalid_options_exit_with_code_2() {
        let err = fit_config_from_args(&fit_args(&["--width-fraction", "0"])).unwrap_err();
        assert_eq!(err.exit_code(), 2);

        let err = fit_config_from_args(&fit_args(&["--max-iterations", "0"])).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
