//! Command-line parsing for `cubefit`.
//!
//! The goal of this module is to keep **argument parsing** separate from
//! command dispatch (`app`) and from the fitting engine.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "cubefit", version, about = "Template-driven line fitting for spectral cubes")]
pub struct Cli {
    /// Default log filter when neither CUBEFIT_LOG nor RUST_LOG is set.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit every pixel of a cube with a template and save the result.
    Fit(FitArgs),
    /// Generate a synthetic cube from a template.
    Synth(SynthArgs),
    /// Show a template, or one pixel of a saved fit result.
    Inspect(InspectArgs),
    /// Render or export a 2-D map from a saved fit result.
    Map(MapArgs),
}

/// Initial width estimate for Gaussian components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WidthMode {
    /// Fixed fraction of the line window (see --width-fraction).
    Fraction,
    /// Template literal.
    Template,
    /// Second moment of the line window.
    Moment,
}

#[derive(Debug, Args, Clone)]
pub struct FitArgs {
    /// Cube JSON file.
    #[arg(long, value_name = "JSON")]
    pub cube: PathBuf,

    /// Template JSON file.
    #[arg(long, value_name = "JSON")]
    pub template: PathBuf,

    /// Where to save the fit result JSON.
    #[arg(short = 'o', long, value_name = "JSON")]
    pub output: Option<PathBuf>,

    /// Directory for CSV exports (per-pixel table + one map per parameter).
    #[arg(long, value_name = "DIR")]
    pub export_dir: Option<PathBuf>,

    /// Worker threads (0 = one per core).
    #[arg(short = 'j', long, default_value_t = 0)]
    pub jobs: usize,

    /// Maximum Levenberg-Marquardt iterations per pixel.
    #[arg(long, default_value_t = 200)]
    pub max_iterations: usize,

    /// Convergence tolerance (relative chi2 decrease / relative step).
    #[arg(long, default_value_t = 1e-10)]
    pub tolerance: f64,

    /// Initial damping factor.
    #[arg(long, default_value_t = 1e-3)]
    pub initial_lambda: f64,

    #[arg(long, value_enum, default_value_t = WidthMode::Fraction)]
    pub width_estimate: WidthMode,

    /// Window fraction used by `--width-estimate fraction`.
    #[arg(long, default_value_t = 0.1)]
    pub width_fraction: f64,

    /// Skip the terminal summary.
    #[arg(long)]
    pub no_summary: bool,
}

#[derive(Debug, Args, Clone)]
pub struct SynthArgs {
    /// Template JSON file the cube is generated from.
    #[arg(long, value_name = "JSON")]
    pub template: PathBuf,

    /// Output cube JSON file.
    #[arg(short = 'o', long, value_name = "JSON")]
    pub output: PathBuf,

    #[arg(long, default_value_t = 16)]
    pub nx: usize,

    #[arg(long, default_value_t = 16)]
    pub ny: usize,

    /// Samples per spectrum.
    #[arg(long, default_value_t = 48)]
    pub n_wave: usize,

    /// Lower end of the wavelength axis (defaults to the padded line windows).
    #[arg(long, requires = "wave_max")]
    pub wave_min: Option<f64>,

    #[arg(long, requires = "wave_min")]
    pub wave_max: Option<f64>,

    /// Noise standard deviation.
    #[arg(long, default_value_t = 0.2)]
    pub noise: f64,

    /// Relative per-pixel jitter of the true parameters.
    #[arg(long, default_value_t = 0.1)]
    pub variation: f64,

    /// Probability that a pixel is masked.
    #[arg(long, default_value_t = 0.0)]
    pub masked_fraction: f64,

    /// Probability that a sample is missing.
    #[arg(long, default_value_t = 0.0)]
    pub missing_fraction: f64,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

#[derive(Debug, Args, Clone)]
pub struct InspectArgs {
    /// Template JSON file.
    #[arg(long, value_name = "JSON")]
    pub template: PathBuf,

    /// Fit result JSON; with --cube, -x and -y shows one pixel.
    #[arg(long, value_name = "JSON", requires_all = ["cube", "x", "y"])]
    pub result: Option<PathBuf>,

    /// Cube JSON the result was fitted on.
    #[arg(long, value_name = "JSON")]
    pub cube: Option<PathBuf>,

    #[arg(short = 'x', long)]
    pub x: Option<usize>,

    #[arg(short = 'y', long)]
    pub y: Option<usize>,

    /// Plot width (columns).
    #[arg(long, default_value_t = 80)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 20)]
    pub height: usize,
}

/// Which map to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MapKind {
    /// A fitted parameter (`--name component.param`).
    Param,
    /// 1-sigma uncertainty of a parameter.
    Error,
    /// Doppler velocity of a Gaussian (`--name component`).
    Velocity,
    /// Integrated intensity of a Gaussian.
    Intensity,
    /// FWHM of a Gaussian.
    Fwhm,
    Chi2,
    ReducedChi2,
    Status,
    Iterations,
}

#[derive(Debug, Args, Clone)]
pub struct MapArgs {
    /// Fit result JSON file.
    #[arg(long, value_name = "JSON")]
    pub result: PathBuf,

    #[arg(long, value_enum, default_value_t = MapKind::Param)]
    pub kind: MapKind,

    /// Parameter (`component.param`) or component name, depending on --kind.
    #[arg(long)]
    pub name: Option<String>,

    /// Rest wavelength for velocity maps (defaults to the template centroid).
    #[arg(long)]
    pub rest: Option<f64>,

    /// Write the map as CSV instead of rendering it.
    #[arg(long, value_name = "CSV")]
    pub csv: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fit_with_defaults() {
        let cli = Cli::parse_from(["cubefit", "fit", "--cube", "c.json", "--template", "t.json"]);
        assert_eq!(cli.log_level, "info");
        let Command::Fit(args) = cli.command else {
            panic!("expected fit");
        };
        assert_eq!(args.jobs, 0);
        assert_eq!(args.max_iterations, 200);
        assert_eq!(args.width_estimate, WidthMode::Fraction);
        assert!(args.output.is_none());
    }

    #[test]
    fn parses_map_kind_and_global_log_level() {
        let cli = Cli::parse_from([
            "cubefit", "map", "--result", "r.json", "--kind", "reduced-chi2", "--log-level", "debug",
        ]);
        assert_eq!(cli.log_level, "debug");
        let Command::Map(args) = cli.command else {
            panic!("expected map");
        };
        assert_eq!(args.kind, MapKind::ReducedChi2);
    }

    #[test]
    fn wave_range_needs_both_ends() {
        let res = Cli::try_parse_from([
            "cubefit", "synth", "--template", "t.json", "-o", "c.json", "--wave-min", "194.0",
        ]);
        assert!(res.is_err());
    }
}
