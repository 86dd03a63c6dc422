//! Cube-level fitting: estimate + solve for every pixel.
//!
//! All structural checks (solver options, wavelength axis, spectrum lengths,
//! mask shape) run before any pixel is touched, so a run either fails up front
//! or produces a complete `FitResult`. From then on per-pixel trouble is only
//! ever recorded as a status.
//!
//! Pixels are fitted on a dedicated rayon pool. Each pixel owns one result
//! slot, and each worker owns one `SolverWorkspace`; the fit of a pixel depends
//! only on its own spectrum, so results are identical for any worker count.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use rayon::prelude::*;
use tracing::{info, warn};

use crate::domain::{CubeView, PixelFitOutcome, PixelMask, StatusCode, check_wavelength_axis};
use crate::error::FitError;
use crate::fit::{
    FitResult, GuessOptions, LevenbergMarquardt, PixelSolver, SolverOptions, SolverWorkspace,
    estimate_initial,
};
use crate::template::Template;

/// Fraction of fitted pixels failing to converge above which a run is flagged.
const FAILURE_WARN_FRACTION: f64 = 0.5;

/// Cooperative cancellation flag, checked between pixels.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FitOptions {
    pub solver: SolverOptions,
    pub guess: GuessOptions,
    /// Worker threads (0 = one per core).
    pub jobs: usize,
}

/// Fit every pixel of `cube` with the Levenberg-Marquardt solver.
///
/// Only `mask` decides which pixels are skipped; a mask stored on the cube is
/// not consulted, so pass `cube.mask()` to honor it.
pub fn fit_cube<C: CubeView>(
    cube: &C,
    template: &Template,
    mask: Option<&PixelMask>,
    options: &FitOptions,
) -> Result<FitResult, FitError> {
    options.solver.validate()?;
    CubeFitter::new(LevenbergMarquardt::new(options.solver.clone()))
        .with_guess(options.guess)
        .with_jobs(options.jobs)
        .fit(cube, template, mask)
}

/// Cube fitter generic over the per-pixel solver.
pub struct CubeFitter<S> {
    solver: S,
    guess: GuessOptions,
    jobs: usize,
    cancel: Option<CancelToken>,
    progress: Option<Arc<AtomicUsize>>,
}

impl<S: PixelSolver> CubeFitter<S> {
    pub fn new(solver: S) -> Self {
        Self {
            solver,
            guess: GuessOptions::default(),
            jobs: 0,
            cancel: None,
            progress: None,
        }
    }

    pub fn with_guess(mut self, guess: GuessOptions) -> Self {
        self.guess = guess;
        self
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Counter incremented once per finished pixel (masked pixels included).
    pub fn with_progress(mut self, counter: Arc<AtomicUsize>) -> Self {
        self.progress = Some(counter);
        self
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }

    pub fn fit<C: CubeView>(
        &self,
        cube: &C,
        template: &Template,
        mask: Option<&PixelMask>,
    ) -> Result<FitResult, FitError> {
        let (nx, ny) = cube.shape();
        validate(cube, mask)?;

        let n_params = template.param_count();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.jobs)
            .build()
            .map_err(|e| FitError::InvalidConfig(format!("worker pool: {e}")))?;

        info!(
            template = template.name(),
            nx,
            ny,
            params = n_params,
            workers = pool.current_num_threads(),
            "fitting cube"
        );

        let mut slots: Vec<PixelFitOutcome> = (0..nx * ny)
            .map(|_| PixelFitOutcome::skipped(n_params, StatusCode::NotFitted))
            .collect();

        pool.install(|| {
            slots
                .par_iter_mut()
                .enumerate()
                .for_each_init(SolverWorkspace::new, |ws, (pix, slot)| {
                    if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                        return;
                    }
                    let (x, y) = (pix % nx, pix / nx);
                    *slot = self.fit_one(cube, template, mask, x, y, ws);
                    if let Some(p) = &self.progress {
                        p.fetch_add(1, Ordering::Relaxed);
                    }
                });
        });

        let result = FitResult::from_outcomes(template, nx, ny, &slots);
        let counts = result.status_counts();
        let not_fitted = counts[&StatusCode::NotFitted];
        let masked = counts[&StatusCode::InputMasked];
        let converged = counts[&StatusCode::Converged];
        let attempted = nx * ny - not_fitted - masked;

        if not_fitted > 0 {
            warn!(not_fitted, "fit cancelled before every pixel was reached");
        }
        if attempted > 0 {
            let failed = attempted - converged;
            if failed as f64 / attempted as f64 > FAILURE_WARN_FRACTION {
                warn!(failed, attempted, "most fitted pixels did not converge");
            }
        }
        info!(converged, masked, attempted, "cube fit finished");

        Ok(result)
    }

    fn fit_one<C: CubeView>(
        &self,
        cube: &C,
        template: &Template,
        mask: Option<&PixelMask>,
        x: usize,
        y: usize,
        ws: &mut SolverWorkspace,
    ) -> PixelFitOutcome {
        let n_params = template.param_count();
        if mask.is_some_and(|m| m.is_masked(x, y)) {
            return PixelFitOutcome::masked(n_params);
        }
        let spectrum = cube.spectrum_at(x, y);
        if spectrum.usable_count() == 0 {
            return PixelFitOutcome::masked(n_params);
        }
        let initial = estimate_initial(&spectrum, template, &self.guess);
        self.solver.fit_pixel(template, spectrum, &initial, ws)
    }
}

fn validate<C: CubeView>(cube: &C, mask: Option<&PixelMask>) -> Result<(), FitError> {
    let (nx, ny) = cube.shape();
    if nx == 0 || ny == 0 {
        return Err(FitError::format("cube", format!("empty spatial shape {nx}x{ny}")));
    }
    check_wavelength_axis(cube.wavelength())?;

    let n_wave = cube.wavelength().len();
    for y in 0..ny {
        for x in 0..nx {
            let s = cube.spectrum_at(x, y);
            if s.wavelength.len() != n_wave {
                return Err(FitError::dimension(format!("wavelength at ({x}, {y})"), n_wave, s.wavelength.len()));
            }
            if s.intensity.len() != n_wave {
                return Err(FitError::dimension(format!("intensity at ({x}, {y})"), n_wave, s.intensity.len()));
            }
            if s.uncertainty.len() != n_wave {
                return Err(FitError::dimension(format!("uncertainty at ({x}, {y})"), n_wave, s.uncertainty.len()));
            }
        }
    }

    if let Some(m) = mask {
        let (mx, my) = m.shape();
        if (mx, my) != (nx, ny) {
            return Err(FitError::dimension("pixel mask", nx * ny, mx * my));
        }
    }
    Ok(())
}
