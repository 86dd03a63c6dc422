//! Binding of a template to one spectrum, as seen by the solver.

use nalgebra::DMatrix;

use crate::domain::Spectrum;
use crate::fit::ResidualFunction;
use crate::template::Template;

/// Residual function of `template` on `spectrum`.
///
/// Parameter vectors passed in are full-length and already expanded (the
/// solver applies fixed values and ties before every evaluation).
pub struct SpectrumResiduals<'a> {
    template: &'a Template,
    spectrum: Spectrum<'a>,
    usable: usize,
}

impl<'a> SpectrumResiduals<'a> {
    pub fn new(template: &'a Template, spectrum: Spectrum<'a>) -> Self {
        let usable = spectrum.usable_count();
        Self {
            template,
            spectrum,
            usable,
        }
    }
}

impl ResidualFunction for SpectrumResiduals<'_> {
    fn n_residuals(&self) -> usize {
        self.spectrum.len()
    }

    fn n_params(&self) -> usize {
        self.template.param_count()
    }

    fn n_effective(&self) -> usize {
        self.usable
    }

    fn residuals(&self, params: &[f64], out: &mut [f64]) {
        self.template.residuals_into(&self.spectrum, params, out);
    }

    fn jacobian(&self, params: &[f64], out: &mut DMatrix<f64>) {
        self.template
            .residual_jacobian_into(&self.spectrum, params, out);
    }
}
