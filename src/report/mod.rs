//! Reporting utilities: residuals, largest deviations, and formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the math/fitting code stays clean and testable
//! - output changes are localized

use crate::domain::{CurveParams, Observations};
use crate::error::{FitError, FitResult};

mod format;

pub use format::*;

/// One observation against the fitted curve.
#[derive(Debug, Clone, PartialEq)]
pub struct Residual {
    /// Row position in the observation set.
    pub index: usize,
    pub x: f64,
    pub y_obs: f64,
    pub y_fit: f64,
    pub residual: f64,
}

/// Compute fitted values and residuals for each observation.
pub fn compute_residuals(obs: &Observations, params: &CurveParams) -> FitResult<Vec<Residual>> {
    let mut out = Vec::with_capacity(obs.len());
    for (index, (&x, &y_obs)) in obs.x().iter().zip(obs.y()).enumerate() {
        let y_fit = params.evaluate(x);
        if !y_fit.is_finite() {
            return Err(FitError::FitDivergence(format!(
                "non-finite {} prediction at x={x}",
                params.kind.display_name()
            )));
        }
        out.push(Residual {
            index,
            x,
            y_obs,
            y_fit,
            residual: y_obs - y_fit,
        });
    }
    Ok(out)
}

/// The `top_n` observations furthest from the curve, largest first.
pub fn largest_residuals(residuals: &[Residual], top_n: usize) -> Vec<Residual> {
    let mut sorted = residuals.to_vec();
    sorted.sort_by(|a, b| b.residual.abs().total_cmp(&a.residual.abs()));
    sorted.truncate(top_n);
    sorted
}
