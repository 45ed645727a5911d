//! Evaluation grid generation.
//!
//! Curves and bands are evaluated on a fixed, ordered set of x-values. Dilution
//! and concentration axes are usually geometric, so both spacings are provided.

use crate::error::{FitError, FitResult};

/// Generate `steps` evenly spaced points between `min` and `max` (inclusive).
pub fn linspace(min: f64, max: f64, steps: usize) -> FitResult<Vec<f64>> {
    check_bounds(min, max, steps)?;
    let step = (max - min) / (steps as f64 - 1.0);
    let mut out: Vec<f64> = (0..steps).map(|i| min + step * i as f64).collect();
    // Pin the endpoint exactly.
    if let Some(last) = out.last_mut() {
        *last = max;
    }
    Ok(out)
}

/// Generate `steps` log-spaced points between `min` and `max` (inclusive).
pub fn geomspace(min: f64, max: f64, steps: usize) -> FitResult<Vec<f64>> {
    check_bounds(min, max, steps)?;
    if min <= 0.0 {
        return Err(FitError::InvalidConfiguration(format!(
            "geometric grid needs a positive lower bound, got {min}"
        )));
    }

    let ln_min = min.ln();
    let ln_max = max.ln();
    let step = (ln_max - ln_min) / (steps as f64 - 1.0);

    let mut out = Vec::with_capacity(steps);
    for i in 0..steps {
        out.push((ln_min + step * i as f64).exp());
    }
    out[0] = min;
    out[steps - 1] = max;
    Ok(out)
}

fn check_bounds(min: f64, max: f64, steps: usize) -> FitResult<()> {
    if !(min.is_finite() && max.is_finite() && max > min) {
        return Err(FitError::InvalidConfiguration(format!(
            "invalid grid range: min={min}, max={max} (must be finite and max>min)"
        )));
    }
    if steps < 2 {
        return Err(FitError::InvalidConfiguration("grid steps must be >= 2".to_string()));
    }
    Ok(())
}
