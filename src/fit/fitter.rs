//! Point-estimate fitting for a single parametric model kind.
//!
//! Given:
//! - observations `(x_i, y_i)`
//! - optional weights `w_i` (integer weights behave like duplicated rows)
//! - a model kind
//!
//! we solve:
//! - a weighted OLS problem for the linear kinds (closed form)
//! - a Levenberg–Marquardt problem for 4PL and Hill, from a fixed initial guess
//!
//! and report the parameters together with residual diagnostics.

use nalgebra::{DMatrix, DVector};

use crate::domain::{CurveParams, FitQuality, ModelKind, Observations};
use crate::error::{FitError, FitResult};
use crate::math::{LmOptions, levenberg_marquardt, mean, r_squared, solve_weighted_least_squares, sse};
use crate::models::{check_domain, fill_gradient_row};

/// Fitting options that affect how each model is calibrated.
#[derive(Debug, Clone, PartialEq)]
pub struct FitOptions {
    /// Iteration cap for the nonlinear solver.
    pub max_iterations: usize,
    /// Starting parameters for 4PL/Hill. Defaults to all ones.
    pub initial: Option<Vec<f64>>,
    /// Per-observation weights. Defaults to uniform.
    pub weights: Option<Vec<f64>>,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            max_iterations: LmOptions::default().max_iterations,
            initial: None,
            weights: None,
        }
    }
}

/// Best fit for a single model kind.
#[derive(Debug, Clone, PartialEq)]
pub struct CurveFit {
    pub params: CurveParams,
    pub quality: FitQuality,
}

/// Fit `kind` to the observations.
pub fn fit_curve(kind: ModelKind, obs: &Observations, opts: &FitOptions) -> FitResult<CurveFit> {
    check_domain(kind, obs.x())?;
    let weights = resolve_weights(obs.len(), opts.weights.as_deref())?;

    let (values, iterations) = if kind.is_linear() {
        (fit_linear(kind, obs, &weights)?, 0)
    } else {
        fit_nonlinear(kind, obs, &weights, opts)?
    };

    let params = CurveParams::new(kind, values)
        .map_err(|_| FitError::FitDivergence(format!("{} fit produced non-finite parameters", kind.display_name())))?;
    let quality = quality_of(&params, obs, iterations);
    tracing::debug!(
        model = kind.display_name(),
        n = obs.len(),
        sse = quality.sse,
        r_squared = quality.r_squared,
        iterations,
        "fitted curve"
    );
    Ok(CurveFit { params, quality })
}

/// Residual diagnostics of `params` against the observations.
pub fn quality_of(params: &CurveParams, obs: &Observations, iterations: usize) -> FitQuality {
    let predicted = params.evaluate_grid(obs.x());
    let sse = sse(obs.y(), &predicted);
    FitQuality {
        sse,
        rmse: (sse / obs.len() as f64).sqrt(),
        r_squared: r_squared(obs.y(), &predicted),
        n: obs.len(),
        iterations,
    }
}

fn resolve_weights(n: usize, weights: Option<&[f64]>) -> FitResult<Vec<f64>> {
    let Some(w) = weights else {
        return Ok(vec![1.0; n]);
    };
    if w.len() != n {
        return Err(FitError::InvalidInput(format!(
            "weights length {} does not match {n} observations",
            w.len()
        )));
    }
    if w.iter().any(|v| !(v.is_finite() && *v >= 0.0)) {
        return Err(FitError::InvalidInput("weights must be finite and non-negative".to_string()));
    }
    if w.iter().all(|v| *v == 0.0) {
        return Err(FitError::InvalidInput("all weights are zero".to_string()));
    }
    Ok(w.to_vec())
}

fn fit_linear(kind: ModelKind, obs: &Observations, weights: &[f64]) -> FitResult<Vec<f64>> {
    let p = kind.param_count();
    let n = obs.len();

    // For linear kinds the gradient row is the design row.
    let zeros = vec![0.0; p];
    let mut row = vec![0.0; p];
    let mut x_mat = DMatrix::<f64>::zeros(n, p);
    for (i, &x) in obs.x().iter().enumerate() {
        fill_gradient_row(kind, x, &zeros, &mut row);
        for (j, v) in row.iter().enumerate() {
            x_mat[(i, j)] = *v;
        }
    }
    let y = DVector::from_column_slice(obs.y());

    let beta = solve_weighted_least_squares(&x_mat, &y, weights).ok_or_else(|| {
        FitError::FitDivergence(format!(
            "{} design matrix is singular (x-values do not vary)",
            kind.display_name()
        ))
    })?;
    Ok(beta.iter().copied().collect())
}

fn fit_nonlinear(
    kind: ModelKind,
    obs: &Observations,
    weights: &[f64],
    opts: &FitOptions,
) -> FitResult<(Vec<f64>, usize)> {
    let p = kind.param_count();
    let initial = match &opts.initial {
        Some(v) if v.len() != p => {
            return Err(FitError::InvalidConfiguration(format!(
                "{} expects {p} initial parameters, got {}",
                kind.display_name(),
                v.len()
            )));
        }
        Some(v) => v.clone(),
        None => vec![1.0; p],
    };

    let lm = LmOptions {
        max_iterations: opts.max_iterations,
        ..LmOptions::default()
    };
    let solution = levenberg_marquardt(obs.x(), obs.y(), Some(weights), &initial, &lm, |x, params, grad| {
        fill_gradient_row(kind, x, params, grad)
    })?;

    // Midpoint (4PL) and kd (Hill) sit in the denominator of x / c.
    if solution.params[2] == 0.0 {
        return Err(FitError::FitDivergence(format!(
            "{} converged with {} pinned to zero",
            kind.display_name(),
            kind.param_names()[2]
        )));
    }
    Ok((solution.params, solution.iterations))
}

/// Data-driven starting point for 4PL and Hill.
///
/// Asymptotes come from the mean response at the smallest and largest x, the
/// midpoint (or kd) sits at the centre of the x range and the slope starts at 1.
/// Linear kinds are solved in closed form and return `None`.
pub fn data_driven_start(kind: ModelKind, obs: &Observations) -> Option<Vec<f64>> {
    let (x_min, x_max) = obs.x_range();
    let centre = if x_min > 0.0 {
        (x_min * x_max).sqrt()
    } else {
        0.5 * (x_min + x_max)
    };
    let centre = if centre > 0.0 { centre } else { 1.0 };
    let response_at = |target: f64| {
        let hits: Vec<f64> = obs
            .x()
            .iter()
            .zip(obs.y())
            .filter(|(x, _)| **x == target)
            .map(|(_, y)| *y)
            .collect();
        mean(&hits)
    };

    match kind {
        ModelKind::Linear | ModelKind::Log2Linear => None,
        ModelKind::FourPl => Some(vec![response_at(x_min), 1.0, centre, response_at(x_max)]),
        ModelKind::Hill => Some(vec![obs.y_range().1, 1.0, centre]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::math::geomspace;
    use crate::models::predict;

    fn synthetic(kind: ModelKind, params: &[f64], x: &[f64]) -> Observations {
        let y = x.iter().map(|&v| predict(kind, v, params)).collect();
        Observations::new(x.to_vec(), y).unwrap()
    }

    #[test]
    fn log2_linear_recovers_dilution_line() {
        let x = vec![1.0, 2.0, 4.0, 8.0, 16.0, 32.0];
        let y = x.iter().map(|v: &f64| 2.0 * v.log2() + 1.0).collect();
        let obs = Observations::new(x, y).unwrap();
        let fit = fit_curve(ModelKind::Log2Linear, &obs, &FitOptions::default()).unwrap();
        assert!((fit.params.values[0] - 2.0).abs() < 1e-10);
        assert!((fit.params.values[1] - 1.0).abs() < 1e-10);
        assert!((fit.quality.r_squared - 1.0).abs() < 1e-12);
        assert_eq!(fit.quality.iterations, 0);
    }

    #[test]
    fn identical_x_is_divergence() {
        let obs = Observations::new(vec![3.0, 3.0, 3.0], vec![1.0, 2.0, 3.0]).unwrap();
        let err = fit_curve(ModelKind::Linear, &obs, &FitOptions::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FitDivergence);
    }

    #[test]
    fn four_pl_recovers_parameters_from_default_start() {
        let truth = [0.0, 1.0, 2.0, 1.5];
        let x = geomspace(0.1, 50.0, 12).unwrap();
        let obs = synthetic(ModelKind::FourPl, &truth, &x);
        let fit = fit_curve(ModelKind::FourPl, &obs, &FitOptions::default()).unwrap();
        // (bottom, slope, top) and (top, -slope, bottom) describe the same curve.
        let v = &fit.params.values;
        assert!((v[2] - 2.0).abs() < 1e-4, "midpoint {}", v[2]);
        assert!((v[1].abs() - 1.0).abs() < 1e-4, "slope {}", v[1]);
        assert!(fit.quality.sse < 1e-10);
    }

    #[test]
    fn four_pl_with_explicit_start() {
        let truth = [0.1, 1.5, 10.0, 2.0];
        let x = geomspace(0.5, 200.0, 12).unwrap();
        let obs = synthetic(ModelKind::FourPl, &truth, &x);
        let opts = FitOptions {
            initial: Some(vec![0.0, 1.0, 5.0, 2.5]),
            ..FitOptions::default()
        };
        let fit = fit_curve(ModelKind::FourPl, &obs, &opts).unwrap();
        for (got, want) in fit.params.values.iter().zip(truth.iter()) {
            assert!((got - want).abs() < 1e-4, "got {got}, want {want}");
        }
    }

    #[test]
    fn negative_slope_fits_a_series_with_a_blank_dose() {
        let truth = [0.1, -1.2, 4.0, 2.0];
        let x = vec![0.0, 0.5, 1.0, 2.0, 4.0, 8.0, 16.0, 32.0];
        let obs = synthetic(ModelKind::FourPl, &truth, &x);

        let exact = FitOptions {
            initial: Some(truth.to_vec()),
            ..FitOptions::default()
        };
        let fit = fit_curve(ModelKind::FourPl, &obs, &exact).unwrap();
        for (got, want) in fit.params.values.iter().zip(truth.iter()) {
            assert!((got - want).abs() < 1e-6, "got {got}, want {want}");
        }
        assert!((fit.params.evaluate(0.0) - 2.0).abs() < 1e-6);

        let nearby = FitOptions {
            initial: Some(vec![0.15, -1.0, 5.0, 1.8]),
            ..FitOptions::default()
        };
        let fit = fit_curve(ModelKind::FourPl, &obs, &nearby).unwrap();
        assert!(fit.quality.sse < 1e-10, "sse {}", fit.quality.sse);
        assert!((fit.params.evaluate(4.0) - 1.05).abs() < 1e-6);
    }

    #[test]
    fn hill_recovers_parameters() {
        let truth = [2.0, 1.2, 3.0];
        let x = geomspace(0.25, 40.0, 10).unwrap();
        let obs = synthetic(ModelKind::Hill, &truth, &x);
        let fit = fit_curve(ModelKind::Hill, &obs, &FitOptions::default()).unwrap();
        for (got, want) in fit.params.values.iter().zip(truth.iter()) {
            assert!((got - want).abs() < 1e-4, "got {got}, want {want}");
        }
    }

    #[test]
    fn zero_midpoint_start_is_divergence() {
        let x = geomspace(0.5, 20.0, 8).unwrap();
        let obs = synthetic(ModelKind::FourPl, &[0.0, 1.0, 4.0, 1.0], &x);
        let opts = FitOptions {
            initial: Some(vec![1.0, 1.0, 0.0, 1.0]),
            ..FitOptions::default()
        };
        let err = fit_curve(ModelKind::FourPl, &obs, &opts).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FitDivergence);
    }

    #[test]
    fn duplicated_rows_equal_integer_weights() {
        let x = vec![1.0, 2.0, 4.0, 8.0, 16.0];
        let y = vec![0.9, 3.2, 4.8, 7.1, 9.3];
        let weighted = fit_curve(
            ModelKind::Log2Linear,
            &Observations::new(x.clone(), y.clone()).unwrap(),
            &FitOptions {
                weights: Some(vec![1.0, 3.0, 1.0, 2.0, 1.0]),
                ..FitOptions::default()
            },
        )
        .unwrap();

        let dx = vec![1.0, 2.0, 2.0, 2.0, 4.0, 8.0, 8.0, 16.0];
        let dy = vec![0.9, 3.2, 3.2, 3.2, 4.8, 7.1, 7.1, 9.3];
        let duplicated = fit_curve(
            ModelKind::Log2Linear,
            &Observations::new(dx, dy).unwrap(),
            &FitOptions::default(),
        )
        .unwrap();

        for (a, b) in weighted.params.values.iter().zip(duplicated.params.values.iter()) {
            assert!((a - b).abs() < 1e-10);
        }
    }

    #[test]
    fn bad_weights_and_domain_are_invalid_input() {
        let obs = Observations::new(vec![1.0, 2.0, 3.0], vec![1.0, 2.0, 3.0]).unwrap();
        let opts = FitOptions {
            weights: Some(vec![1.0, 1.0]),
            ..FitOptions::default()
        };
        assert_eq!(
            fit_curve(ModelKind::Linear, &obs, &opts).unwrap_err().kind(),
            ErrorKind::InvalidInput
        );

        let neg = Observations::new(vec![-1.0, 2.0, 3.0], vec![1.0, 2.0, 3.0]).unwrap();
        assert_eq!(
            fit_curve(ModelKind::Log2Linear, &neg, &FitOptions::default()).unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
    }

    #[test]
    fn data_driven_start_fits_a_falling_curve() {
        let truth = [2.0, 1.0, 8.0, 0.1];
        let x = geomspace(0.5, 200.0, 12).unwrap();
        let obs = synthetic(ModelKind::FourPl, &truth, &x);
        let start = data_driven_start(ModelKind::FourPl, &obs).unwrap();
        assert_eq!(start.len(), 4);
        assert!((start[2] - 10.0).abs() < 1e-9);
        assert!(start[0] > start[3]);

        let opts = FitOptions {
            initial: Some(start),
            ..FitOptions::default()
        };
        let fit = fit_curve(ModelKind::FourPl, &obs, &opts).unwrap();
        assert!(fit.quality.sse < 1e-10);
        assert!((fit.params.evaluate(8.0) - 1.05).abs() < 1e-6);
        assert!(data_driven_start(ModelKind::Linear, &obs).is_none());
    }
}
