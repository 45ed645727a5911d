//! Levenberg–Marquardt nonlinear least squares.
//!
//! Used for the 4PL and Hill families, which are nonlinear in their parameters.
//! The model supplies both its value and its analytic gradient with respect to
//! the parameters at a given x, so no finite differencing is needed.
//!
//! The update solves
//!
//! ```text
//! (JᵀJ + λ · diag(JᵀJ)) δ = -Jᵀr
//! ```
//!
//! shrinking λ after an accepted step and growing it after a rejected one.

use nalgebra::{DMatrix, DVector};

use crate::error::{FitError, FitResult};

/// Solver tolerances and iteration cap.
#[derive(Debug, Clone, PartialEq)]
pub struct LmOptions {
    pub max_iterations: usize,
    /// Relative SSE decrease below which the fit is converged.
    pub ftol: f64,
    /// Relative step size below which the fit is converged.
    pub xtol: f64,
    /// Gradient max-norm below which the fit is converged.
    pub gtol: f64,
}

impl Default for LmOptions {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            ftol: 1e-12,
            xtol: 1e-12,
            gtol: 1e-12,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LmSolution {
    pub params: Vec<f64>,
    /// Weighted sum of squared residuals at `params`.
    pub sse: f64,
    pub iterations: usize,
}

const LAMBDA_INIT: f64 = 1e-3;
const LAMBDA_MAX: f64 = 1e16;

/// Minimize `Σ w_i (y_i - f(x_i; p))²` starting at `initial`.
///
/// `model(x, params, grad)` returns `f(x; params)` and writes `∂f/∂params` into `grad`.
pub fn levenberg_marquardt<F>(
    x: &[f64],
    y: &[f64],
    weights: Option<&[f64]>,
    initial: &[f64],
    options: &LmOptions,
    model: F,
) -> FitResult<LmSolution>
where
    F: Fn(f64, &[f64], &mut [f64]) -> f64,
{
    let n = x.len();
    let p = initial.len();
    if y.len() != n || weights.is_some_and(|w| w.len() != n) {
        return Err(FitError::InvalidInput("solver inputs have mismatched lengths".to_string()));
    }
    if p == 0 {
        return Err(FitError::InvalidInput("no parameters to fit".to_string()));
    }
    let sqrt_w: Vec<f64> = match weights {
        Some(w) => w.iter().map(|v| v.max(0.0).sqrt()).collect(),
        None => vec![1.0; n],
    };

    let mut params = initial.to_vec();
    let mut jac = DMatrix::<f64>::zeros(n, p);
    let mut resid = DVector::<f64>::zeros(n);
    let mut grad = vec![0.0; p];
    let mut trial_jac = DMatrix::<f64>::zeros(n, p);
    let mut trial_resid = DVector::<f64>::zeros(n);

    let mut sse = linearize(&model, x, y, &sqrt_w, &params, &mut jac, &mut resid, &mut grad)
        .ok_or_else(|| FitError::FitDivergence("model is not finite at the initial guess".to_string()))?;
    let mut lambda = LAMBDA_INIT;

    for iter in 1..=options.max_iterations {
        if sse <= 1e-30 {
            return Ok(finish(params, sse, iter - 1));
        }

        let jt = jac.transpose();
        let a = &jt * &jac;
        let g = &jt * &resid;
        if g.amax() <= options.gtol {
            return Ok(finish(params, sse, iter - 1));
        }

        let max_diag = (0..p).map(|j| a[(j, j)]).fold(0.0_f64, f64::max);
        let diag_floor = (max_diag * 1e-9).max(f64::MIN_POSITIVE);

        // Search for an acceptable step, increasing damping on rejection.
        loop {
            let mut damped = a.clone();
            for j in 0..p {
                damped[(j, j)] += lambda * a[(j, j)].max(diag_floor);
            }
            let rhs = -g.clone();
            let step = damped.lu().solve(&rhs);

            if let Some(step) = step.filter(|s| s.iter().all(|v| v.is_finite())) {
                let trial: Vec<f64> = params.iter().zip(step.iter()).map(|(a, b)| a + b).collect();
                let improved = weighted_sse(&model, x, y, &sqrt_w, &trial, &mut grad).filter(|t| *t < sse);
                // A trial with a non-finite Jacobian is rejected like an uphill step.
                let linearized = improved.and_then(|_| {
                    linearize(&model, x, y, &sqrt_w, &trial, &mut trial_jac, &mut trial_resid, &mut grad)
                });
                if let Some(trial_sse) = linearized {
                    let step_norm = step.norm();
                    let param_norm = params.iter().map(|v| v * v).sum::<f64>().sqrt();
                    let reduction = sse - trial_sse;
                    let prev_sse = sse;

                    params = trial;
                    std::mem::swap(&mut jac, &mut trial_jac);
                    std::mem::swap(&mut resid, &mut trial_resid);
                    sse = trial_sse;
                    lambda = (lambda / 10.0).max(1e-12);

                    if reduction <= options.ftol * prev_sse
                        || step_norm <= options.xtol * (param_norm + options.xtol)
                    {
                        tracing::debug!(iterations = iter, sse, "Levenberg–Marquardt converged");
                        return Ok(finish(params, sse, iter));
                    }
                    break;
                }
            }

            lambda *= 10.0;
            if lambda > LAMBDA_MAX {
                // No descent direction left: accept only if we are at a stationary point.
                if g.amax() <= 1e-8 * (1.0 + sse) {
                    tracing::debug!(iterations = iter, sse, "Levenberg–Marquardt stalled at a stationary point");
                    return Ok(finish(params, sse, iter));
                }
                return Err(FitError::FitDivergence(format!(
                    "damping overflow after {iter} iterations (sse={sse:.6e})"
                )));
            }
        }
    }

    Err(FitError::FitDivergence(format!(
        "no convergence within {} iterations",
        options.max_iterations
    )))
}

fn finish(params: Vec<f64>, sse: f64, iterations: usize) -> LmSolution {
    LmSolution {
        params,
        sse,
        iterations,
    }
}

/// Fill the residual vector and its Jacobian at `params`; returns the SSE.
#[allow(clippy::too_many_arguments)]
fn linearize<F>(
    model: &F,
    x: &[f64],
    y: &[f64],
    sqrt_w: &[f64],
    params: &[f64],
    jac: &mut DMatrix<f64>,
    resid: &mut DVector<f64>,
    grad: &mut [f64],
) -> Option<f64>
where
    F: Fn(f64, &[f64], &mut [f64]) -> f64,
{
    let mut sse = 0.0;
    for i in 0..x.len() {
        let f = model(x[i], params, grad);
        let r = sqrt_w[i] * (y[i] - f);
        if !r.is_finite() || grad.iter().any(|v| !v.is_finite()) {
            return None;
        }
        resid[i] = r;
        for (j, gj) in grad.iter().enumerate() {
            jac[(i, j)] = -sqrt_w[i] * gj;
        }
        sse += r * r;
    }
    Some(sse)
}

fn weighted_sse<F>(model: &F, x: &[f64], y: &[f64], sqrt_w: &[f64], params: &[f64], grad: &mut [f64]) -> Option<f64>
where
    F: Fn(f64, &[f64], &mut [f64]) -> f64,
{
    let mut sse = 0.0;
    for i in 0..x.len() {
        let r = sqrt_w[i] * (y[i] - model(x[i], params, grad));
        if !r.is_finite() {
            return None;
        }
        sse += r * r;
    }
    Some(sse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn exp_model(x: f64, p: &[f64], g: &mut [f64]) -> f64 {
        let e = (p[1] * x).exp();
        g[0] = e;
        g[1] = p[0] * x * e;
        p[0] * e
    }

    #[test]
    fn recovers_exponential_parameters() {
        let x: Vec<f64> = (0..10).map(|i| i as f64 * 0.2).collect();
        let y: Vec<f64> = x.iter().map(|&v| 2.5 * (0.7 * v).exp()).collect();
        let sol = levenberg_marquardt(&x, &y, None, &[1.0, 1.0], &LmOptions::default(), exp_model).unwrap();
        assert!((sol.params[0] - 2.5).abs() < 1e-6);
        assert!((sol.params[1] - 0.7).abs() < 1e-6);
        assert!(sol.sse < 1e-10);
    }

    #[test]
    fn iteration_cap_is_divergence() {
        let x: Vec<f64> = (0..10).map(|i| i as f64 * 0.5).collect();
        let y: Vec<f64> = x.iter().map(|&v| (5.0 * v).exp()).collect();
        let options = LmOptions {
            max_iterations: 3,
            ..LmOptions::default()
        };
        let err = levenberg_marquardt(&x, &y, None, &[1.0, 1.0], &options, exp_model).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FitDivergence);
    }

    #[test]
    fn non_finite_start_is_divergence() {
        let x = [1.0, 2.0, 3.0];
        let y = [1.0, 2.0, 3.0];
        let err = levenberg_marquardt(&x, &y, None, &[0.0], &LmOptions::default(), |x, p, g| {
            g[0] = -x / (p[0] * p[0]);
            x / p[0]
        })
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FitDivergence);
    }

    #[test]
    fn trial_with_non_finite_jacobian_is_rejected() {
        // y = p^3 x; the first damped step from p = 3 lands where the Jacobian is undefined.
        let x = [1.0, 2.0, 3.0];
        let y = [8.0, 16.0, 24.0];
        let sol = levenberg_marquardt(&x, &y, None, &[3.0], &LmOptions::default(), |x, p, g| {
            g[0] = if (2.2..2.4).contains(&p[0]) {
                f64::NAN
            } else {
                3.0 * p[0] * p[0] * x
            };
            p[0].powi(3) * x
        })
        .unwrap();
        assert!((sol.params[0] - 2.0).abs() < 1e-6, "p = {}", sol.params[0]);
        assert!(sol.sse < 1e-10);
    }
}
