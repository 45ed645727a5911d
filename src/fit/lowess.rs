//! LOWESS: locally weighted scatterplot smoothing.
//!
//! The smooth at the observations comes from the `lowess` crate: tricube
//! weights on distance relative to the k-th neighbour, a local linear fit, and
//! bisquare robustness iterations scaled by `6 · median(|residual|)`. The crate
//! also hands back the final robustness weights.
//!
//! Grid points between observations are evaluated here, with the same window
//! and kernel under those weights, as a weighted least squares problem.

use ::lowess::prelude::{Batch, Bisquare, Lowess, MAR, NoBoundary, Tricube};
use nalgebra::{DMatrix, DVector};

use crate::domain::{LowessConfig, Observations};
use crate::error::{FitError, FitResult};
use crate::math::solve_weighted_least_squares;

/// Kernel values are clamped to 1 / 0 inside these fractions of the radius.
const NEAR: f64 = 0.001;
const FAR: f64 = 0.999;

/// Smooth the observations and evaluate the smooth at every grid point.
pub fn lowess(obs: &Observations, grid: &[f64], config: &LowessConfig) -> FitResult<Vec<f64>> {
    let smoother = Smoother::fit(obs, config)?;
    Ok(grid.iter().map(|&x| smoother.evaluate(x)).collect())
}

/// Smooth the observations and return `(x, fitted)` sorted by x.
pub fn lowess_sorted(obs: &Observations, config: &LowessConfig) -> FitResult<(Vec<f64>, Vec<f64>)> {
    let smoother = Smoother::fit(obs, config)?;
    Ok((smoother.xs, smoother.fitted))
}

/// Sorted data, the smooth at each observation and the final robustness weights.
struct Smoother {
    xs: Vec<f64>,
    ys: Vec<f64>,
    fitted: Vec<f64>,
    robust: Vec<f64>,
    k: usize,
}

impl Smoother {
    fn fit(obs: &Observations, config: &LowessConfig) -> FitResult<Self> {
        config.validate()?;
        let n = obs.len();
        let k = ((config.frac * n as f64).ceil() as usize).min(n);
        if k < 2 {
            return Err(FitError::InsufficientData(format!(
                "LOWESS window of {k} point(s) (frac={} of n={n}); need at least 2",
                config.frac
            )));
        }

        // The crate sizes its window as floor(fraction · n), so k / n keeps it at k.
        let model = Lowess::new()
            .fraction(k as f64 / n as f64)
            .iterations(config.iterations)
            .weight_function(Tricube)
            .robustness_method(Bisquare)
            .scaling_method(MAR)
            .boundary_policy(NoBoundary)
            .delta(0.0)
            .return_robustness_weights()
            .adapter(Batch)
            .build()
            .map_err(|e| FitError::InvalidConfiguration(format!("LOWESS: {e}")))?;
        let result = model
            .fit(obs.x(), obs.y())
            .map_err(|e| FitError::InvalidInput(format!("LOWESS: {e}")))?;
        let robust = result.robustness_weights.unwrap_or_else(|| vec![1.0; n]);

        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| obs.x()[a].total_cmp(&obs.x()[b]));
        let sorted = |values: &[f64]| -> Vec<f64> { order.iter().map(|&i| values[i]).collect() };

        tracing::trace!(n, k, iterations = config.iterations, "LOWESS smooth");
        Ok(Self {
            xs: sorted(obs.x()),
            ys: sorted(obs.y()),
            fitted: sorted(&result.y),
            robust: sorted(&robust),
            k,
        })
    }

    /// Local linear estimate at `x0` under the final robustness weights.
    fn evaluate(&self, x0: f64) -> f64 {
        let mut dist: Vec<f64> = self.xs.iter().map(|&x| (x - x0).abs()).collect();
        let radius = {
            let (_, kth, _) = dist.select_nth_unstable_by(self.k - 1, f64::total_cmp);
            *kth
        };
        // select_nth reorders; recompute distances in data order.
        for (d, &x) in dist.iter_mut().zip(self.xs.iter()) {
            *d = (x - x0).abs();
        }

        let window: Vec<usize> = (0..self.xs.len()).filter(|&i| dist[i] <= radius).collect();
        let weights: Vec<f64> = window
            .iter()
            .map(|&i| tricube(dist[i], radius) * self.robust[i])
            .collect();

        let sum_w: f64 = weights.iter().sum();
        if sum_w <= 0.0 {
            // Every neighbour was down-weighted away.
            let total: f64 = window.iter().map(|&i| self.ys[i]).sum();
            return total / window.len() as f64;
        }

        // Centred on x0, the intercept is the estimate.
        let m = window.len();
        let mut design = DMatrix::<f64>::zeros(m, 2);
        for (row, &i) in window.iter().enumerate() {
            design[(row, 0)] = 1.0;
            design[(row, 1)] = self.xs[i] - x0;
        }
        let y = DVector::from_iterator(m, window.iter().map(|&i| self.ys[i]));
        match solve_weighted_least_squares(&design, &y, &weights) {
            Some(beta) => beta[0],
            None => window.iter().zip(&weights).map(|(&i, w)| w * self.ys[i]).sum::<f64>() / sum_w,
        }
    }
}

fn tricube(d: f64, radius: f64) -> f64 {
    if radius <= 0.0 {
        return 1.0;
    }
    let u = d / radius;
    if u <= NEAR {
        1.0
    } else if u >= FAR {
        0.0
    } else {
        (1.0 - u * u * u).powi(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn reproduces_a_straight_line() {
        let x: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| 3.0 - 0.5 * v).collect();
        let obs = Observations::new(x, y).unwrap();
        let grid = [0.0, 2.5, 9.75, 19.0];
        let fitted = lowess(&obs, &grid, &LowessConfig::default()).unwrap();
        for (g, f) in grid.iter().zip(fitted.iter()) {
            assert!((f - (3.0 - 0.5 * g)).abs() < 1e-9, "at {g}: {f}");
        }
    }

    #[test]
    fn robustness_iterations_resist_outliers() {
        let x: Vec<f64> = (0..30).map(|i| i as f64).collect();
        let mut y: Vec<f64> = x.iter().map(|v| 0.5 * v + (v * 1.7).sin() * 0.1).collect();
        y[15] += 40.0;
        let obs = Observations::new(x, y).unwrap();

        let plain = lowess(&obs, &[15.0], &LowessConfig::new(0.3, 0).unwrap()).unwrap()[0];
        let robust = lowess(&obs, &[15.0], &LowessConfig::new(0.3, 3).unwrap()).unwrap()[0];
        let truth = 7.5;
        assert!((robust - truth).abs() < 0.5, "robust={robust}");
        assert!((robust - truth).abs() < (plain - truth).abs());
    }

    #[test]
    fn grid_evaluation_at_observations_matches_the_smooth() {
        let x: Vec<f64> = (0..25).map(|i| i as f64 * 0.4).collect();
        let mut y: Vec<f64> = x.iter().map(|v| (v * 0.8).sin() + 0.05 * (v * 7.3).cos()).collect();
        y[6] -= 3.0;
        y[18] += 2.0;
        let obs = Observations::new(x, y).unwrap();
        let config = LowessConfig::new(0.4, 3).unwrap();

        let (xs, smooth) = lowess_sorted(&obs, &config).unwrap();
        let on_grid = lowess(&obs, &xs, &config).unwrap();
        for ((x, a), b) in xs.iter().zip(smooth.iter()).zip(on_grid.iter()) {
            assert!((a - b).abs() < 1e-6, "at {x}: smooth={a} grid={b}");
        }
    }

    #[test]
    fn tiny_window_is_insufficient_data() {
        let obs = Observations::new(vec![1.0, 2.0, 3.0], vec![1.0, 2.0, 3.0]).unwrap();
        let err = lowess(&obs, &[2.0], &LowessConfig { frac: 0.2, iterations: 3 }).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientData);
    }

    #[test]
    fn invalid_fraction_is_configuration_error() {
        let obs = Observations::new(vec![1.0, 2.0, 3.0], vec![1.0, 2.0, 3.0]).unwrap();
        let err = lowess(&obs, &[2.0], &LowessConfig { frac: 0.0, iterations: 3 }).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
    }

    #[test]
    fn identical_x_falls_back_to_mean() {
        let obs = Observations::new(vec![2.0; 4], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let fitted = lowess(&obs, &[2.0], &LowessConfig::new(1.0, 0).unwrap()).unwrap();
        assert!((fitted[0] - 2.5).abs() < 1e-12);
    }

    #[test]
    fn sorted_output_follows_x() {
        let obs = Observations::new(vec![3.0, 1.0, 2.0, 5.0, 4.0], vec![3.0, 1.0, 2.0, 5.0, 4.0]).unwrap();
        let (xs, ys) = lowess_sorted(&obs, &LowessConfig::new(0.8, 1).unwrap()).unwrap();
        assert_eq!(xs, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        for (x, y) in xs.iter().zip(ys.iter()) {
            assert!((x - y).abs() < 1e-9);
        }
    }
}
