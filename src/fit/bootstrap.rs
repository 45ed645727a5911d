//! Bootstrap confidence bands.
//!
//! Each replicate draws `n` row indices with replacement, re-fits the curve on
//! the resample and evaluates it on a fixed grid. The `K × G` ensemble is then
//! summarized per grid column, either by order statistics (percentile) or by a
//! normal approximation.
//!
//! Replicates run in parallel. Each one owns an RNG seeded from
//! `(seed, replicate index)`, so the ensemble is identical for a given seed no
//! matter how many worker threads execute it.

use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::domain::{Band, BandMethod, BootstrapConfig, DegeneratePolicy, LowessConfig, ModelKind, Observations};
use crate::error::{FitError, FitResult};
use crate::fit::fitter::{FitOptions, fit_curve};
use crate::fit::lowess::lowess;
use crate::math::{mean, normal_critical_value, std_dev};

/// "Fit this resample and evaluate it on this grid."
pub trait CurveEstimator: Sync {
    fn estimate(&self, obs: &Observations, grid: &[f64]) -> FitResult<Vec<f64>>;
}

impl<F> CurveEstimator for F
where
    F: Fn(&Observations, &[f64]) -> FitResult<Vec<f64>> + Sync,
{
    fn estimate(&self, obs: &Observations, grid: &[f64]) -> FitResult<Vec<f64>> {
        self(obs, grid)
    }
}

/// Re-fits a parametric model kind on every resample.
#[derive(Debug, Clone)]
pub struct ParametricEstimator {
    pub kind: ModelKind,
    pub options: FitOptions,
}

impl CurveEstimator for ParametricEstimator {
    fn estimate(&self, obs: &Observations, grid: &[f64]) -> FitResult<Vec<f64>> {
        let fit = fit_curve(self.kind, obs, &self.options)?;
        Ok(fit.params.evaluate_grid(grid))
    }
}

/// Re-smooths every resample with LOWESS.
#[derive(Debug, Clone)]
pub struct LowessEstimator {
    pub config: LowessConfig,
}

impl CurveEstimator for LowessEstimator {
    fn estimate(&self, obs: &Observations, grid: &[f64]) -> FitResult<Vec<f64>> {
        lowess(obs, grid, &self.config)
    }
}

/// Raw `K × G` bootstrap ensemble (one row per replicate).
#[derive(Debug, Clone, PartialEq)]
pub struct Ensemble {
    grid: Vec<f64>,
    values: DMatrix<f64>,
}

/// Ensemble together with its summarized band.
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapResult {
    pub ensemble: Ensemble,
    pub band: Band,
}

impl Ensemble {
    /// Assemble an ensemble from replicate rows evaluated on `grid`.
    pub fn from_replicates(grid: Vec<f64>, rows: &[Vec<f64>]) -> FitResult<Self> {
        if let Some(bad) = rows.iter().position(|r| r.len() != grid.len()) {
            return Err(FitError::InvalidInput(format!(
                "replicate {bad} has {} values for a grid of {}",
                rows[bad].len(),
                grid.len()
            )));
        }
        let values = DMatrix::from_fn(rows.len(), grid.len(), |i, j| rows[i][j]);
        Ok(Self { grid, values })
    }

    pub fn grid(&self) -> &[f64] {
        &self.grid
    }

    pub fn replicates(&self) -> usize {
        self.values.nrows()
    }

    pub fn values(&self) -> &DMatrix<f64> {
        &self.values
    }

    /// One replicate curve.
    pub fn replicate(&self, i: usize) -> Option<Vec<f64>> {
        (i < self.values.nrows()).then(|| self.values.row(i).iter().copied().collect())
    }

    /// Summarize every grid column into a `(lower, upper)` band.
    pub fn band(&self, method: BandMethod, confidence: f64) -> FitResult<Band> {
        if !(confidence.is_finite() && confidence > 0.0 && confidence < 1.0) {
            return Err(FitError::InvalidConfiguration(format!(
                "confidence must be in (0, 1), got {confidence}"
            )));
        }
        let k = self.replicates();
        check_replicates(k, confidence, method)?;

        let mut lower = Vec::with_capacity(self.grid.len());
        let mut upper = Vec::with_capacity(self.grid.len());
        match method {
            BandMethod::Percentile => {
                let (lo, hi) = percentile_ranks(k, confidence);
                for j in 0..self.values.ncols() {
                    let mut col: Vec<f64> = self.values.column(j).iter().copied().collect();
                    col.sort_by(f64::total_cmp);
                    lower.push(col[lo - 1]);
                    upper.push(col[hi - 1]);
                }
            }
            BandMethod::Normal => {
                let z = normal_critical_value(confidence);
                for j in 0..self.values.ncols() {
                    let col: Vec<f64> = self.values.column(j).iter().copied().collect();
                    let m = mean(&col);
                    let s = std_dev(&col, 0);
                    lower.push(m - z * s);
                    upper.push(m + z * s);
                }
            }
        }

        Ok(Band {
            grid: self.grid.clone(),
            method,
            confidence,
            lower,
            upper,
        })
    }
}

/// Reject replicate counts too small for `method` at `confidence`.
pub fn check_replicates(k: usize, confidence: f64, method: BandMethod) -> FitResult<()> {
    if k == 0 {
        return Err(FitError::InsufficientReplicates("no bootstrap replicates requested".to_string()));
    }
    match method {
        BandMethod::Percentile => {
            let alpha = 1.0 - confidence;
            let lower_rank = k as f64 * alpha / 2.0;
            if lower_rank + RANK_EPS < 1.0 {
                return Err(FitError::InsufficientReplicates(format!(
                    "{k} replicates cannot resolve a {:.1}% percentile band (need at least {})",
                    confidence * 100.0,
                    (2.0 / alpha - RANK_EPS).ceil()
                )));
            }
        }
        BandMethod::Normal => {
            if k < 2 {
                return Err(FitError::InsufficientReplicates(
                    "normal band needs at least 2 replicates".to_string(),
                ));
            }
        }
    }
    Ok(())
}

const RANK_EPS: f64 = 1e-9;

/// 1-based order-statistic ranks `(⌊K·α/2⌋, ⌈K·(1−α/2)⌉)`.
fn percentile_ranks(k: usize, confidence: f64) -> (usize, usize) {
    let alpha = 1.0 - confidence;
    let lo = (k as f64 * alpha / 2.0 + RANK_EPS).floor() as usize;
    let hi = (k as f64 * (1.0 - alpha / 2.0) - RANK_EPS).ceil() as usize;
    (lo.clamp(1, k), hi.clamp(1, k))
}

/// Build the `K × G` ensemble on an explicit grid.
pub fn bootstrap_ensemble<E>(
    obs: &Observations,
    grid: &[f64],
    config: &BootstrapConfig,
    estimator: &E,
) -> FitResult<Ensemble>
where
    E: CurveEstimator + ?Sized,
{
    if grid.is_empty() {
        return Err(FitError::InvalidConfiguration("evaluation grid is empty".to_string()));
    }
    let k = config.replicates();
    let rows = (0..k)
        .into_par_iter()
        .map(|r| run_replicate(obs, grid, config, estimator, r))
        .collect::<FitResult<Vec<Vec<f64>>>>()?;

    tracing::info!(replicates = k, grid_points = grid.len(), "bootstrap ensemble complete");
    Ensemble::from_replicates(grid.to_vec(), &rows)
}

/// Build the grid from the configuration, run the ensemble and summarize it.
pub fn confidence_band<E>(obs: &Observations, config: &BootstrapConfig, estimator: &E) -> FitResult<BootstrapResult>
where
    E: CurveEstimator + ?Sized,
{
    let grid = config.grid().build(obs.x_range())?;
    let ensemble = bootstrap_ensemble(obs, &grid, config, estimator)?;
    let band = ensemble.band(config.band_method(), config.confidence())?;
    Ok(BootstrapResult { ensemble, band })
}

fn replicate_rng(seed: u64, replicate: usize) -> StdRng {
    const GOLDEN: u64 = 0x9E37_79B9_7F4A_7C15;
    StdRng::seed_from_u64(seed ^ (replicate as u64).wrapping_add(1).wrapping_mul(GOLDEN))
}

fn run_replicate<E>(
    obs: &Observations,
    grid: &[f64],
    config: &BootstrapConfig,
    estimator: &E,
    replicate: usize,
) -> FitResult<Vec<f64>>
where
    E: CurveEstimator + ?Sized,
{
    let mut rng = replicate_rng(config.seed(), replicate);
    let max_attempts = match config.degenerate_policy() {
        DegeneratePolicy::Abort => 1,
        DegeneratePolicy::Retry { max_attempts } => max_attempts.max(1),
    };

    let n = obs.len();
    let mut attempt = 1;
    loop {
        let indices: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
        let outcome = obs
            .resample(&indices)
            .and_then(|sample| estimator.estimate(&sample, grid))
            .and_then(|values| check_row(values, grid.len()));

        match outcome {
            Ok(values) => return Ok(values),
            Err(err) if attempt < max_attempts => {
                tracing::debug!(replicate, attempt, error = %err, "degenerate resample; redrawing");
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

fn check_row(values: Vec<f64>, expected: usize) -> FitResult<Vec<f64>> {
    if values.len() != expected {
        return Err(FitError::InvalidInput(format!(
            "estimator returned {} values for a grid of {expected}",
            values.len()
        )));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(FitError::FitDivergence("replicate curve is not finite on the grid".to_string()));
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::GridSpec;
    use crate::error::ErrorKind;
    use rand_distr::{Distribution, Normal};

    fn noisy_line(seed: u64, n: usize) -> Observations {
        let mut rng = StdRng::seed_from_u64(seed);
        let noise = Normal::new(0.0, 1.0).unwrap();
        let x: Vec<f64> = (1..=n).map(|i| i as f64).collect();
        let y = x.iter().map(|v| 2.0 * v + 1.0 + noise.sample(&mut rng)).collect();
        Observations::new(x, y).unwrap()
    }

    fn linear() -> ParametricEstimator {
        ParametricEstimator {
            kind: ModelKind::Linear,
            options: FitOptions::default(),
        }
    }

    #[test]
    fn zero_or_one_replicate_is_insufficient() {
        for k in [0, 1] {
            for method in [BandMethod::Percentile, BandMethod::Normal] {
                let err = BootstrapConfig::new(k, 0.95, method).unwrap_err();
                assert_eq!(err.kind(), ErrorKind::InsufficientReplicates);
            }
        }
        let ensemble = Ensemble::from_replicates(vec![1.0], &[vec![2.0]]).unwrap();
        assert_eq!(
            ensemble.band(BandMethod::Percentile, 0.5).unwrap_err().kind(),
            ErrorKind::InsufficientReplicates
        );
    }

    #[test]
    fn percentile_uses_one_based_order_statistics() {
        let rows: Vec<Vec<f64>> = (1..=20).rev().map(|v| vec![v as f64]).collect();
        let ensemble = Ensemble::from_replicates(vec![0.0], &rows).unwrap();
        let band = ensemble.band(BandMethod::Percentile, 0.9).unwrap();
        assert_eq!(band.lower, vec![1.0]);
        assert_eq!(band.upper, vec![19.0]);

        let err = ensemble.band(BandMethod::Percentile, 0.95).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientReplicates);
    }

    #[test]
    fn normal_band_centres_on_mean_with_population_sd() {
        let rows = vec![vec![1.0], vec![2.0], vec![3.0], vec![6.0]];
        let ensemble = Ensemble::from_replicates(vec![0.0], &rows).unwrap();
        let band = ensemble.band(BandMethod::Normal, 0.95).unwrap();
        let half = normal_critical_value(0.95) * 3.5_f64.sqrt();
        assert!((band.lower[0] - (3.0 - half)).abs() < 1e-12);
        assert!((band.upper[0] - (3.0 + half)).abs() < 1e-12);
        assert!((normal_critical_value(0.95) - 1.959964).abs() < 1e-6);
    }

    #[test]
    fn same_seed_same_ensemble_regardless_of_threads() {
        let obs = noisy_line(7, 12);
        let grid = [1.0, 6.0, 12.0];
        let config = BootstrapConfig::new(40, 0.9, BandMethod::Percentile).unwrap().with_seed(99);

        let parallel = bootstrap_ensemble(&obs, &grid, &config, &linear()).unwrap();
        let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        let serial = pool.install(|| bootstrap_ensemble(&obs, &grid, &config, &linear())).unwrap();
        assert_eq!(parallel, serial);

        let other = bootstrap_ensemble(&obs, &grid, &config.clone().with_seed(100), &linear()).unwrap();
        assert_ne!(parallel, other);
    }

    #[test]
    fn percentile_lower_never_exceeds_upper() {
        let obs = noisy_line(3, 15);
        let grid = [0.5, 4.0, 9.0, 20.0];
        let mut checked = 0;
        for k in [4, 10, 50] {
            let config = BootstrapConfig::new(k, 0.5, BandMethod::Percentile).unwrap().with_seed(k as u64);
            let ensemble = bootstrap_ensemble(&obs, &grid, &config, &linear()).unwrap();
            for confidence in [0.1, 0.5, 0.9, 0.95] {
                if let Ok(band) = ensemble.band(BandMethod::Percentile, confidence) {
                    checked += 1;
                    for (lo, hi) in band.lower.iter().zip(band.upper.iter()) {
                        assert!(lo <= hi);
                    }
                }
            }
        }
        assert!(checked >= 6);
    }

    #[test]
    fn normal_band_width_converges_to_percentile_width() {
        let obs = noisy_line(11, 20);
        let grid = [2.0, 10.0, 18.0];
        let config = BootstrapConfig::new(5000, 0.95, BandMethod::Percentile).unwrap().with_seed(5);
        let ensemble = bootstrap_ensemble(&obs, &grid, &config, &linear()).unwrap();
        let pct = ensemble.band(BandMethod::Percentile, 0.95).unwrap();
        let norm = ensemble.band(BandMethod::Normal, 0.95).unwrap();
        for j in 0..grid.len() {
            let w_pct = pct.upper[j] - pct.lower[j];
            let w_norm = norm.upper[j] - norm.lower[j];
            assert!(((w_pct - w_norm) / w_norm).abs() < 0.1, "column {j}: {w_pct} vs {w_norm}");
        }
    }

    #[test]
    fn degenerate_resample_aborts_or_retries() {
        // Three of four x-values are identical; many resamples are singular.
        let obs = Observations::new(vec![1.0, 1.0, 1.0, 2.0], vec![1.0, 1.1, 0.9, 3.0]).unwrap();
        let grid = [1.0, 2.0];

        let abort = BootstrapConfig::new(60, 0.5, BandMethod::Percentile).unwrap();
        let err = bootstrap_ensemble(&obs, &grid, &abort, &linear()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FitDivergence);

        let retry = abort
            .with_degenerate_policy(DegeneratePolicy::Retry { max_attempts: 60 })
            .unwrap();
        let ensemble = bootstrap_ensemble(&obs, &grid, &retry, &linear()).unwrap();
        assert_eq!(ensemble.replicates(), 60);
    }

    #[test]
    fn closures_and_lowess_are_estimators() {
        let obs = noisy_line(1, 30);
        let config = BootstrapConfig::new(20, 0.5, BandMethod::Normal)
            .unwrap()
            .with_grid(GridSpec::spaced(None, None, 5, crate::domain::GridSpacing::Linear).unwrap());

        let constant = |_: &Observations, grid: &[f64]| -> FitResult<Vec<f64>> { Ok(vec![4.0; grid.len()]) };
        let result = confidence_band(&obs, &config, &constant).unwrap();
        assert_eq!(result.band.lower, vec![4.0; 5]);
        assert_eq!(result.band.upper, vec![4.0; 5]);
        assert_eq!(result.band.grid.first(), Some(&1.0));
        assert_eq!(result.band.grid.last(), Some(&30.0));

        let smooth = LowessEstimator {
            config: LowessConfig::default(),
        };
        let result = confidence_band(&obs, &config, &smooth).unwrap();
        assert_eq!(result.ensemble.replicates(), 20);
        for (lo, hi) in result.band.lower.iter().zip(result.band.upper.iter()) {
            assert!(lo <= hi);
        }
    }
}
