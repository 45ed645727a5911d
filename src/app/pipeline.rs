//! Shared fit pipeline used by the CLI, the demo command and the TUI.
//!
//! observations -> point estimate on a grid -> optional bootstrap band
//!
//! The front-ends only decide where the observations come from and how the
//! result is presented.

use crate::domain::{Band, BootstrapConfig, CurveFile, CurveGrid, CurveMethod, GridSpec, ModelKind, Observations};
use crate::error::FitResult;
use crate::fit::{
    BootstrapResult, CurveFit, FitOptions, LowessEstimator, ParametricEstimator, bootstrap_ensemble, data_driven_start,
    fit_curve, lowess,
};
use crate::io::curve::build_curve_file;

/// What to fit and how.
#[derive(Debug, Clone)]
pub struct FitRequest {
    pub method: CurveMethod,
    pub options: FitOptions,
    /// Evaluation grid when no bootstrap is requested.
    pub grid: GridSpec,
    /// The band is computed on the bootstrap config's grid, which then also
    /// carries the point estimate.
    pub bootstrap: Option<BootstrapConfig>,
    /// Derive 4PL/Hill starting values from each observation set when no
    /// explicit start is given.
    pub auto_start: bool,
}

impl FitRequest {
    pub fn new(method: CurveMethod) -> Self {
        Self {
            method,
            options: FitOptions::default(),
            grid: GridSpec::default(),
            bootstrap: None,
            auto_start: false,
        }
    }

    fn grid_spec(&self) -> &GridSpec {
        self.bootstrap.as_ref().map(BootstrapConfig::grid).unwrap_or(&self.grid)
    }

    fn options_for(&self, kind: ModelKind, obs: &Observations) -> FitOptions {
        let mut options = self.options.clone();
        if self.auto_start && options.initial.is_none() {
            options.initial = data_driven_start(kind, obs);
        }
        options
    }
}

/// All computed outputs for one group of observations.
#[derive(Debug, Clone)]
pub struct FitRun {
    pub group: String,
    pub observations: Observations,
    pub method: CurveMethod,
    /// Parametric fits only.
    pub fit: Option<CurveFit>,
    pub curve: CurveGrid,
    pub bootstrap: Option<BootstrapResult>,
}

impl FitRun {
    pub fn band(&self) -> Option<&Band> {
        self.bootstrap.as_ref().map(|b| &b.band)
    }

    /// Portable curve file for `--export-curve`.
    pub fn to_curve_file(&self) -> CurveFile {
        build_curve_file(
            &self.group,
            self.method,
            self.fit.as_ref().map(|f| f.params.clone()),
            self.fit.as_ref().map(|f| f.quality.clone()),
            self.curve.clone(),
            self.band().cloned(),
        )
    }
}

/// Fit one observation set and, when configured, bootstrap a band around it.
pub fn run_fit(group: &str, obs: &Observations, request: &FitRequest) -> FitResult<FitRun> {
    let grid = request.grid_spec().build(obs.x_range())?;

    let (fit, y) = match request.method {
        CurveMethod::Parametric(kind) => {
            let fit = fit_curve(kind, obs, &request.options_for(kind, obs))?;
            let y = fit.params.evaluate_grid(&grid);
            (Some(fit), y)
        }
        CurveMethod::Lowess(config) => (None, lowess(obs, &grid, &config)?),
    };
    tracing::info!(group, method = %request.method.display_name(), n = obs.len(), "curve fitted");

    let bootstrap = match &request.bootstrap {
        Some(config) => Some(bootstrap_band(obs, &grid, config, request)?),
        None => None,
    };

    Ok(FitRun {
        group: group.to_string(),
        observations: obs.clone(),
        method: request.method,
        fit,
        curve: CurveGrid { x: grid, y },
        bootstrap,
    })
}

/// Fit every group independently.
///
/// A failed group is a data-quality signal for that group only, so failures are
/// collected next to the successful runs instead of aborting the batch.
pub fn run_groups<'a, I>(groups: I, request: &FitRequest) -> (Vec<FitRun>, Vec<(String, crate::error::FitError)>)
where
    I: IntoIterator<Item = (&'a str, &'a Observations)>,
{
    let mut runs = Vec::new();
    let mut failed = Vec::new();
    for (name, obs) in groups {
        match run_fit(name, obs, request) {
            Ok(run) => runs.push(run),
            Err(err) => {
                tracing::warn!(group = name, error = %err, "group fit failed");
                failed.push((name.to_string(), err));
            }
        }
    }
    (runs, failed)
}

fn bootstrap_band(
    obs: &Observations,
    grid: &[f64],
    config: &BootstrapConfig,
    request: &FitRequest,
) -> FitResult<BootstrapResult> {
    let ensemble = match request.method {
        CurveMethod::Parametric(kind) => {
            // Weights are per original row and do not survive resampling.
            let estimator = ParametricEstimator {
                kind,
                options: FitOptions {
                    weights: None,
                    ..request.options_for(kind, obs)
                },
            };
            bootstrap_ensemble(obs, grid, config, &estimator)?
        }
        CurveMethod::Lowess(lowess_config) => {
            bootstrap_ensemble(obs, grid, config, &LowessEstimator { config: lowess_config })?
        }
    };
    let band = ensemble.band(config.band_method(), config.confidence())?;
    Ok(BootstrapResult { ensemble, band })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BandMethod, DegeneratePolicy, LowessConfig};
    use crate::error::ErrorKind;

    fn dilution_line() -> Observations {
        let x = vec![1.0, 2.0, 4.0, 8.0, 16.0, 32.0];
        let y = x.iter().map(|v: &f64| 2.0 * v.log2() + 1.0).collect();
        Observations::new(x, y).unwrap()
    }

    #[test]
    fn parametric_run_evaluates_on_the_default_grid() {
        let obs = dilution_line();
        let run = run_fit("all", &obs, &FitRequest::new(CurveMethod::Parametric(ModelKind::Log2Linear))).unwrap();
        assert_eq!(run.curve.x.len(), 100);
        assert_eq!(run.curve.x[0], 1.0);
        assert_eq!(run.curve.x[99], 32.0);
        assert!((run.curve.y[99] - 11.0).abs() < 1e-9);
        assert!(run.bootstrap.is_none());

        let file = run.to_curve_file();
        assert_eq!(file.group, "all");
        assert!(file.params.is_some());
        assert!(file.band.is_none());
    }

    #[test]
    fn bootstrap_band_shares_the_curve_grid() {
        let x: Vec<f64> = (0..40).map(|i| i as f64 * 0.25).collect();
        let y: Vec<f64> = x.iter().enumerate().map(|(i, v)| 0.5 * v + if i % 2 == 0 { 0.2 } else { -0.2 }).collect();
        let obs = Observations::new(x, y).unwrap();
        let config = BootstrapConfig::new(50, 0.9, BandMethod::Percentile)
            .unwrap()
            .with_grid(GridSpec::spaced(None, None, 25, crate::domain::GridSpacing::Linear).unwrap())
            .with_seed(11);
        let request = FitRequest {
            bootstrap: Some(config),
            ..FitRequest::new(CurveMethod::Lowess(LowessConfig::default()))
        };

        let run = run_fit("noisy", &obs, &request).unwrap();
        let band = run.band().unwrap();
        assert!(run.fit.is_none());
        assert_eq!(run.curve.x, band.grid);
        assert_eq!(band.lower.len(), 25);
        assert!(band.lower.iter().zip(&band.upper).all(|(l, u)| l <= u));
        assert_eq!(run.to_curve_file().band.as_ref(), Some(band));
    }

    #[test]
    fn failed_groups_are_collected() {
        let good = dilution_line();
        let flat_x = Observations::new(vec![4.0, 4.0, 4.0], vec![1.0, 2.0, 3.0]).unwrap();
        let request = FitRequest::new(CurveMethod::Parametric(ModelKind::Linear));
        let (runs, failed) = run_groups([("good", &good), ("flat", &flat_x)], &request);
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].group, "good");
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, "flat");
        // A single distinct x cannot span a grid either.
        assert_eq!(failed[0].1.kind(), ErrorKind::InvalidConfiguration);
    }

    #[test]
    fn degenerate_resamples_follow_the_policy() {
        let obs = Observations::new(vec![1.0, 1.0, 1.0, 2.0], vec![1.0, 1.1, 0.9, 2.0]).unwrap();
        let abort = BootstrapConfig::new(200, 0.9, BandMethod::Normal).unwrap().with_seed(3);
        let request = FitRequest {
            bootstrap: Some(abort.clone()),
            ..FitRequest::new(CurveMethod::Parametric(ModelKind::Linear))
        };
        let err = run_fit("g", &obs, &request).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FitDivergence);

        let retry = abort
            .with_degenerate_policy(DegeneratePolicy::Retry { max_attempts: 60 })
            .unwrap();
        let request = FitRequest {
            bootstrap: Some(retry),
            ..request
        };
        assert!(run_fit("g", &obs, &request).is_ok());
    }
}
