//! Synthetic assay data with known ground truth.
//!
//! Each generator is deterministic for a given seed so demo output and tests
//! are reproducible.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::domain::{CurveParams, ModelKind, Observations};
use crate::error::AppError;
use crate::math::linspace;

/// Two-fold dilution steps in the 4PL demo (1 .. 2048).
const DILUTION_STEPS: u32 = 12;
const REPLICATES_PER_DILUTION: usize = 3;
const FOUR_PL_NOISE_SD: f64 = 0.04;

const LOWESS_POINTS: usize = 80;
const LOWESS_NOISE_SD: f64 = 0.25;
/// Every n-th point of the LOWESS demo is pushed up by `OUTLIER_SHIFT`.
const OUTLIER_EVERY: usize = 17;
const OUTLIER_SHIFT: f64 = 2.5;

#[derive(Debug, Clone)]
pub struct DemoDataset {
    pub name: String,
    pub description: String,
    pub observations: Observations,
    /// Generating curve, when it is parametric.
    pub truth: Option<CurveParams>,
}

/// Triplicate ODs over a two-fold dilution series drawn around a known 4PL.
pub fn four_pl_dilution_series(seed: u64) -> Result<DemoDataset, AppError> {
    let truth = CurveParams::new(ModelKind::FourPl, vec![0.05, 1.0, 64.0, 2.0])?;
    let mut rng = StdRng::seed_from_u64(dataset_seed("four-pl", seed));
    let noise = noise(FOUR_PL_NOISE_SD)?;

    let n = DILUTION_STEPS as usize * REPLICATES_PER_DILUTION;
    let mut x = Vec::with_capacity(n);
    let mut y = Vec::with_capacity(n);
    for step in 0..DILUTION_STEPS {
        let conc = 2f64.powi(step as i32);
        let level = truth.evaluate(conc);
        for _ in 0..REPLICATES_PER_DILUTION {
            x.push(conc);
            y.push(level + noise.sample(&mut rng));
        }
    }

    Ok(DemoDataset {
        name: "dilution-4pl".to_string(),
        description: format!(
            "{DILUTION_STEPS} two-fold dilutions x {REPLICATES_PER_DILUTION} replicates, 4PL truth (bottom=0.05, slope=1, midpoint=64, top=2), sd={FOUR_PL_NOISE_SD}"
        ),
        observations: Observations::new(x, y)?,
        truth: Some(truth),
    })
}

/// A smooth nonlinear trend with Gaussian noise and a few large outliers.
pub fn noisy_lowess_series(seed: u64) -> Result<DemoDataset, AppError> {
    let mut rng = StdRng::seed_from_u64(dataset_seed("lowess", seed));
    let noise = noise(LOWESS_NOISE_SD)?;

    let x = linspace(0.0, 10.0, LOWESS_POINTS)?;
    let y = x
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            let shift = if i % OUTLIER_EVERY == OUTLIER_EVERY - 1 { OUTLIER_SHIFT } else { 0.0 };
            trend(v) + noise.sample(&mut rng) + shift
        })
        .collect();

    Ok(DemoDataset {
        name: "noisy-trend".to_string(),
        description: format!(
            "{LOWESS_POINTS} points of sin(x) + 0.1x, sd={LOWESS_NOISE_SD}, +{OUTLIER_SHIFT} outlier every {OUTLIER_EVERY} points"
        ),
        observations: Observations::new(x, y)?,
        truth: None,
    })
}

/// Underlying trend of the LOWESS demo.
pub fn trend(x: f64) -> f64 {
    x.sin() + 0.1 * x
}

fn noise(sd: f64) -> Result<Normal<f64>, AppError> {
    Normal::new(0.0, sd).map_err(|e| AppError::new(4, format!("Noise distribution error: {e}")))
}

/// Separate, reproducible streams per dataset from one user seed.
fn dataset_seed(name: &str, seed: u64) -> u64 {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    seed.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LowessConfig;
    use crate::fit::{FitOptions, data_driven_start, fit_curve, lowess};

    #[test]
    fn generators_are_deterministic_per_seed() {
        let a = four_pl_dilution_series(7).unwrap();
        let b = four_pl_dilution_series(7).unwrap();
        let c = four_pl_dilution_series(8).unwrap();
        assert_eq!(a.observations, b.observations);
        assert_ne!(a.observations.y(), c.observations.y());
        assert_eq!(a.observations.len(), 36);
        assert_eq!(a.observations.x_range(), (1.0, 2048.0));
    }

    #[test]
    fn dilution_series_fit_tracks_the_truth() {
        let data = four_pl_dilution_series(1).unwrap();
        let obs = &data.observations;
        let opts = FitOptions {
            initial: data_driven_start(ModelKind::FourPl, obs),
            ..FitOptions::default()
        };
        let fit = fit_curve(ModelKind::FourPl, obs, &opts).unwrap();
        let truth = data.truth.unwrap();
        for x in [4.0, 64.0, 512.0] {
            assert!((fit.params.evaluate(x) - truth.evaluate(x)).abs() < 0.1);
        }
        assert!(fit.quality.r_squared > 0.98);
    }

    #[test]
    fn robust_lowess_tracks_the_trend_through_outliers() {
        let data = noisy_lowess_series(3).unwrap();
        let obs = &data.observations;
        assert_eq!(obs.len(), 80);
        let grid = [2.0, 5.0, 8.0];
        let smooth = lowess(obs, &grid, &LowessConfig { frac: 0.3, iterations: 3 }).unwrap();
        for (x, y) in grid.iter().zip(&smooth) {
            assert!((y - trend(*x)).abs() < 0.6, "x={x} y={y}");
        }
    }
}
