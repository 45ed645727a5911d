//! Per-channel fluorescence intensity densities.
//!
//! Exported scale values are floored (dim events below a threshold are pinned to
//! a fixed value), log10-transformed, and smoothed with a Gaussian kernel density
//! estimate using Scott's bandwidth scaled by `bw_adjust`.

use std::f64::consts::PI;

use crate::error::{FitError, FitResult};
use crate::math::{linspace, std_dev};

/// Bandwidths of padding on each side of the evaluation grid.
const CUT: f64 = 3.0;

#[derive(Debug, Clone, PartialEq)]
pub struct DensityOptions {
    /// Values below this are replaced by `replacement`.
    pub threshold: f64,
    pub replacement: f64,
    pub bw_adjust: f64,
    pub points: usize,
}

impl Default for DensityOptions {
    fn default() -> Self {
        Self {
            threshold: 9.9,
            replacement: 10.0,
            bw_adjust: 0.5,
            points: 200,
        }
    }
}

impl DensityOptions {
    pub fn validate(&self) -> FitResult<()> {
        if !(self.threshold.is_finite() && self.threshold > 0.0) {
            return Err(FitError::InvalidConfiguration(format!(
                "floor threshold must be positive, got {}",
                self.threshold
            )));
        }
        if !(self.replacement.is_finite() && self.replacement > 0.0) {
            return Err(FitError::InvalidConfiguration(format!(
                "floor replacement must be positive, got {}",
                self.replacement
            )));
        }
        if !(self.bw_adjust.is_finite() && self.bw_adjust > 0.0) {
            return Err(FitError::InvalidConfiguration(format!(
                "bw_adjust must be positive, got {}",
                self.bw_adjust
            )));
        }
        if self.points < 2 {
            return Err(FitError::InvalidConfiguration("density grid needs at least 2 points".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelDensity {
    pub channel: String,
    /// log10 intensity grid.
    pub x: Vec<f64>,
    pub density: Vec<f64>,
    pub bandwidth: f64,
    pub n: usize,
}

impl ChannelDensity {
    /// Grid position of the highest density.
    pub fn mode(&self) -> Option<f64> {
        self.density
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| self.x[i])
    }
}

/// Floor then log10-transform raw intensities.
pub fn floor_log10(values: &[f64], opts: &DensityOptions) -> Vec<f64> {
    values
        .iter()
        .map(|&v| if v < opts.threshold { opts.replacement } else { v })
        .map(f64::log10)
        .collect()
}

/// Density estimate for one channel.
pub fn channel_density(channel: &str, values: &[f64], opts: &DensityOptions) -> FitResult<ChannelDensity> {
    opts.validate()?;
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.len() < 2 {
        return Err(FitError::InsufficientData(format!(
            "channel '{channel}' has {} finite value(s)",
            finite.len()
        )));
    }

    let data = floor_log10(&finite, opts);
    let n = data.len();
    let sigma = std_dev(&data, 1);
    if !(sigma.is_finite() && sigma > 0.0) {
        return Err(FitError::InsufficientData(format!(
            "channel '{channel}' has no spread after flooring"
        )));
    }
    let bandwidth = sigma * (n as f64).powf(-0.2) * opts.bw_adjust;

    let lo = data.iter().copied().fold(f64::INFINITY, f64::min) - CUT * bandwidth;
    let hi = data.iter().copied().fold(f64::NEG_INFINITY, f64::max) + CUT * bandwidth;
    let x = linspace(lo, hi, opts.points)?;

    let norm = 1.0 / (n as f64 * bandwidth * (2.0 * PI).sqrt());
    let density = x
        .iter()
        .map(|&g| {
            norm * data
                .iter()
                .map(|&d| {
                    let u = (g - d) / bandwidth;
                    (-0.5 * u * u).exp()
                })
                .sum::<f64>()
        })
        .collect();

    Ok(ChannelDensity {
        channel: channel.to_string(),
        x,
        density,
        bandwidth,
        n,
    })
}

/// Densities for every channel not named in `drop`.
pub fn flow_densities(
    columns: &[(String, Vec<f64>)],
    drop: &[String],
    opts: &DensityOptions,
) -> FitResult<Vec<ChannelDensity>> {
    columns
        .iter()
        .filter(|(name, _)| !drop.iter().any(|d| d == name))
        .map(|(name, values)| channel_density(name, values, opts))
        .collect()
}
