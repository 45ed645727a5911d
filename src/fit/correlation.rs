//! Pairwise correlation matrix with p-values, in long form.
//!
//! Every ordered pair of columns gets one cell. Cells carry the flags a
//! heatmap renderer needs to encode strength (`|r| ≥ 0.5`) and significance
//! (`p ≤ 0.051`).

use std::str::FromStr;

use clap::ValueEnum;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};

use crate::error::{FitError, FitResult};
use crate::math::{average_ranks, mean};

pub const STRONG_R: f64 = 0.5;
pub const SIGNIFICANT_P: f64 = 0.051;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationMethod {
    #[default]
    Pearson,
    Spearman,
}

impl FromStr for CorrelationMethod {
    type Err = FitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pearson" => Ok(CorrelationMethod::Pearson),
            "spearman" => Ok(CorrelationMethod::Spearman),
            "kendall" => Err(FitError::InvalidConfiguration(
                "kendall correlation is not supported; use pearson or spearman".to_string(),
            )),
            other => Err(FitError::InvalidConfiguration(format!(
                "unknown correlation method '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationCell {
    pub feature_x: String,
    pub feature_y: String,
    pub r: f64,
    pub p_value: f64,
    pub strong: bool,
    pub significant: bool,
}

/// Pearson r and its two-sided p-value (Student's t, n − 2 degrees of freedom).
pub fn pearson(x: &[f64], y: &[f64]) -> FitResult<(f64, f64)> {
    if x.len() != y.len() {
        return Err(FitError::InvalidInput(format!(
            "columns differ in length ({} vs {})",
            x.len(),
            y.len()
        )));
    }
    let n = x.len();
    if n < 3 {
        return Err(FitError::InsufficientData(format!(
            "correlation needs at least 3 rows, got {n}"
        )));
    }

    let mx = mean(x);
    let my = mean(y);
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (a, b) in x.iter().zip(y.iter()) {
        let dx = a - mx;
        let dy = b - my;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx == 0.0 || syy == 0.0 {
        return Err(FitError::InsufficientData(
            "correlation is undefined for a constant column".to_string(),
        ));
    }
    let r = (sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0);
    Ok((r, p_value(r, n)))
}

/// Spearman rank correlation (average ranks for ties).
pub fn spearman(x: &[f64], y: &[f64]) -> FitResult<(f64, f64)> {
    if x.len() != y.len() {
        return Err(FitError::InvalidInput(format!(
            "columns differ in length ({} vs {})",
            x.len(),
            y.len()
        )));
    }
    pearson(&average_ranks(x), &average_ranks(y))
}

fn p_value(r: f64, n: usize) -> f64 {
    let df = (n - 2) as f64;
    if r.abs() >= 1.0 {
        return 0.0;
    }
    let t = r * (df / (1.0 - r * r)).sqrt();
    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => (2.0 * (1.0 - dist.cdf(t.abs()))).clamp(0.0, 1.0),
        Err(_) => f64::NAN,
    }
}

/// Long-form correlation matrix over named columns.
///
/// Cells are ordered by `feature_y`, then `feature_x`, both in column order.
pub fn correlation_matrix(columns: &[(String, Vec<f64>)], method: CorrelationMethod) -> FitResult<Vec<CorrelationCell>> {
    if columns.is_empty() {
        return Err(FitError::InvalidInput("no columns to correlate".to_string()));
    }
    let pairs: Vec<(usize, usize)> = (0..columns.len())
        .flat_map(|j| (0..columns.len()).map(move |i| (i, j)))
        .collect();

    pairs
        .par_iter()
        .map(|&(i, j)| {
            let (name_x, x) = &columns[i];
            let (name_y, y) = &columns[j];
            let (r, p_value) = match method {
                CorrelationMethod::Pearson => pearson(x, y),
                CorrelationMethod::Spearman => spearman(x, y),
            }
            .map_err(|e| match e {
                FitError::InsufficientData(msg) => FitError::InsufficientData(format!("{name_x} ~ {name_y}: {msg}")),
                other => other,
            })?;
            Ok(CorrelationCell {
                feature_x: name_x.clone(),
                feature_y: name_y.clone(),
                r,
                p_value,
                strong: r.abs() >= STRONG_R,
                significant: p_value <= SIGNIFICANT_P,
            })
        })
        .collect()
}

/// Conventional star annotation for a p-value.
pub fn significance_stars(p: f64) -> &'static str {
    if p <= 0.0001 {
        "****"
    } else if p <= 0.001 {
        "***"
    } else if p <= 0.01 {
        "**"
    } else if p <= 0.05 {
        "*"
    } else {
        "ns"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn pearson_matches_reference_values() {
        let (r, p) = pearson(&[1.0, 2.0, 3.0, 4.0, 5.0], &[2.0, 4.0, 5.0, 4.0, 5.0]).unwrap();
        assert!((r - 0.774_596_669_2).abs() < 1e-9);
        assert!((p - 0.124).abs() < 1e-3, "p={p}");
    }

    #[test]
    fn spearman_averages_tied_ranks() {
        let (r, _) = spearman(&[1.0, 2.0, 3.0, 4.0, 5.0], &[2.0, 4.0, 5.0, 4.0, 5.0]).unwrap();
        assert!((r - 7.0 / 90f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn perfect_correlation_has_zero_p() {
        let (r, p) = pearson(&[1.0, 2.0, 3.0], &[10.0, 20.0, 30.0]).unwrap();
        assert!((r - 1.0).abs() < 1e-12);
        assert_eq!(p, 0.0);
    }

    #[test]
    fn matrix_is_long_form_with_flags() {
        let columns = vec![
            ("a".to_string(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]),
            ("b".to_string(), vec![2.0, 4.1, 5.9, 8.2, 9.8, 12.1]),
            ("c".to_string(), vec![3.0, 1.0, 4.0, 1.0, 5.0, 9.0]),
        ];
        let cells = correlation_matrix(&columns, CorrelationMethod::Pearson).unwrap();
        assert_eq!(cells.len(), 9);
        assert_eq!((cells[1].feature_x.as_str(), cells[1].feature_y.as_str()), ("b", "a"));
        let ab = &cells[1];
        assert!(ab.strong && ab.significant);
        let diag = &cells[4];
        assert_eq!(diag.feature_x, diag.feature_y);
        assert!((diag.r - 1.0).abs() < 1e-12);
    }

    #[test]
    fn kendall_and_short_columns_are_rejected() {
        assert_eq!(
            "kendall".parse::<CorrelationMethod>().unwrap_err().kind(),
            ErrorKind::InvalidConfiguration
        );
        assert_eq!(
            pearson(&[1.0, 2.0], &[1.0, 2.0]).unwrap_err().kind(),
            ErrorKind::InsufficientData
        );
    }

    #[test]
    fn stars_follow_thresholds() {
        assert_eq!(significance_stars(0.2), "ns");
        assert_eq!(significance_stars(0.04), "*");
        assert_eq!(significance_stars(0.005), "**");
        assert_eq!(significance_stars(0.0005), "***");
        assert_eq!(significance_stars(0.00001), "****");
    }
}
