//! Avidity index from ELISA dilution series.
//!
//! Each plate row carries OD readings across a dilution series for one sample,
//! either treated (chaotrope wash) or untreated. Per row we:
//!
//! 1. subtract the blank from every OD
//! 2. fit `OD = slope · log2(dilution) + intercept`
//! 3. integrate the predicted ODs over the untransformed dilutions (trapezoid)
//!
//! The avidity index of a sample is `AUC(treated) / AUC(untreated)`, pairing the
//! two arms by [`SampleKey`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::{ModelKind, Observations};
use crate::error::{FitError, FitResult};
use crate::fit::fitter::{FitOptions, fit_curve};
use crate::math::trapezoid;

/// Identity of one sample across the treated/untreated arms.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SampleKey {
    pub subject: String,
    pub antigen: String,
    pub isotype: String,
    pub timepoint: String,
}

impl fmt::Display for SampleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.subject, self.antigen, self.isotype)?;
        if !self.timepoint.is_empty() {
            write!(f, "/{}", self.timepoint)?;
        }
        Ok(())
    }
}

/// One plate row: raw ODs aligned with the dilution factors.
#[derive(Debug, Clone, PartialEq)]
pub struct PlateRow {
    pub key: SampleKey,
    pub treated: bool,
    pub blank: f64,
    pub od: Vec<f64>,
}

/// Column names and dilution factors, in plate order.
#[derive(Debug, Clone, PartialEq)]
pub struct DilutionMap {
    pub columns: Vec<String>,
    pub factors: Vec<f64>,
}

impl Default for DilutionMap {
    fn default() -> Self {
        let factors = vec![1.0, 2.0, 4.0, 8.0, 16.0, 32.0];
        let columns = factors.iter().map(|f| format!("dil_{f}")).collect();
        Self { columns, factors }
    }
}

impl DilutionMap {
    pub fn new(pairs: Vec<(String, f64)>) -> FitResult<Self> {
        let (columns, factors): (Vec<String>, Vec<f64>) = pairs.into_iter().unzip();
        let map = Self { columns, factors };
        map.validate()?;
        Ok(map)
    }

    pub fn validate(&self) -> FitResult<()> {
        if self.factors.len() < 2 {
            return Err(FitError::InvalidConfiguration(
                "at least 2 dilution columns are required".to_string(),
            ));
        }
        if self.factors.iter().any(|f| !(f.is_finite() && *f > 0.0)) {
            return Err(FitError::InvalidConfiguration(
                "dilution factors must be positive".to_string(),
            ));
        }
        for (i, f) in self.factors.iter().enumerate() {
            if self.factors[..i].contains(f) {
                return Err(FitError::InvalidConfiguration(format!(
                    "dilution factor {f} appears more than once"
                )));
            }
        }
        Ok(())
    }
}

/// Avidity options.
#[derive(Debug, Clone, PartialEq)]
pub struct AvidityOptions {
    /// Zero negative predicted ODs before integrating.
    pub clip_negative: bool,
    /// Rows with R² at or below this are flagged as low quality.
    pub r2_threshold: f64,
}

impl Default for AvidityOptions {
    fn default() -> Self {
        Self {
            clip_negative: true,
            r2_threshold: 0.85,
        }
    }
}

/// Per-row regression and AUC.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowFit {
    pub key: SampleKey,
    pub treated: bool,
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    pub predicted: Vec<f64>,
    pub auc: f64,
    pub low_quality: bool,
}

/// Why a sample did not get an avidity index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    ZeroUntreatedAuc,
    MissingTreated,
    MissingUntreated,
    DuplicateRow,
}

impl ExclusionReason {
    pub fn describe(self) -> &'static str {
        match self {
            ExclusionReason::ZeroUntreatedAuc => "untreated AUC is zero",
            ExclusionReason::MissingTreated => "no treated row",
            ExclusionReason::MissingUntreated => "no untreated row",
            ExclusionReason::DuplicateRow => "more than one row for an arm",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AvidityIndex {
    pub key: SampleKey,
    pub treated_auc: f64,
    pub untreated_auc: f64,
    pub index: f64,
    /// Either arm's regression was flagged low quality.
    pub low_quality: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Exclusion {
    pub key: SampleKey,
    pub reason: ExclusionReason,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AvidityReport {
    pub rows: Vec<RowFit>,
    pub indices: Vec<AvidityIndex>,
    pub excluded: Vec<Exclusion>,
}

/// Blank-subtract, regress on log2(dilution) and integrate one row.
pub fn fit_plate_row(row: &PlateRow, dilutions: &[f64], opts: &AvidityOptions) -> FitResult<RowFit> {
    if row.od.len() != dilutions.len() {
        return Err(FitError::InvalidInput(format!(
            "{}: {} OD values for {} dilutions",
            row.key,
            row.od.len(),
            dilutions.len()
        )));
    }
    let y: Vec<f64> = row.od.iter().map(|od| od - row.blank).collect();
    let obs = Observations::new(dilutions.to_vec(), y)?;
    let fit = fit_curve(ModelKind::Log2Linear, &obs, &FitOptions::default())?;

    let predicted = fit.params.evaluate_grid(dilutions);
    let integrand: Vec<f64> = if opts.clip_negative {
        predicted.iter().map(|v| v.max(0.0)).collect()
    } else {
        predicted.clone()
    };
    let auc = trapezoid(dilutions, &integrand);
    let r_squared = fit.quality.r_squared;

    Ok(RowFit {
        key: row.key.clone(),
        treated: row.treated,
        slope: fit.params.values[0],
        intercept: fit.params.values[1],
        r_squared,
        predicted,
        auc,
        low_quality: r_squared <= opts.r2_threshold,
    })
}

#[derive(Default)]
struct Arms {
    treated: Vec<usize>,
    untreated: Vec<usize>,
}

/// Fit every row and pair treated/untreated arms by sample key.
pub fn avidity_index(rows: &[PlateRow], dilutions: &DilutionMap, opts: &AvidityOptions) -> FitResult<AvidityReport> {
    dilutions.validate()?;
    let fits = rows
        .iter()
        .map(|r| fit_plate_row(r, &dilutions.factors, opts))
        .collect::<FitResult<Vec<RowFit>>>()?;

    let mut arms: BTreeMap<&SampleKey, Arms> = BTreeMap::new();
    for (i, f) in fits.iter().enumerate() {
        let entry = arms.entry(&f.key).or_default();
        if f.treated {
            entry.treated.push(i);
        } else {
            entry.untreated.push(i);
        }
    }

    let mut indices = Vec::new();
    let mut excluded = Vec::new();
    for (key, arm) in arms {
        let reason = match (arm.treated.as_slice(), arm.untreated.as_slice()) {
            ([t], [u]) => {
                let (treated, untreated) = (&fits[*t], &fits[*u]);
                if untreated.auc == 0.0 {
                    Some(ExclusionReason::ZeroUntreatedAuc)
                } else {
                    indices.push(AvidityIndex {
                        key: key.clone(),
                        treated_auc: treated.auc,
                        untreated_auc: untreated.auc,
                        index: treated.auc / untreated.auc,
                        low_quality: treated.low_quality || untreated.low_quality,
                    });
                    None
                }
            }
            ([], _) => Some(ExclusionReason::MissingTreated),
            (_, []) => Some(ExclusionReason::MissingUntreated),
            _ => Some(ExclusionReason::DuplicateRow),
        };
        if let Some(reason) = reason {
            tracing::warn!(sample = %key, reason = reason.describe(), "excluded from avidity index");
            excluded.push(Exclusion {
                key: key.clone(),
                reason,
            });
        }
    }

    tracing::info!(
        rows = fits.len(),
        indices = indices.len(),
        excluded = excluded.len(),
        "avidity index computed"
    );
    Ok(AvidityReport {
        rows: fits,
        indices,
        excluded,
    })
}
