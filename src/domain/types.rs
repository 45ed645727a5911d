//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory during fitting and banding
//! - exported to JSON/CSV
//! - reloaded later for plotting or inversion

use std::str::FromStr;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{FitError, FitResult};

/// Paired `(x, y)` observations.
///
/// Invariant: `x.len() == y.len() >= 2` and every value is finite. The fields are
/// private so the invariant can only be established through [`Observations::new`].
#[derive(Debug, Clone, PartialEq)]
pub struct Observations {
    x: Vec<f64>,
    y: Vec<f64>,
}

impl Observations {
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> FitResult<Self> {
        if x.len() != y.len() {
            return Err(FitError::InvalidInput(format!(
                "x and y lengths differ ({} vs {})",
                x.len(),
                y.len()
            )));
        }
        if x.len() < 2 {
            return Err(FitError::InvalidInput(format!(
                "at least 2 observations are required, got {}",
                x.len()
            )));
        }
        if let Some(i) = x.iter().zip(y.iter()).position(|(a, b)| !(a.is_finite() && b.is_finite())) {
            return Err(FitError::InvalidInput(format!(
                "non-finite value in observation {i}"
            )));
        }
        Ok(Self { x, y })
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn y(&self) -> &[f64] {
        &self.y
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Build a new observation set from row indices (with repetition).
    pub fn resample(&self, indices: &[usize]) -> FitResult<Self> {
        let mut x = Vec::with_capacity(indices.len());
        let mut y = Vec::with_capacity(indices.len());
        for &i in indices {
            if i >= self.len() {
                return Err(FitError::InvalidInput(format!(
                    "resample index {i} out of bounds for {} observations",
                    self.len()
                )));
            }
            x.push(self.x[i]);
            y.push(self.y[i]);
        }
        Self::new(x, y)
    }

    /// `(min, max)` of the x-values.
    pub fn x_range(&self) -> (f64, f64) {
        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        for &v in &self.x {
            lo = lo.min(v);
            hi = hi.max(v);
        }
        (lo, hi)
    }

    /// `(min, max)` of the y-values.
    pub fn y_range(&self) -> (f64, f64) {
        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        for &v in &self.y {
            lo = lo.min(v);
            hi = hi.max(v);
        }
        (lo, hi)
    }
}

/// Parametric curve family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
pub enum ModelKind {
    /// `y = slope * x + intercept`
    #[serde(rename = "linear")]
    #[value(name = "linear")]
    Linear,
    /// `y = slope * log2(x) + intercept` (dilution-series regression).
    #[serde(rename = "log2-linear")]
    #[value(name = "log2-linear")]
    Log2Linear,
    /// Four-parameter logistic: bottom, slope, midpoint, top.
    #[serde(rename = "four-pl")]
    #[value(name = "four-pl")]
    FourPl,
    /// Specific binding with Hill slope: bmax, h, kd.
    #[serde(rename = "hill")]
    #[value(name = "hill")]
    Hill,
}

impl ModelKind {
    /// Human-readable label for terminal output.
    pub fn display_name(self) -> &'static str {
        match self {
            ModelKind::Linear => "Linear",
            ModelKind::Log2Linear => "Linear (log2 x)",
            ModelKind::FourPl => "4PL",
            ModelKind::Hill => "Hill",
        }
    }

    /// Parameter names in tuple order.
    pub fn param_names(self) -> &'static [&'static str] {
        match self {
            ModelKind::Linear | ModelKind::Log2Linear => &["slope", "intercept"],
            ModelKind::FourPl => &["bottom", "slope", "midpoint", "top"],
            ModelKind::Hill => &["bmax", "h", "kd"],
        }
    }

    pub fn param_count(self) -> usize {
        self.param_names().len()
    }

    /// Whether the closed-form solution is an ordinary least squares problem.
    pub fn is_linear(self) -> bool {
        matches!(self, ModelKind::Linear | ModelKind::Log2Linear)
    }
}

/// A fitted parameter tuple.
///
/// Deserialization goes through [`CurveParams::new`], so a loaded curve always
/// has the arity of its kind and finite values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCurveParams")]
pub struct CurveParams {
    pub kind: ModelKind,
    pub values: Vec<f64>,
}

#[derive(Deserialize)]
struct RawCurveParams {
    kind: ModelKind,
    values: Vec<f64>,
}

impl TryFrom<RawCurveParams> for CurveParams {
    type Error = FitError;

    fn try_from(raw: RawCurveParams) -> Result<Self, Self::Error> {
        CurveParams::new(raw.kind, raw.values)
    }
}

impl CurveParams {
    pub fn new(kind: ModelKind, values: Vec<f64>) -> FitResult<Self> {
        if values.len() != kind.param_count() {
            return Err(FitError::InvalidInput(format!(
                "{} expects {} parameters, got {}",
                kind.display_name(),
                kind.param_count(),
                values.len()
            )));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(FitError::InvalidInput("non-finite curve parameter".to_string()));
        }
        Ok(Self { kind, values })
    }

    /// Evaluate the curve at `x`.
    pub fn evaluate(&self, x: f64) -> f64 {
        crate::models::predict(self.kind, x, &self.values)
    }

    /// Evaluate the curve on every grid point.
    pub fn evaluate_grid(&self, grid: &[f64]) -> Vec<f64> {
        grid.iter().map(|&x| self.evaluate(x)).collect()
    }

    /// Named view of the parameters, in tuple order.
    pub fn named(&self) -> Vec<(&'static str, f64)> {
        self.kind
            .param_names()
            .iter()
            .copied()
            .zip(self.values.iter().copied())
            .collect()
    }
}

/// Fit quality diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitQuality {
    pub sse: f64,
    pub rmse: f64,
    pub r_squared: f64,
    pub n: usize,
    /// Solver iterations (0 for closed-form fits).
    pub iterations: usize,
}

/// How a confidence band is summarized from the bootstrap ensemble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BandMethod {
    /// Empirical order statistics per grid column.
    #[default]
    Percentile,
    /// Mean ± z · standard deviation per grid column.
    Normal,
}

impl BandMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            BandMethod::Percentile => "percentile",
            BandMethod::Normal => "normal",
        }
    }
}

impl FromStr for BandMethod {
    type Err = FitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "percentile" => Ok(BandMethod::Percentile),
            "normal" => Ok(BandMethod::Normal),
            other => Err(FitError::InvalidConfiguration(format!(
                "unknown band method '{other}' (expected 'percentile' or 'normal')"
            ))),
        }
    }
}

/// Spacing of an implicit evaluation grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum GridSpacing {
    #[default]
    Linear,
    Geometric,
}

impl FromStr for GridSpacing {
    type Err = FitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linear" => Ok(GridSpacing::Linear),
            "geometric" => Ok(GridSpacing::Geometric),
            other => Err(FitError::InvalidConfiguration(format!(
                "unknown grid spacing '{other}' (expected 'linear' or 'geometric')"
            ))),
        }
    }
}

/// Serialized grid options. Missing bounds default to the observed x-range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GridSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default = "default_grid_points")]
    pub n_points: usize,
    #[serde(default)]
    pub spacing: GridSpacing,
}

fn default_grid_points() -> usize {
    100
}

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            points: None,
            min: None,
            max: None,
            n_points: default_grid_points(),
            spacing: GridSpacing::Linear,
        }
    }
}

/// Validated evaluation grid specification.
#[derive(Debug, Clone, PartialEq)]
pub enum GridSpec {
    /// Caller-supplied x-values, used as-is.
    Explicit(Vec<f64>),
    /// `n_points` values between `min` and `max` (observed range when `None`).
    Spaced {
        min: Option<f64>,
        max: Option<f64>,
        n_points: usize,
        spacing: GridSpacing,
    },
}

impl Default for GridSpec {
    fn default() -> Self {
        GridSpec::Spaced {
            min: None,
            max: None,
            n_points: default_grid_points(),
            spacing: GridSpacing::Linear,
        }
    }
}

impl GridSpec {
    pub fn explicit(points: Vec<f64>) -> FitResult<Self> {
        if points.is_empty() {
            return Err(FitError::InvalidConfiguration("explicit grid is empty".to_string()));
        }
        if points.iter().any(|v| !v.is_finite()) {
            return Err(FitError::InvalidConfiguration(
                "explicit grid contains non-finite values".to_string(),
            ));
        }
        Ok(GridSpec::Explicit(points))
    }

    pub fn spaced(min: Option<f64>, max: Option<f64>, n_points: usize, spacing: GridSpacing) -> FitResult<Self> {
        if n_points < 2 {
            return Err(FitError::InvalidConfiguration(format!(
                "grid needs at least 2 points, got {n_points}"
            )));
        }
        if min.is_some_and(|v| !v.is_finite()) || max.is_some_and(|v| !v.is_finite()) {
            return Err(FitError::InvalidConfiguration("grid bounds must be finite".to_string()));
        }
        if let (Some(lo), Some(hi)) = (min, max) {
            if lo >= hi {
                return Err(FitError::InvalidConfiguration(format!(
                    "grid min ({lo}) must be below grid max ({hi})"
                )));
            }
        }
        if spacing == GridSpacing::Geometric && min.is_some_and(|v| v <= 0.0) {
            return Err(FitError::InvalidConfiguration(
                "geometric grid needs a positive minimum".to_string(),
            ));
        }
        Ok(GridSpec::Spaced {
            min,
            max,
            n_points,
            spacing,
        })
    }

    /// Materialize the grid, filling missing bounds from `data_range`.
    pub fn build(&self, data_range: (f64, f64)) -> FitResult<Vec<f64>> {
        match self {
            GridSpec::Explicit(points) => Ok(points.clone()),
            GridSpec::Spaced {
                min,
                max,
                n_points,
                spacing,
            } => {
                let lo = min.unwrap_or(data_range.0);
                let hi = max.unwrap_or(data_range.1);
                match spacing {
                    GridSpacing::Linear => crate::math::linspace(lo, hi, *n_points),
                    GridSpacing::Geometric => crate::math::geomspace(lo, hi, *n_points),
                }
            }
        }
    }
}

impl TryFrom<GridSettings> for GridSpec {
    type Error = FitError;

    fn try_from(value: GridSettings) -> Result<Self, Self::Error> {
        match value.points {
            Some(points) => GridSpec::explicit(points),
            None => GridSpec::spaced(value.min, value.max, value.n_points, value.spacing),
        }
    }
}

/// What to do when a bootstrap resample cannot be fitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DegeneratePolicy {
    /// The first failing replicate aborts the whole estimate.
    #[default]
    Abort,
    /// Redraw the failing replicate's resample up to `max_attempts` times, then abort.
    Retry { max_attempts: usize },
}

/// Serialized bootstrap options (e.g. loaded from `--config`).
///
/// Unknown keys are rejected when deserializing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BootstrapSettings {
    #[serde(default = "default_replicates")]
    pub replicates: usize,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub band_method: BandMethod,
    #[serde(default)]
    pub grid: GridSettings,
    #[serde(default)]
    pub seed: u64,
    /// Maximum redraws per replicate; absent means abort on the first failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<usize>,
}

fn default_replicates() -> usize {
    250
}

fn default_confidence() -> f64 {
    0.95
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        Self {
            replicates: default_replicates(),
            confidence: default_confidence(),
            band_method: BandMethod::Percentile,
            grid: GridSettings::default(),
            seed: 0,
            retry: None,
        }
    }
}

impl BootstrapSettings {
    /// Parse settings from JSON, rejecting unknown option names.
    pub fn from_json_str(json: &str) -> FitResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| FitError::InvalidConfiguration(format!("bootstrap settings: {e}")))
    }
}

/// Validated bootstrap configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapConfig {
    replicates: usize,
    confidence: f64,
    band_method: BandMethod,
    grid: GridSpec,
    seed: u64,
    degenerate: DegeneratePolicy,
}

impl BootstrapConfig {
    pub fn new(replicates: usize, confidence: f64, band_method: BandMethod) -> FitResult<Self> {
        if !(confidence.is_finite() && confidence > 0.0 && confidence < 1.0) {
            return Err(FitError::InvalidConfiguration(format!(
                "confidence must be in (0, 1), got {confidence}"
            )));
        }
        crate::fit::bootstrap::check_replicates(replicates, confidence, band_method)?;
        Ok(Self {
            replicates,
            confidence,
            band_method,
            grid: GridSpec::default(),
            seed: 0,
            degenerate: DegeneratePolicy::Abort,
        })
    }

    pub fn with_grid(mut self, grid: GridSpec) -> Self {
        self.grid = grid;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_degenerate_policy(mut self, policy: DegeneratePolicy) -> FitResult<Self> {
        if let DegeneratePolicy::Retry { max_attempts } = policy {
            if max_attempts == 0 {
                return Err(FitError::InvalidConfiguration(
                    "retry policy needs max_attempts >= 1".to_string(),
                ));
            }
        }
        self.degenerate = policy;
        Ok(self)
    }

    pub fn replicates(&self) -> usize {
        self.replicates
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn band_method(&self) -> BandMethod {
        self.band_method
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn degenerate_policy(&self) -> DegeneratePolicy {
        self.degenerate
    }
}

impl TryFrom<BootstrapSettings> for BootstrapConfig {
    type Error = FitError;

    fn try_from(value: BootstrapSettings) -> Result<Self, Self::Error> {
        let grid = GridSpec::try_from(value.grid)?;
        let policy = match value.retry {
            Some(max_attempts) => DegeneratePolicy::Retry { max_attempts },
            None => DegeneratePolicy::Abort,
        };
        BootstrapConfig::new(value.replicates, value.confidence, value.band_method)?
            .with_grid(grid)
            .with_seed(value.seed)
            .with_degenerate_policy(policy)
    }
}

/// LOWESS smoothing options.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LowessConfig {
    /// Fraction of observations in each local window.
    pub frac: f64,
    /// Robustifying (re-weighting) iterations after the initial fit.
    pub iterations: usize,
}

impl Default for LowessConfig {
    fn default() -> Self {
        Self {
            frac: 0.5,
            iterations: 3,
        }
    }
}

impl LowessConfig {
    pub fn new(frac: f64, iterations: usize) -> FitResult<Self> {
        let config = Self { frac, iterations };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> FitResult<()> {
        if !(self.frac.is_finite() && self.frac > 0.0 && self.frac <= 1.0) {
            return Err(FitError::InvalidConfiguration(format!(
                "LOWESS fraction must be in (0, 1], got {}",
                self.frac
            )));
        }
        Ok(())
    }
}

/// Which curve to fit: a parametric family or a LOWESS smooth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CurveMethod {
    Parametric(ModelKind),
    Lowess(LowessConfig),
}

impl CurveMethod {
    pub fn display_name(&self) -> String {
        match self {
            CurveMethod::Parametric(kind) => kind.display_name().to_string(),
            CurveMethod::Lowess(cfg) => format!("LOWESS (frac={:.2}, it={})", cfg.frac, cfg.iterations),
        }
    }
}

/// Lower/upper confidence band on a fixed grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub grid: Vec<f64>,
    pub method: BandMethod,
    pub confidence: f64,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

/// Grid plus fitted values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveGrid {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

/// A saved curve file (JSON).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveFile {
    pub tool: String,
    pub generated_at: DateTime<Utc>,
    pub group: String,
    pub method: CurveMethod,
    /// Parameters for parametric fits; absent for LOWESS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<CurveParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<FitQuality>,
    pub grid: CurveGrid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub band: Option<Band>,
}
