//! Command-line parsing for the assay curve toolkit.
//!
//! The goal of this module is to keep **argument parsing** and **command dispatch**
//! separate from the modeling/math code.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::domain::{BandMethod, GridSpacing, ModelKind};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "assay", version, about = "Bioassay curve fitting: 4PL/Hill/linear fits, LOWESS and bootstrap bands")]
pub struct Cli {
    /// Diagnostics level on stderr (ASSAY_LOG directives take precedence).
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Warn)]
    pub log_level: LogLevel,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit a curve per group from a CSV, with an optional bootstrap band.
    Fit(FitArgs),
    /// Back-calculate x from a response using a saved curve or explicit 4PL parameters.
    Invert(InvertArgs),
    /// Avidity index from treated/untreated ELISA dilution rows.
    Avidity(AvidityArgs),
    /// Pairwise correlation matrix with p-values.
    Corr(CorrArgs),
    /// Per-channel log10 intensity densities.
    Density(DensityArgs),
    /// Plot a previously exported curve JSON.
    Plot(PlotArgs),
    /// Run the pipeline on synthetic data (4PL dilution series and a noisy LOWESS example).
    Demo(DemoArgs),
    /// Launch the interactive viewer.
    ///
    /// This uses the same fit pipeline as `assay fit`, but renders results in a
    /// terminal UI using Ratatui.
    Tui(TuiArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Curve family selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MethodArg {
    Linear,
    #[value(name = "log2-linear")]
    Log2Linear,
    #[value(name = "four-pl")]
    FourPl,
    Hill,
    Lowess,
}

impl MethodArg {
    /// The parametric kind, or `None` for LOWESS.
    pub fn model_kind(self) -> Option<ModelKind> {
        match self {
            MethodArg::Linear => Some(ModelKind::Linear),
            MethodArg::Log2Linear => Some(ModelKind::Log2Linear),
            MethodArg::FourPl => Some(ModelKind::FourPl),
            MethodArg::Hill => Some(ModelKind::Hill),
            MethodArg::Lowess => None,
        }
    }
}

/// Options for `assay fit`.
#[derive(Debug, Args, Clone)]
pub struct FitArgs {
    /// Input CSV.
    #[arg(long, value_name = "CSV")]
    pub csv: PathBuf,

    /// Column holding x (dose, dilution, concentration).
    #[arg(long = "x", value_name = "COL")]
    pub x_col: String,

    /// Column holding the response.
    #[arg(long = "y", value_name = "COL")]
    pub y_col: String,

    /// Fit one curve per distinct value of this column.
    #[arg(long = "group", value_name = "COL")]
    pub group_col: Option<String>,

    /// Curve family.
    #[arg(long, value_enum, default_value_t = MethodArg::FourPl)]
    pub model: MethodArg,

    /// LOWESS window as a fraction of the observations.
    #[arg(long, default_value_t = 0.5)]
    pub frac: f64,

    /// LOWESS robustifying iterations.
    #[arg(long, default_value_t = 3)]
    pub iterations: usize,

    /// Iteration cap for the nonlinear solver.
    #[arg(long, default_value_t = 1000)]
    pub max_iterations: usize,

    /// Explicit starting parameters for 4PL/Hill (comma-separated, tuple order).
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true, conflicts_with = "auto_start")]
    pub initial: Option<Vec<f64>>,

    /// Start 4PL/Hill from asymptotes and midpoint estimated from the data.
    #[arg(long)]
    pub auto_start: bool,

    /// Bootstrap replicates (enables the confidence band).
    #[arg(long, value_name = "K")]
    pub bootstrap: Option<usize>,

    /// Band confidence level in (0, 1).
    #[arg(long, default_value_t = 0.95)]
    pub confidence: f64,

    /// Band summary method.
    #[arg(long, value_enum, default_value_t = BandMethod::Percentile)]
    pub band: BandMethod,

    /// Bootstrap seed.
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Redraw a degenerate resample up to N times instead of aborting.
    #[arg(long, value_name = "N")]
    pub retry: Option<usize>,

    /// Evaluation grid size.
    #[arg(long, default_value_t = 100)]
    pub grid_points: usize,

    /// Evaluation grid spacing.
    #[arg(long, value_enum, default_value_t = GridSpacing::Linear)]
    pub spacing: GridSpacing,

    /// Grid lower bound (defaults to the smallest x).
    #[arg(long, allow_hyphen_values = true)]
    pub grid_min: Option<f64>,

    /// Grid upper bound (defaults to the largest x).
    #[arg(long, allow_hyphen_values = true)]
    pub grid_max: Option<f64>,

    /// Bootstrap settings JSON (replaces the bootstrap and grid flags).
    #[arg(long, value_name = "JSON", conflicts_with_all = ["bootstrap", "retry"])]
    pub config: Option<PathBuf>,

    /// Render an ASCII plot per group.
    #[arg(long)]
    pub plot: bool,

    /// Plot width (columns).
    #[arg(long, default_value_t = 80)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 20)]
    pub height: usize,

    /// Export the curve and band on the grid to CSV.
    #[arg(long, value_name = "CSV")]
    pub export: Option<PathBuf>,

    /// Export the curve (method, params, grid, band) to JSON.
    #[arg(long = "export-curve", value_name = "JSON")]
    pub export_curve: Option<PathBuf>,
}

/// Options for `assay invert`.
#[derive(Debug, Args, Clone)]
pub struct InvertArgs {
    /// Curve JSON produced by `assay fit --export-curve`.
    #[arg(long, value_name = "JSON", conflicts_with_all = ["bottom", "slope", "midpoint", "top"])]
    pub curve: Option<PathBuf>,

    #[arg(long, allow_hyphen_values = true)]
    pub bottom: Option<f64>,

    #[arg(long, allow_hyphen_values = true)]
    pub slope: Option<f64>,

    #[arg(long, allow_hyphen_values = true)]
    pub midpoint: Option<f64>,

    #[arg(long, allow_hyphen_values = true)]
    pub top: Option<f64>,

    /// Target response(s), comma-separated.
    #[arg(long = "y", value_delimiter = ',', required = true, allow_hyphen_values = true)]
    pub y: Vec<f64>,
}

/// Options for `assay avidity`.
#[derive(Debug, Args, Clone)]
pub struct AvidityArgs {
    /// Plate CSV (Subject, Antigen, Isotype, Treated, Blank, dilution columns).
    #[arg(long, value_name = "CSV")]
    pub csv: PathBuf,

    /// Dilution column mapping NAME=FACTOR, in plate order (repeatable).
    #[arg(long = "dilution", value_name = "NAME=FACTOR")]
    pub dilutions: Vec<String>,

    /// Integrate negative predicted ODs as-is instead of clipping them to zero.
    #[arg(long)]
    pub no_clip_negative: bool,

    /// Flag regressions with R² at or below this value.
    #[arg(long, default_value_t = 0.85)]
    pub threshold: f64,

    /// Export indices and exclusions to CSV.
    #[arg(long, value_name = "CSV")]
    pub export: Option<PathBuf>,
}

/// Options for `assay corr`.
#[derive(Debug, Args, Clone)]
pub struct CorrArgs {
    /// Input CSV (one numeric column per feature).
    #[arg(long, value_name = "CSV")]
    pub csv: PathBuf,

    /// pearson or spearman.
    #[arg(long, default_value = "pearson")]
    pub method: String,

    /// Columns to leave out (repeatable).
    #[arg(long = "drop", value_name = "COL")]
    pub drop: Vec<String>,

    /// Export long-form cells to CSV.
    #[arg(long, value_name = "CSV")]
    pub export: Option<PathBuf>,
}

/// Options for `assay density`.
#[derive(Debug, Args, Clone)]
pub struct DensityArgs {
    /// Exported channel values (one column per channel).
    #[arg(long, value_name = "CSV")]
    pub csv: PathBuf,

    /// Values below this are replaced before the log10 transform.
    #[arg(long, default_value_t = 9.9)]
    pub floor: f64,

    /// Replacement for floored values.
    #[arg(long, default_value_t = 10.0)]
    pub replacement: f64,

    /// Bandwidth multiplier.
    #[arg(long, default_value_t = 0.5)]
    pub bw_adjust: f64,

    /// Density grid size.
    #[arg(long, default_value_t = 200)]
    pub points: usize,

    /// Channels to leave out (repeatable).
    #[arg(long = "drop", value_name = "COL")]
    pub drop: Vec<String>,

    /// Render an ASCII plot per channel.
    #[arg(long)]
    pub plot: bool,

    #[arg(long, default_value_t = 80)]
    pub width: usize,

    #[arg(long, default_value_t = 16)]
    pub height: usize,
}

/// Options for plotting a saved curve.
#[derive(Debug, Args, Clone)]
pub struct PlotArgs {
    /// Curve JSON file produced by `assay fit --export-curve`.
    #[arg(long, value_name = "JSON")]
    pub curve: PathBuf,

    /// Force a log10 x-axis (default: automatic).
    #[arg(long)]
    pub log_x: bool,

    /// Plot width (columns).
    #[arg(long, default_value_t = 80)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 20)]
    pub height: usize,
}

/// Options for `assay demo`.
#[derive(Debug, Args, Clone)]
pub struct DemoArgs {
    /// Seed for the synthetic data and the bootstrap.
    #[arg(long, default_value_t = 7)]
    pub seed: u64,

    /// Bootstrap replicates per demo curve.
    #[arg(long, default_value_t = 200)]
    pub replicates: usize,

    /// Skip the ASCII plots.
    #[arg(long)]
    pub no_plot: bool,

    #[arg(long, default_value_t = 80)]
    pub width: usize,

    #[arg(long, default_value_t = 20)]
    pub height: usize,
}

/// Options for `assay tui`.
#[derive(Debug, Args, Clone)]
pub struct TuiArgs {
    /// CSV to view instead of the synthetic demo data.
    #[arg(long, value_name = "CSV", requires_all = ["x_col", "y_col"])]
    pub csv: Option<PathBuf>,

    #[arg(long = "x", value_name = "COL")]
    pub x_col: Option<String>,

    #[arg(long = "y", value_name = "COL")]
    pub y_col: Option<String>,

    #[arg(long = "group", value_name = "COL")]
    pub group_col: Option<String>,

    /// Seed for the demo data and the bootstrap.
    #[arg(long, default_value_t = 7)]
    pub seed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_flags_parse() {
        let cli = Cli::try_parse_from([
            "assay", "fit", "--csv", "plate.csv", "--x", "dose", "--y", "od", "--model", "four-pl",
            "--bootstrap", "200", "--band", "normal", "--initial", "0,1,10,2", "--log-level", "debug",
        ])
        .unwrap();
        assert_eq!(cli.log_level, LogLevel::Debug);
        let Command::Fit(args) = cli.command else {
            panic!("expected fit");
        };
        assert_eq!(args.model.model_kind(), Some(ModelKind::FourPl));
        assert_eq!(args.bootstrap, Some(200));
        assert_eq!(args.band, BandMethod::Normal);
        assert_eq!(args.initial, Some(vec![0.0, 1.0, 10.0, 2.0]));
        assert_eq!(args.spacing, GridSpacing::Linear);
    }

    #[test]
    fn config_conflicts_with_bootstrap_flags() {
        let err = Cli::try_parse_from([
            "assay", "fit", "--csv", "a.csv", "--x", "x", "--y", "y", "--bootstrap", "10", "--config", "c.json",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn unknown_band_method_is_rejected() {
        let err = Cli::try_parse_from([
            "assay", "fit", "--csv", "a.csv", "--x", "x", "--y", "y", "--band", "bayesian",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
    }

    #[test]
    fn invert_accepts_negative_slope() {
        let cli = Cli::try_parse_from([
            "assay", "invert", "--bottom", "0", "--slope", "-1.5", "--midpoint", "10", "--top", "2", "--y", "0.5,1",
        ])
        .unwrap();
        let Command::Invert(args) = cli.command else {
            panic!("expected invert");
        };
        assert_eq!(args.slope, Some(-1.5));
        assert_eq!(args.y, vec![0.5, 1.0]);
    }
}
