//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments
//! - initializes logging
//! - loads CSV input or synthetic demo data
//! - runs fits, bands and the plate/panel analyses
//! - prints reports/plots
//! - writes optional exports

use std::path::{Path, PathBuf};

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{
    AvidityArgs, Command, CorrArgs, DemoArgs, DensityArgs, FitArgs, InvertArgs, LogLevel, PlotArgs,
};
use crate::domain::{
    BandMethod, BootstrapConfig, CurveMethod, CurveParams, DegeneratePolicy, GridSpacing, GridSpec, LowessConfig,
    ModelKind,
};
use crate::error::{AppError, FitResult};
use crate::fit::FitOptions;
use crate::fit::avidity::{AvidityOptions, DilutionMap, avidity_index};
use crate::fit::correlation::{CorrelationMethod, correlation_matrix};
use crate::fit::density::{DensityOptions, flow_densities};
use crate::io::ingest::{XySpec, load_columns, load_plate, load_xy};
use crate::models::{ec50, invert};
use crate::plot::XScale;

pub mod pipeline;

use pipeline::{FitRequest, FitRun};

/// Environment variable holding `tracing` filter directives.
pub const LOG_ENV: &str = "ASSAY_LOG";

/// Row errors listed before the "... more" line.
const ROW_ERROR_LIMIT: usize = 10;

/// Entry point for the `assay` binary.
pub fn run() -> Result<(), AppError> {
    dotenvy::dotenv().ok();

    // `assay` with no subcommand opens the viewer.
    let argv = rewrite_args(std::env::args().collect());
    let cli = crate::cli::Cli::parse_from(argv);

    // The TUI owns the terminal; stderr logging would corrupt the screen.
    if !matches!(cli.command, Command::Tui(_)) {
        init_logging(cli.log_level);
    }

    match cli.command {
        Command::Fit(args) => handle_fit(args),
        Command::Invert(args) => handle_invert(args),
        Command::Avidity(args) => handle_avidity(args),
        Command::Corr(args) => handle_corr(args),
        Command::Density(args) => handle_density(args),
        Command::Plot(args) => handle_plot(args),
        Command::Demo(args) => handle_demo(args),
        Command::Tui(args) => crate::tui::run(args),
    }
}

fn init_logging(level: LogLevel) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(level.as_directive()));
    // A second initialization (e.g. from a test harness) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn handle_fit(args: FitArgs) -> Result<(), AppError> {
    let request = fit_request_from_args(&args)?;
    let spec = XySpec {
        x_col: args.x_col.clone(),
        y_col: args.y_col.clone(),
        group_col: args.group_col.clone(),
    };
    let ingested = load_xy(&args.csv, &spec)?;
    eprint!("{}", crate::report::format_row_errors(&ingested.row_errors, ROW_ERROR_LIMIT));
    for (group, reason) in &ingested.skipped_groups {
        eprintln!("Skipped group '{group}': {reason}");
    }

    let groups = ingested
        .groups
        .iter()
        .map(|g| (g.name.as_str(), &g.observations));
    let (runs, failed) = pipeline::run_groups(groups, &request);

    let multi = ingested.groups.len() > 1;
    for run in &runs {
        println!("{}", crate::report::format_fit_summary(run));
        if args.plot {
            println!("{}", crate::plot::render_fit_run(run, args.width, args.height));
        }
        write_exports(run, &args, multi)?;
    }
    for (group, err) in &failed {
        eprintln!("Fit failed for group '{group}': {err}");
    }

    match failed.into_iter().next() {
        Some((_, err)) if runs.is_empty() => Err(err.into()),
        _ => Ok(()),
    }
}

/// Map `fit` flags (or the `--config` file) onto a validated request.
pub fn fit_request_from_args(args: &FitArgs) -> Result<FitRequest, AppError> {
    let method = match args.model.model_kind() {
        Some(kind) => CurveMethod::Parametric(kind),
        None => CurveMethod::Lowess(LowessConfig::new(args.frac, args.iterations)?),
    };
    let grid = GridSpec::spaced(args.grid_min, args.grid_max, args.grid_points, args.spacing)?;

    let bootstrap = match (&args.config, args.bootstrap) {
        (Some(path), _) => {
            let settings = crate::io::curve::read_bootstrap_settings(path)?;
            Some(BootstrapConfig::try_from(settings)?)
        }
        (None, Some(replicates)) => {
            let config = BootstrapConfig::new(replicates, args.confidence, args.band)?
                .with_grid(grid.clone())
                .with_seed(args.seed);
            let config = match args.retry {
                Some(max_attempts) => config.with_degenerate_policy(DegeneratePolicy::Retry { max_attempts })?,
                None => config,
            };
            Some(config)
        }
        (None, None) => None,
    };

    Ok(FitRequest {
        method,
        options: FitOptions {
            max_iterations: args.max_iterations,
            initial: args.initial.clone(),
            weights: None,
        },
        grid,
        bootstrap,
        auto_start: args.auto_start,
    })
}

fn write_exports(run: &FitRun, args: &FitArgs, multi: bool) -> Result<(), AppError> {
    if let Some(path) = &args.export {
        let path = group_path(path, &run.group, multi);
        crate::io::export::write_band_csv(&path, &run.curve.x, Some(run.curve.y.as_slice()), run.band())?;
    }
    if let Some(path) = &args.export_curve {
        let path = group_path(path, &run.group, multi);
        crate::io::curve::write_curve_json(&path, &run.to_curve_file())?;
    }
    Ok(())
}

/// `out.csv` becomes `out_<group>.csv` when several groups are exported.
fn group_path(path: &Path, group: &str, multi: bool) -> PathBuf {
    if !multi {
        return path.to_path_buf();
    }
    let safe: String = group
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}_{safe}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{safe}"),
    };
    path.with_file_name(name)
}

fn handle_invert(args: InvertArgs) -> Result<(), AppError> {
    let params = match &args.curve {
        Some(path) => {
            let curve = crate::io::curve::read_curve_json(path)?;
            curve.params.ok_or_else(|| {
                AppError::new(
                    2,
                    format!("Curve '{}' has no parametric model to invert.", path.display()),
                )
            })?
        }
        None => {
            let (Some(bottom), Some(slope), Some(midpoint), Some(top)) =
                (args.bottom, args.slope, args.midpoint, args.top)
            else {
                return Err(AppError::new(
                    2,
                    "Provide --curve or all of --bottom, --slope, --midpoint and --top.",
                ));
            };
            CurveParams::new(ModelKind::FourPl, vec![bottom, slope, midpoint, top])?
        }
    };

    let results: Vec<(f64, FitResult<f64>)> = args.y.iter().map(|&y| (y, invert(&params, y))).collect();
    println!("{}", crate::report::format_inversion(&params, &results));

    match results.into_iter().find_map(|(_, r)| r.err()) {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

fn handle_avidity(args: AvidityArgs) -> Result<(), AppError> {
    let dilutions = if args.dilutions.is_empty() {
        DilutionMap::default()
    } else {
        DilutionMap::new(parse_dilutions(&args.dilutions)?)?
    };
    let ingested = load_plate(&args.csv, &dilutions)?;
    eprint!("{}", crate::report::format_row_errors(&ingested.row_errors, ROW_ERROR_LIMIT));

    let opts = AvidityOptions {
        clip_negative: !args.no_clip_negative,
        r2_threshold: args.threshold,
    };
    let report = avidity_index(&ingested.rows, &dilutions, &opts)?;
    println!("{}", crate::report::format_avidity_report(&report));

    if let Some(path) = &args.export {
        crate::io::export::write_avidity_csv(path, &report)?;
    }
    Ok(())
}

/// Parse `NAME=FACTOR` dilution mappings.
pub fn parse_dilutions(raw: &[String]) -> Result<Vec<(String, f64)>, AppError> {
    raw.iter()
        .map(|item| {
            let (name, factor) = item
                .split_once('=')
                .ok_or_else(|| AppError::new(2, format!("Invalid --dilution '{item}' (expected NAME=FACTOR).")))?;
            let factor: f64 = factor
                .trim()
                .parse()
                .map_err(|_| AppError::new(2, format!("Invalid dilution factor in '{item}'.")))?;
            Ok((name.trim().to_string(), factor))
        })
        .collect()
}

fn handle_corr(args: CorrArgs) -> Result<(), AppError> {
    let method: CorrelationMethod = args.method.parse()?;
    let ingested = load_columns(&args.csv, &args.drop)?;
    eprint!("{}", crate::report::format_row_errors(&ingested.row_errors, ROW_ERROR_LIMIT));
    if !ingested.non_numeric.is_empty() {
        eprintln!("Ignored non-numeric column(s): {}", ingested.non_numeric.join(", "));
    }

    let cells = correlation_matrix(&ingested.columns, method)?;
    println!("{}", crate::report::format_correlation(&cells, method));

    if let Some(path) = &args.export {
        crate::io::export::write_correlation_csv(path, &cells)?;
    }
    Ok(())
}

fn handle_density(args: DensityArgs) -> Result<(), AppError> {
    let opts = DensityOptions {
        threshold: args.floor,
        replacement: args.replacement,
        bw_adjust: args.bw_adjust,
        points: args.points,
    };
    let ingested = load_columns(&args.csv, &[])?;
    eprint!("{}", crate::report::format_row_errors(&ingested.row_errors, ROW_ERROR_LIMIT));

    let densities = flow_densities(&ingested.columns, &args.drop, &opts)?;
    println!("{}", crate::report::format_density(&densities));
    if args.plot {
        for d in &densities {
            println!("{}", d.channel);
            println!("{}", crate::plot::render_density(d, args.width, args.height));
        }
    }
    Ok(())
}

fn handle_plot(args: PlotArgs) -> Result<(), AppError> {
    let curve = crate::io::curve::read_curve_json(&args.curve)?;
    let scale = args.log_x.then_some(XScale::Log10);
    println!("{}", crate::plot::render_curve_file(&curve, args.width, args.height, scale));
    Ok(())
}

/// Demo bootstrap settings shared by the CLI demo and the TUI.
pub fn demo_bootstrap(replicates: usize, method: BandMethod, spacing: GridSpacing, seed: u64) -> FitResult<BootstrapConfig> {
    BootstrapConfig::new(replicates, 0.95, method)?
        .with_grid(GridSpec::spaced(None, None, 60, spacing)?)
        .with_seed(seed)
        .with_degenerate_policy(DegeneratePolicy::Retry { max_attempts: 10 })
}

/// Fit requests for the two demo datasets (4PL dilution series, LOWESS trend).
pub fn demo_requests(replicates: usize, seed: u64) -> FitResult<(FitRequest, FitRequest)> {
    let four_pl = FitRequest {
        bootstrap: Some(demo_bootstrap(replicates, BandMethod::Percentile, GridSpacing::Geometric, seed)?),
        auto_start: true,
        ..FitRequest::new(CurveMethod::Parametric(ModelKind::FourPl))
    };
    let smooth = FitRequest {
        bootstrap: Some(demo_bootstrap(replicates, BandMethod::Normal, GridSpacing::Linear, seed)?),
        ..FitRequest::new(CurveMethod::Lowess(LowessConfig::new(0.3, 3)?))
    };
    Ok((four_pl, smooth))
}

fn handle_demo(args: DemoArgs) -> Result<(), AppError> {
    let (four_pl_request, lowess_request) = demo_requests(args.replicates, args.seed)?;

    let dilution = crate::data::four_pl_dilution_series(args.seed)?;
    println!("Dataset: {} ({})\n", dilution.name, dilution.description);
    let run = pipeline::run_fit(&dilution.name, &dilution.observations, &four_pl_request)?;
    println!("{}", crate::report::format_fit_summary(&run));

    if let Some(fit) = &run.fit {
        // Read back the response halfway between the fitted asymptotes.
        let v = &fit.params.values;
        let half = 0.5 * (v[0] + v[3]);
        let results = vec![(half, invert(&fit.params, half))];
        println!("{}", crate::report::format_inversion(&fit.params, &results));
        if let (Some((fitted, _)), Some(truth)) = (ec50(&fit.params), dilution.truth.as_ref().and_then(ec50)) {
            println!("EC50 fitted={fitted:.3} true={:.3}\n", truth.0);
        }
    }
    if !args.no_plot {
        println!("{}", crate::plot::render_fit_run(&run, args.width, args.height));
    }

    let noisy = crate::data::noisy_lowess_series(args.seed)?;
    println!("Dataset: {} ({})\n", noisy.name, noisy.description);
    let run = pipeline::run_fit(&noisy.name, &noisy.observations, &lowess_request)?;
    println!("{}", crate::report::format_fit_summary(&run));
    if !args.no_plot {
        println!("{}", crate::plot::render_fit_run(&run, args.width, args.height));
    }
    Ok(())
}

/// Rewrite argv so `assay` defaults to `assay tui`.
///
/// Rules:
/// - `assay`                       -> `assay tui`
/// - `assay --seed 3 ...`          -> `assay tui --seed 3 ...`
/// - `assay --help/--version/-h`   -> unchanged (show top-level help/version)
fn rewrite_args(mut argv: Vec<String>) -> Vec<String> {
    const SUBCOMMANDS: [&str; 9] = ["fit", "invert", "avidity", "corr", "density", "plot", "demo", "tui", "help"];

    let is_top_level_help_or_version = argv
        .iter()
        .skip(1)
        .any(|a| matches!(a.as_str(), "-h" | "--help" | "-V" | "--version"));
    let has_subcommand = argv.iter().skip(1).any(|a| SUBCOMMANDS.contains(&a.as_str()));
    if is_top_level_help_or_version || has_subcommand {
        return argv;
    }

    argv.insert(1.min(argv.len()), "tui".to_string());
    argv
}
