//! Formatted terminal output for fits, bands, inversions and the plate/panel reports.

use crate::app::pipeline::FitRun;
use crate::domain::{Band, CurveParams};
use crate::error::FitResult;
use crate::fit::avidity::AvidityReport;
use crate::fit::correlation::{CorrelationCell, CorrelationMethod, significance_stars};
use crate::fit::density::ChannelDensity;
use crate::io::ingest::RowError;
use crate::models::ec50;

use super::{Residual, compute_residuals, largest_residuals};

/// Rows shown in the "largest residuals" table.
const TOP_RESIDUALS: usize = 5;

/// Format the summary of one fitted group (data, parameters, quality, band).
pub fn format_fit_summary(run: &FitRun) -> String {
    let mut out = String::new();
    let obs = &run.observations;
    let (x_min, x_max) = obs.x_range();
    let (y_min, y_max) = obs.y_range();

    out.push_str("=== assay - Curve Fit ===\n");
    out.push_str(&format!("Group: {}\n", run.group));
    out.push_str(&format!("Method: {}\n", run.method.display_name()));
    out.push_str(&format!(
        "Points: n={} | x=[{x_min:.4}, {x_max:.4}] | y=[{y_min:.4}, {y_max:.4}]\n",
        obs.len()
    ));

    if let Some(fit) = &run.fit {
        out.push_str("\nParameters:\n");
        for (name, value) in fit.params.named() {
            out.push_str(&format!("- {name:<10} = {value:.6}\n"));
        }
        if let Some((c, log_c)) = ec50(&fit.params) {
            out.push_str(&format!("- {:<10} = {c:.6} (log10 = {log_c:.4})\n", "EC50"));
        }

        let q = &fit.quality;
        out.push_str(&format!(
            "\nQuality: SSE={:.6} RMSE={:.6} R²={:.4} n={} iterations={}\n",
            q.sse, q.rmse, q.r_squared, q.n, q.iterations
        ));

        if let Ok(residuals) = compute_residuals(obs, &fit.params) {
            out.push_str("\nLargest residuals:\n");
            out.push_str(&format_residual_table(&largest_residuals(&residuals, TOP_RESIDUALS)));
        }
    }

    if let Some(boot) = &run.bootstrap {
        out.push('\n');
        out.push_str(&format_band_summary(&boot.band, boot.ensemble.replicates()));
    }

    out
}

/// One-paragraph band summary (method, coverage, widths).
pub fn format_band_summary(band: &Band, replicates: usize) -> String {
    let widths: Vec<f64> = band.lower.iter().zip(&band.upper).map(|(l, u)| u - l).collect();
    let mean_width = if widths.is_empty() {
        0.0
    } else {
        widths.iter().sum::<f64>() / widths.len() as f64
    };
    let max_width = widths.iter().copied().fold(0.0, f64::max);

    let mut out = String::new();
    out.push_str(&format!(
        "Band: {:.0}% {} | K={replicates} | G={}\n",
        band.confidence * 100.0,
        band.method.as_str(),
        band.grid.len()
    ));
    out.push_str(&format!("- width: mean={mean_width:.6} max={max_width:.6}\n"));
    out
}

/// Residual table in the classic fixed-width layout.
pub fn format_residual_table(rows: &[Residual]) -> String {
    let mut out = String::new();
    out.push_str(
        format!("{:>6} {:>12} {:>12} {:>12} {:>12}", "row", "x", "y_obs", "y_fit", "residual").trim_end(),
    );
    out.push('\n');
    out.push_str(format!("{:->6} {:->12} {:->12} {:->12} {:->12}", "", "", "", "", "").trim_end());
    out.push('\n');

    for r in rows {
        out.push_str(
            format!(
                "{:>6} {:>12.4} {:>12.4} {:>12.4} {:>12.4}",
                r.index + 1,
                r.x,
                r.y_obs,
                r.y_fit,
                r.residual
            )
            .trim_end(),
        );
        out.push('\n');
    }
    out
}

/// Back-calculated x for each target response.
pub fn format_inversion(params: &CurveParams, results: &[(f64, FitResult<f64>)]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Inverse {}: {}\n",
        params.kind.display_name(),
        fmt_vec(&params.values)
    ));
    for (y, result) in results {
        match result {
            Ok(x) => out.push_str(&format!("y={y:<12.6} x={x:.6}\n")),
            Err(err) => out.push_str(&format!("y={y:<12.6} {err}\n")),
        }
    }
    out
}

/// Per-sample avidity indices followed by the exclusions.
pub fn format_avidity_report(report: &AvidityReport) -> String {
    let mut out = String::new();
    let low = report.rows.iter().filter(|r| r.low_quality).count();
    out.push_str("=== assay - Avidity Index ===\n");
    out.push_str(&format!(
        "Rows: {} fitted | {low} low-quality regression(s)\n\n",
        report.rows.len()
    ));

    out.push_str(
        format!(
            "{:<32} {:>12} {:>12} {:>10} {:<4}",
            "sample", "treated_auc", "untreated", "index", "flag"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(format!("{:-<32} {:->12} {:->12} {:->10} {:-<4}", "", "", "", "", "").trim_end());
    out.push('\n');
    for a in &report.indices {
        out.push_str(
            format!(
                "{:<32} {:>12.4} {:>12.4} {:>10.4} {:<4}",
                truncate(&a.key.to_string(), 32),
                a.treated_auc,
                a.untreated_auc,
                a.index,
                if a.low_quality { "low" } else { "" }
            )
            .trim_end(),
        );
        out.push('\n');
    }

    if !report.excluded.is_empty() {
        out.push_str("\nExcluded:\n");
        for e in &report.excluded {
            out.push_str(&format!("- {}: {}\n", e.key, e.reason.describe()));
        }
    }
    out
}

/// Off-diagonal correlation cells with significance stars.
pub fn format_correlation(cells: &[CorrelationCell], method: CorrelationMethod) -> String {
    let mut out = String::new();
    out.push_str(&format!("=== assay - {method:?} correlation ===\n"));
    out.push_str(
        format!(
            "{:<20} {:<20} {:>8} {:>10} {:<4}",
            "feature_x", "feature_y", "r", "p", ""
        )
        .trim_end(),
    );
    out.push('\n');
    for c in cells.iter().filter(|c| c.feature_x != c.feature_y) {
        out.push_str(
            format!(
                "{:<20} {:<20} {:>8.4} {:>10.4} {:<4}",
                truncate(&c.feature_x, 20),
                truncate(&c.feature_y, 20),
                c.r,
                c.p_value,
                significance_stars(c.p_value)
            )
            .trim_end(),
        );
        out.push('\n');
    }
    out
}

/// Per-channel density summary (the curves themselves go to the plot).
pub fn format_density(densities: &[ChannelDensity]) -> String {
    let mut out = String::new();
    out.push_str("=== assay - Channel densities (log10 intensity) ===\n");
    for d in densities {
        let mode = d.mode().unwrap_or(f64::NAN);
        out.push_str(&format!(
            "{:<24} n={:<8} bw={:.4} mode={mode:.3} (~{:.1})\n",
            truncate(&d.channel, 24),
            d.n,
            d.bandwidth,
            10f64.powf(mode)
        ));
    }
    out
}

/// Row-level ingest problems, capped at `limit` lines.
pub fn format_row_errors(errors: &[RowError], limit: usize) -> String {
    let mut out = String::new();
    if errors.is_empty() {
        return out;
    }
    out.push_str(&format!("Skipped {} row(s):\n", errors.len()));
    for e in errors.iter().take(limit) {
        out.push_str(&format!("- line {}: {}\n", e.line, e.message));
    }
    if errors.len() > limit {
        out.push_str(&format!("- ... {} more\n", errors.len() - limit));
    }
    out
}

fn fmt_vec(v: &[f64]) -> String {
    let parts: Vec<String> = v.iter().map(|x| format!("{x:.6}")).collect();
    format!("[{}]", parts.join(", "))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out = String::new();
    for (i, ch) in s.chars().enumerate() {
        if i + 1 >= max {
            break;
        }
        out.push(ch);
    }
    out.push('.');
    out
}
