//! Export results to CSV.
//!
//! The exports are meant to be easy to consume in spreadsheets or downstream scripts.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::domain::Band;
use crate::error::AppError;
use crate::fit::avidity::AvidityReport;
use crate::fit::correlation::{CorrelationCell, significance_stars};

fn create(path: &Path, what: &str) -> Result<File, AppError> {
    File::create(path).map_err(|e| AppError::new(2, format!("Failed to create {what} '{}': {e}", path.display())))
}

fn write_err(e: std::io::Error) -> AppError {
    AppError::new(2, format!("Failed to write export CSV: {e}"))
}

fn opt(v: Option<f64>) -> String {
    v.map(|v| format!("{v:.10}")).unwrap_or_default()
}

/// Write a fitted curve and/or band on its grid.
pub fn write_band_csv(path: &Path, grid: &[f64], y_fit: Option<&[f64]>, band: Option<&Band>) -> Result<(), AppError> {
    let mut file = create(path, "export CSV")?;
    write_band(&mut file, grid, y_fit, band).map_err(write_err)
}

pub fn write_band<W: Write>(out: &mut W, grid: &[f64], y_fit: Option<&[f64]>, band: Option<&Band>) -> std::io::Result<()> {
    writeln!(out, "x,y_fit,lower,upper")?;
    for (i, x) in grid.iter().enumerate() {
        writeln!(
            out,
            "{:.10},{},{},{}",
            x,
            opt(y_fit.and_then(|y| y.get(i).copied())),
            opt(band.and_then(|b| b.lower.get(i).copied())),
            opt(band.and_then(|b| b.upper.get(i).copied())),
        )?;
    }
    Ok(())
}

/// Write avidity indices followed by excluded samples.
pub fn write_avidity_csv(path: &Path, report: &AvidityReport) -> Result<(), AppError> {
    let mut file = create(path, "avidity CSV")?;
    write_avidity(&mut file, report).map_err(write_err)
}

pub fn write_avidity<W: Write>(out: &mut W, report: &AvidityReport) -> std::io::Result<()> {
    writeln!(
        out,
        "subject,antigen,isotype,timepoint,treated_auc,untreated_auc,avidity_index,low_quality,excluded"
    )?;
    for a in &report.indices {
        writeln!(
            out,
            "{},{},{},{},{:.6},{:.6},{:.6},{},",
            a.key.subject, a.key.antigen, a.key.isotype, a.key.timepoint, a.treated_auc, a.untreated_auc, a.index, a.low_quality
        )?;
    }
    for e in &report.excluded {
        writeln!(
            out,
            "{},{},{},{},,,,,{}",
            e.key.subject,
            e.key.antigen,
            e.key.isotype,
            e.key.timepoint,
            e.reason.describe()
        )?;
    }
    Ok(())
}

/// Write long-form correlation cells.
pub fn write_correlation_csv(path: &Path, cells: &[CorrelationCell]) -> Result<(), AppError> {
    let mut file = create(path, "correlation CSV")?;
    write_correlation(&mut file, cells).map_err(write_err)
}

pub fn write_correlation<W: Write>(out: &mut W, cells: &[CorrelationCell]) -> std::io::Result<()> {
    writeln!(out, "feature_x,feature_y,r,p_value,stars,strong,significant")?;
    for c in cells {
        writeln!(
            out,
            "{},{},{:.6},{:.6},{},{},{}",
            c.feature_x,
            c.feature_y,
            c.r,
            c.p_value,
            significance_stars(c.p_value),
            c.strong,
            c.significant
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BandMethod;

    #[test]
    fn band_csv_leaves_missing_columns_empty() {
        let band = Band {
            grid: vec![1.0, 2.0],
            method: BandMethod::Percentile,
            confidence: 0.9,
            lower: vec![0.5, 1.5],
            upper: vec![1.5, 2.5],
        };
        let mut buf = Vec::new();
        write_band(&mut buf, &[1.0, 2.0], None, Some(&band)).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "x,y_fit,lower,upper");
        assert_eq!(lines[1], "1.0000000000,,0.5000000000,1.5000000000");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn correlation_csv_includes_stars() {
        let cells = vec![CorrelationCell {
            feature_x: "a".to_string(),
            feature_y: "b".to_string(),
            r: 0.9,
            p_value: 0.004,
            strong: true,
            significant: true,
        }];
        let mut buf = Vec::new();
        write_correlation(&mut buf, &cells).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.lines().nth(1).unwrap().starts_with("a,b,0.900000,0.004000,**,true,true"));
    }
}
