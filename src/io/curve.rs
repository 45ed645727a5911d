//! Read/write curve JSON files.
//!
//! Curve JSON is the "portable" representation of a fitted curve:
//! - method and (for parametric fits) parameters
//! - fit quality
//! - a precomputed grid with fitted values, and the band when one was computed
//!
//! The schema is defined by `domain::CurveFile`. A saved 4PL or Hill curve can
//! be read back by `invert` without refitting.

use std::fs::File;
use std::path::Path;

use chrono::Utc;

use crate::domain::{Band, BootstrapSettings, CurveFile, CurveGrid, CurveMethod, CurveParams, FitQuality};
use crate::error::AppError;

pub const TOOL_NAME: &str = "assay";

/// Assemble a curve file stamped with the current time.
pub fn build_curve_file(
    group: &str,
    method: CurveMethod,
    params: Option<CurveParams>,
    quality: Option<FitQuality>,
    grid: CurveGrid,
    band: Option<Band>,
) -> CurveFile {
    CurveFile {
        tool: TOOL_NAME.to_string(),
        generated_at: Utc::now(),
        group: group.to_string(),
        method,
        params,
        quality,
        grid,
        band,
    }
}

/// Write a curve JSON file.
pub fn write_curve_json(path: &Path, curve: &CurveFile) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create curve JSON '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(file, curve).map_err(|e| AppError::new(2, format!("Failed to write curve JSON: {e}")))?;
    Ok(())
}

/// Read a curve JSON file.
pub fn read_curve_json(path: &Path) -> Result<CurveFile, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open curve JSON '{}': {e}", path.display())))?;
    let curve: CurveFile =
        serde_json::from_reader(file).map_err(|e| AppError::new(2, format!("Invalid curve JSON: {e}")))?;
    Ok(curve)
}

/// Read bootstrap settings (`--config`), rejecting unknown option names.
pub fn read_bootstrap_settings(path: &Path) -> Result<BootstrapSettings, AppError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| AppError::new(2, format!("Failed to read config '{}': {e}", path.display())))?;
    Ok(BootstrapSettings::from_json_str(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BandMethod, ModelKind};

    #[test]
    fn curve_json_round_trips_through_serde() {
        let params = CurveParams::new(ModelKind::FourPl, vec![0.0, 1.0, 10.0, 100.0]).unwrap();
        let grid = vec![1.0, 10.0, 100.0];
        let y = params.evaluate_grid(&grid);
        let curve = build_curve_file(
            "plate-1",
            CurveMethod::Parametric(ModelKind::FourPl),
            Some(params.clone()),
            None,
            CurveGrid { x: grid.clone(), y },
            Some(Band {
                grid,
                method: BandMethod::Normal,
                confidence: 0.95,
                lower: vec![0.0, 40.0, 80.0],
                upper: vec![20.0, 60.0, 100.0],
            }),
        );

        let text = serde_json::to_string_pretty(&curve).unwrap();
        assert!(text.contains("\"four-pl\""));
        let back: CurveFile = serde_json::from_str(&text).unwrap();
        assert_eq!(back, curve);
        assert_eq!(back.params.unwrap().evaluate(10.0), 50.0);
    }

    #[test]
    fn unreadable_config_is_exit_code_2() {
        let err = read_bootstrap_settings(Path::new("/nonexistent/assay-config.json")).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn short_parameter_vector_is_rejected_on_read() {
        let params = CurveParams::new(ModelKind::FourPl, vec![0.0, 1.0, 10.0, 100.0]).unwrap();
        let curve = build_curve_file(
            "plate-1",
            CurveMethod::Parametric(ModelKind::FourPl),
            Some(params),
            None,
            CurveGrid { x: vec![10.0], y: vec![50.0] },
            None,
        );
        let mut value = serde_json::to_value(&curve).unwrap();
        value["params"]["values"] = serde_json::json!([1.0, 2.0]);

        assert!(serde_json::from_value::<CurveFile>(value.clone()).is_err());

        let path = std::env::temp_dir().join(format!("assay-short-params-{}.json", std::process::id()));
        std::fs::write(&path, value.to_string()).unwrap();
        let result = read_curve_json(&path);
        std::fs::remove_file(&path).unwrap();
        let err = result.unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("Invalid curve JSON"), "{err}");
    }
}
