//! CSV ingest and normalization.
//!
//! This module turns lab exports into validated inputs for the numerical core:
//!
//! - `(x, y)` observation sets, optionally split by a group column
//! - ELISA plate rows for the avidity index
//! - named numeric columns for correlation and flow density
//!
//! Design goals:
//! - **Strict schema** for required columns (clear errors + exit code 2)
//! - **Row-level validation** (skip bad rows, but report what happened)
//! - **Separation of concerns**: no fitting logic here

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::StringRecord;

use crate::domain::Observations;
use crate::error::AppError;
use crate::fit::avidity::{DilutionMap, PlateRow, SampleKey};

/// A row-level error encountered during ingest.
#[derive(Debug, Clone, PartialEq)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

/// Which columns hold x, y and (optionally) the group label.
#[derive(Debug, Clone, PartialEq)]
pub struct XySpec {
    pub x_col: String,
    pub y_col: String,
    pub group_col: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct XyGroup {
    pub name: String,
    pub observations: Observations,
}

/// Ingest output for `(x, y)` data.
#[derive(Debug, Clone)]
pub struct IngestedXy {
    pub groups: Vec<XyGroup>,
    /// Groups that could not form a valid observation set, with the reason.
    pub skipped_groups: Vec<(String, String)>,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
    pub rows_used: usize,
}

/// Ingest output for plate rows.
#[derive(Debug, Clone)]
pub struct IngestedPlate {
    pub rows: Vec<PlateRow>,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
}

/// Ingest output for named numeric columns.
#[derive(Debug, Clone)]
pub struct IngestedColumns {
    pub columns: Vec<(String, Vec<f64>)>,
    /// Columns dropped because they hold non-numeric values.
    pub non_numeric: Vec<String>,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
}

pub const DEFAULT_GROUP: &str = "all";

fn open(path: &Path) -> Result<File, AppError> {
    File::open(path).map_err(|e| AppError::new(2, format!("Failed to open CSV '{}': {e}", path.display())))
}

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader)
}

/// Load `(x, y)` observations from a CSV file.
pub fn load_xy(path: &Path, spec: &XySpec) -> Result<IngestedXy, AppError> {
    read_xy(open(path)?, spec)
}

pub fn read_xy<R: Read>(reader: R, spec: &XySpec) -> Result<IngestedXy, AppError> {
    let mut reader = csv_reader(reader);
    let headers = reader
        .headers()
        .map_err(|e| AppError::new(2, format!("Failed to read CSV headers: {e}")))?
        .clone();
    let header_map = build_header_map(&headers);

    let x_idx = require_column(&header_map, &spec.x_col)?;
    let y_idx = require_column(&header_map, &spec.y_col)?;
    let group_idx = spec
        .group_col
        .as_deref()
        .map(|g| require_column(&header_map, g))
        .transpose()?;

    let mut order: Vec<String> = Vec::new();
    let mut columns: HashMap<String, (Vec<f64>, Vec<f64>)> = HashMap::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;
    let mut rows_used = 0usize;

    for (idx, result) in reader.records().enumerate() {
        // +2: records start after the header, and lines are 1-based.
        let line = idx + 2;
        rows_read += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };

        let parsed = parse_f64_at(&record, x_idx, &spec.x_col)
            .and_then(|x| parse_f64_at(&record, y_idx, &spec.y_col).map(|y| (x, y)));
        let (x, y) = match parsed {
            Ok(v) => v,
            Err(message) => {
                row_errors.push(RowError { line, message });
                continue;
            }
        };

        let group = match group_idx {
            Some(g) => match get_at(&record, g) {
                Some(name) => name.to_string(),
                None => {
                    row_errors.push(RowError {
                        line,
                        message: format!("Missing group value in `{}`", spec.group_col.as_deref().unwrap_or("")),
                    });
                    continue;
                }
            },
            None => DEFAULT_GROUP.to_string(),
        };

        let entry = columns.entry(group.clone()).or_insert_with(|| {
            order.push(group);
            (Vec::new(), Vec::new())
        });
        entry.0.push(x);
        entry.1.push(y);
        rows_used += 1;
    }

    let mut groups = Vec::new();
    let mut skipped_groups = Vec::new();
    for name in order {
        let Some((x, y)) = columns.remove(&name) else {
            continue;
        };
        match Observations::new(x, y) {
            Ok(observations) => groups.push(XyGroup { name, observations }),
            Err(e) => {
                tracing::warn!(group = %name, error = %e, "skipping group");
                skipped_groups.push((name, e.to_string()));
            }
        }
    }

    if !row_errors.is_empty() {
        tracing::warn!(skipped = row_errors.len(), "skipped invalid CSV rows");
    }
    if groups.is_empty() {
        return Err(AppError::new(3, "No group has at least 2 valid (x, y) rows."));
    }

    Ok(IngestedXy {
        groups,
        skipped_groups,
        row_errors,
        rows_read,
        rows_used,
    })
}

/// Load ELISA plate rows from a CSV file.
pub fn load_plate(path: &Path, dilutions: &DilutionMap) -> Result<IngestedPlate, AppError> {
    read_plate(open(path)?, dilutions)
}

pub fn read_plate<R: Read>(reader: R, dilutions: &DilutionMap) -> Result<IngestedPlate, AppError> {
    let mut reader = csv_reader(reader);
    let headers = reader
        .headers()
        .map_err(|e| AppError::new(2, format!("Failed to read CSV headers: {e}")))?
        .clone();
    let header_map = build_header_map(&headers);

    let subject = require_column(&header_map, "subject")?;
    let antigen = require_column(&header_map, "antigen")?;
    let isotype = require_column(&header_map, "isotype")?;
    let treated = require_column(&header_map, "treated")?;
    let blank = require_column(&header_map, "blank")?;
    let timepoint = header_map.get("timepoint").copied();
    let od_cols = dilutions
        .columns
        .iter()
        .map(|c| require_column(&header_map, c))
        .collect::<Result<Vec<usize>, AppError>>()?;

    let mut rows = Vec::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;

    for (idx, result) in reader.records().enumerate() {
        let line = idx + 2;
        rows_read += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };

        let parsed = (|| -> Result<PlateRow, String> {
            let key = SampleKey {
                subject: get_required_at(&record, subject, "subject")?.to_string(),
                antigen: get_required_at(&record, antigen, "antigen")?.to_string(),
                isotype: get_required_at(&record, isotype, "isotype")?.to_string(),
                timepoint: timepoint
                    .and_then(|t| get_at(&record, t))
                    .unwrap_or_default()
                    .to_string(),
            };
            let treated = parse_bool(get_required_at(&record, treated, "treated")?)?;
            let blank = parse_f64_at(&record, blank, "blank")?;
            let od = od_cols
                .iter()
                .zip(dilutions.columns.iter())
                .map(|(&i, name)| parse_f64_at(&record, i, name))
                .collect::<Result<Vec<f64>, String>>()?;
            Ok(PlateRow {
                key,
                treated,
                blank,
                od,
            })
        })();

        match parsed {
            Ok(row) => rows.push(row),
            Err(message) => row_errors.push(RowError { line, message }),
        }
    }

    if !row_errors.is_empty() {
        tracing::warn!(skipped = row_errors.len(), "skipped invalid plate rows");
    }
    if rows.is_empty() {
        return Err(AppError::new(3, "No valid plate rows."));
    }

    Ok(IngestedPlate {
        rows,
        row_errors,
        rows_read,
    })
}

/// Load every numeric column (minus `drop`) from a CSV file.
pub fn load_columns(path: &Path, drop: &[String]) -> Result<IngestedColumns, AppError> {
    read_columns(open(path)?, drop)
}

pub fn read_columns<R: Read>(reader: R, drop: &[String]) -> Result<IngestedColumns, AppError> {
    let mut reader = csv_reader(reader);
    let headers = reader
        .headers()
        .map_err(|e| AppError::new(2, format!("Failed to read CSV headers: {e}")))?
        .clone();
    let names: Vec<String> = headers
        .iter()
        .map(|h| h.trim().trim_start_matches('\u{feff}').to_string())
        .collect();

    let mut records = Vec::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;
    for (idx, result) in reader.records().enumerate() {
        rows_read += 1;
        match result {
            Ok(r) => records.push((idx + 2, r)),
            Err(e) => row_errors.push(RowError {
                line: idx + 2,
                message: format!("CSV parse error: {e}"),
            }),
        }
    }

    let dropped = |name: &str| drop.iter().any(|d| d.trim().eq_ignore_ascii_case(name));
    let mut kept = Vec::new();
    let mut non_numeric = Vec::new();
    for (i, name) in names.iter().enumerate() {
        if dropped(name) {
            continue;
        }
        let mut seen = false;
        let numeric = records.iter().all(|(_, r)| match get_at(r, i) {
            Some(s) => {
                seen = true;
                s.parse::<f64>().is_ok()
            }
            None => true,
        });
        if numeric && seen {
            kept.push(i);
        } else {
            tracing::debug!(column = %name, "ignoring non-numeric column");
            non_numeric.push(name.clone());
        }
    }

    let mut values: Vec<Vec<f64>> = vec![Vec::new(); kept.len()];
    for (line, record) in &records {
        let row = kept
            .iter()
            .map(|&i| parse_f64_at(record, i, &names[i]))
            .collect::<Result<Vec<f64>, String>>();
        match row {
            Ok(row) => {
                for (col, v) in values.iter_mut().zip(row) {
                    col.push(v);
                }
            }
            Err(message) => row_errors.push(RowError { line: *line, message }),
        }
    }

    if !row_errors.is_empty() {
        tracing::warn!(skipped = row_errors.len(), "skipped incomplete CSV rows");
    }
    if kept.is_empty() {
        return Err(AppError::new(2, "No numeric columns found in CSV."));
    }

    let columns = kept.iter().map(|&i| names[i].clone()).zip(values).collect();
    Ok(IngestedColumns {
        columns,
        non_numeric,
        row_errors,
        rows_read,
    })
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    // Excel and other tools sometimes emit UTF-8 CSVs with a BOM prefix on the
    // first header. If we don't strip it, schema validation will incorrectly
    // report missing columns.
    let name = name.trim().trim_start_matches('\u{feff}');
    name.to_ascii_lowercase()
}

fn require_column(header_map: &HashMap<String, usize>, name: &str) -> Result<usize, AppError> {
    header_map
        .get(&normalize_header_name(name))
        .copied()
        .ok_or_else(|| AppError::new(2, format!("Missing required column: `{name}`")))
}

fn get_at(record: &StringRecord, idx: usize) -> Option<&str> {
    record.get(idx).map(str::trim).filter(|s| !s.is_empty())
}

fn get_required_at<'a>(record: &'a StringRecord, idx: usize, name: &str) -> Result<&'a str, String> {
    get_at(record, idx).ok_or_else(|| format!("Missing required value: `{name}`"))
}

fn parse_f64_at(record: &StringRecord, idx: usize, name: &str) -> Result<f64, String> {
    let s = get_required_at(record, idx, name)?;
    match s.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(format!("Invalid number '{s}' in `{name}`")),
    }
}

fn parse_bool(s: &str) -> Result<bool, String> {
    match s.to_ascii_lowercase().as_str() {
        "yes" | "y" | "true" | "1" => Ok(true),
        "no" | "n" | "false" | "0" => Ok(false),
        _ => Err(format!("Invalid `treated` value '{s}' (expected Yes/No)")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xy_groups_keep_first_seen_order_and_report_bad_rows() {
        let csv = "\u{feff}Conc,OD,Plate\n1,0.1,B\n2,0.2,A\n4,oops,A\n8,0.5,A\n3,0.3,B\n5,0.4,C\n";
        let spec = XySpec {
            x_col: "conc".to_string(),
            y_col: "od".to_string(),
            group_col: Some("plate".to_string()),
        };
        let data = read_xy(csv.as_bytes(), &spec).unwrap();
        assert_eq!(data.rows_read, 6);
        assert_eq!(data.rows_used, 5);
        assert_eq!(data.row_errors.len(), 1);
        assert_eq!(data.row_errors[0].line, 4);

        let names: Vec<&str> = data.groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["B", "A"]);
        assert_eq!(data.groups[1].observations.x(), &[2.0, 8.0]);
        assert_eq!(data.skipped_groups.len(), 1);
        assert_eq!(data.skipped_groups[0].0, "C");
    }

    #[test]
    fn missing_column_is_exit_code_2() {
        let spec = XySpec {
            x_col: "dose".to_string(),
            y_col: "od".to_string(),
            group_col: None,
        };
        let err = read_xy("conc,od\n1,2\n".as_bytes(), &spec).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn plate_rows_parse_treated_flags() {
        let csv = "Subject,Antigen,Isotype,Timepoint,Treated,Blank,dil_1,dil_2,dil_4,dil_8,dil_16,dil_32\n\
                   S1,RBD,IgG,D0,Yes,0.05,1.2,1.0,0.8,0.6,0.4,0.2\n\
                   S1,RBD,IgG,D0,No,0.05,1.5,1.3,1.1,0.9,0.7,0.5\n\
                   S2,RBD,IgG,D0,maybe,0.05,1,1,1,1,1,1\n";
        let plate = read_plate(csv.as_bytes(), &DilutionMap::default()).unwrap();
        assert_eq!(plate.rows.len(), 2);
        assert!(plate.rows[0].treated);
        assert!(!plate.rows[1].treated);
        assert_eq!(plate.rows[0].od.len(), 6);
        assert_eq!(plate.rows[0].key.timepoint, "D0");
        assert_eq!(plate.row_errors.len(), 1);
    }

    #[test]
    fn numeric_columns_skip_labels_and_dropped_names() {
        let csv = "Sample,CD3,CD4,Time\nA,100,20,1\nB,250,,2\nC,300,40,3\n";
        let data = read_columns(csv.as_bytes(), &["time".to_string()]).unwrap();
        let names: Vec<&str> = data.columns.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["CD3", "CD4"]);
        assert_eq!(data.non_numeric, vec!["Sample".to_string()]);
        assert_eq!(data.columns[0].1, vec![100.0, 300.0]);
        assert_eq!(data.row_errors.len(), 1);
    }
}
