use crate::record::PerformerRecord;

use anyhow::{bail, Context, Result};
use calamine::{open_workbook_auto, Data, Reader};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::path::Path;

pub const NAME_COLUMN: &str = "Name";
pub const LOCATION_COLUMN: &str = "Location";
pub const COMPOSITION_COLUMN: &str = "Composition";
pub const RAAG_COLUMN: &str = "Raag";
pub const TAAL_COLUMN: &str = "Taal";
pub const DESCRIPTION_COLUMN: &str = "Description";
pub const VIDEO_FILE_COLUMN: &str = "VideoFileName";

pub const REQUIRED_COLUMNS: [&str; 5] = [
    NAME_COLUMN,
    LOCATION_COLUMN,
    COMPOSITION_COLUMN,
    RAAG_COLUMN,
    TAAL_COLUMN,
];

/// Loads performers in file order. Spreadsheets (`xlsx`, `xlsm`, `xls`,
/// `ods`) are read from their first worksheet; `json` files hold an array of
/// objects keyed by column name. A file without a single performer is an
/// error, whatever the command.
pub fn load_performers(path: &Path) -> Result<Vec<PerformerRecord>> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    let records = match ext.as_str() {
        "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => load_spreadsheet(path),
        "json" => load_json(path),
        other => bail!(
            "unsupported metadata format '{}' for {} (expected xlsx, xls, ods or json)",
            other,
            path.display()
        ),
    };
    let records =
        records.with_context(|| format!("failed to load performer data from {}", path.display()))?;
    if records.is_empty() {
        bail!("{} lists no performers", path.display());
    }
    Ok(records)
}

fn load_spreadsheet(path: &Path) -> Result<Vec<PerformerRecord>> {
    let mut workbook = open_workbook_auto(path)?;
    let range = workbook
        .worksheet_range_at(0)
        .context("workbook has no worksheets")??;

    let mut rows = range.rows();
    let Some(header_row) = rows.next() else {
        bail!("worksheet is empty");
    };
    let header = header_row.iter().map(cell_text).collect::<Vec<_>>();
    let body = rows
        .map(|row| row.iter().map(cell_text).collect::<Vec<_>>())
        .collect::<Vec<_>>();
    records_from_rows(&header, &body)
}

fn load_json(path: &Path) -> Result<Vec<PerformerRecord>> {
    let raw = std::fs::read_to_string(path)?;
    let rows: Vec<Map<String, Value>> =
        serde_json::from_str(&raw).context("expected a JSON array of objects")?;
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let header = rows
        .iter()
        .flat_map(|row| row.keys().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect::<Vec<_>>();
    let body = rows
        .iter()
        .map(|row| {
            header
                .iter()
                .map(|col| row.get(col).map(json_text).unwrap_or_default())
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();
    records_from_rows(&header, &body)
}

/// Maps header-labelled text rows to records. Only column presence is
/// checked; all missing required columns are reported together.
pub fn records_from_rows(header: &[String], rows: &[Vec<String>]) -> Result<Vec<PerformerRecord>> {
    let column = |name: &str| header.iter().position(|h| h.trim() == name);

    let missing = REQUIRED_COLUMNS
        .iter()
        .filter(|c| column(**c).is_none())
        .copied()
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        bail!(
            "missing required column(s): {} (found: {})",
            missing.join(", "),
            header.join(", ")
        );
    }

    let name_idx = column(NAME_COLUMN);
    let location_idx = column(LOCATION_COLUMN);
    let composition_idx = column(COMPOSITION_COLUMN);
    let raag_idx = column(RAAG_COLUMN);
    let taal_idx = column(TAAL_COLUMN);
    let description_idx = column(DESCRIPTION_COLUMN);
    let video_idx = column(VIDEO_FILE_COLUMN);

    let cell = |row: &[String], idx: Option<usize>| -> String {
        idx.and_then(|i| row.get(i)).cloned().unwrap_or_default()
    };

    let records = rows
        .iter()
        .filter(|row| row.iter().any(|c| !c.trim().is_empty()))
        .map(|row| {
            PerformerRecord::new(cell(row, name_idx), cell(row, location_idx))
                .with_video_file_name(&cell(row, video_idx))
                .with_composition(&cell(row, composition_idx))
                .with_raag(&cell(row, raag_idx))
                .with_taal(&cell(row, taal_idx))
                .with_description(&cell(row, description_idx))
        })
        .collect();
    Ok(records)
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.is_finite() && f.fract() == 0.0 => format!("{}", *f as i64),
        other => other.to_string(),
    }
}

fn json_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
