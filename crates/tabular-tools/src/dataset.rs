//! Dataset inspection - structured summaries of CSV/TSV and spreadsheet files

use calamine::{open_workbook_auto, Data, Reader};
use std::path::Path;
use tabular_core::{AgentError, ColumnSummary, DatasetHandle, DatasetSummary};

const SAMPLE_LIMIT: usize = 5;
const DTYPE_PROBE_LIMIT: usize = 200;
const PREVIEW_ROWS: usize = 5;

/// File extensions the runtime accepts for upload.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["csv", "tsv", "xls", "xlsx"];

/// Lowercased extension of `file_name` if the format is supported.
pub fn supported_extension(file_name: &str) -> Option<String> {
    let ext = Path::new(file_name)
        .extension()?
        .to_str()?
        .to_ascii_lowercase();
    SUPPORTED_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

/// Inspect the dataset and produce its structured summary.
///
/// Runs on the blocking pool - both readers are synchronous.
pub async fn inspect(
    handle: &DatasetHandle,
    sheet: Option<&str>,
) -> Result<DatasetSummary, AgentError> {
    let path = handle.path.clone();
    let extension = handle.extension.clone();
    let sheet = sheet.map(String::from);

    tokio::task::spawn_blocking(move || match extension.as_str() {
        "csv" => inspect_delimited(&path, b','),
        "tsv" => inspect_delimited(&path, b'\t'),
        "xls" | "xlsx" => inspect_spreadsheet(&path, sheet.as_deref()),
        other => Err(AgentError::UnsupportedFormat(format!(
            "no reader for .{} files",
            other
        ))),
    })
    .await
    .map_err(|e| AgentError::internal(format!("dataset inspection task failed: {}", e)))?
}

// ---------------------------------------------------------------------------
// Delimited text (csv / tsv)
// ---------------------------------------------------------------------------

fn inspect_delimited(path: &Path, delimiter: u8) -> Result<DatasetSummary, AgentError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_path(path)
        .map_err(|e| AgentError::invalid_input(format!("cannot open dataset: {}", e)))?;

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| AgentError::invalid_input(format!("cannot read header row: {}", e)))?
        .iter()
        .map(String::from)
        .collect();
    if headers.is_empty() {
        return Err(AgentError::invalid_input("dataset has no columns"));
    }

    let cols = headers.len();
    let mut rows = 0usize;
    let mut missing = 0usize;
    let mut samples: Vec<Vec<String>> = vec![Vec::new(); cols];
    let mut probes: Vec<Vec<String>> = vec![Vec::new(); cols];
    let mut preview_rows: Vec<Vec<String>> = Vec::new();

    for record in reader.records() {
        let record =
            record.map_err(|e| AgentError::invalid_input(format!("malformed record: {}", e)))?;
        rows += 1;

        let mut preview_row = Vec::with_capacity(cols);
        for i in 0..cols {
            let value = record.get(i).unwrap_or("").trim();
            if value.is_empty() {
                missing += 1;
            } else {
                if samples[i].len() < SAMPLE_LIMIT {
                    samples[i].push(value.to_string());
                }
                if probes[i].len() < DTYPE_PROBE_LIMIT {
                    probes[i].push(value.to_string());
                }
            }
            if preview_rows.len() < PREVIEW_ROWS {
                preview_row.push(value.to_string());
            }
        }
        if preview_rows.len() < PREVIEW_ROWS {
            preview_rows.push(preview_row);
        }
    }

    let columns = headers
        .iter()
        .enumerate()
        .map(|(i, name)| ColumnSummary {
            name: name.clone(),
            dtype: infer_dtype(&probes[i]).to_string(),
            sample: samples[i].clone(),
        })
        .collect();

    Ok(DatasetSummary {
        total_rows: rows,
        total_columns: cols,
        columns,
        missing_ratio: missing_ratio(missing, rows, cols),
        preview: render_preview(&headers, &preview_rows),
    })
}

/// Infer a column dtype from non-empty sampled values.
fn infer_dtype(values: &[String]) -> &'static str {
    if values.is_empty() {
        return "string";
    }
    if values.iter().all(|v| v.parse::<i64>().is_ok()) {
        return "int";
    }
    if values.iter().all(|v| v.parse::<f64>().is_ok()) {
        return "float";
    }
    if values
        .iter()
        .all(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "false"))
    {
        return "bool";
    }
    if values.iter().all(|v| looks_like_date(v)) {
        return "date";
    }
    "string"
}

fn looks_like_date(value: &str) -> bool {
    for format in ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%Y-%m"] {
        if chrono::NaiveDate::parse_from_str(value, format).is_ok() {
            return true;
        }
    }
    // Year-month like "2024-01" parses only with a synthetic day
    chrono::NaiveDate::parse_from_str(&format!("{}-01", value), "%Y-%m-%d").is_ok()
}

// ---------------------------------------------------------------------------
// Spreadsheets (xls / xlsx)
// ---------------------------------------------------------------------------

fn inspect_spreadsheet(path: &Path, sheet: Option<&str>) -> Result<DatasetSummary, AgentError> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|e| AgentError::invalid_input(format!("cannot open workbook: {}", e)))?;

    let names = workbook.sheet_names().to_vec();
    let sheet_name = match sheet {
        Some(s) => {
            if !names.iter().any(|n| n == s) {
                return Err(AgentError::invalid_input(format!(
                    "sheet '{}' not found; available: {}",
                    s,
                    names.join(", ")
                )));
            }
            s.to_string()
        }
        None => names
            .first()
            .cloned()
            .ok_or_else(|| AgentError::invalid_input("workbook has no sheets"))?,
    };

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| AgentError::invalid_input(format!("cannot read sheet: {}", e)))?;

    let mut rows_iter = range.rows();
    let headers: Vec<String> = rows_iter
        .next()
        .ok_or_else(|| AgentError::invalid_input("sheet is empty"))?
        .iter()
        .map(cell_to_string)
        .collect();
    let cols = headers.len();
    if cols == 0 {
        return Err(AgentError::invalid_input("sheet has no columns"));
    }

    let mut rows = 0usize;
    let mut missing = 0usize;
    let mut samples: Vec<Vec<String>> = vec![Vec::new(); cols];
    let mut dtypes: Vec<CellTally> = vec![CellTally::default(); cols];
    let mut preview_rows: Vec<Vec<String>> = Vec::new();

    for row in rows_iter {
        rows += 1;
        let mut preview_row = Vec::with_capacity(cols);
        for i in 0..cols {
            let cell = row.get(i).unwrap_or(&Data::Empty);
            if matches!(cell, Data::Empty) {
                missing += 1;
            } else {
                if samples[i].len() < SAMPLE_LIMIT {
                    samples[i].push(cell_to_string(cell));
                }
                dtypes[i].record(cell);
            }
            if preview_rows.len() < PREVIEW_ROWS {
                preview_row.push(cell_to_string(cell));
            }
        }
        if preview_rows.len() < PREVIEW_ROWS {
            preview_rows.push(preview_row);
        }
    }

    let columns = headers
        .iter()
        .enumerate()
        .map(|(i, name)| ColumnSummary {
            name: name.clone(),
            dtype: dtypes[i].dominant().to_string(),
            sample: samples[i].clone(),
        })
        .collect();

    Ok(DatasetSummary {
        total_rows: rows,
        total_columns: cols,
        columns,
        missing_ratio: missing_ratio(missing, rows, cols),
        preview: render_preview(&headers, &preview_rows),
    })
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        other => other.to_string(),
    }
}

#[derive(Clone, Copy, Default)]
struct CellTally {
    ints: usize,
    floats: usize,
    bools: usize,
    dates: usize,
    strings: usize,
}

impl CellTally {
    fn record(&mut self, cell: &Data) {
        match cell {
            Data::Int(_) => self.ints += 1,
            Data::Float(_) => self.floats += 1,
            Data::Bool(_) => self.bools += 1,
            Data::DateTime(_) | Data::DateTimeIso(_) => self.dates += 1,
            _ => self.strings += 1,
        }
    }

    fn dominant(&self) -> &'static str {
        let total = self.ints + self.floats + self.bools + self.dates + self.strings;
        if total == 0 || self.strings > 0 {
            return "string";
        }
        if self.dates == total {
            return "date";
        }
        if self.bools == total {
            return "bool";
        }
        if self.floats > 0 {
            return "float";
        }
        "int"
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

fn missing_ratio(missing: usize, rows: usize, cols: usize) -> f64 {
    let cells = rows * cols;
    if cells == 0 {
        0.0
    } else {
        missing as f64 / cells as f64
    }
}

fn render_preview(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut out = headers.join(" | ");
    for row in rows {
        out.push('\n');
        out.push_str(&row.join(" | "));
    }
    out
}
