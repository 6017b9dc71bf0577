//! Local inspection of tabular files before upload.
//!
//! A file is accepted only if it has a `.csv` extension, parses with a
//! header row, and has at least one column. The per-column summary comes
//! from this inspection; nothing here is computed by the service.

use std::path::{Path, PathBuf};

use polars::io::csv::read::CsvReadOptions;
use polars::prelude::*;
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::types::ColumnSummary;

/// Extensions accepted for upload, lowercase.
pub const TABULAR_EXTENSIONS: &[&str] = &["csv"];

/// Rows used for schema inference.
const INFER_SCHEMA_ROWS: usize = 1000;

/// Shape of a local table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSummary {
    pub row_count: usize,
    pub columns: Vec<ColumnSummary>,
}

impl TableSummary {
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }
}

/// The extension check alone, without reading the file.
pub fn has_tabular_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .is_some_and(|ext| TABULAR_EXTENSIONS.contains(&ext.as_str()))
}

/// Validate and summarize a local CSV file.
///
/// # Errors
///
/// - [`PipelineError::Validation`] for a wrong extension or a missing file
/// - [`PipelineError::Tabular`] when the contents do not parse as a table
pub fn inspect_csv(path: &Path) -> Result<TableSummary> {
    if !has_tabular_extension(path) {
        return Err(PipelineError::Validation(format!(
            "only .csv files can be uploaded, got '{}'",
            path.display()
        )));
    }
    if !path.is_file() {
        return Err(PipelineError::Validation(format!(
            "file not found: {}",
            path.display()
        )));
    }

    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(INFER_SCHEMA_ROWS))
        .try_into_reader_with_file_path(Some(PathBuf::from(path)))?
        .finish()?;

    if df.width() == 0 {
        return Err(PipelineError::Tabular(format!(
            "{} has no columns",
            path.display()
        )));
    }

    let columns = summarize_columns(&df);
    debug!(
        path = %path.display(),
        rows = df.height(),
        columns = columns.len(),
        "Inspected local table"
    );

    Ok(TableSummary {
        row_count: df.height(),
        columns,
    })
}

fn summarize_columns(df: &DataFrame) -> Vec<ColumnSummary> {
    df.get_columns()
        .iter()
        .map(|col| ColumnSummary {
            name: col.name().to_string(),
            dtype: format!("{:?}", col.dtype()),
            missing_count: col.null_count(),
        })
        .collect()
}
