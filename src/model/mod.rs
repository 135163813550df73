//! Semantic model inspection
//!
//! [`SemanticModel`] is the read-only view of a Power BI file the tools work
//! against; [`ModelLoader`] produces one from a local path.

pub mod pbix;

pub use pbix::{PbixArchive, PbixLoader};

use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Model errors
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("File '{0}' not found.")]
    NotFound(String),

    #[error("File '{path}' is not a {expected} file.")]
    WrongExtension { path: String, expected: String },

    #[error("Failed to open archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid model schema: {0}")]
    Schema(String),

    #[error("Table '{0}' not found in the model")]
    TableNotFound(String),

    #[error("{0}")]
    Unsupported(String),
}

/// Rows of one table, in column order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableData {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl TableData {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows as JSON objects keyed by column name
    pub fn records(&self, rows: &[Vec<Value>]) -> Vec<Value> {
        rows.iter()
            .map(|row| {
                let record: Map<String, Value> = self
                    .columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned().chain(std::iter::repeat(Value::Null)))
                    .collect();
                Value::Object(record)
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SchemaColumn {
    pub table_name: String,
    pub column_name: String,
    pub data_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Relationship {
    pub from_table_name: String,
    pub from_column_name: String,
    pub to_table_name: String,
    pub to_column_name: String,
    pub is_active: bool,
    /// e.g. `M:1`
    pub cardinality: String,
    pub cross_filtering_behavior: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DaxMeasure {
    pub table_name: String,
    pub name: String,
    pub expression: String,
    pub display_folder: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DaxColumn {
    pub table_name: String,
    pub column_name: String,
    pub expression: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DaxTable {
    pub table_name: String,
    pub expression: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PowerQuery {
    pub table_name: String,
    pub expression: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MParameter {
    pub parameter_name: String,
    pub description: Option<String>,
    pub expression: String,
}

/// Storage statistics of one column
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ColumnStatistics {
    pub table_name: String,
    pub column_name: String,
    /// Distinct values
    pub cardinality: u64,
    /// Sizes in bytes
    pub dictionary: u64,
    pub hash_index: u64,
    pub data_size: u64,
}

/// Read-only view of a loaded Power BI model
pub trait SemanticModel: Send + Sync {
    fn tables(&self) -> Vec<String>;
    fn table_rows(&self, table: &str) -> Result<TableData, ModelError>;
    fn schema(&self) -> Vec<SchemaColumn>;
    fn relationships(&self) -> Vec<Relationship>;
    fn dax_measures(&self) -> Vec<DaxMeasure>;
    fn dax_columns(&self) -> Vec<DaxColumn>;
    fn dax_tables(&self) -> Vec<DaxTable>;
    fn power_query(&self) -> Vec<PowerQuery>;
    fn m_parameters(&self) -> Vec<MParameter>;
    fn statistics(&self) -> Result<Vec<ColumnStatistics>, ModelError>;
    fn metadata(&self) -> Map<String, Value>;
    /// Model size in bytes
    fn size(&self) -> u64;
}

/// Opens a model from a validated local path
pub trait ModelLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Arc<dyn SemanticModel>, ModelError>;
}

/// A model together with the file it came from
#[derive(Clone)]
pub struct LoadedModel {
    pub path: PathBuf,
    pub model: Arc<dyn SemanticModel>,
}

impl LoadedModel {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Expand `~`, check the file exists and has one of `extensions`
pub fn resolve_file_path(raw: &str, extensions: &[&str]) -> Result<PathBuf, ModelError> {
    let raw = raw.trim();
    let path = match raw.strip_prefix("~/").or_else(|| (raw == "~").then_some("")) {
        Some(rest) => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest),
            None => PathBuf::from(raw),
        },
        None => PathBuf::from(raw),
    };

    if !path.is_file() {
        return Err(ModelError::NotFound(path.display().to_string()));
    }

    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    if !extensions.iter().any(|e| *e == extension) {
        let expected = extensions
            .iter()
            .map(|e| format!(".{}", e))
            .collect::<Vec<_>>()
            .join(" or ");
        return Err(ModelError::WrongExtension {
            path: path.display().to_string(),
            expected,
        });
    }

    Ok(path)
}
