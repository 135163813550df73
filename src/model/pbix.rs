//! PBIX archive reader
//!
//! A `.pbix` / `.pbit` file is a ZIP container. The tabular model definition
//! lives in the `DataModelSchema` entry (UTF-16LE JSON); `Metadata` and
//! `Version` describe the producing Power BI Desktop build. Imported rows are
//! kept in the VertiPaq-compressed `DataModel` entry, which is not decoded
//! here.

use super::{
    ColumnStatistics, DaxColumn, DaxMeasure, DaxTable, MParameter, ModelError, ModelLoader, PowerQuery,
    Relationship, SchemaColumn, SemanticModel, TableData,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use zip::ZipArchive;

const SCHEMA_ENTRY: &str = "DataModelSchema";
const DATA_MODEL_ENTRY: &str = "DataModel";
const METADATA_ENTRY: &str = "Metadata";
const VERSION_ENTRY: &str = "Version";

/// Upper bound on the buffer reserved up front for one archive entry
const MAX_PREALLOCATED_BYTES: u64 = 64 << 20;

/// Loads [`PbixArchive`]s from disk
#[derive(Debug, Default, Clone)]
pub struct PbixLoader;

impl ModelLoader for PbixLoader {
    fn load(&self, path: &Path) -> Result<Arc<dyn SemanticModel>, ModelError> {
        Ok(Arc::new(PbixArchive::open(path)?))
    }
}

/// A model read from the `DataModelSchema` of a PBIX container
#[derive(Debug, Clone)]
pub struct PbixArchive {
    model: TabularModel,
    metadata: Map<String, Value>,
    size: u64,
}

// `DataModelSchema` layout (Tabular Object Model JSON)

#[derive(Debug, Deserialize)]
struct SchemaDocument {
    #[serde(default)]
    model: TabularModel,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct TabularModel {
    tables: Vec<TabularTable>,
    relationships: Vec<TabularRelationship>,
    expressions: Vec<TabularExpression>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct TabularTable {
    name: String,
    columns: Vec<TabularColumn>,
    measures: Vec<TabularMeasure>,
    partitions: Vec<TabularPartition>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct TabularColumn {
    name: String,
    data_type: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    expression: Option<Expression>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct TabularMeasure {
    name: String,
    expression: Option<Expression>,
    display_folder: Option<String>,
    description: Option<Expression>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct TabularPartition {
    source: PartitionSource,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct PartitionSource {
    #[serde(rename = "type")]
    kind: Option<String>,
    expression: Option<Expression>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct TabularRelationship {
    from_table: String,
    from_column: String,
    to_table: String,
    to_column: String,
    is_active: Option<bool>,
    from_cardinality: Option<String>,
    to_cardinality: Option<String>,
    cross_filtering_behavior: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct TabularExpression {
    name: String,
    kind: Option<String>,
    expression: Option<Expression>,
    description: Option<Expression>,
}

/// Expressions are stored either as one string or as an array of lines
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Expression {
    Text(String),
    Lines(Vec<String>),
}

impl Expression {
    fn to_text(&self) -> String {
        match self {
            Expression::Text(text) => text.clone(),
            Expression::Lines(lines) => lines.join("\n"),
        }
    }
}

fn text_of(expression: &Option<Expression>) -> String {
    expression.as_ref().map(Expression::to_text).unwrap_or_default()
}

fn cardinality_symbol(value: Option<&str>, default: &str) -> String {
    match value.map(str::to_ascii_lowercase).as_deref() {
        Some("one") => "1".to_string(),
        Some("many") => "M".to_string(),
        Some("none") => "0".to_string(),
        _ => default.to_string(),
    }
}

/// Decode an archive entry that may be UTF-16LE (with or without BOM) or UTF-8
fn decode_entry_text(bytes: &[u8]) -> String {
    let is_utf16 = bytes.starts_with(&[0xFF, 0xFE]) || (bytes.len() >= 2 && bytes[1] == 0);
    let text = if is_utf16 {
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    };
    text.trim_start_matches('\u{feff}').to_string()
}

/// Bytes to reserve for an entry whose header declares `declared` bytes.
///
/// The header value is untrusted, so it is only a capped hint.
fn preallocation(declared: u64) -> usize {
    declared.min(MAX_PREALLOCATED_BYTES) as usize
}

fn read_entry<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Option<Vec<u8>>, ModelError> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut buffer = Vec::with_capacity(preallocation(entry.size()));
    entry.read_to_end(&mut buffer)?;
    Ok(Some(buffer))
}

impl PbixArchive {
    /// Open and parse a PBIX/PBIT container
    pub fn open(path: &Path) -> Result<Self, ModelError> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut archive = ZipArchive::new(file)?;

        let schema_bytes = read_entry(&mut archive, SCHEMA_ENTRY)?.ok_or_else(|| {
            ModelError::Unsupported(format!(
                "'{}' has no {} entry. Its model is stored only in the compressed DataModel; \
                 save it as a Power BI template (.pbit) to inspect it.",
                path.display(),
                SCHEMA_ENTRY
            ))
        })?;
        let document: SchemaDocument = serde_json::from_str(&decode_entry_text(&schema_bytes))
            .map_err(|e| ModelError::Schema(e.to_string()))?;

        let mut metadata = match read_entry(&mut archive, METADATA_ENTRY)? {
            Some(bytes) => match serde_json::from_str::<Value>(&decode_entry_text(&bytes)) {
                Ok(Value::Object(map)) => map,
                Ok(other) => {
                    let mut map = Map::new();
                    map.insert(METADATA_ENTRY.to_string(), other);
                    map
                }
                Err(e) => {
                    tracing::warn!("Ignoring unreadable Metadata entry: {}", e);
                    Map::new()
                }
            },
            None => Map::new(),
        };
        if let Some(bytes) = read_entry(&mut archive, VERSION_ENTRY)? {
            metadata.insert(
                VERSION_ENTRY.to_string(),
                Value::String(decode_entry_text(&bytes).trim().to_string()),
            );
        }

        let size = match archive.by_name(DATA_MODEL_ENTRY) {
            Ok(entry) => entry.size(),
            Err(_) => file_len,
        };

        tracing::info!(
            "Opened {} ({} tables, {} bytes)",
            path.display(),
            document.model.tables.len(),
            size
        );

        Ok(Self {
            model: document.model,
            metadata,
            size,
        })
    }

    fn table(&self, name: &str) -> Option<&TabularTable> {
        self.model.tables.iter().find(|t| t.name == name)
    }
}

impl SemanticModel for PbixArchive {
    fn tables(&self) -> Vec<String> {
        self.model.tables.iter().map(|t| t.name.clone()).collect()
    }

    fn table_rows(&self, table: &str) -> Result<TableData, ModelError> {
        if self.table(table).is_none() {
            return Err(ModelError::TableNotFound(table.to_string()));
        }
        Err(ModelError::Unsupported(format!(
            "Rows of table '{}' are stored in the VertiPaq-compressed DataModel, which this reader does not decode",
            table
        )))
    }

    fn schema(&self) -> Vec<SchemaColumn> {
        self.model
            .tables
            .iter()
            .flat_map(|table| {
                table
                    .columns
                    .iter()
                    .filter(|c| c.kind.as_deref() != Some("rowNumber"))
                    .map(move |column| SchemaColumn {
                        table_name: table.name.clone(),
                        column_name: column.name.clone(),
                        data_type: column.data_type.clone().unwrap_or_else(|| "unknown".to_string()),
                    })
            })
            .collect()
    }

    fn relationships(&self) -> Vec<Relationship> {
        self.model
            .relationships
            .iter()
            .map(|r| Relationship {
                from_table_name: r.from_table.clone(),
                from_column_name: r.from_column.clone(),
                to_table_name: r.to_table.clone(),
                to_column_name: r.to_column.clone(),
                is_active: r.is_active.unwrap_or(true),
                cardinality: format!(
                    "{}:{}",
                    cardinality_symbol(r.from_cardinality.as_deref(), "M"),
                    cardinality_symbol(r.to_cardinality.as_deref(), "1")
                ),
                cross_filtering_behavior: r
                    .cross_filtering_behavior
                    .clone()
                    .unwrap_or_else(|| "oneDirection".to_string()),
            })
            .collect()
    }

    fn dax_measures(&self) -> Vec<DaxMeasure> {
        self.model
            .tables
            .iter()
            .flat_map(|table| {
                table.measures.iter().map(move |m| DaxMeasure {
                    table_name: table.name.clone(),
                    name: m.name.clone(),
                    expression: text_of(&m.expression),
                    display_folder: m.display_folder.clone().filter(|f| !f.is_empty()),
                    description: m.description.as_ref().map(Expression::to_text),
                })
            })
            .collect()
    }

    fn dax_columns(&self) -> Vec<DaxColumn> {
        self.model
            .tables
            .iter()
            .flat_map(|table| {
                table
                    .columns
                    .iter()
                    .filter(|c| c.kind.as_deref() == Some("calculated"))
                    .map(move |c| DaxColumn {
                        table_name: table.name.clone(),
                        column_name: c.name.clone(),
                        expression: text_of(&c.expression),
                    })
            })
            .collect()
    }

    fn dax_tables(&self) -> Vec<DaxTable> {
        self.partitions_of_kind("calculated")
            .map(|(table, expression)| DaxTable {
                table_name: table,
                expression,
            })
            .collect()
    }

    fn power_query(&self) -> Vec<PowerQuery> {
        self.partitions_of_kind("m")
            .map(|(table, expression)| PowerQuery {
                table_name: table,
                expression,
            })
            .collect()
    }

    fn m_parameters(&self) -> Vec<MParameter> {
        self.model
            .expressions
            .iter()
            .filter(|e| e.kind.as_deref().unwrap_or("m") == "m")
            .filter_map(|e| {
                let expression = text_of(&e.expression);
                expression
                    .replace(' ', "")
                    .contains("IsParameterQuery=true")
                    .then(|| MParameter {
                        parameter_name: e.name.clone(),
                        description: e.description.as_ref().map(Expression::to_text),
                        expression,
                    })
            })
            .collect()
    }

    fn statistics(&self) -> Result<Vec<ColumnStatistics>, ModelError> {
        Err(ModelError::Unsupported(
            "Column statistics are part of the VertiPaq storage in DataModel, which this reader does not decode"
                .to_string(),
        ))
    }

    fn metadata(&self) -> Map<String, Value> {
        self.metadata.clone()
    }

    fn size(&self) -> u64 {
        self.size
    }
}

impl PbixArchive {
    fn partitions_of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = (String, String)> + 'a {
        self.model.tables.iter().flat_map(move |table| {
            table
                .partitions
                .iter()
                .filter(move |p| p.source.kind.as_deref() == Some(kind))
                .map(move |p| (table.name.clone(), text_of(&p.source.expression)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn utf16le(text: &str) -> Vec<u8> {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in text.encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        bytes
    }

    fn sample_schema() -> Value {
        json!({
            "name": "SemanticModel",
            "model": {
                "tables": [
                    {
                        "name": "Sales",
                        "columns": [
                            {"name": "RowNumber-2662979B", "dataType": "int64", "type": "rowNumber"},
                            {"name": "Amount", "dataType": "double"},
                            {"name": "Margin", "dataType": "double", "type": "calculated",
                             "expression": "Sales[Amount] * 0.2"}
                        ],
                        "measures": [
                            {"name": "Total Sales", "expression": ["SUM(", "  Sales[Amount]", ")"],
                             "displayFolder": "KPIs"}
                        ],
                        "partitions": [
                            {"name": "Sales-1", "source": {"type": "m",
                             "expression": ["let", "    Source = Sql.Database(\"srv\", \"db\")", "in", "    Source"]}}
                        ]
                    },
                    {
                        "name": "Calendar",
                        "columns": [{"name": "Date", "dataType": "dateTime"}],
                        "partitions": [
                            {"source": {"type": "calculated", "expression": "CALENDARAUTO()"}}
                        ]
                    }
                ],
                "relationships": [
                    {"name": "r1", "fromTable": "Sales", "fromColumn": "Date",
                     "toTable": "Calendar", "toColumn": "Date"},
                    {"name": "r2", "fromTable": "Sales", "fromColumn": "Id",
                     "toTable": "Other", "toColumn": "Id", "isActive": false,
                     "toCardinality": "many", "crossFilteringBehavior": "bothDirections"}
                ],
                "expressions": [
                    {"name": "ServerName", "kind": "m",
                     "expression": "\"srv\" meta [IsParameterQuery=true, Type=\"Text\"]"},
                    {"name": "SharedQuery", "kind": "m", "expression": "let x = 1 in x"}
                ]
            }
        })
    }

    fn write_archive(entries: &[(&str, Vec<u8>)]) -> tempfile::NamedTempFile {
        let file = tempfile::Builder::new().suffix(".pbit").tempfile().unwrap();
        let mut writer = zip::ZipWriter::new(file.reopen().unwrap());
        for (name, content) in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap();
        file
    }

    fn sample_archive() -> PbixArchive {
        let file = write_archive(&[
            (SCHEMA_ENTRY, utf16le(&sample_schema().to_string())),
            (METADATA_ENTRY, utf16le(r#"{"CreatedFrom":"Cloud","CreatedFromRelease":"2024.05"}"#)),
            (VERSION_ENTRY, utf16le("1.28")),
        ]);
        PbixArchive::open(file.path()).unwrap()
    }

    #[test]
    fn test_tables_and_schema() {
        let archive = sample_archive();
        assert_eq!(archive.tables(), vec!["Sales", "Calendar"]);

        let schema = archive.schema();
        assert_eq!(schema.len(), 3);
        assert_eq!(schema[0].column_name, "Amount");
        assert_eq!(schema[2].table_name, "Calendar");
        assert_eq!(schema[2].data_type, "dateTime");
    }

    #[test]
    fn test_expressions() {
        let archive = sample_archive();

        let measures = archive.dax_measures();
        assert_eq!(measures.len(), 1);
        assert_eq!(measures[0].expression, "SUM(\n  Sales[Amount]\n)");
        assert_eq!(measures[0].display_folder.as_deref(), Some("KPIs"));

        let columns = archive.dax_columns();
        assert_eq!(columns.len(), 1);
        assert_eq!(columns[0].column_name, "Margin");

        let tables = archive.dax_tables();
        assert_eq!(tables[0].table_name, "Calendar");
        assert_eq!(tables[0].expression, "CALENDARAUTO()");

        let queries = archive.power_query();
        assert_eq!(queries.len(), 1);
        assert!(queries[0].expression.starts_with("let\n"));

        let parameters = archive.m_parameters();
        assert_eq!(parameters.len(), 1);
        assert_eq!(parameters[0].parameter_name, "ServerName");
    }

    #[test]
    fn test_relationships() {
        let relationships = sample_archive().relationships();
        assert_eq!(relationships[0].cardinality, "M:1");
        assert!(relationships[0].is_active);
        assert_eq!(relationships[0].cross_filtering_behavior, "oneDirection");
        assert_eq!(relationships[1].cardinality, "M:M");
        assert!(!relationships[1].is_active);
    }

    #[test]
    fn test_metadata_and_size() {
        let archive = sample_archive();
        let metadata = archive.metadata();
        assert_eq!(metadata["CreatedFrom"], json!("Cloud"));
        assert_eq!(metadata["Version"], json!("1.28"));
        assert!(archive.size() > 0);
    }

    #[test]
    fn test_table_rows_are_not_decoded() {
        let archive = sample_archive();
        assert!(matches!(
            archive.table_rows("Sales"),
            Err(ModelError::Unsupported(_))
        ));
        assert!(matches!(
            archive.table_rows("Nope"),
            Err(ModelError::TableNotFound(_))
        ));
        assert!(matches!(archive.statistics(), Err(ModelError::Unsupported(_))));
    }

    #[test]
    fn test_missing_schema_entry() {
        let file = write_archive(&[(DATA_MODEL_ENTRY, vec![0u8; 16])]);
        let err = PbixArchive::open(file.path()).unwrap_err();
        assert!(err.to_string().contains("DataModelSchema"));
    }

    #[test]
    fn test_declared_entry_size_is_capped() {
        assert_eq!(preallocation(512), 512);
        assert_eq!(preallocation(u64::MAX), MAX_PREALLOCATED_BYTES as usize);
    }

    #[test]
    fn test_decode_utf8_entry() {
        assert_eq!(decode_entry_text(b"{\"a\":1}"), "{\"a\":1}");
        assert_eq!(decode_entry_text(&utf16le("hi")), "hi");
    }
}
