//! MCP Server implementation for Power BI
//!
//! Exposes tools for inspecting a local PBIX model and working with the
//! Power BI service

use crate::auth::AuthError;
use crate::config::RuntimeConfig;
use crate::mcp::args::{int_arg, required_string, string_arg, ArgError, Args};
use crate::mcp::policy::ToolPolicy;
use crate::mcp::protocol::*;
use crate::model::{LoadedModel, ModelError};
use crate::pagination::{PageRequest, PaginationError};
use crate::powerbi::PowerBiError;
use crate::progress::Progress;
use crate::session::Session;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Failure of a single tool call, reported to the client as `Error: ...`
#[derive(Error, Debug)]
pub enum ToolError {
    #[error(transparent)]
    Args(#[from] ArgError),

    #[error(transparent)]
    Pagination(#[from] PaginationError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    PowerBi(#[from] PowerBiError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Failed to acquire token: {0}")]
    Connect(#[source] AuthError),

    #[error("No Power BI file loaded. Please use load_pbix_file first.")]
    NoModel,

    #[error("{0}")]
    Invalid(String),

    #[error("Failed to format result: {0}")]
    Format(#[from] serde_json::Error),
}

pub type ToolResult = Result<String, ToolError>;

/// MCP Server for Power BI
pub struct PbixMcpServer {
    pub(crate) session: Arc<Session>,
    pub(crate) config: Arc<RuntimeConfig>,
    policy: ToolPolicy,
}

impl PbixMcpServer {
    /// Create a new MCP server instance
    pub fn new(session: Arc<Session>, config: Arc<RuntimeConfig>) -> Self {
        let policy = ToolPolicy::from_config(&config);
        Self {
            session,
            config,
            policy,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Get list of available tools
    pub fn get_tools(&self) -> Vec<Tool> {
        Self::get_tools_static()
    }

    /// Get list of available tools (static version)
    pub fn get_tools_static() -> Vec<Tool> {
        use crate::mcp::protocol::ParamType::{Boolean, Integer, String as Text};

        vec![
            tool(
                "load_pbix_file",
                "Load a Power BI (.pbix or .pbit) file for analysis. Replaces any previously loaded model.",
                vec![("file_path", Text, "Path to the .pbix or .pbit file", true)],
            ),
            tool("get_tables", "List all tables in the loaded model", vec![]),
            tool("get_metadata", "Get metadata about the loaded Power BI configuration", vec![]),
            tool("get_power_query", "Get the Power Query (M) code of every table", vec![]),
            tool("get_m_parameters", "Get the M parameters defined in the model", vec![]),
            tool("get_model_size", "Get the model size in bytes", vec![]),
            tool("get_dax_tables", "Get the calculated (DAX) tables", vec![]),
            tool(
                "get_dax_measures",
                "Get DAX measures, optionally filtered by table and/or measure name",
                vec![
                    ("table_name", Text, "Only measures of this table", false),
                    ("measure_name", Text, "Only the measure with this name", false),
                ],
            ),
            tool(
                "get_dax_columns",
                "Get calculated columns, optionally filtered by table and/or column name",
                vec![
                    ("table_name", Text, "Only columns of this table", false),
                    ("column_name", Text, "Only the column with this name", false),
                ],
            ),
            tool(
                "get_schema",
                "Get column names and data types, optionally filtered by table and/or column",
                vec![
                    ("table_name", Text, "Only columns of this table", false),
                    ("column_name", Text, "Only the column with this name", false),
                ],
            ),
            tool(
                "get_relationships",
                "Get relationships between tables, optionally filtered by source and/or target table",
                vec![
                    ("from_table", Text, "Only relationships starting at this table", false),
                    ("to_table", Text, "Only relationships ending at this table", false),
                ],
            ),
            tool(
                "get_statistics",
                "Get column cardinality and storage sizes, optionally filtered by table and/or column",
                vec![
                    ("table_name", Text, "Only columns of this table", false),
                    ("column_name", Text, "Only the column with this name", false),
                ],
            ),
            tool(
                "get_table_contents",
                "Get the rows of a table one page at a time",
                vec![
                    ("table_name", Text, "Table to read", true),
                    ("page", Integer, "Page number, starting at 1 (default: 1)", false),
                    ("page_size", Integer, "Rows per page (default: server setting)", false),
                ],
            ),
            tool("get_model_summary", "Get a summary of the loaded model", vec![]),
            tool(
                "connect_service_principal",
                "Configure a service principal and acquire a Power BI access token. Call once before the service tools, or set PBI_TENANT_ID, PBI_CLIENT_ID and PBI_CLIENT_SECRET.",
                vec![
                    ("tenant_id", Text, "Azure AD tenant ID", true),
                    ("client_id", Text, "Application (client) ID", true),
                    ("client_secret", Text, "Client secret", true),
                ],
            ),
            tool("list_workspaces", "List the Power BI workspaces the service principal can access", vec![]),
            tool(
                "list_datasets",
                "List the datasets of a workspace",
                vec![("workspace_id", Text, "Workspace (group) ID", true)],
            ),
            tool(
                "get_model_definition",
                "Get the TMDL definition of a semantic model with pagination and filtering. Use either page or file_range, not both.",
                vec![
                    ("workspace_id", Text, "Workspace ID", true),
                    ("dataset_id", Text, "Dataset (semantic model) ID", true),
                    ("file_filter", Text, "Only files whose path contains this text, e.g. 'tables/'", false),
                    ("page", Integer, "Page number, starting at 1 (default: 1)", false),
                    ("page_size", Integer, "Files per page (default: 10)", false),
                    ("file_range", Text, "Inclusive 1-based file range, e.g. '1-10' or '11-20'", false),
                    ("metadata_only", Boolean, "List file names only, without content", false),
                    ("poll_interval_sec", Integer, "Seconds between status checks (default: Retry-After)", false),
                ],
            ),
            tool(
                "execute_dax_query",
                "Execute a DAX query against a dataset",
                vec![
                    ("workspace_id", Text, "Workspace ID", true),
                    ("dataset_id", Text, "Dataset ID", true),
                    ("query", Text, "DAX query, e.g. EVALUATE TOPN(10, 'Sales')", true),
                ],
            ),
            tool(
                "publish_pbix_to_powerbi",
                "Upload a .pbix file to a workspace (or My Workspace) and wait for the import to finish",
                vec![
                    ("file_path", Text, "Path to the .pbix file", true),
                    ("group_id", Text, "Workspace ID; empty, 'me' or 'myworkspace' for My Workspace", false),
                    ("dataset_display_name", Text, "Dataset name (default: file name)", false),
                    ("name_conflict", Text, "Abort, Overwrite or CreateOrOverwrite (default)", false),
                    ("poll", Boolean, "Wait for the import to finish (default: true)", false),
                    ("poll_interval_sec", Integer, "Seconds between status checks (default: 2)", false),
                    ("timeout_sec", Integer, "Overall timeout in seconds (default: 1800)", false),
                ],
            ),
        ]
    }

    /// Handle a tool call
    pub async fn call_tool(&self, name: &str, args: &Args, progress: &Progress) -> CallToolResult {
        if let Err(message) = self.policy.check(name) {
            return CallToolResult::error(message);
        }

        tracing::debug!("Calling tool {}", name);
        let result = match name {
            "load_pbix_file" => self.load_pbix_file(args).await,
            "get_tables" => self.get_tables().await,
            "get_metadata" => self.get_metadata().await,
            "get_power_query" => self.get_power_query().await,
            "get_m_parameters" => self.get_m_parameters().await,
            "get_model_size" => self.get_model_size().await,
            "get_dax_tables" => self.get_dax_tables().await,
            "get_dax_measures" => self.get_dax_measures(args).await,
            "get_dax_columns" => self.get_dax_columns(args).await,
            "get_schema" => self.get_schema(args).await,
            "get_relationships" => self.get_relationships(args).await,
            "get_statistics" => self.get_statistics(args).await,
            "get_table_contents" => self.get_table_contents(args).await,
            "get_model_summary" => self.get_model_summary().await,
            "connect_service_principal" => self.connect_service_principal(args).await,
            "list_workspaces" => self.list_workspaces().await,
            "list_datasets" => self.list_datasets(args).await,
            "get_model_definition" => self.get_model_definition(args).await,
            "execute_dax_query" => self.execute_dax_query(args).await,
            "publish_pbix_to_powerbi" => self.publish_pbix_to_powerbi(args, progress).await,
            _ => return CallToolResult::error(format!("Unknown tool: {}", name)),
        };

        match result {
            Ok(text) => CallToolResult::text(text),
            Err(e) => {
                tracing::warn!("Tool {} failed: {}", name, e);
                CallToolResult::error(e.to_string())
            }
        }
    }

    async fn require_model(&self) -> Result<LoadedModel, ToolError> {
        self.session.current_model().await.ok_or(ToolError::NoModel)
    }
}

fn tool(name: &str, description: &str, params: Vec<(&str, ParamType, &str, bool)>) -> Tool {
    Tool {
        name: name.to_string(),
        description: description.to_string(),
        input_schema: create_tool_schema(params),
    }
}

/// Pretty-printed JSON
pub(crate) fn pretty<T: Serialize + ?Sized>(value: &T) -> ToolResult {
    Ok(serde_json::to_string_pretty(value)?)
}

/// `table 'Sales' and name 'Total'` for the filters that were given
fn describe_filters(filters: &[(&str, &Option<String>)]) -> String {
    filters
        .iter()
        .filter_map(|(label, value)| value.as_ref().map(|v| format!("{} '{}'", label, v)))
        .collect::<Vec<_>>()
        .join(" and ")
}

fn filter_matches(filter: &Option<String>, value: &str) -> bool {
    filter.as_deref().map_or(true, |f| f == value)
}

/// Pretty JSON of `items`, or a note naming the filters that matched nothing
fn filtered<T: Serialize>(
    items: Vec<T>,
    what: &str,
    preposition: &str,
    filters: &[(&str, &Option<String>)],
) -> ToolResult {
    if items.is_empty() && filters.iter().any(|(_, v)| v.is_some()) {
        let sep = if preposition.is_empty() { "" } else { " " };
        return Ok(format!(
            "No {} found {}{}{}.",
            what,
            preposition,
            sep,
            describe_filters(filters)
        ));
    }
    pretty(&items)
}

// Local model tools
impl PbixMcpServer {
    async fn load_pbix_file(&self, args: &Args) -> ToolResult {
        let file_path = required_string(args, "file_path")?;
        let loaded = self.session.load_model(&file_path).await?;
        Ok(format!(
            "Successfully loaded '{}' ({} tables)",
            loaded.file_name(),
            loaded.model.tables().len()
        ))
    }

    async fn get_tables(&self) -> ToolResult {
        let loaded = self.require_model().await?;
        pretty(&loaded.model.tables())
    }

    async fn get_metadata(&self) -> ToolResult {
        let loaded = self.require_model().await?;
        pretty(&loaded.model.metadata())
    }

    async fn get_power_query(&self) -> ToolResult {
        let loaded = self.require_model().await?;
        pretty(&loaded.model.power_query())
    }

    async fn get_m_parameters(&self) -> ToolResult {
        let loaded = self.require_model().await?;
        pretty(&loaded.model.m_parameters())
    }

    async fn get_model_size(&self) -> ToolResult {
        let loaded = self.require_model().await?;
        let size = loaded.model.size();
        Ok(format!(
            "Model size: {} bytes ({:.2} MB)",
            size,
            size as f64 / BYTES_PER_MB
        ))
    }

    async fn get_dax_tables(&self) -> ToolResult {
        let loaded = self.require_model().await?;
        pretty(&loaded.model.dax_tables())
    }

    async fn get_dax_measures(&self, args: &Args) -> ToolResult {
        let loaded = self.require_model().await?;
        let table = string_arg(args, "table_name");
        let name = string_arg(args, "measure_name");

        let measures: Vec<_> = loaded
            .model
            .dax_measures()
            .into_iter()
            .filter(|m| filter_matches(&table, &m.table_name) && filter_matches(&name, &m.name))
            .collect();
        filtered(measures, "measures", "with", &[("table", &table), ("name", &name)])
    }

    async fn get_dax_columns(&self, args: &Args) -> ToolResult {
        let loaded = self.require_model().await?;
        let table = string_arg(args, "table_name");
        let column = string_arg(args, "column_name");

        let columns: Vec<_> = loaded
            .model
            .dax_columns()
            .into_iter()
            .filter(|c| filter_matches(&table, &c.table_name) && filter_matches(&column, &c.column_name))
            .collect();
        filtered(
            columns,
            "calculated columns",
            "with",
            &[("table", &table), ("column", &column)],
        )
    }

    async fn get_schema(&self, args: &Args) -> ToolResult {
        let loaded = self.require_model().await?;
        let table = string_arg(args, "table_name");
        let column = string_arg(args, "column_name");

        let schema: Vec<_> = loaded
            .model
            .schema()
            .into_iter()
            .filter(|c| filter_matches(&table, &c.table_name) && filter_matches(&column, &c.column_name))
            .collect();
        filtered(
            schema,
            "schema entries",
            "with",
            &[("table", &table), ("column", &column)],
        )
    }

    async fn get_relationships(&self, args: &Args) -> ToolResult {
        let loaded = self.require_model().await?;
        let from = string_arg(args, "from_table");
        let to = string_arg(args, "to_table");

        let relationships: Vec<_> = loaded
            .model
            .relationships()
            .into_iter()
            .filter(|r| filter_matches(&from, &r.from_table_name) && filter_matches(&to, &r.to_table_name))
            .collect();
        filtered(
            relationships,
            "relationships",
            "",
            &[("from table", &from), ("to table", &to)],
        )
    }

    async fn get_statistics(&self, args: &Args) -> ToolResult {
        let loaded = self.require_model().await?;
        let table = string_arg(args, "table_name");
        let column = string_arg(args, "column_name");

        let statistics: Vec<_> = loaded
            .model
            .statistics()?
            .into_iter()
            .filter(|s| filter_matches(&table, &s.table_name) && filter_matches(&column, &s.column_name))
            .collect();
        filtered(
            statistics,
            "statistics",
            "with",
            &[("table", &table), ("column", &column)],
        )
    }

    async fn get_table_contents(&self, args: &Args) -> ToolResult {
        let table = required_string(args, "table_name")?;
        let page = int_arg(args, "page")?.unwrap_or(1);
        let page_size = int_arg(args, "page_size")?.unwrap_or(self.config.page_size as i64);
        if page_size > self.config.max_page_size as i64 {
            return Err(ToolError::Invalid(format!(
                "page_size must not exceed {}",
                self.config.max_page_size
            )));
        }
        let request = PageRequest::page(page, page_size)?;

        let loaded = self.require_model().await?;
        let data = loaded.model.table_rows(&table)?;

        // Page 1 of an empty table is an empty page; any later page is out of range
        let (total_pages, rows) = if data.is_empty() && page == 1 {
            (0, Vec::new())
        } else {
            let window = request.window(data.len())?;
            (window.total_pages, data.records(window.slice(&data.rows)))
        };

        pretty(&json!({
            "pagination": {
                "total_rows": data.len(),
                "total_pages": total_pages,
                "current_page": page,
                "page_size": page_size,
                "showing_rows": rows.len(),
            },
            "data": rows,
        }))
    }

    async fn get_model_summary(&self) -> ToolResult {
        let loaded = self.require_model().await?;
        let model = &loaded.model;
        let tables = model.tables();
        let size = model.size();

        pretty(&json!({
            "file_path": loaded.path.display().to_string(),
            "file_name": loaded.file_name(),
            "size_bytes": size,
            "size_mb": (size as f64 / BYTES_PER_MB * 100.0).round() / 100.0,
            "tables_count": tables.len(),
            "tables": tables,
            "measures_count": model.dax_measures().len(),
            "relationships_count": model.relationships().len(),
        }))
    }
}
