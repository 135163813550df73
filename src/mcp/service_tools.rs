//! Power BI service tools

use super::args::{bool_arg, int_arg, required_string, seconds_arg, string_arg, Args};
use super::server::{pretty, PbixMcpServer, ToolError, ToolResult};
use crate::auth::Credentials;
use crate::model::resolve_file_path;
use crate::pagination::PageRequest;
use crate::powerbi::definition::{render_definition, tmdl_parts, DefinitionView};
use crate::powerbi::import::{normalize_group, ImportRequest, NameConflict};
use crate::powerbi::NamedItem;
use crate::progress::Progress;
use std::time::Duration;

/// Files per page of a model definition
pub const DEFAULT_DEFINITION_PAGE_SIZE: i64 = 10;

/// Seconds between import status checks
pub const DEFAULT_IMPORT_POLL_SECS: u64 = 2;

fn list_items(kind: &str, empty: &str, items: &[NamedItem]) -> String {
    if items.is_empty() {
        return empty.to_string();
    }
    let mut out = vec![format!("Found {} {}:\n", items.len(), kind)];
    for item in items {
        let name = if item.name.is_empty() { "<no name>" } else { &item.name };
        out.push(format!("• {} (ID: {})", name, item.id));
    }
    out.join("\n")
}

impl PbixMcpServer {
    pub(crate) async fn connect_service_principal(&self, args: &Args) -> ToolResult {
        let credentials = Credentials::new(
            &required_string(args, "tenant_id")?,
            &required_string(args, "client_id")?,
            &required_string(args, "client_secret")?,
        );

        self.session
            .auth()
            .connect(&credentials)
            .await
            .map_err(ToolError::Connect)?;
        Ok("Connected: acquired Power BI access token via service principal.".to_string())
    }

    pub(crate) async fn list_workspaces(&self) -> ToolResult {
        let workspaces = self.session.powerbi().list_workspaces().await?;
        Ok(list_items("workspaces", "No workspaces found", &workspaces))
    }

    pub(crate) async fn list_datasets(&self, args: &Args) -> ToolResult {
        let workspace_id = required_string(args, "workspace_id")?;
        let datasets = self.session.powerbi().list_datasets(&workspace_id).await?;
        Ok(list_items(
            "datasets",
            "No datasets found in this workspace",
            &datasets,
        ))
    }

    pub(crate) async fn get_model_definition(&self, args: &Args) -> ToolResult {
        let workspace_id = required_string(args, "workspace_id")?;
        let dataset_id = required_string(args, "dataset_id")?;
        let file_filter = string_arg(args, "file_filter");
        let file_range = string_arg(args, "file_range");
        let metadata_only = bool_arg(args, "metadata_only")?.unwrap_or(false);
        let interval = seconds_arg(args, "poll_interval_sec")?.map(Duration::from_secs);
        let page_size = int_arg(args, "page_size")?.unwrap_or(DEFAULT_DEFINITION_PAGE_SIZE);

        // Argument errors surface before anything is sent
        let request = PageRequest::from_args(int_arg(args, "page")?, page_size, file_range.as_deref())?;

        let result = self
            .session
            .powerbi()
            .get_model_definition(
                &workspace_id,
                &dataset_id,
                interval,
                self.config.operation_timeout,
            )
            .await?;

        let parts = tmdl_parts(&result, file_filter.as_deref());
        if parts.is_empty() {
            return Ok(match &file_filter {
                Some(filter) => format!("No TMDL files match the filter '{}'", filter),
                None => "No model definition found".to_string(),
            });
        }

        let window = request.window(parts.len())?;
        let view = DefinitionView {
            request,
            file_filter,
            metadata_only,
        };
        Ok(render_definition(&parts, &window, &view))
    }

    pub(crate) async fn execute_dax_query(&self, args: &Args) -> ToolResult {
        let workspace_id = required_string(args, "workspace_id")?;
        let dataset_id = required_string(args, "dataset_id")?;
        let query = required_string(args, "query")?;

        let tables = self
            .session
            .powerbi()
            .execute_dax_query(&workspace_id, &dataset_id, &query)
            .await?;
        match tables {
            Some(tables) => pretty(&tables),
            None => Ok("No data returned".to_string()),
        }
    }

    pub(crate) async fn publish_pbix_to_powerbi(&self, args: &Args, progress: &Progress) -> ToolResult {
        let file_path = resolve_file_path(&required_string(args, "file_path")?, &["pbix"])?;
        let group_id = string_arg(args, "group_id");
        let request = ImportRequest {
            file_path,
            dataset_display_name: string_arg(args, "dataset_display_name"),
            name_conflict: string_arg(args, "name_conflict")
                .map(|v| NameConflict::parse(&v))
                .unwrap_or_default(),
            poll: bool_arg(args, "poll")?.unwrap_or(true),
            poll_interval: Duration::from_secs(
                seconds_arg(args, "poll_interval_sec")?.unwrap_or(DEFAULT_IMPORT_POLL_SECS),
            ),
            timeout: seconds_arg(args, "timeout_sec")?
                .map(Duration::from_secs)
                .unwrap_or(self.config.operation_timeout),
            group_id,
        };

        let workspace = match normalize_group(request.group_id.as_deref()) {
            Some(group) => format!("workspace {}", group),
            None => "My Workspace".to_string(),
        };

        progress.message(0, 100, &format!("Uploading {} to {}", request.display_name(), workspace));
        let outcome = self.session.powerbi().import_pbix(&request, progress).await?;
        Ok(outcome.summary(&workspace))
    }
}
