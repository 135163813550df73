//! Semantic model definitions (TMDL)
//!
//! `getDefinition` is a Fabric long-running operation whose result is a list
//! of base64-encoded parts. Only `.tmdl` parts are kept, optionally narrowed
//! by a substring filter, and then windowed by page or range.

use super::client::{PowerBiClient, PowerBiError};
use super::transport::HttpRequest;
use crate::pagination::{suggested_ranges, PageRequest, PageWindow, SUGGESTED_RANGE_WIDTH};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use serde_json::Value;
use std::fmt::Write;
use std::time::Duration;

pub const TMDL_SUFFIX: &str = ".tmdl";

const RULE: &str = "========================================";
const THIN_RULE: &str = "────────────────────────────────────────";

/// One file of a model definition
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DefinitionPart {
    pub path: String,
    #[serde(default)]
    pub payload: String,
    #[serde(default, rename = "payloadType")]
    pub payload_type: Option<String>,
}

impl DefinitionPart {
    /// Decode the base64 payload as UTF-8 text
    pub fn decode(&self) -> Result<String, String> {
        let bytes = STANDARD
            .decode(self.payload.trim())
            .map_err(|e| format!("invalid base64: {}", e))?;
        String::from_utf8(bytes).map_err(|e| format!("invalid UTF-8: {}", e))
    }
}

/// How to present a definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionView {
    pub request: PageRequest,
    pub file_filter: Option<String>,
    pub metadata_only: bool,
}

/// `.tmdl` parts of a `getDefinition` result, narrowed by `file_filter`
pub fn tmdl_parts(result: &Value, file_filter: Option<&str>) -> Vec<DefinitionPart> {
    let parts: Vec<DefinitionPart> = result
        .pointer("/definition/parts")
        .cloned()
        .and_then(|parts| serde_json::from_value(parts).ok())
        .unwrap_or_default();

    let filter = file_filter
        .map(|f| f.trim().to_lowercase())
        .filter(|f| !f.is_empty());

    parts
        .into_iter()
        .filter(|part| part.path.ends_with(TMDL_SUFFIX))
        .filter(|part| match &filter {
            Some(filter) => part.path.to_lowercase().contains(filter.as_str()),
            None => true,
        })
        .collect()
}

impl PowerBiClient {
    /// Run `getDefinition` for a semantic model and return the raw result
    pub async fn get_model_definition(
        &self,
        workspace_id: &str,
        dataset_id: &str,
        interval: Option<Duration>,
        timeout: Duration,
    ) -> Result<Value, PowerBiError> {
        let url = self.fabric_url(&format!(
            "workspaces/{}/semanticModels/{}/getDefinition",
            workspace_id, dataset_id
        ));
        self.run_operation(&HttpRequest::post(url), interval, timeout)
            .await
    }
}

/// Render the selected window of a definition as text
pub fn render_definition(parts: &[DefinitionPart], window: &PageWindow, view: &DefinitionView) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "Dataset Model Definition (TMDL Format)");
    let _ = writeln!(out, "{}", RULE);
    match view.request {
        PageRequest::Range { start, end } => {
            let _ = writeln!(out, "File range: {}-{} | Total files: {}", start, end, window.total);
        }
        PageRequest::Page { page, page_size } => {
            let _ = writeln!(
                out,
                "Page {} of {} | Total files: {}",
                page, window.total_pages, window.total
            );
            let _ = writeln!(out, "Page size: {}", page_size);
        }
    }
    let _ = writeln!(out, "Filter: {}", view.file_filter.as_deref().unwrap_or("None"));
    let _ = writeln!(out, "{}", RULE);

    if view.metadata_only {
        let _ = writeln!(out, "\nAvailable files:");
        for (i, part) in parts.iter().enumerate() {
            let marker = if window.contains(i) { "→" } else { " " };
            let _ = writeln!(out, "{} {}. {}", marker, i + 1, part.path);
        }
    } else {
        for part in window.slice(parts) {
            match part.decode() {
                Ok(content) => {
                    let _ = write!(
                        out,
                        "\n{}\nFile: {}\n{}\n{}\n",
                        THIN_RULE, part.path, THIN_RULE, content
                    );
                }
                Err(e) => {
                    let _ = writeln!(out, "\nError decoding {}: {}", part.path, e);
                }
            }
        }
    }

    let _ = writeln!(out, "\n{}\nNavigation:", THIN_RULE);
    if let Some(next) = window.next() {
        let _ = writeln!(out, "→ Next: use {}", next);
    }
    if let Some(previous) = window.previous() {
        let _ = writeln!(out, "← Previous: use {}", previous);
    }
    if view.request.is_range() {
        let _ = writeln!(out, "\nSuggested ranges for complete retrieval:");
        for range in suggested_ranges(window.total, SUGGESTED_RANGE_WIDTH) {
            let _ = writeln!(out, "  file_range='{}'", range);
        }
    } else if window.total_pages > 1 {
        let _ = writeln!(
            out,
            "\nTo jump to a specific page, use page=N (1 to {})",
            window.total_pages
        );
    }
    let _ = writeln!(out, "\nTo see only the file list, use metadata_only=true");
    let _ = writeln!(out, "To filter files, use file_filter='search_term'");

    out
}
