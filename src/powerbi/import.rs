//! PBIX publish
//!
//! Uploads a file to the imports endpoint and optionally follows the import
//! until the service reports it finished.

use super::client::{truncate_chars, PowerBiClient, PowerBiError, MAX_ERROR_BODY_CHARS};
use super::datasets::{collection_items, NamedItem};
use super::lro::{deadline_after, run_until};
use super::transport::HttpRequest;
use crate::progress::{report_until_cancelled, Progress};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// What the service does when a dataset with the same name exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NameConflict {
    Abort,
    Overwrite,
    #[default]
    CreateOrOverwrite,
}

impl NameConflict {
    /// Parse leniently; anything unrecognised becomes `CreateOrOverwrite`
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "abort" => NameConflict::Abort,
            "overwrite" => NameConflict::Overwrite,
            "createoroverwrite" => NameConflict::CreateOrOverwrite,
            other => {
                if !other.is_empty() {
                    tracing::warn!(
                        "Unknown name_conflict '{}', using CreateOrOverwrite",
                        value
                    );
                }
                NameConflict::CreateOrOverwrite
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NameConflict::Abort => "Abort",
            NameConflict::Overwrite => "Overwrite",
            NameConflict::CreateOrOverwrite => "CreateOrOverwrite",
        }
    }
}

/// `me`, `myworkspace` and empty all mean My Workspace
pub fn normalize_group(group_id: Option<&str>) -> Option<String> {
    let group = group_id.map(str::trim).unwrap_or_default();
    match group.to_ascii_lowercase().as_str() {
        "" | "me" | "myworkspace" => None,
        _ => Some(group.to_string()),
    }
}

#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub file_path: PathBuf,
    pub group_id: Option<String>,
    pub dataset_display_name: Option<String>,
    pub name_conflict: NameConflict,
    pub poll: bool,
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl ImportRequest {
    /// Display name sent to the service; defaults to the file stem
    pub fn display_name(&self) -> String {
        self.dataset_display_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| {
                self.file_path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "dataset".to_string())
            })
    }

    fn file_name(&self) -> String {
        self.file_path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.pbix".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    /// Upload accepted without waiting for the import
    Submitted { import_id: Option<String> },
    Succeeded {
        import_id: String,
        datasets: Vec<NamedItem>,
        reports: Vec<NamedItem>,
    },
}

impl ImportOutcome {
    /// Human-readable summary for the tool result
    pub fn summary(&self, workspace: &str) -> String {
        match self {
            ImportOutcome::Submitted { import_id } => format!(
                "Upload submitted to {}. Import ID: {}",
                workspace,
                import_id.as_deref().unwrap_or("unknown")
            ),
            ImportOutcome::Succeeded {
                import_id,
                datasets,
                reports,
            } => {
                let mut lines = vec![format!(
                    "Import {} succeeded in {}.",
                    import_id, workspace
                )];
                if !datasets.is_empty() {
                    lines.push("Datasets:".to_string());
                    lines.extend(datasets.iter().map(|d| format!("  - {}", d)));
                }
                if !reports.is_empty() {
                    lines.push("Reports:".to_string());
                    lines.extend(reports.iter().map(|r| format!("  - {}", r)));
                }
                lines.join("\n")
            }
        }
    }
}

/// Error text the imports endpoint returned
fn rejection_message(body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let message = parsed.as_ref().and_then(|v| {
        v.pointer("/error/message")
            .or_else(|| v.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
    });
    message.unwrap_or_else(|| truncate_chars(body, MAX_ERROR_BODY_CHARS))
}

fn import_id(payload: &Value) -> Option<String> {
    ["id", "importId", "Id"]
        .iter()
        .filter_map(|key| payload.get(*key).and_then(Value::as_str))
        .find(|id| !id.trim().is_empty())
        .map(str::to_string)
}

fn listed(payload: &Value, key: &str) -> Vec<NamedItem> {
    let wrapped = serde_json::json!({ "value": payload.get(key).cloned().unwrap_or(Value::Null) });
    collection_items(&wrapped)
}

impl PowerBiClient {
    fn imports_url(&self, group: Option<&str>) -> String {
        match group {
            Some(group) => self.api_url(&format!("groups/{}/imports", group)),
            None => self.api_url("imports"),
        }
    }

    /// Upload a PBIX and follow the import.
    ///
    /// `request.timeout` covers upload and polling together. A background
    /// task nudges `progress` forward while the call is in flight.
    pub async fn import_pbix(
        &self,
        request: &ImportRequest,
        progress: &Progress,
    ) -> Result<ImportOutcome, PowerBiError> {
        let deadline = deadline_after(request.timeout);
        let content = tokio::fs::read(&request.file_path).await.map_err(|e| {
            PowerBiError::InvalidInput(format!(
                "Failed to read '{}': {}",
                request.file_path.display(),
                e
            ))
        })?;

        let cancel = CancellationToken::new();
        let reporter = tokio::spawn(report_until_cancelled(
            progress.clone(),
            cancel.clone(),
            Duration::from_secs(1),
        ));

        let result = self.upload_and_follow(request, content, deadline).await;

        cancel.cancel();
        let _ = reporter.await;
        if result.is_ok() {
            progress.report(100, 100);
        }
        result
    }

    async fn upload_and_follow(
        &self,
        request: &ImportRequest,
        content: Vec<u8>,
        deadline: Option<Instant>,
    ) -> Result<ImportOutcome, PowerBiError> {
        let timed_out = |operation_id: String| PowerBiError::Timeout {
            operation_id,
            seconds: request.timeout.as_secs(),
        };

        let group = normalize_group(request.group_id.as_deref());
        let display_name = request.display_name();
        let upload = HttpRequest::post(self.imports_url(group.as_deref()))
            .query("datasetDisplayName", &display_name)
            .query("nameConflict", request.name_conflict.as_str())
            .file("file", &request.file_name(), content)
            .timeout(request.timeout);

        tracing::info!(
            "Uploading {} as '{}' ({})",
            request.file_path.display(),
            display_name,
            request.name_conflict.as_str()
        );

        let response = run_until(deadline, self.send(&upload))
            .await
            .ok_or_else(|| timed_out("import upload".to_string()))??;
        if !matches!(response.status, 200 | 201 | 202) {
            return Err(PowerBiError::UploadRejected {
                status: response.status,
                message: rejection_message(&response.body),
            });
        }

        let payload: Value = serde_json::from_str(&response.body).unwrap_or(Value::Null);
        let import_id = match import_id(&payload) {
            Some(id) if request.poll => id,
            import_id => return Ok(ImportOutcome::Submitted { import_id }),
        };
        tracing::info!("Import {} accepted, polling", import_id);

        let status_url = match &group {
            Some(group) => self.api_url(&format!("groups/{}/imports/{}", group, import_id)),
            None => self.api_url(&format!("imports/{}", import_id)),
        };
        let final_state = run_until(deadline, self.poll_status(&status_url, request.poll_interval))
            .await
            .ok_or_else(|| timed_out(format!("import {}", import_id)))??;

        Ok(ImportOutcome::Succeeded {
            datasets: listed(&final_state, "datasets"),
            reports: listed(&final_state, "reports"),
            import_id,
        })
    }
}
