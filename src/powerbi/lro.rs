//! Long-running operations
//!
//! A call that answers `202 Accepted` hands back a `Location` to poll. The
//! poller loops with a constant interval until the status is terminal; the
//! overall deadline is enforced by [`PowerBiClient::run_operation`].

use super::client::{into_json, PowerBiClient, PowerBiError};
use super::transport::{HttpRequest, HttpResponse};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout_at, Instant};

/// Poll interval used when `Retry-After` is absent
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 30;

/// Where and how often to poll a pending operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationHandle {
    pub status_url: String,
    pub retry_after: Duration,
    pub operation_id: String,
}

impl OperationHandle {
    /// Build a handle from a `202 Accepted` response
    pub fn from_response(response: &HttpResponse) -> Result<Self, PowerBiError> {
        let status_url = response
            .header("Location")
            .filter(|v| !v.trim().is_empty())
            .ok_or(PowerBiError::MissingLocation)?
            .trim()
            .to_string();

        let retry_after = response
            .header("Retry-After")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_RETRY_AFTER_SECS);

        let operation_id = response
            .header("x-ms-operation-id")
            .map(str::to_string)
            .unwrap_or_else(|| {
                status_url
                    .trim_end_matches('/')
                    .rsplit('/')
                    .next()
                    .unwrap_or_default()
                    .to_string()
            });

        Ok(Self {
            status_url,
            retry_after: Duration::from_secs(retry_after),
            operation_id,
        })
    }
}

/// Result of starting a call that may run long
#[derive(Debug, Clone, PartialEq)]
pub enum OperationStart {
    Completed(Value),
    Accepted(OperationHandle),
}

/// One observation of an operation's state
#[derive(Debug, Clone, PartialEq)]
pub enum OperationStatus {
    Pending,
    Succeeded(Value),
    Failed(Value),
}

impl OperationStatus {
    /// Classify a status payload.
    ///
    /// Reads `status`, `operationState` or `importState`, case-insensitively.
    /// Unknown and empty values count as still running.
    pub fn from_payload(payload: Value) -> Self {
        let status = ["status", "operationState", "importState"]
            .iter()
            .filter_map(|key| payload.get(*key).and_then(Value::as_str))
            .find(|s| !s.trim().is_empty())
            .map(|s| s.trim().to_ascii_lowercase())
            .unwrap_or_default();

        match status.as_str() {
            "succeeded" => OperationStatus::Succeeded(payload),
            "failed" | "error" => {
                let embedded = ["error", "failureReason"]
                    .iter()
                    .filter_map(|key| payload.get(*key))
                    .find(|v| !v.is_null())
                    .cloned();
                OperationStatus::Failed(embedded.unwrap_or(payload))
            }
            _ => OperationStatus::Pending,
        }
    }
}

impl PowerBiClient {
    /// Issue a request that may answer `202 Accepted`
    pub async fn start_operation(
        &self,
        request: &HttpRequest,
    ) -> Result<OperationStart, PowerBiError> {
        let response = self.send(request).await?;
        if response.status == 202 {
            let handle = OperationHandle::from_response(&response)?;
            tracing::info!(
                "Operation {} accepted, polling {} every {}s",
                handle.operation_id,
                handle.status_url,
                handle.retry_after.as_secs()
            );
            return Ok(OperationStart::Accepted(handle));
        }
        Ok(OperationStart::Completed(into_json(response)?))
    }

    /// Poll `status_url` until it reports a terminal state.
    ///
    /// Returns the final status payload on success. There is no iteration
    /// limit here; wrap the future in a deadline.
    pub async fn poll_status(
        &self,
        status_url: &str,
        interval: Duration,
    ) -> Result<Value, PowerBiError> {
        let request = HttpRequest::get(status_url);
        let mut attempt = 0u32;

        loop {
            sleep(interval).await;
            attempt += 1;

            let payload = match self.send(&request).await {
                Ok(response) => into_json(response),
                Err(e) => Err(e),
            }
            .map_err(|e| PowerBiError::StatusCheck(Box::new(e)))?;

            match OperationStatus::from_payload(payload) {
                OperationStatus::Pending => {
                    tracing::debug!("Poll {} of {}: still running", attempt, status_url);
                }
                OperationStatus::Succeeded(payload) => {
                    tracing::info!("Operation at {} succeeded after {} polls", status_url, attempt);
                    return Ok(payload);
                }
                OperationStatus::Failed(detail) => {
                    tracing::warn!("Operation at {} failed: {}", status_url, detail);
                    return Err(PowerBiError::OperationFailed(detail));
                }
            }
        }
    }

    /// Poll to completion, then fetch `{status_url}/result`
    pub async fn wait_for_operation(
        &self,
        status_url: &str,
        interval: Duration,
    ) -> Result<Value, PowerBiError> {
        self.poll_status(status_url, interval).await?;

        let result_url = format!("{}/result", status_url.trim_end_matches('/'));
        let response = self
            .send(&HttpRequest::get(&result_url))
            .await
            .map_err(|e| PowerBiError::ResultFetch(Box::new(e)))?;
        into_json(response).map_err(|e| PowerBiError::ResultFetch(Box::new(e)))
    }

    /// Run a request to completion, following a `202` through polling.
    ///
    /// `timeout` counts from the first request. On expiry the remote
    /// operation is left running and the error names its id.
    pub async fn run_operation(
        &self,
        request: &HttpRequest,
        interval: Option<Duration>,
        timeout: Duration,
    ) -> Result<Value, PowerBiError> {
        let deadline = deadline_after(timeout);

        let handle = match self.start_operation(request).await? {
            OperationStart::Completed(value) => return Ok(value),
            OperationStart::Accepted(handle) => handle,
        };

        let interval = interval.unwrap_or(handle.retry_after);
        match run_until(deadline, self.wait_for_operation(&handle.status_url, interval)).await {
            Some(result) => result,
            None => Err(PowerBiError::Timeout {
                operation_id: format!("operation {}", handle.operation_id),
                seconds: timeout.as_secs(),
            }),
        }
    }
}

/// Deadline `timeout` from now; `None` when it lies beyond what `Instant` can represent
pub fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

/// Run `future` until `deadline`, or to completion when there is none.
///
/// `None` means the deadline passed first.
pub async fn run_until<F: Future>(deadline: Option<Instant>, future: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => timeout_at(deadline, future).await.ok(),
        None => Some(future.await),
    }
}
