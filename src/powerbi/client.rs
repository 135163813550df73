//! Power BI client module
//!
//! Authorized HTTP client for the Power BI and Fabric REST APIs.
//! Every request carries a bearer token; a 401/403 triggers one token refresh
//! and one resend, and whatever comes back from that resend is final.

use super::transport::{HttpRequest, HttpResponse, HttpTransport, Method, TransportError};
use crate::auth::{AuthError, TokenProvider};
use crate::config::ServiceEndpoints;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Error bodies are cut to this many characters
pub const MAX_ERROR_BODY_CHARS: usize = 500;

/// Power BI client errors
#[derive(Error, Debug)]
pub enum PowerBiError {
    #[error("Auth error: {0}")]
    AuthError(#[from] AuthError),

    #[error("Auth refresh failed: {0}")]
    RefreshFailed(#[source] AuthError),

    #[error("Request failed: {0}")]
    Transport(#[from] TransportError),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Rate limited (429): retry after {0} seconds")]
    RateLimited(u64),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("No Location header in 202 response")]
    MissingLocation,

    #[error("Failed to check status: {0}")]
    StatusCheck(#[source] Box<PowerBiError>),

    #[error("Failed to get result: {0}")]
    ResultFetch(#[source] Box<PowerBiError>),

    #[error("Operation failed: {0}")]
    OperationFailed(Value),

    #[error("Upload failed ({status}). Details: {message}")]
    UploadRejected { status: u16, message: String },

    #[error(
        "Timed out after {seconds}s waiting for {operation_id}; it keeps running on the service, \
         check its status later"
    )]
    Timeout { operation_id: String, seconds: u64 },

    #[error("{0}")]
    InvalidInput(String),
}

/// Authorized client for the Power BI / Fabric REST APIs
pub struct PowerBiClient {
    auth: Arc<TokenProvider>,
    transport: Arc<dyn HttpTransport>,
    endpoints: ServiceEndpoints,
}

impl PowerBiClient {
    pub fn new(
        auth: Arc<TokenProvider>,
        transport: Arc<dyn HttpTransport>,
        endpoints: ServiceEndpoints,
    ) -> Self {
        Self {
            auth,
            transport,
            endpoints,
        }
    }

    pub fn auth(&self) -> &Arc<TokenProvider> {
        &self.auth
    }

    /// URL under the Power BI REST base
    pub fn api_url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoints.api_base, path.trim_start_matches('/'))
    }

    /// URL under the Fabric REST base
    pub fn fabric_url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoints.fabric_base, path.trim_start_matches('/'))
    }

    /// Send with a bearer token, refreshing and resending once on 401/403
    pub async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, PowerBiError> {
        let token = self.auth.ensure_token().await?;
        let response = self.transport.send(request, &token).await?;

        if response.status != 401 && response.status != 403 {
            return Ok(response);
        }

        tracing::warn!(
            "{} {} returned {}, refreshing token and retrying once",
            request.method,
            request.url,
            response.status
        );

        self.auth.invalidate().await;
        let token = self
            .auth
            .ensure_token()
            .await
            .map_err(PowerBiError::RefreshFailed)?;

        Ok(self.transport.send(request, &token).await?)
    }

    /// Send and parse the JSON body; empty content yields `{}`
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<Value>,
    ) -> Result<Value, PowerBiError> {
        let mut request = HttpRequest::new(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = self.send(&request).await?;
        into_json(response)
    }

    pub async fn get_json(&self, url: &str) -> Result<Value, PowerBiError> {
        self.request(Method::Get, url, None).await
    }

    pub async fn post_json(&self, url: &str, body: Value) -> Result<Value, PowerBiError> {
        self.request(Method::Post, url, Some(body)).await
    }
}

/// Convert a response into JSON or a structured error
pub fn into_json(response: HttpResponse) -> Result<Value, PowerBiError> {
    if response.is_success() {
        if response.body.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        return serde_json::from_str(&response.body)
            .map_err(|e| PowerBiError::ParseError(format!("Failed to parse response: {}", e)));
    }

    if response.status == 429 {
        let retry_after = response
            .header("Retry-After")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(super::lro::DEFAULT_RETRY_AFTER_SECS);
        return Err(PowerBiError::RateLimited(retry_after));
    }

    Err(PowerBiError::Http {
        status: response.status,
        body: truncate_chars(&response.body, MAX_ERROR_BODY_CHARS),
    })
}

/// Truncate to at most `max` characters, never splitting a character
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
