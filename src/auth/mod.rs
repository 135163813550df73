//! Azure AD Authentication module
//!
//! Implements the OAuth2 client credentials flow for a Power BI service
//! principal. The [`TokenProvider`] owns the session's credential context and
//! decides when a cached token can be reused.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::RwLock;

/// Tokens closer than this to expiry are refreshed
pub const TOKEN_SAFETY_MARGIN_SECS: u64 = 60;

/// Lifetime assumed when the provider omits `expires_in`
pub const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 50 * 60;

pub const ENV_TENANT_ID: &str = "PBI_TENANT_ID";
pub const ENV_CLIENT_ID: &str = "PBI_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "PBI_CLIENT_SECRET";

/// Authentication errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error(
        "Service principal not configured. Call connect_service_principal(tenant_id, client_id, client_secret) \
         or set PBI_TENANT_ID, PBI_CLIENT_ID and PBI_CLIENT_SECRET before starting the server."
    )]
    NotConfigured,

    #[error("{0}")]
    TokenRequestFailed(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Token parse error: {0}")]
    ParseError(String),

    #[error("Missing credentials: {0}")]
    MissingCredentials(String),
}

/// Service principal identity
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Create credentials, trimming surrounding whitespace
    pub fn new(tenant_id: &str, client_id: &str, client_secret: &str) -> Self {
        Self {
            tenant_id: tenant_id.trim().to_string(),
            client_id: client_id.trim().to_string(),
            client_secret: client_secret.trim().to_string(),
        }
    }

    /// Load credentials from `PBI_TENANT_ID`, `PBI_CLIENT_ID` and `PBI_CLIENT_SECRET`.
    ///
    /// Returns `Ok(None)` when none of the variables are set, and an error when
    /// only some of them are.
    pub fn from_env() -> Result<Option<Self>, AuthError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Credentials from the `[auth]` config section, with the same rules as [`Self::from_env`]
    pub fn from_section(
        tenant_id: Option<&str>,
        client_id: Option<&str>,
        client_secret: Option<&str>,
    ) -> Result<Option<Self>, AuthError> {
        Self::from_lookup(|key| {
            match key {
                ENV_TENANT_ID => tenant_id,
                ENV_CLIENT_ID => client_id,
                _ => client_secret,
            }
            .map(str::to_string)
        })
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<Self>, AuthError> {
        let values: Vec<(&str, Option<String>)> = [ENV_TENANT_ID, ENV_CLIENT_ID, ENV_CLIENT_SECRET]
            .into_iter()
            .map(|key| (key, lookup(key).filter(|v| !v.trim().is_empty())))
            .collect();

        let missing: Vec<&str> = values
            .iter()
            .filter(|(_, value)| value.is_none())
            .map(|(key, _)| *key)
            .collect();

        match missing.len() {
            0 => Ok(Some(Self::new(
                values[0].1.as_deref().unwrap_or_default(),
                values[1].1.as_deref().unwrap_or_default(),
                values[2].1.as_deref().unwrap_or_default(),
            ))),
            3 => Ok(None),
            _ => Err(AuthError::MissingCredentials(missing.join(", "))),
        }
    }
}

/// Confidential client application bound to a tenant authority
#[derive(Clone, PartialEq, Eq)]
pub struct ClientApplication {
    pub authority: String,
    pub client_id: String,
    client_secret: String,
}

impl std::fmt::Debug for ClientApplication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientApplication")
            .field("authority", &self.authority)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl ClientApplication {
    pub fn new(authority_host: &str, credentials: &Credentials) -> Self {
        Self {
            authority: format!(
                "{}/{}",
                authority_host.trim_end_matches('/'),
                credentials.tenant_id
            ),
            client_id: credentials.client_id.clone(),
            client_secret: credentials.client_secret.clone(),
        }
    }

    /// Token endpoint URL for this authority
    pub fn token_endpoint(&self) -> String {
        format!("{}/oauth2/v2.0/token", self.authority)
    }

    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }
}

/// Token response from Azure AD
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Error body from Azure AD
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Identity provider capable of the client credentials grant
#[async_trait]
pub trait IdentityClient: Send + Sync {
    async fn acquire_token_for_client(
        &self,
        app: &ClientApplication,
        scope: &str,
    ) -> Result<TokenResponse, AuthError>;
}

/// Azure AD (Microsoft identity platform v2.0) token client
#[derive(Debug, Clone)]
pub struct AzureAdIdentity {
    http_client: Client,
}

impl AzureAdIdentity {
    pub fn new(timeout: Duration) -> Result<Self, AuthError> {
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self { http_client })
    }
}

#[async_trait]
impl IdentityClient for AzureAdIdentity {
    async fn acquire_token_for_client(
        &self,
        app: &ClientApplication,
        scope: &str,
    ) -> Result<TokenResponse, AuthError> {
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", app.client_id.as_str()),
            ("client_secret", app.client_secret()),
            ("scope", scope),
        ];

        let response = self
            .http_client
            .post(app.token_endpoint())
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!("Token request failed: {}", status);
            return Err(AuthError::TokenRequestFailed(describe_token_error(&body)));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| AuthError::ParseError(format!("Failed to parse token response: {}", e)))
    }
}

/// Prefer the provider's `error_description`, falling back to the raw body
fn describe_token_error(body: &str) -> String {
    match serde_json::from_str::<TokenErrorResponse>(body) {
        Ok(TokenErrorResponse {
            error_description: Some(description),
            ..
        }) => description,
        Ok(TokenErrorResponse {
            error: Some(error), ..
        }) => error,
        _ => body.to_string(),
    }
}

/// Process-independent credential state for one session
#[derive(Debug, Default)]
pub struct CredentialContext {
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    client_secret: Option<String>,
    pub app: Option<ClientApplication>,
    access_token: Option<String>,
    /// Absolute expiry, seconds since the Unix epoch
    pub expires_at: u64,
}

impl CredentialContext {
    /// True when nothing is configured and no token is cached
    pub fn is_empty(&self) -> bool {
        self.tenant_id.is_none()
            && self.client_id.is_none()
            && self.client_secret.is_none()
            && self.app.is_none()
            && self.access_token.is_none()
            && self.expires_at == 0
    }

    /// Cached token, if it has more than the safety margin left at `now`
    fn usable_token(&self, now: u64) -> Option<&str> {
        let token = self.access_token.as_deref()?;
        if self.expires_at.saturating_sub(now) > TOKEN_SAFETY_MARGIN_SECS {
            Some(token)
        } else {
            None
        }
    }
}

/// Acquires and caches bearer tokens for the configured service principal
pub struct TokenProvider {
    identity: Arc<dyn IdentityClient>,
    authority_host: String,
    scope: String,
    context: RwLock<CredentialContext>,
}

impl TokenProvider {
    pub fn new(identity: Arc<dyn IdentityClient>, authority_host: &str, scope: &str) -> Self {
        Self {
            identity,
            authority_host: authority_host.trim_end_matches('/').to_string(),
            scope: scope.to_string(),
            context: RwLock::new(CredentialContext::default()),
        }
    }

    /// Store a service principal and drop any cached token
    pub async fn configure(&self, credentials: &Credentials) {
        let app = ClientApplication::new(&self.authority_host, credentials);
        let mut ctx = self.context.write().await;
        *ctx = CredentialContext {
            tenant_id: Some(credentials.tenant_id.clone()),
            client_id: Some(credentials.client_id.clone()),
            client_secret: Some(credentials.client_secret.clone()),
            app: Some(app),
            access_token: None,
            expires_at: 0,
        };
        tracing::info!(
            "Configured service principal {} for tenant {}",
            credentials.client_id,
            credentials.tenant_id
        );
    }

    /// Configure and immediately acquire a token.
    ///
    /// On failure the whole credential context is cleared.
    pub async fn connect(&self, credentials: &Credentials) -> Result<(), AuthError> {
        self.configure(credentials).await;
        match self.ensure_token().await {
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::error!("Error acquiring token: {}", e);
                self.reset().await;
                Err(e)
            }
        }
    }

    /// Return a usable bearer token, acquiring a new one when needed
    pub async fn ensure_token(&self) -> Result<String, AuthError> {
        let app = {
            let ctx = self.context.read().await;
            if let Some(token) = ctx.usable_token(now_epoch_secs()) {
                tracing::debug!("Using cached token");
                return Ok(token.to_string());
            }
            ctx.app.clone().ok_or(AuthError::NotConfigured)?
        };

        tracing::info!("Acquiring new access token from {}", app.authority);
        let response = self.identity.acquire_token_for_client(&app, &self.scope).await?;

        let lifetime = response.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        {
            let mut ctx = self.context.write().await;
            // A reconfigure or reset while the request was in flight wins.
            if ctx.app.as_ref() == Some(&app) {
                ctx.access_token = Some(response.access_token.clone());
                ctx.expires_at = now_epoch_secs().saturating_add(lifetime);
            }
        }

        tracing::info!("Token acquired successfully, expires in {} seconds", lifetime);
        Ok(response.access_token)
    }

    /// Drop the cached token so the next call acquires a fresh one
    pub async fn invalidate(&self) {
        let mut ctx = self.context.write().await;
        ctx.access_token = None;
        ctx.expires_at = 0;
    }

    /// Clear every field of the credential context
    pub async fn reset(&self) {
        *self.context.write().await = CredentialContext::default();
    }

    pub async fn is_configured(&self) -> bool {
        self.context.read().await.app.is_some()
    }

    pub async fn is_empty(&self) -> bool {
        self.context.read().await.is_empty()
    }
}

/// Current time as seconds since the Unix epoch
pub fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingIdentity {
        calls: AtomicUsize,
        expires_in: Option<u64>,
        fail: bool,
    }

    impl CountingIdentity {
        fn new(expires_in: Option<u64>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                expires_in,
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                expires_in: None,
                fail: true,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl IdentityClient for CountingIdentity {
        async fn acquire_token_for_client(
            &self,
            _app: &ClientApplication,
            _scope: &str,
        ) -> Result<TokenResponse, AuthError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail {
                return Err(AuthError::TokenRequestFailed(
                    "AADSTS7000215: Invalid client secret provided.".to_string(),
                ));
            }
            Ok(TokenResponse {
                access_token: format!("token-{}", n),
                token_type: Some("Bearer".to_string()),
                expires_in: self.expires_in,
            })
        }
    }

    fn provider(identity: Arc<CountingIdentity>) -> TokenProvider {
        TokenProvider::new(
            identity,
            "https://login.microsoftonline.com/",
            "https://analysis.windows.net/powerbi/api/.default",
        )
    }

    fn creds() -> Credentials {
        Credentials::new(" my-tenant ", "client-id\n", " secret ")
    }

    #[test]
    fn test_credentials_are_trimmed() {
        let creds = creds();
        assert_eq!(creds.tenant_id, "my-tenant");
        assert_eq!(creds.client_id, "client-id");
        assert_eq!(creds.client_secret, "secret");
        assert!(!format!("{:?}", creds).contains("\"secret\""));
    }

    #[test]
    fn test_token_endpoint() {
        let app = ClientApplication::new("https://login.microsoftonline.com/", &creds());
        assert_eq!(app.authority, "https://login.microsoftonline.com/my-tenant");
        assert_eq!(
            app.token_endpoint(),
            "https://login.microsoftonline.com/my-tenant/oauth2/v2.0/token"
        );
    }

    #[test]
    fn test_credentials_from_section() {
        assert!(Credentials::from_section(None, None, None).unwrap().is_none());

        let full = Credentials::from_section(Some("t"), Some("c"), Some("s"))
            .unwrap()
            .unwrap();
        assert_eq!(full, Credentials::new("t", "c", "s"));

        let err = Credentials::from_section(Some("t"), None, Some(" ")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Missing credentials: PBI_CLIENT_ID, PBI_CLIENT_SECRET"
        );
    }

    #[test]
    fn test_describe_token_error() {
        assert_eq!(
            describe_token_error(r#"{"error":"invalid_client","error_description":"AADSTS7000215"}"#),
            "AADSTS7000215"
        );
        assert_eq!(describe_token_error(r#"{"error":"invalid_client"}"#), "invalid_client");
        assert_eq!(describe_token_error("gateway timeout"), "gateway timeout");
    }

    #[test]
    fn test_cached_token_validity() {
        let now = 1_700_000_000;
        let mut ctx = CredentialContext {
            access_token: Some("test".to_string()),
            expires_at: now + 3600,
            ..Default::default()
        };
        assert_eq!(ctx.usable_token(now), Some("test"));

        ctx.expires_at = now + TOKEN_SAFETY_MARGIN_SECS;
        assert_eq!(ctx.usable_token(now), None);

        ctx.expires_at = now - 10;
        assert_eq!(ctx.usable_token(now), None);
    }

    #[tokio::test]
    async fn test_unconfigured_provider_names_setup_step() {
        let identity = CountingIdentity::new(Some(3600));
        let provider = provider(identity.clone());

        let err = provider.ensure_token().await.unwrap_err();
        assert!(matches!(err, AuthError::NotConfigured));
        assert!(err.to_string().contains("connect_service_principal"));
        assert_eq!(identity.calls(), 0);
    }

    #[tokio::test]
    async fn test_fresh_token_is_reused() {
        let identity = CountingIdentity::new(Some(3600));
        let provider = provider(identity.clone());
        provider.configure(&creds()).await;

        assert_eq!(provider.ensure_token().await.unwrap(), "token-1");
        assert_eq!(provider.ensure_token().await.unwrap(), "token-1");
        assert_eq!(identity.calls(), 1);
    }

    #[tokio::test]
    async fn test_token_at_margin_is_refreshed() {
        let identity = CountingIdentity::new(Some(TOKEN_SAFETY_MARGIN_SECS));
        let provider = provider(identity.clone());
        provider.configure(&creds()).await;

        assert_eq!(provider.ensure_token().await.unwrap(), "token-1");
        assert_eq!(provider.ensure_token().await.unwrap(), "token-2");
        assert_eq!(identity.calls(), 2);
    }

    #[tokio::test]
    async fn test_missing_expires_in_uses_default_lifetime() {
        let identity = CountingIdentity::new(None);
        let provider = provider(identity.clone());
        provider.configure(&creds()).await;

        provider.ensure_token().await.unwrap();
        let expires_at = provider.context.read().await.expires_at;
        let remaining = expires_at - now_epoch_secs();
        assert!(remaining <= DEFAULT_TOKEN_LIFETIME_SECS);
        assert!(remaining > DEFAULT_TOKEN_LIFETIME_SECS - 5);
    }

    #[tokio::test]
    async fn test_huge_lifetime_saturates() {
        let identity = CountingIdentity::new(Some(u64::MAX));
        let provider = provider(identity.clone());
        provider.configure(&creds()).await;

        assert_eq!(provider.ensure_token().await.unwrap(), "token-1");
        assert_eq!(provider.context.read().await.expires_at, u64::MAX);
        assert_eq!(provider.ensure_token().await.unwrap(), "token-1");
        assert_eq!(identity.calls(), 1);
    }

    #[tokio::test]
    async fn test_configure_clears_cached_token() {
        let identity = CountingIdentity::new(Some(3600));
        let provider = provider(identity.clone());
        provider.configure(&creds()).await;
        provider.ensure_token().await.unwrap();

        provider.configure(&creds()).await;
        assert_eq!(provider.ensure_token().await.unwrap(), "token-2");
    }

    #[tokio::test]
    async fn test_failed_connect_clears_context() {
        let identity = CountingIdentity::failing();
        let provider = provider(identity.clone());

        let err = provider.connect(&creds()).await.unwrap_err();
        assert!(err.to_string().contains("AADSTS7000215"));
        assert!(provider.is_empty().await);
        {
            let ctx = provider.context.read().await;
            assert!(ctx.app.is_none());
            assert!(ctx.tenant_id.is_none());
            assert!(ctx.client_id.is_none());
            assert!(ctx.access_token.is_none());
        }

        let err = provider.ensure_token().await.unwrap_err();
        assert!(matches!(err, AuthError::NotConfigured));
        assert_eq!(identity.calls(), 1);
    }

    #[test]
    fn test_invalidate_forces_refresh() {
        tokio_test::block_on(async {
            let identity = CountingIdentity::new(Some(3600));
            let provider = provider(identity.clone());
            provider.configure(&creds()).await;
            provider.ensure_token().await.unwrap();

            provider.invalidate().await;
            assert!(provider.is_configured().await);
            assert_eq!(provider.ensure_token().await.unwrap(), "token-2");
        });
    }
}
