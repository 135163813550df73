//! Per-connection session state

use crate::auth::{AzureAdIdentity, IdentityClient, TokenProvider};
use crate::config::RuntimeConfig;
use crate::model::{resolve_file_path, LoadedModel, ModelError, ModelLoader, PbixLoader};
use crate::powerbi::{HttpTransport, PowerBiClient, ReqwestTransport};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::RwLock;

/// File types `load_pbix_file` accepts
pub const MODEL_EXTENSIONS: &[&str] = &["pbix", "pbit"];

/// Loaded model and credential context of one client connection
pub struct Session {
    auth: Arc<TokenProvider>,
    powerbi: PowerBiClient,
    loader: Arc<dyn ModelLoader>,
    model: RwLock<Option<LoadedModel>>,
}

impl Session {
    pub fn new(
        identity: Arc<dyn IdentityClient>,
        transport: Arc<dyn HttpTransport>,
        loader: Arc<dyn ModelLoader>,
        config: &RuntimeConfig,
    ) -> Self {
        let endpoints = config.endpoints.clone();
        let auth = Arc::new(TokenProvider::new(
            identity,
            &endpoints.authority_host,
            &endpoints.scope,
        ));
        let powerbi = PowerBiClient::new(auth.clone(), transport, endpoints);
        Self {
            auth,
            powerbi,
            loader,
            model: RwLock::new(None),
        }
    }

    /// Session backed by Azure AD, reqwest and the PBIX reader
    pub fn connect(config: &RuntimeConfig) -> Result<Self> {
        let identity = Arc::new(AzureAdIdentity::new(config.request_timeout)?);
        let transport = Arc::new(ReqwestTransport::new(config.request_timeout)?);
        Ok(Self::new(identity, transport, Arc::new(PbixLoader), config))
    }

    pub fn auth(&self) -> &Arc<TokenProvider> {
        &self.auth
    }

    pub fn powerbi(&self) -> &PowerBiClient {
        &self.powerbi
    }

    /// Load a model file, replacing the current one
    pub async fn load_model(&self, raw_path: &str) -> Result<LoadedModel, ModelError> {
        let path = resolve_file_path(raw_path, MODEL_EXTENSIONS)?;
        let loader = self.loader.clone();
        let load_path = path.clone();
        let model = tokio::task::spawn_blocking(move || loader.load(&load_path))
            .await
            .map_err(|e| ModelError::Unsupported(format!("Model loader stopped: {}", e)))??;

        let loaded = LoadedModel { path, model };
        *self.model.write().await = Some(loaded.clone());
        tracing::info!("Loaded model from {}", loaded.path.display());
        Ok(loaded)
    }

    pub async fn current_model(&self) -> Option<LoadedModel> {
        self.model.read().await.clone()
    }
}
