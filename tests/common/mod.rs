//! In-memory fakes shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use pbix_mcp::auth::{AuthError, ClientApplication, Credentials, IdentityClient, TokenProvider, TokenResponse};
use pbix_mcp::config::{Config, RuntimeConfig, ServiceEndpoints};
use pbix_mcp::model::{
    ColumnStatistics, DaxColumn, DaxMeasure, DaxTable, MParameter, ModelError, ModelLoader, PowerQuery, Relationship,
    SchemaColumn, SemanticModel, TableData,
};
use pbix_mcp::powerbi::{HttpRequest, HttpResponse, HttpTransport, PowerBiClient, TransportError};
use pbix_mcp::session::Session;
use pbix_mcp::PbixMcpServer;
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Identity provider that hands out `token-1`, `token-2`, ...
pub struct FakeIdentity {
    calls: AtomicUsize,
    fail: bool,
}

impl FakeIdentity {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: false,
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: true,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityClient for FakeIdentity {
    async fn acquire_token_for_client(
        &self,
        _app: &ClientApplication,
        _scope: &str,
    ) -> Result<TokenResponse, AuthError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail {
            return Err(AuthError::TokenRequestFailed(
                "AADSTS700016: Application not found in the directory.".to_string(),
            ));
        }
        Ok(TokenResponse {
            access_token: format!("token-{}", n),
            token_type: Some("Bearer".to_string()),
            expires_in: Some(3600),
        })
    }
}

/// A request as the transport saw it
#[derive(Debug, Clone)]
pub struct SentRequest {
    pub request: HttpRequest,
    pub bearer: String,
}

/// Replays queued responses in order and records every request
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    sent: Mutex<Vec<SentRequest>>,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<HttpResponse>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into_iter().map(Ok).collect()),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn push_error(&self, message: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(TransportError(message.to_string())));
    }

    pub fn sent(&self) -> Vec<SentRequest> {
        self.sent.lock().unwrap().clone()
    }

    pub fn urls(&self) -> Vec<String> {
        self.sent().into_iter().map(|s| s.request.url).collect()
    }

    pub fn calls(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: &HttpRequest, bearer: &str) -> Result<HttpResponse, TransportError> {
        self.sent.lock().unwrap().push(SentRequest {
            request: request.clone(),
            bearer: bearer.to_string(),
        });
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError("no scripted response left".to_string())))
    }
}

pub fn json_response(status: u16, body: Value) -> HttpResponse {
    HttpResponse::new(status, body.to_string())
}

pub fn accepted(location: &str) -> HttpResponse {
    HttpResponse::new(202, "")
        .with_header("Location", location)
        .with_header("Retry-After", "0")
}

pub fn credentials() -> Credentials {
    Credentials::new("tenant", "client", "secret")
}

pub fn endpoints() -> ServiceEndpoints {
    ServiceEndpoints::default()
}

pub async fn configured_provider(identity: Arc<FakeIdentity>) -> Arc<TokenProvider> {
    let endpoints = endpoints();
    let provider = Arc::new(TokenProvider::new(
        identity,
        &endpoints.authority_host,
        &endpoints.scope,
    ));
    provider.configure(&credentials()).await;
    provider
}

pub async fn client(identity: Arc<FakeIdentity>, transport: Arc<ScriptedTransport>) -> PowerBiClient {
    PowerBiClient::new(configured_provider(identity).await, transport, endpoints())
}

pub fn runtime_config() -> RuntimeConfig {
    Config::default().to_runtime().unwrap()
}

/// A model with a `Sales` table of `rows` rows
pub struct FakeModel {
    pub rows: usize,
}

impl SemanticModel for FakeModel {
    fn tables(&self) -> Vec<String> {
        vec!["Sales".to_string(), "Date".to_string()]
    }

    fn table_rows(&self, table: &str) -> Result<TableData, ModelError> {
        match table {
            "Sales" => Ok(TableData {
                columns: vec!["Id".to_string(), "Amount".to_string()],
                rows: (0..self.rows).map(|i| vec![json!(i), json!(i * 10)]).collect(),
            }),
            "Date" => Ok(TableData {
                columns: vec!["Date".to_string()],
                rows: Vec::new(),
            }),
            other => Err(ModelError::TableNotFound(other.to_string())),
        }
    }

    fn schema(&self) -> Vec<SchemaColumn> {
        vec![
            SchemaColumn {
                table_name: "Sales".to_string(),
                column_name: "Id".to_string(),
                data_type: "int64".to_string(),
            },
            SchemaColumn {
                table_name: "Sales".to_string(),
                column_name: "Amount".to_string(),
                data_type: "double".to_string(),
            },
        ]
    }

    fn relationships(&self) -> Vec<Relationship> {
        vec![Relationship {
            from_table_name: "Sales".to_string(),
            from_column_name: "DateKey".to_string(),
            to_table_name: "Date".to_string(),
            to_column_name: "DateKey".to_string(),
            is_active: true,
            cardinality: "M:1".to_string(),
            cross_filtering_behavior: "OneDirection".to_string(),
        }]
    }

    fn dax_measures(&self) -> Vec<DaxMeasure> {
        vec![DaxMeasure {
            table_name: "Sales".to_string(),
            name: "Total Sales".to_string(),
            expression: "SUM(Sales[Amount])".to_string(),
            display_folder: None,
            description: None,
        }]
    }

    fn dax_columns(&self) -> Vec<DaxColumn> {
        Vec::new()
    }

    fn dax_tables(&self) -> Vec<DaxTable> {
        Vec::new()
    }

    fn power_query(&self) -> Vec<PowerQuery> {
        Vec::new()
    }

    fn m_parameters(&self) -> Vec<MParameter> {
        Vec::new()
    }

    fn statistics(&self) -> Result<Vec<ColumnStatistics>, ModelError> {
        Ok(["Id", "Amount"]
            .iter()
            .map(|column| ColumnStatistics {
                table_name: "Sales".to_string(),
                column_name: column.to_string(),
                cardinality: self.rows as u64,
                dictionary: 128,
                hash_index: 0,
                data_size: 64,
            })
            .collect())
    }

    fn metadata(&self) -> Map<String, Value> {
        Map::new()
    }

    fn size(&self) -> u64 {
        3 * 1024 * 1024
    }
}

pub struct FakeLoader {
    pub rows: usize,
}

impl ModelLoader for FakeLoader {
    fn load(&self, _path: &Path) -> Result<Arc<dyn SemanticModel>, ModelError> {
        Ok(Arc::new(FakeModel { rows: self.rows }))
    }
}

/// Server wired to fakes; `configure` decides whether credentials are set
pub async fn server(
    identity: Arc<FakeIdentity>,
    transport: Arc<ScriptedTransport>,
    config: RuntimeConfig,
    configure: bool,
) -> PbixMcpServer {
    let session = Arc::new(Session::new(
        identity,
        transport,
        Arc::new(FakeLoader { rows: 10 }),
        &config,
    ));
    if configure {
        session.auth().configure(&credentials()).await;
    }
    PbixMcpServer::new(session, Arc::new(config))
}
