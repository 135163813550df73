//! Power BI MCP Server
//!
//! Entry point for the MCP server binary.
//! Implements MCP protocol over stdio using JSON-RPC 2.0.

use anyhow::Context;
use clap::Parser;
use pbix_mcp::auth::Credentials;
use pbix_mcp::config::{Config, RuntimeConfig};
use pbix_mcp::mcp::{serve_stdio, PbixMcpServer};
use pbix_mcp::session::Session;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pbix-mcp", version, about = "MCP server for Power BI files and the Power BI service")]
struct Cli {
    /// TOML configuration file
    #[arg(long, env = "PBIX_MCP_CONFIG")]
    config: Option<PathBuf>,

    /// Disable a tool (repeatable)
    #[arg(long = "disallow", value_name = "TOOL")]
    disallow: Vec<String>,

    /// Only enable the listed tools (repeatable)
    #[arg(long = "allow", value_name = "TOOL")]
    allow: Vec<String>,

    /// Default rows per page for get_table_contents
    #[arg(long)]
    page_size: Option<usize>,

    /// Largest page_size a client may request
    #[arg(long)]
    max_page_size: Option<usize>,
}

impl Cli {
    /// Layer command-line flags over the file configuration
    fn apply(&self, config: &mut Config) {
        config.server.disallow.extend(self.disallow.iter().cloned());
        config.server.allow.extend(self.allow.iter().cloned());
        if let Some(page_size) = self.page_size {
            config.server.page_size = page_size;
        }
        if let Some(max_page_size) = self.max_page_size {
            config.server.max_page_size = max_page_size;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging to stderr (MCP uses stdout for protocol)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        tracing::error!("{:#}", e);
        return Err(e);
    }
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    tracing::info!("Starting Power BI MCP Server...");

    let mut config = Config::load_or_default(cli.config.as_deref())?;
    cli.apply(&mut config);
    let runtime_config = config.to_runtime()?;

    if !runtime_config.disallow.is_empty() {
        let mut disabled: Vec<_> = runtime_config.disallow.iter().cloned().collect();
        disabled.sort();
        tracing::info!("Disabled tools: {}", disabled.join(", "));
    }

    let session = Arc::new(Session::connect(&runtime_config).context("Failed to set up HTTP clients")?);
    bootstrap_credentials(&session, &runtime_config).await?;

    let server = PbixMcpServer::new(session, Arc::new(runtime_config));

    tracing::info!("MCP Server ready, listening on stdio...");
    serve_stdio(&server).await
}

/// Configure the service principal from the environment, else from `[auth]`
async fn bootstrap_credentials(session: &Session, config: &RuntimeConfig) -> anyhow::Result<()> {
    let credentials = match Credentials::from_env().context("Incomplete PBI_* environment")? {
        Some(credentials) => Some(credentials),
        None => Credentials::from_section(
            config.auth.tenant_id.as_deref(),
            config.auth.client_id.as_deref(),
            config.auth.client_secret.as_deref(),
        )
        .context("Incomplete [auth] section")?,
    };

    match credentials {
        Some(credentials) => session.auth().configure(&credentials).await,
        None => tracing::info!("No service principal configured; use connect_service_principal"),
    }
    Ok(())
}
