//! Power BI MCP Library
//!
//! Model Context Protocol server for Power BI: inspects local `.pbix` models
//! and talks to the Power BI and Fabric REST APIs as a service principal.

pub mod auth;
pub mod config;
pub mod mcp;
pub mod model;
pub mod pagination;
pub mod powerbi;
pub mod progress;
pub mod session;

pub use auth::{Credentials, TokenProvider};
pub use config::{Config, RuntimeConfig};
pub use mcp::PbixMcpServer;
pub use powerbi::{PowerBiClient, PowerBiError};
pub use session::Session;
