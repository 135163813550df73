//! MCP Server implementation for Power BI
//!
//! JSON-RPC 2.0 protocol types, the tool table and the stdio transport

pub mod args;
pub mod policy;
pub mod progress;
pub mod protocol;
mod server;
mod service_tools;
pub mod stdio;

pub use policy::ToolPolicy;
pub use protocol::*;
pub use server::{PbixMcpServer, ToolError};
pub use stdio::{serve, serve_stdio};
