//! Power BI service integration
//!
//! Authorized REST client, long-running operation polling and the service
//! calls built on top of them.

pub mod client;
pub mod datasets;
pub mod definition;
pub mod import;
pub mod lro;
pub mod transport;

pub use client::{PowerBiClient, PowerBiError};
pub use datasets::NamedItem;
pub use definition::{render_definition, tmdl_parts, DefinitionPart, DefinitionView};
pub use import::{ImportOutcome, ImportRequest, NameConflict};
pub use lro::{OperationHandle, OperationStart, OperationStatus};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, Method, ReqwestTransport, TransportError};
