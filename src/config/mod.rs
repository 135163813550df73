//! Configuration module

#[allow(clippy::module_inception)]
pub mod config;

pub use config::{
    AuthSection, Config, ConfigError, PowerBiSection, RuntimeConfig, ServerSection,
    ServiceEndpoints,
};
