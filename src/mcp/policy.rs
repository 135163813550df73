//! Tool policy
//!
//! Checked at dispatch time, in front of the tool table.

use crate::config::RuntimeConfig;
use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct ToolPolicy {
    allow: Option<HashSet<String>>,
    deny: HashSet<String>,
}

impl ToolPolicy {
    pub fn new(allow: Option<HashSet<String>>, deny: HashSet<String>) -> Self {
        Self { allow, deny }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(config.allow.clone(), config.disallow.clone())
    }

    /// A tool runs only if it is not denied and, when an allow list exists, listed there
    pub fn is_allowed(&self, tool: &str) -> bool {
        if self.deny.contains(tool) {
            return false;
        }
        match &self.allow {
            Some(allow) => allow.contains(tool),
            None => true,
        }
    }

    /// `Err` carries the message returned to the client
    pub fn check(&self, tool: &str) -> Result<(), String> {
        if self.is_allowed(tool) {
            Ok(())
        } else {
            tracing::warn!("Rejected call to disabled tool {}", tool);
            Err(format!(
                "Error: The tool '{}' has been disabled by the server administrator.",
                tool
            ))
        }
    }
}
