//! Tool argument parsing
//!
//! Clients send flat named arguments; numbers and booleans may arrive as JSON
//! strings.

use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

pub type Args = HashMap<String, Value>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArgError {
    #[error("Missing required parameter: {0}")]
    Missing(String),

    #[error("Invalid value for '{key}': expected {expected}")]
    Invalid { key: String, expected: &'static str },
}

/// Optional string; blank values count as absent
pub fn string_arg(args: &Args, key: &str) -> Option<String> {
    let value = match args.get(key)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!value.is_empty()).then_some(value)
}

pub fn required_string(args: &Args, key: &str) -> Result<String, ArgError> {
    string_arg(args, key).ok_or_else(|| ArgError::Missing(key.to_string()))
}

/// Integer given as a number or a numeric string
pub fn int_arg(args: &Args, key: &str) -> Result<Option<i64>, ArgError> {
    let invalid = || ArgError::Invalid {
        key: key.to_string(),
        expected: "an integer",
    };
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_i64().map(Some).ok_or_else(invalid),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s.trim().parse().map(Some).map_err(|_| invalid()),
        Some(_) => Err(invalid()),
    }
}

/// Whole number of seconds, at least 1
pub fn seconds_arg(args: &Args, key: &str) -> Result<Option<u64>, ArgError> {
    match int_arg(args, key)? {
        Some(n) if n < 1 => Err(ArgError::Invalid {
            key: key.to_string(),
            expected: "a positive number of seconds",
        }),
        other => Ok(other.map(|n| n as u64)),
    }
}

/// Boolean given as a bool or `"true"` / `"false"`
pub fn bool_arg(args: &Args, key: &str) -> Result<Option<bool>, ArgError> {
    let invalid = || ArgError::Invalid {
        key: key.to_string(),
        expected: "true or false",
    };
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "" => Ok(None),
            "true" | "1" | "yes" => Ok(Some(true)),
            "false" | "0" | "no" => Ok(Some(false)),
            _ => Err(invalid()),
        },
        Some(_) => Err(invalid()),
    }
}
