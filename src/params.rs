//! The caller-supplied parameter bag for one reconciliation run.
//!
//! The host process hands the engine a single JSON object containing the
//! desired state of the resource plus run controls (`state`, `check_mode`,
//! `wait`, timing). The bag is immutable for the duration of the run.

use std::time::Duration;

use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Desired end state of the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesiredState {
    Present,
    Absent,
}

/// Immutable desired-state input for a single run.
#[derive(Debug, Clone)]
pub struct RunParams {
    values: Map<String, Value>,
}

impl RunParams {
    /// Build from the raw JSON parameter bag. The bag must be an object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(values) => Ok(Self { values }),
            other => Err(Error::Configuration(format!(
                "Parameters must be a JSON object, got: {other}"
            ))),
        }
    }

    /// A parameter value; `null` counts as not provided, matching the
    /// convention that omitted parameters never drive updates.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key).filter(|v| !v.is_null())
    }

    /// Required string parameter, e.g. `api_url` or `access_token`.
    pub fn require_str(&self, key: &str) -> Result<&str> {
        self.get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Configuration(format!("Missing required parameter '{key}'")))
    }

    /// The resource name. Every managed resource is addressed by name.
    pub fn name(&self) -> Result<&str> {
        self.get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Lookup("Parameter 'name' is required.".to_string()))
    }

    pub fn state(&self) -> DesiredState {
        match self.get("state").and_then(Value::as_str) {
            Some("absent") => DesiredState::Absent,
            _ => DesiredState::Present,
        }
    }

    pub fn check_mode(&self) -> bool {
        self.get("check_mode").and_then(Value::as_bool).unwrap_or(false)
    }

    /// Whether to block on asynchronous operations. Defaults to true.
    pub fn wait(&self) -> bool {
        self.get("wait").and_then(Value::as_bool).unwrap_or(true)
    }

    /// Wall-clock budget for one poll loop. Defaults to 600 seconds.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.get("timeout").and_then(Value::as_u64).unwrap_or(600))
    }

    /// Fixed poll interval. Defaults to 20 seconds.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.get("interval").and_then(Value::as_u64).unwrap_or(20))
    }

    /// All parameter names present in the bag (top-level parameters).
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}
