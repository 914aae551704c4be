//! Reconciliation runners
//!
//! A runner sequences one reconciliation: check existence, plan, execute,
//! optionally poll, exit. Two flavors share one engine:
//!
//! - [`crud`] - synchronous create/update/delete against the resource's own
//!   endpoints
//! - [`order`] - asynchronous provisioning through a marketplace-style order
//!   lifecycle
//! - [`update`] - the shared update engine (simple-field diff + action diff)
//!   both flavors compose
//!
//! The state machine is `{current: absent|present} x {desired: present|absent}`:
//! create when only desired, update when both, delete when only current,
//! no-op when neither.

pub mod crud;
pub mod order;
pub mod update;

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::api::ApiClient;
use crate::command::{Command, CommandOutcome};
use crate::descriptor::ResourceDescriptor;
use crate::error::{Error, Result};
use crate::params::RunParams;
use crate::resolver::ParameterResolver;

pub use crud::CrudRunner;
pub use order::OrderRunner;

/// The outcome of one reconciliation run.
#[derive(Debug)]
pub struct RunResult {
    pub changed: bool,
    /// Final server-side representation of the resource, or `None` when it
    /// does not (or no longer does) exist.
    pub resource: Option<Value>,
    /// Trail of planned/executed commands, one entry per command.
    pub commands: Vec<Value>,
}

impl RunResult {
    /// The JSON object reported across the process boundary.
    pub fn to_value(&self) -> Value {
        json!({
            "changed": self.changed,
            "resource": self.resource,
            "commands": self.commands,
        })
    }
}

/// Run-scoped state shared by both runner flavors: the transport, the
/// descriptor, the resolver with its cache, the current-state snapshot,
/// and the accumulated command trail. Created at run start, dropped at exit.
pub struct Engine {
    pub client: ApiClient,
    pub descriptor: Arc<ResourceDescriptor>,
    pub params: RunParams,
    pub resolver: ParameterResolver,
    pub resource: Option<Value>,
    pub changed: bool,
    trail: Vec<Value>,
}

impl Engine {
    pub fn new(client: ApiClient, descriptor: Arc<ResourceDescriptor>, params: RunParams) -> Self {
        let top_level: HashSet<String> = params.keys().map(str::to_string).collect();
        let resolver = ParameterResolver::new(client.clone(), descriptor.clone(), top_level);
        Self {
            client,
            descriptor,
            params,
            resolver,
            resource: None,
            changed: false,
            trail: Vec::new(),
        }
    }

    /// Determine whether the resource currently exists. A UUID-shaped name
    /// fetches the detail endpoint directly; otherwise an exact-name query
    /// goes to the check endpoint plus any configured context filters
    /// (resolved from the desired-state parameters). More than one match is
    /// a warning; the first server-returned result wins.
    pub async fn check_existence(&mut self) -> Result<()> {
        let name = self.params.name()?.to_string();

        if crate::resolver::is_uuid(&name) {
            let detail = format!(
                "{}/{name}/",
                self.descriptor.check_url.trim_end_matches('/')
            );
            self.resource = match self.client.get(&detail).await {
                Ok(response) if response.body.is_object() => Some(response.body),
                Ok(_) => None,
                Err(Error::Http { status: 404, .. }) => None,
                Err(err) => return Err(err),
            };
            return Ok(());
        }

        let mut query = vec![("name_exact".to_string(), name.clone())];

        let filter_keys: Vec<(String, String)> = self
            .descriptor
            .check_filter_keys
            .iter()
            .map(|(param, key)| (param.clone(), key.clone()))
            .collect();
        for (param, filter_key) in filter_keys {
            let Some(value) = self.params.get(&param).and_then(Value::as_str) else {
                continue;
            };
            let value = value.to_string();
            let url = self.resolver.resolve_to_url(&param, &value).await?;
            query.push((filter_key, uuid_from_url(&url)));
        }

        let items = self
            .client
            .get_list(&self.descriptor.check_url, &query)
            .await?;
        if items.len() > 1 {
            tracing::warn!(
                "Multiple resources found for '{}'. The first one will be used.",
                name
            );
        }
        self.resource = items.into_iter().next();
        Ok(())
    }

    /// Record a command in the trail (used as-is by check mode, and by
    /// [`Engine::execute`] before the call goes out).
    pub fn record(&mut self, command: &Command) -> Result<()> {
        let entry = command.trail_entry(&self.client)?;
        self.trail.push(entry);
        Ok(())
    }

    /// Record and execute a command.
    pub async fn execute(&mut self, command: Command) -> Result<CommandOutcome> {
        self.record(&command)?;
        tracing::debug!("executing: {}", command.description());
        command.execute(&self.client).await
    }

    /// The `uuid` of the current resource snapshot.
    pub fn resource_uuid(&self) -> Result<String> {
        self.resource
            .as_ref()
            .and_then(|r| r.get("uuid"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                Error::Configuration("Resource returned by the API has no 'uuid' field".into())
            })
    }

    pub fn finish(self) -> RunResult {
        RunResult {
            changed: self.changed,
            resource: self.resource,
            commands: self.trail,
        }
    }
}

/// Extract the trailing UUID segment from a canonical detail URL.
pub(crate) fn uuid_from_url(url: &str) -> String {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(url)
        .to_string()
}
