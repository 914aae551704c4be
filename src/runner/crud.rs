//! Synchronous CRUD reconciliation.
//!
//! Drives resources whose lifecycle is a plain create/patch/delete against
//! their own endpoints, including nested creation paths (a parent reference
//! resolved into the URL) and the shared two-phase update engine.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::api::ApiClient;
use crate::command::Command;
use crate::descriptor::ResourceDescriptor;
use crate::error::{Error, Result};
use crate::params::{DesiredState, RunParams};
use crate::resolver::OutputFormat;

use super::update::{execute_update, plan_action_updates, plan_simple_update};
use super::{uuid_from_url, Engine, RunResult};

pub struct CrudRunner {
    engine: Engine,
}

impl CrudRunner {
    pub fn new(client: ApiClient, descriptor: Arc<ResourceDescriptor>, params: RunParams) -> Self {
        Self {
            engine: Engine::new(client, descriptor, params),
        }
    }

    /// Run the full reconciliation state machine.
    pub async fn run(mut self) -> Result<RunResult> {
        self.engine.check_existence().await?;

        if self.engine.params.check_mode() {
            return self.handle_check_mode().await;
        }

        match (self.engine.resource.is_some(), self.engine.params.state()) {
            (false, DesiredState::Present) => self.create().await?,
            (true, DesiredState::Present) => self.update().await?,
            (true, DesiredState::Absent) => self.delete().await?,
            (false, DesiredState::Absent) => {}
        }

        Ok(self.engine.finish())
    }

    /// Assemble the fully resolved create command. Nested creation endpoints
    /// get their path parameters from resolved parent references.
    async fn plan_create(&mut self) -> Result<Command> {
        let descriptor = self.engine.descriptor.clone();
        let create_path = descriptor.create_path.clone().ok_or_else(|| {
            Error::Configuration(format!(
                "No create endpoint configured for {}",
                descriptor.resource_type
            ))
        })?;

        let mut payload = Map::new();
        for key in &descriptor.model_param_names {
            let Some(value) = self.engine.params.get(key).cloned() else {
                continue;
            };
            let resolved = if descriptor.resolvers.contains_key(key) {
                self.engine
                    .resolver
                    .resolve(key, &value, OutputFormat::Create)
                    .await?
            } else {
                value
            };
            payload.insert(key.clone(), resolved);
        }

        let mut path_params = HashMap::new();
        if let Some(maps) = descriptor.path_params_for("create") {
            for (placeholder, param_name) in maps {
                let value = self
                    .engine
                    .params
                    .get(param_name)
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| {
                        Error::Lookup(format!(
                            "Parameter '{param_name}' is required for creation."
                        ))
                    })?;
                let url = self.engine.resolver.resolve_to_url(param_name, &value).await?;
                path_params.insert(placeholder.clone(), uuid_from_url(&url));
            }
        }

        Ok(Command::Create {
            description: format!("Create new {}", descriptor.resource_type),
            path: create_path,
            path_params,
            payload: Value::Object(payload),
        })
    }

    async fn create(&mut self) -> Result<()> {
        let command = self.plan_create().await?;
        let outcome = self.engine.execute(command).await?;
        self.engine.resource = outcome.resource.filter(|r| !r.is_null());
        self.engine.changed = true;
        Ok(())
    }

    async fn update(&mut self) -> Result<()> {
        execute_update(&mut self.engine, OutputFormat::Create).await
    }

    fn plan_delete(&self) -> Result<Command> {
        let descriptor = &self.engine.descriptor;
        let destroy_path = descriptor.destroy_path.clone().ok_or_else(|| {
            Error::Configuration(format!(
                "No destroy endpoint configured for {}",
                descriptor.resource_type
            ))
        })?;
        let old_attributes = self.engine.resource.clone().unwrap_or(Value::Null);
        let mut path_params = HashMap::new();
        path_params.insert("uuid".to_string(), self.engine.resource_uuid()?);

        Ok(Command::Delete {
            description: format!("Delete {}", descriptor.resource_type),
            path: destroy_path,
            path_params,
            payload: None,
            old_attributes,
        })
    }

    async fn delete(&mut self) -> Result<()> {
        let command = self.plan_delete()?;
        self.engine.execute(command).await?;
        self.engine.changed = true;
        self.engine.resource = None;
        Ok(())
    }

    /// Predict changes without mutating anything. Planning is identical to a
    /// real run (including read-only resolver traffic); only execution is
    /// skipped, so the reported diff matches what would be applied.
    async fn handle_check_mode(mut self) -> Result<RunResult> {
        match (self.engine.resource.is_some(), self.engine.params.state()) {
            (false, DesiredState::Present) => {
                let command = self.plan_create().await?;
                self.engine.record(&command)?;
                self.engine.changed = true;
            }
            (true, DesiredState::Present) => {
                if let Some(command) = plan_simple_update(&self.engine)? {
                    self.engine.record(&command)?;
                    self.engine.changed = true;
                }
                for command in plan_action_updates(&mut self.engine, OutputFormat::Create).await? {
                    self.engine.record(&command)?;
                    self.engine.changed = true;
                }
            }
            (true, DesiredState::Absent) => {
                let command = self.plan_delete()?;
                self.engine.record(&command)?;
                self.engine.changed = true;
            }
            (false, DesiredState::Absent) => {}
        }
        Ok(self.engine.finish())
    }
}
