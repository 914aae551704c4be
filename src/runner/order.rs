//! Asynchronous order-based reconciliation.
//!
//! Some resources are not created directly: a provisioning order is
//! submitted, the order object (not the resource) is polled to a terminal
//! state, and only then does the real resource exist. Updates reuse the
//! shared two-phase engine; termination goes through a distinct marketplace
//! identifier and deliberately does not poll for completion.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::api::ApiClient;
use crate::command::Command;
use crate::descriptor::ResourceDescriptor;
use crate::error::{Error, Result};
use crate::params::{DesiredState, RunParams};
use crate::poller::Poller;
use crate::resolver::OutputFormat;

use super::update::{execute_update, plan_action_updates, plan_simple_update};
use super::{Engine, RunResult};

/// Relationship keys whose full objects are prefetched before planning
/// updates, so dependent resolvers can filter against the resource's
/// existing parent context.
const UPDATE_CACHE_KEYS: &[&str] = &["offering", "project"];

pub struct OrderRunner {
    engine: Engine,
}

impl OrderRunner {
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

    /// Assemble the provisioning-order command. The project and offering are
    /// resolved first so dependent attribute resolvers find them cached.
    async fn plan_create(&mut self) -> Result<Command> {
        let descriptor = self.engine.descriptor.clone();
        let order_path = descriptor.order_create_path.clone().ok_or_else(|| {
            Error::Configuration(format!(
                "No order endpoint configured for {}",
                descriptor.resource_type
            ))
        })?;

        let project = self.required_str("project")?;
        let project_url = self.engine.resolver.resolve_to_url("project", &project).await?;
        let offering = self.required_str("offering")?;
        let offering_url = self
            .engine
            .resolver
            .resolve_to_url("offering", &offering)
            .await?;

        let mut attributes = Map::new();
        attributes.insert(
            "name".to_string(),
            Value::String(self.engine.params.name()?.to_string()),
        );
        for key in &descriptor.model_param_names {
            let Some(value) = self.engine.params.get(key).cloned() else {
                continue;
            };
            let resolved = self
                .engine
                .resolver
                .resolve(key, &value, OutputFormat::Create)
                .await?;
            attributes.insert(key.clone(), resolved);
        }

        let mut payload = Map::new();
        payload.insert("project".to_string(), Value::String(project_url));
        payload.insert("offering".to_string(), Value::String(offering_url));
        if let Some(plan) = self.engine.params.get("plan") {
            payload.insert("plan".to_string(), plan.clone());
        }
        payload.insert(
            "limits".to_string(),
            self.engine
                .params
                .get("limits")
                .cloned()
                .unwrap_or_else(|| json!({})),
        );
        payload.insert("attributes".to_string(), Value::Object(attributes));
        payload.insert("accepting_terms_of_service".to_string(), Value::Bool(true));

        Ok(Command::Create {
            description: format!("Submit provisioning order for {}", descriptor.resource_type),
            path: order_path,
            path_params: HashMap::new(),
            payload: Value::Object(payload),
        })
    }

    async fn create(&mut self) -> Result<()> {
        let command = self.plan_create().await?;
        let outcome = self.engine.execute(command).await?;
        self.engine.changed = true;

        if !self.engine.params.wait() {
            return Ok(());
        }

        let order = outcome.resource.unwrap_or(Value::Null);
        let order_uuid = order
            .get("uuid")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::Configuration("Order response has no 'uuid' field".into())
            })?;
        let order_detail = self
            .engine
            .descriptor
            .order_detail_path
            .clone()
            .ok_or_else(|| {
                Error::Configuration("No order detail endpoint configured for waiting".into())
            })?;

        let poller = Poller::new(
            &self.engine.client,
            self.engine.params.interval(),
            self.engine.params.timeout(),
        );
        poller.wait_for_order(&order_detail, order_uuid).await?;

        // The order completing means the resource now exists; fetch its
        // final state so the caller gets accurate data.
        self.engine.check_existence().await?;
        Ok(())
    }

    async fn update(&mut self) -> Result<()> {
        self.prime_update_cache().await?;
        execute_update(&mut self.engine, OutputFormat::Action).await
    }

    /// Seed the resolver cache with the full parent objects referenced by
    /// the existing resource, instead of re-deriving them from user input.
    async fn prime_update_cache(&mut self) -> Result<()> {
        if let Some(resource) = self.engine.resource.clone() {
            self.engine
                .resolver
                .prime_cache_from_resource(&resource, UPDATE_CACHE_KEYS)
                .await?;
        }
        Ok(())
    }

    /// Termination targets the marketplace identifier, not the resource's
    /// own uuid, and treats the resource as gone once the request is
    /// accepted - deletion is not polled to a terminal state.
    fn plan_delete(&self) -> Result<Command> {
        let descriptor = &self.engine.descriptor;
        let termination_path = descriptor.termination_path.clone().ok_or_else(|| {
            Error::Configuration(format!(
                "No termination endpoint configured for {}",
                descriptor.resource_type
            ))
        })?;
        let resource = self.engine.resource.clone().unwrap_or(Value::Null);
        let marketplace_uuid = resource
            .get("marketplace_resource_uuid")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::Lookup(format!(
                    "{} has no 'marketplace_resource_uuid'; cannot terminate.",
                    descriptor.resource_type
                ))
            })?;

        let mut attributes = Map::new();
        for (param, attribute_key) in &descriptor.termination_attributes {
            if let Some(value) = self.engine.params.get(param) {
                attributes.insert(attribute_key.clone(), value.clone());
            }
        }
        let payload = if attributes.is_empty() {
            json!({})
        } else {
            json!({ "attributes": attributes })
        };

        let mut path_params = HashMap::new();
        path_params.insert("uuid".to_string(), marketplace_uuid.to_string());

        Ok(Command::Delete {
            description: format!("Terminate {}", descriptor.resource_type),
            path: termination_path,
            path_params,
            payload: Some(payload),
            old_attributes: resource,
        })
    }

    async fn delete(&mut self) -> Result<()> {
        let command = self.plan_delete()?;
        self.engine.execute(command).await?;
        self.engine.changed = true;
        self.engine.resource = None;
        Ok(())
    }

    /// Predict changes without mutating anything; same planning as a real
    /// run, including read-only resolver traffic.
    async fn handle_check_mode(mut self) -> Result<RunResult> {
        match (self.engine.resource.is_some(), self.engine.params.state()) {
            (false, DesiredState::Present) => {
                let command = self.plan_create().await?;
                self.engine.record(&command)?;
                self.engine.changed = true;
            }
            (true, DesiredState::Present) => {
                self.prime_update_cache().await?;
                if let Some(command) = plan_simple_update(&self.engine)? {
                    self.engine.record(&command)?;
                    self.engine.changed = true;
                }
                for command in plan_action_updates(&mut self.engine, OutputFormat::Action).await? {
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

    fn required_str(&self, key: &str) -> Result<String> {
        self.engine
            .params
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::Lookup(format!("Parameter '{key}' is required for creation.")))
    }
}
