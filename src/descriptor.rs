//! Resource descriptor - the static, generated contract this engine runs on.
//!
//! A descriptor is produced offline by a separate code-generation stage that
//! reads the backend's API specification. It names the endpoints, the simple
//! updatable fields, the action endpoints for complex updates, and the graph
//! of identifier-resolution rules. The engine only consumes it; it never
//! builds or mutates one.

use std::collections::{HashMap, HashSet};
use std::io::Read;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};

/// Which reconciliation flavor drives this resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerKind {
    /// Synchronous create/update/delete against the resource's own endpoints.
    Crud,
    /// Asynchronous provisioning through a marketplace-style order lifecycle.
    Order,
}

/// One dependency filter on a resolver: read `source_key` from the already
/// resolved `source_param` and pass it as the `target_key` query filter.
#[derive(Debug, Clone, Deserialize)]
pub struct DependencyFilter {
    pub source_param: String,
    pub source_key: String,
    pub target_key: String,
}

/// Configuration for resolving one user-facing parameter to a canonical
/// API reference.
#[derive(Debug, Clone, Deserialize)]
pub struct ResolverDef {
    /// Collection endpoint to query, e.g. `/api/projects/`.
    pub url: String,
    /// Error template for a zero-match lookup; `{value}` is interpolated.
    pub error_message: String,
    /// Filters derived from other, previously resolved parameters.
    #[serde(default)]
    pub filter_by: Vec<DependencyFilter>,
    /// True when the parameter is a list of scalar identifiers, each of
    /// which resolves independently.
    #[serde(default)]
    pub is_list: bool,
    /// When set, a resolved list item is emitted as `{key: url}` instead of
    /// a bare URL in create-shaped payloads.
    #[serde(default)]
    pub list_item_key: Option<String>,
}

/// A dedicated "action" endpoint used for a complex update, distinct from
/// the resource's primary PATCH endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateAction {
    /// Stable identifier for the action, used in diffs and logs.
    pub name: String,
    /// Endpoint template, e.g. `/api/security-groups/{uuid}/set_rules/`.
    pub path: String,
    /// The desired-state parameter that triggers this action.
    pub param: String,
    /// Field on the current resource to diff against.
    pub compare_key: String,
    /// True when the endpoint expects `{param: payload}` rather than the
    /// raw payload.
    #[serde(default)]
    pub wrap_in_object: bool,
    /// Field names defining an object's identity within a list, for
    /// order-insensitive comparison.
    #[serde(default)]
    pub idempotency_keys: Vec<String>,
    /// Default values filled into object payload items when absent.
    #[serde(default)]
    pub defaults: HashMap<String, Value>,
}

/// Terminal-state vocabulary for polling a resource.
#[derive(Debug, Clone, Deserialize)]
pub struct WaitConfig {
    #[serde(default = "WaitConfig::default_ok_states")]
    pub ok_states: Vec<String>,
    #[serde(default = "WaitConfig::default_erred_states")]
    pub erred_states: Vec<String>,
    #[serde(default = "WaitConfig::default_state_field")]
    pub state_field: String,
}

impl WaitConfig {
    fn default_ok_states() -> Vec<String> {
        vec!["OK".to_string()]
    }

    fn default_erred_states() -> Vec<String> {
        vec!["Erred".to_string()]
    }

    fn default_state_field() -> String {
        "state".to_string()
    }
}

/// The full descriptor for one managed resource type.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceDescriptor {
    /// Human-readable label, e.g. "security group".
    pub resource_type: String,
    /// Which runner flavor to use.
    pub runner: RunnerKind,

    /// Collection endpoint used for the existence check.
    pub check_url: String,
    /// Extra existence-check filters: desired-state parameter -> query key.
    #[serde(default)]
    pub check_filter_keys: HashMap<String, String>,

    #[serde(default)]
    pub create_path: Option<String>,
    #[serde(default)]
    pub update_path: Option<String>,
    #[serde(default)]
    pub destroy_path: Option<String>,
    /// Detail endpoint template, used for state polling.
    #[serde(default)]
    pub resource_detail_path: Option<String>,

    /// Per-operation path-parameter maps: operation -> {placeholder -> parameter}.
    #[serde(default)]
    pub path_param_maps: HashMap<String, HashMap<String, String>>,

    /// Parameters copied (after resolution) into the create payload.
    #[serde(default)]
    pub model_param_names: Vec<String>,
    /// Simple fields updatable through the primary PATCH endpoint.
    #[serde(default)]
    pub update_fields: Vec<String>,
    /// Action-based updates, processed in this exact order.
    #[serde(default)]
    pub update_actions: Vec<UpdateAction>,

    #[serde(default)]
    pub resolvers: HashMap<String, ResolverDef>,
    /// Topologically sorted resolver evaluation order, fixed at generation
    /// time so a parameter's dependencies are always resolved first.
    #[serde(default)]
    pub resolver_order: Vec<String>,

    #[serde(default)]
    pub wait_config: Option<WaitConfig>,

    // Order-variant endpoints.
    #[serde(default)]
    pub order_create_path: Option<String>,
    #[serde(default)]
    pub order_detail_path: Option<String>,
    #[serde(default)]
    pub termination_path: Option<String>,
    /// Termination payload attributes: desired-state parameter -> attribute key.
    #[serde(default)]
    pub termination_attributes: HashMap<String, String>,
}

impl ResourceDescriptor {
    /// Parse a descriptor from JSON and validate its internal consistency.
    pub fn from_value(value: Value) -> Result<Self> {
        let descriptor: ResourceDescriptor = serde_json::from_value(value)?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Parse a descriptor from a reader (typically the descriptor file).
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let descriptor: ResourceDescriptor = serde_json::from_reader(reader)?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Look up a resolver, failing with a configuration error when the
    /// descriptor references one that was never defined.
    pub fn resolver(&self, param: &str) -> Result<&ResolverDef> {
        self.resolvers.get(param).ok_or_else(|| {
            Error::Configuration(format!("No resolver configured for parameter '{param}'"))
        })
    }

    /// Path-parameter map for one operation ("create", "update", "destroy").
    pub fn path_params_for(&self, operation: &str) -> Option<&HashMap<String, String>> {
        self.path_param_maps.get(operation)
    }

    /// Validate cross-references inside the descriptor.
    ///
    /// The resolver dependency graph must be acyclic and consistent with the
    /// precomputed `resolver_order`; every parameter referenced by a filter
    /// or an existence-check key must have a resolver. These are generator
    /// bugs, so they all surface as [`Error::Configuration`].
    pub fn validate(&self) -> Result<()> {
        for param in self.check_filter_keys.keys() {
            if !self.resolvers.contains_key(param) {
                return Err(Error::Configuration(format!(
                    "Existence-check filter references parameter '{param}' \
                     which has no resolver"
                )));
            }
        }

        for (name, resolver) in &self.resolvers {
            for dep in &resolver.filter_by {
                if !self.resolvers.contains_key(&dep.source_param) {
                    return Err(Error::Configuration(format!(
                        "Resolver '{name}' depends on '{}' which has no resolver",
                        dep.source_param
                    )));
                }
            }
        }

        self.check_resolver_cycles()?;
        self.check_resolver_order()?;
        Ok(())
    }

    /// Depth-first cycle detection over the `filter_by` dependency graph.
    fn check_resolver_cycles(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit(
            name: &str,
            resolvers: &HashMap<String, ResolverDef>,
            marks: &mut HashMap<String, Mark>,
            stack: &mut Vec<String>,
        ) -> Result<()> {
            match marks.get(name) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    stack.push(name.to_string());
                    return Err(Error::Configuration(format!(
                        "Resolver dependency cycle: {}",
                        stack.join(" -> ")
                    )));
                }
                None => {}
            }
            marks.insert(name.to_string(), Mark::Visiting);
            stack.push(name.to_string());
            if let Some(resolver) = resolvers.get(name) {
                for dep in &resolver.filter_by {
                    visit(&dep.source_param, resolvers, marks, stack)?;
                }
            }
            stack.pop();
            marks.insert(name.to_string(), Mark::Done);
            Ok(())
        }

        let mut marks = HashMap::new();
        for name in self.resolvers.keys() {
            visit(name, &self.resolvers, &mut marks, &mut Vec::new())?;
        }
        Ok(())
    }

    /// Verify the generator's `resolver_order` lists every dependency before
    /// its dependents, so cache entries always exist when a filter needs them.
    fn check_resolver_order(&self) -> Result<()> {
        let position: HashMap<&str, usize> = self
            .resolver_order
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();

        let ordered: HashSet<&str> = position.keys().copied().collect();
        for (name, resolver) in &self.resolvers {
            for dep in &resolver.filter_by {
                // Only resolvers listed in the evaluation order participate;
                // a dependency on an unlisted resolver can never be cached.
                if !ordered.contains(name.as_str()) {
                    continue;
                }
                match (position.get(name.as_str()), position.get(dep.source_param.as_str())) {
                    (Some(own), Some(parent)) if parent < own => {}
                    _ => {
                        return Err(Error::Configuration(format!(
                            "Resolver order does not place '{}' before its \
                             dependent '{name}'",
                            dep.source_param
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}
