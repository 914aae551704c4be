//! The command abstraction: atomic units of mutation.
//!
//! Planning decides *what* must change and encodes each change as a command;
//! execution replays the plan against the API. A command pairs exactly one
//! mutating call with a pure diff view, so check mode can report the same
//! diff that a real run would apply.

use std::collections::HashMap;

use reqwest::Method;
use serde_json::{json, Map, Value};

use crate::api::ApiClient;
use crate::error::Result;

/// One detected difference on a simple updatable field.
#[derive(Debug, Clone)]
pub struct FieldChange {
    pub param: String,
    pub old: Value,
    pub new: Value,
}

/// An atomic unit of mutation, produced during planning and consumed at most
/// once during execution.
#[derive(Debug, Clone)]
pub enum Command {
    /// POST a fully resolved attribute set to a creation endpoint.
    Create {
        description: String,
        path: String,
        path_params: HashMap<String, String>,
        payload: Value,
    },
    /// PATCH only the changed simple fields.
    Update {
        description: String,
        path: String,
        path_params: HashMap<String, String>,
        changes: Vec<FieldChange>,
    },
    /// DELETE, or POST when a termination payload is supplied.
    Delete {
        description: String,
        path: String,
        path_params: HashMap<String, String>,
        payload: Option<Value>,
        old_attributes: Value,
    },
    /// POST to a dedicated action endpoint. The response status matters:
    /// 202 means the change is still in flight.
    Action {
        description: String,
        path: String,
        path_params: HashMap<String, String>,
        payload: Value,
        param: String,
        old: Value,
        new: Value,
    },
}

/// What a command's execution produced.
#[derive(Debug)]
pub struct CommandOutcome {
    /// The server's representation of the resource, when the call returns one.
    pub resource: Option<Value>,
    pub status: u16,
}

impl Command {
    /// The HTTP method this command will use. Deletions default to POST when
    /// a payload is present (marketplace-style termination), DELETE otherwise.
    pub fn method(&self) -> Method {
        match self {
            Command::Create { .. } => Method::POST,
            Command::Update { .. } => Method::PATCH,
            Command::Delete { payload, .. } => {
                if payload.is_some() {
                    Method::POST
                } else {
                    Method::DELETE
                }
            }
            Command::Action { .. } => Method::POST,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Command::Create { description, .. }
            | Command::Update { description, .. }
            | Command::Delete { description, .. }
            | Command::Action { description, .. } => description,
        }
    }

    /// A pure view of the change this command represents. Callable without
    /// executing, and identical to what execution will apply.
    pub fn diff(&self) -> Value {
        match self {
            Command::Create { payload, .. } => json!({
                "state": "Resource will be created.",
                "new_attributes": payload,
            }),
            Command::Update { changes, .. } => json!({
                "updated_attributes": changes
                    .iter()
                    .map(|change| {
                        json!({
                            "param": change.param,
                            "old": change.old,
                            "new": change.new,
                        })
                    })
                    .collect::<Vec<_>>(),
            }),
            Command::Delete {
                old_attributes,
                payload,
                ..
            } => {
                let mut diff = Map::new();
                diff.insert(
                    "state".to_string(),
                    Value::String("Resource will be deleted.".to_string()),
                );
                diff.insert("old_attributes".to_string(), old_attributes.clone());
                if let Some(payload) = payload {
                    diff.insert("termination_options".to_string(), payload.clone());
                }
                Value::Object(diff)
            }
            Command::Action {
                param, old, new, ..
            } => json!({
                "action": param,
                "old": old,
                "new": new,
            }),
        }
    }

    /// The reported command-trail entry: what will run, where, and the diff.
    pub fn trail_entry(&self, client: &ApiClient) -> Result<Value> {
        let (path, path_params) = self.target();
        Ok(json!({
            "method": self.method().as_str(),
            "url": client.absolute_url(path, Some(path_params))?,
            "description": self.description(),
            "diff": self.diff(),
        }))
    }

    fn target(&self) -> (&str, &HashMap<String, String>) {
        match self {
            Command::Create { path, path_params, .. }
            | Command::Update { path, path_params, .. }
            | Command::Delete { path, path_params, .. }
            | Command::Action { path, path_params, .. } => (path, path_params),
        }
    }

    /// Execute the command. This is the only place a mutating call is made.
    pub async fn execute(&self, client: &ApiClient) -> Result<CommandOutcome> {
        match self {
            Command::Create {
                path,
                path_params,
                payload,
                ..
            } => {
                let response = client.post(path, Some(path_params), payload).await?;
                Ok(CommandOutcome {
                    status: response.status,
                    resource: Some(response.body),
                })
            }
            Command::Update {
                path,
                path_params,
                changes,
                ..
            } => {
                // Only the new values go on the wire; old values exist for diffing.
                let mut payload = Map::new();
                for change in changes {
                    payload.insert(change.param.clone(), change.new.clone());
                }
                let response = client
                    .request(
                        Method::PATCH,
                        path,
                        Some(path_params),
                        None,
                        Some(&Value::Object(payload)),
                    )
                    .await?;
                Ok(CommandOutcome {
                    status: response.status,
                    resource: Some(response.body),
                })
            }
            Command::Delete {
                path,
                path_params,
                payload,
                ..
            } => {
                let response = client
                    .request(
                        self.method(),
                        path,
                        Some(path_params),
                        None,
                        payload.as_ref(),
                    )
                    .await?;
                Ok(CommandOutcome {
                    status: response.status,
                    resource: None,
                })
            }
            Command::Action {
                path,
                path_params,
                payload,
                ..
            } => {
                let response = client.post(path, Some(path_params), payload).await?;
                Ok(CommandOutcome {
                    status: response.status,
                    resource: None,
                })
            }
        }
    }
}
