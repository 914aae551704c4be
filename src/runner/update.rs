//! The shared update engine: simple-field diff plus action diff.
//!
//! Both runner flavors update an existing resource the same way, in two
//! ordered phases. Phase one collects every differing simple field into a
//! single PATCH. Phase two walks the configured update actions in descriptor
//! order and runs the resolve -> normalize -> compare -> execute workflow
//! for each, handling asynchronous (202) responses and the final re-fetch.

use std::collections::HashMap;

use serde_json::Value;

use crate::command::{Command, FieldChange};
use crate::error::{Error, Result};
use crate::normalize::{has_representation_mismatch, normalize, project_reference_list};
use crate::poller::Poller;
use crate::resolver::OutputFormat;

use super::Engine;

/// Build the single PATCH command covering every simple field whose desired
/// value differs from the current resource. `None` when nothing differs or
/// no update endpoint is configured.
pub fn plan_simple_update(engine: &Engine) -> Result<Option<Command>> {
    let Some(resource) = &engine.resource else {
        return Ok(None);
    };
    let Some(update_path) = &engine.descriptor.update_path else {
        return Ok(None);
    };
    if engine.descriptor.update_fields.is_empty() {
        return Ok(None);
    }

    let mut changes = Vec::new();
    for field in &engine.descriptor.update_fields {
        // Omitted parameters never drive updates; a field is only considered
        // when the caller supplied a value and it differs from the server's.
        let Some(desired) = engine.params.get(field) else {
            continue;
        };
        let current = resource.get(field).cloned().unwrap_or(Value::Null);
        if *desired != current {
            changes.push(FieldChange {
                param: field.clone(),
                old: current,
                new: desired.clone(),
            });
        }
    }

    if changes.is_empty() {
        return Ok(None);
    }

    Ok(Some(Command::Update {
        description: format!("Update attributes of {}", engine.descriptor.resource_type),
        path: update_path.clone(),
        path_params: uuid_path_params(engine)?,
        changes,
    }))
}

/// Build one action command per configured update action whose normalized
/// desired value differs from the normalized current value. Actions are
/// considered in the descriptor's fixed order.
pub async fn plan_action_updates(
    engine: &mut Engine,
    format: OutputFormat,
) -> Result<Vec<Command>> {
    let Some(resource) = engine.resource.clone() else {
        return Ok(Vec::new());
    };
    let descriptor = engine.descriptor.clone();
    let path_params = uuid_path_params(engine)?;

    let mut commands = Vec::new();
    for action in &descriptor.update_actions {
        let Some(desired) = engine.params.get(&action.param).cloned() else {
            continue;
        };

        let mut resolved = engine.resolver.resolve(&action.param, &desired, format).await?;
        apply_defaults(&mut resolved, &action.defaults);

        let current = resource
            .get(&action.compare_key)
            .cloned()
            .unwrap_or(Value::Null);

        // When the desired side resolved to bare references but the server
        // reports rich objects, project the server list down to references
        // first; otherwise equal states would be reported as different.
        let normalized_old = if has_representation_mismatch(&resolved, &current) {
            let items = current.as_array().cloned().unwrap_or_default();
            normalize(&project_reference_list(&items), &[])
        } else {
            normalize(&current, &action.idempotency_keys)
        };
        let normalized_new = normalize(&resolved, &action.idempotency_keys);

        if normalized_new == normalized_old {
            continue;
        }

        // Some endpoints take the raw payload, others `{param: payload}`.
        let payload = if action.wrap_in_object {
            let mut wrapped = serde_json::Map::new();
            wrapped.insert(action.param.clone(), resolved.clone());
            Value::Object(wrapped)
        } else {
            resolved.clone()
        };

        commands.push(Command::Action {
            description: format!(
                "Execute action '{}' on {}",
                action.param, descriptor.resource_type
            ),
            path: action.path.clone(),
            path_params: path_params.clone(),
            payload,
            param: action.param.clone(),
            old: current,
            new: resolved,
        });
    }

    Ok(commands)
}

/// Run both update phases against the API.
///
/// Simple fields go first, in one PATCH; the response is merged into the
/// local snapshot. Each action POST is then executed in order: a 202 with
/// waiting enabled polls the resource to a stable state, any other success
/// marks the snapshot stale. One final re-fetch happens after the action
/// loop, not per action.
pub async fn execute_update(engine: &mut Engine, format: OutputFormat) -> Result<()> {
    if let Some(command) = plan_simple_update(engine)? {
        let outcome = engine.execute(command).await?;
        engine.changed = true;
        if let Some(Value::Object(updated)) = outcome.resource {
            if let Some(Value::Object(snapshot)) = engine.resource.as_mut() {
                for (key, value) in updated {
                    snapshot.insert(key, value);
                }
            }
        }
    }

    let commands = plan_action_updates(engine, format).await?;
    let mut needs_refetch = false;

    for command in commands {
        let outcome = engine.execute(command).await?;
        engine.changed = true;

        let wait = engine.descriptor.wait_config.clone().filter(|_| engine.params.wait());
        match (outcome.status, wait) {
            (202, Some(wait)) => {
                let uuid = engine.resource_uuid()?;
                let detail = engine.descriptor.resource_detail_path.clone().ok_or_else(|| {
                    Error::Configuration(
                        "'resource_detail_path' is required in the descriptor for waiting".into(),
                    )
                })?;
                let poller = Poller::new(
                    &engine.client,
                    engine.params.interval(),
                    engine.params.timeout(),
                );
                engine.resource = poller.wait_for_resource_state(&detail, &uuid, &wait).await?;
            }
            _ => needs_refetch = true,
        }
    }

    if needs_refetch {
        engine.check_existence().await?;
    }
    Ok(())
}

/// Fill absent keys of object payload items with the action's defaults.
fn apply_defaults(payload: &mut Value, defaults: &HashMap<String, Value>) {
    if defaults.is_empty() {
        return;
    }
    match payload {
        Value::Array(items) => {
            for item in items {
                if let Value::Object(object) = item {
                    for (key, value) in defaults {
                        object.entry(key.clone()).or_insert_with(|| value.clone());
                    }
                }
            }
        }
        Value::Object(object) => {
            for (key, value) in defaults {
                object.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        _ => {}
    }
}

fn uuid_path_params(engine: &Engine) -> Result<HashMap<String, String>> {
    let mut params = HashMap::new();
    params.insert("uuid".to_string(), engine.resource_uuid()?);
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_fill_absent_keys_only() {
        let mut defaults = HashMap::new();
        defaults.insert("ethertype".to_string(), json!("IPv4"));

        let mut payload = json!([
            {"protocol": "tcp"},
            {"protocol": "udp", "ethertype": "IPv6"}
        ]);
        apply_defaults(&mut payload, &defaults);
        assert_eq!(payload[0]["ethertype"], "IPv4");
        assert_eq!(payload[1]["ethertype"], "IPv6");
    }

    #[test]
    fn defaults_leave_scalars_alone() {
        let mut defaults = HashMap::new();
        defaults.insert("x".to_string(), json!(1));
        let mut payload = json!("scalar");
        apply_defaults(&mut payload, &defaults);
        assert_eq!(payload, json!("scalar"));
    }
}
