//! Canonicalization of values for idempotent comparison.
//!
//! A plain equality check is not enough to decide whether a desired value
//! already matches the current resource: list order usually does not matter,
//! and list items are often rich objects whose identity is defined by a few
//! declared fields. This module produces a comparable canonical form for
//! both sides so the update engine can use a single `==`.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

/// The canonical, comparable form of a value.
///
/// `Set` is order-insensitive; `Raw` degrades to exact, order-sensitive
/// equality. The degradation is an accepted safe failure: at worst it causes
/// a redundant, harmless write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    Set(BTreeSet<String>),
    Raw(Value),
}

/// Normalize a value for comparison.
///
/// - Non-list values are returned unchanged (`Raw`).
/// - An empty list becomes the canonical empty set.
/// - A list of objects with `identity_keys` supplied becomes a set of
///   deterministic strings, each built from only the identity keys.
/// - A list of scalars becomes a set of canonical scalar strings.
/// - Anything else falls back to `Raw`.
pub fn normalize(value: &Value, identity_keys: &[String]) -> Normalized {
    let items = match value {
        Value::Array(items) => items,
        other => return Normalized::Raw(other.clone()),
    };

    if items.is_empty() {
        return Normalized::Set(BTreeSet::new());
    }

    let is_object_list = !identity_keys.is_empty() && items[0].is_object();
    if is_object_list {
        let mut canonical = BTreeSet::new();
        for item in items {
            let Some(object) = item.as_object() else {
                // Mixed list: no reliable order-insensitive form exists.
                return Normalized::Raw(value.clone());
            };
            // Only the declared identity keys participate; transient or
            // server-generated fields (uuid, status, ...) are ignored.
            let filtered: BTreeMap<&str, &Value> = identity_keys
                .iter()
                .map(|key| {
                    (
                        key.as_str(),
                        object.get(key).unwrap_or(&Value::Null),
                    )
                })
                .collect();
            // BTreeMap serialization is key-sorted and whitespace-free,
            // so equal identities always produce the same string.
            match serde_json::to_string(&filtered) {
                Ok(canonical_string) => {
                    canonical.insert(canonical_string);
                }
                Err(_) => return Normalized::Raw(value.clone()),
            }
        }
        return Normalized::Set(canonical);
    }

    // List of scalars: a set of their canonical encodings.
    if items.iter().all(|item| !item.is_object() && !item.is_array()) {
        let canonical = items.iter().map(scalar_string).collect();
        return Normalized::Set(canonical);
    }

    Normalized::Raw(value.clone())
}

/// Project a list of rich relationship objects down to their bare reference
/// URLs, for comparison against a desired value that resolved to plain URLs.
/// Items without a `url` field are dropped.
pub fn project_reference_list(items: &[Value]) -> Value {
    Value::Array(
        items
            .iter()
            .filter_map(|item| item.get("url"))
            .filter(|url| !url.is_null())
            .cloned()
            .collect(),
    )
}

/// True when the desired value is a list of scalar references but the
/// current value is a list of rich objects: the shape mismatch that
/// [`project_reference_list`] corrects before normalization.
pub fn has_representation_mismatch(desired: &Value, current: &Value) -> bool {
    let desired_simple = matches!(
        desired.as_array(),
        Some(items) if !items.is_empty() && !items[0].is_object()
    );
    let current_rich = matches!(
        current.as_array(),
        Some(items) if !items.is_empty() && items[0].is_object()
    );
    desired_simple && current_rich
}

/// Type-distinct scalar encoding: the string `"1"` and the number `1` must
/// never collide, or a needed write would be skipped as a false match.
fn scalar_string(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn non_list_values_pass_through() {
        assert_eq!(
            normalize(&json!("hello"), &[]),
            Normalized::Raw(json!("hello"))
        );
        assert_eq!(normalize(&json!(42), &[]), Normalized::Raw(json!(42)));
        assert_eq!(
            normalize(&json!({"a": 1}), &[]),
            Normalized::Raw(json!({"a": 1}))
        );
    }

    #[test]
    fn empty_list_is_canonical_empty_set() {
        assert_eq!(normalize(&json!([]), &[]), Normalized::Set(BTreeSet::new()));
        assert_eq!(
            normalize(&json!([]), &keys(&["a"])),
            Normalized::Set(BTreeSet::new())
        );
    }

    #[test]
    fn scalar_lists_compare_order_insensitively() {
        assert_eq!(
            normalize(&json!(["a", "b"]), &[]),
            normalize(&json!(["b", "a"]), &[])
        );
        assert_ne!(
            normalize(&json!(["a", "b"]), &[]),
            normalize(&json!(["a", "c"]), &[])
        );
    }

    #[test]
    fn object_lists_compare_by_identity_keys_ignoring_key_order() {
        let identity = keys(&["a", "b"]);
        assert_eq!(
            normalize(&json!([{"a": 1, "b": 2}]), &identity),
            normalize(&json!([{"b": 2, "a": 1}]), &identity)
        );
    }

    #[test]
    fn object_lists_ignore_fields_outside_identity() {
        let identity = keys(&["subnet"]);
        let desired = json!([{"subnet": "https://api/subnets/s1/"}]);
        let current = json!([
            {"subnet": "https://api/subnets/s1/", "uuid": "p1", "state": "OK"}
        ]);
        assert_eq!(normalize(&desired, &identity), normalize(&current, &identity));
    }

    #[test]
    fn object_list_order_is_irrelevant() {
        let identity = keys(&["protocol", "from_port"]);
        let a = json!([
            {"protocol": "tcp", "from_port": 22},
            {"protocol": "udp", "from_port": 53}
        ]);
        let b = json!([
            {"protocol": "udp", "from_port": 53},
            {"protocol": "tcp", "from_port": 22}
        ]);
        assert_eq!(normalize(&a, &identity), normalize(&b, &identity));
    }

    #[test]
    fn scalar_sets_distinguish_value_types() {
        assert_ne!(normalize(&json!(["1"]), &[]), normalize(&json!([1]), &[]));
        assert_ne!(
            normalize(&json!(["true"]), &[]),
            normalize(&json!([true]), &[])
        );
        assert_eq!(
            normalize(&json!(["1", 2]), &[]),
            normalize(&json!([2, "1"]), &[])
        );
    }

    #[test]
    fn mixed_list_without_keys_degrades_to_raw() {
        let value = json!([{"a": 1}, "b"]);
        assert_eq!(normalize(&value, &[]), Normalized::Raw(value.clone()));
    }

    #[test]
    fn object_list_without_keys_degrades_to_raw() {
        let value = json!([{"a": 1}]);
        assert_eq!(normalize(&value, &[]), Normalized::Raw(value.clone()));
    }

    #[test]
    fn projection_extracts_bare_urls() {
        let items = vec![
            json!({"url": "u1", "name": "one"}),
            json!({"url": "u2", "name": "two"}),
            json!({"name": "no-url"}),
        ];
        assert_eq!(project_reference_list(&items), json!(["u1", "u2"]));
    }

    #[test]
    fn mismatch_detection() {
        let desired = json!(["u1", "u2"]);
        let current = json!([{"url": "u1"}, {"url": "u2"}]);
        assert!(has_representation_mismatch(&desired, &current));
        assert!(!has_representation_mismatch(&current, &desired));
        assert!(!has_representation_mismatch(&json!([]), &current));
        assert!(!has_representation_mismatch(&desired, &json!("x")));
    }

    #[test]
    fn mismatched_shapes_compare_equal_after_projection() {
        let desired = json!(["u1", "u2"]);
        let current = json!([{"url": "u2"}, {"url": "u1"}]);
        let projected = project_reference_list(current.as_array().unwrap());
        assert_eq!(normalize(&desired, &[]), normalize(&projected, &[]));
    }
}
