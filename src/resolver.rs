//! Parameter resolution: user-facing identifiers to canonical API references.
//!
//! Desired-state parameters arrive as names, UUIDs, or already-canonical
//! URLs, possibly nested inside lists and objects. The resolver recursively
//! converts them into the references the API requires, honoring
//! inter-parameter dependency filters and caching every lookup so each
//! distinct `(parameter, value)` pair costs at most one network call per run.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::api::ApiClient;
use crate::descriptor::{ResolverDef, ResourceDescriptor};
use crate::error::{Error, Result};

/// Wire shape requested for resolved list items.
///
/// The same logical field may need different shapes: a create payload often
/// wants `{key: url}` objects, while a direct update-action payload wants
/// bare URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Create,
    Action,
}

/// Run-scoped cache of resolved API objects. Append-only: an entry, once
/// written, is never overwritten within a run.
#[derive(Debug, Default)]
pub struct ResolverCache {
    /// `(parameter, raw value)` -> resolved API object.
    by_value: HashMap<(String, String), Value>,
    /// Top-level `parameter` -> resolved API object, for dependency lookups.
    by_param: HashMap<String, Value>,
}

impl ResolverCache {
    pub fn lookup(&self, param: &str, raw: &str) -> Option<&Value> {
        self.by_value
            .get(&(param.to_string(), raw.to_string()))
    }

    pub fn lookup_param(&self, param: &str) -> Option<&Value> {
        self.by_param.get(param)
    }

    fn store(&mut self, param: &str, raw: &str, object: Value) {
        self.by_value
            .entry((param.to_string(), raw.to_string()))
            .or_insert(object);
    }

    fn store_param(&mut self, param: &str, object: Value) {
        self.by_param.entry(param.to_string()).or_insert(object);
    }

    pub fn contains_param(&self, param: &str) -> bool {
        self.by_param.contains_key(param)
    }
}

/// Resolves desired-state values into canonical API references.
pub struct ParameterResolver {
    client: ApiClient,
    descriptor: Arc<ResourceDescriptor>,
    /// Names of top-level parameters in this run's bag; only those get a
    /// bare-name cache entry (nested occurrences would collide otherwise).
    top_level: HashSet<String>,
    cache: ResolverCache,
}

impl ParameterResolver {
    pub fn new(
        client: ApiClient,
        descriptor: Arc<ResourceDescriptor>,
        top_level: HashSet<String>,
    ) -> Self {
        Self {
            client,
            descriptor,
            top_level,
            cache: ResolverCache::default(),
        }
    }

    pub fn cache(&self) -> &ResolverCache {
        &self.cache
    }

    /// Resolve a single identifier to its canonical URL.
    ///
    /// URLs pass through unchanged; UUIDs synthesize the detail URL directly
    /// with no network traffic; names issue an exact-match list query.
    pub async fn resolve_to_url(&mut self, param: &str, value: &str) -> Result<String> {
        if is_url(value) {
            return Ok(value.to_string());
        }
        let resolver = self.descriptor.resolver(param)?.clone();
        if is_uuid(value) {
            let detail = format!("{}/{value}/", resolver.url.trim_end_matches('/'));
            return self.client.absolute_url(&detail, None);
        }
        let object = self.lookup_object(param, value, &resolver).await?;
        object
            .get("url")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                Error::Lookup(format!(
                    "Resolved object for '{param}' has no 'url' field."
                ))
            })
    }

    /// Recursively resolve a desired-state value of any shape.
    ///
    /// Scalars with a configured resolver are looked up; objects resolve each
    /// key independently (cross-key dependencies are satisfied through the
    /// cache, populated in the descriptor's precomputed order); lists either
    /// resolve each scalar identifier (list resolvers) or recurse into
    /// nested objects.
    pub fn resolve<'a>(
        &'a mut self,
        param: &'a str,
        value: &'a Value,
        format: OutputFormat,
    ) -> BoxFuture<'a, Result<Value>> {
        async move {
            match value {
                Value::Object(map) => {
                    let mut resolved = Map::new();
                    for (key, nested) in map {
                        resolved.insert(key.clone(), self.resolve(key, nested, format).await?);
                    }
                    Ok(Value::Object(resolved))
                }
                Value::Array(items) => {
                    let is_list_resolver = self
                        .descriptor
                        .resolvers
                        .get(param)
                        .map(|r| r.is_list)
                        .unwrap_or(false);
                    let mut resolved = Vec::with_capacity(items.len());
                    if is_list_resolver {
                        // A list of scalar identifiers, each resolved on its own.
                        for item in items {
                            match item.as_str() {
                                Some(raw) => {
                                    resolved.push(self.resolve_single_value(param, raw, format).await?)
                                }
                                None => resolved.push(item.clone()),
                            }
                        }
                    } else {
                        // A list of nested objects; keep the parameter context.
                        for item in items {
                            resolved.push(self.resolve(param, item, format).await?);
                        }
                    }
                    Ok(Value::Array(resolved))
                }
                Value::String(raw) if self.descriptor.resolvers.contains_key(param) => {
                    self.resolve_single_value(param, raw, format).await
                }
                other => Ok(other.clone()),
            }
        }
        .boxed()
    }

    /// Resolve one scalar identifier, consulting and populating the cache.
    async fn resolve_single_value(
        &mut self,
        param: &str,
        raw: &str,
        format: OutputFormat,
    ) -> Result<Value> {
        let resolver = self.descriptor.resolver(param)?.clone();

        if is_url(raw) {
            return Ok(shape_output(&resolver, Value::String(raw.to_string()), format));
        }

        if let Some(cached) = self.cache.lookup(param, raw) {
            let url = object_url(param, cached)?;
            return Ok(shape_output(&resolver, Value::String(url), format));
        }

        let object = self.lookup_object(param, raw, &resolver).await?;
        let url = object_url(param, &object)?;
        Ok(shape_output(&resolver, Value::String(url), format))
    }

    /// Issue the actual lookup for one identifier and cache the result.
    async fn lookup_object(
        &mut self,
        param: &str,
        raw: &str,
        resolver: &ResolverDef,
    ) -> Result<Value> {
        if let Some(cached) = self.cache.lookup(param, raw) {
            return Ok(cached.clone());
        }

        let candidates = if is_uuid(raw) {
            // UUIDs fetch the detail endpoint directly; dependency filters
            // are unnecessary because the reference is already unambiguous.
            let detail = format!("{}/{raw}/", resolver.url.trim_end_matches('/'));
            let response = self.client.get(&detail).await?;
            match response.body {
                Value::Null => Vec::new(),
                Value::Array(items) => items,
                object => vec![object],
            }
        } else {
            let mut query = self.dependency_filters(param, resolver)?;
            query.push(("name_exact".to_string(), raw.to_string()));
            self.client.get_list(&resolver.url, &query).await?
        };

        if candidates.is_empty() {
            return Err(Error::Lookup(
                resolver.error_message.replace("{value}", raw),
            ));
        }
        if candidates.len() > 1 {
            // Server ordering decides which one wins; accepted nondeterminism.
            tracing::warn!(
                "Multiple resources found for '{}' for parameter '{}'. Using the first one.",
                raw,
                param
            );
        }

        let object = candidates.into_iter().next().unwrap_or(Value::Null);
        self.cache.store(param, raw, object.clone());
        if self.top_level.contains(param) {
            self.cache.store_param(param, object.clone());
        }
        Ok(object)
    }

    /// Build query filters from already-resolved parent parameters, e.g. an
    /// offering's `scope_uuid` becoming the `tenant_uuid` filter of a
    /// dependent subnet lookup.
    fn dependency_filters(
        &self,
        param: &str,
        resolver: &ResolverDef,
    ) -> Result<Vec<(String, String)>> {
        let mut query = Vec::with_capacity(resolver.filter_by.len());
        for dep in &resolver.filter_by {
            let parent = self.cache.lookup_param(&dep.source_param).ok_or_else(|| {
                Error::Configuration(format!(
                    "Resolver for '{param}' depends on '{}', which has not been resolved yet.",
                    dep.source_param
                ))
            })?;
            let value = parent.get(&dep.source_key).ok_or_else(|| {
                Error::Lookup(format!(
                    "Could not find key '{}' in the response for '{}'.",
                    dep.source_key, dep.source_param
                ))
            })?;
            let as_string = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            query.push((dep.target_key.clone(), as_string));
        }
        Ok(query)
    }

    /// For update flows: fetch the full objects behind relationship URLs
    /// already present on the current resource, seeding the cache so nested
    /// lookups can filter against the resource's existing parent context.
    /// Keys already cached or absent on the resource are skipped.
    pub async fn prime_cache_from_resource(
        &mut self,
        resource: &Value,
        keys: &[&str],
    ) -> Result<()> {
        for key in keys {
            if self.cache.contains_param(key) {
                continue;
            }
            let Some(url) = resource.get(*key).and_then(Value::as_str) else {
                continue;
            };
            let response = self.client.get(url).await?;
            if !response.body.is_null() {
                self.cache.store_param(key, response.body);
            }
        }
        Ok(())
    }
}

/// Shape a resolved URL per the resolver's configuration and the requested
/// output format: create payloads may want `{key: url}` items, action
/// payloads always want bare URLs.
fn shape_output(resolver: &ResolverDef, url: Value, format: OutputFormat) -> Value {
    if format == OutputFormat::Create && resolver.is_list {
        if let Some(key) = &resolver.list_item_key {
            let mut wrapped = Map::new();
            wrapped.insert(key.clone(), url);
            return Value::Object(wrapped);
        }
    }
    url
}

fn object_url(param: &str, object: &Value) -> Result<String> {
    object
        .get("url")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            Error::Lookup(format!(
                "Resolved object for '{param}' has no 'url' field."
            ))
        })
}

fn is_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

pub(crate) fn is_uuid(value: &str) -> bool {
    Uuid::parse_str(value).is_ok()
}
