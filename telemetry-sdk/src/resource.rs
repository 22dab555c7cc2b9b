//! The entity producing telemetry.
//!
//! A [Resource] is an immutable set of attributes describing the process
//! (service name, version, deployment) that every collected batch of metrics
//! is attached to.
use std::borrow::Cow;
use std::collections::HashMap;
use std::env;
use std::sync::Arc;

use telemetry_api::{Key, KeyValue, Value};

const OTEL_RESOURCE_ATTRIBUTES: &str = "OTEL_RESOURCE_ATTRIBUTES";
const OTEL_SERVICE_NAME: &str = "OTEL_SERVICE_NAME";

pub(crate) const SERVICE_NAME: &str = "service.name";
const UNKNOWN_SERVICE: &str = "unknown_service";

#[derive(Debug, PartialEq)]
struct ResourceInner {
    attrs: HashMap<Key, Value>,
    schema_url: Option<Cow<'static, str>>,
}

/// An immutable representation of the entity producing telemetry as
/// attributes. Cloning is cheap.
#[derive(Clone, Debug, PartialEq)]
pub struct Resource {
    inner: Arc<ResourceInner>,
}

impl Default for Resource {
    fn default() -> Self {
        Resource::builder().build()
    }
}

impl Resource {
    /// Builder seeded with the attributes found in the environment.
    ///
    /// `OTEL_RESOURCE_ATTRIBUTES` is read as a `key1=value1,key2=value2`
    /// list. `service.name` comes from `OTEL_SERVICE_NAME` when set and not
    /// empty, then from `OTEL_RESOURCE_ATTRIBUTES`, and falls back to
    /// `unknown_service`.
    pub fn builder() -> ResourceBuilder {
        let from_env = env::var(OTEL_RESOURCE_ATTRIBUTES)
            .ok()
            .map(|s| parse_attribute_list(&s))
            .unwrap_or_default();
        let service_name = env::var(OTEL_SERVICE_NAME)
            .ok()
            .filter(|s| !s.is_empty())
            .map(Value::from)
            .or_else(|| {
                from_env
                    .iter()
                    .find(|kv| kv.key.as_str() == SERVICE_NAME)
                    .map(|kv| kv.value.clone())
            })
            .unwrap_or_else(|| UNKNOWN_SERVICE.into());

        Resource::builder_empty()
            .with_attributes(from_env)
            .with_attribute(KeyValue::new(SERVICE_NAME, service_name))
    }

    /// Builder with no attributes at all.
    pub fn builder_empty() -> ResourceBuilder {
        ResourceBuilder {
            attrs: HashMap::new(),
            schema_url: None,
        }
    }

    /// Returns the schema URL, if any.
    pub fn schema_url(&self) -> Option<&str> {
        self.inner.schema_url.as_deref()
    }

    /// Number of attributes.
    pub fn len(&self) -> usize {
        self.inner.attrs.len()
    }

    /// Returns true if the resource has no attributes.
    pub fn is_empty(&self) -> bool {
        self.inner.attrs.is_empty()
    }

    /// Iterate over the attributes. Order is unspecified.
    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Value)> {
        self.inner.attrs.iter()
    }

    /// Returns the value for `key`, if present.
    pub fn get(&self, key: &Key) -> Option<Value> {
        self.inner.attrs.get(key).cloned()
    }
}

fn parse_attribute_list(s: &str) -> Vec<KeyValue> {
    s.split_terminator(',')
        .filter_map(|entry| {
            let (key, value) = entry.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some(KeyValue::new(key.to_owned(), value.trim().to_owned()))
        })
        .collect()
}

/// Configuration for a [Resource]. Later attributes override earlier ones
/// with the same key.
#[derive(Debug)]
pub struct ResourceBuilder {
    attrs: HashMap<Key, Value>,
    schema_url: Option<Cow<'static, str>>,
}

impl ResourceBuilder {
    /// Add a single attribute.
    pub fn with_attribute(mut self, kv: KeyValue) -> Self {
        self.attrs.insert(kv.key, kv.value);
        self
    }

    /// Add several attributes.
    pub fn with_attributes<T: IntoIterator<Item = KeyValue>>(mut self, kvs: T) -> Self {
        self.attrs
            .extend(kvs.into_iter().map(|kv| (kv.key, kv.value)));
        self
    }

    /// Set `service.name`.
    pub fn with_service_name(self, name: impl Into<Value>) -> Self {
        self.with_attribute(KeyValue::new(SERVICE_NAME, name.into()))
    }

    /// Set the schema URL.
    pub fn with_schema_url(mut self, schema_url: impl Into<Cow<'static, str>>) -> Self {
        self.schema_url = Some(schema_url.into());
        self
    }

    /// Create the [Resource].
    pub fn build(self) -> Resource {
        Resource {
            inner: Arc::new(ResourceInner {
                attrs: self.attrs,
                schema_url: self.schema_url,
            }),
        }
    }
}
