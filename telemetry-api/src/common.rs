use std::borrow::{Borrow, Cow};
use std::cmp::Ordering;
use std::sync::Arc;
use std::{fmt, hash};

/// Cheaply cloneable string storage shared by [Key] and [StringValue].
#[derive(Clone)]
enum SharedStr {
    Static(&'static str),
    Owned(Box<str>),
    Shared(Arc<str>),
}

impl SharedStr {
    fn as_str(&self) -> &str {
        match self {
            SharedStr::Static(s) => s,
            SharedStr::Owned(s) => s,
            SharedStr::Shared(s) => s,
        }
    }
}

impl From<&'static str> for SharedStr {
    fn from(s: &'static str) -> Self {
        SharedStr::Static(s)
    }
}

impl From<String> for SharedStr {
    fn from(s: String) -> Self {
        SharedStr::Owned(s.into_boxed_str())
    }
}

impl From<Arc<str>> for SharedStr {
    fn from(s: Arc<str>) -> Self {
        SharedStr::Shared(s)
    }
}

impl From<Cow<'static, str>> for SharedStr {
    fn from(s: Cow<'static, str>) -> Self {
        match s {
            Cow::Borrowed(s) => SharedStr::Static(s),
            Cow::Owned(s) => s.into(),
        }
    }
}

impl PartialEq for SharedStr {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for SharedStr {}

impl PartialOrd for SharedStr {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SharedStr {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl hash::Hash for SharedStr {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        self.as_str().hash(state)
    }
}

impl fmt::Debug for SharedStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl fmt::Display for SharedStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! shared_str_conversions {
    ($target:ident) => {
        impl From<&'static str> for $target {
            fn from(s: &'static str) -> Self {
                $target(s.into())
            }
        }

        impl From<String> for $target {
            fn from(s: String) -> Self {
                $target(s.into())
            }
        }

        impl From<Arc<str>> for $target {
            fn from(s: Arc<str>) -> Self {
                $target(s.into())
            }
        }

        impl From<Cow<'static, str>> for $target {
            fn from(s: Cow<'static, str>) -> Self {
                $target(s.into())
            }
        }

        impl From<$target> for String {
            fn from(s: $target) -> Self {
                match s.0 {
                    SharedStr::Owned(s) => s.into_string(),
                    other => other.as_str().to_owned(),
                }
            }
        }

        impl AsRef<str> for $target {
            fn as_ref(&self) -> &str {
                self.0.as_str()
            }
        }

        impl fmt::Debug for $target {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl fmt::Display for $target {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

/// The key part of an attribute [KeyValue] pair.
///
/// Keys order and compare by their string contents, regardless of whether
/// they were built from a static, owned or reference-counted string.
#[non_exhaustive]
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(SharedStr);

impl Key {
    /// Create a new `Key`.
    ///
    /// ```
    /// use telemetry_api::Key;
    /// use std::sync::Arc;
    ///
    /// let k1 = Key::new("http.route");
    /// let k2 = Key::new(String::from("http.route"));
    /// let k3 = Key::new(Arc::<str>::from("http.route"));
    /// assert!(k1 == k2 && k2 == k3);
    /// ```
    pub fn new(value: impl Into<Key>) -> Self {
        value.into()
    }

    /// Create a new const `Key`.
    pub const fn from_static_str(value: &'static str) -> Self {
        Key(SharedStr::Static(value))
    }

    /// Returns the key name.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

shared_str_conversions!(Key);

impl Borrow<str> for Key {
    fn borrow(&self) -> &str {
        self.0.as_str()
    }
}

/// Wrapper for string attribute values.
#[non_exhaustive]
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StringValue(SharedStr);

impl StringValue {
    /// Returns the value as a string slice.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

shared_str_conversions!(StringValue);

/// A [Value::Array] containing homogeneous values.
#[non_exhaustive]
#[derive(Clone, Debug)]
pub enum Array {
    /// Array of bools
    Bool(Vec<bool>),
    /// Array of integers
    I64(Vec<i64>),
    /// Array of floats
    F64(Vec<f64>),
    /// Array of strings
    String(Vec<StringValue>),
}

impl PartialEq for Array {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Array::Bool(a), Array::Bool(b)) => a == b,
            (Array::I64(a), Array::I64(b)) => a == b,
            (Array::F64(a), Array::F64(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
            }
            (Array::String(a), Array::String(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Array {}

impl hash::Hash for Array {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        match self {
            Array::Bool(values) => (0u8, values).hash(state),
            Array::I64(values) => (1u8, values).hash(state),
            Array::F64(values) => {
                2u8.hash(state);
                values.len().hash(state);
                for v in values {
                    v.to_bits().hash(state);
                }
            }
            Array::String(values) => (3u8, values).hash(state),
        }
    }
}

impl fmt::Display for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join<T, F>(f: &mut fmt::Formatter<'_>, items: &[T], mut each: F) -> fmt::Result
        where
            F: FnMut(&mut fmt::Formatter<'_>, &T) -> fmt::Result,
        {
            f.write_str("[")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    f.write_str(",")?;
                }
                each(f, item)?;
            }
            f.write_str("]")
        }

        match self {
            Array::Bool(v) => join(f, v, |f, x| write!(f, "{x}")),
            Array::I64(v) => join(f, v, |f, x| write!(f, "{x}")),
            Array::F64(v) => join(f, v, |f, x| write!(f, "{x}")),
            Array::String(v) => join(f, v, |f, x| write!(f, "\"{x}\"")),
        }
    }
}

macro_rules! array_from {
    ($($t:ty => $variant:path),+ $(,)?) => {
        $(
            impl From<$t> for Array {
                fn from(values: $t) -> Self {
                    $variant(values)
                }
            }
        )+
    };
}

array_from!(
    Vec<bool> => Array::Bool,
    Vec<i64> => Array::I64,
    Vec<f64> => Array::F64,
    Vec<StringValue> => Array::String,
);

/// The value part of an attribute [KeyValue] pair.
///
/// Equality and hashing are structural. Floating point values compare by
/// their bit pattern so that a value can always be used as a lookup key,
/// including `NaN`.
#[non_exhaustive]
#[derive(Clone, Debug)]
pub enum Value {
    /// bool values
    Bool(bool),
    /// i64 values
    I64(i64),
    /// f64 values
    F64(f64),
    /// String values
    String(StringValue),
    /// Array of homogeneous values
    Array(Array),
}

impl Value {
    /// String representation of the `Value`.
    ///
    /// This will allocate iff the underlying value is not a `String`.
    pub fn as_str(&self) -> Cow<'_, str> {
        match self {
            Value::String(v) => Cow::Borrowed(v.as_str()),
            other => Cow::Owned(other.to_string()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            (Value::F64(a), Value::F64(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl hash::Hash for Value {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        match self {
            Value::Bool(v) => (0u8, v).hash(state),
            Value::I64(v) => (1u8, v).hash(state),
            Value::F64(v) => (2u8, v.to_bits()).hash(state),
            Value::String(v) => (3u8, v).hash(state),
            Value::Array(v) => (4u8, v).hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => v.fmt(f),
            Value::I64(v) => v.fmt(f),
            Value::F64(v) => v.fmt(f),
            Value::String(v) => f.write_str(v.as_str()),
            Value::Array(v) => v.fmt(f),
        }
    }
}

macro_rules! value_from {
    ($($t:ty => $variant:path),+ $(,)?) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    $variant(v.into())
                }
            }
        )+
    };
}

value_from!(
    bool => Value::Bool,
    i64 => Value::I64,
    f64 => Value::F64,
    StringValue => Value::String,
    Array => Value::Array,
    &'static str => Value::String,
    String => Value::String,
    Arc<str> => Value::String,
    Cow<'static, str> => Value::String,
);

/// A key-value pair describing an attribute.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub struct KeyValue {
    /// The attribute name
    pub key: Key,

    /// The attribute value
    pub value: Value,
}

impl KeyValue {
    /// Create a new `KeyValue` pair.
    pub fn new<K, V>(key: K, value: V) -> Self
    where
        K: Into<Key>,
        V: Into<Value>,
    {
        KeyValue {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Identity of the library or component that owns a group of instruments.
///
/// Scopes compare by name, version and schema URL only; scope attributes are
/// carried along for export but do not take part in identity.
#[derive(Debug, Default, Clone)]
#[non_exhaustive]
pub struct InstrumentationScope {
    name: Cow<'static, str>,
    version: Option<Cow<'static, str>>,
    schema_url: Option<Cow<'static, str>>,
    attributes: Vec<KeyValue>,
}

impl Eq for InstrumentationScope {}

impl PartialEq for InstrumentationScope {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.version == other.version
            && self.schema_url == other.schema_url
    }
}

impl hash::Hash for InstrumentationScope {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.version.hash(state);
        self.schema_url.hash(state);
    }
}

impl InstrumentationScope {
    /// Start building a scope with the given name.
    pub fn builder(name: impl Into<Cow<'static, str>>) -> InstrumentationScopeBuilder {
        InstrumentationScopeBuilder {
            scope: InstrumentationScope {
                name: name.into(),
                ..Default::default()
            },
        }
    }

    /// Returns the scope name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the scope version.
    #[inline]
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Returns the schema URL.
    #[inline]
    pub fn schema_url(&self) -> Option<&str> {
        self.schema_url.as_deref()
    }

    /// Returns the scope attributes.
    #[inline]
    pub fn attributes(&self) -> impl Iterator<Item = &KeyValue> {
        self.attributes.iter()
    }
}

/// Configuration options for [InstrumentationScope].
///
/// ```
/// use telemetry_api::{InstrumentationScope, KeyValue};
///
/// let scope = InstrumentationScope::builder("checkout")
///     .with_version("1.2.0")
///     .with_attributes([KeyValue::new("tier", "backend")])
///     .build();
/// assert_eq!(scope.version(), Some("1.2.0"));
/// ```
#[derive(Debug)]
pub struct InstrumentationScopeBuilder {
    scope: InstrumentationScope,
}

impl InstrumentationScopeBuilder {
    /// Configure the scope version.
    pub fn with_version(mut self, version: impl Into<Cow<'static, str>>) -> Self {
        self.scope.version = Some(version.into());
        self
    }

    /// Configure the schema URL.
    pub fn with_schema_url(mut self, schema_url: impl Into<Cow<'static, str>>) -> Self {
        self.scope.schema_url = Some(schema_url.into());
        self
    }

    /// Configure the scope attributes.
    pub fn with_attributes<I>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = KeyValue>,
    {
        self.scope.attributes = attributes.into_iter().collect();
        self
    }

    /// Create the [InstrumentationScope].
    pub fn build(self) -> InstrumentationScope {
        self.scope
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn hash_of<T: Hash>(t: &T) -> u64 {
        let mut hasher = DefaultHasher::new();
        t.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn key_storage_does_not_affect_identity() {
        let owned = Key::new(String::from("a"));
        let shared = Key::new(Arc::<str>::from("a"));
        let fixed = Key::from_static_str("a");
        assert_eq!(owned, shared);
        assert_eq!(shared, fixed);
        assert_eq!(hash_of(&owned), hash_of(&fixed));
    }

    #[test]
    fn float_values_compare_by_bits() {
        assert_eq!(Value::F64(f64::NAN), Value::F64(f64::NAN));
        assert_ne!(Value::F64(0.0), Value::F64(-0.0));
        assert_eq!(hash_of(&Value::F64(1.5)), hash_of(&Value::F64(1.5)));
    }

    #[test]
    fn values_of_different_types_differ() {
        assert_ne!(Value::I64(1), Value::F64(1.0));
        assert_ne!(Value::from("true"), Value::Bool(true));
        assert_ne!(
            Value::Array(Array::I64(vec![1])),
            Value::Array(Array::F64(vec![1.0]))
        );
    }

    #[test]
    fn value_display() {
        assert_eq!(Value::from("x").as_str(), "x");
        assert_eq!(Value::I64(-3).as_str(), "-3");
        let arr: Array = vec![StringValue::from("a"), StringValue::from("b")].into();
        assert_eq!(Value::Array(arr).to_string(), "[\"a\",\"b\"]");
    }

    #[test]
    fn scope_identity_ignores_attributes() {
        let a = InstrumentationScope::builder("lib")
            .with_version("1")
            .with_attributes([KeyValue::new("k", 1_i64)])
            .build();
        let b = InstrumentationScope::builder("lib").with_version("1").build();
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_ne!(a, InstrumentationScope::builder("lib").build());
    }
}
