use std::{borrow::Cow, collections::HashSet, sync::Arc};

use telemetry_api::{InstrumentationScope, Key};

use super::aggregation::Aggregation;
use super::error::{MetricError, MetricResult};
use super::meter::{validate_instrument_name, validate_instrument_unit};

/// The identifier of a group of instruments that all perform the same function.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum InstrumentKind {
    /// Identifies a group of instruments that record increasing values synchronously
    /// with the code path they are measuring.
    Counter,
    /// A group of instruments that record increasing and decreasing values
    /// synchronously with the code path they are measuring.
    UpDownCounter,
    /// A group of instruments that record a distribution of values synchronously with
    /// the code path they are measuring.
    Histogram,
    /// A group of instruments that record increasing values in an asynchronous
    /// callback.
    ObservableCounter,
    /// A group of instruments that record increasing and decreasing values in an
    /// asynchronous callback.
    ObservableUpDownCounter,
    /// A group of instruments that record current values in an asynchronous callback.
    ObservableGauge,
}

impl InstrumentKind {
    /// Whether the instrument only ever records non-negative increments.
    pub(crate) fn is_monotonic(&self) -> bool {
        matches!(
            self,
            InstrumentKind::Counter | InstrumentKind::Histogram | InstrumentKind::ObservableCounter
        )
    }
}

/// The numeric kind an instrument is declared with.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum ValueType {
    /// Whole numbers. Fractional input is truncated toward zero.
    Int,
    /// Floating point numbers.
    Double,
}

/// The immutable identity of a metric stream: what it is called, what it
/// measures and how values are recorded.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct InstrumentDescriptor {
    pub(crate) name: Cow<'static, str>,
    pub(crate) description: Cow<'static, str>,
    pub(crate) unit: Cow<'static, str>,
    pub(crate) kind: InstrumentKind,
    pub(crate) value_type: ValueType,
}

impl InstrumentDescriptor {
    /// Stream name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human readable description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Unit of measurement.
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Instrument kind.
    pub fn kind(&self) -> InstrumentKind {
        self.kind
    }

    /// Declared numeric kind.
    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    /// Registration identity: instrument names are case-insensitive ASCII.
    pub(crate) fn normalized_name(&self) -> String {
        self.name.to_ascii_lowercase()
    }

    /// Two descriptors may share one storage when everything but the
    /// description matches.
    pub(crate) fn is_compatible_with(&self, other: &InstrumentDescriptor) -> bool {
        self.normalized_name() == other.normalized_name()
            && self.kind == other.kind
            && self.value_type == other.value_type
            && self.unit == other.unit
    }
}

/// Describes an instrument at creation time, and doubles as the selection
/// criteria of a view.
///
/// As criteria, every field left unset matches anything and the name may
/// contain `*` and `?` wildcards.
///
/// ```rust
/// use telemetry_sdk::metrics::{Instrument, Stream};
///
/// let cap_latency = |i: &Instrument| {
///     if i.instrument_name() == "http.server.duration" {
///         Stream::builder().with_cardinality_limit(100).build().ok()
///     } else {
///         None
///     }
/// };
/// # let _ = cap_latency;
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct Instrument {
    pub(crate) name: Cow<'static, str>,
    pub(crate) description: Cow<'static, str>,
    pub(crate) kind: Option<InstrumentKind>,
    pub(crate) unit: Cow<'static, str>,
    pub(crate) scope: InstrumentationScope,
}

impl Instrument {
    /// Empty criteria matching every instrument.
    pub fn new() -> Self {
        Instrument::default()
    }

    /// Set the name (or name pattern) to match.
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the instrument kind to match.
    pub fn kind(mut self, kind: InstrumentKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Set the unit to match.
    pub fn unit(mut self, unit: impl Into<Cow<'static, str>>) -> Self {
        self.unit = unit.into();
        self
    }

    /// Set the scope (meter) to match. Only the scope name is compared.
    pub fn scope(mut self, scope: InstrumentationScope) -> Self {
        self.scope = scope;
        self
    }

    /// Instrument name.
    pub fn instrument_name(&self) -> &str {
        &self.name
    }

    /// Instrument description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Instrument kind, when set.
    pub fn instrument_kind(&self) -> Option<InstrumentKind> {
        self.kind
    }

    /// Instrument unit.
    pub fn instrument_unit(&self) -> &str {
        &self.unit
    }

    /// The scope the instrument was created in.
    pub fn instrument_scope(&self) -> &InstrumentationScope {
        &self.scope
    }

    /// Whether this value is empty criteria.
    pub(crate) fn is_empty(&self) -> bool {
        self.name.is_empty()
            && self.description.is_empty()
            && self.kind.is_none()
            && self.unit.is_empty()
            && self.scope == InstrumentationScope::default()
    }

    pub(crate) fn from_descriptor(
        descriptor: &InstrumentDescriptor,
        scope: &InstrumentationScope,
    ) -> Self {
        Instrument {
            name: descriptor.name.clone(),
            description: descriptor.description.clone(),
            kind: Some(descriptor.kind),
            unit: descriptor.unit.clone(),
            scope: scope.clone(),
        }
    }
}

/// Describes the stream of data an instrument produces, and doubles as the
/// mask a view applies to a matching instrument.
///
/// Fields left unset keep the instrument's own value.
///
/// ```
/// use telemetry_sdk::metrics::{Aggregation, Stream};
///
/// let stream = Stream::builder()
///     .with_name("request_latency")
///     .with_aggregation(Aggregation::ExplicitBucketHistogram {
///         boundaries: vec![0.0, 10.0, 100.0],
///         record_min_max: false,
///     })
///     .with_cardinality_limit(100)
///     .build()
///     .unwrap();
/// # let _ = stream;
/// ```
#[derive(Default, Debug, Clone)]
pub struct Stream {
    pub(crate) name: Option<Cow<'static, str>>,
    pub(crate) description: Option<Cow<'static, str>>,
    pub(crate) aggregation: Option<Aggregation>,
    /// Attributes with keys outside this set are dropped before aggregation.
    /// An empty set drops every attribute; `None` keeps them all.
    pub(crate) allowed_attribute_keys: Option<Arc<HashSet<Key>>>,
    pub(crate) cardinality_limit: Option<usize>,
}

impl Stream {
    /// Create a new stream builder with default values.
    pub fn builder() -> StreamBuilder {
        StreamBuilder::default()
    }
}

/// Configuration for a [Stream].
#[derive(Default, Debug)]
pub struct StreamBuilder {
    stream: Stream,
}

impl StreamBuilder {
    /// Rename the stream.
    pub fn with_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.stream.name = Some(name.into());
        self
    }

    /// Replace the stream description.
    pub fn with_description(mut self, description: impl Into<Cow<'static, str>>) -> Self {
        self.stream.description = Some(description.into());
        self
    }

    /// Override the aggregation chosen for the instrument kind.
    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.stream.aggregation = Some(aggregation);
        self
    }

    /// Keep only attributes with these keys.
    pub fn with_allowed_attribute_keys(mut self, keys: impl IntoIterator<Item = Key>) -> Self {
        self.stream.allowed_attribute_keys = Some(Arc::new(keys.into_iter().collect()));
        self
    }

    /// Bound the number of distinct attribute sets per collection window.
    /// Defaults to 2000.
    pub fn with_cardinality_limit(mut self, limit: usize) -> Self {
        self.stream.cardinality_limit = Some(limit);
        self
    }

    /// Validate and build the [Stream].
    pub fn build(self) -> MetricResult<Stream> {
        if let Some(name) = &self.stream.name {
            validate_instrument_name(name)?;
        }
        if self.stream.cardinality_limit == Some(0) {
            return Err(MetricError::Config(
                "cardinality limit must be greater than 0".into(),
            ));
        }
        if let Some(aggregation) = &self.stream.aggregation {
            aggregation.validate()?;
        }
        Ok(self.stream)
    }
}

/// Validate a unit override alongside a stream. Units are not part of the
/// stream mask, but views built from criteria with a unit are checked.
pub(crate) fn validate_criteria(criteria: &Instrument) -> MetricResult<()> {
    validate_instrument_unit(&criteria.unit)
}
