//! Instrument handles and their builders.
use std::borrow::Cow;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use telemetry_api::{otel_warn, KeyValue};

use super::attributes::AttributeSet;
use super::instrument::{InstrumentDescriptor, InstrumentKind, ValueType};
use super::internal::{Number, ObservableCore, Registration, SyncWritable};
use super::meter::{validate_instrument_name, validate_instrument_unit, Meter};
use super::MetricResult;

/// An SDK implemented instrument that records measurements via callback.
pub trait AsyncInstrument<T>: Send + Sync {
    /// Observes the state of the instrument.
    ///
    /// It is only valid to call this within a callback. Observing the same
    /// attributes twice in one callback keeps the last value.
    fn observe(&self, measurement: T, attributes: &[KeyValue]);
}

/// A function registered with an observable instrument that makes
/// observations for it.
///
/// The function needs to complete in a finite amount of time.
pub type Callback<T> = Box<dyn Fn(&dyn AsyncInstrument<T>) + Send + Sync>;

/// An observable instrument that can be named in
/// [Meter::register_callback].
pub trait ObservableInstrument {
    /// Identity of the instrument across meters, `0` for instruments that
    /// record nothing.
    #[doc(hidden)]
    fn observable_id(&self) -> u64;
}

/// An observable instrument recording values of type `T`.
pub trait Observable<T>: ObservableInstrument {}

/// Corrects or rejects one measurement before it reaches storage.
///
/// Negative values are dropped for monotonic instruments, and fractional
/// values of integer instruments are truncated toward zero. Both warn.
pub(crate) fn validate_measurement<T: Number>(
    descriptor: &InstrumentDescriptor,
    value: T,
) -> Option<T> {
    if descriptor.kind.is_monotonic() && value.is_negative() {
        otel_warn!(
            name: "Instrument.NegativeValue",
            instrument = descriptor.name().to_string(),
            value = value.to_string(),
            message = "Measurement dropped: monotonic instruments only accept non-negative values"
        );
        return None;
    }
    if descriptor.value_type == ValueType::Int {
        if let Some(truncated) = value.truncated() {
            otel_warn!(
                name: "Instrument.NonIntegerValue",
                instrument = descriptor.name().to_string(),
                value = value.to_string(),
                recorded = truncated.to_string()
            );
            return Some(truncated);
        }
    }
    Some(value)
}

/// Name, description, unit and value type as given to a builder.
#[derive(Debug)]
pub(crate) struct InstrumentConfig {
    name: Cow<'static, str>,
    description: Option<Cow<'static, str>>,
    unit: Option<Cow<'static, str>>,
    value_type: Option<ValueType>,
}

impl InstrumentConfig {
    fn new(name: Cow<'static, str>) -> Self {
        InstrumentConfig {
            name,
            description: None,
            unit: None,
            value_type: None,
        }
    }

    /// Validates the name and unit and builds the descriptor of a `T`
    /// instrument of `kind`.
    pub(crate) fn into_descriptor<T: Number>(
        self,
        kind: InstrumentKind,
    ) -> MetricResult<InstrumentDescriptor> {
        validate_instrument_name(&self.name)?;
        let unit = self.unit.unwrap_or_default();
        validate_instrument_unit(&unit)?;
        Ok(InstrumentDescriptor {
            name: self.name,
            description: self.description.unwrap_or_default(),
            unit,
            kind,
            value_type: self.value_type.unwrap_or(T::VALUE_TYPE),
        })
    }
}

/// The record path of a synchronous instrument.
pub(crate) trait SyncInstrument<T>: Send + Sync {
    fn measure(&self, value: T, attributes: &[KeyValue]);
}

/// A synchronous instrument bound to the streams its views resolved to.
pub(crate) struct ResolvedInstrument<T> {
    descriptor: InstrumentDescriptor,
    writer: Arc<dyn SyncWritable<T>>,
}

impl<T> ResolvedInstrument<T> {
    pub(crate) fn new(descriptor: InstrumentDescriptor, writer: Arc<dyn SyncWritable<T>>) -> Self {
        ResolvedInstrument { descriptor, writer }
    }
}

impl<T: Number> SyncInstrument<T> for ResolvedInstrument<T> {
    fn measure(&self, value: T, attributes: &[KeyValue]) {
        let Some(value) = validate_measurement(&self.descriptor, value) else {
            return;
        };
        self.writer.record(
            value,
            &AttributeSet::from(attributes),
            telemetry_api::time::now(),
        );
    }
}

/// The callback side of an observable instrument.
pub(crate) trait ObservableHandle<T>: Send + Sync {
    fn id(&self) -> u64;

    fn add_callback(&self, callback: Callback<T>) -> Registration;
}

impl<T: Number> ObservableHandle<T> for ObservableCore<T> {
    fn id(&self) -> u64 {
        ObservableCore::id(self)
    }

    fn add_callback(&self, callback: Callback<T>) -> Registration {
        ObservableCore::add_callback(self, callback)
    }
}

macro_rules! sync_instrument {
    ($(#[$doc:meta])* $name:ident, $method:ident, $verb:literal) => {
        $(#[$doc])*
        #[derive(Clone)]
        pub struct $name<T> {
            inner: Option<Arc<dyn SyncInstrument<T>>>,
        }

        impl<T> $name<T> {
            pub(crate) fn new(inner: Option<Arc<dyn SyncInstrument<T>>>) -> Self {
                $name { inner }
            }

            #[doc = concat!("Records ", $verb, " for the given attributes.")]
            pub fn $method(&self, value: T, attributes: &[KeyValue]) {
                if let Some(inner) = &self.inner {
                    inner.measure(value, attributes)
                }
            }
        }

        impl<T> fmt::Debug for $name<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_fmt(format_args!(
                    "{}<{}>",
                    stringify!($name),
                    std::any::type_name::<T>()
                ))
            }
        }
    };
}

sync_instrument!(
    /// An instrument that records increasing values.
    Counter,
    add,
    "an increment"
);
sync_instrument!(
    /// An instrument that records increasing and decreasing values.
    UpDownCounter,
    add,
    "a change"
);
sync_instrument!(
    /// An instrument that records a distribution of values.
    Histogram,
    record,
    "a value"
);

macro_rules! observable_instrument {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone)]
        pub struct $name<T> {
            inner: Option<Arc<dyn ObservableHandle<T>>>,
        }

        impl<T> $name<T> {
            pub(crate) fn new(inner: Option<Arc<dyn ObservableHandle<T>>>) -> Self {
                $name { inner }
            }
        }

        impl<T: 'static> $name<T> {
            /// Registers another callback observing this instrument before
            /// every collection.
            pub fn add_callback<F>(&self, callback: F) -> Registration
            where
                F: Fn(&dyn AsyncInstrument<T>) + Send + Sync + 'static,
            {
                match &self.inner {
                    Some(inner) => inner.add_callback(Box::new(callback)),
                    None => Registration::default(),
                }
            }
        }

        impl<T> ObservableInstrument for $name<T> {
            fn observable_id(&self) -> u64 {
                self.inner.as_ref().map_or(0, |inner| inner.id())
            }
        }

        impl<T> Observable<T> for $name<T> {}

        impl<T> fmt::Debug for $name<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_fmt(format_args!(
                    "{}<{}>",
                    stringify!($name),
                    std::any::type_name::<T>()
                ))
            }
        }
    };
}

observable_instrument!(
    /// An async instrument that records increasing totals.
    ObservableCounter
);
observable_instrument!(
    /// An async instrument that records totals that may go up and down.
    ObservableUpDownCounter
);
observable_instrument!(
    /// An async instrument that records current values.
    ObservableGauge
);

/// Configuration for building a sync instrument.
pub struct InstrumentBuilder<'a, I> {
    meter: &'a Meter,
    config: InstrumentConfig,
    _marker: PhantomData<I>,
}

impl<'a, I> InstrumentBuilder<'a, I> {
    pub(crate) fn new(meter: &'a Meter, name: Cow<'static, str>) -> Self {
        InstrumentBuilder {
            meter,
            config: InstrumentConfig::new(name),
            _marker: PhantomData,
        }
    }

    /// Set the description for this instrument
    pub fn with_description<S: Into<Cow<'static, str>>>(mut self, description: S) -> Self {
        self.config.description = Some(description.into());
        self
    }

    /// Set the unit for this instrument.
    ///
    /// Unit is case sensitive(`kb` is not the same as `kB`).
    ///
    /// Unit must be:
    /// - ASCII string
    /// - No longer than 63 characters
    pub fn with_unit<S: Into<Cow<'static, str>>>(mut self, unit: S) -> Self {
        self.config.unit = Some(unit.into());
        self
    }
}

impl<I> fmt::Debug for InstrumentBuilder<'_, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentBuilder")
            .field("config", &self.config)
            .field("kind", &std::any::type_name::<I>())
            .finish()
    }
}

/// Configuration for building a histogram.
pub struct HistogramBuilder<'a, T> {
    meter: &'a Meter,
    config: InstrumentConfig,
    boundaries: Option<Vec<f64>>,
    _marker: PhantomData<T>,
}

impl<'a, T> HistogramBuilder<'a, T> {
    pub(crate) fn new(meter: &'a Meter, name: Cow<'static, str>) -> Self {
        HistogramBuilder {
            meter,
            config: InstrumentConfig::new(name),
            boundaries: None,
            _marker: PhantomData,
        }
    }

    /// Set the description for this instrument
    pub fn with_description<S: Into<Cow<'static, str>>>(mut self, description: S) -> Self {
        self.config.description = Some(description.into());
        self
    }

    /// Set the unit for this instrument.
    ///
    /// Unit must be an ASCII string of at most 63 characters.
    pub fn with_unit<S: Into<Cow<'static, str>>>(mut self, unit: S) -> Self {
        self.config.unit = Some(unit.into());
        self
    }

    /// Set the bucket boundaries used unless a view picks an aggregation.
    ///
    /// Boundaries must be finite, sorted and free of duplicates; otherwise
    /// the histogram records nothing.
    pub fn with_boundaries(mut self, boundaries: Vec<f64>) -> Self {
        self.boundaries = Some(boundaries);
        self
    }
}

impl<T> fmt::Debug for HistogramBuilder<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistogramBuilder")
            .field("config", &self.config)
            .field("boundaries", &self.boundaries)
            .field("kind", &std::any::type_name::<Histogram<T>>())
            .finish()
    }
}

/// Configuration for building an async instrument.
pub struct AsyncInstrumentBuilder<'a, I, M> {
    meter: &'a Meter,
    config: InstrumentConfig,
    callbacks: Vec<Callback<M>>,
    _inst: PhantomData<I>,
}

impl<'a, I, M> AsyncInstrumentBuilder<'a, I, M> {
    pub(crate) fn new(meter: &'a Meter, name: Cow<'static, str>) -> Self {
        AsyncInstrumentBuilder {
            meter,
            config: InstrumentConfig::new(name),
            callbacks: Vec::new(),
            _inst: PhantomData,
        }
    }

    /// Set the description for this instrument
    pub fn with_description<S: Into<Cow<'static, str>>>(mut self, description: S) -> Self {
        self.config.description = Some(description.into());
        self
    }

    /// Set the unit for this instrument.
    ///
    /// Unit must be an ASCII string of at most 63 characters.
    pub fn with_unit<S: Into<Cow<'static, str>>>(mut self, unit: S) -> Self {
        self.config.unit = Some(unit.into());
        self
    }

    /// Set the callback to be called for this instrument.
    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&dyn AsyncInstrument<M>) + Send + Sync + 'static,
    {
        self.callbacks.push(Box::new(callback));
        self
    }
}

impl<I, M> fmt::Debug for AsyncInstrumentBuilder<'_, I, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncInstrumentBuilder")
            .field("config", &self.config)
            .field("kind", &std::any::type_name::<I>())
            .field("callbacks_len", &self.callbacks.len())
            .finish()
    }
}

macro_rules! build_sync {
    ($name:ident<$num:ty>, $kind:expr) => {
        impl InstrumentBuilder<'_, $name<$num>> {
            /// Validates the configuration and creates the instrument.
            ///
            /// An invalid configuration is logged and yields an instrument
            /// that records nothing.
            pub fn build(self) -> $name<$num> {
                $name::new(self.meter.create_sync::<$num>($kind, self.config, None))
            }
        }
    };
}

build_sync!(Counter<u64>, InstrumentKind::Counter);
build_sync!(Counter<f64>, InstrumentKind::Counter);
build_sync!(UpDownCounter<i64>, InstrumentKind::UpDownCounter);
build_sync!(UpDownCounter<f64>, InstrumentKind::UpDownCounter);

macro_rules! build_histogram {
    ($num:ty) => {
        impl HistogramBuilder<'_, $num> {
            /// Validates the configuration and creates the histogram.
            ///
            /// An invalid configuration is logged and yields a histogram
            /// that records nothing.
            pub fn build(self) -> Histogram<$num> {
                Histogram::new(self.meter.create_sync::<$num>(
                    InstrumentKind::Histogram,
                    self.config,
                    self.boundaries,
                ))
            }
        }
    };
}

build_histogram!(u64);
build_histogram!(f64);

macro_rules! build_observable {
    ($name:ident<$num:ty>, $kind:expr) => {
        impl AsyncInstrumentBuilder<'_, $name<$num>, $num> {
            /// Validates the configuration, creates the instrument and
            /// registers its callbacks.
            ///
            /// An invalid configuration is logged and yields an instrument
            /// that records nothing.
            pub fn build(self) -> $name<$num> {
                $name::new(
                    self.meter
                        .create_observable::<$num>($kind, self.config, self.callbacks),
                )
            }
        }
    };
}

build_observable!(ObservableCounter<u64>, InstrumentKind::ObservableCounter);
build_observable!(ObservableCounter<f64>, InstrumentKind::ObservableCounter);
build_observable!(
    ObservableUpDownCounter<i64>,
    InstrumentKind::ObservableUpDownCounter
);
build_observable!(
    ObservableUpDownCounter<f64>,
    InstrumentKind::ObservableUpDownCounter
);
build_observable!(ObservableGauge<u64>, InstrumentKind::ObservableGauge);
build_observable!(ObservableGauge<i64>, InstrumentKind::ObservableGauge);
build_observable!(ObservableGauge<f64>, InstrumentKind::ObservableGauge);

macro_rules! with_value_type {
    ($builder:ty) => {
        impl $builder {
            /// Declare the instrument as recording whole numbers.
            ///
            /// With [ValueType::Int], fractional measurements are truncated
            /// toward zero and a warning is logged.
            pub fn with_value_type(mut self, value_type: ValueType) -> Self {
                self.config.value_type = Some(value_type);
                self
            }
        }
    };
}

with_value_type!(InstrumentBuilder<'_, Counter<f64>>);
with_value_type!(InstrumentBuilder<'_, UpDownCounter<f64>>);
with_value_type!(HistogramBuilder<'_, f64>);
with_value_type!(AsyncInstrumentBuilder<'_, ObservableCounter<f64>, f64>);
with_value_type!(AsyncInstrumentBuilder<'_, ObservableUpDownCounter<f64>, f64>);
with_value_type!(AsyncInstrumentBuilder<'_, ObservableGauge<f64>, f64>);

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(kind: InstrumentKind, value_type: ValueType) -> InstrumentDescriptor {
        InstrumentDescriptor {
            name: "test".into(),
            description: "".into(),
            unit: "".into(),
            kind,
            value_type,
        }
    }

    #[test]
    fn negative_values_dropped_for_monotonic_kinds() {
        for kind in [
            InstrumentKind::Counter,
            InstrumentKind::Histogram,
            InstrumentKind::ObservableCounter,
        ] {
            let d = descriptor(kind, ValueType::Double);
            assert_eq!(validate_measurement(&d, -1.0_f64), None, "{kind:?}");
            assert_eq!(validate_measurement(&d, 0.0_f64), Some(0.0), "{kind:?}");
        }
        let d = descriptor(InstrumentKind::UpDownCounter, ValueType::Int);
        assert_eq!(validate_measurement(&d, -4_i64), Some(-4));
    }

    #[test]
    fn fractional_values_truncated_for_int_instruments() {
        let d = descriptor(InstrumentKind::UpDownCounter, ValueType::Int);
        assert_eq!(validate_measurement(&d, 2.7_f64), Some(2.0));
        assert_eq!(validate_measurement(&d, -2.7_f64), Some(-2.0));

        let d = descriptor(InstrumentKind::UpDownCounter, ValueType::Double);
        assert_eq!(validate_measurement(&d, 2.7_f64), Some(2.7));
    }

    #[test]
    fn config_defaults_value_type_from_number() {
        let d = InstrumentConfig::new("n".into())
            .into_descriptor::<u64>(InstrumentKind::Counter)
            .unwrap();
        assert_eq!(d.value_type, ValueType::Int);
        let d = InstrumentConfig::new("n".into())
            .into_descriptor::<f64>(InstrumentKind::Counter)
            .unwrap();
        assert_eq!(d.value_type, ValueType::Double);
        assert!(InstrumentConfig::new("9lives".into())
            .into_descriptor::<f64>(InstrumentKind::Counter)
            .is_err());
    }

    #[test]
    fn noop_instruments_record_nothing() {
        let counter = Counter::<u64>::new(None);
        counter.add(1, &[]);
        let gauge = ObservableGauge::<i64>::new(None);
        assert_eq!(gauge.observable_id(), 0);
        assert!(gauge.add_callback(|_| {}).unregister().is_ok());
    }
}
