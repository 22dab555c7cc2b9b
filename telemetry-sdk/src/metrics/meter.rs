use core::fmt;
use std::{borrow::Cow, sync::Arc};

use telemetry_api::otel_warn;

use crate::metrics::{
    aggregation::validate_bucket_boundaries,
    instrument::{InstrumentDescriptor, InstrumentKind},
    instruments::{
        AsyncInstrumentBuilder, Callback, Counter, HistogramBuilder, InstrumentBuilder,
        InstrumentConfig, ObservableCounter, ObservableGauge, ObservableHandle,
        ObservableInstrument, ObservableUpDownCounter, ResolvedInstrument, SyncInstrument,
        UpDownCounter,
    },
    internal::{BatchObservableResult, MeterSharedState, Number, ObservableCore, Registration},
    MetricError, MetricResult,
};

// maximum length of instrument name
const INSTRUMENT_NAME_MAX_LENGTH: usize = 255;
// maximum length of instrument unit name
const INSTRUMENT_UNIT_NAME_MAX_LENGTH: usize = 63;
const INSTRUMENT_NAME_ALLOWED_NON_ALPHANUMERIC_CHARS: [char; 4] = ['_', '.', '-', '/'];

// instrument validation error strings
pub(crate) const INSTRUMENT_NAME_EMPTY: &str = "instrument name must be non-empty";
pub(crate) const INSTRUMENT_NAME_LENGTH: &str = "instrument name must be less than 256 characters";
pub(crate) const INSTRUMENT_NAME_INVALID_CHAR: &str =
    "characters in instrument name must be ASCII and belong to the alphanumeric characters, '_', '.', '-' and '/'";
pub(crate) const INSTRUMENT_NAME_FIRST_ALPHABETIC: &str =
    "instrument name must start with an alphabetic character";
pub(crate) const INSTRUMENT_UNIT_LENGTH: &str = "instrument unit must be less than 64 characters";
pub(crate) const INSTRUMENT_UNIT_INVALID_CHAR: &str = "characters in instrument unit must be ASCII";

/// Handles the creation and coordination of all metric instruments.
///
/// A meter represents a single instrumentation scope; all metric telemetry
/// produced by an instrumentation scope will use metric instruments from a
/// single meter. Meters handed out by a provider that has been shut down
/// create instruments that record nothing.
#[derive(Clone)]
pub struct Meter {
    state: Option<Arc<MeterSharedState>>,
}

impl Meter {
    pub(crate) fn new(state: Arc<MeterSharedState>) -> Self {
        Meter { state: Some(state) }
    }

    pub(crate) fn noop() -> Self {
        Meter { state: None }
    }

    /// Creates a builder for a [Counter] recording `u64` values.
    pub fn u64_counter(
        &self,
        name: impl Into<Cow<'static, str>>,
    ) -> InstrumentBuilder<'_, Counter<u64>> {
        InstrumentBuilder::new(self, name.into())
    }

    /// Creates a builder for a [Counter] recording `f64` values.
    pub fn f64_counter(
        &self,
        name: impl Into<Cow<'static, str>>,
    ) -> InstrumentBuilder<'_, Counter<f64>> {
        InstrumentBuilder::new(self, name.into())
    }

    /// Creates a builder for an [UpDownCounter] recording `i64` values.
    pub fn i64_up_down_counter(
        &self,
        name: impl Into<Cow<'static, str>>,
    ) -> InstrumentBuilder<'_, UpDownCounter<i64>> {
        InstrumentBuilder::new(self, name.into())
    }

    /// Creates a builder for an [UpDownCounter] recording `f64` values.
    pub fn f64_up_down_counter(
        &self,
        name: impl Into<Cow<'static, str>>,
    ) -> InstrumentBuilder<'_, UpDownCounter<f64>> {
        InstrumentBuilder::new(self, name.into())
    }

    /// Creates a builder for a [Histogram](crate::metrics::Histogram) recording `u64` values.
    pub fn u64_histogram(&self, name: impl Into<Cow<'static, str>>) -> HistogramBuilder<'_, u64> {
        HistogramBuilder::new(self, name.into())
    }

    /// Creates a builder for a [Histogram](crate::metrics::Histogram) recording `f64` values.
    pub fn f64_histogram(&self, name: impl Into<Cow<'static, str>>) -> HistogramBuilder<'_, f64> {
        HistogramBuilder::new(self, name.into())
    }

    /// Creates a builder for an [ObservableCounter] reporting `u64` totals.
    pub fn u64_observable_counter(
        &self,
        name: impl Into<Cow<'static, str>>,
    ) -> AsyncInstrumentBuilder<'_, ObservableCounter<u64>, u64> {
        AsyncInstrumentBuilder::new(self, name.into())
    }

    /// Creates a builder for an [ObservableCounter] reporting `f64` totals.
    pub fn f64_observable_counter(
        &self,
        name: impl Into<Cow<'static, str>>,
    ) -> AsyncInstrumentBuilder<'_, ObservableCounter<f64>, f64> {
        AsyncInstrumentBuilder::new(self, name.into())
    }

    /// Creates a builder for an [ObservableUpDownCounter] reporting `i64`
    /// totals.
    pub fn i64_observable_up_down_counter(
        &self,
        name: impl Into<Cow<'static, str>>,
    ) -> AsyncInstrumentBuilder<'_, ObservableUpDownCounter<i64>, i64> {
        AsyncInstrumentBuilder::new(self, name.into())
    }

    /// Creates a builder for an [ObservableUpDownCounter] reporting `f64`
    /// totals.
    pub fn f64_observable_up_down_counter(
        &self,
        name: impl Into<Cow<'static, str>>,
    ) -> AsyncInstrumentBuilder<'_, ObservableUpDownCounter<f64>, f64> {
        AsyncInstrumentBuilder::new(self, name.into())
    }

    /// Creates a builder for an [ObservableGauge] reporting `u64` values.
    pub fn u64_observable_gauge(
        &self,
        name: impl Into<Cow<'static, str>>,
    ) -> AsyncInstrumentBuilder<'_, ObservableGauge<u64>, u64> {
        AsyncInstrumentBuilder::new(self, name.into())
    }

    /// Creates a builder for an [ObservableGauge] reporting `i64` values.
    pub fn i64_observable_gauge(
        &self,
        name: impl Into<Cow<'static, str>>,
    ) -> AsyncInstrumentBuilder<'_, ObservableGauge<i64>, i64> {
        AsyncInstrumentBuilder::new(self, name.into())
    }

    /// Creates a builder for an [ObservableGauge] reporting `f64` values.
    pub fn f64_observable_gauge(
        &self,
        name: impl Into<Cow<'static, str>>,
    ) -> AsyncInstrumentBuilder<'_, ObservableGauge<f64>, f64> {
        AsyncInstrumentBuilder::new(self, name.into())
    }

    /// Registers a callback that observes several instruments at once.
    ///
    /// The callback runs before every collection, after the callbacks
    /// registered before it, and observes through the
    /// [BatchObservableResult] it is handed. Observations for instruments
    /// not listed here are dropped.
    ///
    /// Instruments that record nothing are skipped. Listing an instrument
    /// created by a different meter is an error and registers nothing.
    ///
    /// ```
    /// use telemetry_api::KeyValue;
    /// use telemetry_sdk::metrics::SdkMeterProvider;
    ///
    /// let provider = SdkMeterProvider::builder().build();
    /// let meter = provider.meter("host");
    /// let used = meter.u64_observable_gauge("memory.used").build();
    /// let free = meter.u64_observable_gauge("memory.free").build();
    ///
    /// let registration = meter
    ///     .register_callback(&[&used, &free], {
    ///         let (used, free) = (used.clone(), free.clone());
    ///         move |observer| {
    ///             observer.observe(&used, 600, &[KeyValue::new("host", "a")]);
    ///             observer.observe(&free, 400, &[KeyValue::new("host", "a")]);
    ///         }
    ///     })
    ///     .unwrap();
    /// registration.unregister().unwrap();
    /// ```
    pub fn register_callback<F>(
        &self,
        instruments: &[&dyn ObservableInstrument],
        callback: F,
    ) -> MetricResult<Registration>
    where
        F: Fn(&BatchObservableResult) + Send + Sync + 'static,
    {
        let Some(state) = &self.state else {
            return Ok(Registration::default());
        };

        let mut ids = Vec::with_capacity(instruments.len());
        for instrument in instruments {
            let id = instrument.observable_id();
            if id == 0 || ids.contains(&id) {
                continue;
            }
            if !state.observables().knows(id) {
                return Err(MetricError::Config(
                    "callback lists an instrument created by a different meter".into(),
                ));
            }
            ids.push(id);
        }

        if ids.is_empty() {
            return Ok(Registration::default());
        }
        Ok(state.observables().register(ids, Arc::new(callback)))
    }

    pub(crate) fn create_sync<T: Number>(
        &self,
        kind: InstrumentKind,
        config: InstrumentConfig,
        boundaries: Option<Vec<f64>>,
    ) -> Option<Arc<dyn SyncInstrument<T>>> {
        let state = self.state.as_ref()?;
        let descriptor = resolve_descriptor::<T>(kind, config)?;
        if let Some(boundaries) = &boundaries {
            if let Err(err) = validate_bucket_boundaries(boundaries) {
                otel_warn!(
                    name: "Meter.InvalidBoundaries",
                    instrument = descriptor.name().to_string(),
                    error = format!("{err}")
                );
                return None;
            }
        }

        let writer = state.register_sync::<T>(&descriptor, boundaries.as_deref())?;
        Some(Arc::new(ResolvedInstrument::new(descriptor, writer)) as Arc<dyn SyncInstrument<T>>)
    }

    pub(crate) fn create_observable<T: Number>(
        &self,
        kind: InstrumentKind,
        config: InstrumentConfig,
        callbacks: Vec<Callback<T>>,
    ) -> Option<Arc<dyn ObservableHandle<T>>> {
        let state = self.state.as_ref()?;
        let descriptor = resolve_descriptor::<T>(kind, config)?;
        let writer = state.register_async::<T>(&descriptor)?;

        let core = ObservableCore::register(state.observables(), descriptor, writer);
        for callback in callbacks {
            core.add_callback(callback);
        }
        Some(core as Arc<dyn ObservableHandle<T>>)
    }
}

fn resolve_descriptor<T: Number>(
    kind: InstrumentKind,
    config: InstrumentConfig,
) -> Option<InstrumentDescriptor> {
    match config.into_descriptor::<T>(kind) {
        Ok(descriptor) => Some(descriptor),
        Err(err) => {
            otel_warn!(
                name: "Meter.InvalidInstrument",
                kind = format!("{kind:?}"),
                error = format!("{err}"),
                message = "Instrument will record nothing"
            );
            None
        }
    }
}

impl fmt::Debug for Meter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            Some(state) => f.debug_struct("Meter").field("scope", state.scope()).finish(),
            None => f.write_str("Meter(noop)"),
        }
    }
}

pub(crate) fn validate_instrument_name(name: &str) -> MetricResult<()> {
    if name.is_empty() {
        return Err(MetricError::InvalidInstrumentConfiguration(
            INSTRUMENT_NAME_EMPTY,
        ));
    }
    if name.len() > INSTRUMENT_NAME_MAX_LENGTH {
        return Err(MetricError::InvalidInstrumentConfiguration(
            INSTRUMENT_NAME_LENGTH,
        ));
    }
    if name.starts_with(|c: char| !c.is_ascii_alphabetic()) {
        return Err(MetricError::InvalidInstrumentConfiguration(
            INSTRUMENT_NAME_FIRST_ALPHABETIC,
        ));
    }
    if name.contains(|c: char| {
        !c.is_ascii_alphanumeric() && !INSTRUMENT_NAME_ALLOWED_NON_ALPHANUMERIC_CHARS.contains(&c)
    }) {
        return Err(MetricError::InvalidInstrumentConfiguration(
            INSTRUMENT_NAME_INVALID_CHAR,
        ));
    }
    Ok(())
}

pub(crate) fn validate_instrument_unit(unit: &str) -> MetricResult<()> {
    if unit.len() > INSTRUMENT_UNIT_NAME_MAX_LENGTH {
        return Err(MetricError::InvalidInstrumentConfiguration(
            INSTRUMENT_UNIT_LENGTH,
        ));
    }
    if unit.contains(|c: char| !c.is_ascii()) {
        return Err(MetricError::InvalidInstrumentConfiguration(
            INSTRUMENT_UNIT_INVALID_CHAR,
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use telemetry_api::KeyValue;

    use super::{
        validate_instrument_name, validate_instrument_unit, INSTRUMENT_NAME_FIRST_ALPHABETIC,
        INSTRUMENT_NAME_INVALID_CHAR, INSTRUMENT_NAME_LENGTH, INSTRUMENT_UNIT_INVALID_CHAR,
        INSTRUMENT_UNIT_LENGTH,
    };
    use crate::metrics::{
        data::{AggregatedMetrics, MetricData},
        ManualReader, MetricError, MetricReader, ObservableInstrument, SdkMeterProvider,
        Temporality,
    };

    #[test]
    fn instrument_name_validation() {
        // (name, expected error)
        let instrument_name_test_cases = vec![
            ("validateName", ""),
            ("_startWithNoneAlphabet", INSTRUMENT_NAME_FIRST_ALPHABETIC),
            ("utf8char锈", INSTRUMENT_NAME_INVALID_CHAR),
            ("a".repeat(255).leak(), ""),
            ("a".repeat(256).leak(), INSTRUMENT_NAME_LENGTH),
            ("invalid name", INSTRUMENT_NAME_INVALID_CHAR),
            ("allow/slash", ""),
            ("allow_under_score", ""),
            ("allow.dots.ok", ""),
        ];
        for (name, expected_error) in instrument_name_test_cases {
            let result = validate_instrument_name(name);
            if expected_error.is_empty() {
                assert!(result.is_ok(), "{name}");
            } else {
                assert!(matches!(
                    result.unwrap_err(),
                    MetricError::InvalidInstrumentConfiguration(msg) if msg == expected_error
                ));
            }
        }
    }

    #[test]
    fn instrument_unit_validation() {
        // (unit, expected error)
        let instrument_unit_test_cases = vec![
            (
                "0123456789012345678901234567890123456789012345678901234567890123",
                INSTRUMENT_UNIT_LENGTH,
            ),
            ("utf8char锈", INSTRUMENT_UNIT_INVALID_CHAR),
            ("kb", ""),
            ("Kb/sec", ""),
            ("%", ""),
            ("", ""),
        ];

        for (unit, expected_error) in instrument_unit_test_cases {
            let result = validate_instrument_unit(unit);
            if expected_error.is_empty() {
                assert!(result.is_ok(), "{unit}");
            } else {
                assert!(matches!(
                    result.unwrap_err(),
                    MetricError::InvalidInstrumentConfiguration(msg) if msg == expected_error
                ));
            }
        }
    }

    #[test]
    fn invalid_instruments_are_noop() {
        let reader = ManualReader::builder().build();
        let provider = SdkMeterProvider::builder()
            .with_reader(reader.clone())
            .build();
        let meter = provider.meter("test");

        let counter = meter.u64_counter("1st").build();
        counter.add(1, &[]);
        let histogram = meter
            .f64_histogram("latency")
            .with_boundaries(vec![5.0, 1.0])
            .build();
        histogram.record(1.0, &[]);

        let result = reader.collect().unwrap();
        assert!(result.resource_metrics.scope_metrics.is_empty());
    }

    #[test]
    fn foreign_instrument_rejected_by_register_callback() {
        let provider = SdkMeterProvider::builder().build();
        let a = provider.meter("a");
        let b = provider.meter("b");
        let gauge = a.u64_observable_gauge("g").build();
        assert_ne!(gauge.observable_id(), 0);

        let result = b.register_callback(&[&gauge], |_| {});
        assert!(matches!(result, Err(MetricError::Config(_))));
        assert!(a.register_callback(&[&gauge], |_| {}).is_ok());
    }

    #[test]
    fn batch_callback_observes_listed_instruments() {
        let reader = ManualReader::builder()
            .with_temporality(Temporality::Cumulative)
            .build();
        let provider = SdkMeterProvider::builder()
            .with_reader(reader.clone())
            .build();
        let meter = provider.meter("test");
        let used = meter.i64_observable_gauge("used").build();
        let total = meter.u64_observable_counter("total").build();

        let registration = meter
            .register_callback(&[&used, &total], {
                let (used, total) = (used.clone(), total.clone());
                move |observer| {
                    observer.observe(&used, 7, &[KeyValue::new("k", "v")]);
                    observer.observe(&total, 11, &[]);
                }
            })
            .unwrap();

        let result = reader.collect().unwrap();
        let metrics = &result.resource_metrics.scope_metrics[0].metrics;
        assert_eq!(metrics.len(), 2);
        match &metrics[0].data {
            AggregatedMetrics::I64(MetricData::Gauge(gauge)) => {
                assert_eq!(gauge.data_points[0].value, 7)
            }
            other => panic!("unexpected data {other:?}"),
        }
        match &metrics[1].data {
            AggregatedMetrics::U64(MetricData::Sum(sum)) => {
                assert_eq!(sum.data_points[0].value, 11)
            }
            other => panic!("unexpected data {other:?}"),
        }

        registration.unregister().unwrap();
        let result = reader.collect().unwrap();
        // cumulative streams keep reporting their last state
        assert_eq!(result.resource_metrics.scope_metrics[0].metrics.len(), 2);
    }

    #[test]
    fn duplicate_registration_shares_the_stream() {
        let reader = ManualReader::builder().build();
        let provider = SdkMeterProvider::builder()
            .with_reader(reader.clone())
            .build();
        let meter = provider.meter("test");
        let first = meter.u64_counter("requests").build();
        let second = meter
            .u64_counter("Requests")
            .with_description("other")
            .build();
        first.add(1, &[]);
        second.add(2, &[]);

        let result = reader.collect().unwrap();
        let metrics = &result.resource_metrics.scope_metrics[0].metrics;
        assert_eq!(metrics.len(), 1);
        match &metrics[0].data {
            AggregatedMetrics::U64(MetricData::Sum(sum)) => {
                assert_eq!(sum.data_points[0].value, 3)
            }
            other => panic!("unexpected data {other:?}"),
        }

        // same name, different kind: nothing recorded through the loser
        let conflicting = meter.i64_up_down_counter("requests").build();
        conflicting.add(5, &[]);
        let result = reader.collect().unwrap();
        match &result.resource_metrics.scope_metrics[0].metrics[0].data {
            AggregatedMetrics::U64(MetricData::Sum(sum)) => {
                assert_eq!(sum.data_points[0].value, 3)
            }
            other => panic!("unexpected data {other:?}"),
        }
    }
}
