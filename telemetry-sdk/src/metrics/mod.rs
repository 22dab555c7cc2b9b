//! The metrics collection core.
//!
//! ## Configuration
//!
//! All configuration is stored with each [SdkMeterProvider]: the [Resource],
//! the [View]s, and the [ManualReader] or [PeriodicReader] instances that
//! read from it.
//!
//! ### Example
//!
//! ```
//! use telemetry_api::KeyValue;
//! use telemetry_sdk::{metrics::SdkMeterProvider, Resource};
//!
//! // Generate SDK configuration, resource, views, etc
//! let resource = Resource::builder().build(); // attributes from the environment
//!
//! // Create a meter provider with the desired config
//! let meter_provider = SdkMeterProvider::builder().with_resource(resource).build();
//!
//! // Use the meter provider to create meter instances
//! let meter = meter_provider.meter("my_app");
//!
//! // Create instruments scoped to the meter
//! let counter = meter
//!     .u64_counter("power_consumption")
//!     .with_unit("kWh")
//!     .build();
//!
//! // use instruments to record measurements
//! counter.add(10, &[KeyValue::new("rate", "standard")]);
//!
//! // shutdown the provider at the end of the application to ensure any metrics not yet
//! // exported are flushed.
//! meter_provider.shutdown().unwrap();
//! ```
//!
//! [Resource]: crate::Resource

pub(crate) mod aggregation;
pub(crate) mod attributes;
pub(crate) mod collector;
pub mod data;
mod error;
pub mod exporter;
pub(crate) mod instrument;
pub(crate) mod instruments;
pub(crate) mod internal;
pub(crate) mod manual_reader;
pub(crate) mod meter;
mod meter_provider;
pub(crate) mod periodic_reader;
pub mod reader;
pub(crate) mod view;

/// In-Memory metric exporter for testing purpose.
#[cfg(any(feature = "testing", test))]
#[cfg_attr(docsrs, doc(cfg(any(feature = "testing", test))))]
pub mod in_memory_exporter;
#[cfg(any(feature = "testing", test))]
#[cfg_attr(docsrs, doc(cfg(any(feature = "testing", test))))]
pub use in_memory_exporter::{InMemoryMetricExporter, InMemoryMetricExporterBuilder};

pub use aggregation::Aggregation;
pub use attributes::AttributeSet;
pub use collector::{CollectionOptions, CollectionResult, MetricCollector};
pub use data::Temporality;
pub use error::{MetricError, MetricResult};
pub use instrument::{
    Instrument, InstrumentDescriptor, InstrumentKind, Stream, StreamBuilder, ValueType,
};
pub use instruments::{
    AsyncInstrument, AsyncInstrumentBuilder, Callback, Counter, Histogram, HistogramBuilder,
    InstrumentBuilder, Observable, ObservableCounter, ObservableGauge, ObservableInstrument,
    ObservableUpDownCounter, UpDownCounter,
};
pub use internal::{BatchObservableResult, Registration};
pub use manual_reader::*;
pub use meter::Meter;
pub use meter_provider::*;
pub use periodic_reader::*;
pub use reader::{MetricReader, TemporalitySelector};
pub use view::{new_view, View};

#[cfg(test)]
mod tests {
    use super::data::{AggregatedMetrics, Metric, MetricData, NumberDataPoint, ResourceMetrics};
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use telemetry_api::{InstrumentationScope, KeyValue};

    // Run all tests in this mod
    // cargo test metrics::tests

    #[test]
    fn counter_aggregation_delta() {
        counter_aggregation_helper(Temporality::Delta);
    }

    #[test]
    fn counter_aggregation_cumulative() {
        counter_aggregation_helper(Temporality::Cumulative);
    }

    #[test]
    fn counter_aggregation_no_attributes_delta() {
        let mut test_context = TestContext::new(Temporality::Delta);
        let counter = test_context.meter().u64_counter("my_counter").build();

        counter.add(50, &[]);
        test_context.flush_metrics();

        let sum = test_context.get_u64_sum("my_counter", None);
        assert_eq!(sum.len(), 1);
        assert!(sum[0].attributes.is_empty());
        assert_eq!(sum[0].value, 50);
    }

    #[test]
    fn counter_aggregation_attribute_order() {
        let mut test_context = TestContext::new(Temporality::Delta);
        let counter = test_context.meter().u64_counter("my_counter").build();

        counter.add(
            1,
            &[KeyValue::new("A", "a"), KeyValue::new("B", "b")],
        );
        counter.add(
            2,
            &[KeyValue::new("B", "b"), KeyValue::new("A", "a")],
        );
        test_context.flush_metrics();

        let sum = test_context.get_u64_sum("my_counter", None);
        assert_eq!(sum.len(), 1, "attribute order must not split a series");
        assert_eq!(sum[0].value, 3);
    }

    #[test]
    fn updown_counter_aggregation_cumulative() {
        let mut test_context = TestContext::new(Temporality::Cumulative);
        let counter = test_context
            .meter()
            .i64_up_down_counter("my_updown_counter")
            .with_unit("my_unit")
            .build();

        counter.add(10, &[KeyValue::new("key1", "value1")]);
        counter.add(-3, &[KeyValue::new("key1", "value1")]);
        test_context.flush_metrics();
        let points = test_context.get_i64_sum("my_updown_counter", Some("my_unit"));
        assert_eq!(points[0].value, 7);

        test_context.reset_metrics();
        counter.add(-10, &[KeyValue::new("key1", "value1")]);
        test_context.flush_metrics();
        let points = test_context.get_i64_sum("my_updown_counter", Some("my_unit"));
        assert_eq!(points[0].value, -3);
    }

    #[test]
    fn histogram_aggregation_with_custom_bounds() {
        let mut test_context = TestContext::new(Temporality::Delta);
        let histogram = test_context
            .meter()
            .f64_histogram("test_histogram")
            .with_boundaries(vec![1.0, 2.5, 5.5])
            .build();
        for v in [1.0, 2.0, 3.0, 4.0, 6.0] {
            histogram.record(v, &[]);
        }
        test_context.flush_metrics();

        let metric = test_context.get_metric("test_histogram", None);
        let AggregatedMetrics::F64(MetricData::Histogram(histogram)) = &metric.data else {
            panic!("expected f64 histogram, got {:?}", metric.data);
        };
        let point = &histogram.data_points[0];
        assert_eq!(point.bounds, vec![1.0, 2.5, 5.5]);
        assert_eq!(point.bucket_counts, vec![1, 1, 2, 1]);
        assert_eq!(point.count, 5);
        assert_eq!(point.sum, 16.0);
        assert_eq!(point.min, Some(1.0));
        assert_eq!(point.max, Some(6.0));
    }

    #[test]
    fn observable_counter_aggregation_delta_non_zero_increment() {
        let mut test_context = TestContext::new(Temporality::Delta);
        let total = Arc::new(AtomicU64::new(0));
        let observed = Arc::clone(&total);
        let _counter = test_context
            .meter()
            .u64_observable_counter("my_observable_counter")
            .with_callback(move |observer| {
                let value = observed.fetch_add(4, Ordering::Relaxed) + 4;
                observer.observe(value, &[KeyValue::new("key1", "value1")]);
            })
            .build();

        for _ in 0..3 {
            test_context.flush_metrics();
            let points = test_context.get_u64_sum("my_observable_counter", None);
            // each collection reports the increase since the previous one
            assert_eq!(points[0].value, 4);
            test_context.reset_metrics();
        }
    }

    #[test]
    fn view_renames_stream() {
        let exporter = InMemoryMetricExporter::default();
        let view = new_view(
            Instrument::new().name("my_counter"),
            Stream::builder()
                .with_name("renamed")
                .build()
                .expect("valid stream"),
        )
        .expect("valid view");
        let provider = SdkMeterProvider::builder()
            .with_reader(PeriodicReader::builder(exporter.clone()).build())
            .with_view(view)
            .build();
        let counter = provider.meter("test").u64_counter("my_counter").build();
        counter.add(1, &[]);
        provider.force_flush().unwrap();

        let resource_metrics = exporter.get_finished_metrics().unwrap();
        let metrics = &resource_metrics[0].scope_metrics[0].metrics;
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].name(), "renamed");
    }

    #[test]
    fn meter_scope_is_reported() {
        let mut test_context = TestContext::new(Temporality::Cumulative);
        let scope = InstrumentationScope::builder("my_lib")
            .with_version("1.2.3")
            .build();
        let counter = test_context
            .meter_provider
            .meter_with_scope(scope.clone())
            .u64_counter("c")
            .build();
        counter.add(1, &[]);
        test_context.flush_metrics();

        let resource_metrics = test_context.finished();
        assert_eq!(resource_metrics.scope_metrics[0].scope, scope);
        assert_eq!(
            resource_metrics.scope_metrics[0].scope.version(),
            Some("1.2.3")
        );
    }

    fn counter_aggregation_helper(temporality: Temporality) {
        // Arrange
        let mut test_context = TestContext::new(temporality);
        let counter = test_context
            .meter()
            .u64_counter("my_counter")
            .with_unit("my_unit")
            .build();

        // Act
        counter.add(1, &[KeyValue::new("key1", "value1")]);
        counter.add(1, &[KeyValue::new("key1", "value1")]);
        counter.add(1, &[KeyValue::new("key1", "value2")]);
        test_context.flush_metrics();

        // Assert
        let points = test_context.get_u64_sum("my_counter", Some("my_unit"));
        assert_eq!(points.len(), 2);
        assert_eq!(find_value(&points, "value1"), Some(2));
        assert_eq!(find_value(&points, "value2"), Some(1));

        // Repeat the collection with one more measurement
        test_context.reset_metrics();
        counter.add(5, &[KeyValue::new("key1", "value1")]);
        test_context.flush_metrics();

        let points = test_context.get_u64_sum("my_counter", Some("my_unit"));
        match temporality {
            Temporality::Delta => {
                assert_eq!(points.len(), 1);
                assert_eq!(find_value(&points, "value1"), Some(5));
            }
            Temporality::Cumulative => {
                assert_eq!(points.len(), 2);
                assert_eq!(find_value(&points, "value1"), Some(7));
                assert_eq!(find_value(&points, "value2"), Some(1));
            }
        }
    }

    fn find_value<T: Copy>(points: &[NumberDataPoint<T>], value1: &str) -> Option<T> {
        points
            .iter()
            .find(|p| {
                p.attributes
                    .get("key1")
                    .is_some_and(|v| v.as_str() == value1)
            })
            .map(|p| p.value)
    }

    struct TestContext {
        exporter: InMemoryMetricExporter,
        meter_provider: SdkMeterProvider,

        // Saving this on the test context for lifetime simplicity
        resource_metrics: Vec<ResourceMetrics>,
    }

    impl TestContext {
        fn new(temporality: Temporality) -> Self {
            let exporter = InMemoryMetricExporterBuilder::new()
                .with_temporality(temporality)
                .build();
            let meter_provider = SdkMeterProvider::builder()
                .with_reader(PeriodicReader::builder(exporter.clone()).build())
                .build();

            TestContext {
                exporter,
                meter_provider,
                resource_metrics: vec![],
            }
        }

        fn meter(&self) -> Meter {
            self.meter_provider.meter("test")
        }

        fn flush_metrics(&self) {
            self.meter_provider.force_flush().unwrap();
        }

        fn reset_metrics(&self) {
            self.exporter.reset();
        }

        fn finished(&mut self) -> &ResourceMetrics {
            self.resource_metrics = self
                .exporter
                .get_finished_metrics()
                .expect("metrics expected to be exported");
            assert_eq!(
                self.resource_metrics.len(),
                1,
                "Expected single resource metrics."
            );
            &self.resource_metrics[0]
        }

        fn get_metric(&mut self, name: &str, unit: Option<&str>) -> &Metric {
            let resource_metric = self.finished();
            assert!(
                !resource_metric.scope_metrics.is_empty(),
                "No scope metrics in latest export"
            );
            let metric = resource_metric.scope_metrics[0]
                .metrics
                .iter()
                .find(|m| m.name() == name)
                .expect("metric was exported");
            if let Some(expected_unit) = unit {
                assert_eq!(metric.descriptor.unit(), expected_unit);
            }
            metric
        }

        fn get_u64_sum(&mut self, name: &str, unit: Option<&str>) -> Vec<NumberDataPoint<u64>> {
            match &self.get_metric(name, unit).data {
                AggregatedMetrics::U64(MetricData::Sum(sum)) => sum.data_points.clone(),
                other => panic!("expected u64 sum, got {other:?}"),
            }
        }

        fn get_i64_sum(&mut self, name: &str, unit: Option<&str>) -> Vec<NumberDataPoint<i64>> {
            match &self.get_metric(name, unit).data {
                AggregatedMetrics::I64(MetricData::Sum(sum)) => sum.data_points.clone(),
                other => panic!("expected i64 sum, got {other:?}"),
            }
        }
    }
}
