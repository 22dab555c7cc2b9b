use std::collections::VecDeque;
use std::fmt;
use std::future::{self, Future};
use std::sync::{Arc, Mutex};

use crate::error::{OTelSdkError, OTelSdkResult};
use crate::metrics::data::ResourceMetrics;
use crate::metrics::exporter::PushMetricExporter;
use crate::metrics::{MetricResult, Temporality};

/// An in-memory metrics exporter that stores metrics data in memory.
///
/// This exporter is useful for testing and debugging purposes. It stores
/// a copy of every exported `ResourceMetrics`, retrievable with
/// [InMemoryMetricExporter::get_finished_metrics]. Clones share storage.
///
/// # Example
///
/// ```
/// # use telemetry_api::KeyValue;
/// # use telemetry_sdk::metrics::{InMemoryMetricExporter, PeriodicReader, SdkMeterProvider};
/// // Create an InMemoryMetricExporter
/// let exporter = InMemoryMetricExporter::default();
///
/// // Create a MeterProvider and register the exporter
/// let meter_provider = SdkMeterProvider::builder()
///     .with_reader(PeriodicReader::builder(exporter.clone()).build())
///     .build();
///
/// // Create and record metrics using the MeterProvider
/// let meter = meter_provider.meter("example");
/// let counter = meter.u64_counter("my_counter").build();
/// counter.add(1, &[KeyValue::new("key", "value")]);
///
/// meter_provider.force_flush().unwrap();
///
/// // Retrieve the finished metrics from the exporter
/// let finished_metrics = exporter.get_finished_metrics().unwrap();
/// assert_eq!(finished_metrics.len(), 1);
/// ```
#[derive(Clone)]
pub struct InMemoryMetricExporter {
    metrics: Arc<Mutex<VecDeque<ResourceMetrics>>>,
    temporality: Temporality,
}

impl fmt::Debug for InMemoryMetricExporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryMetricExporter")
            .field("temporality", &self.temporality)
            .finish()
    }
}

impl Default for InMemoryMetricExporter {
    fn default() -> Self {
        InMemoryMetricExporterBuilder::new().build()
    }
}

/// Builder for [`InMemoryMetricExporter`].
/// # Example
///
/// ```
/// # use telemetry_sdk::metrics::{InMemoryMetricExporterBuilder, Temporality};
///
/// let exporter = InMemoryMetricExporterBuilder::new()
///     .with_temporality(Temporality::Delta)
///     .build();
/// ```
#[derive(Debug, Default)]
pub struct InMemoryMetricExporterBuilder {
    temporality: Option<Temporality>,
}

impl InMemoryMetricExporterBuilder {
    /// Creates a new instance of the `InMemoryMetricExporterBuilder`.
    pub fn new() -> Self {
        Self { temporality: None }
    }

    /// Set the [Temporality] of the exporter.
    pub fn with_temporality(mut self, temporality: Temporality) -> Self {
        self.temporality = Some(temporality);
        self
    }

    /// Creates a new instance of the `InMemoryMetricExporter`.
    pub fn build(self) -> InMemoryMetricExporter {
        InMemoryMetricExporter {
            metrics: Arc::new(Mutex::new(VecDeque::new())),
            temporality: self.temporality.unwrap_or_default(),
        }
    }
}

impl InMemoryMetricExporter {
    /// Returns the finished metrics as a vector of `ResourceMetrics`, oldest
    /// export first.
    ///
    /// # Errors
    ///
    /// Returns a `MetricError` if the internal lock cannot be acquired.
    pub fn get_finished_metrics(&self) -> MetricResult<Vec<ResourceMetrics>> {
        let metrics = self.metrics.lock()?;
        Ok(metrics.iter().cloned().collect())
    }

    /// Clears the internal storage of finished metrics.
    pub fn reset(&self) {
        let _ = self.metrics.lock().map(|mut metrics| metrics.clear());
    }
}

impl PushMetricExporter for InMemoryMetricExporter {
    fn export(&self, metrics: &ResourceMetrics) -> impl Future<Output = OTelSdkResult> + Send {
        let result = self
            .metrics
            .lock()
            .map(|mut stored| stored.push_back(metrics.clone()))
            .map_err(|err| OTelSdkError::InternalFailure(format!("export failed: {err}")));
        future::ready(result)
    }

    fn force_flush(&self) -> OTelSdkResult {
        Ok(()) // In this implementation, flush does nothing
    }

    fn shutdown(&self) -> OTelSdkResult {
        Ok(())
    }

    fn temporality(&self) -> Temporality {
        self.temporality
    }
}
