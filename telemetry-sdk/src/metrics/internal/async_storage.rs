use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use telemetry_api::{otel_warn, Key};

use crate::metrics::collector::CollectorHandle;
use crate::metrics::data::Metric;
use crate::metrics::instrument::InstrumentDescriptor;

use super::aggregator::Aggregator;
use super::delta_processor::DeltaMetricProcessor;
use super::storage::{AsyncWritable, MetricStorage};
use super::temporal_processor::TemporalMetricProcessor;
use super::AttributeHashMap;

/// Storage for a stream fed by observable callbacks.
///
/// Observations are re-stated totals. The delta processor turns each batch
/// into the change since the previous one before it joins the window.
pub(crate) struct AsyncMetricStorage<A: Aggregator> {
    descriptor: InstrumentDescriptor,
    allowed_keys: Option<Arc<HashSet<Key>>>,
    delta: Mutex<DeltaMetricProcessor<A>>,
    temporal: Mutex<TemporalMetricProcessor<A>>,
}

impl<A: Aggregator> AsyncMetricStorage<A> {
    pub(crate) fn new(
        descriptor: InstrumentDescriptor,
        aggregator: A,
        allowed_keys: Option<Arc<HashSet<Key>>>,
        cardinality_limit: usize,
    ) -> Self {
        let aggregator = Arc::new(aggregator);
        AsyncMetricStorage {
            descriptor,
            allowed_keys,
            delta: Mutex::new(DeltaMetricProcessor::new(
                Arc::clone(&aggregator),
                cardinality_limit,
            )),
            temporal: Mutex::new(TemporalMetricProcessor::new(aggregator)),
        }
    }
}

impl<A: Aggregator> AsyncWritable<A::Value> for AsyncMetricStorage<A> {
    fn record_batch(&self, measurements: &AttributeHashMap<A::Value>, observation_time: SystemTime) {
        // Filtering can map several observed sets onto one. The observation
        // seen last wins, as it would had the callback reported it twice.
        let measurements: AttributeHashMap<A::Value> = match &self.allowed_keys {
            Some(keys) => measurements
                .iter()
                .map(|(attributes, value)| (attributes.retain_keys(keys), *value))
                .collect(),
            None => measurements.clone(),
        };

        match self.delta.lock() {
            Ok(mut delta) => delta.batch_cumulate(measurements, observation_time),
            Err(_) => {
                otel_warn!(
                    name: "MetricStorage.LockPoisoned",
                    stream = self.descriptor.name().to_string()
                );
            }
        }
    }
}

impl<A: Aggregator> MetricStorage for AsyncMetricStorage<A> {
    fn collect(
        &self,
        collector: &CollectorHandle,
        all_collectors: &[CollectorHandle],
        collection_time: SystemTime,
    ) -> Option<Metric> {
        let mut temporal = self.temporal.lock().ok()?;
        let current = self.delta.lock().ok()?.collect();
        temporal.build_metrics(
            collector,
            all_collectors,
            &self.descriptor,
            current,
            collection_time,
        )
    }
}
