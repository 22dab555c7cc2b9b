use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use telemetry_api::{otel_warn, Key};

use crate::metrics::attributes::AttributeSet;
use crate::metrics::collector::CollectorHandle;
use crate::metrics::data::Metric;
use crate::metrics::instrument::InstrumentDescriptor;

use super::aggregator::Aggregator;
use super::delta_processor::DeltaMetricProcessor;
use super::storage::{MetricStorage, SyncWritable};
use super::temporal_processor::TemporalMetricProcessor;

/// Storage for a stream fed by a synchronous instrument.
///
/// Recording only takes the delta lock. Collection takes the temporal lock
/// for its whole duration and the delta lock just long enough to swap out
/// the current window, so concurrent collections stash windows in the
/// order they were cut.
pub(crate) struct SyncMetricStorage<A: Aggregator> {
    descriptor: InstrumentDescriptor,
    allowed_keys: Option<Arc<HashSet<Key>>>,
    delta: Mutex<DeltaMetricProcessor<A>>,
    temporal: Mutex<TemporalMetricProcessor<A>>,
}

impl<A: Aggregator> SyncMetricStorage<A> {
    pub(crate) fn new(
        descriptor: InstrumentDescriptor,
        aggregator: A,
        allowed_keys: Option<Arc<HashSet<Key>>>,
        cardinality_limit: usize,
    ) -> Self {
        let aggregator = Arc::new(aggregator);
        SyncMetricStorage {
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

impl<A: Aggregator> SyncWritable<A::Value> for SyncMetricStorage<A> {
    fn record(&self, value: A::Value, attributes: &AttributeSet, time: SystemTime) {
        let filtered;
        let attributes = match &self.allowed_keys {
            Some(keys) => {
                filtered = attributes.retain_keys(keys);
                &filtered
            }
            None => attributes,
        };

        match self.delta.lock() {
            Ok(mut delta) => delta.record(value, attributes, time),
            Err(_) => {
                otel_warn!(
                    name: "MetricStorage.LockPoisoned",
                    stream = self.descriptor.name().to_string()
                );
            }
        }
    }
}

impl<A: Aggregator> MetricStorage for SyncMetricStorage<A> {
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
