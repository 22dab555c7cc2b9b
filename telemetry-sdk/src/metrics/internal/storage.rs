use std::sync::Arc;
use std::time::SystemTime;

use crate::metrics::attributes::AttributeSet;
use crate::metrics::collector::CollectorHandle;
use crate::metrics::data::Metric;

use super::AttributeHashMap;

/// The collect side of a stream.
pub(crate) trait MetricStorage: Send + Sync {
    /// Snapshot for `collector`. Every handle in `all_collectors` is handed
    /// this window's delta, whether or not it is collecting now.
    fn collect(
        &self,
        collector: &CollectorHandle,
        all_collectors: &[CollectorHandle],
        collection_time: SystemTime,
    ) -> Option<Metric>;
}

/// The record side of a stream fed by a synchronous instrument.
pub(crate) trait SyncWritable<T>: Send + Sync {
    fn record(&self, value: T, attributes: &AttributeSet, time: SystemTime);
}

/// The record side of a stream fed by observable callbacks.
pub(crate) trait AsyncWritable<T>: Send + Sync {
    /// Records one callback's observations, each a re-stated total.
    fn record_batch(&self, measurements: &AttributeHashMap<T>, observation_time: SystemTime);
}

/// Writes to every stream an instrument was fanned out to by views.
pub(crate) struct MultiWritable<W: ?Sized> {
    writers: Vec<Arc<W>>,
}

impl<W: ?Sized> MultiWritable<W> {
    pub(crate) fn new(writers: Vec<Arc<W>>) -> Self {
        MultiWritable { writers }
    }
}

impl<T: Copy> SyncWritable<T> for MultiWritable<dyn SyncWritable<T>> {
    fn record(&self, value: T, attributes: &AttributeSet, time: SystemTime) {
        for writer in &self.writers {
            writer.record(value, attributes, time);
        }
    }
}

impl<T> AsyncWritable<T> for MultiWritable<dyn AsyncWritable<T>> {
    fn record_batch(&self, measurements: &AttributeHashMap<T>, observation_time: SystemTime) {
        for writer in &self.writers {
            writer.record_batch(measurements, observation_time);
        }
    }
}
