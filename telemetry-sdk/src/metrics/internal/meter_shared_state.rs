use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use telemetry_api::{otel_warn, InstrumentationScope};

use crate::metrics::aggregation::Aggregation;
use crate::metrics::collector::CollectorHandle;
use crate::metrics::data::ScopeMetrics;
use crate::metrics::instrument::{Instrument, InstrumentDescriptor, Stream};
use crate::metrics::view::View;
use crate::metrics::MetricError;

use super::aggregator::{
    Aggregator, DropAggregator, HistogramAggregator, LastValueAggregator, SumAggregator,
};
use super::async_storage::AsyncMetricStorage;
use super::delta_processor::DEFAULT_CARDINALITY_LIMIT;
use super::registry::MetricStorageRegistry;
use super::storage::{AsyncWritable, MetricStorage, MultiWritable, SyncWritable};
use super::sync_storage::SyncMetricStorage;
use super::{Number, ObservableRegistry};

/// Everything a storage needs besides its aggregator.
struct StreamConfig {
    descriptor: InstrumentDescriptor,
    allowed_keys: Option<Arc<HashSet<telemetry_api::Key>>>,
    cardinality_limit: usize,
}

/// Builds one flavour of storage around whichever aggregator a stream
/// resolves to.
trait StorageFlavor<T: Number> {
    type Writer: ?Sized + Send + Sync + 'static;

    fn build<A: Aggregator<Value = T>>(
        config: StreamConfig,
        aggregator: A,
    ) -> (Arc<dyn MetricStorage>, Arc<Self::Writer>);

    fn fan_out(writers: Vec<Arc<Self::Writer>>) -> Arc<Self::Writer>;
}

struct Synchronous;

impl<T: Number> StorageFlavor<T> for Synchronous {
    type Writer = dyn SyncWritable<T>;

    fn build<A: Aggregator<Value = T>>(
        config: StreamConfig,
        aggregator: A,
    ) -> (Arc<dyn MetricStorage>, Arc<dyn SyncWritable<T>>) {
        let storage = Arc::new(SyncMetricStorage::new(
            config.descriptor,
            aggregator,
            config.allowed_keys,
            config.cardinality_limit,
        ));
        (Arc::clone(&storage) as Arc<dyn MetricStorage>, storage)
    }

    fn fan_out(writers: Vec<Arc<dyn SyncWritable<T>>>) -> Arc<dyn SyncWritable<T>> {
        Arc::new(MultiWritable::new(writers))
    }
}

struct Asynchronous;

impl<T: Number> StorageFlavor<T> for Asynchronous {
    type Writer = dyn AsyncWritable<T>;

    fn build<A: Aggregator<Value = T>>(
        config: StreamConfig,
        aggregator: A,
    ) -> (Arc<dyn MetricStorage>, Arc<dyn AsyncWritable<T>>) {
        let storage = Arc::new(AsyncMetricStorage::new(
            config.descriptor,
            aggregator,
            config.allowed_keys,
            config.cardinality_limit,
        ));
        (Arc::clone(&storage) as Arc<dyn MetricStorage>, storage)
    }

    fn fan_out(writers: Vec<Arc<dyn AsyncWritable<T>>>) -> Arc<dyn AsyncWritable<T>> {
        Arc::new(MultiWritable::new(writers))
    }
}

/// The streams and callbacks of one meter.
pub(crate) struct MeterSharedState {
    scope: InstrumentationScope,
    views: Arc<[Arc<dyn View>]>,
    registry: MetricStorageRegistry,
    observables: Arc<ObservableRegistry>,
}

impl MeterSharedState {
    pub(crate) fn new(scope: InstrumentationScope, views: Arc<[Arc<dyn View>]>) -> Self {
        MeterSharedState {
            scope,
            views,
            registry: MetricStorageRegistry::default(),
            observables: Arc::new(ObservableRegistry::default()),
        }
    }

    pub(crate) fn scope(&self) -> &InstrumentationScope {
        &self.scope
    }

    pub(crate) fn observables(&self) -> &Arc<ObservableRegistry> {
        &self.observables
    }

    /// The record side for a synchronous instrument, fanned out to one
    /// stream per matching view. `None` if no stream could be registered.
    pub(crate) fn register_sync<T: Number>(
        &self,
        descriptor: &InstrumentDescriptor,
        advised_boundaries: Option<&[f64]>,
    ) -> Option<Arc<dyn SyncWritable<T>>> {
        self.register::<T, Synchronous>(descriptor, advised_boundaries)
    }

    /// The record side for an observable instrument.
    pub(crate) fn register_async<T: Number>(
        &self,
        descriptor: &InstrumentDescriptor,
    ) -> Option<Arc<dyn AsyncWritable<T>>> {
        self.register::<T, Asynchronous>(descriptor, None)
    }

    fn register<T: Number, F: StorageFlavor<T>>(
        &self,
        descriptor: &InstrumentDescriptor,
        advised_boundaries: Option<&[f64]>,
    ) -> Option<Arc<F::Writer>> {
        let instrument = Instrument::from_descriptor(descriptor, &self.scope);
        let mut streams: Vec<Stream> = self
            .views
            .iter()
            .filter_map(|view| view.match_inst(&instrument))
            .collect();
        if streams.is_empty() {
            streams.push(Stream::default());
        }

        let mut stream_names = HashSet::new();
        let mut writers = Vec::with_capacity(streams.len());
        for stream in streams {
            let stream_descriptor = InstrumentDescriptor {
                name: stream.name.clone().unwrap_or_else(|| descriptor.name.clone()),
                description: stream
                    .description
                    .clone()
                    .unwrap_or_else(|| descriptor.description.clone()),
                ..descriptor.clone()
            };
            // two views renaming to the same stream must not double count
            if !stream_names.insert(stream_descriptor.normalized_name()) {
                continue;
            }

            let aggregation = stream
                .aggregation
                .clone()
                .unwrap_or(Aggregation::Default)
                .resolve(descriptor.kind, advised_boundaries);
            if let Err(err) = aggregation.check_compatible(descriptor.kind) {
                otel_warn!(
                    name: "View.IncompatibleAggregation",
                    instrument = descriptor.name().to_string(),
                    error = format!("{err}")
                );
                continue;
            }

            let config = StreamConfig {
                descriptor: stream_descriptor.clone(),
                allowed_keys: stream.allowed_attribute_keys.clone(),
                cardinality_limit: stream
                    .cardinality_limit
                    .unwrap_or(DEFAULT_CARDINALITY_LIMIT),
            };
            let registered = self.registry.find_or_register(&stream_descriptor, || {
                build_storage::<T, F>(config, aggregation, descriptor.kind.is_monotonic())
            });
            match registered {
                Ok(writer) => writers.push(writer),
                Err(err) => {
                    otel_warn!(
                        name: "Meter.StreamRegistrationFailed",
                        stream = stream_descriptor.name().to_string(),
                        error = format!("{err}")
                    );
                }
            }
        }

        match writers.len() {
            0 => None,
            1 => writers.pop(),
            _ => Some(F::fan_out(writers)),
        }
    }

    /// Runs this meter's callbacks, then snapshots each of its streams for
    /// `collector`. Scopes without data are left out.
    pub(crate) fn collect(
        &self,
        collector: &CollectorHandle,
        all_collectors: &[CollectorHandle],
        collection_time: SystemTime,
        deadline: Option<Instant>,
    ) -> (Option<ScopeMetrics>, Vec<MetricError>) {
        let errors = self.observables.observe(collection_time, deadline);

        let metrics: Vec<_> = self
            .registry
            .storages()
            .iter()
            .filter_map(|storage| storage.collect(collector, all_collectors, collection_time))
            .collect();

        let scope_metrics = (!metrics.is_empty()).then(|| ScopeMetrics {
            scope: self.scope.clone(),
            metrics,
        });
        (scope_metrics, errors)
    }
}

fn build_storage<T: Number, F: StorageFlavor<T>>(
    config: StreamConfig,
    aggregation: Aggregation,
    monotonic: bool,
) -> (Arc<dyn MetricStorage>, Arc<F::Writer>) {
    match aggregation {
        Aggregation::Drop => F::build(config, DropAggregator::<T>::new()),
        Aggregation::LastValue => F::build(config, LastValueAggregator::<T>::new()),
        Aggregation::ExplicitBucketHistogram {
            boundaries,
            record_min_max,
        } => F::build(config, HistogramAggregator::<T>::new(boundaries, record_min_max)),
        // `resolve` leaves no `Default` behind
        Aggregation::Sum | Aggregation::Default => {
            F::build(config, SumAggregator::<T>::new(monotonic))
        }
    }
}
