use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use telemetry_api::otel_debug;

use crate::Resource;

use super::data::{ResourceMetrics, Temporality};
use super::instrument::InstrumentKind;
use super::internal::MeterSharedState;
use super::reader::{MetricReader, TemporalitySelector};
use super::view::View;
use super::MetricError;

/// Process-unique identity of one collector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct CollectorId(u64);

impl CollectorId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        CollectorId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Opaque handle for one reader, used by storages as a map key and asked
/// for a temporality once per stream.
#[derive(Clone)]
pub(crate) struct CollectorHandle {
    id: CollectorId,
    reader: Arc<dyn MetricReader>,
    // shared by all clones of the handle
    detached: Arc<AtomicBool>,
}

impl CollectorHandle {
    pub(crate) fn new(reader: Arc<dyn MetricReader>) -> Self {
        CollectorHandle {
            id: CollectorId::next(),
            reader,
            detached: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A detached collector will never collect again, so storages neither
    /// keep windows nor history for it.
    pub(crate) fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Relaxed)
    }

    pub(crate) fn detach(&self) {
        self.detached.store(true, Ordering::Relaxed);
    }

    pub(crate) fn id(&self) -> CollectorId {
        self.id
    }

    pub(crate) fn reader(&self) -> &Arc<dyn MetricReader> {
        &self.reader
    }
}

impl TemporalitySelector for CollectorHandle {
    fn temporality(&self, kind: InstrumentKind) -> Temporality {
        self.reader.temporality(kind)
    }
}

impl PartialEq for CollectorHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for CollectorHandle {}

impl Hash for CollectorHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

impl fmt::Debug for CollectorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectorHandle")
            .field("id", &self.id.0)
            .field("detached", &self.is_detached())
            .field("reader", &self.reader)
            .finish()
    }
}

/// Options for a single collection.
#[derive(Clone, Copy, Debug, Default)]
pub struct CollectionOptions {
    /// Upper bound for running all observable callbacks of the collection.
    /// Callbacks that have not finished by then are abandoned and reported
    /// as errors. `None` waits for every callback.
    pub timeout: Option<Duration>,
}

/// The outcome of one collection.
#[derive(Debug)]
pub struct CollectionResult {
    /// Data for every stream that had something to report.
    pub resource_metrics: ResourceMetrics,
    /// Observable callbacks that failed or timed out. Streams fed by those
    /// callbacks get no new observations this cycle: delta collectors see
    /// no change for them and cumulative collectors see their previous
    /// totals.
    pub errors: Vec<MetricError>,
}

/// State shared by the provider, its meters and its collectors.
pub(crate) struct MeterProviderSharedState {
    pub(crate) resource: Resource,
    pub(crate) views: Arc<[Arc<dyn View>]>,
    pub(crate) collectors: Vec<CollectorHandle>,
    /// In creation order, so snapshots list scopes deterministically.
    pub(crate) meters: Mutex<Vec<Arc<MeterSharedState>>>,
}

/// The link between one reader and the provider it reads from.
///
/// Readers receive a weak reference through
/// [MetricReader::register_collector] and call [MetricCollector::collect]
/// whenever they want a snapshot.
pub struct MetricCollector {
    handle: CollectorHandle,
    shared: Arc<MeterProviderSharedState>,
}

impl MetricCollector {
    pub(crate) fn new(handle: CollectorHandle, shared: Arc<MeterProviderSharedState>) -> Self {
        MetricCollector { handle, shared }
    }

    pub(crate) fn handle(&self) -> &CollectorHandle {
        &self.handle
    }

    /// Tells every storage that this collector is gone.
    ///
    /// Readers call this on shutdown. Windows stashed for the collector are
    /// released on the next collection of any other collector, and none are
    /// kept for it from then on.
    pub fn detach(&self) {
        otel_debug!(name: "MetricCollector.Detached", id = self.handle.id.0);
        self.handle.detach();
    }

    /// Runs every meter's observable callbacks, then snapshots every stream
    /// for this collector.
    pub fn collect(&self, options: CollectionOptions) -> CollectionResult {
        let collection_time = telemetry_api::time::now();
        let deadline = options.timeout.map(|t| Instant::now() + t);

        let meters: Vec<Arc<MeterSharedState>> = match self.shared.meters.lock() {
            Ok(meters) => meters.clone(),
            Err(err) => {
                return CollectionResult {
                    resource_metrics: ResourceMetrics {
                        resource: self.shared.resource.clone(),
                        scope_metrics: Vec::new(),
                    },
                    errors: vec![err.into()],
                }
            }
        };

        let mut scope_metrics = Vec::with_capacity(meters.len());
        let mut errors = Vec::new();
        for meter in meters {
            let (metrics, errs) =
                meter.collect(&self.handle, &self.shared.collectors, collection_time, deadline);
            scope_metrics.extend(metrics);
            errors.extend(errs);
        }

        otel_debug!(
            name: "MetricCollector.Collected",
            scopes = scope_metrics.len() as u64,
            errors = errors.len() as u64
        );

        CollectionResult {
            resource_metrics: ResourceMetrics {
                resource: self.shared.resource.clone(),
                scope_metrics,
            },
            errors,
        }
    }
}

impl fmt::Debug for MetricCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricCollector")
            .field("handle", &self.handle)
            .finish()
    }
}
