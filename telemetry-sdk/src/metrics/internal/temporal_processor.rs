use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use crate::metrics::collector::{CollectorHandle, CollectorId};
use crate::metrics::reader::TemporalitySelector;
use crate::metrics::data::{Metric, Temporality};
use crate::metrics::instrument::InstrumentDescriptor;

use super::aggregator::{merge_maps, Accumulation, Aggregator};
use super::AttributeHashMap;

/// Windows kept per collector before they are folded into one.
const MAX_PENDING_WINDOWS: usize = 16;

/// What one collector was last handed.
struct LastReported<Acc> {
    accumulations: AttributeHashMap<Acc>,
    collection_time: SystemTime,
    temporality: Temporality,
}

/// Turns the stream of per-window deltas of one storage into what each
/// collector expects.
///
/// Every window is stashed for every known collector, so a collector that
/// polls less often receives the merge of all windows since its last poll.
/// Cumulative collectors get that merge added to their previous report.
/// Delta collectors get it with start times moved up to their previous
/// collection. A collector that stays away keeps at most
/// [MAX_PENDING_WINDOWS] windows; older ones are folded together. Detached
/// collectors are forgotten.
pub(crate) struct TemporalMetricProcessor<A: Aggregator> {
    aggregator: Arc<A>,
    unreported: HashMap<CollectorId, Vec<Arc<AttributeHashMap<A::Acc>>>>,
    history: HashMap<CollectorId, LastReported<A::Acc>>,
}

impl<A: Aggregator> TemporalMetricProcessor<A> {
    pub(crate) fn new(aggregator: Arc<A>) -> Self {
        TemporalMetricProcessor {
            aggregator,
            unreported: HashMap::new(),
            history: HashMap::new(),
        }
    }

    pub(crate) fn build_metrics(
        &mut self,
        collector: &CollectorHandle,
        all_collectors: &[CollectorHandle],
        descriptor: &InstrumentDescriptor,
        current: AttributeHashMap<A::Acc>,
        collection_time: SystemTime,
    ) -> Option<Metric> {
        self.stash(all_collectors, current);
        if collector.is_detached() {
            return None;
        }
        let unreported = self.merged_unreported(collector.id());

        let (accumulations, temporality) = match self.history.remove(&collector.id()) {
            Some(last) => {
                let result = match last.temporality {
                    Temporality::Delta => {
                        calibrate_start_time(&last.accumulations, unreported, last.collection_time)
                    }
                    Temporality::Cumulative => {
                        merge_maps(&*self.aggregator, last.accumulations, &unreported)
                    }
                };
                (result, last.temporality)
            }
            // first collection by this collector fixes its temporality for good
            None => (unreported, collector.temporality(descriptor.kind())),
        };

        let metric = if accumulations.is_empty() {
            None
        } else {
            self.aggregator.to_metric_data(
                descriptor,
                temporality,
                &accumulations,
                collection_time,
            )
        };

        self.history.insert(
            collector.id(),
            LastReported {
                accumulations,
                collection_time,
                temporality,
            },
        );

        metric
    }

    fn stash(&mut self, all_collectors: &[CollectorHandle], current: AttributeHashMap<A::Acc>) {
        let current = Arc::new(current);
        for collector in all_collectors {
            if collector.is_detached() {
                self.unreported.remove(&collector.id());
                self.history.remove(&collector.id());
                continue;
            }
            let pending = self.unreported.entry(collector.id()).or_default();
            pending.push(Arc::clone(&current));
            if pending.len() > MAX_PENDING_WINDOWS {
                let folded = fold_windows(&*self.aggregator, std::mem::take(pending));
                pending.push(Arc::new(folded));
            }
        }
    }

    fn merged_unreported(&mut self, collector: CollectorId) -> AttributeHashMap<A::Acc> {
        let pending = self
            .unreported
            .get_mut(&collector)
            .map(std::mem::take)
            .unwrap_or_default();
        fold_windows(&*self.aggregator, pending)
    }
}

/// Merges stashed windows, oldest first.
fn fold_windows<A: Aggregator>(
    aggregator: &A,
    windows: Vec<Arc<AttributeHashMap<A::Acc>>>,
) -> AttributeHashMap<A::Acc> {
    let mut windows = windows.into_iter();
    let Some(first) = windows.next() else {
        return AttributeHashMap::new();
    };
    let first = Arc::try_unwrap(first).unwrap_or_else(|shared| (*shared).clone());
    windows.fold(first, |merged, delta| merge_maps(aggregator, merged, &delta))
}

/// Moves the start of every series the collector already saw to its
/// previous collection time. New series keep their own start.
fn calibrate_start_time<Acc: Accumulation>(
    last: &AttributeHashMap<Acc>,
    mut current: AttributeHashMap<Acc>,
    last_collection_time: SystemTime,
) -> AttributeHashMap<Acc> {
    for (attributes, acc) in current.iter_mut() {
        if last.contains(attributes) {
            acc.set_start_time(last_collection_time);
        }
    }
    current
}
