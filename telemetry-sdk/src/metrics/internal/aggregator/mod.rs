//! Per-stream aggregation rules.
//!
//! An [Aggregator] never owns state of its own. It creates [Accumulation]s,
//! folds measurements into them, and knows how to combine two of them
//! ([Aggregator::merge]) or recover the change between two re-stated totals
//! ([Aggregator::diff]). The storages decide when each is applied.

mod drop;
mod histogram;
mod last_value;
mod sum;

use std::fmt;
use std::time::SystemTime;

use crate::metrics::data::{Metric, Temporality};
use crate::metrics::instrument::InstrumentDescriptor;

use super::{AttributeHashMap, Number};

pub(crate) use drop::DropAggregator;
pub(crate) use histogram::HistogramAggregator;
pub(crate) use last_value::LastValueAggregator;
pub(crate) use sum::SumAggregator;

/// Aggregator-specific state for one attribute set between two collections.
pub(crate) trait Accumulation: Clone + fmt::Debug + Send + Sync + 'static {
    fn set_start_time(&mut self, start_time: SystemTime);
}

/// Forms accumulations from measurements and turns them into data points.
pub(crate) trait Aggregator: Send + Sync + 'static {
    type Value: Number;
    type Acc: Accumulation;

    fn create_accumulation(&self, start_time: SystemTime) -> Self::Acc;

    /// Folds one measurement taken at `time` into `acc`.
    fn record(&self, acc: &mut Self::Acc, value: Self::Value, time: SystemTime);

    /// Combines an earlier accumulation with a later one covering the
    /// following window.
    fn merge(&self, previous: &Self::Acc, delta: &Self::Acc) -> Self::Acc;

    /// The change from `previous` to `current`, both being re-stated totals.
    fn diff(&self, previous: &Self::Acc, current: &Self::Acc) -> Self::Acc;

    /// Builds the exported form of `accumulations`. Returns `None` when the
    /// aggregation produces no data.
    fn to_metric_data(
        &self,
        descriptor: &InstrumentDescriptor,
        temporality: Temporality,
        accumulations: &AttributeHashMap<Self::Acc>,
        end_time: SystemTime,
    ) -> Option<Metric>;
}

/// Applies [Aggregator::merge] to every entry of `delta`, keeping entries
/// present on only one side as they are.
pub(crate) fn merge_maps<A: Aggregator>(
    aggregator: &A,
    mut previous: AttributeHashMap<A::Acc>,
    delta: &AttributeHashMap<A::Acc>,
) -> AttributeHashMap<A::Acc> {
    for (attributes, acc) in delta.iter() {
        let merged = match previous.get(attributes) {
            Some(prev) => aggregator.merge(prev, acc),
            None => acc.clone(),
        };
        previous.set(attributes.clone(), merged);
    }
    previous
}
