use std::sync::Arc;
use std::time::SystemTime;

use telemetry_api::otel_warn;

use crate::metrics::attributes::AttributeSet;

use super::aggregator::Aggregator;
use super::AttributeHashMap;

/// The number of attribute sets a stream holds per collection window unless
/// a view says otherwise.
pub(crate) const DEFAULT_CARDINALITY_LIMIT: usize = 2000;

/// Accumulates everything recorded since the last collection.
///
/// Synchronous instruments record increments in place. Observable
/// instruments re-state their totals each cycle, so those are diffed
/// against the previous observation before joining the window.
pub(crate) struct DeltaMetricProcessor<A: Aggregator> {
    aggregator: Arc<A>,
    active: AttributeHashMap<A::Acc>,
    /// Last observed total per attribute set, observable instruments only.
    cumulative_memo: AttributeHashMap<A::Acc>,
    cardinality_limit: usize,
    overflow_reported: bool,
}

impl<A: Aggregator> DeltaMetricProcessor<A> {
    pub(crate) fn new(aggregator: Arc<A>, cardinality_limit: usize) -> Self {
        DeltaMetricProcessor {
            aggregator,
            active: AttributeHashMap::new(),
            cumulative_memo: AttributeHashMap::new(),
            cardinality_limit,
            overflow_reported: false,
        }
    }

    /// Maps a new attribute set to the overflow set once `tracked` is full.
    /// The overflow set takes the last slot under the limit.
    fn admit<'a>(
        &mut self,
        attributes: &'a AttributeSet,
        tracked: usize,
        known: bool,
    ) -> Option<&'a AttributeSet> {
        if known || tracked < self.cardinality_limit.saturating_sub(1) {
            return Some(attributes);
        }
        if !self.overflow_reported {
            self.overflow_reported = true;
            otel_warn!(
                name: "Metric.CardinalityLimitReached",
                limit = self.cardinality_limit as u64,
                message = "New attribute sets are aggregated into the overflow series"
            );
        }
        None
    }

    pub(crate) fn record(&mut self, value: A::Value, attributes: &AttributeSet, time: SystemTime) {
        let known = self.active.contains(attributes);
        let overflow;
        let key = match self.admit(attributes, self.active.len(), known) {
            Some(key) => key,
            None => {
                overflow = AttributeSet::overflow();
                &overflow
            }
        };

        let aggregator = &self.aggregator;
        let acc = self
            .active
            .get_or_insert_with(key, || aggregator.create_accumulation(time));
        aggregator.record(acc, value, time);
    }

    /// Folds one cycle of re-stated totals into the window.
    pub(crate) fn batch_cumulate(
        &mut self,
        measurements: AttributeHashMap<A::Value>,
        time: SystemTime,
    ) {
        let mut overflowed: Option<A::Acc> = None;
        for (attributes, value) in measurements {
            let known = self.cumulative_memo.contains(&attributes);
            if self
                .admit(&attributes, self.cumulative_memo.len(), known)
                .is_none()
            {
                let acc = overflowed.get_or_insert_with(|| self.aggregator.create_accumulation(time));
                self.aggregator.record(acc, value, time);
                continue;
            }

            let mut acc = self.aggregator.create_accumulation(time);
            self.aggregator.record(&mut acc, value, time);
            self.cumulate(attributes, acc);
        }

        if let Some(acc) = overflowed {
            self.cumulate(AttributeSet::overflow(), acc);
        }
    }

    fn cumulate(&mut self, attributes: AttributeSet, observed: A::Acc) {
        let mut delta = match self.cumulative_memo.get(&attributes) {
            Some(previous) => self.aggregator.diff(previous, &observed),
            None => observed.clone(),
        };
        if let Some(active) = self.active.get(&attributes) {
            delta = self.aggregator.merge(active, &delta);
        }
        self.cumulative_memo.set(attributes.clone(), observed);
        self.active.set(attributes, delta);
    }

    /// Ends the current window, handing its accumulations to the caller.
    pub(crate) fn collect(&mut self) -> AttributeHashMap<A::Acc> {
        std::mem::take(&mut self.active)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use telemetry_api::KeyValue;

    use super::*;
    use crate::metrics::data::{AggregatedMetrics, MetricData, Temporality};
    use crate::metrics::instrument::{InstrumentDescriptor, InstrumentKind, ValueType};
    use crate::metrics::internal::aggregator::SumAggregator;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn attrs(v: i64) -> AttributeSet {
        AttributeSet::from([KeyValue::new("k", v)])
    }

    fn sums(map: &AttributeHashMap<<SumAggregator<u64> as Aggregator>::Acc>) -> Vec<(AttributeSet, u64)> {
        let descriptor = InstrumentDescriptor {
            name: "test".into(),
            description: "".into(),
            unit: "".into(),
            kind: InstrumentKind::Counter,
            value_type: ValueType::Int,
        };
        let metric = SumAggregator::<u64>::new(true)
            .to_metric_data(&descriptor, Temporality::Delta, map, at(100))
            .expect("sum always produces data");
        match metric.data {
            AggregatedMetrics::U64(MetricData::Sum(sum)) => sum
                .data_points
                .into_iter()
                .map(|dp| (dp.attributes, dp.value))
                .collect(),
            other => panic!("unexpected data {other:?}"),
        }
    }

    #[test]
    fn record_accumulates_until_collect() {
        let mut processor = DeltaMetricProcessor::new(Arc::new(SumAggregator::new(true)), 10);
        processor.record(1, &attrs(1), at(1));
        processor.record(2, &attrs(1), at(2));
        processor.record(5, &attrs(2), at(3));

        assert_eq!(sums(&processor.collect()), vec![(attrs(1), 3), (attrs(2), 5)]);
        assert!(processor.collect().is_empty(), "collect starts a new window");
    }

    #[test]
    fn batch_cumulate_reports_change_since_last_observation() {
        let mut processor = DeltaMetricProcessor::new(Arc::new(SumAggregator::new(true)), 10);
        let observe = |v: u64| -> AttributeHashMap<u64> { [(attrs(1), v)].into_iter().collect() };

        processor.batch_cumulate(observe(10), at(1));
        assert_eq!(sums(&processor.collect()), vec![(attrs(1), 10)]);

        processor.batch_cumulate(observe(15), at(2));
        assert_eq!(sums(&processor.collect()), vec![(attrs(1), 5)]);

        // two observations inside one window add up to the change across both
        processor.batch_cumulate(observe(18), at(3));
        processor.batch_cumulate(observe(20), at(4));
        assert_eq!(sums(&processor.collect()), vec![(attrs(1), 5)]);
    }

    #[test]
    fn cardinality_limit_folds_into_overflow() {
        let mut processor = DeltaMetricProcessor::new(Arc::new(SumAggregator::new(true)), 3);
        for i in 0..5 {
            processor.record(1, &attrs(i), at(1));
        }
        // known sets keep recording into their own series
        processor.record(1, &attrs(0), at(2));

        let collected = sums(&processor.collect());
        assert_eq!(
            collected,
            vec![(attrs(0), 2), (attrs(1), 1), (AttributeSet::overflow(), 3)]
        );
    }

    #[test]
    fn batch_cardinality_limit_folds_into_overflow() {
        let mut processor = DeltaMetricProcessor::new(Arc::new(SumAggregator::new(true)), 2);
        let batch: AttributeHashMap<u64> = (0..3).map(|i| (attrs(i), 10)).collect();
        processor.batch_cumulate(batch, at(1));
        assert_eq!(
            sums(&processor.collect()),
            vec![(attrs(0), 10), (AttributeSet::overflow(), 20)]
        );
    }
}
