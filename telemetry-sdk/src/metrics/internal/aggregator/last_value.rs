use std::marker::PhantomData;
use std::time::SystemTime;

use crate::metrics::data::{Gauge, Metric, MetricData, NumberDataPoint, Temporality};
use crate::metrics::instrument::InstrumentDescriptor;
use crate::metrics::internal::{AttributeHashMap, Number};

use super::{Accumulation, Aggregator};

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct LastValueAccumulation<T> {
    start_time: SystemTime,
    sample_time: SystemTime,
    value: T,
}

impl<T: Number> Accumulation for LastValueAccumulation<T> {
    fn set_start_time(&mut self, start_time: SystemTime) {
        self.start_time = start_time;
    }
}

/// Summarizes a set of measurements as the last one made.
#[derive(Debug, Default)]
pub(crate) struct LastValueAggregator<T> {
    _value: PhantomData<T>,
}

impl<T> LastValueAggregator<T> {
    pub(crate) fn new() -> Self {
        LastValueAggregator {
            _value: PhantomData,
        }
    }
}

impl<T: Number> Aggregator for LastValueAggregator<T> {
    type Value = T;
    type Acc = LastValueAccumulation<T>;

    fn create_accumulation(&self, start_time: SystemTime) -> Self::Acc {
        LastValueAccumulation {
            start_time,
            sample_time: start_time,
            value: T::default(),
        }
    }

    fn record(&self, acc: &mut Self::Acc, value: T, time: SystemTime) {
        acc.value = value;
        acc.sample_time = time;
    }

    /// Keeps the more recent sample; on equal sample times `delta` wins.
    fn merge(&self, previous: &Self::Acc, delta: &Self::Acc) -> Self::Acc {
        let latest = if previous.sample_time > delta.sample_time {
            previous
        } else {
            delta
        };
        LastValueAccumulation {
            start_time: previous.start_time.min(delta.start_time),
            sample_time: latest.sample_time,
            value: latest.value,
        }
    }

    fn diff(&self, _previous: &Self::Acc, current: &Self::Acc) -> Self::Acc {
        current.clone()
    }

    fn to_metric_data(
        &self,
        descriptor: &InstrumentDescriptor,
        temporality: Temporality,
        accumulations: &AttributeHashMap<Self::Acc>,
        end_time: SystemTime,
    ) -> Option<Metric> {
        let data_points = accumulations
            .iter()
            .map(|(attributes, acc)| NumberDataPoint {
                attributes: attributes.clone(),
                start_time: acc.start_time,
                time: end_time,
                value: acc.value,
            })
            .collect();

        Some(Metric {
            descriptor: descriptor.clone(),
            temporality,
            data: T::make_aggregated_metrics(MetricData::Gauge(Gauge { data_points })),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn sample(start: u64, sampled: u64, value: f64) -> LastValueAccumulation<f64> {
        LastValueAccumulation {
            start_time: at(start),
            sample_time: at(sampled),
            value,
        }
    }

    #[test]
    fn merge_keeps_latest_sample_and_earliest_start() {
        let agg = LastValueAggregator::<f64>::new();
        let older = sample(1, 5, 3.0);
        let newer = sample(4, 9, -1.0);

        for merged in [agg.merge(&older, &newer), agg.merge(&newer, &older)] {
            assert_eq!(merged.value, -1.0);
            assert_eq!(merged.start_time, at(1));
            assert_eq!(merged.sample_time, at(9));
        }
    }

    #[test]
    fn equal_sample_times_prefer_later_argument() {
        let agg = LastValueAggregator::<f64>::new();
        let merged = agg.merge(&sample(1, 5, 1.0), &sample(1, 5, 2.0));
        assert_eq!(merged.value, 2.0);
    }

    #[test]
    fn diff_is_current() {
        let agg = LastValueAggregator::<f64>::new();
        let current = sample(2, 2, 7.5);
        assert_eq!(agg.diff(&sample(1, 1, 100.0), &current), current);
    }
}
