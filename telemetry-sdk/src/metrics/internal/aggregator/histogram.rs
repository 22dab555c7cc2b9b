use std::marker::PhantomData;
use std::sync::Arc;
use std::time::SystemTime;

use crate::metrics::data::{Histogram, HistogramDataPoint, Metric, MetricData, Temporality};
use crate::metrics::instrument::InstrumentDescriptor;
use crate::metrics::internal::{AttributeHashMap, Number};

use super::{Accumulation, Aggregator};

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct HistogramAccumulation<T> {
    start_time: SystemTime,
    bucket_counts: Vec<u64>,
    count: u64,
    sum: T,
    min: Option<T>,
    max: Option<T>,
}

impl<T: Number> Accumulation for HistogramAccumulation<T> {
    fn set_start_time(&mut self, start_time: SystemTime) {
        self.start_time = start_time;
    }
}

/// Summarizes a set of measurements as a histogram with explicitly defined
/// buckets.
#[derive(Debug)]
pub(crate) struct HistogramAggregator<T> {
    bounds: Arc<[f64]>,
    record_min_max: bool,
    _value: PhantomData<T>,
}

impl<T> HistogramAggregator<T> {
    /// `bounds` must already be validated: finite, sorted and unique.
    pub(crate) fn new(bounds: Vec<f64>, record_min_max: bool) -> Self {
        HistogramAggregator {
            bounds: bounds.into(),
            record_min_max,
            _value: PhantomData,
        }
    }
}

fn pick<T: Number>(a: Option<T>, b: Option<T>, keep_a: impl Fn(T, T) -> bool) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) => Some(if keep_a(a, b) { a } else { b }),
        (a, None) => a,
        (None, b) => b,
    }
}

impl<T: Number> Aggregator for HistogramAggregator<T> {
    type Value = T;
    type Acc = HistogramAccumulation<T>;

    fn create_accumulation(&self, start_time: SystemTime) -> Self::Acc {
        HistogramAccumulation {
            start_time,
            bucket_counts: vec![0; self.bounds.len() + 1],
            count: 0,
            sum: T::default(),
            min: None,
            max: None,
        }
    }

    fn record(&self, acc: &mut Self::Acc, value: T, _time: SystemTime) {
        // `[0, bounds.len()]`, the last bucket being `(bounds[len-1], +inf)`
        let f = value.into_float();
        let index = self.bounds.partition_point(|&b| b < f);
        acc.bucket_counts[index] += 1;
        acc.count += 1;
        acc.sum += value;
        if self.record_min_max {
            acc.min = pick(acc.min, Some(value), |a, b| a <= b);
            acc.max = pick(acc.max, Some(value), |a, b| a >= b);
        }
    }

    fn merge(&self, previous: &Self::Acc, delta: &Self::Acc) -> Self::Acc {
        HistogramAccumulation {
            start_time: previous.start_time.min(delta.start_time),
            bucket_counts: previous
                .bucket_counts
                .iter()
                .zip(&delta.bucket_counts)
                .map(|(a, b)| a + b)
                .collect(),
            count: previous.count + delta.count,
            sum: previous.sum + delta.sum,
            min: pick(previous.min, delta.min, |a, b| a <= b),
            max: pick(previous.max, delta.max, |a, b| a >= b),
        }
    }

    /// Min and max cannot be recovered from two totals and are dropped.
    fn diff(&self, previous: &Self::Acc, current: &Self::Acc) -> Self::Acc {
        HistogramAccumulation {
            start_time: current.start_time,
            bucket_counts: current
                .bucket_counts
                .iter()
                .zip(&previous.bucket_counts)
                .map(|(c, p)| c.saturating_sub(*p))
                .collect(),
            count: current.count.saturating_sub(previous.count),
            sum: current.sum.saturating_diff(previous.sum),
            min: None,
            max: None,
        }
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
            .map(|(attributes, acc)| HistogramDataPoint {
                attributes: attributes.clone(),
                start_time: acc.start_time,
                time: end_time,
                count: acc.count,
                bounds: self.bounds.to_vec(),
                bucket_counts: acc.bucket_counts.clone(),
                min: acc.min,
                max: acc.max,
                sum: acc.sum,
            })
            .collect();

        Some(Metric {
            descriptor: descriptor.clone(),
            temporality,
            data: T::make_aggregated_metrics(MetricData::Histogram(Histogram { data_points })),
        })
    }
}
