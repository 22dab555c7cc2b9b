use std::marker::PhantomData;
use std::time::SystemTime;

use telemetry_api::otel_warn;

use crate::metrics::data::{Metric, MetricData, NumberDataPoint, Sum, Temporality};
use crate::metrics::instrument::InstrumentDescriptor;
use crate::metrics::internal::{AttributeHashMap, Number};

use super::{Accumulation, Aggregator};

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct SumAccumulation<T> {
    start_time: SystemTime,
    value: T,
    /// Set when a re-stated monotonic total went backwards, so the value
    /// restarts rather than adds on merge.
    reset: bool,
}

impl<T: Number> Accumulation for SumAccumulation<T> {
    fn set_start_time(&mut self, start_time: SystemTime) {
        self.start_time = start_time;
    }
}

/// Summarizes a set of measurements as their arithmetic sum.
#[derive(Debug)]
pub(crate) struct SumAggregator<T> {
    monotonic: bool,
    _value: PhantomData<T>,
}

impl<T> SumAggregator<T> {
    pub(crate) fn new(monotonic: bool) -> Self {
        SumAggregator {
            monotonic,
            _value: PhantomData,
        }
    }
}

impl<T: Number> Aggregator for SumAggregator<T> {
    type Value = T;
    type Acc = SumAccumulation<T>;

    fn create_accumulation(&self, start_time: SystemTime) -> Self::Acc {
        SumAccumulation {
            start_time,
            value: T::default(),
            reset: false,
        }
    }

    fn record(&self, acc: &mut Self::Acc, value: T, _time: SystemTime) {
        acc.value += value;
    }

    fn merge(&self, previous: &Self::Acc, delta: &Self::Acc) -> Self::Acc {
        if delta.reset {
            return delta.clone();
        }
        SumAccumulation {
            start_time: previous.start_time.min(delta.start_time),
            value: previous.value + delta.value,
            reset: previous.reset,
        }
    }

    fn diff(&self, previous: &Self::Acc, current: &Self::Acc) -> Self::Acc {
        if self.monotonic && current.value < previous.value {
            otel_warn!(
                name: "Sum.CounterReset",
                previous = format!("{}", previous.value),
                current = format!("{}", current.value)
            );
            return SumAccumulation {
                start_time: current.start_time,
                value: current.value,
                reset: true,
            };
        }
        SumAccumulation {
            start_time: current.start_time,
            value: current.value.saturating_diff(previous.value),
            reset: false,
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
            data: T::make_aggregated_metrics(MetricData::Sum(Sum {
                data_points,
                is_monotonic: self.monotonic,
            })),
        })
    }
}
