use std::marker::PhantomData;
use std::time::SystemTime;

use crate::metrics::data::{Metric, Temporality};
use crate::metrics::instrument::InstrumentDescriptor;
use crate::metrics::internal::{AttributeHashMap, Number};

use super::{Accumulation, Aggregator};

#[derive(Clone, Debug)]
pub(crate) struct DropAccumulation;

impl Accumulation for DropAccumulation {
    fn set_start_time(&mut self, _start_time: SystemTime) {}
}

/// Discards every measurement.
#[derive(Debug, Default)]
pub(crate) struct DropAggregator<T> {
    _value: PhantomData<T>,
}

impl<T> DropAggregator<T> {
    pub(crate) fn new() -> Self {
        DropAggregator {
            _value: PhantomData,
        }
    }
}

impl<T: Number> Aggregator for DropAggregator<T> {
    type Value = T;
    type Acc = DropAccumulation;

    fn create_accumulation(&self, _start_time: SystemTime) -> Self::Acc {
        DropAccumulation
    }

    fn record(&self, _acc: &mut Self::Acc, _value: T, _time: SystemTime) {}

    fn merge(&self, _previous: &Self::Acc, _delta: &Self::Acc) -> Self::Acc {
        DropAccumulation
    }

    fn diff(&self, _previous: &Self::Acc, _current: &Self::Acc) -> Self::Acc {
        DropAccumulation
    }

    fn to_metric_data(
        &self,
        _descriptor: &InstrumentDescriptor,
        _temporality: Temporality,
        _accumulations: &AttributeHashMap<Self::Acc>,
        _end_time: SystemTime,
    ) -> Option<Metric> {
        None
    }
}
