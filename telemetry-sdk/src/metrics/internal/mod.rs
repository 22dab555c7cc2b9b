pub(crate) mod aggregator;
mod async_storage;
mod delta_processor;
mod hash_map;
mod meter_shared_state;
mod observable_registry;
mod registry;
mod storage;
mod sync_storage;
mod temporal_processor;

use std::fmt;
use std::ops::{Add, AddAssign, Sub};

pub(crate) use hash_map::AttributeHashMap;
pub(crate) use meter_shared_state::MeterSharedState;
pub use observable_registry::{BatchObservableResult, Registration};
pub(crate) use observable_registry::{ObservableCore, ObservableRegistry};
pub(crate) use storage::{AsyncWritable, SyncWritable};

use super::data::{AggregatedMetrics, MetricData};
use super::instrument::ValueType;

/// Numeric types instruments record and aggregators accumulate.
pub(crate) trait Number:
    Add<Output = Self>
    + AddAssign
    + Sub<Output = Self>
    + PartialOrd
    + fmt::Debug
    + fmt::Display
    + Clone
    + Copy
    + PartialEq
    + Default
    + Send
    + Sync
    + 'static
{
    /// The value kind instruments of this type are declared with unless
    /// told otherwise.
    const VALUE_TYPE: ValueType;

    fn is_negative(self) -> bool;

    /// Drops any fractional part, rounding toward zero. Returns `None` when
    /// the value was already integral.
    fn truncated(self) -> Option<Self>;

    /// Subtraction that stops at the type's lower bound instead of wrapping.
    fn saturating_diff(self, previous: Self) -> Self;

    fn into_float(self) -> f64;

    fn make_aggregated_metrics(data: MetricData<Self>) -> AggregatedMetrics;
}

impl Number for i64 {
    const VALUE_TYPE: ValueType = ValueType::Int;

    fn is_negative(self) -> bool {
        self < 0
    }

    fn truncated(self) -> Option<Self> {
        None
    }

    fn saturating_diff(self, previous: Self) -> Self {
        self.saturating_sub(previous)
    }

    fn into_float(self) -> f64 {
        // May have precision loss at high values
        self as f64
    }

    fn make_aggregated_metrics(data: MetricData<Self>) -> AggregatedMetrics {
        AggregatedMetrics::I64(data)
    }
}

impl Number for u64 {
    const VALUE_TYPE: ValueType = ValueType::Int;

    fn is_negative(self) -> bool {
        false
    }

    fn truncated(self) -> Option<Self> {
        None
    }

    fn saturating_diff(self, previous: Self) -> Self {
        self.saturating_sub(previous)
    }

    fn into_float(self) -> f64 {
        // May have precision loss at high values
        self as f64
    }

    fn make_aggregated_metrics(data: MetricData<Self>) -> AggregatedMetrics {
        AggregatedMetrics::U64(data)
    }
}

impl Number for f64 {
    const VALUE_TYPE: ValueType = ValueType::Double;

    fn is_negative(self) -> bool {
        self < 0.0
    }

    fn truncated(self) -> Option<Self> {
        let t = self.trunc();
        (t != self && self.is_finite()).then_some(t)
    }

    fn saturating_diff(self, previous: Self) -> Self {
        self - previous
    }

    fn into_float(self) -> f64 {
        self
    }

    fn make_aggregated_metrics(data: MetricData<Self>) -> AggregatedMetrics {
        AggregatedMetrics::F64(data)
    }
}
