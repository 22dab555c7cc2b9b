//! Types for delivery of pre-aggregated metric time series data.
//!
//! Every value here is produced fresh by a collection and is never touched
//! by the SDK again once returned.

mod temporality;

use std::time::SystemTime;

use telemetry_api::InstrumentationScope;

use crate::Resource;

use super::attributes::AttributeSet;
use super::instrument::InstrumentDescriptor;

pub use temporality::Temporality;

/// A collection of [ScopeMetrics] and the associated [Resource] that created them.
#[derive(Debug, Clone)]
pub struct ResourceMetrics {
    /// The entity that collected the metrics.
    pub resource: Resource,
    /// The collection of metrics with unique [InstrumentationScope]s.
    pub scope_metrics: Vec<ScopeMetrics>,
}

/// A collection of metrics produced by a meter.
#[derive(Default, Debug, Clone)]
pub struct ScopeMetrics {
    /// The [InstrumentationScope] that the meter was created with.
    pub scope: InstrumentationScope,
    /// The list of aggregations created by the meter.
    pub metrics: Vec<Metric>,
}

/// One aggregated stream as seen by one reader.
#[derive(Debug, Clone)]
pub struct Metric {
    /// Identity of the stream after views were applied.
    pub descriptor: InstrumentDescriptor,
    /// The temporality the requesting reader chose for this stream.
    pub temporality: Temporality,
    /// The aggregated data points.
    pub data: AggregatedMetrics,
}

impl Metric {
    /// Stream name.
    pub fn name(&self) -> &str {
        self.descriptor.name()
    }
}

/// Aggregated metrics data from an instrument
#[derive(Debug, Clone)]
pub enum AggregatedMetrics {
    /// All metric data with `f64` value type
    F64(MetricData<f64>),
    /// All metric data with `u64` value type
    U64(MetricData<u64>),
    /// All metric data with `i64` value type
    I64(MetricData<i64>),
}

/// Metric data for all aggregations.
#[derive(Debug, Clone)]
pub enum MetricData<T> {
    /// Metric data for Gauge
    Gauge(Gauge<T>),
    /// Metric data for Sum
    Sum(Sum<T>),
    /// Metric data for Histogram
    Histogram(Histogram<T>),
}

impl<T> MetricData<T> {
    /// Number of data points.
    pub fn len(&self) -> usize {
        match self {
            MetricData::Gauge(g) => g.data_points.len(),
            MetricData::Sum(s) => s.data_points.len(),
            MetricData::Histogram(h) => h.data_points.len(),
        }
    }

    /// Whether there are no data points.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AggregatedMetrics {
    /// Number of data points.
    pub fn len(&self) -> usize {
        match self {
            AggregatedMetrics::F64(d) => d.len(),
            AggregatedMetrics::U64(d) => d.len(),
            AggregatedMetrics::I64(d) => d.len(),
        }
    }

    /// Whether there are no data points.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A single value of a sum or gauge time series.
#[derive(Debug, Clone, PartialEq)]
pub struct NumberDataPoint<T> {
    /// Attributes is the set of key value pairs that uniquely identify the
    /// time series.
    pub attributes: AttributeSet,
    /// Beginning of the window this point covers.
    pub start_time: SystemTime,
    /// The collection time.
    pub time: SystemTime,
    /// The value of this data point.
    pub value: T,
}

/// A measurement of the current value of an instrument.
#[derive(Debug, Clone)]
pub struct Gauge<T> {
    /// Represents individual aggregated measurements with unique attributes.
    pub data_points: Vec<NumberDataPoint<T>>,
}

/// Represents the sum of all measurements of values from an instrument.
#[derive(Debug, Clone)]
pub struct Sum<T> {
    /// Represents individual aggregated measurements with unique attributes.
    pub data_points: Vec<NumberDataPoint<T>>,
    /// Whether this aggregation only increases.
    pub is_monotonic: bool,
}

/// Represents the histogram of all measurements of values from an instrument.
#[derive(Debug, Clone)]
pub struct Histogram<T> {
    /// Individual aggregated measurements with unique attributes.
    pub data_points: Vec<HistogramDataPoint<T>>,
}

/// A single histogram data point in a time series.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramDataPoint<T> {
    /// The set of key value pairs that uniquely identify the time series.
    pub attributes: AttributeSet,
    /// Beginning of the window this point covers.
    pub start_time: SystemTime,
    /// The collection time.
    pub time: SystemTime,
    /// The number of updates this histogram has been calculated with.
    pub count: u64,
    /// The upper bounds of the buckets of the histogram.
    ///
    /// Because the last boundary is +infinity this one is implied.
    pub bounds: Vec<f64>,
    /// The count of each of the buckets.
    pub bucket_counts: Vec<u64>,
    /// The minimum value recorded.
    pub min: Option<T>,
    /// The maximum value recorded.
    pub max: Option<T>,
    /// The sum of the values recorded.
    pub sum: T,
}
