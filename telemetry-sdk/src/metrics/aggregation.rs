use std::fmt;

use super::error::{MetricError, MetricResult};
use super::instrument::InstrumentKind;

/// Explicit bucket boundaries used when a histogram is created without
/// boundaries of its own.
pub(crate) const DEFAULT_HISTOGRAM_BOUNDARIES: [f64; 15] = [
    0.0, 5.0, 10.0, 25.0, 50.0, 75.0, 100.0, 250.0, 500.0, 750.0, 1000.0, 2500.0, 5000.0, 7500.0,
    10000.0,
];

/// The way recorded measurements are summarized.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Aggregation {
    /// An aggregation that drops all recorded data.
    Drop,

    /// An aggregation that uses the default instrument kind selection mapping to
    /// select another aggregation.
    ///
    /// | Instrument Kind          | Aggregation                |
    /// |--------------------------|----------------------------|
    /// | Counter                  | [Aggregation::Sum]         |
    /// | UpDownCounter            | [Aggregation::Sum]         |
    /// | Histogram                | [Aggregation::ExplicitBucketHistogram] with the default boundaries |
    /// | ObservableCounter        | [Aggregation::Sum]         |
    /// | ObservableUpDownCounter  | [Aggregation::Sum]         |
    /// | ObservableGauge          | [Aggregation::LastValue]   |
    Default,

    /// An aggregation that summarizes a set of measurements as their arithmetic
    /// sum.
    Sum,

    /// An aggregation that summarizes a set of measurements as the last one made.
    LastValue,

    /// An aggregation that summarizes a set of measurements as a histogram with
    /// explicitly defined buckets.
    ExplicitBucketHistogram {
        /// The increasing bucket boundary values.
        ///
        /// Boundary values define bucket upper bounds. Buckets are exclusive of
        /// their lower boundary and inclusive of their upper bound (except at
        /// positive infinity). A measurement is defined to fall into the
        /// greatest-numbered bucket with a boundary that is greater than or
        /// equal to the measurement.
        boundaries: Vec<f64>,

        /// Indicates whether to record min and max measurements.
        record_min_max: bool,
    },
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Aggregation::Drop => "Drop",
            Aggregation::Default => "Default",
            Aggregation::Sum => "Sum",
            Aggregation::LastValue => "LastValue",
            Aggregation::ExplicitBucketHistogram { .. } => "ExplicitBucketHistogram",
        };

        f.write_str(name)
    }
}

impl Aggregation {
    /// Validate that this aggregation has correct configuration.
    pub fn validate(&self) -> MetricResult<()> {
        match self {
            Aggregation::ExplicitBucketHistogram { boundaries, .. } => {
                validate_bucket_boundaries(boundaries)
            }
            _ => Ok(()),
        }
    }

    /// Replaces [Aggregation::Default] with the concrete aggregation used for
    /// `kind`. Histograms use `advised_boundaries` when given.
    pub(crate) fn resolve(
        self,
        kind: InstrumentKind,
        advised_boundaries: Option<&[f64]>,
    ) -> Aggregation {
        match self {
            Aggregation::Default => match kind {
                InstrumentKind::Counter
                | InstrumentKind::UpDownCounter
                | InstrumentKind::ObservableCounter
                | InstrumentKind::ObservableUpDownCounter => Aggregation::Sum,
                InstrumentKind::ObservableGauge => Aggregation::LastValue,
                InstrumentKind::Histogram => Aggregation::ExplicitBucketHistogram {
                    boundaries: advised_boundaries
                        .map(<[f64]>::to_vec)
                        .unwrap_or_else(|| DEFAULT_HISTOGRAM_BOUNDARIES.to_vec()),
                    record_min_max: true,
                },
            },
            other => other,
        }
    }

    /// Checks that this (resolved) aggregation can summarize measurements
    /// from an instrument of `kind`.
    pub(crate) fn check_compatible(&self, kind: InstrumentKind) -> MetricResult<()> {
        let compatible = match self {
            Aggregation::Drop | Aggregation::Default => true,
            Aggregation::ExplicitBucketHistogram { .. } => true,
            Aggregation::Sum => kind != InstrumentKind::ObservableGauge,
            Aggregation::LastValue => kind == InstrumentKind::ObservableGauge,
        };
        if compatible {
            Ok(())
        } else {
            Err(MetricError::IncompatibleAggregation {
                aggregation: self.to_string(),
                kind,
            })
        }
    }
}

pub(crate) fn validate_bucket_boundaries(boundaries: &[f64]) -> MetricResult<()> {
    if boundaries.iter().any(|b| !b.is_finite()) {
        return Err(MetricError::Config(
            "bucket boundaries must not contain NaN, Infinity, or -Infinity".into(),
        ));
    }
    if boundaries.windows(2).any(|w| w[0] >= w[1]) {
        return Err(MetricError::Config(format!(
            "bucket boundaries must be sorted and not contain any duplicates: {boundaries:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_histogram_boundaries() {
        let cases: Vec<(Vec<f64>, bool)> = vec![
            (vec![], true),
            (vec![1.0], true),
            (vec![0.0, 5.0, 10.0], true),
            (vec![5.0, 1.0], false),
            (vec![1.0, 1.0], false),
            (vec![1.0, f64::NAN], false),
            (vec![f64::NEG_INFINITY, 0.0], false),
        ];
        for (boundaries, valid) in cases {
            let agg = Aggregation::ExplicitBucketHistogram {
                boundaries: boundaries.clone(),
                record_min_max: true,
            };
            assert_eq!(
                agg.validate().is_ok(),
                valid,
                "unexpected validation result for {boundaries:?}"
            );
        }
    }

    #[test]
    fn default_resolves_by_kind() {
        use InstrumentKind::*;
        for kind in [Counter, UpDownCounter, ObservableCounter, ObservableUpDownCounter] {
            assert_eq!(Aggregation::Default.resolve(kind, None), Aggregation::Sum);
        }
        assert_eq!(
            Aggregation::Default.resolve(ObservableGauge, None),
            Aggregation::LastValue
        );
        assert_eq!(
            Aggregation::Default.resolve(Histogram, Some(&[1.0, 2.0])),
            Aggregation::ExplicitBucketHistogram {
                boundaries: vec![1.0, 2.0],
                record_min_max: true
            }
        );
        assert_eq!(
            Aggregation::Sum.resolve(ObservableGauge, None),
            Aggregation::Sum,
            "explicit aggregations are kept as is"
        );
    }

    #[test]
    fn compatibility_table() {
        use InstrumentKind::*;
        assert!(Aggregation::Sum.check_compatible(Histogram).is_ok());
        assert!(Aggregation::Sum.check_compatible(ObservableGauge).is_err());
        assert!(Aggregation::LastValue.check_compatible(Counter).is_err());
        assert!(Aggregation::LastValue.check_compatible(ObservableGauge).is_ok());
        assert!(Aggregation::Drop.check_compatible(ObservableGauge).is_ok());
        let hist = Aggregation::Default.resolve(Histogram, None);
        assert!(hist.check_compatible(ObservableCounter).is_ok());
    }
}
