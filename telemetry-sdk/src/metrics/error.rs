use std::result;
use std::sync::PoisonError;
use std::time::Duration;

use thiserror::Error;

use super::instrument::InstrumentKind;

/// A specialized `Result` type for metric operations.
pub type MetricResult<T> = result::Result<T, MetricError>;

/// Errors returned by the metrics SDK.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum MetricError {
    /// Other errors not covered by specific cases.
    #[error("Metrics error: {0}")]
    Other(String),
    /// Invalid configuration
    #[error("Config error {0}")]
    Config(String),
    /// Invalid instrument configuration such as an invalid name or unit.
    #[error("Invalid instrument configuration: {0}")]
    InvalidInstrumentConfiguration(&'static str),
    /// An instrument was registered under a name already taken by an
    /// instrument with a different kind, value type or unit.
    #[error("Incompatible instrument registration: {0}")]
    IncompatibleInstrument(String),
    /// A view asked for an aggregation the instrument kind cannot produce.
    #[error("Aggregation {aggregation} is not compatible with {kind:?} instruments")]
    IncompatibleAggregation {
        /// The requested aggregation.
        aggregation: String,
        /// The kind of the instrument it was requested for.
        kind: InstrumentKind,
    },
    /// An observable callback panicked.
    #[error("Callback for {instruments} failed: {reason}")]
    CallbackFailed {
        /// Names of the instruments the callback observes.
        instruments: String,
        /// The panic payload, when it was a string.
        reason: String,
    },
    /// An observable callback did not finish within the collection timeout.
    #[error("Callback for {instruments} timed out after {timeout:?}")]
    CallbackTimeout {
        /// Names of the instruments the callback observes.
        instruments: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },
}

impl<T> From<PoisonError<T>> for MetricError {
    fn from(err: PoisonError<T>) -> Self {
        MetricError::Other(err.to_string())
    }
}
