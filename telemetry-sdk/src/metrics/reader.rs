//! Interfaces for reading and producing metrics
use std::{fmt, sync::Weak};

use crate::error::OTelSdkResult;

use super::{
    collector::{CollectionResult, MetricCollector},
    data::Temporality,
    instrument::InstrumentKind,
    MetricResult,
};

/// Chooses the [Temporality] a reader wants for each instrument kind.
///
/// The answer for a given kind must not change over the life of the reader:
/// it is asked once per stream, on that stream's first collection, and the
/// choice is kept from then on.
pub trait TemporalitySelector: Send + Sync {
    /// The temporality to report streams of `kind` in.
    fn temporality(&self, kind: InstrumentKind) -> Temporality;
}

impl TemporalitySelector for Temporality {
    fn temporality(&self, _kind: InstrumentKind) -> Temporality {
        *self
    }
}

impl<F> TemporalitySelector for F
where
    F: Fn(InstrumentKind) -> Temporality + Send + Sync,
{
    fn temporality(&self, kind: InstrumentKind) -> Temporality {
        self(kind)
    }
}

/// The interface used between the SDK and an exporter.
///
/// Control flow is bi-directional through the `MetricReader`, since the SDK
/// initiates `force_flush` and `shutdown` while the reader initiates
/// collection. The `register_collector` method here informs the metric reader
/// that it can begin reading, signaling the start of bi-directional control
/// flow.
///
/// Push-based exporters implement [PushMetricExporter] and are driven by a
/// [PeriodicReader]. Pull-based consumers use a [ManualReader] or implement
/// `MetricReader` themselves, since they read on demand.
///
/// [PushMetricExporter]: crate::metrics::exporter::PushMetricExporter
/// [PeriodicReader]: crate::metrics::PeriodicReader
/// [ManualReader]: crate::metrics::ManualReader
pub trait MetricReader: TemporalitySelector + fmt::Debug + Send + Sync + 'static {
    /// Hands the reader the collector it reads through.
    ///
    /// Called once, when the meter provider is built.
    fn register_collector(&self, collector: Weak<MetricCollector>);

    /// Runs observable callbacks and gathers a snapshot of every stream,
    /// reconciled to this reader's temporality.
    ///
    /// An error is returned if this is called after shutdown or before the
    /// reader was registered with a provider.
    fn collect(&self) -> MetricResult<CollectionResult>;

    /// Flushes all metric measurements held in an export pipeline.
    ///
    /// There is no guaranteed that all telemetry be flushed or all resources have
    /// been released on error.
    fn force_flush(&self) -> OTelSdkResult;

    /// Flushes all metric measurements held in an export pipeline and releases any
    /// held computational resources.
    ///
    /// After `shutdown` is called, calls to `collect` will perform no operation and
    /// instead will return an error indicating the shutdown state.
    fn shutdown(&self) -> OTelSdkResult;
}
