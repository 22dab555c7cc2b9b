use std::{
    fmt,
    sync::{Arc, Mutex, Weak},
    time::Duration,
};

use telemetry_api::otel_warn;

use crate::error::{OTelSdkError, OTelSdkResult};

use super::{
    collector::{CollectionOptions, CollectionResult, MetricCollector},
    data::Temporality,
    instrument::InstrumentKind,
    reader::{MetricReader, TemporalitySelector},
    MetricError, MetricResult,
};

/// A simple [MetricReader] that allows an application to read metrics on demand.
///
/// Clones share their registration, so a clone kept by the application
/// collects from the provider the other clone was handed to.
///
/// See [ManualReaderBuilder] for configuration options.
///
/// # Example
///
/// ```
/// use telemetry_sdk::metrics::{ManualReader, Temporality};
///
/// // can specify additional reader configuration
/// let reader = ManualReader::builder()
///     .with_temporality(Temporality::Delta)
///     .build();
/// # drop(reader)
/// ```
#[derive(Clone)]
pub struct ManualReader {
    inner: Arc<ManualReaderInner>,
}

struct ManualReaderInner {
    state: Mutex<ReaderState>,
    temporality_selector: Box<dyn TemporalitySelector>,
    callback_timeout: Option<Duration>,
}

#[derive(Default)]
struct ReaderState {
    collector: Option<Weak<MetricCollector>>,
    is_shutdown: bool,
}

impl Default for ManualReader {
    fn default() -> Self {
        ManualReader::builder().build()
    }
}

impl fmt::Debug for ManualReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualReader")
            .field("callback_timeout", &self.inner.callback_timeout)
            .finish()
    }
}

impl ManualReader {
    /// Configuration for this reader
    pub fn builder() -> ManualReaderBuilder {
        ManualReaderBuilder::default()
    }
}

impl TemporalitySelector for ManualReader {
    fn temporality(&self, kind: InstrumentKind) -> Temporality {
        self.inner.temporality_selector.temporality(kind)
    }
}

impl MetricReader for ManualReader {
    /// Register the collector which enables the caller to read metrics from
    /// the SDK on demand.
    fn register_collector(&self, collector: Weak<MetricCollector>) {
        let _ = self.inner.state.lock().map(|mut state| {
            // Only register once. If a collector is already set, do nothing.
            if state.collector.is_none() {
                state.collector = Some(collector);
            } else {
                otel_warn!(
                    name: "ManualReader.DuplicateRegistration",
                    message = "The reader is already registered with a meter provider, the new registration is ignored"
                );
            }
        });
    }

    /// Gathers all metrics from the SDK, calling any callbacks necessary and
    /// returning the results.
    ///
    /// Returns an error if called after shutdown or before registration.
    fn collect(&self) -> MetricResult<CollectionResult> {
        let collector = {
            let state = self.inner.state.lock()?;
            if state.is_shutdown {
                None
            } else {
                state.collector.as_ref().and_then(Weak::upgrade)
            }
        };

        match collector {
            Some(collector) => Ok(collector.collect(CollectionOptions {
                timeout: self.inner.callback_timeout,
            })),
            None => Err(MetricError::Other(
                "reader is shut down or not registered".into(),
            )),
        }
    }

    /// ForceFlush is a no-op, it always returns Ok.
    fn force_flush(&self) -> OTelSdkResult {
        Ok(())
    }

    /// Any future call to collect will return an error.
    fn shutdown(&self) -> OTelSdkResult {
        let mut state = self.inner.state.lock()?;
        if state.is_shutdown {
            return Err(OTelSdkError::AlreadyShutdown);
        }
        if let Some(collector) = state.collector.take().as_ref().and_then(Weak::upgrade) {
            collector.detach();
        }
        state.is_shutdown = true;
        Ok(())
    }
}

/// Configuration for a [ManualReader]
pub struct ManualReaderBuilder {
    temporality_selector: Box<dyn TemporalitySelector>,
    callback_timeout: Option<Duration>,
}

impl fmt::Debug for ManualReaderBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualReaderBuilder")
            .field("callback_timeout", &self.callback_timeout)
            .finish()
    }
}

impl Default for ManualReaderBuilder {
    fn default() -> Self {
        ManualReaderBuilder {
            temporality_selector: Box::new(Temporality::Cumulative),
            callback_timeout: None,
        }
    }
}

impl ManualReaderBuilder {
    /// New manual builder configuration
    pub fn new() -> Self {
        Default::default()
    }

    /// Report every stream with the given [Temporality]. Defaults to
    /// [Temporality::Cumulative].
    pub fn with_temporality(mut self, temporality: Temporality) -> Self {
        self.temporality_selector = Box::new(temporality);
        self
    }

    /// Sets the [TemporalitySelector] a reader will use to determine the
    /// [Temporality] of an instrument based on its kind.
    pub fn with_temporality_selector(
        mut self,
        temporality_selector: impl TemporalitySelector + 'static,
    ) -> Self {
        self.temporality_selector = Box::new(temporality_selector);
        self
    }

    /// Bounds how long observable callbacks may run during one collection.
    /// By default callbacks run to completion.
    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = Some(timeout);
        self
    }

    /// Create a new [ManualReader] from this configuration.
    pub fn build(self) -> ManualReader {
        ManualReader {
            inner: Arc::new(ManualReaderInner {
                state: Mutex::new(ReaderState::default()),
                temporality_selector: self.temporality_selector,
                callback_timeout: self.callback_timeout,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::SdkMeterProvider;

    #[test]
    fn collect_requires_registration() {
        let reader = ManualReader::builder().build();
        assert!(reader.collect().is_err());

        let _provider = SdkMeterProvider::builder()
            .with_reader(reader.clone())
            .build();
        let result = reader.collect().expect("registered reader collects");
        assert!(result.resource_metrics.scope_metrics.is_empty());
        assert!(result.errors.is_empty());
    }

    #[test]
    fn collect_after_shutdown_fails() {
        let reader = ManualReader::builder().build();
        let provider = SdkMeterProvider::builder()
            .with_reader(reader.clone())
            .build();
        provider.shutdown().unwrap();
        assert!(reader.collect().is_err());
        assert!(matches!(
            reader.shutdown(),
            Err(OTelSdkError::AlreadyShutdown)
        ));
    }

    #[test]
    fn shutdown_detaches_collector() {
        let reader = ManualReader::builder().build();
        let other = ManualReader::builder().build();
        let _provider = SdkMeterProvider::builder()
            .with_reader(reader.clone())
            .with_reader(other.clone())
            .build();
        let collector = reader
            .inner
            .state
            .lock()
            .unwrap()
            .collector
            .as_ref()
            .and_then(Weak::upgrade)
            .expect("registered");

        reader.shutdown().unwrap();

        assert!(collector.handle().is_detached());
        assert!(other.collect().is_ok());
    }

    #[test]
    fn temporality_selector_per_kind() {
        let reader = ManualReader::builder()
            .with_temporality_selector(|kind: InstrumentKind| match kind {
                InstrumentKind::UpDownCounter | InstrumentKind::ObservableUpDownCounter => {
                    Temporality::Cumulative
                }
                _ => Temporality::Delta,
            })
            .build();
        assert_eq!(
            reader.temporality(InstrumentKind::Counter),
            Temporality::Delta
        );
        assert_eq!(
            reader.temporality(InstrumentKind::UpDownCounter),
            Temporality::Cumulative
        );
    }
}
