use std::{
    env, fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, Sender},
        Arc, Mutex, Weak,
    },
    thread,
    time::{Duration, Instant},
};

use telemetry_api::{otel_debug, otel_error, otel_info, otel_warn};

use crate::error::{OTelSdkError, OTelSdkResult};

use super::{
    collector::{CollectionOptions, CollectionResult, MetricCollector},
    data::Temporality,
    exporter::PushMetricExporter,
    instrument::InstrumentKind,
    reader::{MetricReader, TemporalitySelector},
    MetricError, MetricResult,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

const METRIC_EXPORT_INTERVAL_NAME: &str = "OTEL_METRIC_EXPORT_INTERVAL";
const METRIC_EXPORT_TIMEOUT_NAME: &str = "OTEL_METRIC_EXPORT_TIMEOUT";

/// Configuration options for [PeriodicReader].
///
/// A periodic reader is a [MetricReader] that collects and exports metric data
/// to the exporter at a defined interval.
///
/// By default, the returned [MetricReader] will collect and export data every
/// 60 seconds. The export time is not counted towards the interval between
/// attempts. The timeout bounds the observable callbacks of each collection.
///
/// The [collect] method of the returned [MetricReader] continues to gather and
/// return metric data to the user. It will not automatically send that data to
/// the exporter outside of the predefined interval.
///
/// [collect]: MetricReader::collect
#[derive(Debug)]
pub struct PeriodicReaderBuilder<E> {
    interval: Duration,
    timeout: Duration,
    exporter: E,
}

impl<E> PeriodicReaderBuilder<E>
where
    E: PushMetricExporter,
{
    fn new(exporter: E) -> Self {
        let interval = duration_from_env(METRIC_EXPORT_INTERVAL_NAME).unwrap_or(DEFAULT_INTERVAL);
        let timeout = duration_from_env(METRIC_EXPORT_TIMEOUT_NAME).unwrap_or(DEFAULT_TIMEOUT);

        PeriodicReaderBuilder {
            interval,
            timeout,
            exporter,
        }
    }

    /// Configures the intervening time between exports for a [PeriodicReader].
    ///
    /// This option overrides any value set for the `OTEL_METRIC_EXPORT_INTERVAL`
    /// environment variable.
    ///
    /// If this option is not used or `interval` is equal to zero, 60 seconds is
    /// used as the default.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        if !interval.is_zero() {
            self.interval = interval;
        }
        self
    }

    /// Configures the time observable callbacks may take during each
    /// collection. Callbacks still running after it are abandoned and
    /// logged.
    ///
    /// This option overrides any value set for the `OTEL_METRIC_EXPORT_TIMEOUT`
    /// environment variable.
    ///
    /// If this option is not used or `timeout` is equal to zero, 30 seconds is used
    /// as the default.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.timeout = timeout;
        }
        self
    }

    /// Create a [PeriodicReader] with the given config.
    pub fn build(self) -> PeriodicReader<E> {
        PeriodicReader::new(self.exporter, self.interval, self.timeout)
    }
}

/// Milliseconds from `name`. Unset, unparsable and zero values are ignored.
fn duration_from_env(name: &str) -> Option<Duration> {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|millis| *millis > 0)
        .map(Duration::from_millis)
}

/// A [MetricReader] that continuously collects and exports metric data at a set
/// interval.
///
/// Collection and export happen on a dedicated background thread.
/// [force_flush] and [shutdown] ask that thread for an immediate
/// collect-and-export and wait for its outcome.
///
/// [force_flush]: MetricReader::force_flush
/// [shutdown]: MetricReader::shutdown
///
/// # Example
///
/// ```no_run
/// use telemetry_sdk::metrics::PeriodicReader;
/// # fn example<E>(get_exporter: impl Fn() -> E)
/// # where
/// #     E: telemetry_sdk::metrics::exporter::PushMetricExporter,
/// # {
///
/// let exporter = get_exporter(); // set up a push exporter
///
/// let reader = PeriodicReader::builder(exporter).build();
/// # drop(reader);
/// # }
/// ```
pub struct PeriodicReader<E: PushMetricExporter> {
    inner: Arc<PeriodicReaderInner<E>>,
}

impl<E: PushMetricExporter> Clone for PeriodicReader<E> {
    fn clone(&self) -> Self {
        PeriodicReader {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: PushMetricExporter> PeriodicReader<E> {
    /// Configuration options for a periodic reader
    pub fn builder(exporter: E) -> PeriodicReaderBuilder<E> {
        PeriodicReaderBuilder::new(exporter)
    }

    fn new(exporter: E, interval: Duration, timeout: Duration) -> Self {
        let (message_sender, message_receiver): (Sender<Message>, Receiver<Message>) =
            mpsc::channel();
        let reader = PeriodicReader {
            inner: Arc::new(PeriodicReaderInner {
                message_sender: Mutex::new(message_sender),
                is_shutdown: AtomicBool::new(false),
                collector: Mutex::new(None),
                exporter,
                timeout,
            }),
        };
        let cloned_reader = reader.clone();

        let result_thread_creation = thread::Builder::new()
            .name("telemetry-metrics-periodic-reader".to_string())
            .spawn(move || cloned_reader.inner.run(message_receiver, interval));

        if let Err(e) = result_thread_creation {
            otel_error!(
                name: "PeriodicReader.ThreadStartError",
                error = format!("{e:?}")
            );
        }
        reader
    }
}

impl<E: PushMetricExporter> fmt::Debug for PeriodicReader<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeriodicReader")
            .field("timeout", &self.inner.timeout)
            .finish()
    }
}

struct PeriodicReaderInner<E> {
    exporter: E,
    message_sender: Mutex<Sender<Message>>,
    collector: Mutex<Option<Weak<MetricCollector>>>,
    is_shutdown: AtomicBool,
    timeout: Duration,
}

impl<E: PushMetricExporter> PeriodicReaderInner<E> {
    fn run(&self, messages: Receiver<Message>, interval: Duration) {
        let mut interval_start = Instant::now();
        let mut remaining_interval = interval;
        otel_info!(
            name: "PeriodicReader.ThreadStarted",
            interval_ms = interval.as_millis() as u64,
            timeout_ms = self.timeout.as_millis() as u64
        );
        loop {
            match messages.recv_timeout(remaining_interval) {
                Ok(Message::Flush(response_sender)) => {
                    otel_debug!(name: "PeriodicReader.ExportingDueToFlush");
                    let _ = response_sender.send(self.collect_and_export());

                    // Keep the regular schedule unless the flush overran it,
                    // in which case the next export happens right away.
                    let elapsed = interval_start.elapsed();
                    if elapsed < interval {
                        remaining_interval = interval - elapsed;
                    } else {
                        interval_start = Instant::now();
                        remaining_interval = Duration::ZERO;
                    }
                }
                Ok(Message::Shutdown(response_sender)) => {
                    otel_debug!(name: "PeriodicReader.ExportingDueToShutdown");
                    let result = self
                        .collect_and_export()
                        .and_then(|()| self.exporter.shutdown());
                    let _ = response_sender.send(result);
                    break;
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    let export_start = Instant::now();
                    otel_debug!(name: "PeriodicReader.ExportingDueToTimer");
                    // failures are logged by collect_and_export
                    let _ = self.collect_and_export();

                    let time_taken_for_export = export_start.elapsed();
                    interval_start = Instant::now();
                    remaining_interval = interval.saturating_sub(time_taken_for_export);
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
        otel_info!(name: "PeriodicReader.ThreadStopped");
    }

    fn register_collector(&self, collector: Weak<MetricCollector>) {
        let _ = self.collector.lock().map(|mut registered| {
            if registered.is_none() {
                *registered = Some(collector);
            } else {
                otel_warn!(
                    name: "PeriodicReader.DuplicateRegistration",
                    message = "The reader is already registered with a meter provider, the new registration is ignored"
                );
            }
        });
    }

    fn collect(&self) -> MetricResult<CollectionResult> {
        if self.is_shutdown.load(Ordering::Relaxed) {
            return Err(MetricError::Other("reader is shut down".into()));
        }

        let collector = self
            .collector
            .lock()?
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or_else(|| MetricError::Other("reader is not registered".into()))?;
        Ok(collector.collect(CollectionOptions {
            timeout: Some(self.timeout),
        }))
    }

    fn collect_and_export(&self) -> OTelSdkResult {
        let result = match self.collect() {
            Ok(result) => result,
            Err(err) => {
                otel_warn!(
                    name: "PeriodicReader.CollectError",
                    error = format!("{err}")
                );
                return Err(OTelSdkError::InternalFailure(err.to_string()));
            }
        };

        for err in &result.errors {
            otel_warn!(
                name: "PeriodicReader.CallbackError",
                error = format!("{err}")
            );
        }

        if result.resource_metrics.scope_metrics.is_empty() {
            otel_debug!(name: "PeriodicReader.NoMetricsCollected");
            return Ok(());
        }

        let exported = futures_executor::block_on(self.exporter.export(&result.resource_metrics));
        if let Err(err) = &exported {
            otel_warn!(
                name: "PeriodicReader.ExportError",
                error = format!("{err}")
            );
        }
        exported
    }

    fn send(&self, message: impl FnOnce(Sender<OTelSdkResult>) -> Message) -> OTelSdkResult {
        let (response_tx, response_rx) = mpsc::channel();
        self.message_sender
            .lock()?
            .send(message(response_tx))
            .map_err(|e| OTelSdkError::InternalFailure(e.to_string()))?;

        response_rx.recv().unwrap_or_else(|_| {
            Err(OTelSdkError::InternalFailure(
                "reader thread exited without responding".into(),
            ))
        })
    }

    fn force_flush(&self) -> OTelSdkResult {
        if self.is_shutdown.load(Ordering::Relaxed) {
            return Err(OTelSdkError::AlreadyShutdown);
        }
        self.send(Message::Flush)
    }

    fn shutdown(&self) -> OTelSdkResult {
        if self.is_shutdown.load(Ordering::Relaxed) {
            return Err(OTelSdkError::AlreadyShutdown);
        }
        let result = self.send(Message::Shutdown);
        self.is_shutdown.store(true, Ordering::Relaxed);
        if let Some(collector) = self.collector.lock()?.take().as_ref().and_then(Weak::upgrade) {
            collector.detach();
        }
        result
    }
}

#[derive(Debug)]
enum Message {
    Flush(Sender<OTelSdkResult>),
    Shutdown(Sender<OTelSdkResult>),
}

impl<E: PushMetricExporter> TemporalitySelector for PeriodicReader<E> {
    fn temporality(&self, _kind: InstrumentKind) -> Temporality {
        self.inner.exporter.temporality()
    }
}

impl<E: PushMetricExporter> MetricReader for PeriodicReader<E> {
    fn register_collector(&self, collector: Weak<MetricCollector>) {
        self.inner.register_collector(collector);
    }

    fn collect(&self) -> MetricResult<CollectionResult> {
        self.inner.collect()
    }

    fn force_flush(&self) -> OTelSdkResult {
        self.inner.force_flush()
    }

    fn shutdown(&self) -> OTelSdkResult {
        self.inner.shutdown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{InMemoryMetricExporter, SdkMeterProvider};
    use std::{
        future::{self, Future},
        sync::atomic::AtomicUsize,
    };

    // use below command to run all tests
    // cargo test metrics::periodic_reader::tests -- --nocapture

    #[derive(Debug, Clone, Default)]
    struct MetricExporterThatFailsOnlyOnFirst {
        count: Arc<AtomicUsize>,
    }

    impl MetricExporterThatFailsOnlyOnFirst {
        fn get_count(&self) -> usize {
            self.count.load(Ordering::Relaxed)
        }
    }

    impl PushMetricExporter for MetricExporterThatFailsOnlyOnFirst {
        fn export(
            &self,
            _metrics: &crate::metrics::data::ResourceMetrics,
        ) -> impl Future<Output = OTelSdkResult> + Send {
            let count = self.count.fetch_add(1, Ordering::Relaxed);
            future::ready(if count == 0 {
                Err(OTelSdkError::InternalFailure("first export fails".into()))
            } else {
                Ok(())
            })
        }

        fn force_flush(&self) -> OTelSdkResult {
            Ok(())
        }

        fn shutdown(&self) -> OTelSdkResult {
            Ok(())
        }

        fn temporality(&self) -> Temporality {
            Temporality::Cumulative
        }
    }

    #[test]
    fn collection_triggered_by_interval_multiple() {
        let interval = Duration::from_millis(1);
        let exporter = InMemoryMetricExporter::default();
        let reader = PeriodicReader::builder(exporter.clone())
            .with_interval(interval)
            .build();
        let i = Arc::new(AtomicUsize::new(0));
        let i_clone = i.clone();

        let meter_provider = SdkMeterProvider::builder().with_reader(reader).build();
        let meter = meter_provider.meter("test");
        let _counter = meter
            .u64_observable_counter("testcounter")
            .with_callback(move |_| {
                i_clone.fetch_add(1, Ordering::Relaxed);
            })
            .build();

        // generous margin over 5 intervals for slow machines
        std::thread::sleep(interval * 5 * 20);

        assert!(i.load(Ordering::Relaxed) >= 5);
    }

    #[test]
    fn shutdown_repeat() {
        let exporter = InMemoryMetricExporter::default();
        let reader = PeriodicReader::builder(exporter)
            .with_interval(Duration::from_millis(1))
            .build();

        let meter_provider = SdkMeterProvider::builder().with_reader(reader).build();
        assert!(meter_provider.shutdown().is_ok());
        assert!(matches!(
            meter_provider.shutdown(),
            Err(OTelSdkError::AlreadyShutdown)
        ));
    }

    #[test]
    fn flush_after_shutdown() {
        let exporter = InMemoryMetricExporter::default();
        let reader = PeriodicReader::builder(exporter)
            .with_interval(Duration::from_millis(1))
            .build();

        let meter_provider = SdkMeterProvider::builder().with_reader(reader).build();
        assert!(meter_provider.force_flush().is_ok());
        assert!(meter_provider.shutdown().is_ok());
        assert!(meter_provider.force_flush().is_err());
    }

    #[test]
    fn periodic_reader_without_collector() {
        let exporter = InMemoryMetricExporter::default();
        let reader = PeriodicReader::builder(exporter)
            .with_interval(Duration::from_secs(60))
            .build();

        assert!(reader.collect().is_err());
        assert!(reader.force_flush().is_err());

        let meter_provider = SdkMeterProvider::builder()
            .with_reader(reader.clone())
            .build();
        assert!(reader.collect().is_ok());
        assert!(meter_provider.force_flush().is_ok());
    }

    #[test]
    fn exporter_failures_are_handled() {
        let exporter = MetricExporterThatFailsOnlyOnFirst::default();
        let reader = PeriodicReader::builder(exporter.clone())
            .with_interval(Duration::from_millis(10))
            .build();

        let meter_provider = SdkMeterProvider::builder().with_reader(reader).build();
        let meter = meter_provider.meter("test");
        let counter = meter.u64_counter("sync_counter").build();
        counter.add(1, &[]);

        std::thread::sleep(Duration::from_millis(500));

        // the reader keeps exporting after the first export failed
        assert!(exporter.get_count() >= 2);
    }

    #[test]
    fn flush_exports_immediately() {
        let exporter = InMemoryMetricExporter::default();
        let reader = PeriodicReader::builder(exporter.clone())
            .with_interval(Duration::from_secs(60))
            .build();
        let (sender, receiver) = mpsc::channel();

        let meter_provider = SdkMeterProvider::builder().with_reader(reader).build();
        let meter = meter_provider.meter("test");
        let _counter = meter
            .u64_observable_counter("testcounter")
            .with_callback(move |observer| {
                observer.observe(1, &[]);
                let _ = sender.send(());
            })
            .build();

        meter_provider.force_flush().expect("flush should succeed");

        receiver
            .recv_timeout(Duration::ZERO)
            .expect("flush should have run the callback");
        let exported = exporter.get_finished_metrics().unwrap();
        assert_eq!(exported.len(), 1);
    }

    #[test]
    fn shutdown_exports_once_more() {
        let exporter = InMemoryMetricExporter::default();
        let reader = PeriodicReader::builder(exporter.clone())
            .with_interval(Duration::from_secs(60))
            .build();
        let meter_provider = SdkMeterProvider::builder().with_reader(reader).build();
        let counter = meter_provider.meter("test").u64_counter("c").build();
        counter.add(3, &[]);

        meter_provider.shutdown().expect("shutdown should succeed");
        assert_eq!(exporter.get_finished_metrics().unwrap().len(), 1);
    }

    #[test]
    fn slow_callbacks_are_abandoned() {
        let exporter = InMemoryMetricExporter::default();
        let reader = PeriodicReader::builder(exporter.clone())
            .with_interval(Duration::from_secs(60))
            .with_timeout(Duration::from_millis(50))
            .build();
        let meter_provider = SdkMeterProvider::builder().with_reader(reader).build();
        let meter = meter_provider.meter("test");
        let _slow = meter
            .u64_observable_gauge("slow")
            .with_callback(|observer| {
                std::thread::sleep(Duration::from_millis(500));
                observer.observe(1, &[]);
            })
            .build();
        let fast = meter.u64_counter("fast").build();
        fast.add(1, &[]);

        meter_provider.force_flush().expect("flush should succeed");

        let exported = exporter.get_finished_metrics().unwrap();
        let metrics = &exported[0].scope_metrics[0].metrics;
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].name(), "fast");
    }

    #[test]
    fn interval_and_timeout_from_env() {
        temp_env::with_vars(
            [
                (METRIC_EXPORT_INTERVAL_NAME, Some("1500")),
                (METRIC_EXPORT_TIMEOUT_NAME, Some("250")),
            ],
            || {
                let builder = PeriodicReader::builder(InMemoryMetricExporter::default());
                assert_eq!(builder.interval, Duration::from_millis(1500));
                assert_eq!(builder.timeout, Duration::from_millis(250));

                let builder = builder.with_interval(Duration::from_secs(2));
                assert_eq!(builder.interval, Duration::from_secs(2));
            },
        );
    }

    #[test]
    fn invalid_env_falls_back_to_defaults() {
        temp_env::with_vars(
            [
                (METRIC_EXPORT_INTERVAL_NAME, Some("0")),
                (METRIC_EXPORT_TIMEOUT_NAME, Some("soon")),
            ],
            || {
                let builder = PeriodicReader::builder(InMemoryMetricExporter::default())
                    .with_timeout(Duration::ZERO);
                assert_eq!(builder.interval, DEFAULT_INTERVAL);
                assert_eq!(builder.timeout, DEFAULT_TIMEOUT);
            },
        );
    }

    #[test]
    fn defaults_without_env() {
        temp_env::with_vars_unset(
            [METRIC_EXPORT_INTERVAL_NAME, METRIC_EXPORT_TIMEOUT_NAME],
            || {
                let builder = PeriodicReader::builder(InMemoryMetricExporter::default());
                assert_eq!(builder.interval, DEFAULT_INTERVAL);
                assert_eq!(builder.timeout, DEFAULT_TIMEOUT);
            },
        );
    }
}
