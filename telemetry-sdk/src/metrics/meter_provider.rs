use core::fmt;
use std::{
    borrow::Cow,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use telemetry_api::{otel_debug, otel_error, otel_info, InstrumentationScope};

use crate::error::{OTelSdkError, OTelSdkResult};
use crate::Resource;

use super::{
    collector::{CollectorHandle, MeterProviderSharedState, MetricCollector},
    internal::MeterSharedState,
    meter::Meter,
    reader::MetricReader,
    view::View,
};

/// Handles the creation and coordination of [Meter]s.
///
/// All `Meter`s created by a `SdkMeterProvider` will be associated with the
/// same [Resource], have the same [View]s applied to them, and have their
/// produced metric telemetry passed to the configured [MetricReader]s. This is
/// a clonable handle to the provider itself, and cloning it will create a new
/// reference, not a new instance. Dropping the last reference to it will
/// trigger shutdown of the provider. Shutdown can also be triggered manually
/// by calling the `shutdown` method.
#[derive(Clone, Debug)]
pub struct SdkMeterProvider {
    inner: Arc<SdkMeterProviderInner>,
}

struct SdkMeterProviderInner {
    shared: Arc<MeterProviderSharedState>,
    // Readers only hold weak references to their collectors.
    collectors: Vec<Arc<MetricCollector>>,
    shutdown_invoked: AtomicBool,
}

impl Default for SdkMeterProvider {
    fn default() -> Self {
        SdkMeterProvider::builder().build()
    }
}

impl SdkMeterProvider {
    /// Return default [MeterProviderBuilder]
    pub fn builder() -> MeterProviderBuilder {
        MeterProviderBuilder::default()
    }

    /// Returns the [Meter] for the scope named `name`.
    pub fn meter(&self, name: impl Into<Cow<'static, str>>) -> Meter {
        self.meter_with_scope(InstrumentationScope::builder(name).build())
    }

    /// Returns the [Meter] for `scope`.
    ///
    /// Asking twice for an equal scope returns meters sharing the same
    /// instruments and streams. After shutdown the returned meter records
    /// nothing.
    pub fn meter_with_scope(&self, scope: InstrumentationScope) -> Meter {
        if self.inner.shutdown_invoked.load(Ordering::Relaxed) {
            otel_debug!(
                name: "MeterProvider.NoOpMeterReturned",
                meter_name = scope.name()
            );
            return Meter::noop();
        }

        if scope.name().is_empty() {
            otel_info!(name: "MeterNameEmpty", message = "Meter name is empty; consider providing a meaningful name. Meter will function normally and the provided name will be used as-is.");
        }

        let Ok(mut meters) = self.inner.shared.meters.lock() else {
            otel_debug!(
                name: "MeterProvider.NoOpMeterReturned",
                meter_name = scope.name()
            );
            return Meter::noop();
        };

        if let Some(existing) = meters.iter().find(|m| *m.scope() == scope) {
            otel_debug!(
                name: "MeterProvider.ExistingMeterReturned",
                meter_name = scope.name()
            );
            return Meter::new(Arc::clone(existing));
        }

        otel_debug!(
            name: "MeterProvider.NewMeterCreated",
            meter_name = scope.name()
        );
        let state = Arc::new(MeterSharedState::new(
            scope,
            Arc::clone(&self.inner.shared.views),
        ));
        meters.push(Arc::clone(&state));
        Meter::new(state)
    }

    /// Flushes all pending telemetry.
    ///
    /// There is no guaranteed that all telemetry be flushed or all resources have
    /// been released on error.
    ///
    /// # Examples
    ///
    /// ```
    /// use telemetry_sdk::metrics::SdkMeterProvider;
    ///
    /// fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     // default has no readers so nothing is exported.
    ///     let provider = SdkMeterProvider::default();
    ///
    ///     // create instruments + record measurements
    ///
    ///     // force all readers to flush
    ///     provider.force_flush()?;
    ///
    ///     // shutdown also invokes shutdown on the readers.
    ///     provider.shutdown()?;
    ///
    ///     Ok(())
    /// }
    /// ```
    pub fn force_flush(&self) -> OTelSdkResult {
        self.inner.force_flush()
    }

    /// Shuts down the meter provider flushing all pending telemetry and releasing
    /// any held computational resources.
    ///
    /// This call is idempotent. The first call will perform all flush and releasing
    /// operations. Subsequent calls will perform no action and will return an error
    /// stating this.
    ///
    /// Measurements made by instruments from meters this provider created will
    /// not be exported after shutdown is called.
    pub fn shutdown(&self) -> OTelSdkResult {
        otel_info!(
            name: "MeterProvider.Shutdown",
            message = "User initiated shutdown of MeterProvider."
        );
        self.inner.shutdown()
    }
}

impl SdkMeterProviderInner {
    fn readers(&self) -> impl Iterator<Item = &Arc<dyn MetricReader>> {
        self.shared.collectors.iter().map(CollectorHandle::reader)
    }

    fn force_flush(&self) -> OTelSdkResult {
        if self.shutdown_invoked.load(Ordering::Relaxed) {
            return Err(OTelSdkError::AlreadyShutdown);
        }
        let errs: Vec<String> = self
            .readers()
            .filter_map(|reader| reader.force_flush().err())
            .map(|err| err.to_string())
            .collect();
        combine(errs)
    }

    fn shutdown(&self) -> OTelSdkResult {
        if self.shutdown_invoked.swap(true, Ordering::SeqCst) {
            // If the previous value was true, shutdown was already invoked.
            return Err(OTelSdkError::AlreadyShutdown);
        }
        let errs: Vec<String> = self
            .readers()
            .filter_map(|reader| reader.shutdown().err())
            .map(|err| err.to_string())
            .collect();
        combine(errs)
    }
}

fn combine(errs: Vec<String>) -> OTelSdkResult {
    if errs.is_empty() {
        Ok(())
    } else {
        Err(OTelSdkError::InternalFailure(errs.join(", ")))
    }
}

impl fmt::Debug for SdkMeterProviderInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SdkMeterProviderInner")
            .field("resource", &self.shared.resource)
            .field("collectors", &self.collectors)
            .field("views", &self.shared.views.len())
            .finish()
    }
}

impl Drop for SdkMeterProviderInner {
    fn drop(&mut self) {
        // If user has already shutdown the provider manually by calling
        // shutdown(), then we don't need to call shutdown again.
        if self.shutdown_invoked.load(Ordering::Relaxed) {
            otel_debug!(
                name: "MeterProvider.Drop.AlreadyShutdown",
                message = "MeterProvider was already shut down; drop will not attempt shutdown again."
            );
        } else {
            otel_info!(
                name: "MeterProvider.Drop",
                message = "Last reference of MeterProvider dropped, initiating shutdown."
            );
            if let Err(err) = self.shutdown() {
                otel_error!(
                    name: "MeterProvider.Drop.ShutdownFailed",
                    message = "Shutdown attempt failed during drop of MeterProvider.",
                    reason = format!("{}", err)
                );
            } else {
                otel_info!(name: "MeterProvider.Drop.ShutdownCompleted");
            }
        }
    }
}

/// Configuration options for a [SdkMeterProvider].
#[derive(Default)]
pub struct MeterProviderBuilder {
    resource: Option<Resource>,
    readers: Vec<Arc<dyn MetricReader>>,
    views: Vec<Arc<dyn View>>,
}

impl MeterProviderBuilder {
    /// Associates a [Resource] with a [SdkMeterProvider].
    ///
    /// This [Resource] represents the entity producing telemetry and is associated
    /// with all [Meter]s the provider will create.
    ///
    /// By default, if this option is not used, the default [Resource] will be used.
    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resource = Some(resource);
        self
    }

    /// Associates a [MetricReader] with a [SdkMeterProvider].
    ///
    /// A provider will export no metrics without a [MetricReader] added.
    /// Every reader sees every stream independently of the others.
    pub fn with_reader<T: MetricReader>(mut self, reader: T) -> Self {
        self.readers.push(Arc::new(reader));
        self
    }

    /// Associates a [View] with a [SdkMeterProvider].
    ///
    /// [View]s are appended to existing ones if this option is used multiple
    /// times. An instrument matched by no view gets one stream with its own
    /// name, description and default aggregation.
    pub fn with_view<T: View>(mut self, view: T) -> Self {
        self.views.push(Arc::new(view));
        self
    }

    /// Construct a new [SdkMeterProvider] with this configuration.
    pub fn build(self) -> SdkMeterProvider {
        otel_debug!(
            name: "MeterProvider.Building",
            builder = format!("{:?}", &self)
        );

        let handles: Vec<CollectorHandle> =
            self.readers.into_iter().map(CollectorHandle::new).collect();
        let shared = Arc::new(MeterProviderSharedState {
            resource: self.resource.unwrap_or_else(|| Resource::builder().build()),
            views: self.views.into(),
            collectors: handles.clone(),
            meters: Default::default(),
        });

        let collectors: Vec<Arc<MetricCollector>> = handles
            .into_iter()
            .map(|handle| {
                let collector = Arc::new(MetricCollector::new(handle, Arc::clone(&shared)));
                collector
                    .handle()
                    .reader()
                    .register_collector(Arc::downgrade(&collector));
                collector
            })
            .collect();

        let meter_provider = SdkMeterProvider {
            inner: Arc::new(SdkMeterProviderInner {
                shared,
                collectors,
                shutdown_invoked: AtomicBool::new(false),
            }),
        };

        otel_info!(name: "MeterProvider.Built");
        meter_provider
    }
}

impl fmt::Debug for MeterProviderBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeterProviderBuilder")
            .field("resource", &self.resource)
            .field("readers", &self.readers)
            .field("views", &self.views.len())
            .finish()
    }
}
