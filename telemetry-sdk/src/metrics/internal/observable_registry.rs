use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::{Instant, SystemTime};

use telemetry_api::{otel_debug, otel_warn, KeyValue};

use crate::metrics::attributes::AttributeSet;
use crate::metrics::instrument::InstrumentDescriptor;
use crate::metrics::instruments::{validate_measurement, AsyncInstrument, Callback, Observable};
use crate::metrics::{MetricError, MetricResult};

use super::{AsyncWritable, AttributeHashMap, Number};

type BatchCallback = Arc<dyn Fn(&BatchObservableResult) + Send + Sync>;

/// Identifies observable instruments across every meter. Zero is never
/// handed out and marks instruments that record nothing.
fn next_instrument_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// An observable instrument as the registry sees it, whatever its value type.
pub(crate) trait ObservedInstrument: Send + Sync {
    fn name(&self) -> &str;

    /// A fresh buffer for one callback invocation.
    fn new_buffer(self: Arc<Self>) -> ObservationBuffer;
}

/// Observations made during one callback, applied only if it succeeds.
trait PendingObservations: Send + Sync {
    fn record(&self, observation_time: SystemTime);
}

pub(crate) struct ObservationBuffer {
    instrument_id: u64,
    pending: Arc<dyn PendingObservations>,
    /// `Arc<dyn AsyncInstrument<T>>` for the instrument's value type.
    observer: Box<dyn Any + Send + Sync>,
}

/// Shared state behind one observable instrument.
pub(crate) struct ObservableCore<T> {
    id: u64,
    descriptor: InstrumentDescriptor,
    writer: Arc<dyn AsyncWritable<T>>,
    registry: Weak<ObservableRegistry>,
}

impl<T: Number> ObservableCore<T> {
    /// Creates the core and makes it known to `registry`, so batch
    /// callbacks can name it.
    pub(crate) fn register(
        registry: &Arc<ObservableRegistry>,
        descriptor: InstrumentDescriptor,
        writer: Arc<dyn AsyncWritable<T>>,
    ) -> Arc<Self> {
        let core = Arc::new(ObservableCore {
            id: next_instrument_id(),
            descriptor,
            writer,
            registry: Arc::downgrade(registry),
        });
        registry.add_instrument(core.id, Arc::clone(&core) as Arc<dyn ObservedInstrument>);
        core
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn add_callback(&self, callback: Callback<T>) -> Registration {
        let Some(registry) = self.registry.upgrade() else {
            return Registration::default();
        };
        let id = self.id;
        registry.register(
            vec![id],
            Arc::new(move |batch: &BatchObservableResult| {
                if let Some(observer) = batch.observer::<T>(id) {
                    callback(observer);
                }
            }),
        )
    }
}

impl<T: Number> ObservedInstrument for ObservableCore<T> {
    fn name(&self) -> &str {
        self.descriptor.name()
    }

    fn new_buffer(self: Arc<Self>) -> ObservationBuffer {
        let instrument_id = self.id;
        let result = Arc::new(ObservableResult {
            core: self,
            measurements: Mutex::new(AttributeHashMap::new()),
        });
        ObservationBuffer {
            instrument_id,
            pending: Arc::clone(&result) as Arc<dyn PendingObservations>,
            observer: Box::new(result as Arc<dyn AsyncInstrument<T>>),
        }
    }
}

/// What one instrument was told during one callback.
struct ObservableResult<T> {
    core: Arc<ObservableCore<T>>,
    measurements: Mutex<AttributeHashMap<T>>,
}

impl<T: Number> AsyncInstrument<T> for ObservableResult<T> {
    fn observe(&self, measurement: T, attributes: &[KeyValue]) {
        let Some(value) = validate_measurement(&self.core.descriptor, measurement) else {
            return;
        };
        if let Ok(mut measurements) = self.measurements.lock() {
            // a set observed twice in one callback keeps the last value
            measurements.set(AttributeSet::from(attributes), value);
        }
    }
}

impl<T: Number> PendingObservations for ObservableResult<T> {
    fn record(&self, observation_time: SystemTime) {
        let measurements = match self.measurements.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(_) => return,
        };
        if !measurements.is_empty() {
            self.core
                .writer
                .record_batch(&measurements, observation_time);
        }
    }
}

/// Passed to callbacks registered with [Meter::register_callback] to
/// observe any of the instruments the callback was registered for.
///
/// [Meter::register_callback]: crate::metrics::Meter::register_callback
pub struct BatchObservableResult {
    buffers: Vec<ObservationBuffer>,
}

impl BatchObservableResult {
    /// Observes `value` for `instrument`.
    ///
    /// Observations for instruments the callback was not registered with
    /// are ignored with a warning.
    pub fn observe<T: 'static>(
        &self,
        instrument: &dyn Observable<T>,
        value: T,
        attributes: &[KeyValue],
    ) {
        let id = instrument.observable_id();
        if id == 0 {
            return;
        }
        match self.observer::<T>(id) {
            Some(observer) => observer.observe(value, attributes),
            None => {
                otel_warn!(
                    name: "BatchObservableResult.UnregisteredInstrument",
                    message = "Observation dropped: the callback was not registered with this instrument"
                );
            }
        }
    }

    fn observer<T: 'static>(&self, instrument_id: u64) -> Option<&dyn AsyncInstrument<T>> {
        self.buffers
            .iter()
            .find(|buffer| buffer.instrument_id == instrument_id)
            .and_then(|buffer| buffer.observer.downcast_ref::<Arc<dyn AsyncInstrument<T>>>())
            .map(|observer| observer.as_ref())
    }

    fn record(self, observation_time: SystemTime) {
        for buffer in self.buffers {
            buffer.pending.record(observation_time);
        }
    }
}

impl fmt::Debug for BatchObservableResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchObservableResult")
            .field("instruments", &self.buffers.len())
            .finish()
    }
}

/// A callback registration, used to stop a callback from being invoked.
#[derive(Default)]
pub struct Registration {
    registry: Weak<ObservableRegistry>,
    id: u64,
}

impl Registration {
    /// Stops the callback from being invoked on later collections.
    ///
    /// Unregistering more than once, or after the meter went away, has no
    /// effect.
    pub fn unregister(&self) -> MetricResult<()> {
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(self.id)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration").field("id", &self.id).finish()
    }
}

struct CallbackEntry {
    id: u64,
    instrument_ids: Vec<u64>,
    callback: BatchCallback,
}

/// Callbacks of one meter, run in registration order before each
/// collection.
#[derive(Default)]
pub(crate) struct ObservableRegistry {
    instruments: Mutex<HashMap<u64, Arc<dyn ObservedInstrument>>>,
    callbacks: Mutex<Vec<CallbackEntry>>,
    next_callback_id: AtomicU64,
}

impl ObservableRegistry {
    fn add_instrument(&self, id: u64, instrument: Arc<dyn ObservedInstrument>) {
        if let Ok(mut instruments) = self.instruments.lock() {
            instruments.insert(id, instrument);
        }
    }

    /// Whether `id` names an instrument of this meter.
    pub(crate) fn knows(&self, id: u64) -> bool {
        self.instruments
            .lock()
            .map(|instruments| instruments.contains_key(&id))
            .unwrap_or(false)
    }

    pub(crate) fn register(
        self: &Arc<Self>,
        instrument_ids: Vec<u64>,
        callback: BatchCallback,
    ) -> Registration {
        let id = self.next_callback_id.fetch_add(1, Ordering::Relaxed) + 1;
        match self.callbacks.lock() {
            Ok(mut callbacks) => callbacks.push(CallbackEntry {
                id,
                instrument_ids,
                callback,
            }),
            Err(_) => return Registration::default(),
        }
        Registration {
            registry: Arc::downgrade(self),
            id,
        }
    }

    fn unregister(&self, id: u64) -> MetricResult<()> {
        let mut callbacks = self.callbacks.lock()?;
        callbacks.retain(|entry| entry.id != id);
        Ok(())
    }

    /// Runs every callback once, one after the other.
    ///
    /// With a deadline, the callbacks run on one worker thread that is
    /// abandoned once the deadline passes. A callback that panics or is
    /// abandoned contributes nothing; the others are unaffected.
    pub(crate) fn observe(
        &self,
        observation_time: SystemTime,
        deadline: Option<Instant>,
    ) -> Vec<MetricError> {
        let entries: Vec<(Vec<u64>, BatchCallback)> = match self.callbacks.lock() {
            Ok(callbacks) => callbacks
                .iter()
                .map(|entry| (entry.instrument_ids.clone(), Arc::clone(&entry.callback)))
                .collect(),
            Err(err) => return vec![err.into()],
        };

        let mut runner = CallbackRunner::new(deadline);
        let mut errors = Vec::new();
        for (instrument_ids, callback) in entries {
            let instruments: Vec<Arc<dyn ObservedInstrument>> = match self.instruments.lock() {
                Ok(known) => instrument_ids
                    .iter()
                    .filter_map(|id| known.get(id).cloned())
                    .collect(),
                Err(err) => {
                    errors.push(err.into());
                    continue;
                }
            };
            let names = instruments
                .iter()
                .map(|instrument| instrument.name())
                .collect::<Vec<_>>()
                .join(", ");
            let batch = BatchObservableResult {
                buffers: instruments
                    .into_iter()
                    .map(|instrument| instrument.new_buffer())
                    .collect(),
            };

            match runner.run(callback, batch, &names) {
                Ok(batch) => batch.record(observation_time),
                Err(err) => {
                    otel_warn!(
                        name: "ObservableRegistry.CallbackFailed",
                        error = format!("{err}")
                    );
                    errors.push(err);
                }
            }
        }

        otel_debug!(
            name: "ObservableRegistry.CallbacksInvoked",
            failed = errors.len() as u64
        );
        errors
    }
}

type CallbackOutcome = thread::Result<BatchObservableResult>;

/// Runs the callbacks of one collection, inline without a deadline and on
/// a single worker thread with one.
struct CallbackRunner {
    deadline: Option<Instant>,
    worker: Option<CallbackWorker>,
    // set once a callback overran the deadline; the worker is still busy
    stalled: bool,
}

struct CallbackWorker {
    jobs: Sender<(BatchCallback, BatchObservableResult)>,
    outcomes: Receiver<CallbackOutcome>,
}

impl CallbackWorker {
    fn spawn() -> io::Result<Self> {
        let (jobs, job_receiver) = mpsc::channel::<(BatchCallback, BatchObservableResult)>();
        let (outcome_sender, outcomes) = mpsc::channel();
        thread::Builder::new()
            .name("telemetry-metrics-callbacks".to_string())
            .spawn(move || {
                for (callback, batch) in job_receiver {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(&batch)));
                    // the receiver is gone if the deadline passed first
                    if outcome_sender.send(outcome.map(|()| batch)).is_err() {
                        break;
                    }
                }
            })?;
        Ok(CallbackWorker { jobs, outcomes })
    }
}

impl CallbackRunner {
    fn new(deadline: Option<Instant>) -> Self {
        CallbackRunner {
            deadline,
            worker: None,
            stalled: false,
        }
    }

    fn run(
        &mut self,
        callback: BatchCallback,
        batch: BatchObservableResult,
        instruments: &str,
    ) -> MetricResult<BatchObservableResult> {
        let failed = |reason: String| MetricError::CallbackFailed {
            instruments: instruments.to_string(),
            reason,
        };

        let Some(deadline) = self.deadline else {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(&batch)));
            return match outcome {
                Ok(()) => Ok(batch),
                Err(payload) => Err(failed(panic_reason(payload))),
            };
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        let timed_out = MetricError::CallbackTimeout {
            instruments: instruments.to_string(),
            timeout: remaining,
        };
        if self.stalled || remaining.is_zero() {
            return Err(timed_out);
        }

        let worker = match self.worker.take() {
            Some(worker) => worker,
            None => CallbackWorker::spawn().map_err(|err| failed(err.to_string()))?,
        };
        if worker.jobs.send((callback, batch)).is_err() {
            return Err(failed("callback worker exited".to_string()));
        }

        let outcome = worker.outcomes.recv_timeout(remaining);
        self.worker = Some(worker);
        match outcome {
            Ok(Ok(batch)) => Ok(batch),
            Ok(Err(payload)) => Err(failed(panic_reason(payload))),
            Err(_) => {
                self.stalled = true;
                Err(timed_out)
            }
        }
    }
}

fn panic_reason(payload: Box<dyn Any + Send>) -> String {
    if let Some(reason) = payload.downcast_ref::<&str>() {
        reason.to_string()
    } else if let Some(reason) = payload.downcast_ref::<String>() {
        reason.clone()
    } else {
        "callback panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::thread::ThreadId;
    use std::time::Duration;

    use super::*;

    fn registry_with(callbacks: Vec<BatchCallback>) -> Arc<ObservableRegistry> {
        let registry = Arc::new(ObservableRegistry::default());
        for callback in callbacks {
            let _ = registry.register(Vec::new(), callback);
        }
        registry
    }

    #[test]
    fn callbacks_with_deadline_share_one_worker() {
        let threads: Arc<Mutex<Vec<ThreadId>>> = Arc::default();
        let callbacks = (0..3)
            .map(|_| {
                let threads = Arc::clone(&threads);
                Arc::new(move |_: &BatchObservableResult| {
                    threads.lock().unwrap().push(thread::current().id());
                }) as BatchCallback
            })
            .collect();
        let registry = registry_with(callbacks);

        let errors = registry.observe(
            SystemTime::now(),
            Some(Instant::now() + Duration::from_secs(5)),
        );

        assert!(errors.is_empty());
        let threads = threads.lock().unwrap();
        assert_eq!(threads.len(), 3);
        assert!(threads.iter().all(|id| *id == threads[0]));
        assert_ne!(threads[0], thread::current().id());
    }

    #[test]
    fn callbacks_without_deadline_run_inline() {
        let caller = thread::current().id();
        let ran_inline = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&ran_inline);
        let registry = registry_with(vec![Arc::new(move |_: &BatchObservableResult| {
            if thread::current().id() == caller {
                seen.fetch_add(1, Ordering::Relaxed);
            }
        }) as BatchCallback]);

        assert!(registry.observe(SystemTime::now(), None).is_empty());
        assert_eq!(ran_inline.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn callbacks_after_an_overrun_time_out() {
        let later_runs = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&later_runs);
        let registry = registry_with(vec![
            Arc::new(|_: &BatchObservableResult| thread::sleep(Duration::from_millis(300)))
                as BatchCallback,
            Arc::new(move |_: &BatchObservableResult| {
                seen.fetch_add(1, Ordering::Relaxed);
            }),
        ]);

        let errors = registry.observe(
            SystemTime::now(),
            Some(Instant::now() + Duration::from_millis(50)),
        );

        assert_eq!(errors.len(), 2);
        assert!(errors
            .iter()
            .all(|err| matches!(err, MetricError::CallbackTimeout { .. })));
        assert_eq!(later_runs.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn panic_in_worker_does_not_stop_later_callbacks() {
        let later_runs = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&later_runs);
        let registry = registry_with(vec![
            Arc::new(|_: &BatchObservableResult| panic!("boom")) as BatchCallback,
            Arc::new(move |_: &BatchObservableResult| {
                seen.fetch_add(1, Ordering::Relaxed);
            }),
        ]);

        let errors = registry.observe(
            SystemTime::now(),
            Some(Instant::now() + Duration::from_secs(5)),
        );

        assert!(matches!(
            errors.as_slice(),
            [MetricError::CallbackFailed { reason, .. }] if reason == "boom"
        ));
        assert_eq!(later_runs.load(Ordering::Relaxed), 1);
    }
}
