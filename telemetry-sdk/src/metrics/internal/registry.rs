use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use telemetry_api::otel_warn;

use crate::metrics::instrument::InstrumentDescriptor;
use crate::metrics::{MetricError, MetricResult};

use super::storage::MetricStorage;

struct RegisteredStorage {
    descriptor: InstrumentDescriptor,
    storage: Arc<dyn MetricStorage>,
    /// The record side, an `Arc<dyn SyncWritable<T>>` or
    /// `Arc<dyn AsyncWritable<T>>`.
    writer: Box<dyn Any + Send + Sync>,
}

#[derive(Default)]
struct Storages {
    registered: Vec<RegisteredStorage>,
    /// Lowercased stream name to index in `registered`.
    by_name: HashMap<String, usize>,
}

/// The streams of one meter, at most one per case-insensitive name.
#[derive(Default)]
pub(crate) struct MetricStorageRegistry {
    storages: Mutex<Storages>,
}

impl MetricStorageRegistry {
    /// Returns the writer of the stream named by `descriptor`, creating the
    /// stream with `create` if there is none yet.
    ///
    /// An existing stream is shared when it differs at most in description.
    /// Any other conflict rejects the registration and leaves the existing
    /// stream untouched.
    pub(crate) fn find_or_register<W>(
        &self,
        descriptor: &InstrumentDescriptor,
        create: impl FnOnce() -> (Arc<dyn MetricStorage>, Arc<W>),
    ) -> MetricResult<Arc<W>>
    where
        W: ?Sized + Send + Sync + 'static,
    {
        let mut storages = self.storages.lock()?;
        let name = descriptor.normalized_name();

        if let Some(&index) = storages.by_name.get(&name) {
            let existing = &storages.registered[index];
            let writer = existing
                .writer
                .downcast_ref::<Arc<W>>()
                .filter(|_| existing.descriptor.is_compatible_with(descriptor));

            let Some(writer) = writer else {
                otel_warn!(
                    name: "Instrument.IncompatibleRegistration",
                    name_registered = existing.descriptor.name().to_string(),
                    kind_registered = format!("{:?}", existing.descriptor.kind()),
                    kind_requested = format!("{:?}", descriptor.kind()),
                    unit_registered = existing.descriptor.unit().to_string(),
                    unit_requested = descriptor.unit().to_string()
                );
                return Err(MetricError::IncompatibleInstrument(format!(
                    "{} is already registered as {:?} {:?} with unit '{}'",
                    existing.descriptor.name(),
                    existing.descriptor.value_type(),
                    existing.descriptor.kind(),
                    existing.descriptor.unit(),
                )));
            };

            if existing.descriptor.description() != descriptor.description() {
                otel_warn!(
                    name: "Instrument.DuplicateDescription",
                    instrument = existing.descriptor.name().to_string(),
                    description_registered = existing.descriptor.description().to_string(),
                    description_requested = descriptor.description().to_string()
                );
            }
            return Ok(Arc::clone(writer));
        }

        let (storage, writer) = create();
        let index = storages.registered.len();
        storages.by_name.insert(name, index);
        storages.registered.push(RegisteredStorage {
            descriptor: descriptor.clone(),
            storage,
            writer: Box::new(Arc::clone(&writer)),
        });
        Ok(writer)
    }

    /// Every stream, in registration order.
    pub(crate) fn storages(&self) -> Vec<Arc<dyn MetricStorage>> {
        self.storages
            .lock()
            .map(|storages| {
                storages
                    .registered
                    .iter()
                    .map(|registered| Arc::clone(&registered.storage))
                    .collect()
            })
            .unwrap_or_default()
    }
}
