//! Errors returned by lifecycle operations shared by readers, exporters and
//! the meter provider.
use std::sync::PoisonError;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while flushing or shutting down a component.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum OTelSdkError {
    /// The component was already shut down.
    ///
    /// Calling flush or shutdown again after a shutdown is a no-op that
    /// reports this error.
    #[error("Shutdown already invoked")]
    AlreadyShutdown,

    /// The operation did not complete in time.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The operation failed, with a human readable reason.
    #[error("Operation failed: {0}")]
    InternalFailure(String),
}

impl<T> From<PoisonError<T>> for OTelSdkError {
    fn from(err: PoisonError<T>) -> Self {
        OTelSdkError::InternalFailure(format!("lock poisoned: {err}"))
    }
}

/// A specialized `Result` type for flush and shutdown operations.
pub type OTelSdkResult = Result<(), OTelSdkError>;
