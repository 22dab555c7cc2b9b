//! Shared building blocks for the telemetry metrics SDK.
//!
//! This crate holds the types that instrumented code and the SDK both need
//! to agree on: attribute [Key]s and [Value]s, [KeyValue] pairs, the
//! [InstrumentationScope] that groups instruments, and the internal
//! diagnostics macros ([otel_debug!], [otel_info!], [otel_warn!],
//! [otel_error!]).
//!
//! ```
//! use telemetry_api::{InstrumentationScope, KeyValue};
//!
//! let scope = InstrumentationScope::builder("payments")
//!     .with_version(env!("CARGO_PKG_VERSION"))
//!     .build();
//! let attributes = [KeyValue::new("region", "eu-west-1"), KeyValue::new("shard", 7_i64)];
//! # let _ = (scope, attributes);
//! ```
//!
//! ## Crate Feature Flags
//!
//! * `internal-logs`: forwards the `otel_*!` macros to `tracing` events with
//!   the calling crate's name as target. Enabled by default.
#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![cfg_attr(test, deny(warnings))]

mod common;
mod internal_logging;

pub use common::{
    Array, InstrumentationScope, InstrumentationScopeBuilder, Key, KeyValue, StringValue, Value,
};

#[doc(hidden)]
pub mod time {
    use std::time::SystemTime;

    /// Wall clock used for every timestamp the SDK stamps on data.
    #[doc(hidden)]
    #[cfg(any(
        not(target_arch = "wasm32"),
        all(target_arch = "wasm32", target_os = "wasi")
    ))]
    pub fn now() -> SystemTime {
        SystemTime::now()
    }

    /// Wall clock used for every timestamp the SDK stamps on data.
    #[doc(hidden)]
    #[cfg(all(target_arch = "wasm32", not(target_os = "wasi")))]
    pub fn now() -> SystemTime {
        SystemTime::UNIX_EPOCH + std::time::Duration::from_millis(js_sys::Date::now() as u64)
    }
}

#[doc(hidden)]
#[cfg(feature = "internal-logs")]
pub mod _private {
    pub use tracing::{debug, error, info, warn};
}
