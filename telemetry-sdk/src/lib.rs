//! Metrics collection core.
//!
//! Instruments record measurements into per-instrument storages. Each
//! registered reader polls on its own schedule and receives a snapshot
//! reconciled to the aggregation temporality it asked for, without
//! disturbing what any other reader sees.
//!
//! ```
//! use telemetry_api::KeyValue;
//! use telemetry_sdk::metrics::{ManualReader, MetricReader, SdkMeterProvider, Temporality};
//!
//! let reader = ManualReader::builder()
//!     .with_temporality(Temporality::Delta)
//!     .build();
//! let provider = SdkMeterProvider::builder()
//!     .with_reader(reader.clone())
//!     .build();
//!
//! let meter = provider.meter("checkout");
//! let orders = meter.u64_counter("orders").with_unit("{order}").build();
//! orders.add(1, &[KeyValue::new("region", "eu")]);
//!
//! let result = reader.collect().unwrap();
//! assert!(result.errors.is_empty());
//! assert_eq!(result.resource_metrics.scope_metrics.len(), 1);
//! ```
//!
//! ## Crate Feature Flags
//!
//! * `internal-logs`: emit the SDK's own diagnostics through `tracing`.
//!   Enabled by default.
//! * `testing`: expose [`metrics::InMemoryMetricExporter`] outside of this
//!   crate's own tests.
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

pub mod error;
pub mod metrics;
mod resource;

pub use resource::{Resource, ResourceBuilder};
