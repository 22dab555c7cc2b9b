#![allow(unused_macros)]
//! Diagnostics emitted by the SDK itself.
//!
//! The macros are meant for SDK internals, readers and exporters, not for
//! application logging. Each event carries a stable `name` so that it can
//! be filtered on, plus optional `key = value` fields whose values must
//! implement `Display` (and `tracing::Value` when `internal-logs` is on).
//!
//! Under `cfg(test)` every event is also printed to stdout, which makes
//! `cargo test -- --nocapture` show the SDK's view of a failing test.

#[doc(hidden)]
#[macro_export]
macro_rules! __otel_event {
    ($level:ident, $label:literal, $name:expr) => {
        #[cfg(feature = "internal-logs")]
        {
            $crate::_private::$level!(name: $name, target: env!("CARGO_PKG_NAME"), name = $name);
        }

        #[cfg(test)]
        {
            println!("{}: name={}", $label, $name);
        }

        #[cfg(all(not(feature = "internal-logs"), not(test)))]
        {
            let _ = $name;
        }
    };
    ($level:ident, $label:literal, $name:expr, $($key:ident = $value:expr),+) => {
        #[cfg(feature = "internal-logs")]
        {
            $crate::_private::$level!(
                name: $name,
                target: env!("CARGO_PKG_NAME"),
                name = $name,
                $($key = $value),+
            );
        }

        #[cfg(test)]
        {
            print!("{}: name={}", $label, $name);
            $(
                print!(", {}={}", stringify!($key), $value);
            )+
            println!();
        }

        #[cfg(all(not(feature = "internal-logs"), not(test)))]
        {
            let _ = ($name, $($value),+);
        }
    };
}

/// Log a debug-level SDK event.
///
/// ```
/// use telemetry_api::otel_debug;
/// otel_debug!(name: "MeterProvider.Built", readers = 2);
/// ```
#[macro_export]
macro_rules! otel_debug {
    (name: $name:expr $(,)?) => {
        $crate::__otel_event!(debug, "otel_debug", $name)
    };
    (name: $name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        $crate::__otel_event!(debug, "otel_debug", $name, $($key = $value),+)
    };
}

/// Log an info-level SDK event.
///
/// ```
/// use telemetry_api::otel_info;
/// otel_info!(name: "PeriodicReader.Started", interval_ms = 60_000);
/// ```
#[macro_export]
macro_rules! otel_info {
    (name: $name:expr $(,)?) => {
        $crate::__otel_event!(info, "otel_info", $name)
    };
    (name: $name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        $crate::__otel_event!(info, "otel_info", $name, $($key = $value),+)
    };
}

/// Log a warning-level SDK event. Used when a measurement or registration
/// is corrected or dropped.
///
/// ```
/// use telemetry_api::otel_warn;
/// otel_warn!(name: "Counter.NegativeValue", instrument = "requests");
/// ```
#[macro_export]
macro_rules! otel_warn {
    (name: $name:expr $(,)?) => {
        $crate::__otel_event!(warn, "otel_warn", $name)
    };
    (name: $name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        $crate::__otel_event!(warn, "otel_warn", $name, $($key = $value),+)
    };
}

/// Log an error-level SDK event.
///
/// ```
/// use telemetry_api::otel_error;
/// otel_error!(name: "PeriodicReader.ExportFailed", error = "connection refused");
/// ```
#[macro_export]
macro_rules! otel_error {
    (name: $name:expr $(,)?) => {
        $crate::__otel_event!(error, "otel_error", $name)
    };
    (name: $name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        $crate::__otel_event!(error, "otel_error", $name, $($key = $value),+)
    };
}
