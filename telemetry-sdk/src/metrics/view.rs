use regex::Regex;

use super::error::{MetricError, MetricResult};
use super::instrument::{validate_criteria, Instrument, Stream};

/// Used to customize the metrics that are output by the SDK.
///
/// Here are some examples when a [View] might be needed:
///
/// * Customize which Instruments are to be processed/ignored. For example, an
///   instrumented library can provide both temperature and humidity, but the
///   application developer might only want temperature.
/// * Customize the aggregation - if the default aggregation associated with the
///   [Instrument] does not meet the needs of the user. For example, an HTTP client
///   library might expose HTTP client request duration as Histogram by default,
///   but the application developer might only want the total count of outgoing
///   requests.
/// * Customize which attribute(s) are to be reported on metrics. For example,
///   an HTTP server library might expose HTTP verb (e.g. GET, POST) and HTTP
///   status code (e.g. 200, 301, 404). The application developer might only care
///   about HTTP status code (e.g. reporting the total count of HTTP requests for
///   each HTTP status code).
///
/// Every view that matches an instrument produces its own stream. An
/// instrument no view matches is reported as is.
///
/// # Example Custom View
///
/// View is implemented for all `Fn(&Instrument) -> Option<Stream>`.
///
/// ```
/// use telemetry_sdk::metrics::{Instrument, SdkMeterProvider, Stream};
///
/// // return streams for the given instrument
/// let my_view = |i: &Instrument| {
///   // return Some(Stream) or
///   None
/// };
///
/// let provider = SdkMeterProvider::builder().with_view(my_view).build();
/// # drop(provider)
/// ```
pub trait View: Send + Sync + 'static {
    /// Defines how data should be collected for certain instruments.
    ///
    /// Return [Stream] to use for matching [Instrument]s,
    /// otherwise if there is no match, return `None`.
    fn match_inst(&self, inst: &Instrument) -> Option<Stream>;
}

impl<T> View for T
where
    T: Fn(&Instrument) -> Option<Stream> + Send + Sync + 'static,
{
    fn match_inst(&self, inst: &Instrument) -> Option<Stream> {
        self(inst)
    }
}

impl View for Box<dyn View> {
    fn match_inst(&self, inst: &Instrument) -> Option<Stream> {
        (**self).match_inst(inst)
    }
}

/// Creates a [View] that applies the [Stream] mask for all instruments that
/// match criteria.
///
/// The returned [View] will only apply the mask if all non-empty fields of
/// criteria match the corresponding [Instrument] passed to the view. If all
/// fields of the criteria are their default values, a view that matches no
/// instruments is returned.
///
/// The [Instrument::name] field of criteria supports wildcard pattern
/// matching. The wildcard `*` is recognized as matching zero or more
/// characters, and `?` is recognized as matching exactly one character. For
/// example, a pattern of `*` will match all instrument names. A wildcard
/// criteria cannot be combined with a stream name, since several
/// instruments would then report under one name.
///
/// # Example
///
/// ```
/// use telemetry_sdk::metrics::{new_view, Aggregation, Instrument, Stream};
///
/// let criteria = Instrument::new().name("counter_*");
/// let mask = Stream::builder()
///     .with_aggregation(Aggregation::Sum)
///     .build()
///     .unwrap();
///
/// let view = new_view(criteria, mask);
/// # assert!(view.is_ok());
/// ```
pub fn new_view(criteria: Instrument, mask: Stream) -> MetricResult<Box<dyn View>> {
    if criteria.is_empty() {
        return Ok(Box::new(|_: &Instrument| None));
    }
    validate_criteria(&criteria)?;

    let name_matcher = if criteria.name.contains(['*', '?']) {
        if mask.name.is_some() {
            return Err(MetricError::Config(format!(
                "wildcard criteria '{}' cannot be combined with a stream name",
                criteria.name
            )));
        }
        let pattern = criteria
            .name
            .chars()
            .map(|c| match c {
                '?' => ".".to_string(),
                '*' => ".*".to_string(),
                c => regex::escape(&c.to_string()),
            })
            .collect::<String>();
        NameMatcher::Pattern(
            Regex::new(&format!("^{pattern}$"))
                .map_err(|err| MetricError::Config(err.to_string()))?,
        )
    } else if criteria.name.is_empty() {
        NameMatcher::Any
    } else {
        NameMatcher::Exact(criteria.name.to_ascii_lowercase())
    };

    if let Some(aggregation) = &mask.aggregation {
        aggregation.validate()?;
    }

    Ok(Box::new(move |i: &Instrument| -> Option<Stream> {
        let matched = name_matcher.matches(&i.name)
            && criteria.kind.map_or(true, |kind| Some(kind) == i.kind)
            && (criteria.unit.is_empty() || criteria.unit == i.unit)
            && (criteria.scope.name().is_empty() || criteria.scope.name() == i.scope.name());
        if !matched {
            return None;
        }
        Some(Stream {
            name: mask.name.clone().or_else(|| Some(i.name.clone())),
            description: mask
                .description
                .clone()
                .or_else(|| Some(i.description.clone())),
            aggregation: mask.aggregation.clone(),
            allowed_attribute_keys: mask.allowed_attribute_keys.clone(),
            cardinality_limit: mask.cardinality_limit,
        })
    }))
}

enum NameMatcher {
    Any,
    /// Lowercased, instrument names compare case-insensitively.
    Exact(String),
    Pattern(Regex),
}

impl NameMatcher {
    fn matches(&self, name: &str) -> bool {
        match self {
            NameMatcher::Any => true,
            NameMatcher::Exact(expected) => name.eq_ignore_ascii_case(expected),
            NameMatcher::Pattern(re) => re.is_match(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use telemetry_api::InstrumentationScope;

    use super::*;
    use crate::metrics::{Aggregation, InstrumentKind};

    fn instrument(name: &'static str, kind: InstrumentKind) -> Instrument {
        Instrument::new()
            .name(name)
            .kind(kind)
            .unit("ms")
            .scope(InstrumentationScope::builder("lib").build())
    }

    #[test]
    fn wildcard_patterns() {
        let cases = [
            ("*", "anything", true),
            ("http.*", "http.server.duration", true),
            ("http.*", "grpc.server.duration", false),
            ("req?", "reqs", true),
            ("req?", "requests", false),
            ("a.b", "axb", false),
        ];
        for (pattern, name, expected) in cases {
            let view = new_view(
                Instrument::new().name(pattern),
                Stream::builder().build().unwrap(),
            )
            .unwrap();
            assert_eq!(
                view.match_inst(&instrument(name, InstrumentKind::Counter)).is_some(),
                expected,
                "pattern {pattern} against {name}"
            );
        }
    }

    #[test]
    fn exact_name_is_case_insensitive() {
        let view = new_view(
            Instrument::new().name("Requests"),
            Stream::builder().with_name("renamed").build().unwrap(),
        )
        .unwrap();
        let stream = view
            .match_inst(&instrument("requests", InstrumentKind::Counter))
            .expect("view should match");
        assert_eq!(stream.name.as_deref(), Some("renamed"));
    }

    #[test]
    fn every_criterion_must_match() {
        let view = new_view(
            Instrument::new()
                .name("latency")
                .kind(InstrumentKind::Histogram)
                .unit("ms"),
            Stream::builder()
                .with_aggregation(Aggregation::Drop)
                .build()
                .unwrap(),
        )
        .unwrap();
        assert!(view
            .match_inst(&instrument("latency", InstrumentKind::Histogram))
            .is_some());
        assert!(view
            .match_inst(&instrument("latency", InstrumentKind::Counter))
            .is_none());
        assert!(view
            .match_inst(&instrument("latency", InstrumentKind::Histogram).unit("s"))
            .is_none());
    }

    #[test]
    fn scope_criterion() {
        let view = new_view(
            Instrument::new().scope(InstrumentationScope::builder("other").build()),
            Stream::builder().build().unwrap(),
        )
        .unwrap();
        assert!(view
            .match_inst(&instrument("x", InstrumentKind::Counter))
            .is_none());
    }

    #[test]
    fn wildcard_with_stream_name_is_rejected() {
        let result = new_view(
            Instrument::new().name("http.*"),
            Stream::builder().with_name("merged").build().unwrap(),
        );
        assert!(matches!(result, Err(MetricError::Config(_))));
    }

    #[test]
    fn empty_criteria_matches_nothing() {
        let view = new_view(Instrument::new(), Stream::builder().build().unwrap()).unwrap();
        assert!(view
            .match_inst(&instrument("x", InstrumentKind::Counter))
            .is_none());
    }
}
