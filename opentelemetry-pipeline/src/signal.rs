//! Signal kinds served by the pipeline.
use std::fmt;

/// The kind of telemetry flowing through a processor.
///
/// The pipeline never looks inside records; the signal only selects
/// configuration defaults, environment variables, the worker thread name and
/// the names used for self-instrumentation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Signal {
    /// Finished spans.
    Span,
    /// Log records.
    Log,
    /// Metric points.
    Metric,
}

impl Signal {
    /// Lower-case name used in metric names, e.g. `span`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Span => "span",
            Signal::Log => "log",
            Signal::Metric => "metric",
        }
    }

    pub(crate) fn worker_thread_name(&self) -> &'static str {
        match self {
            Signal::Span => "OpenTelemetry.Traces.BatchProcessor",
            Signal::Log => "OpenTelemetry.Logs.BatchProcessor",
            Signal::Metric => "OpenTelemetry.Metrics.BatchProcessor",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
