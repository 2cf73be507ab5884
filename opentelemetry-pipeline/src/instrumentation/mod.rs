//! # Processor self-instrumentation
//!
//! Every processor keeps in-process atomic counters of what happened to the
//! records it accepted, and mirrors them into a [`MetricsSink`] using one of
//! two naming schemes selected by [`InstrumentationVersion`]:
//!
//! | version  | counter                                 | gauges                                                  |
//! |----------|-----------------------------------------|---------------------------------------------------------|
//! | `Latest` | `otel.sdk.processor.<signal>.processed` | `otel.sdk.processor.<signal>.queue.size`, `.queue.capacity` |
//! | `Legacy` | `processedSpans`, `processedLogs`, ...  | `queueSize`                                             |
//!
//! Recording never fails and never blocks producers beyond an atomic add and
//! the sink's own cost.
use crate::error::{OTelSdkError, OTelSdkResult};
use crate::queue::QueueOccupancy;
use crate::signal::Signal;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

mod legacy;
mod semconv;
mod sink;

#[cfg(feature = "metrics")]
pub use sink::MeterSink;
pub use sink::{GaugeCallback, MetricsSink, NoopMetricsSink};

/// Naming scheme used when reporting processor metrics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum InstrumentationVersion {
    /// Camel-case names used before the SDK semantic conventions existed,
    /// e.g. `processedSpans` with a boolean `dropped` attribute.
    Legacy,
    /// Names from the SDK self-observability semantic conventions, e.g.
    /// `otel.sdk.processor.span.processed` with an `error.type` attribute.
    #[default]
    Latest,
}

/// Snapshot of a processor's record counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct ProcessorStats {
    /// Records dropped because the queue was full or the processor was
    /// shut down.
    pub dropped: u64,
    /// Records handed to the exporter in batches that succeeded.
    pub exported: u64,
    /// Records handed to the exporter in batches that failed, panicked or
    /// timed out.
    pub failed: u64,
}

/// What happened to a group of records.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Outcome {
    Exported,
    QueueFull,
    AlreadyShutdown,
    Timeout,
    ExportFailed,
}

impl Outcome {
    pub(crate) fn error_type(self) -> Option<&'static str> {
        match self {
            Outcome::Exported => None,
            Outcome::QueueFull => Some("queue_full"),
            Outcome::AlreadyShutdown => Some("already_shutdown"),
            Outcome::Timeout => Some("timeout"),
            Outcome::ExportFailed => Some("export_failed"),
        }
    }

    fn of_export(result: &OTelSdkResult) -> Self {
        match result {
            Ok(()) => Outcome::Exported,
            Err(OTelSdkError::Timeout(_)) => Outcome::Timeout,
            Err(_) => Outcome::ExportFailed,
        }
    }
}

/// A naming scheme for processor metrics.
pub(crate) trait InstrumentationStrategy: Send + Sync + Debug {
    fn record(&self, sink: &dyn MetricsSink, count: u64, outcome: Outcome);

    fn register_gauges(&self, sink: &dyn MetricsSink, occupancy: QueueOccupancy, capacity: usize);
}

fn strategy_for(signal: Signal, version: InstrumentationVersion) -> Box<dyn InstrumentationStrategy> {
    match version {
        InstrumentationVersion::Legacy => Box::new(legacy::LegacyInstrumentation::new(signal)),
        InstrumentationVersion::Latest => Box::new(semconv::SemconvInstrumentation::new(signal)),
    }
}

#[derive(Debug)]
pub(crate) struct Instrumentation {
    sink: Arc<dyn MetricsSink>,
    strategy: Box<dyn InstrumentationStrategy>,
    dropped: AtomicU64,
    exported: AtomicU64,
    failed: AtomicU64,
}

impl Instrumentation {
    /// Selects the naming scheme and registers the queue gauges.
    pub(crate) fn new(
        signal: Signal,
        version: InstrumentationVersion,
        sink: Arc<dyn MetricsSink>,
        occupancy: QueueOccupancy,
        capacity: usize,
    ) -> Self {
        let strategy = strategy_for(signal, version);
        strategy.register_gauges(sink.as_ref(), occupancy, capacity);
        Instrumentation {
            sink,
            strategy,
            dropped: AtomicU64::new(0),
            exported: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Records one dropped record. Returns the number of records dropped
    /// before this one.
    pub(crate) fn record_dropped(&self, reason: Outcome) -> u64 {
        debug_assert!(matches!(
            reason,
            Outcome::QueueFull | Outcome::AlreadyShutdown
        ));
        let previous = self.dropped.fetch_add(1, Ordering::Relaxed);
        self.strategy.record(self.sink.as_ref(), 1, reason);
        previous
    }

    /// Records the outcome of exporting `count` records.
    pub(crate) fn record_export(&self, count: usize, result: &OTelSdkResult) {
        if count == 0 {
            return;
        }
        let count = count as u64;
        let outcome = Outcome::of_export(result);
        match outcome {
            Outcome::Exported => self.exported.fetch_add(count, Ordering::Relaxed),
            _ => self.failed.fetch_add(count, Ordering::Relaxed),
        };
        self.strategy.record(self.sink.as_ref(), count, outcome);
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn stats(&self) -> ProcessorStats {
        ProcessorStats {
            dropped: self.dropped(),
            exported: self.exported.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}
