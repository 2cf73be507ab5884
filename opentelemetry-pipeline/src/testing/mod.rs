//! In-memory exporters and sinks for testing purpose.
use crate::async_result::AsyncResult;
use crate::export::Exporter;

mod in_memory_exporter;
mod in_memory_metrics;

pub use in_memory_exporter::{InMemoryExporter, InMemoryExporterBuilder};
pub use in_memory_metrics::InMemoryMetricsSink;

/// A no-op instance of an [`Exporter`]. Every call succeeds immediately and
/// records are discarded.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopExporter {
    _private: (),
}

impl NoopExporter {
    /// Create a new noop exporter
    pub fn new() -> Self {
        NoopExporter { _private: () }
    }
}

impl<R: Send> Exporter<R> for NoopExporter {
    fn export(&self, _batch: Vec<R>) -> AsyncResult {
        AsyncResult::success()
    }
}
