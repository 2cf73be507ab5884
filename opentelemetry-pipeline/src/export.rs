//! Exporter interface
use crate::async_result::AsyncResult;
use std::fmt::Debug;

/// `Exporter` defines the interface that exporters of records of type `R`
/// implement.
///
/// The pipeline treats exporters as collaborators: it never inspects records
/// and never retries. Wire protocols, encoding and retries belong to the
/// exporter.
pub trait Exporter<R>: Send + Sync + Debug {
    /// Exports a batch of records.
    ///
    /// The returned [`AsyncResult`] may already be completed, or may be
    /// completed later from any thread. Callers bound their wait with a
    /// timeout; an exporter must not assume the caller observes its outcome.
    ///
    /// # Arguments
    ///
    /// * `batch` - The records to export, in the order they were emitted.
    fn export(&self, batch: Vec<R>) -> AsyncResult;

    /// Flushes anything the exporter itself buffers.
    ///
    /// Called once by the batch processor during shutdown, after the last
    /// batch was exported.
    fn flush(&self) -> AsyncResult {
        AsyncResult::success()
    }

    /// Shuts down the exporter.
    ///
    /// Called once by the batch processor during shutdown, after
    /// [`flush`](Exporter::flush). No further calls follow.
    fn shutdown(&self) -> AsyncResult {
        AsyncResult::success()
    }
}

impl<R, E> Exporter<R> for Box<E>
where
    E: Exporter<R> + ?Sized,
{
    fn export(&self, batch: Vec<R>) -> AsyncResult {
        self.as_ref().export(batch)
    }

    fn flush(&self) -> AsyncResult {
        self.as_ref().flush()
    }

    fn shutdown(&self) -> AsyncResult {
        self.as_ref().shutdown()
    }
}
