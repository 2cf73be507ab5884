use crate::async_result::AsyncResult;
use crate::error::{OTelSdkError, OTelSdkResult};
use crate::export::Exporter;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type ExportResult<T> = Result<T, OTelSdkError>;

#[derive(Debug, Default)]
struct Calls {
    flush: AtomicUsize,
    shutdown: AtomicUsize,
}

/// An in-memory exporter that stores every exported record.
///
/// This exporter is useful for testing and debugging purposes. Clones share
/// storage, so keep a clone to inspect what a processor exported.
///
/// Each call to `export`, `flush` and `shutdown` completes immediately.
pub struct InMemoryExporter<R> {
    records: Arc<Mutex<Vec<R>>>,
    batch_sizes: Arc<Mutex<Vec<usize>>>,
    calls: Arc<Calls>,
    should_reset_on_shutdown: bool,
}

impl<R> Clone for InMemoryExporter<R> {
    fn clone(&self) -> Self {
        InMemoryExporter {
            records: self.records.clone(),
            batch_sizes: self.batch_sizes.clone(),
            calls: self.calls.clone(),
            should_reset_on_shutdown: self.should_reset_on_shutdown,
        }
    }
}

impl<R> Default for InMemoryExporter<R> {
    fn default() -> Self {
        InMemoryExporterBuilder::new().build()
    }
}

impl<R> fmt::Debug for InMemoryExporter<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryExporter")
            .field("calls", &self.calls)
            .field("should_reset_on_shutdown", &self.should_reset_on_shutdown)
            .finish()
    }
}

/// Builder for [`InMemoryExporter`].
#[derive(Debug, Clone)]
pub struct InMemoryExporterBuilder {
    reset_on_shutdown: bool,
}

impl Default for InMemoryExporterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryExporterBuilder {
    /// Creates a new builder. By default, stored records are cleared when
    /// the exporter is shut down.
    pub fn new() -> Self {
        Self {
            reset_on_shutdown: true,
        }
    }

    /// Creates a new instance of `InMemoryExporter`.
    pub fn build<R>(&self) -> InMemoryExporter<R> {
        InMemoryExporter {
            records: Arc::new(Mutex::new(Vec::new())),
            batch_sizes: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(Calls::default()),
            should_reset_on_shutdown: self.reset_on_shutdown,
        }
    }

    /// If set, the records will not be [`InMemoryExporter::reset`] on shutdown.
    pub fn keep_records_on_shutdown(self) -> Self {
        Self {
            reset_on_shutdown: false,
        }
    }
}

impl<R: Clone> InMemoryExporter<R> {
    /// Returns every exported record, in export order.
    pub fn get_exported_records(&self) -> ExportResult<Vec<R>> {
        self.records
            .lock()
            .map(|records| records.clone())
            .map_err(|e| OTelSdkError::InternalFailure(format!("Failed to lock records: {}", e)))
    }
}

impl<R> InMemoryExporter<R> {
    /// Returns the size of every batch passed to `export`, in call order.
    pub fn get_batch_sizes(&self) -> ExportResult<Vec<usize>> {
        self.batch_sizes
            .lock()
            .map(|sizes| sizes.clone())
            .map_err(|e| OTelSdkError::InternalFailure(format!("Failed to lock batches: {}", e)))
    }

    /// Number of records currently stored.
    pub fn exported_count(&self) -> usize {
        self.records.lock().map(|records| records.len()).unwrap_or(0)
    }

    /// Number of times [`Exporter::flush`] was called.
    pub fn flush_count(&self) -> usize {
        self.calls.flush.load(Ordering::SeqCst)
    }

    /// Number of times [`Exporter::shutdown`] was called.
    pub fn shutdown_count(&self) -> usize {
        self.calls.shutdown.load(Ordering::SeqCst)
    }

    /// Clears the stored records and batch sizes.
    pub fn reset(&self) {
        let _ = self.records.lock().map(|mut records| records.clear());
        let _ = self.batch_sizes.lock().map(|mut sizes| sizes.clear());
    }

    fn store(&self, batch: Vec<R>) -> OTelSdkResult {
        let mut records = self.records.lock().map_err(|e| {
            OTelSdkError::InternalFailure(format!("Failed to lock records for export: {}", e))
        })?;
        let mut sizes = self.batch_sizes.lock().map_err(|e| {
            OTelSdkError::InternalFailure(format!("Failed to lock batches for export: {}", e))
        })?;
        sizes.push(batch.len());
        records.extend(batch);
        Ok(())
    }
}

impl<R: Send> Exporter<R> for InMemoryExporter<R> {
    fn export(&self, batch: Vec<R>) -> AsyncResult {
        AsyncResult::from_outcome(self.store(batch))
    }

    fn flush(&self) -> AsyncResult {
        self.calls.flush.fetch_add(1, Ordering::SeqCst);
        AsyncResult::success()
    }

    fn shutdown(&self) -> AsyncResult {
        self.calls.shutdown.fetch_add(1, Ordering::SeqCst);
        if self.should_reset_on_shutdown {
            self.reset();
        }
        AsyncResult::success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_records_and_batch_sizes() {
        let exporter = InMemoryExporter::<i32>::default();

        exporter.export(vec![1, 2, 3]).wait().unwrap();
        exporter.export(vec![4]).wait().unwrap();

        assert_eq!(exporter.get_exported_records().unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(exporter.get_batch_sizes().unwrap(), vec![3, 1]);
        assert_eq!(exporter.exported_count(), 4);
    }

    #[test]
    fn shutdown_resets_unless_told_otherwise() {
        let resetting = InMemoryExporter::<&str>::default();
        let keeping = InMemoryExporterBuilder::new()
            .keep_records_on_shutdown()
            .build::<&str>();

        for exporter in [&resetting, &keeping] {
            exporter.export(vec!["a"]).wait().unwrap();
            exporter.flush().wait().unwrap();
            exporter.shutdown().wait().unwrap();
            assert_eq!(exporter.flush_count(), 1);
            assert_eq!(exporter.shutdown_count(), 1);
        }

        assert_eq!(resetting.exported_count(), 0);
        assert_eq!(keeping.get_exported_records().unwrap(), vec!["a"]);
    }
}
