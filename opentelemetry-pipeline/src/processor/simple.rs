//! The `SimpleProcessor` forwards each record to the exporter as soon as it
//! is emitted, on the emitting thread. It is **synchronous** and designed for
//! debugging or testing; it has no batching and is not suitable for
//! high-throughput use.
use super::Processor;
use crate::async_result::AsyncResult;
use crate::error::OTelSdkError;
use crate::export::Exporter;
use opentelemetry::{otel_debug, otel_error, Context};
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Mutex, OnceLock};

/// A [`Processor`] that immediately exports records as they are emitted.
/// Records are exported synchronously in the thread that emits them, one
/// record per export call.
///
/// ```
/// use opentelemetry_pipeline::{AsyncResult, Exporter, Processor, SimpleProcessor};
///
/// #[derive(Debug)]
/// struct StdoutExporter;
///
/// impl Exporter<String> for StdoutExporter {
///     fn export(&self, batch: Vec<String>) -> AsyncResult {
///         batch.iter().for_each(|line| println!("{line}"));
///         AsyncResult::success()
///     }
/// }
///
/// let processor = SimpleProcessor::<String, _>::new(StdoutExporter);
/// processor.on_emit("hello".to_string());
/// assert!(processor.shutdown().wait().is_ok());
/// ```
pub struct SimpleProcessor<R, E> {
    exporter: Mutex<E>,
    shutdown: OnceLock<AsyncResult>,
    _records: PhantomData<fn(R)>,
}

impl<R, E> SimpleProcessor<R, E>
where
    E: Exporter<R>,
{
    /// Creates a new instance of `SimpleProcessor`.
    pub fn new(exporter: E) -> Self {
        SimpleProcessor {
            exporter: Mutex::new(exporter),
            shutdown: OnceLock::new(),
            _records: PhantomData,
        }
    }
}

impl<R, E: fmt::Debug> fmt::Debug for SimpleProcessor<R, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleProcessor")
            .field("exporter", &self.exporter)
            .field("is_shutdown", &self.shutdown.get().is_some())
            .finish()
    }
}

impl<R, E> Processor<R> for SimpleProcessor<R, E>
where
    R: Send,
    E: Exporter<R>,
{
    fn on_emit(&self, record: R) {
        let _suppress_guard = Context::enter_telemetry_suppressed_scope();
        // noop after shutdown
        if self.shutdown.get().is_some() {
            otel_debug!(name: "SimpleProcessor.Emit.AfterShutdown");
            return;
        }

        let exporter = match self.exporter.lock() {
            Ok(exporter) => exporter,
            Err(_) => {
                otel_debug!(name: "SimpleProcessor.Emit.MutexPoisoning");
                return;
            }
        };
        if let Err(err) = futures_executor::block_on(exporter.export(vec![record])) {
            otel_error!(
                name: "SimpleProcessor.Emit.ExportError",
                error = format!("{}", err)
            );
        }
    }

    fn force_flush(&self) -> AsyncResult {
        if self.shutdown.get().is_some() {
            return AsyncResult::failure(OTelSdkError::AlreadyShutdown);
        }
        // Every record was exported before `on_emit` returned.
        AsyncResult::success()
    }

    fn shutdown(&self) -> AsyncResult {
        self.shutdown
            .get_or_init(|| match self.exporter.lock() {
                Ok(exporter) => AsyncResult::of_all([exporter.flush(), exporter.shutdown()]),
                Err(_) => AsyncResult::failure(OTelSdkError::InternalFailure(
                    "SimpleProcessor mutex poison at shutdown".into(),
                )),
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{InMemoryExporter, InMemoryExporterBuilder};

    #[derive(Debug)]
    struct FailingExporter;

    impl Exporter<u32> for FailingExporter {
        fn export(&self, _batch: Vec<u32>) -> AsyncResult {
            AsyncResult::failure(OTelSdkError::InternalFailure("unreachable backend".into()))
        }
    }

    #[test]
    fn exports_each_record_synchronously() {
        let exporter = InMemoryExporter::<u32>::default();
        let processor = SimpleProcessor::<u32, _>::new(exporter.clone());

        processor.on_emit(1);
        processor.on_emit(2);

        assert_eq!(exporter.get_exported_records().unwrap(), vec![1, 2]);
        assert_eq!(exporter.get_batch_sizes().unwrap(), vec![1, 1]);
        assert!(processor.force_flush().join(std::time::Duration::ZERO).is_ok());
    }

    #[test]
    fn shutdown_is_idempotent_and_stops_exporting() {
        let exporter = InMemoryExporterBuilder::new()
            .keep_records_on_shutdown()
            .build::<u32>();
        let processor = SimpleProcessor::<u32, _>::new(exporter.clone());
        processor.on_emit(1);

        assert!(processor.shutdown().wait().is_ok());
        assert!(processor.shutdown().wait().is_ok());
        processor.on_emit(2);

        assert_eq!(exporter.shutdown_count(), 1);
        assert_eq!(exporter.flush_count(), 1);
        assert_eq!(exporter.get_exported_records().unwrap(), vec![1]);
        assert_eq!(
            processor.force_flush().wait(),
            Err(OTelSdkError::AlreadyShutdown)
        );
    }

    #[test]
    fn export_failure_does_not_escape_on_emit() {
        let processor = SimpleProcessor::<u32, _>::new(FailingExporter);

        processor.on_emit(1);

        assert!(processor.shutdown().wait().is_ok());
    }
}
