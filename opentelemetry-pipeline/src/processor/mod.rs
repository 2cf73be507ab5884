//! # Processors
//!
//! A processor receives records from the SDK as they are produced and is
//! responsible for handing them to an [`Exporter`](crate::Exporter).
//!
//! ```ascii
//!   +-----+--------------+   +-----------------------+   +-------------------+
//!   |     |              |   |                       |   |                   |
//!   | SDK | on_emit(rec) +--->   (Batch)Processor    +--->  Exporter         |
//!   +-----+--------------+   +-----------------------+   +-------------------+
//! ```
//!
//! * [`BatchProcessor`] buffers records and exports them in batches from a
//!   dedicated thread. This is the processor to use in production.
//! * [`SimpleProcessor`] exports each record synchronously on the calling
//!   thread. Useful for debugging and tests.
//! * [`MultiProcessor`] fans records out to several processors.
use crate::async_result::AsyncResult;
use std::fmt::Debug;

mod batch;
mod multi;
mod simple;

pub use batch::{BatchProcessor, BatchProcessorBuilder, WorkerState};
pub use multi::MultiProcessor;
pub use simple::SimpleProcessor;

/// `Processor` is the interface through which records of type `R` enter an
/// export pipeline.
pub trait Processor<R>: Send + Sync + Debug {
    /// Called with every produced record. This method is called
    /// synchronously on the producing thread, therefore it must not block
    /// or panic. Records that cannot be accepted are dropped.
    fn on_emit(&self, record: R);

    /// Exports every record emitted before this call.
    ///
    /// The returned result completes once those records were handed to the
    /// exporter and the exports finished.
    fn force_flush(&self) -> AsyncResult;

    /// Shuts down the processor. Called when the SDK is shut down. This is an
    /// opportunity for processors to export remaining records and release
    /// the exporter.
    ///
    /// Implementations must make sure shutdown can be called multiple times;
    /// every call returns the result of the first one.
    fn shutdown(&self) -> AsyncResult;
}

impl<R, P> Processor<R> for Box<P>
where
    P: Processor<R> + ?Sized,
{
    fn on_emit(&self, record: R) {
        self.as_ref().on_emit(record)
    }

    fn force_flush(&self) -> AsyncResult {
        self.as_ref().force_flush()
    }

    fn shutdown(&self) -> AsyncResult {
        self.as_ref().shutdown()
    }
}
