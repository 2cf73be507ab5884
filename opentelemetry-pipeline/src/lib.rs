//! # OpenTelemetry Export Pipeline
//!
//! A batching export pipeline for telemetry records: spans, log records and
//! metric points. Instrumented code hands records to a [`Processor`], which
//! delivers them to an [`Exporter`] that ships them to a backend.
//!
//! The production path is the [`BatchProcessor`]: producers pay for a
//! non-blocking enqueue into a bounded queue, and a dedicated thread exports
//! batches when enough records accumulated or a schedule delay elapsed.
//! Records that do not fit in the queue are dropped and counted rather than
//! blocking the application.
//!
//! ```ascii
//!   on_emit(record)                        +-----------------------------+
//!   ---------------> [ bounded queue ] --->| worker thread               |
//!                                          |  batch <= max_export_batch  |---> Exporter::export
//!   force_flush() -------- control ------->|  every scheduled_delay      |
//!   shutdown()                             +-----------------------------+
//! ```
//!
//! Flush and shutdown are asynchronous: they return an [`AsyncResult`] that
//! can be joined with a timeout, waited on, or awaited as a future.
//!
//! ## Getting started
//!
//! ```
//! use opentelemetry_pipeline::{AsyncResult, BatchProcessor, Exporter, Processor, Signal};
//! use std::time::Duration;
//!
//! #[derive(Debug)]
//! struct StdoutExporter;
//!
//! impl Exporter<String> for StdoutExporter {
//!     fn export(&self, batch: Vec<String>) -> AsyncResult {
//!         for line in batch {
//!             println!("{line}");
//!         }
//!         AsyncResult::success()
//!     }
//! }
//!
//! let processor = BatchProcessor::builder(StdoutExporter, Signal::Log)
//!     .build()
//!     .expect("valid configuration");
//!
//! processor.on_emit("user logged in".to_string());
//! assert!(processor.force_flush().join(Duration::from_secs(5)).is_ok());
//! assert!(processor.shutdown().join(Duration::from_secs(5)).is_ok());
//! ```
//!
//! ## Configuration
//!
//! [`BatchConfig`] is built from per-signal defaults, then the standard
//! `OTEL_BSP_*` (spans) and `OTEL_BLRP_*` (logs) environment variables, then
//! values set in code through [`BatchConfigBuilder`].
//!
//! ## Crate Feature Flags
//!
//! * `metrics` (enabled by default): provides [`MeterSink`], reporting the
//!   processor's own metrics through an OpenTelemetry `Meter`.
//! * `internal-logs` (enabled by default): emits the pipeline's own
//!   diagnostics as `tracing` events.
//! * `testing`: in-memory exporters and metric sinks for tests.
#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod async_result;
mod config;
mod error;
mod export;
pub mod instrumentation;
mod processor;
mod queue;
mod signal;
#[cfg(any(feature = "testing", test))]
#[cfg_attr(docsrs, doc(cfg(feature = "testing")))]
pub mod testing;

pub use async_result::AsyncResult;
pub use config::{BatchConfig, BatchConfigBuilder};
pub use error::{BuildError, ConfigError, OTelSdkError, OTelSdkResult};
pub use export::Exporter;
#[cfg(feature = "metrics")]
#[cfg_attr(docsrs, doc(cfg(feature = "metrics")))]
pub use instrumentation::MeterSink;
pub use instrumentation::{InstrumentationVersion, MetricsSink, NoopMetricsSink, ProcessorStats};
pub use processor::{
    BatchProcessor, BatchProcessorBuilder, MultiProcessor, Processor, SimpleProcessor, WorkerState,
};
pub use signal::Signal;
