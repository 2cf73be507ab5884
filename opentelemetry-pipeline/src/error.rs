//! Error types shared by the export pipeline.
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Outcome of an export, flush or shutdown operation.
pub type OTelSdkResult = Result<(), OTelSdkError>;

/// Errors reported through an [`AsyncResult`](crate::AsyncResult).
///
/// The type is `Clone` because a single outcome is observed by every party
/// waiting on the same result.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum OTelSdkError {
    /// Shutdown has already been invoked.
    ///
    /// Returned by operations that reach the pipeline after its worker has
    /// stopped.
    #[error("Shutdown already invoked")]
    AlreadyShutdown,

    /// Operation timed out before completing.
    ///
    /// The underlying operation keeps running; only the wait was abandoned.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Operation failed due to an internal error, including an exporter that
    /// reported failure or panicked.
    #[error("Operation failed: {0}")]
    InternalFailure(String),
}

/// Invalid tunables rejected by [`BatchConfigBuilder::build`](crate::BatchConfigBuilder::build).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// The queue must be able to hold at least one record.
    #[error("max_queue_size must be greater than zero")]
    InvalidMaxQueueSize,

    /// A batch must be able to hold at least one record.
    #[error("max_export_batch_size must be greater than zero")]
    InvalidMaxExportBatchSize,
}

/// Errors returned when building a processor.
///
/// No worker thread is left running when a build fails.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BuildError {
    /// The supplied or environment-derived configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The operating system refused to start the worker thread.
    #[error("failed to spawn batch processor worker thread")]
    WorkerSpawn(#[source] io::Error),
}
