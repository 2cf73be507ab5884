//! Batch processor configuration.
//!
//! Values are resolved in three layers: per-signal defaults, then the
//! signal's environment variables, then programmatic overrides on
//! [`BatchConfigBuilder`].
use crate::error::ConfigError;
use crate::signal::Signal;
use opentelemetry::otel_warn;
use std::{env, str::FromStr, time::Duration};

/// Delay interval between two consecutive span exports.
pub(crate) const OTEL_BSP_SCHEDULE_DELAY: &str = "OTEL_BSP_SCHEDULE_DELAY";
/// Default delay interval between two consecutive span exports.
pub(crate) const OTEL_BSP_SCHEDULE_DELAY_DEFAULT: Duration = Duration::from_millis(5_000);
/// Maximum span queue size.
pub(crate) const OTEL_BSP_MAX_QUEUE_SIZE: &str = "OTEL_BSP_MAX_QUEUE_SIZE";
/// Maximum span batch size, must be less than or equal to OTEL_BSP_MAX_QUEUE_SIZE.
pub(crate) const OTEL_BSP_MAX_EXPORT_BATCH_SIZE: &str = "OTEL_BSP_MAX_EXPORT_BATCH_SIZE";
/// Maximum allowed time to export spans.
pub(crate) const OTEL_BSP_EXPORT_TIMEOUT: &str = "OTEL_BSP_EXPORT_TIMEOUT";

/// Delay interval between two consecutive log exports.
pub(crate) const OTEL_BLRP_SCHEDULE_DELAY: &str = "OTEL_BLRP_SCHEDULE_DELAY";
/// Default delay interval between two consecutive log exports.
pub(crate) const OTEL_BLRP_SCHEDULE_DELAY_DEFAULT: Duration = Duration::from_millis(1_000);
/// Maximum log queue size.
pub(crate) const OTEL_BLRP_MAX_QUEUE_SIZE: &str = "OTEL_BLRP_MAX_QUEUE_SIZE";
/// Maximum log batch size, must be less than or equal to OTEL_BLRP_MAX_QUEUE_SIZE.
pub(crate) const OTEL_BLRP_MAX_EXPORT_BATCH_SIZE: &str = "OTEL_BLRP_MAX_EXPORT_BATCH_SIZE";
/// Maximum allowed time to export logs.
pub(crate) const OTEL_BLRP_EXPORT_TIMEOUT: &str = "OTEL_BLRP_EXPORT_TIMEOUT";

/// Default delay interval between two consecutive metric point exports.
pub(crate) const METRIC_SCHEDULE_DELAY_DEFAULT: Duration = Duration::from_millis(1_000);

/// Default maximum queue size, shared by all signals.
pub(crate) const MAX_QUEUE_SIZE_DEFAULT: usize = 2_048;
/// Default maximum batch size, shared by all signals.
pub(crate) const MAX_EXPORT_BATCH_SIZE_DEFAULT: usize = 512;
/// Default maximum allowed time to export a batch, shared by all signals.
pub(crate) const EXPORT_TIMEOUT_DEFAULT: Duration = Duration::from_millis(30_000);

struct EnvVars {
    schedule_delay: &'static str,
    max_queue_size: &'static str,
    max_export_batch_size: &'static str,
    export_timeout: &'static str,
}

fn env_vars(signal: Signal) -> Option<EnvVars> {
    match signal {
        Signal::Span => Some(EnvVars {
            schedule_delay: OTEL_BSP_SCHEDULE_DELAY,
            max_queue_size: OTEL_BSP_MAX_QUEUE_SIZE,
            max_export_batch_size: OTEL_BSP_MAX_EXPORT_BATCH_SIZE,
            export_timeout: OTEL_BSP_EXPORT_TIMEOUT,
        }),
        Signal::Log => Some(EnvVars {
            schedule_delay: OTEL_BLRP_SCHEDULE_DELAY,
            max_queue_size: OTEL_BLRP_MAX_QUEUE_SIZE,
            max_export_batch_size: OTEL_BLRP_MAX_EXPORT_BATCH_SIZE,
            export_timeout: OTEL_BLRP_EXPORT_TIMEOUT,
        }),
        Signal::Metric => None,
    }
}

fn default_scheduled_delay(signal: Signal) -> Duration {
    match signal {
        Signal::Span => OTEL_BSP_SCHEDULE_DELAY_DEFAULT,
        Signal::Log => OTEL_BLRP_SCHEDULE_DELAY_DEFAULT,
        Signal::Metric => METRIC_SCHEDULE_DELAY_DEFAULT,
    }
}

/// Batch processor configuration.
///
/// Immutable once built. Use [`BatchConfigBuilder`] to create one; building
/// validates every value so a processor never starts with illegal tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    /// The maximum queue size to buffer records for delayed processing. If the
    /// queue gets full it drops the records.
    pub(crate) max_queue_size: usize,

    /// The delay interval between two consecutive processing of batches.
    pub(crate) scheduled_delay: Duration,

    /// The maximum number of records to process in a single batch. If there are
    /// more than one batch worth of records then it processes multiple batches
    /// one after the other without any delay.
    pub(crate) max_export_batch_size: usize,

    /// The maximum duration to wait for a single export. Zero means no limit.
    pub(crate) max_export_timeout: Duration,
}

impl BatchConfig {
    /// Returns the configuration for `signal` from defaults and environment
    /// variables.
    pub fn for_signal(signal: Signal) -> Result<Self, ConfigError> {
        BatchConfigBuilder::for_signal(signal).build()
    }

    /// Maximum number of records buffered before new ones are dropped.
    pub fn max_queue_size(&self) -> usize {
        self.max_queue_size
    }

    /// Delay between two time-triggered exports.
    pub fn scheduled_delay(&self) -> Duration {
        self.scheduled_delay
    }

    /// Maximum number of records handed to the exporter in one call.
    pub fn max_export_batch_size(&self) -> usize {
        self.max_export_batch_size
    }

    /// Maximum time the worker waits on one export. Zero means no limit.
    pub fn max_export_timeout(&self) -> Duration {
        self.max_export_timeout
    }
}

/// A builder for creating [`BatchConfig`] instances.
#[derive(Debug, Clone)]
pub struct BatchConfigBuilder {
    max_queue_size: usize,
    scheduled_delay: Duration,
    max_export_batch_size: usize,
    max_export_timeout: Duration,
}

impl BatchConfigBuilder {
    /// Create a new [`BatchConfigBuilder`] initialized with the default batch
    /// config values of `signal`. The values are overridden by environment
    /// variables if set.
    ///
    /// The supported environment variables are:
    /// * spans: `OTEL_BSP_MAX_QUEUE_SIZE`, `OTEL_BSP_SCHEDULE_DELAY`,
    ///   `OTEL_BSP_MAX_EXPORT_BATCH_SIZE`, `OTEL_BSP_EXPORT_TIMEOUT`
    /// * logs: `OTEL_BLRP_MAX_QUEUE_SIZE`, `OTEL_BLRP_SCHEDULE_DELAY`,
    ///   `OTEL_BLRP_MAX_EXPORT_BATCH_SIZE`, `OTEL_BLRP_EXPORT_TIMEOUT`
    /// * metric points: none
    ///
    /// Note: Programmatic configuration overrides any value set via the environment variable.
    pub fn for_signal(signal: Signal) -> Self {
        let builder = BatchConfigBuilder {
            max_queue_size: MAX_QUEUE_SIZE_DEFAULT,
            scheduled_delay: default_scheduled_delay(signal),
            max_export_batch_size: MAX_EXPORT_BATCH_SIZE_DEFAULT,
            max_export_timeout: EXPORT_TIMEOUT_DEFAULT,
        };
        match env_vars(signal) {
            Some(vars) => builder.init_from_env_vars(&vars),
            None => builder,
        }
    }

    /// Set max_queue_size for [`BatchConfigBuilder`].
    /// It's the maximum queue size to buffer records for delayed processing.
    /// If the queue gets full it will drop the records.
    /// The default value is 2048.
    pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size;
        self
    }

    /// Set scheduled_delay for [`BatchConfigBuilder`].
    /// It's the delay interval between two consecutive processing of batches.
    /// The default value is 5000 milliseconds for spans and 1000 milliseconds
    /// for logs and metric points.
    pub fn with_scheduled_delay(mut self, scheduled_delay: Duration) -> Self {
        self.scheduled_delay = scheduled_delay;
        self
    }

    /// Set max_export_timeout for [`BatchConfigBuilder`].
    /// It's the maximum duration the worker waits for one export to complete.
    /// A zero duration waits without limit.
    /// The default value is 30000 milliseconds.
    pub fn with_max_export_timeout(mut self, max_export_timeout: Duration) -> Self {
        self.max_export_timeout = max_export_timeout;
        self
    }

    /// Set max_export_batch_size for [`BatchConfigBuilder`].
    /// It's the maximum number of records to process in a single batch. If there are
    /// more than one batch worth of records then it processes multiple batches
    /// one after the other without any delay.
    /// The default value is 512.
    pub fn with_max_export_batch_size(mut self, max_export_batch_size: usize) -> Self {
        self.max_export_batch_size = max_export_batch_size;
        self
    }

    /// Builds a `BatchConfig` enforcing the following invariants:
    /// * `max_queue_size` and `max_export_batch_size` must be greater than zero.
    /// * `max_export_batch_size` must be less than or equal to `max_queue_size`;
    ///   a larger value is lowered to `max_queue_size`.
    pub fn build(self) -> Result<BatchConfig, ConfigError> {
        if self.max_queue_size == 0 {
            return Err(ConfigError::InvalidMaxQueueSize);
        }
        if self.max_export_batch_size == 0 {
            return Err(ConfigError::InvalidMaxExportBatchSize);
        }

        let mut max_export_batch_size = self.max_export_batch_size;
        if max_export_batch_size > self.max_queue_size {
            otel_warn!(
                name: "BatchConfig.MaxExportBatchSizeAdjusted",
                max_export_batch_size = max_export_batch_size,
                max_queue_size = self.max_queue_size,
                message = "max_export_batch_size is larger than max_queue_size and was lowered to max_queue_size."
            );
            max_export_batch_size = self.max_queue_size;
        }

        Ok(BatchConfig {
            max_queue_size: self.max_queue_size,
            scheduled_delay: self.scheduled_delay,
            max_export_batch_size,
            max_export_timeout: self.max_export_timeout,
        })
    }

    fn init_from_env_vars(mut self, vars: &EnvVars) -> Self {
        if let Some(max_queue_size) = env::var(vars.max_queue_size)
            .ok()
            .and_then(|queue_size| usize::from_str(&queue_size).ok())
        {
            self.max_queue_size = max_queue_size;
        }

        if let Some(max_export_batch_size) = env::var(vars.max_export_batch_size)
            .ok()
            .and_then(|batch_size| usize::from_str(&batch_size).ok())
        {
            self.max_export_batch_size = max_export_batch_size;
        }

        if let Some(scheduled_delay) = env::var(vars.schedule_delay)
            .ok()
            .and_then(|delay| u64::from_str(&delay).ok())
        {
            self.scheduled_delay = Duration::from_millis(scheduled_delay);
        }

        if let Some(max_export_timeout) = env::var(vars.export_timeout)
            .ok()
            .and_then(|timeout| u64::from_str(&timeout).ok())
        {
            self.max_export_timeout = Duration::from_millis(max_export_timeout);
        }

        self
    }
}
