//! # Batch Processor
//! The `BatchProcessor` is the production implementation of the [`Processor`]
//! interface, shared by every signal.
//!
//! It buffers records and sends them to the exporter in batches. An export is
//! triggered when `max_export_batch_size` records are buffered or every
//! `scheduled_delay`, whichever comes first. A dedicated background thread
//! owns the batch and performs every export, so producers only pay for a
//! non-blocking enqueue.
//!
//! ## Diagram
//!
//! ```ascii
//!   producers              worker thread ("OpenTelemetry.<Signal>.BatchProcessor")
//!   ---------              -------------------------------------------------------
//!   on_emit() --try--> [ bounded queue ] --drain--> batch --export--> Exporter
//!       |                                             ^
//!       +--wake (batch can be filled)--> [ control ] -+-- force_flush() / shutdown()
//! ```
use super::Processor;
use crate::async_result::AsyncResult;
use crate::config::BatchConfig;
use crate::error::{BuildError, OTelSdkError, OTelSdkResult};
use crate::export::Exporter;
use crate::instrumentation::{
    Instrumentation, InstrumentationVersion, MetricsSink, NoopMetricsSink, Outcome, ProcessorStats,
};
use crate::queue::{self, EnqueueError, QueueReceiver, QueueSender};
use crate::signal::Signal;
use opentelemetry::{otel_debug, otel_error, otel_warn, Context};
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

// Control messages only wake the worker, so a small bound is enough.
const CONTROL_CHANNEL_SIZE: usize = 64;
// Lower bound on a wait, so a zero schedule delay polls instead of spinning.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);
// Used when `now + scheduled_delay` is not representable.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// Messages sent from application threads to the worker thread.
///
/// They carry no data: the flush slot and the shutdown result are the source
/// of truth, checked by the worker on every iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlMessage {
    /// Sent when the queue holds enough records to fill the batch.
    Wake,
    /// A force flush request was installed.
    Flush,
    /// Shutdown was requested.
    Shutdown,
}

/// Lifecycle of the worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum WorkerState {
    /// Accepting records and exporting on size or time triggers.
    Running,
    /// Exporting everything queued on behalf of a force flush.
    Draining,
    /// Exporting everything queued, then flushing and shutting down the
    /// exporter.
    ShuttingDown,
    /// The worker exited. Terminal.
    Stopped,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Running,
            1 => WorkerState::Draining,
            2 => WorkerState::ShuttingDown,
            _ => WorkerState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            WorkerState::Running => 0,
            WorkerState::Draining => 1,
            WorkerState::ShuttingDown => 2,
            WorkerState::Stopped => 3,
        }
    }
}

const FLUSH_IDLE: u8 = 0;
const FLUSH_INSTALLING: u8 = 1;
const FLUSH_PENDING: u8 = 2;
const FLUSH_CLOSED: u8 = 3;

/// Outcome of claiming the flush slot.
#[derive(Debug)]
enum FlushClaim {
    /// The caller installed a new request and must wake the worker.
    Installed(AsyncResult),
    /// A request was already pending; the caller shares its result.
    Joined(AsyncResult),
    Closed,
}

/// Holds at most one outstanding flush request.
///
/// Ownership of the slot moves through `state` with compare-and-set only:
/// `IDLE -> INSTALLING -> PENDING` by the claiming caller, `PENDING -> IDLE`
/// by the worker once it took the request, and `IDLE | PENDING -> CLOSED` by
/// the worker on exit. `request` is written only while `INSTALLING` and taken
/// only while `PENDING`.
#[derive(Debug)]
struct FlushSlot {
    state: AtomicU8,
    request: Mutex<Option<AsyncResult>>,
}

impl FlushSlot {
    fn new() -> Self {
        FlushSlot {
            state: AtomicU8::new(FLUSH_IDLE),
            request: Mutex::new(None),
        }
    }

    fn lock_request(&self) -> MutexGuard<'_, Option<AsyncResult>> {
        self.request.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn claim(&self) -> FlushClaim {
        loop {
            match self.state.compare_exchange(
                FLUSH_IDLE,
                FLUSH_INSTALLING,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    let request = AsyncResult::new();
                    *self.lock_request() = Some(request.clone());
                    self.state.store(FLUSH_PENDING, Ordering::Release);
                    return FlushClaim::Installed(request);
                }
                Err(FLUSH_CLOSED) => return FlushClaim::Closed,
                Err(FLUSH_PENDING) => {
                    if let Some(pending) = self.lock_request().as_ref() {
                        return FlushClaim::Joined(pending.clone());
                    }
                    // The worker took it between the exchange and the lock.
                }
                Err(_) => {}
            }
            thread::yield_now();
        }
    }

    /// Called by the worker only.
    fn take(&self) -> Option<AsyncResult> {
        if self.state.load(Ordering::Acquire) != FLUSH_PENDING {
            return None;
        }
        let request = self.lock_request().take();
        self.state.store(FLUSH_IDLE, Ordering::Release);
        request
    }

    /// Called by the worker only. Returns the request that raced with the
    /// close, if any.
    fn close(&self) -> Option<AsyncResult> {
        loop {
            match self.state.compare_exchange(
                FLUSH_PENDING,
                FLUSH_CLOSED,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return self.lock_request().take(),
                Err(FLUSH_IDLE) => {
                    if self
                        .state
                        .compare_exchange(
                            FLUSH_IDLE,
                            FLUSH_CLOSED,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        return None;
                    }
                }
                Err(FLUSH_CLOSED) => return None,
                Err(_) => {}
            }
            thread::yield_now();
        }
    }
}

/// State shared between the processor handle and its worker.
#[derive(Debug)]
struct Shared {
    signal: Signal,
    flush: FlushSlot,
    shutdown: OnceLock<AsyncResult>,
    // Records the worker still needs to fill its batch; `usize::MAX` while
    // it is busy and does not want to be woken.
    records_needed: AtomicUsize,
    wake_pending: AtomicBool,
    state: AtomicU8,
    instrumentation: Instrumentation,
}

impl Shared {
    fn take_flush_request(&self) -> Option<AsyncResult> {
        self.flush.take()
    }

    /// Refuses further flush requests and resolves the one that raced with
    /// shutdown using the outcome of the final drain.
    fn close_flush_slot(&self, drained: &OTelSdkResult) {
        if let Some(request) = self.flush.close() {
            request.complete(drained.clone());
        }
    }

    fn request_shutdown(&self) -> (AsyncResult, bool) {
        let mut first = false;
        let result = self
            .shutdown
            .get_or_init(|| {
                first = true;
                AsyncResult::new()
            })
            .clone();
        (result, first)
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown.get().is_some()
    }

    fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: WorkerState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }
}

/// The `BatchProcessor` collects records in a bounded queue and exports them
/// in batches to the configured [`Exporter`] from a **dedicated background
/// thread**, so the producing threads are never blocked.
///
/// This processor supports the following configurations:
/// - **Queue size**: Maximum number of records that can be buffered. Records
///   emitted while the queue is full are dropped and counted.
/// - **Batch size**: Maximum number of records to include in a single export.
/// - **Scheduled delay**: Frequency at which the batch is exported.
/// - **Export timeout**: How long the worker waits for a single export.
///
/// [`force_flush`](Processor::force_flush) exports everything emitted before
/// the call. [`shutdown`](Processor::shutdown) exports everything queued,
/// then flushes and shuts down the exporter; it is recommended to call it
/// before the application exits. Dropping the processor requests shutdown
/// as well.
///
/// ### Using a BatchProcessor:
///
/// ```rust
/// use opentelemetry_pipeline::{
///     AsyncResult, BatchConfigBuilder, BatchProcessor, Exporter, Processor, Signal,
/// };
/// use std::time::Duration;
///
/// #[derive(Debug)]
/// struct LineExporter;
///
/// impl Exporter<String> for LineExporter {
///     fn export(&self, batch: Vec<String>) -> AsyncResult {
///         println!("exporting {} lines", batch.len());
///         AsyncResult::success()
///     }
/// }
///
/// let processor = BatchProcessor::builder(LineExporter, Signal::Log)
///     .with_batch_config(
///         BatchConfigBuilder::for_signal(Signal::Log)
///             .with_max_queue_size(2048)
///             .with_max_export_batch_size(512)
///             .with_scheduled_delay(Duration::from_secs(5))
///             .build()
///             .unwrap(),
///     )
///     .build()
///     .unwrap();
///
/// processor.on_emit("hello".to_string());
/// assert!(processor.shutdown().wait().is_ok());
/// ```
pub struct BatchProcessor<R> {
    records: QueueSender<R>,
    control: SyncSender<ControlMessage>,
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
    config: BatchConfig,
}

impl<R> fmt::Debug for BatchProcessor<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchProcessor")
            .field("signal", &self.shared.signal)
            .field("state", &self.shared.state())
            .field("queue", &self.records)
            .field("config", &self.config)
            .finish()
    }
}

impl<R> BatchProcessor<R>
where
    R: Send + 'static,
{
    /// Create a new batch processor builder for records of `signal`.
    pub fn builder<E>(exporter: E, signal: Signal) -> BatchProcessorBuilder<R, E>
    where
        E: Exporter<R> + 'static,
    {
        BatchProcessorBuilder {
            exporter,
            signal,
            config: None,
            metrics_sink: Arc::new(NoopMetricsSink::new()),
            instrumentation_version: InstrumentationVersion::default(),
            _records: PhantomData,
        }
    }

    fn new<E>(
        exporter: E,
        signal: Signal,
        config: BatchConfig,
        metrics_sink: Arc<dyn MetricsSink>,
        instrumentation_version: InstrumentationVersion,
    ) -> Result<Self, BuildError>
    where
        E: Exporter<R> + 'static,
    {
        let (records, receiver) = queue::bounded(config.max_queue_size);
        let (control, control_receiver) = mpsc::sync_channel(CONTROL_CHANNEL_SIZE);
        let instrumentation = Instrumentation::new(
            signal,
            instrumentation_version,
            metrics_sink,
            records.occupancy(),
            records.capacity(),
        );
        let shared = Arc::new(Shared {
            signal,
            flush: FlushSlot::new(),
            shutdown: OnceLock::new(),
            records_needed: AtomicUsize::new(usize::MAX),
            wake_pending: AtomicBool::new(false),
            state: AtomicU8::new(WorkerState::Running.as_u8()),
            instrumentation,
        });

        let worker = Worker {
            exporter,
            records: receiver,
            control: control_receiver,
            shared: shared.clone(),
            batch: Vec::with_capacity(config.max_export_batch_size),
            next_export: deadline_after(config.scheduled_delay),
            config: config.clone(),
        };
        let handle = thread::Builder::new()
            .name(signal.worker_thread_name().to_string())
            .spawn(move || worker.run())
            .map_err(|err| {
                otel_error!(
                    name: "BatchProcessor.ThreadSpawnFailed",
                    signal = signal.as_str(),
                    error = format!("{}", err)
                );
                BuildError::WorkerSpawn(err)
            })?;

        Ok(BatchProcessor {
            records,
            control,
            shared,
            handle: Mutex::new(Some(handle)),
            config,
        })
    }
}

impl<R> BatchProcessor<R> {
    /// The signal this processor was built for.
    pub fn signal(&self) -> Signal {
        self.shared.signal
    }

    /// The configuration the processor runs with.
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Current state of the worker thread.
    pub fn state(&self) -> WorkerState {
        self.shared.state()
    }

    /// Snapshot of the record counters.
    pub fn stats(&self) -> ProcessorStats {
        self.shared.instrumentation.stats()
    }

    /// Number of records waiting in the queue.
    pub fn queue_len(&self) -> usize {
        self.records.len()
    }

    fn send_control(&self, message: ControlMessage) -> Result<(), TrySendError<ControlMessage>> {
        self.control.try_send(message)
    }

    fn wake_worker_if_needed(&self) {
        if self.records.len() < self.shared.records_needed.load(Ordering::SeqCst) {
            return;
        }
        // This is a cost-efficient check as atomic load operations do not
        // require exclusive access to the cache line. Swap ONLY when the load
        // returns false.
        if !self.shared.wake_pending.load(Ordering::Relaxed)
            && !self.shared.wake_pending.swap(true, Ordering::Relaxed)
            && self.send_control(ControlMessage::Wake).is_err()
        {
            self.shared.wake_pending.store(false, Ordering::Relaxed);
        }
    }

    fn drop_after_shutdown(&self) {
        self.shared
            .instrumentation
            .record_dropped(Outcome::AlreadyShutdown);
        otel_debug!(
            name: "BatchProcessor.Emit.AfterShutdown",
            signal = self.shared.signal.as_str(),
            message = "Records are being emitted after shutdown. They will not be exported."
        );
    }
}

impl<R> Processor<R> for BatchProcessor<R>
where
    R: Send + 'static,
{
    fn on_emit(&self, record: R) {
        if self.shared.is_shutdown_requested() {
            self.drop_after_shutdown();
            return;
        }

        match self.records.try_enqueue(record) {
            Ok(()) => self.wake_worker_if_needed(),
            Err(EnqueueError::Full(_)) => {
                // The first time we have to drop a record, emit a warning.
                if self
                    .shared
                    .instrumentation
                    .record_dropped(Outcome::QueueFull)
                    == 0
                {
                    otel_warn!(
                        name: "BatchProcessor.RecordDroppingStarted",
                        signal = self.shared.signal.as_str(),
                        message = "BatchProcessor dropped a record due to queue full. No further log will be emitted for further drops until Shutdown. During Shutdown time, a log will be emitted with exact count of total records dropped."
                    );
                }
            }
            // The worker is the only receiver, so the processor is shut down.
            Err(EnqueueError::Closed(_)) => self.drop_after_shutdown(),
        }
    }

    fn force_flush(&self) -> AsyncResult {
        let request = match self.shared.flush.claim() {
            FlushClaim::Installed(request) => request,
            FlushClaim::Joined(pending) => return pending,
            FlushClaim::Closed => {
                otel_debug!(
                    name: "BatchProcessor.ForceFlush.AlreadyShutdown",
                    signal = self.shared.signal.as_str(),
                    message = "ForceFlush invoked after Shutdown. This will not perform Flush and indicates a incorrect lifecycle management in Application."
                );
                return AsyncResult::failure(OTelSdkError::AlreadyShutdown);
            }
        };

        // A lost wake only delays the flush until the next scheduled export.
        if let Err(TrySendError::Full(_)) = self.send_control(ControlMessage::Flush) {
            otel_debug!(
                name: "BatchProcessor.ForceFlush.ControlChannelFull",
                signal = self.shared.signal.as_str()
            );
        }
        request
    }

    fn shutdown(&self) -> AsyncResult {
        let (result, first) = self.shared.request_shutdown();
        if !first {
            otel_debug!(
                name: "BatchProcessor.Shutdown.AlreadyRequested",
                signal = self.shared.signal.as_str(),
                message = "Shutdown is being invoked more than once. This is noop, but indicates a potential issue in the application's lifecycle management."
            );
            return result;
        }

        let dropped = self.shared.instrumentation.dropped();
        if dropped > 0 {
            otel_warn!(
                name: "BatchProcessor.RecordsDropped",
                signal = self.shared.signal.as_str(),
                dropped_records_count = dropped,
                max_queue_size = self.config.max_queue_size,
                message = "Records were dropped due to a queue being full. The count represents the total count of records dropped in the lifetime of this BatchProcessor. Consider increasing the queue size and/or decrease delay between intervals."
            );
        }

        match self.send_control(ControlMessage::Shutdown) {
            Ok(()) => {}
            // The worker also checks for shutdown on its next scheduled wake.
            Err(TrySendError::Full(_)) => {
                otel_debug!(
                    name: "BatchProcessor.Shutdown.ControlChannelFull",
                    signal = self.shared.signal.as_str()
                );
            }
            Err(TrySendError::Disconnected(_)) => {
                result.fail(OTelSdkError::InternalFailure(
                    "batch processor worker is not running".into(),
                ));
            }
        }
        result
    }
}

impl<R> Drop for BatchProcessor<R> {
    fn drop(&mut self) {
        let (result, first) = self.shared.request_shutdown();
        if first {
            otel_debug!(
                name: "BatchProcessor.Drop.ShutdownRequested",
                signal = self.shared.signal.as_str()
            );
            let _ = self.send_control(ControlMessage::Shutdown);
        }
        // Never block on an export in progress; the worker exits on its own.
        if result.is_done() {
            let handle = self
                .handle
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(handle) = handle {
                let _ = handle.join();
            }
        }
    }
}

/// A builder for creating [`BatchProcessor`] instances.
pub struct BatchProcessorBuilder<R, E> {
    exporter: E,
    signal: Signal,
    config: Option<BatchConfig>,
    metrics_sink: Arc<dyn MetricsSink>,
    instrumentation_version: InstrumentationVersion,
    _records: PhantomData<fn(R)>,
}

impl<R, E: fmt::Debug> fmt::Debug for BatchProcessorBuilder<R, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchProcessorBuilder")
            .field("exporter", &self.exporter)
            .field("signal", &self.signal)
            .field("config", &self.config)
            .field("metrics_sink", &self.metrics_sink)
            .field("instrumentation_version", &self.instrumentation_version)
            .finish()
    }
}

impl<R, E> BatchProcessorBuilder<R, E>
where
    R: Send + 'static,
    E: Exporter<R> + 'static,
{
    /// Set the BatchConfig for [`BatchProcessorBuilder`]. Without one, the
    /// configuration is read from the signal's defaults and environment
    /// variables when building.
    pub fn with_batch_config(self, config: BatchConfig) -> Self {
        BatchProcessorBuilder {
            config: Some(config),
            ..self
        }
    }

    /// Set the sink receiving the processor's own metrics. Defaults to a
    /// [`NoopMetricsSink`].
    pub fn with_metrics_sink(self, metrics_sink: Arc<dyn MetricsSink>) -> Self {
        BatchProcessorBuilder {
            metrics_sink,
            ..self
        }
    }

    /// Set the naming scheme of the processor's own metrics. Defaults to
    /// [`InstrumentationVersion::Latest`].
    pub fn with_instrumentation_version(self, version: InstrumentationVersion) -> Self {
        BatchProcessorBuilder {
            instrumentation_version: version,
            ..self
        }
    }

    /// Build a batch processor and start its worker thread.
    ///
    /// Fails without starting a thread if the configuration is invalid.
    pub fn build(self) -> Result<BatchProcessor<R>, BuildError> {
        let config = match self.config {
            Some(config) => config,
            None => BatchConfig::for_signal(self.signal)?,
        };
        BatchProcessor::new(
            self.exporter,
            self.signal,
            config,
            self.metrics_sink,
            self.instrumentation_version,
        )
    }
}

fn deadline_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay).unwrap_or(now + FAR_FUTURE)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// The consumer side: owns the exporter, the queue receiver, the batch and
/// the schedule deadline.
struct Worker<R, E> {
    exporter: E,
    records: QueueReceiver<R>,
    control: Receiver<ControlMessage>,
    shared: Arc<Shared>,
    config: BatchConfig,
    batch: Vec<R>,
    next_export: Instant,
}

impl<R, E> Worker<R, E>
where
    R: Send + 'static,
    E: Exporter<R>,
{
    fn run(mut self) {
        let _suppress_guard = Context::enter_telemetry_suppressed_scope();
        otel_debug!(
            name: "BatchProcessor.ThreadStarted",
            signal = self.shared.signal.as_str(),
            interval_in_millisecs = self.config.scheduled_delay.as_millis(),
            max_export_batch_size = self.config.max_export_batch_size,
            max_queue_size = self.config.max_queue_size,
        );

        loop {
            if let Some(request) = self.shared.take_flush_request() {
                self.shared.set_state(WorkerState::Draining);
                otel_debug!(name: "BatchProcessor.ExportingDueToForceFlush");
                let result = self.export_all();
                self.next_export = deadline_after(self.config.scheduled_delay);
                self.shared.set_state(WorkerState::Running);
                request.complete(result);
            }

            if self.shared.is_shutdown_requested() {
                self.shutdown();
                break;
            }

            let room = self.config.max_export_batch_size - self.batch.len();
            self.records.drain_into(&mut self.batch, room);

            if self.batch.len() >= self.config.max_export_batch_size {
                otel_debug!(name: "BatchProcessor.ExportingDueToBatchSize");
                let _ = self.export_batch();
                self.next_export = deadline_after(self.config.scheduled_delay);
                continue;
            }

            let now = Instant::now();
            if now >= self.next_export {
                if !self.batch.is_empty() {
                    otel_debug!(name: "BatchProcessor.ExportingDueToTimer");
                    let _ = self.export_batch();
                }
                self.next_export = deadline_after(self.config.scheduled_delay);
            }

            if self.records.is_empty() {
                self.wait();
            }
        }

        otel_debug!(
            name: "BatchProcessor.ThreadStopped",
            signal = self.shared.signal.as_str()
        );
    }

    /// Suspends until the deadline, a wake from producers, or a control
    /// request.
    fn wait(&mut self) {
        let needed = if self.config.scheduled_delay.is_zero() {
            1
        } else {
            self.config.max_export_batch_size - self.batch.len()
        };
        self.shared.records_needed.store(needed, Ordering::SeqCst);

        // A producer may have enqueued before observing `needed`.
        if self.records.len() < needed {
            let timeout = self
                .next_export
                .saturating_duration_since(Instant::now())
                .max(MIN_POLL_INTERVAL);
            match self.control.recv_timeout(timeout) {
                Ok(ControlMessage::Wake) => {
                    // Reset the flag now the message has been processed.
                    self.shared.wake_pending.store(false, Ordering::Relaxed);
                }
                Ok(ControlMessage::Flush) | Ok(ControlMessage::Shutdown) => {}
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    otel_debug!(
                        name: "BatchProcessor.ControlChannelDisconnected",
                        signal = self.shared.signal.as_str()
                    );
                    self.shared.request_shutdown();
                }
            }
        }

        self.shared.records_needed.store(usize::MAX, Ordering::SeqCst);
    }

    /// Exports the current batch and every record queued right now, in
    /// chunks of at most `max_export_batch_size`. Fails if any export failed.
    fn export_all(&mut self) -> OTelSdkResult {
        let mut remaining = self.records.len();
        let mut result = Ok(());
        loop {
            let room = self.config.max_export_batch_size - self.batch.len();
            let taken = self
                .records
                .drain_into(&mut self.batch, room.min(remaining));
            remaining -= taken;

            if let Err(err) = self.export_batch() {
                if result.is_ok() {
                    result = Err(err);
                }
            }

            // `taken == 0` means records counted as queued are still in
            // flight from a producer; they belong to a later export.
            if remaining == 0 || taken == 0 {
                break;
            }
        }
        result
    }

    /// Hands the batch to the exporter and waits at most the export timeout.
    /// The batch is empty afterwards, whatever the outcome.
    fn export_batch(&mut self) -> OTelSdkResult {
        if self.batch.is_empty() {
            return Ok(());
        }
        let batch = mem::replace(
            &mut self.batch,
            Vec::with_capacity(self.config.max_export_batch_size),
        );
        let count = batch.len();

        let exporter = &self.exporter;
        let result = match panic::catch_unwind(AssertUnwindSafe(|| exporter.export(batch))) {
            Ok(pending) => match self.await_result(&pending) {
                Ok(()) => Ok(()),
                Err(OTelSdkError::Timeout(timeout)) => {
                    otel_warn!(
                        name: "BatchProcessor.ExportTimedOut",
                        signal = self.shared.signal.as_str(),
                        record_count = count,
                        timeout_in_millisecs = timeout.as_millis()
                    );
                    Err(OTelSdkError::Timeout(timeout))
                }
                Err(err) => {
                    otel_error!(
                        name: "BatchProcessor.ExportError",
                        signal = self.shared.signal.as_str(),
                        record_count = count,
                        error = format!("{}", err)
                    );
                    Err(err)
                }
            },
            Err(payload) => {
                let message = panic_message(payload);
                otel_error!(
                    name: "BatchProcessor.ExportPanicked",
                    signal = self.shared.signal.as_str(),
                    record_count = count,
                    error = message.clone()
                );
                Err(OTelSdkError::InternalFailure(format!(
                    "exporter panicked: {}",
                    message
                )))
            }
        };

        self.shared.instrumentation.record_export(count, &result);
        result
    }

    fn await_result(&self, pending: &AsyncResult) -> OTelSdkResult {
        if self.config.max_export_timeout.is_zero() {
            pending.wait()
        } else {
            pending.join(self.config.max_export_timeout)
        }
    }

    /// Calls `operation` on the exporter, turning a panic into a failed
    /// result.
    fn call_exporter<F>(&self, operation: &'static str, call: F) -> AsyncResult
    where
        F: FnOnce(&E) -> AsyncResult,
    {
        let exporter = &self.exporter;
        match panic::catch_unwind(AssertUnwindSafe(|| call(exporter))) {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload);
                otel_error!(
                    name: "BatchProcessor.ExporterPanicked",
                    signal = self.shared.signal.as_str(),
                    operation = operation,
                    error = message.clone()
                );
                AsyncResult::failure(OTelSdkError::InternalFailure(format!(
                    "exporter panicked during {}: {}",
                    operation, message
                )))
            }
        }
    }

    /// Closes the queue, then exports every record it accepted, including
    /// those producers were still handing over when it closed.
    fn export_remaining(&mut self) -> OTelSdkResult {
        self.records.close();
        let mut result = self.export_all();
        while !self.records.is_empty() {
            thread::yield_now();
            let next = self.export_all();
            if result.is_ok() {
                result = next;
            }
        }
        result
    }

    fn shutdown(&mut self) {
        self.shared.set_state(WorkerState::ShuttingDown);
        otel_debug!(name: "BatchProcessor.ExportingDueToShutdown");
        let drained = self.export_remaining();
        self.shared.close_flush_slot(&drained);

        let flush = self.call_exporter("flush", |exporter| exporter.flush());
        // Shut the exporter down only once its own buffers were flushed.
        let _ = self.await_result(&flush);
        let exporter_shutdown = self.call_exporter("shutdown", |exporter| exporter.shutdown());

        self.shared.set_state(WorkerState::Stopped);
        let (result, _) = self.shared.request_shutdown();
        AsyncResult::of_all([AsyncResult::from_outcome(drained), flush, exporter_shutdown])
            .when_complete(move |outcome| {
                result.complete(outcome.clone());
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BatchConfigBuilder;
    use crate::testing::{InMemoryExporter, InMemoryExporterBuilder, InMemoryMetricsSink};
    use opentelemetry::KeyValue;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Condvar;

    const HOUR: Duration = Duration::from_secs(3600);
    const WAIT: Duration = Duration::from_secs(5);

    fn config(queue: usize, batch: usize, delay: Duration) -> BatchConfig {
        BatchConfigBuilder::for_signal(Signal::Span)
            .with_max_queue_size(queue)
            .with_max_export_batch_size(batch)
            .with_scheduled_delay(delay)
            .build()
            .unwrap()
    }

    fn kept_exporter() -> InMemoryExporter<u32> {
        InMemoryExporterBuilder::new()
            .keep_records_on_shutdown()
            .build()
    }

    fn processor<E>(exporter: E, config: BatchConfig) -> BatchProcessor<u32>
    where
        E: Exporter<u32> + 'static,
    {
        BatchProcessor::builder(exporter, Signal::Span)
            .with_batch_config(config)
            .build()
            .unwrap()
    }

    fn wait_until(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + WAIT;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    /// Blocks inside `export` until released, so tests can hold the worker.
    #[derive(Debug, Default)]
    struct GatedExporter {
        started: AtomicUsize,
        released: Mutex<bool>,
        release: Condvar,
        exported: Mutex<Vec<u32>>,
    }

    impl GatedExporter {
        fn open(&self) {
            *self.released.lock().unwrap() = true;
            self.release.notify_all();
        }
    }

    impl Exporter<u32> for Arc<GatedExporter> {
        fn export(&self, batch: Vec<u32>) -> AsyncResult {
            self.started.fetch_add(1, Ordering::SeqCst);
            let released = self.released.lock().unwrap();
            drop(self.release.wait_while(released, |released| !*released).unwrap());
            self.exported.lock().unwrap().extend(batch);
            AsyncResult::success()
        }
    }

    /// Returns a result that never completes.
    #[derive(Debug, Default)]
    struct HangingExporter {
        calls: AtomicUsize,
    }

    impl Exporter<u32> for Arc<HangingExporter> {
        fn export(&self, _batch: Vec<u32>) -> AsyncResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            AsyncResult::new()
        }
    }

    #[derive(Debug)]
    struct FailingExporter;

    impl Exporter<u32> for FailingExporter {
        fn export(&self, _batch: Vec<u32>) -> AsyncResult {
            AsyncResult::failure(OTelSdkError::InternalFailure("backend unavailable".into()))
        }
    }

    #[derive(Debug)]
    struct PanickingExporter;

    impl Exporter<u32> for PanickingExporter {
        fn export(&self, _batch: Vec<u32>) -> AsyncResult {
            panic!("exporter exploded")
        }

        fn shutdown(&self) -> AsyncResult {
            panic!("shutdown exploded")
        }
    }

    #[test]
    fn test_build_batch_processor_builder() {
        let processor = temp_env::with_vars_unset(
            [
                "OTEL_BLRP_SCHEDULE_DELAY",
                "OTEL_BLRP_MAX_QUEUE_SIZE",
                "OTEL_BLRP_MAX_EXPORT_BATCH_SIZE",
                "OTEL_BLRP_EXPORT_TIMEOUT",
            ],
            || {
                BatchProcessor::<u32>::builder(InMemoryExporter::default(), Signal::Log)
                    .build()
                    .unwrap()
            },
        );

        assert_eq!(processor.signal(), Signal::Log);
        assert_eq!(processor.state(), WorkerState::Running);
        assert_eq!(processor.queue_len(), 0);
        assert_eq!(processor.config().max_queue_size(), 2048);
        assert!(processor.shutdown().wait().is_ok());
    }

    #[test]
    fn test_build_with_invalid_env_config_fails() {
        let result = temp_env::with_var("OTEL_BSP_MAX_QUEUE_SIZE", Some("0"), || {
            BatchProcessor::<u32>::builder(InMemoryExporter::default(), Signal::Span).build()
        });

        assert!(matches!(
            result,
            Err(BuildError::Config(crate::ConfigError::InvalidMaxQueueSize))
        ));
    }

    #[test]
    fn test_exports_when_batch_is_full() {
        let exporter = kept_exporter();
        let processor = processor(exporter.clone(), config(16, 4, HOUR));

        for i in 0..4 {
            processor.on_emit(i);
        }

        assert!(wait_until(|| exporter.exported_count() == 4));
        assert_eq!(exporter.get_batch_sizes().unwrap(), vec![4]);
        assert_eq!(exporter.get_exported_records().unwrap(), vec![0, 1, 2, 3]);

        // One record short of a batch: no export until the schedule delay.
        for i in 4..7 {
            processor.on_emit(i);
        }
        thread::sleep(Duration::from_millis(100));
        assert_eq!(exporter.get_batch_sizes().unwrap(), vec![4]);

        processor.on_emit(7);
        assert!(wait_until(|| exporter.exported_count() == 8));
        assert_eq!(exporter.get_batch_sizes().unwrap(), vec![4, 4]);
    }

    #[test]
    fn test_exports_when_schedule_delay_elapses() {
        let exporter = kept_exporter();
        let delay = Duration::from_millis(100);
        let processor = processor(exporter.clone(), config(16, 8, delay));

        let emitted = Instant::now();
        processor.on_emit(1);
        processor.on_emit(2);

        assert!(wait_until(|| exporter.exported_count() == 2));
        // Exported within one period after the delay, plus polling slack.
        assert!(emitted.elapsed() < delay * 2 + Duration::from_millis(20));
        assert_eq!(exporter.get_batch_sizes().unwrap(), vec![2]);
        assert_eq!(exporter.get_exported_records().unwrap(), vec![1, 2]);
        assert_eq!(processor.stats().exported, 2);
    }

    #[test]
    fn test_zero_schedule_delay_exports_promptly() {
        let exporter = kept_exporter();
        let processor = processor(exporter.clone(), config(16, 8, Duration::ZERO));

        processor.on_emit(7);

        assert!(wait_until(|| exporter.exported_count() == 1));
        assert!(processor.shutdown().wait().is_ok());
    }

    #[test]
    fn test_concurrent_flush_claims_install_a_single_request() {
        let slot = Arc::new(FlushSlot::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let slot = slot.clone();
                thread::spawn(move || slot.claim())
            })
            .collect();
        let claims: Vec<FlushClaim> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let installed: Vec<&AsyncResult> = claims
            .iter()
            .filter_map(|claim| match claim {
                FlushClaim::Installed(request) => Some(request),
                _ => None,
            })
            .collect();
        assert_eq!(installed.len(), 1);

        let request = slot.take().expect("a pending request");
        assert!(slot.take().is_none());
        request.succeed();
        for claim in &claims {
            match claim {
                FlushClaim::Installed(r) | FlushClaim::Joined(r) => assert!(r.is_success()),
                FlushClaim::Closed => panic!("slot was never closed"),
            }
        }

        // Once taken, the next claim starts a fresh request.
        assert!(matches!(slot.claim(), FlushClaim::Installed(_)));
    }

    #[test]
    fn test_closing_flush_slot_returns_pending_request_and_refuses_claims() {
        let slot = FlushSlot::new();
        let FlushClaim::Installed(request) = slot.claim() else {
            panic!("expected a new request");
        };
        let raced = slot.close().expect("pending request returned on close");
        raced.succeed();
        assert!(request.is_success());

        assert!(matches!(slot.claim(), FlushClaim::Closed));
        assert!(slot.take().is_none());
        assert!(slot.close().is_none());
    }

    #[test]
    fn test_force_flush_exports_everything_in_fifo_order() {
        let exporter = kept_exporter();
        let processor = processor(exporter.clone(), config(64, 4, HOUR));

        for i in 0..10 {
            processor.on_emit(i);
        }
        assert!(processor.force_flush().join(WAIT).is_ok());

        assert_eq!(
            exporter.get_exported_records().unwrap(),
            (0..10).collect::<Vec<_>>()
        );
        assert!(exporter
            .get_batch_sizes()
            .unwrap()
            .iter()
            .all(|size| *size <= 4));
        assert_eq!(processor.state(), WorkerState::Running);
    }

    #[test]
    fn test_concurrent_force_flush_callers_all_complete() {
        let exporter = kept_exporter();
        let processor = Arc::new(processor(exporter.clone(), config(1024, 16, HOUR)));

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let processor = processor.clone();
                thread::spawn(move || {
                    for i in 0..100 {
                        processor.on_emit(t * 100 + i);
                    }
                    processor.force_flush().join(WAIT)
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap().is_ok());
        }

        assert_eq!(exporter.exported_count(), 400);
        assert_eq!(processor.stats().exported, 400);
    }

    #[test]
    fn test_queue_overflow_drops_excess_records() {
        let exporter = Arc::new(GatedExporter::default());
        let processor = processor(exporter.clone(), config(4, 1, HOUR));

        // Hold the worker inside the first export.
        processor.on_emit(0);
        assert!(wait_until(|| exporter.started.load(Ordering::SeqCst) == 1));

        for i in 1..=10 {
            processor.on_emit(i);
        }
        assert_eq!(processor.queue_len(), 4);
        assert_eq!(processor.stats().dropped, 6);

        exporter.open();
        assert!(processor.force_flush().join(WAIT).is_ok());
        assert_eq!(*exporter.exported.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_export_timeout_is_reported_and_worker_moves_on() {
        let exporter = Arc::new(HangingExporter::default());
        let config = BatchConfigBuilder::for_signal(Signal::Span)
            .with_max_queue_size(64)
            .with_max_export_batch_size(8)
            .with_scheduled_delay(HOUR)
            .with_max_export_timeout(Duration::from_millis(50))
            .build()
            .unwrap();
        let processor = processor(exporter.clone(), config);

        processor.on_emit(1);
        let started = Instant::now();
        assert_eq!(
            processor.force_flush().join(WAIT),
            Err(OTelSdkError::Timeout(Duration::from_millis(50)))
        );
        assert!(started.elapsed() < WAIT);
        assert_eq!(processor.stats().failed, 1);

        processor.on_emit(2);
        assert!(processor.force_flush().join(WAIT).is_err());
        assert_eq!(exporter.calls.load(Ordering::SeqCst), 2);
        assert!(processor.shutdown().join(WAIT).is_ok());
    }

    #[test]
    fn test_failed_export_fails_the_flush() {
        let processor = processor(FailingExporter, config(16, 8, HOUR));

        processor.on_emit(1);
        processor.on_emit(2);

        assert_eq!(
            processor.force_flush().join(WAIT),
            Err(OTelSdkError::InternalFailure("backend unavailable".into()))
        );
        assert_eq!(processor.stats().failed, 2);
        assert!(processor.force_flush().join(WAIT).is_ok());
    }

    #[test]
    fn test_panicking_exporter_does_not_kill_the_worker() {
        let processor = processor(PanickingExporter, config(16, 8, HOUR));

        processor.on_emit(1);
        let result = processor.force_flush().join(WAIT);
        assert!(
            matches!(&result, Err(OTelSdkError::InternalFailure(message)) if message.contains("exporter exploded"))
        );
        assert_eq!(processor.state(), WorkerState::Running);

        processor.on_emit(2);
        assert!(processor.force_flush().join(WAIT).is_err());
        assert_eq!(processor.stats().failed, 2);

        let shutdown = processor.shutdown().join(WAIT);
        assert!(
            matches!(&shutdown, Err(OTelSdkError::InternalFailure(message)) if message.contains("shutdown exploded"))
        );
        assert_eq!(processor.state(), WorkerState::Stopped);
    }

    #[test]
    fn test_shutdown_drains_queue_and_is_idempotent() {
        let exporter = kept_exporter();
        let processor = processor(exporter.clone(), config(64, 4, HOUR));

        for i in 0..10 {
            processor.on_emit(i);
        }
        let first = processor.shutdown();
        assert!(first.join(WAIT).is_ok());
        assert!(processor.shutdown().join(WAIT).is_ok());

        assert_eq!(exporter.exported_count(), 10);
        assert_eq!(exporter.flush_count(), 1);
        assert_eq!(exporter.shutdown_count(), 1);
        assert_eq!(processor.state(), WorkerState::Stopped);
    }

    #[test]
    fn test_records_racing_shutdown_are_exported_or_counted_as_dropped() {
        for _ in 0..8 {
            let exporter = kept_exporter();
            let processor = Arc::new(processor(exporter.clone(), config(4_096, 64, HOUR)));
            let emitted = Arc::new(AtomicUsize::new(0));

            let producers: Vec<_> = (0..4)
                .map(|_| {
                    let processor = processor.clone();
                    let emitted = emitted.clone();
                    thread::spawn(move || {
                        for i in 0..2_000 {
                            processor.on_emit(i);
                            emitted.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                })
                .collect();
            thread::sleep(Duration::from_millis(1));
            let shutdown = processor.shutdown();
            for producer in producers {
                producer.join().unwrap();
            }
            assert!(shutdown.join(WAIT).is_ok());

            let stats = processor.stats();
            assert_eq!(stats.failed, 0);
            assert_eq!(exporter.exported_count() as u64, stats.exported);
            assert_eq!(
                stats.exported + stats.dropped,
                emitted.load(Ordering::SeqCst) as u64
            );
        }
    }

    #[test]
    fn test_emit_and_flush_after_shutdown() {
        let exporter = kept_exporter();
        let processor = processor(exporter.clone(), config(64, 4, HOUR));
        assert!(processor.shutdown().join(WAIT).is_ok());

        processor.on_emit(1);

        assert_eq!(processor.stats().dropped, 1);
        assert_eq!(exporter.exported_count(), 0);
        assert_eq!(
            processor.force_flush().join(WAIT),
            Err(OTelSdkError::AlreadyShutdown)
        );
    }

    #[test]
    fn test_drop_requests_shutdown() {
        let exporter = kept_exporter();
        let processor = processor(exporter.clone(), config(64, 16, HOUR));
        for i in 0..3 {
            processor.on_emit(i);
        }

        drop(processor);

        assert!(wait_until(|| exporter.shutdown_count() == 1));
        assert_eq!(exporter.get_exported_records().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_instrumentation_reports_through_sink() {
        let sink = Arc::new(InMemoryMetricsSink::default());
        let processor = BatchProcessor::builder(kept_exporter(), Signal::Span)
            .with_batch_config(config(8, 4, HOUR))
            .with_metrics_sink(sink.clone())
            .build()
            .unwrap();

        for i in 0..3 {
            processor.on_emit(i);
        }
        assert_eq!(
            sink.gauge_value("otel.sdk.processor.span.queue.capacity"),
            Some(8)
        );
        assert!(processor.force_flush().join(WAIT).is_ok());

        let attributes = sink
            .gauge_attributes("otel.sdk.processor.span.queue.size")
            .unwrap();
        assert_eq!(
            sink.counter_value("otel.sdk.processor.span.processed", &attributes),
            3
        );
        assert_eq!(
            sink.gauge_value("otel.sdk.processor.span.queue.size"),
            Some(0)
        );
    }

    #[test]
    fn test_legacy_instrumentation_counts_drops_after_shutdown() {
        let sink = Arc::new(InMemoryMetricsSink::default());
        let processor = BatchProcessor::builder(kept_exporter(), Signal::Log)
            .with_batch_config(config(8, 4, HOUR))
            .with_metrics_sink(sink.clone())
            .with_instrumentation_version(InstrumentationVersion::Legacy)
            .build()
            .unwrap();

        processor.on_emit(1);
        assert!(processor.shutdown().join(WAIT).is_ok());
        processor.on_emit(2);

        let processor_type = KeyValue::new("processorType", "BatchLogRecordProcessor");
        assert_eq!(
            sink.counter_value(
                "processedLogs",
                &[processor_type.clone(), KeyValue::new("dropped", false)]
            ),
            1
        );
        assert_eq!(
            sink.counter_value(
                "processedLogs",
                &[processor_type, KeyValue::new("dropped", true)]
            ),
            1
        );
    }

    #[test]
    fn test_worker_state_round_trips_through_u8() {
        for state in [
            WorkerState::Running,
            WorkerState::Draining,
            WorkerState::ShuttingDown,
            WorkerState::Stopped,
        ] {
            assert_eq!(WorkerState::from_u8(state.as_u8()), state);
        }
    }

    #[test]
    fn test_panic_message_extraction() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(42)), "unknown panic");
    }
}
