//! # Deferred operation outcomes
//!
//! [`AsyncResult`] is the return type of every asynchronous operation in the
//! pipeline: exports, flushes and shutdowns. It starts out pending and is
//! completed exactly once, either successfully or with an [`OTelSdkError`].
//!
//! Waiters can:
//! - block with a timeout ([`AsyncResult::join`]),
//! - register a callback ([`AsyncResult::when_complete`]),
//! - `.await` it, since it implements [`Future`].
//!
//! Timing out a wait never cancels the operation behind the result.

use crate::error::{OTelSdkError, OTelSdkResult};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

type Callback = Box<dyn FnOnce(&OTelSdkResult) + Send>;

#[derive(Default)]
struct State {
    outcome: Option<OTelSdkResult>,
    callbacks: Vec<Callback>,
    wakers: Vec<Waker>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    completed: Condvar,
}

/// A single-resolution outcome shared by any number of waiters.
///
/// Cloning is cheap and every clone observes the same outcome.
///
/// ```
/// use opentelemetry_pipeline::AsyncResult;
/// use std::time::Duration;
///
/// let result = AsyncResult::new();
/// let completer = result.clone();
/// std::thread::spawn(move || {
///     completer.succeed();
/// });
/// assert!(result.join(Duration::from_secs(5)).is_ok());
/// ```
#[derive(Clone, Default)]
pub struct AsyncResult {
    inner: Arc<Inner>,
}

impl AsyncResult {
    /// Creates a pending result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a result that has already succeeded.
    pub fn success() -> Self {
        let result = Self::new();
        result.succeed();
        result
    }

    /// Creates a result that has already failed with `error`.
    pub fn failure(error: OTelSdkError) -> Self {
        let result = Self::new();
        result.fail(error);
        result
    }

    /// Creates an already completed result from `outcome`.
    pub fn from_outcome(outcome: OTelSdkResult) -> Self {
        let result = Self::new();
        result.complete(outcome);
        result
    }

    /// Completes the result successfully. Returns `false` if it was already
    /// complete, in which case nothing changes.
    pub fn succeed(&self) -> bool {
        self.complete(Ok(()))
    }

    /// Completes the result with `error`. Returns `false` if it was already
    /// complete, in which case nothing changes.
    pub fn fail(&self, error: OTelSdkError) -> bool {
        self.complete(Err(error))
    }

    /// Completes the result with `outcome` unless it is already complete.
    ///
    /// Blocked waiters are released, wakers are woken and registered
    /// callbacks run on the calling thread, outside of any internal lock.
    pub fn complete(&self, outcome: OTelSdkResult) -> bool {
        let (callbacks, wakers) = {
            let mut state = self.lock();
            if state.outcome.is_some() {
                return false;
            }
            state.outcome = Some(outcome.clone());
            (
                std::mem::take(&mut state.callbacks),
                std::mem::take(&mut state.wakers),
            )
        };

        self.inner.completed.notify_all();
        for waker in wakers {
            waker.wake();
        }
        for callback in callbacks {
            callback(&outcome);
        }
        true
    }

    /// Returns `true` once the result reached a terminal state.
    pub fn is_done(&self) -> bool {
        self.lock().outcome.is_some()
    }

    /// Returns `true` if the result completed successfully.
    pub fn is_success(&self) -> bool {
        matches!(self.lock().outcome, Some(Ok(())))
    }

    /// Returns the terminal outcome, or `None` while pending.
    pub fn outcome(&self) -> Option<OTelSdkResult> {
        self.lock().outcome.clone()
    }

    /// Registers `callback` to run once the result completes.
    ///
    /// If the result is already complete the callback runs immediately on the
    /// calling thread; otherwise it runs on the thread that completes it.
    pub fn when_complete<F>(&self, callback: F)
    where
        F: FnOnce(&OTelSdkResult) + Send + 'static,
    {
        let mut state = self.lock();
        if let Some(outcome) = state.outcome.clone() {
            drop(state);
            callback(&outcome);
            return;
        }
        state.callbacks.push(Box::new(callback));
    }

    /// Blocks the calling thread for at most `timeout` waiting for the
    /// result.
    ///
    /// Returns [`OTelSdkError::Timeout`] if the result is still pending when
    /// the timeout elapses. A zero timeout only inspects the current state.
    pub fn join(&self, timeout: Duration) -> OTelSdkResult {
        let state = self.lock();
        let (state, _) = self
            .inner
            .completed
            .wait_timeout_while(state, timeout, |state| state.outcome.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        state
            .outcome
            .clone()
            .unwrap_or(Err(OTelSdkError::Timeout(timeout)))
    }

    /// Blocks the calling thread until the result completes.
    pub fn wait(&self) -> OTelSdkResult {
        let state = self.lock();
        let state = self
            .inner
            .completed
            .wait_while(state, |state| state.outcome.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        match &state.outcome {
            Some(outcome) => outcome.clone(),
            None => Err(OTelSdkError::InternalFailure(
                "result woke without an outcome".into(),
            )),
        }
    }

    /// Combines `results` into one result that succeeds iff all of them
    /// succeed.
    ///
    /// The combined result completes once every input completed. On failure
    /// it carries the error of the first input that failed. An empty input
    /// yields an already succeeded result.
    pub fn of_all<I>(results: I) -> AsyncResult
    where
        I: IntoIterator<Item = AsyncResult>,
    {
        let results: Vec<AsyncResult> = results.into_iter().collect();
        if results.is_empty() {
            return AsyncResult::success();
        }

        let combined = AsyncResult::new();
        let remaining = Arc::new(AtomicUsize::new(results.len()));
        let first_error: Arc<Mutex<Option<OTelSdkError>>> = Arc::new(Mutex::new(None));

        for result in results {
            let combined = combined.clone();
            let remaining = remaining.clone();
            let first_error = first_error.clone();
            result.when_complete(move |outcome| {
                if let Err(err) = outcome {
                    let mut first_error =
                        first_error.lock().unwrap_or_else(PoisonError::into_inner);
                    if first_error.is_none() {
                        *first_error = Some(err.clone());
                    }
                }
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    let error = first_error
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .take();
                    match error {
                        Some(err) => combined.fail(err),
                        None => combined.succeed(),
                    };
                }
            });
        }

        combined
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // Callbacks never run under the lock, so a poisoned state is still consistent.
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Future for AsyncResult {
    type Output = OTelSdkResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.lock();
        if let Some(outcome) = state.outcome.clone() {
            return Poll::Ready(outcome);
        }
        if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            state.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl fmt::Debug for AsyncResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncResult")
            .field("outcome", &self.outcome())
            .finish()
    }
}
