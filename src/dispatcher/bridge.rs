//! Awaitable bridge between the dispatcher and handlers.
//!
//! A handler invocation is either complete on return or pending on a
//! coroutine. [`Invocation::complete`] gives the dispatcher one way to drive
//! both: it returns immediately for the former and parks the calling
//! coroutine on a `may` channel for the latter until the result arrives or
//! the request's [`CancelToken`] fires.
//!
//! Cancellation is only observed while parked. An immediate handler always
//! runs to completion.

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use may::coroutine::{self, JoinHandle};
use may::sync::mpsc;
use tracing::{debug, error, warn};

use super::handler::{HandlerError, HandlerResult};

/// Why a pending invocation was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The client went away
    Disconnect,
    /// The handler ran past its deadline
    Timeout,
    /// The server is shutting down
    Shutdown,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CancelReason::Disconnect => "disconnect",
            CancelReason::Timeout => "timeout",
            CancelReason::Shutdown => "shutdown",
        })
    }
}

enum Signal {
    Done(HandlerResult),
    Cancelled(CancelReason),
}

struct CancelState {
    reason: Option<CancelReason>,
    waiters: Vec<mpsc::Sender<Signal>>,
}

/// Per-request cancellation flag shared between the transport and the
/// dispatcher. Cloning shares the same flag.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Mutex<CancelState>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("reason", &self.reason())
            .finish()
    }
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(CancelState {
                reason: None,
                waiters: Vec::new(),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, CancelState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cancel and wake every parked waiter. Only the first reason sticks.
    pub fn cancel(&self, reason: CancelReason) {
        let waiters = {
            let mut state = self.state();
            if state.reason.is_some() {
                return;
            }
            state.reason = Some(reason);
            std::mem::take(&mut state.waiters)
        };
        debug!(reason = %reason, waiters = waiters.len(), "Cancel token fired");
        for tx in waiters {
            // The waiter may already have completed and dropped its receiver.
            let _ = tx.send(Signal::Cancelled(reason));
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state().reason.is_some()
    }

    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        self.state().reason
    }

    /// Register a waiter. Returns the reason instead when already cancelled.
    fn subscribe(&self, tx: mpsc::Sender<Signal>) -> Result<(), CancelReason> {
        let mut state = self.state();
        match state.reason {
            Some(reason) => Err(reason),
            None => {
                state.waiters.push(tx);
                Ok(())
            }
        }
    }

    /// Cancel with [`CancelReason::Timeout`] after `timeout`, unless the
    /// returned [`Watchdog`] is dropped first.
    #[must_use]
    pub fn cancel_after(&self, timeout: Duration) -> Watchdog {
        let token = self.clone();
        // SAFETY: may::coroutine::Builder::spawn() is marked unsafe by the may runtime.
        // The closure owns everything it touches and never panics by itself.
        let spawned = unsafe {
            coroutine::Builder::new()
                .name("view-watchdog".to_string())
                .spawn(move || {
                    coroutine::sleep(timeout);
                    token.cancel(CancelReason::Timeout);
                })
        };
        match spawned {
            Ok(handle) => Watchdog {
                handle: Some(handle),
            },
            Err(e) => {
                error!(error = %e, timeout_ms = timeout.as_millis() as u64, "Failed to spawn watchdog coroutine");
                Watchdog { handle: None }
            }
        }
    }
}

/// Timeout guard returned by [`CancelToken::cancel_after`]. Disarmed on drop.
pub struct Watchdog {
    handle: Option<JoinHandle<()>>,
}

impl Watchdog {
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_done())
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if !handle.is_done() {
                // SAFETY: cancel() is marked unsafe by the may runtime. The
                // handle is valid and the coroutine only sleeps and cancels.
                unsafe { handle.coroutine().cancel() };
            }
        }
    }
}

/// Result of driving an invocation to completion.
#[derive(Debug)]
pub enum Completion {
    Done(HandlerResult),
    Cancelled(CancelReason),
}

/// A handler computation running on its own coroutine.
pub struct PendingCall {
    rx: mpsc::Receiver<Signal>,
    tx: mpsc::Sender<Signal>,
    handle: JoinHandle<()>,
}

impl fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCall")
            .field("done", &self.handle.is_done())
            .finish_non_exhaustive()
    }
}

impl PendingCall {
    /// Run `f` on a new coroutine with the runtime's configured stack size.
    ///
    /// # Errors
    ///
    /// The spawn error when the coroutine cannot be created.
    pub fn spawn<F>(f: F) -> std::io::Result<Self>
    where
        F: FnOnce() -> HandlerResult + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let result_tx = tx.clone();
        // SAFETY: may::coroutine::Builder::spawn() is marked unsafe by the may runtime.
        // The closure is Send + 'static and handler panics are caught inside it.
        let handle = unsafe {
            coroutine::Builder::new()
                .stack_size(may::config().get_stack_size())
                .spawn(move || {
                    let result = catch_unwind(AssertUnwindSafe(f))
                        .unwrap_or_else(|panic| Err(HandlerError::Panicked(panic_message(&*panic))));
                    // The receiver is gone when the call was cancelled.
                    let _ = result_tx.send(Signal::Done(result));
                })
        }?;
        Ok(Self { rx, tx, handle })
    }

    /// Park until the result arrives or `cancel` fires.
    pub fn wait(self, cancel: &CancelToken) -> Completion {
        if let Err(reason) = cancel.subscribe(self.tx.clone()) {
            self.abort(reason);
            return Completion::Cancelled(reason);
        }

        match self.rx.recv() {
            Ok(Signal::Done(result)) => Completion::Done(result),
            Ok(Signal::Cancelled(reason)) => {
                self.abort(reason);
                Completion::Cancelled(reason)
            }
            Err(_) => Completion::Done(Err(HandlerError::Panicked(
                "handler coroutine exited without a result".to_string(),
            ))),
        }
    }

    fn abort(&self, reason: CancelReason) {
        if self.handle.is_done() {
            return;
        }
        warn!(reason = %reason, "Cancelling pending handler coroutine");
        // SAFETY: cancel() is marked unsafe by the may runtime. The handle is
        // valid; the coroutine unwinds at its next suspension point and its
        // result is discarded.
        unsafe { self.handle.coroutine().cancel() };
    }
}

/// What a handler hands back to the dispatcher.
#[derive(Debug)]
pub enum Invocation {
    Immediate(HandlerResult),
    Pending(PendingCall),
}

impl Invocation {
    /// Start `f` on a coroutine. A spawn failure is reported as an immediate
    /// error so the request still gets a response.
    pub fn suspend<F>(f: F) -> Self
    where
        F: FnOnce() -> HandlerResult + Send + 'static,
    {
        match PendingCall::spawn(f) {
            Ok(call) => Invocation::Pending(call),
            Err(e) => {
                error!(error = %e, "Failed to spawn handler coroutine - CRITICAL");
                Invocation::Immediate(Err(HandlerError::other(anyhow::Error::new(e))))
            }
        }
    }

    /// Drive the invocation to its result.
    pub fn complete(self, cancel: &CancelToken) -> Completion {
        match self {
            Invocation::Immediate(result) => Completion::Done(result),
            Invocation::Pending(call) => call.wait(cancel),
        }
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Invocation::Pending(_))
    }
}

/// Best-effort text of a panic payload.
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
