//! Structured concurrency for flow operators.
//!
//! A [`Scope`] owns every task forked inside it: when the scope shuts down,
//! its forks are cancelled and drained, so no task outlives the region that
//! created it. [`supervised`] regions additionally propagate the first child
//! failure to the caller after cancelling the siblings; unsupervised scopes
//! leave error routing to the operator (typically through a channel's
//! terminal state).

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

use crate::error::FlowError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Supervised,
    Unsupervised,
}

struct ScopeInner {
    mode: Mode,
    cancel: CancellationToken,
    first_error: Mutex<Option<FlowError>>,
    /// Tasks the scope waits for before finishing cleanly.
    user: TaskTracker,
    /// Tasks that are cancelled and drained at shutdown.
    daemon: TaskTracker,
}

impl ScopeInner {
    fn note_failure(&self, error: FlowError) {
        let mut slot = self
            .first_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(error);
            drop(slot);
            if self.mode == Mode::Supervised {
                // First failure cancels the siblings.
                self.cancel.cancel();
            }
        } else {
            debug!(%error, "suppressing failure after the first");
        }
    }

    fn take_first_error(&self) -> Option<FlowError> {
        self.first_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        // Safety net for scopes dropped without an explicit shutdown (e.g.
        // a cancelled operator): forks race this token, so they exit.
        self.cancel.cancel();
    }
}

/// Handle to a structured-concurrency region. Cloning shares the region.
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Clone for Scope {
    fn clone(&self) -> Self {
        Scope {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Scope {
    fn new(mode: Mode) -> Self {
        Scope {
            inner: Arc::new(ScopeInner {
                mode,
                cancel: CancellationToken::new(),
                first_error: Mutex::new(None),
                user: TaskTracker::new(),
                daemon: TaskTracker::new(),
            }),
        }
    }

    /// Opens a standalone unsupervised scope. Child failures are recorded but
    /// not propagated; the caller routes errors explicitly and finishes with
    /// [`Scope::shutdown`].
    pub fn unsupervised() -> Self {
        Scope::new(Mode::Unsupervised)
    }

    fn spawn<R>(
        &self,
        user: bool,
        task: impl Future<Output = Result<R, FlowError>> + Send + 'static,
    ) -> Fork<R>
    where
        R: Send + 'static,
    {
        let token = self.inner.cancel.child_token();
        let guard = token.clone();
        let inner = Arc::clone(&self.inner);
        let wrapped = async move {
            let result = tokio::select! {
                _ = guard.cancelled() => Err(FlowError::Cancelled),
                r = AssertUnwindSafe(task).catch_unwind() => match r {
                    Ok(r) => r,
                    Err(payload) => Err(FlowError::Panicked(panic_message(payload.as_ref()))),
                },
            };
            if let Err(e) = &result {
                if !matches!(e, FlowError::Cancelled) {
                    inner.note_failure(e.clone());
                }
            }
            result
        };
        let handle = if user {
            self.inner.user.spawn(wrapped)
        } else {
            self.inner.daemon.spawn(wrapped)
        };
        Fork {
            handle,
            cancel: token,
        }
    }

    /// Forks a child task. The scope cancels and drains it at shutdown.
    pub fn fork<R>(
        &self,
        task: impl Future<Output = Result<R, FlowError>> + Send + 'static,
    ) -> Fork<R>
    where
        R: Send + 'static,
    {
        self.spawn(false, task)
    }

    /// Forks a child task the scope waits for: a [`supervised`] region does
    /// not finish until every user fork has completed.
    pub fn fork_user(
        &self,
        task: impl Future<Output = Result<(), FlowError>> + Send + 'static,
    ) -> Fork<()> {
        self.spawn(true, task)
    }

    /// Forks a child task meant to be interrupted with [`Fork::cancel_now`].
    pub fn fork_cancellable<R>(
        &self,
        task: impl Future<Output = Result<R, FlowError>> + Send + 'static,
    ) -> Fork<R>
    where
        R: Send + 'static,
    {
        self.spawn(false, task)
    }

    /// Cancels every fork and waits until they have all terminated.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.user.close();
        self.inner.daemon.close();
        self.inner.user.wait().await;
        self.inner.daemon.wait().await;
    }

    async fn wait_user(&self) {
        self.inner.user.close();
        self.inner.user.wait().await;
    }
}

/// Runs `body` in a supervised scope: the scope waits for all user forks, and
/// the first failure (from the body or any fork) cancels the siblings and is
/// re-raised to the caller after everything has terminated.
pub async fn supervised<R, F, Fut>(body: F) -> Result<R, FlowError>
where
    F: FnOnce(Scope) -> Fut,
    Fut: Future<Output = Result<R, FlowError>>,
{
    let scope = Scope::new(Mode::Supervised);
    let body_result = {
        let cancelled = scope.inner.cancel.cancelled();
        tokio::pin!(cancelled);
        tokio::select! {
            r = body(scope.clone()) => r,
            // A fork failed and cancelled the scope while the body was still
            // running; the real error is picked up below.
            _ = &mut cancelled => Err(FlowError::Cancelled),
        }
    };
    if let Err(e) = &body_result {
        if !matches!(e, FlowError::Cancelled) {
            scope.inner.note_failure(e.clone());
        }
    }
    scope.wait_user().await;
    scope.shutdown().await;
    match scope.inner.take_first_error() {
        Some(e) => Err(e),
        None => body_result,
    }
}

/// Runs `body` in an unsupervised scope: fork failures are not propagated
/// (operators route them through channels instead). User forks are still
/// awaited before the call returns; daemon forks are cancelled and drained.
pub async fn unsupervised<R, F, Fut>(body: F) -> Result<R, FlowError>
where
    F: FnOnce(Scope) -> Fut,
    Fut: Future<Output = Result<R, FlowError>>,
{
    let scope = Scope::new(Mode::Unsupervised);
    let result = body(scope.clone()).await;
    scope.wait_user().await;
    scope.shutdown().await;
    result
}

/// Handle to a running fork.
pub struct Fork<R> {
    handle: JoinHandle<Result<R, FlowError>>,
    cancel: CancellationToken,
}

impl<R> Fork<R> {
    /// Awaits the fork and re-raises its error, if any. A fork cancelled out
    /// from under the caller joins as [`FlowError::Cancelled`].
    pub async fn join(self) -> Result<R, FlowError> {
        match self.handle.await {
            Ok(result) => result,
            Err(join_error) if join_error.is_cancelled() => Err(FlowError::Cancelled),
            Err(join_error) => Err(FlowError::Panicked(join_error.to_string())),
        }
    }

    /// Interrupts the fork at its next suspension point, best-effort.
    pub fn cancel_now(&self) {
        self.cancel.cancel();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "opaque panic payload".to_string()
    }
}
