//! Cancelable result handles.
//!
//! # Design
//! A `CancelableRequest` is an ordinary awaitable over the spawned transport
//! task plus one extra operation: `cancel()`. The terminal state is one-way —
//! a result that settled stays settled, and a result cancelled while pending
//! settles as `Cancelled` even if the transport produces an outcome in the
//! same instant. Cancellation is cooperative down to the wire: tripping the
//! token drops the in-flight transport future, which aborts the underlying
//! connection rather than letting it run to completion unobserved.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::ApiError;

/// Clonable cancel-only view of a [`CancelableRequest`], for racing the
/// request against a timer or cancelling from another task.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// An asynchronous result that its owner may abort before it settles.
pub struct CancelableRequest<T> {
    token: CancellationToken,
    task: JoinHandle<Result<T, ApiError>>,
}

impl<T: Send + 'static> CancelableRequest<T> {
    /// Run `work` on the current runtime, racing it against the token.
    /// The `biased` select checks cancellation first, so a cancel that lands
    /// together with the transport outcome still wins; the guard after the
    /// work branch discards an outcome delivered while a cancel from another
    /// thread was in flight.
    pub(crate) fn spawn<F>(work: F) -> Self
    where
        F: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let token = CancellationToken::new();
        let guard = token.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = guard.cancelled() => Err(ApiError::Cancelled),
                outcome = work => {
                    if guard.is_cancelled() {
                        Err(ApiError::Cancelled)
                    } else {
                        outcome
                    }
                }
            }
        });
        Self { token, task }
    }
}

impl<T> CancelableRequest<T> {
    /// Abort the request. Idempotent; a no-op once the result has settled.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// A clonable handle that can cancel this request from elsewhere.
    pub fn handle(&self) -> CancelHandle {
        CancelHandle {
            token: self.token.clone(),
        }
    }
}

impl<T> Future for CancelableRequest<T> {
    type Output = Result<T, ApiError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.task).poll(cx).map(|joined| match joined {
            Ok(outcome) => outcome,
            Err(join) if join.is_cancelled() => Err(ApiError::Cancelled),
            Err(join) => Err(ApiError::Transport(format!("request task failed: {join}"))),
        })
    }
}
