//! Single-resolution result channels.
//!
//! A [`Waiter`] is the producing half held by the session until the matching
//! response arrives; [`Pending`] is the future handed to the caller. Exactly one
//! of `resolve` / `fail` takes effect, later calls are ignored. Dropping an
//! unsettled waiter fails its future with [`ClientError::ConnectionClosed`] so
//! no caller can hang on a waiter the session forgot about.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::utils::ClientError;

pub type Outcome<T> = Result<T, ClientError>;

#[derive(Debug)]
pub struct Waiter<T> {
    tx: Option<oneshot::Sender<Outcome<T>>>,
}

impl<T> Waiter<T> {
    pub fn channel() -> (Waiter<T>, Pending<T>) {
        let (tx, rx) = oneshot::channel();
        (
            Waiter { tx: Some(tx) },
            Pending {
                state: PendingState::Waiting(rx),
            },
        )
    }

    /// Returns `false` when the waiter had already been settled.
    pub fn resolve(&mut self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Returns `false` when the waiter had already been settled.
    pub fn fail(&mut self, error: ClientError) -> bool {
        self.settle(Err(error))
    }

    pub fn is_settled(&self) -> bool {
        self.tx.is_none()
    }

    fn settle(&mut self, outcome: Outcome<T>) -> bool {
        match self.tx.take() {
            Some(tx) => {
                // The caller may have dropped its future; nothing to report then.
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }
}

/// Future side of a [`Waiter`].
#[derive(Debug)]
pub struct Pending<T> {
    state: PendingState<T>,
}

#[derive(Debug)]
enum PendingState<T> {
    Waiting(oneshot::Receiver<Outcome<T>>),
    Ready(Option<Outcome<T>>),
}

impl<T> Pending<T> {
    /// A future that is already settled.
    pub fn ready(outcome: Outcome<T>) -> Self {
        Pending {
            state: PendingState::Ready(Some(outcome)),
        }
    }

    /// Non-blocking peek used by synchronous callers and tests.
    ///
    /// Returns `None` while the outcome is unknown. Once an outcome has been
    /// returned it is consumed.
    pub fn try_take(&mut self) -> Option<Outcome<T>> {
        match &mut self.state {
            PendingState::Ready(outcome) => outcome.take(),
            PendingState::Waiting(rx) => match rx.try_recv() {
                Ok(outcome) => {
                    self.state = PendingState::Ready(None);
                    Some(outcome)
                }
                Err(oneshot::error::TryRecvError::Empty) => None,
                Err(oneshot::error::TryRecvError::Closed) => {
                    self.state = PendingState::Ready(None);
                    Some(Err(ClientError::ConnectionClosed))
                }
            },
        }
    }
}

// The outcome is never pinned in place, only moved out.
impl<T> Unpin for Pending<T> {}

impl<T> Future for Pending<T> {
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            PendingState::Ready(outcome) => match outcome.take() {
                Some(outcome) => Poll::Ready(outcome),
                None => Poll::Ready(Err(ClientError::Protocol(
                    "future polled after completion".to_string(),
                ))),
            },
            PendingState::Waiting(rx) => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(outcome)) => {
                    this.state = PendingState::Ready(None);
                    Poll::Ready(outcome)
                }
                Poll::Ready(Err(_)) => {
                    this.state = PendingState::Ready(None);
                    Poll::Ready(Err(ClientError::ConnectionClosed))
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}
