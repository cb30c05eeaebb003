//! Completions
//!
//! Every submitted command gets a single-assignment slot: the actor holds
//! the [`CompletionHandle`], the caller awaits the matching [`Completion`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::{DictError, Result};

use super::actor::Shared;

/// Outcome of a completed command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResult<K, V> {
    /// Whether the key was found (always true for writes and control commands)
    pub found: bool,
    pub key: Option<K>,
    pub value: Option<V>,
}

impl<K, V> ReadResult<K, V> {
    /// A hit carrying the key and, for pair results, its value
    pub fn hit(key: K, value: Option<V>) -> Self {
        Self {
            found: true,
            key: Some(key),
            value,
        }
    }

    /// The key was absent (or an enumeration is exhausted)
    pub fn missing() -> Self {
        Self {
            found: false,
            key: None,
            value: None,
        }
    }

    /// A command that carries no data completed
    pub fn done() -> Self {
        Self {
            found: true,
            key: None,
            value: None,
        }
    }
}

/// Actor side of a completion; set at most once
pub(crate) struct CompletionHandle<K, V> {
    sender: Option<oneshot::Sender<Result<ReadResult<K, V>>>>,
}

impl<K, V> CompletionHandle<K, V> {
    pub(crate) fn new() -> (Self, oneshot::Receiver<Result<ReadResult<K, V>>>) {
        let (sender, receiver) = oneshot::channel();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    /// Resolve the completion. Later calls are ignored.
    pub(crate) fn complete(&mut self, result: Result<ReadResult<K, V>>) {
        match self.sender.take() {
            // The caller may have stopped waiting; that is not an error
            Some(sender) => {
                let _ = sender.send(result);
            }
            None => tracing::trace!("Ignoring second completion of a command"),
        }
    }

    #[cfg(test)]
    pub(crate) fn is_completed(&self) -> bool {
        self.sender.is_none()
    }
}

enum State<K, V> {
    Ready(Option<Result<ReadResult<K, V>>>),
    Waiting {
        receiver: oneshot::Receiver<Result<ReadResult<K, V>>>,
        shared: Arc<Shared>,
    },
}

/// Caller side of a completion
///
/// The command is already queued when this value exists; awaiting it only
/// observes the outcome. Dropping it does not retract the command.
#[must_use = "the command runs regardless; await the completion to observe its outcome"]
pub struct Completion<K, V> {
    state: State<K, V>,
}

impl<K, V> Completion<K, V> {
    pub(crate) fn waiting(
        receiver: oneshot::Receiver<Result<ReadResult<K, V>>>,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            state: State::Waiting { receiver, shared },
        }
    }

    /// A completion that failed before reaching the actor
    pub(crate) fn failed(err: DictError) -> Self {
        Self {
            state: State::Ready(Some(Err(err))),
        }
    }

    pub(crate) fn ready(result: ReadResult<K, V>) -> Self {
        Self {
            state: State::Ready(Some(Ok(result))),
        }
    }
}

// No field is ever pinned structurally
impl<K, V> Unpin for Completion<K, V> {}

impl<K, V> Future for Completion<K, V> {
    type Output = Result<ReadResult<K, V>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            State::Ready(slot) => Poll::Ready(slot.take().unwrap_or_else(|| {
                Err(DictError::ProtocolViolation(
                    "completion polled after it resolved".to_string(),
                ))
            })),
            State::Waiting { receiver, shared } => match Pin::new(receiver).poll(cx) {
                Poll::Ready(Ok(result)) => Poll::Ready(result),
                // The actor dropped the handle without completing it
                Poll::Ready(Err(_)) => Poll::Ready(Err(shared.terminal_error())),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}
