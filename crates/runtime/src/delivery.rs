//! Mailbox envelopes and completion handles.
//!
//! Every delivery carries a completion token. The token travels with the
//! message through any filter stations and is fired by the final receiver
//! once its handler has returned. If the message is dropped on the way (a
//! filter rejects it, the receiver stops) the token is dropped with it.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use halyard_core::Message;

pub(crate) type CompletionToken = oneshot::Sender<()>;

/// A message queued in an actor's mailbox.
#[derive(Debug)]
pub(crate) struct Envelope {
    pub msg: Message,
    pub done: CompletionToken,
}

/// How a delivery ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The receiver ran its handler for the message
    Handled,
    /// The message never reached a handler
    Dropped,
}

/// Resolves once the receiving actor has handled (or dropped) a message.
#[derive(Debug)]
#[must_use = "a delivery handle does nothing unless awaited; drop it to fire and forget"]
pub struct DeliveryHandle {
    rx: oneshot::Receiver<()>,
}

impl DeliveryHandle {
    pub(crate) fn pair() -> (CompletionToken, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }
}

impl Future for DeliveryHandle {
    type Output = DeliveryOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|done| match done {
            Ok(()) => DeliveryOutcome::Handled,
            Err(_) => DeliveryOutcome::Dropped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fired_token_resolves_handled() {
        let (token, handle) = DeliveryHandle::pair();
        token.send(()).unwrap();
        assert_eq!(handle.await, DeliveryOutcome::Handled);
    }

    #[tokio::test]
    async fn dropped_token_resolves_dropped() {
        let (token, handle) = DeliveryHandle::pair();
        let env = Envelope {
            msg: Message::new("lost"),
            done: token,
        };
        drop(env);
        assert_eq!(handle.await, DeliveryOutcome::Dropped);
    }
}
