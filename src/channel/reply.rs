//! Awaitable replies for a single trigger.
//!
//! Replies produced while `emit` is still dispatching resolve the future with
//! everything gathered in that turn. Otherwise the first later reply resolves
//! it.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::{ChannelError, ChannelResult};
use crate::id::EntityId;
use crate::registration::Registration;

use super::registry::Replies;

pub(crate) struct ReplySlot {
    sender: Option<oneshot::Sender<Replies>>,
    latest: Replies,
    armed: bool,
}

impl ReplySlot {
    pub(crate) fn channel() -> (Arc<Mutex<Self>>, oneshot::Receiver<Replies>) {
        let (sender, receiver) = oneshot::channel();
        let slot = Self {
            sender: Some(sender),
            latest: Replies::new(),
            armed: false,
        };
        (Arc::new(Mutex::new(slot)), receiver)
    }

    /// Record the replies gathered so far; resolves once armed.
    pub(crate) fn record(&mut self, replies: &Replies) {
        self.latest.clone_from(replies);
        if self.armed {
            self.resolve();
        }
    }

    /// Called when the emitting call returns.
    pub(crate) fn arm(&mut self) {
        self.armed = true;
        if !self.latest.is_empty() {
            self.resolve();
        }
    }

    fn resolve(&mut self) {
        if let Some(sender) = self.sender.take() {
            // receiver gone means nobody awaits the replies any more
            let _ = sender.send(self.latest.clone());
        }
    }

    /// Drop the sender. Returns whether the future was still unresolved.
    fn close(&mut self) -> bool {
        self.sender.take().is_some()
    }
}

pub(crate) fn lock(slot: &Mutex<ReplySlot>) -> MutexGuard<'_, ReplySlot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Future returned by [`EventChannel::emit_async`](super::EventChannel::emit_async).
///
/// Resolves with the replies, or with [`ChannelError::Cancelled`] after
/// [`cancel`](Self::cancel). Removing the trigger by other means (an `off`
/// by name, a scope) leaves the future pending; wrap it in a timeout when
/// that can happen. Dropping the future leaves the trigger registered.
pub struct PendingReplies {
    trigger: Registration,
    slot: Arc<Mutex<ReplySlot>>,
    receiver: oneshot::Receiver<Replies>,
}

impl PendingReplies {
    pub(crate) fn new(
        trigger: Registration,
        slot: Arc<Mutex<ReplySlot>>,
        receiver: oneshot::Receiver<Replies>,
    ) -> Self {
        Self {
            trigger,
            slot,
            receiver,
        }
    }

    /// Id of the underlying trigger.
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.trigger.id()
    }

    /// Handle of the underlying trigger.
    #[must_use]
    pub fn trigger(&self) -> &Registration {
        &self.trigger
    }

    /// Remove the trigger and fail the future with [`ChannelError::Cancelled`].
    ///
    /// Returns false when replies were already delivered.
    pub fn cancel(&self) -> bool {
        let waiting = lock(&self.slot).close();
        self.trigger.off();
        waiting
    }
}

impl Future for PendingReplies {
    type Output = ChannelResult<Replies>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.map_err(|_| ChannelError::Cancelled))
    }
}

impl fmt::Debug for PendingReplies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingReplies")
            .field("trigger", &self.trigger)
            .finish_non_exhaustive()
    }
}
