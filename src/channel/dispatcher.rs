//! Rendezvous dispatch.
//!
//! A matched (listener, trigger) pair runs through: `trigger` hook, callback
//! invocation, optional suspension on the listener's future, liveness
//! re-check, reply recording with the `reply` hook and `on_reply`, then the
//! `once` releases. The future of a deferred listener is the only suspension
//! point; everything else runs inline with the call that produced the match.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{debug, error, warn};

use crate::error::{BoxError, ChannelError};
use crate::hooks::{HookEvent, HookKind};
use crate::id::EntityId;

use super::matcher::{OffKind, Target};
use super::registry::{ListenerCallback, ListenerEntry, Releasing, TriggerEntry};
use super::Inner;

/// Continuation of a deferred listener and the runtime that will drive it.
pub(crate) struct ReplyTask {
    runtime: Handle,
    future: BoxFuture<'static, ()>,
}

/// Outcome of handing one pair to [`Inner::rendezvous`].
pub(crate) enum Dispatch {
    /// Either side was no longer live; nothing ran.
    Skipped,
    /// The listener ran and its reply (if any) has been processed.
    Completed,
    /// The listener ran and its reply settles later.
    Deferred(ReplyTask),
}

/// How an entity leaves the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Removal {
    /// Explicit `off`: in-flight replies to a trigger are abandoned.
    Cancel,
    /// Unwaited trigger purged after dispatch: no longer matchable, replies still flow.
    Retire,
}

enum ListenerFailure {
    Error(BoxError),
    Panicked(String),
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

type Outcome = Result<Result<Value, BoxError>, Box<dyn Any + Send>>;

fn settle(outcome: Outcome) -> Result<Value, ListenerFailure> {
    match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(ListenerFailure::Error(e)),
        Err(panic) => Err(ListenerFailure::Panicked(panic_message(panic.as_ref()))),
    }
}

impl Inner {
    /// Deliver a lifecycle notification to every accepting hook.
    ///
    /// The event is only built when hooks exist.
    pub(crate) fn notify(self: &Arc<Self>, build: impl FnOnce() -> HookEvent) {
        if !self.state().has_hooks() {
            return;
        }
        let event = build();
        let hooks = self.state().hooks_for(&event);
        for hook in hooks {
            if !self.state().claim_hook(&hook) {
                continue;
            }
            let reg = self.registration(hook.id);
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| (hook.callback)(&event, &reg)));
            if let Err(panic) = outcome {
                error!(
                    hook = %hook.id,
                    kind = %event.kind,
                    panic = %panic_message(panic.as_ref()),
                    "Hook panicked"
                );
            }
        }
    }

    /// Remove an entity, firing `off` hooks while it is still registered.
    ///
    /// Returns false for unknown ids and entities already being released.
    pub(crate) fn release(self: &Arc<Self>, id: EntityId, removal: Removal) -> bool {
        let Some(releasing) = self.state().begin_release(id) else {
            return false;
        };
        match releasing {
            Releasing::Hook => {
                debug!(hook = %id, "Removed hook");
                return true;
            }
            Releasing::Listener(listener) => {
                self.notify(|| HookEvent::listener(HookKind::Off, listener.snapshot()));
                debug!(event = %listener.event, listener = %id, "Removed listener");
            }
            Releasing::Trigger(trigger) => {
                self.notify(|| HookEvent::trigger(HookKind::Off, trigger.snapshot()));
                if removal == Removal::Cancel {
                    trigger.cancel();
                }
                debug!(event = %trigger.event, trigger = %id, ?removal, "Removed trigger");
            }
        }
        self.state().finish_release(id);
        true
    }

    /// Release everything `target` covers. Returns the removed ids.
    pub(crate) fn off_matching(self: &Arc<Self>, target: &Target, kind: OffKind) -> Vec<EntityId> {
        let ids = self.state().matching_ids(target, kind);
        ids.into_iter()
            .filter(|id| self.release(*id, Removal::Cancel))
            .collect()
    }

    /// Run one matched pair.
    ///
    /// A deferred listener is skipped when no tokio runtime is available to
    /// await its reply; the trigger stays pending for a later dispatch.
    pub(crate) fn rendezvous(
        self: &Arc<Self>,
        listener: &Arc<ListenerEntry>,
        trigger: &Arc<TriggerEntry>,
    ) -> Dispatch {
        if !self.state().is_listener_dispatchable(listener.id) || trigger.is_cancelled() {
            return Dispatch::Skipped;
        }

        let reg = self.registration(listener.id);
        match &listener.callback {
            ListenerCallback::Immediate(callback) => {
                self.announce(listener, trigger);
                let outcome =
                    panic::catch_unwind(AssertUnwindSafe(|| callback(&trigger.payload, &reg)));
                self.complete(listener, trigger, settle(outcome));
                Dispatch::Completed
            }
            ListenerCallback::Deferred(callback) => {
                let Ok(runtime) = Handle::try_current() else {
                    warn!(
                        event = %listener.event,
                        listener = %listener.id,
                        trigger = %trigger.id,
                        error = %ChannelError::RuntimeUnavailable,
                        "Deferred listener skipped, trigger left pending"
                    );
                    return Dispatch::Skipped;
                };
                self.announce(listener, trigger);

                let payload = trigger.payload.clone();
                let invoked = panic::catch_unwind(AssertUnwindSafe(|| callback(payload, reg)));
                let future = match invoked {
                    Ok(future) => future,
                    Err(panic) => {
                        let failure = ListenerFailure::Panicked(panic_message(panic.as_ref()));
                        self.complete(listener, trigger, Err(failure));
                        return Dispatch::Completed;
                    }
                };

                let channel = Arc::downgrade(self);
                let listener = Arc::clone(listener);
                let trigger = Arc::clone(trigger);
                Dispatch::Deferred(ReplyTask {
                    runtime,
                    future: Box::pin(async move {
                        let outcome = AssertUnwindSafe(future).catch_unwind().await;
                        let Some(inner) = channel.upgrade() else {
                            debug!(
                                listener = %listener.id,
                                trigger = %trigger.id,
                                "Channel dropped before reply settled"
                            );
                            return;
                        };
                        inner.complete(&listener, &trigger, settle(outcome));
                    }),
                })
            }
        }
    }

    /// `trigger` hook for a pairing about to run.
    fn announce(self: &Arc<Self>, listener: &ListenerEntry, trigger: &TriggerEntry) {
        self.notify(|| {
            HookEvent::pairing(HookKind::Trigger, listener.snapshot(), trigger.snapshot())
        });
    }

    /// Steps after the reply value is known.
    fn complete(
        self: &Arc<Self>,
        listener: &Arc<ListenerEntry>,
        trigger: &Arc<TriggerEntry>,
        outcome: Result<Value, ListenerFailure>,
    ) {
        let value = match outcome {
            Ok(value) => value,
            Err(ListenerFailure::Error(e)) => {
                warn!(
                    event = %listener.event,
                    listener = %listener.id,
                    trigger = %trigger.id,
                    error = %e,
                    "Listener failed, no reply recorded"
                );
                return;
            }
            Err(ListenerFailure::Panicked(msg)) => {
                error!(
                    event = %listener.event,
                    listener = %listener.id,
                    trigger = %trigger.id,
                    panic = %msg,
                    "Listener panicked, no reply recorded"
                );
                return;
            }
        };

        let Some(replies) = self.state().accept_reply(listener, trigger, value) else {
            debug!(
                listener = %listener.id,
                trigger = %trigger.id,
                "Reply abandoned, entity no longer live"
            );
            return;
        };

        if let Some(on_reply) = &trigger.on_reply {
            self.notify(|| {
                HookEvent::pairing(HookKind::Reply, listener.snapshot(), trigger.snapshot())
            });
            let reg = self.registration(trigger.id);
            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| on_reply(&replies, &reg))) {
                error!(
                    event = %trigger.event,
                    trigger = %trigger.id,
                    panic = %panic_message(panic.as_ref()),
                    "Reply callback panicked"
                );
            }
        }

        if listener.once {
            self.release(listener.id, Removal::Cancel);
        }
        if trigger.once {
            self.release(trigger.id, Removal::Cancel);
        }
    }
}

/// Spawn deferred continuations once the synchronous part of a dispatch is done.
pub(crate) fn spawn_all(tasks: Vec<ReplyTask>) {
    for task in tasks {
        drop(task.runtime.spawn(task.future));
    }
}
