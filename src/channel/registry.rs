//! Listener, trigger and hook storage.
//!
//! All maps are keyed by [`EntityId`]. Ids are allocated in increasing order,
//! so iterating a map visits entries in registration order.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::BoxFuture;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BoxError;
use crate::hooks::{HookEntry, HookEvent, HookSnapshot};
use crate::id::EntityId;
use crate::registration::Registration;

use super::matcher::{OffKind, Target};

/// Replies accumulated by a trigger, keyed by listener id in completion order.
pub type Replies = IndexMap<EntityId, Value>;

pub(crate) type ImmediateFn =
    dyn Fn(&Value, &Registration) -> Result<Value, BoxError> + Send + Sync;
pub(crate) type DeferredFn =
    dyn Fn(Value, Registration) -> BoxFuture<'static, Result<Value, BoxError>> + Send + Sync;
pub(crate) type ReplyFn = dyn Fn(&Replies, &Registration) + Send + Sync;

#[derive(Clone)]
pub(crate) enum ListenerCallback {
    /// Reply is produced in the same synchronous turn.
    Immediate(Arc<ImmediateFn>),
    /// Reply is the settled value of the returned future.
    Deferred(Arc<DeferredFn>),
}

pub(crate) struct ListenerEntry {
    pub id: EntityId,
    pub event: String,
    pub once: bool,
    pub callback: ListenerCallback,
    spent: AtomicBool,
}

impl ListenerEntry {
    pub(crate) fn new(id: EntityId, event: String, once: bool, callback: ListenerCallback) -> Self {
        Self {
            id,
            event,
            once,
            callback,
            spent: AtomicBool::new(false),
        }
    }

    pub(crate) const fn wait(&self) -> bool {
        matches!(self.callback, ListenerCallback::Deferred(_))
    }

    fn is_spent(&self) -> bool {
        self.spent.load(Ordering::Acquire)
    }

    pub(crate) fn snapshot(&self) -> ListenerSnapshot {
        ListenerSnapshot {
            id: self.id,
            event: self.event.clone(),
            wait: self.wait(),
            once: self.once,
        }
    }
}

pub(crate) struct TriggerEntry {
    pub id: EntityId,
    pub event: String,
    pub payload: Value,
    pub wait: bool,
    pub once: bool,
    pub on_reply: Option<Arc<ReplyFn>>,
    replies: Mutex<Replies>,
    cancelled: AtomicBool,
}

impl TriggerEntry {
    pub(crate) fn new(
        id: EntityId,
        event: String,
        payload: Value,
        wait: bool,
        once: bool,
        on_reply: Option<Arc<ReplyFn>>,
    ) -> Self {
        Self {
            id,
            event,
            payload,
            wait,
            once,
            on_reply,
            replies: Mutex::new(Replies::new()),
            cancelled: AtomicBool::new(false),
        }
    }

    fn replies(&self) -> MutexGuard<'_, Replies> {
        self.replies.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A cancelled trigger accepts no further replies.
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub(crate) fn snapshot(&self) -> TriggerSnapshot {
        TriggerSnapshot {
            id: self.id,
            event: self.event.clone(),
            payload: self.payload.clone(),
            replies: self.replies().clone(),
            wait: self.wait,
            once: self.once,
        }
    }
}

/// Exported view of a listener.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerSnapshot {
    pub id: EntityId,
    pub event: String,
    pub wait: bool,
    pub once: bool,
}

/// Exported view of a trigger, including the replies gathered so far.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerSnapshot {
    pub id: EntityId,
    pub event: String,
    pub payload: Value,
    #[serde(default)]
    pub replies: Replies,
    pub wait: bool,
    pub once: bool,
}

/// Everything registered on a channel, ordered by id.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    pub listeners: Vec<ListenerSnapshot>,
    pub triggers: Vec<TriggerSnapshot>,
    pub hooks: Vec<HookSnapshot>,
}

/// Registration counts for a target.
///
/// For id targets every field is `0` or `1`.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub on: usize,
    pub emit: usize,
    pub hook: usize,
}

impl Size {
    /// Total number of entities counted.
    #[must_use]
    pub const fn count(&self) -> usize {
        self.on + self.emit + self.hook
    }
}

/// Entity taken out of service by [`Registry::begin_release`].
pub(crate) enum Releasing {
    Listener(Arc<ListenerEntry>),
    Trigger(Arc<TriggerEntry>),
    Hook,
}

#[derive(Default)]
pub(crate) struct Registry {
    listeners: BTreeMap<EntityId, Arc<ListenerEntry>>,
    triggers: BTreeMap<EntityId, Arc<TriggerEntry>>,
    hooks: BTreeMap<EntityId, Arc<HookEntry>>,
    /// Entities whose `off` hooks are running; still registered, no longer dispatchable.
    releasing: HashSet<EntityId>,
    /// Event names with a live [`EventView`](crate::view::EventView).
    views: HashSet<String>,
}

impl Registry {
    pub(crate) fn insert_listener(&mut self, entry: Arc<ListenerEntry>) {
        self.listeners.insert(entry.id, entry);
    }

    pub(crate) fn insert_trigger(&mut self, entry: Arc<TriggerEntry>) {
        self.triggers.insert(entry.id, entry);
    }

    pub(crate) fn insert_hook(&mut self, entry: Arc<HookEntry>) {
        self.hooks.insert(entry.id, entry);
    }

    pub(crate) fn contains(&self, id: EntityId) -> bool {
        self.listeners.contains_key(&id)
            || self.triggers.contains_key(&id)
            || self.hooks.contains_key(&id)
    }

    pub(crate) fn has_hooks(&self) -> bool {
        !self.hooks.is_empty()
    }

    pub(crate) fn is_listener_dispatchable(&self, id: EntityId) -> bool {
        self.listeners
            .get(&id)
            .is_some_and(|l| !l.is_spent() && !self.releasing.contains(&id))
    }

    pub(crate) fn is_trigger_pending(&self, id: EntityId) -> bool {
        self.triggers
            .get(&id)
            .is_some_and(|t| !t.is_cancelled() && !self.releasing.contains(&id))
    }

    /// Dispatchable listeners registered under `event`.
    pub(crate) fn listeners_for(&self, event: &str) -> Vec<Arc<ListenerEntry>> {
        self.listeners
            .values()
            .filter(|l| l.event == event && self.is_listener_dispatchable(l.id))
            .cloned()
            .collect()
    }

    /// Pending triggers registered under `event`.
    pub(crate) fn triggers_for(&self, event: &str) -> Vec<Arc<TriggerEntry>> {
        self.triggers
            .values()
            .filter(|t| t.event == event && self.is_trigger_pending(t.id))
            .cloned()
            .collect()
    }

    /// Ids an `off` call would remove, listeners first.
    pub(crate) fn matching_ids(&self, target: &Target, kind: OffKind) -> Vec<EntityId> {
        if let Target::Id(id) = target {
            return if self.contains(*id) { vec![*id] } else { Vec::new() };
        }
        let listeners = self
            .listeners
            .values()
            .filter(|l| kind.listeners() && target.matches_event(&l.event))
            .map(|l| l.id);
        let triggers = self
            .triggers
            .values()
            .filter(|t| kind.triggers() && target.matches_event(&t.event))
            .map(|t| t.id);
        listeners.chain(triggers).collect()
    }

    pub(crate) fn size(&self, target: &Target) -> Size {
        if let Target::Id(id) = target {
            return Size {
                on: usize::from(self.listeners.contains_key(id)),
                emit: usize::from(self.triggers.contains_key(id)),
                hook: usize::from(self.hooks.contains_key(id)),
            };
        }
        Size {
            on: self.listeners.values().filter(|l| target.matches_event(&l.event)).count(),
            emit: self.triggers.values().filter(|t| target.matches_event(&t.event)).count(),
            hook: self.hooks.values().filter(|h| target.observed_by(&h.target)).count(),
        }
    }

    /// Hooks that accept `event`, in registration order.
    pub(crate) fn hooks_for(&self, event: &HookEvent) -> Vec<Arc<HookEntry>> {
        self.hooks.values().filter(|h| h.accepts(event)).cloned().collect()
    }

    /// Claim a hook for one invocation. `once` hooks are removed by the claim.
    pub(crate) fn claim_hook(&mut self, hook: &HookEntry) -> bool {
        if hook.once {
            self.hooks.remove(&hook.id).is_some()
        } else {
            self.hooks.contains_key(&hook.id)
        }
    }

    /// Decide whether a settled reply is delivered.
    ///
    /// Returns the accumulated replies when accepted. Runs under the registry
    /// lock so concurrent completions of `once` entities cannot both win.
    pub(crate) fn accept_reply(
        &self,
        listener: &ListenerEntry,
        trigger: &TriggerEntry,
        value: Value,
    ) -> Option<Replies> {
        if !self.is_listener_dispatchable(listener.id) {
            return None;
        }
        let mut replies = trigger.replies();
        if trigger.is_cancelled() {
            return None;
        }
        if listener.once {
            listener.spent.store(true, Ordering::Release);
        }
        if trigger.once {
            trigger.cancel();
        }
        if trigger.on_reply.is_some() {
            replies.insert(listener.id, value);
        }
        Some(replies.clone())
    }

    /// First half of a removal: mark the entity as releasing.
    ///
    /// Hooks are removed outright. Returns `None` for unknown ids and for
    /// entities already being released.
    pub(crate) fn begin_release(&mut self, id: EntityId) -> Option<Releasing> {
        if self.hooks.remove(&id).is_some() {
            return Some(Releasing::Hook);
        }
        if self.releasing.contains(&id) {
            return None;
        }
        let found = if let Some(l) = self.listeners.get(&id) {
            Releasing::Listener(Arc::clone(l))
        } else if let Some(t) = self.triggers.get(&id) {
            Releasing::Trigger(Arc::clone(t))
        } else {
            return None;
        };
        self.releasing.insert(id);
        Some(found)
    }

    /// Second half of a removal, after `off` hooks have run.
    pub(crate) fn finish_release(&mut self, id: EntityId) {
        self.releasing.remove(&id);
        self.listeners.remove(&id);
        self.triggers.remove(&id);
    }

    /// Returns false when a view of `event` already exists.
    pub(crate) fn claim_view(&mut self, event: &str) -> bool {
        self.views.insert(event.to_string())
    }

    pub(crate) fn release_view(&mut self, event: &str) {
        self.views.remove(event);
    }

    pub(crate) fn snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            listeners: self.listeners.values().map(|l| l.snapshot()).collect(),
            triggers: self.triggers.values().map(|t| t.snapshot()).collect(),
            hooks: self.hooks.values().map(|h| h.snapshot()).collect(),
        }
    }
}
