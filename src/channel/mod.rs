//! The event channel.
//!
//! Listeners (`on`) and triggers (`emit`) rendezvous on an event name
//! regardless of which registered first. A listener registered later scans the
//! pending triggers; a trigger registered later scans the current listeners.
//!
//! ```rust,ignore
//! use kyrobus::{EmitOptions, EventChannel, ListenOptions};
//! use serde_json::json;
//!
//! let channel = EventChannel::new();
//! channel.on("greet", |name, _| Ok(json!(format!("hello {name}"))), ListenOptions::default())?;
//! channel.emit(
//!     "greet",
//!     json!("kyro"),
//!     EmitOptions::new().on_reply(|replies, _| println!("{replies:?}")),
//! )?;
//! ```

/// Rendezvous protocol and hook delivery.
pub(crate) mod dispatcher;
/// Event name, pattern and id targets.
pub mod matcher;
/// Listener, trigger and hook storage.
pub mod registry;
/// Awaitable replies.
pub mod reply;

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::FutureExt;
use serde_json::Value;
use tracing::debug;

use crate::config::ChannelConfig;
use crate::error::{BoxError, ChannelResult, ValidationError};
use crate::hooks::{HookEntry, HookEvent, HookKind, HookOptions};
use crate::id::{EntityId, IdAllocator};
use crate::registration::Registration;
use crate::scope::Scope;
use crate::view::EventView;

use dispatcher::{spawn_all, Dispatch, Removal};
use registry::{
    ChannelSnapshot, DeferredFn, ImmediateFn, ListenerCallback, ListenerEntry, Registry, ReplyFn,
    Replies, Size, TriggerEntry, TriggerSnapshot,
};

use reply::{PendingReplies, ReplySlot};

pub use matcher::{OffKind, Target};

/// Listener registration options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenOptions {
    /// Release the listener after its first reply.
    pub once: bool,
}

impl ListenOptions {
    /// Listener that releases itself after its first reply.
    #[must_use]
    pub const fn once() -> Self {
        Self { once: true }
    }
}

/// Trigger registration options.
#[derive(Clone, Default)]
pub struct EmitOptions {
    /// Keep the trigger open after dispatch so later listeners still match.
    pub wait: bool,
    /// Release the trigger after the first reply.
    pub once: bool,
    on_reply: Option<Arc<ReplyFn>>,
}

impl EmitOptions {
    /// Unwaited, repeatable trigger without a reply callback.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the trigger open after dispatch.
    #[must_use]
    pub fn wait(mut self) -> Self {
        self.wait = true;
        self
    }

    /// Release the trigger after the first reply.
    #[must_use]
    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    /// Called with all replies gathered so far each time a listener replies.
    #[must_use]
    pub fn on_reply<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Replies, &Registration) + Send + Sync + 'static,
    {
        self.on_reply = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for EmitOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmitOptions")
            .field("wait", &self.wait)
            .field("once", &self.once)
            .field("on_reply", &self.on_reply.is_some())
            .finish()
    }
}

pub(crate) struct Inner {
    ids: IdAllocator,
    config: ChannelConfig,
    state: Mutex<Registry>,
}

impl Inner {
    /// Registry state. Callbacks never run under this lock, so poisoning
    /// can only come from a bug inside the registry itself.
    pub(crate) fn state(&self) -> MutexGuard<'_, Registry> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn registration(self: &Arc<Self>, id: EntityId) -> Registration {
        Registration::new(id, Arc::downgrade(self))
    }
}

/// Bidirectional event channel.
///
/// Cloning is cheap; clones share the same registries.
#[derive(Clone)]
pub struct EventChannel {
    inner: Arc<Inner>,
}

impl Default for EventChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventChannel")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

fn validate_event(event: impl Into<String>) -> Result<String, ValidationError> {
    let event = event.into();
    if event.is_empty() {
        return Err(ValidationError::EmptyEvent);
    }
    Ok(event)
}

impl EventChannel {
    /// Channel with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ChannelConfig::default())
    }

    /// Channel with explicit behaviour flags.
    #[must_use]
    pub fn with_config(config: ChannelConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                ids: IdAllocator::new(),
                config,
                state: Mutex::new(Registry::default()),
            }),
        }
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    /// Register a listener whose reply is produced synchronously.
    ///
    /// Pending triggers of the same event are dispatched to it before this
    /// call returns.
    pub fn on<F>(
        &self,
        event: impl Into<String>,
        callback: F,
        options: ListenOptions,
    ) -> ChannelResult<Registration>
    where
        F: Fn(&Value, &Registration) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        let callback: Arc<ImmediateFn> = Arc::new(callback);
        self.listen(event, options, ListenerCallback::Immediate(callback))
    }

    /// Register a listener whose reply is the settled value of a future.
    ///
    /// The closure runs synchronously when matched; the returned future is
    /// awaited on the ambient tokio runtime. The reply is dropped if the
    /// listener was removed while the future was pending. Outside a runtime
    /// the listener is not dispatched and matching triggers stay pending.
    pub fn on_wait<F, Fut>(
        &self,
        event: impl Into<String>,
        callback: F,
        options: ListenOptions,
    ) -> ChannelResult<Registration>
    where
        F: Fn(Value, Registration) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        let callback: Arc<DeferredFn> =
            Arc::new(move |payload: Value, reg: Registration| callback(payload, reg).boxed());
        self.listen(event, options, ListenerCallback::Deferred(callback))
    }

    fn listen(
        &self,
        event: impl Into<String>,
        options: ListenOptions,
        callback: ListenerCallback,
    ) -> ChannelResult<Registration> {
        let event = validate_event(event)?;
        let inner = &self.inner;

        if inner.config.replace_listeners(&event) {
            inner.off_matching(&Target::Event(event.clone()), OffKind::On);
        }

        let id = inner.ids.next();
        let listener = Arc::new(ListenerEntry::new(id, event, options.once, callback));
        inner.state().insert_listener(Arc::clone(&listener));
        debug!(
            event = %listener.event,
            listener = %listener.id,
            wait = listener.wait(),
            once = listener.once,
            "Registered listener"
        );
        inner.notify(|| HookEvent::listener(HookKind::On, listener.snapshot()));

        let triggers = inner.state().triggers_for(&listener.event);
        let mut deferred = Vec::new();
        for trigger in triggers {
            if !inner.state().is_listener_dispatchable(listener.id) {
                break;
            }
            if !inner.state().is_trigger_pending(trigger.id) {
                continue;
            }
            match inner.rendezvous(&listener, &trigger) {
                Dispatch::Skipped => continue,
                Dispatch::Completed => {}
                Dispatch::Deferred(task) => deferred.push(task),
            }
            if !trigger.wait {
                inner.release(trigger.id, Removal::Retire);
            }
        }
        spawn_all(deferred);

        Ok(inner.registration(listener.id))
    }

    /// Register a trigger and dispatch it to the current listeners.
    ///
    /// An unwaited trigger that reached at least one listener is retired
    /// right after dispatch; one that reached none stays pending until a
    /// listener arrives or it is removed.
    pub fn emit(
        &self,
        event: impl Into<String>,
        payload: Value,
        options: EmitOptions,
    ) -> ChannelResult<Registration> {
        let event = validate_event(event)?;
        let inner = &self.inner;

        if inner.config.replace_pending(&event) {
            inner.off_matching(&Target::Event(event.clone()), OffKind::Emit);
        }

        let trigger = Arc::new(TriggerEntry::new(
            inner.ids.next(),
            event,
            payload,
            options.wait,
            options.once,
            options.on_reply,
        ));
        inner.state().insert_trigger(Arc::clone(&trigger));
        debug!(
            event = %trigger.event,
            trigger = %trigger.id,
            wait = trigger.wait,
            once = trigger.once,
            "Registered trigger"
        );
        inner.notify(|| HookEvent::trigger(HookKind::Emit, trigger.snapshot()));

        let listeners = inner.state().listeners_for(&trigger.event);
        let mut matched = false;
        let mut deferred = Vec::new();
        for listener in listeners {
            if trigger.is_cancelled() {
                break;
            }
            match inner.rendezvous(&listener, &trigger) {
                Dispatch::Skipped => {}
                Dispatch::Completed => matched = true,
                Dispatch::Deferred(task) => {
                    matched = true;
                    deferred.push(task);
                }
            }
        }

        if !trigger.wait && (matched || !inner.config.retain_unmatched(&trigger.event)) {
            inner.release(trigger.id, Removal::Retire);
        }
        spawn_all(deferred);

        Ok(inner.registration(trigger.id))
    }

    /// Emit and return the replies produced during this call.
    ///
    /// A trigger nobody answered is removed instead of being kept pending.
    /// Replies of deferred listeners arrive after this call returns and are
    /// not included.
    pub fn emit_now(&self, event: impl Into<String>, payload: Value) -> ChannelResult<Replies> {
        let gathered = Arc::new(Mutex::new(Replies::new()));
        let sink = Arc::clone(&gathered);
        let options = EmitOptions::new().on_reply(move |replies, _| {
            sink.lock().unwrap_or_else(PoisonError::into_inner).clone_from(replies);
        });

        let trigger = self.emit(event, payload, options)?;
        if trigger.has() {
            trigger.off();
        }
        let replies = gathered.lock().unwrap_or_else(PoisonError::into_inner).clone();
        Ok(replies)
    }

    /// Emit and await the replies.
    ///
    /// Resolves with every reply produced during this call if there were
    /// any, otherwise with the first reply that arrives later. A reply
    /// callback set on `options` still runs for every reply.
    pub fn emit_async(
        &self,
        event: impl Into<String>,
        payload: Value,
        options: EmitOptions,
    ) -> ChannelResult<PendingReplies> {
        let (slot, receiver) = ReplySlot::channel();
        let sink = Arc::clone(&slot);
        let chained = options.on_reply.clone();
        let options = options.on_reply(move |replies, reg| {
            if let Some(callback) = &chained {
                callback(replies, reg);
            }
            reply::lock(&sink).record(replies);
        });

        let trigger = self.emit(event, payload, options)?;
        reply::lock(&slot).arm();
        Ok(PendingReplies::new(trigger, slot, receiver))
    }

    /// Remove every listener and trigger `target` covers, or the single
    /// entity (listener, trigger or hook) an id target names.
    pub fn off(&self, target: impl Into<Target>) -> ChannelResult<Vec<EntityId>> {
        self.off_kind(target, OffKind::All)
    }

    /// Like [`off`](Self::off), restricted to listeners or triggers for name
    /// and pattern targets. Id targets ignore `kind`.
    pub fn off_kind(
        &self,
        target: impl Into<Target>,
        kind: OffKind,
    ) -> ChannelResult<Vec<EntityId>> {
        let target = target.into();
        target.validate()?;
        Ok(self.inner.off_matching(&target, kind))
    }

    /// Register a hook observing lifecycle notifications.
    pub fn hook<F>(
        &self,
        target: impl Into<Target>,
        callback: F,
        options: HookOptions,
    ) -> ChannelResult<Registration>
    where
        F: Fn(&HookEvent, &Registration) + Send + Sync + 'static,
    {
        let target = target.into();
        target.validate()?;
        let id = self.inner.ids.next();
        debug!(
            hook = %id,
            target = %target,
            kind = ?options.kind,
            once = options.once,
            "Registered hook"
        );
        self.inner.state().insert_hook(Arc::new(HookEntry {
            id,
            target,
            kind: options.kind,
            once: options.once,
            callback: Arc::new(callback),
        }));
        Ok(self.inner.registration(id))
    }

    /// Count registrations covered by `target`.
    pub fn size(&self, target: impl Into<Target>) -> ChannelResult<Size> {
        let target = target.into();
        target.validate()?;
        Ok(self.inner.state().size(&target))
    }

    /// Whether any entity with this id is registered.
    #[must_use]
    pub fn has(&self, id: EntityId) -> bool {
        self.inner.state().contains(id)
    }

    /// Open a scope recording every id created through it.
    #[must_use]
    pub fn scope(&self) -> Scope {
        Scope::new(self.clone())
    }

    /// View bound to a single event name.
    ///
    /// At most one view per event name exists at a time; the name is free
    /// again once the view is dropped.
    pub fn event(&self, event: impl Into<String>) -> ChannelResult<EventView> {
        let event = validate_event(event)?;
        if !self.inner.state().claim_view(&event) {
            return Err(ValidationError::ViewExists { event }.into());
        }
        Ok(EventView::new(self.clone(), event))
    }

    pub(crate) fn release_view(&self, event: &str) {
        self.inner.state().release_view(event);
    }

    /// Serializable picture of every registration, ordered by id.
    #[must_use]
    pub fn export(&self) -> ChannelSnapshot {
        self.inner.state().snapshot()
    }

    /// Re-emit exported triggers in id order.
    ///
    /// Payload, `wait` and `once` are restored; reply callbacks and gathered
    /// replies are not.
    pub fn restore(&self, triggers: &[TriggerSnapshot]) -> ChannelResult<Vec<Registration>> {
        let mut ordered: Vec<&TriggerSnapshot> = triggers.iter().collect();
        ordered.sort_by_key(|t| t.id);
        ordered
            .into_iter()
            .map(|t| {
                let options = EmitOptions {
                    wait: t.wait,
                    once: t.once,
                    on_reply: None,
                };
                self.emit(t.event.clone(), t.payload.clone(), options)
            })
            .collect()
    }
}
