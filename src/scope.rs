//! Scopes group registrations for bulk removal.
//!
//! A scope forwards to its channel and records every id produced through it.
//! It only sees what was registered through it; entities created directly on
//! the channel are untouched by [`Scope::clear`].

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::debug;

use crate::channel::reply::PendingReplies;
use crate::channel::registry::Replies;
use crate::channel::{EmitOptions, EventChannel, ListenOptions, Target};
use crate::error::{BoxError, ChannelError, ChannelResult};
use crate::hooks::{HookEvent, HookOptions};
use crate::id::EntityId;
use crate::registration::Registration;

/// Recording wrapper around an [`EventChannel`].
#[derive(Debug)]
pub struct Scope {
    channel: EventChannel,
    ids: Mutex<BTreeSet<EntityId>>,
    destroyed: AtomicBool,
}

impl Scope {
    pub(crate) fn new(channel: EventChannel) -> Self {
        Self {
            channel,
            ids: Mutex::new(BTreeSet::new()),
            destroyed: AtomicBool::new(false),
        }
    }

    fn ids_mut(&self) -> MutexGuard<'_, BTreeSet<EntityId>> {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_live(&self) -> ChannelResult<()> {
        if self.is_destroyed() {
            return Err(ChannelError::ScopeDestroyed);
        }
        Ok(())
    }

    fn record(&self, registration: Registration) -> Registration {
        self.ids_mut().insert(registration.id());
        registration
    }

    /// [`EventChannel::on`] through this scope.
    pub fn on<F>(
        &self,
        event: impl Into<String>,
        callback: F,
        options: ListenOptions,
    ) -> ChannelResult<Registration>
    where
        F: Fn(&Value, &Registration) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        self.ensure_live()?;
        self.channel.on(event, callback, options).map(|r| self.record(r))
    }

    /// [`EventChannel::on_wait`] through this scope.
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
        self.ensure_live()?;
        self.channel.on_wait(event, callback, options).map(|r| self.record(r))
    }

    /// [`EventChannel::emit`] through this scope.
    pub fn emit(
        &self,
        event: impl Into<String>,
        payload: Value,
        options: EmitOptions,
    ) -> ChannelResult<Registration> {
        self.ensure_live()?;
        self.channel.emit(event, payload, options).map(|r| self.record(r))
    }

    /// [`EventChannel::emit_now`] through this scope.
    ///
    /// Nothing is recorded: the trigger never outlives the call.
    pub fn emit_now(&self, event: impl Into<String>, payload: Value) -> ChannelResult<Replies> {
        self.ensure_live()?;
        self.channel.emit_now(event, payload)
    }

    /// [`EventChannel::emit_async`] through this scope.
    ///
    /// Clearing the scope removes the trigger but does not resolve the
    /// future; use [`PendingReplies::cancel`] for that.
    pub fn emit_async(
        &self,
        event: impl Into<String>,
        payload: Value,
        options: EmitOptions,
    ) -> ChannelResult<PendingReplies> {
        self.ensure_live()?;
        let pending = self.channel.emit_async(event, payload, options)?;
        self.ids_mut().insert(pending.id());
        Ok(pending)
    }

    /// [`EventChannel::hook`] through this scope.
    pub fn hook<F>(
        &self,
        target: impl Into<Target>,
        callback: F,
        options: HookOptions,
    ) -> ChannelResult<Registration>
    where
        F: Fn(&HookEvent, &Registration) + Send + Sync + 'static,
    {
        self.ensure_live()?;
        self.channel.hook(target, callback, options).map(|r| self.record(r))
    }

    /// Ids recorded so far, including ones already released elsewhere.
    #[must_use]
    pub fn ids(&self) -> Vec<EntityId> {
        self.ids_mut().iter().copied().collect()
    }

    /// Remove every recorded entity. The scope stays usable.
    ///
    /// Returns the ids that were still registered.
    pub fn clear(&self) -> ChannelResult<Vec<EntityId>> {
        self.ensure_live()?;
        Ok(self.release_all())
    }

    /// Remove every recorded entity and disable the scope.
    ///
    /// A second `destroy` is a no-op.
    pub fn destroy(&self) -> Vec<EntityId> {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return Vec::new();
        }
        let removed = self.release_all();
        debug!(removed = removed.len(), "Destroyed scope");
        removed
    }

    /// Whether [`destroy`](Self::destroy) has been called.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    fn release_all(&self) -> Vec<EntityId> {
        let ids = std::mem::take(&mut *self.ids_mut());
        let mut removed = Vec::new();
        for id in ids {
            if let Ok(ids) = self.channel.off(id) {
                removed.extend(ids);
            }
        }
        removed
    }
}
