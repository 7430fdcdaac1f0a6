//! Channel view bound to a single event name.

use std::future::Future;

use serde_json::Value;

use crate::channel::reply::PendingReplies;
use crate::channel::{EmitOptions, EventChannel, ListenOptions, OffKind, Target};
use crate::error::{BoxError, ChannelResult};
use crate::hooks::{HookEvent, HookOptions};
use crate::id::EntityId;
use crate::registration::Registration;
use crate::{Replies, Size};

/// Every call goes to the same event name on the underlying channel.
///
/// A view holds an exclusive claim on its event name until dropped.
#[derive(Debug)]
pub struct EventView {
    channel: EventChannel,
    event: String,
}

impl EventView {
    pub(crate) fn new(channel: EventChannel, event: String) -> Self {
        Self { channel, event }
    }

    /// The bound event name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.event
    }

    /// The underlying channel.
    #[must_use]
    pub fn channel(&self) -> &EventChannel {
        &self.channel
    }

    /// [`EventChannel::on`] for this event.
    pub fn on<F>(&self, callback: F, options: ListenOptions) -> ChannelResult<Registration>
    where
        F: Fn(&Value, &Registration) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        self.channel.on(self.event.as_str(), callback, options)
    }

    /// [`EventChannel::on_wait`] for this event.
    pub fn on_wait<F, Fut>(
        &self,
        callback: F,
        options: ListenOptions,
    ) -> ChannelResult<Registration>
    where
        F: Fn(Value, Registration) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        self.channel.on_wait(self.event.as_str(), callback, options)
    }

    /// [`EventChannel::emit`] for this event.
    pub fn emit(&self, payload: Value, options: EmitOptions) -> ChannelResult<Registration> {
        self.channel.emit(self.event.as_str(), payload, options)
    }

    /// [`EventChannel::emit_now`] for this event.
    pub fn emit_now(&self, payload: Value) -> ChannelResult<Replies> {
        self.channel.emit_now(self.event.as_str(), payload)
    }

    /// [`EventChannel::emit_async`] for this event.
    pub fn emit_async(
        &self,
        payload: Value,
        options: EmitOptions,
    ) -> ChannelResult<PendingReplies> {
        self.channel.emit_async(self.event.as_str(), payload, options)
    }

    /// Remove listeners and/or triggers of this event.
    pub fn off(&self, kind: OffKind) -> ChannelResult<Vec<EntityId>> {
        self.channel.off_kind(self.event.as_str(), kind)
    }

    /// Registrations on this event.
    pub fn size(&self) -> ChannelResult<Size> {
        self.channel.size(self.event.as_str())
    }

    /// Hook on this event name.
    pub fn hook<F>(&self, callback: F, options: HookOptions) -> ChannelResult<Registration>
    where
        F: Fn(&HookEvent, &Registration) + Send + Sync + 'static,
    {
        self.channel.hook(Target::Event(self.event.clone()), callback, options)
    }
}

impl Drop for EventView {
    fn drop(&mut self) {
        self.channel.release_view(&self.event);
    }
}
