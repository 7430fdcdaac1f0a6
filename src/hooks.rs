//! Lifecycle hooks.
//!
//! Hooks observe the channel without taking part in dispatch. They are
//! synchronous observers: a hook callback runs inline with the lifecycle step
//! that produced the notification and never suspends.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::channel::matcher::Target;
use crate::channel::registry::{ListenerSnapshot, TriggerSnapshot};
use crate::id::EntityId;
use crate::registration::Registration;

/// Lifecycle step a hook notification reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookKind {
    /// A listener was registered.
    On,
    /// A trigger was registered.
    Emit,
    /// A listener or trigger is about to be removed.
    Off,
    /// A listener/trigger pairing is about to run.
    Trigger,
    /// A reply was recorded on a trigger.
    Reply,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::On => "on",
            Self::Emit => "emit",
            Self::Off => "off",
            Self::Trigger => "trigger",
            Self::Reply => "reply",
        };
        f.write_str(name)
    }
}

/// Notification delivered to hook callbacks.
///
/// `on` and `emit` are both populated for [`HookKind::Trigger`] and
/// [`HookKind::Reply`]; otherwise only the side that changed is set.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookEvent {
    #[serde(rename = "type")]
    pub kind: HookKind,
    pub on: Option<ListenerSnapshot>,
    pub emit: Option<TriggerSnapshot>,
}

impl HookEvent {
    pub(crate) fn listener(kind: HookKind, listener: ListenerSnapshot) -> Self {
        Self {
            kind,
            on: Some(listener),
            emit: None,
        }
    }

    pub(crate) fn trigger(kind: HookKind, trigger: TriggerSnapshot) -> Self {
        Self {
            kind,
            on: None,
            emit: Some(trigger),
        }
    }

    pub(crate) fn pairing(
        kind: HookKind,
        listener: ListenerSnapshot,
        trigger: TriggerSnapshot,
    ) -> Self {
        Self {
            kind,
            on: Some(listener),
            emit: Some(trigger),
        }
    }

    /// Event name of the entity involved.
    #[must_use]
    pub fn event(&self) -> Option<&str> {
        self.on
            .as_ref()
            .map(|l| l.event.as_str())
            .or_else(|| self.emit.as_ref().map(|t| t.event.as_str()))
    }
}

/// Hook registration options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookOptions {
    /// Only observe this kind. `None` observes every kind.
    pub kind: Option<HookKind>,
    /// Release the hook after its first invocation.
    pub once: bool,
}

impl HookOptions {
    /// Observe every lifecycle kind.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            kind: None,
            once: false,
        }
    }

    /// Observe a single lifecycle kind.
    #[must_use]
    pub const fn of(kind: HookKind) -> Self {
        Self {
            kind: Some(kind),
            once: false,
        }
    }

    /// Release the hook after its first invocation.
    #[must_use]
    pub const fn once(mut self) -> Self {
        self.once = true;
        self
    }
}

pub(crate) type HookFn = dyn Fn(&HookEvent, &Registration) + Send + Sync;

pub(crate) struct HookEntry {
    pub id: EntityId,
    pub target: Target,
    pub kind: Option<HookKind>,
    pub once: bool,
    pub callback: Arc<HookFn>,
}

impl HookEntry {
    pub(crate) fn accepts(&self, event: &HookEvent) -> bool {
        if self.kind.is_some_and(|kind| kind != event.kind) {
            return false;
        }
        let on = event
            .on
            .as_ref()
            .is_some_and(|l| self.target.matches(l.id, &l.event));
        on || event
            .emit
            .as_ref()
            .is_some_and(|t| self.target.matches(t.id, &t.event))
    }

    pub(crate) fn snapshot(&self) -> HookSnapshot {
        HookSnapshot {
            id: self.id,
            target: self.target.to_string(),
            kind: self.kind,
            once: self.once,
        }
    }
}

/// Exported view of a registered hook.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookSnapshot {
    pub id: EntityId,
    pub target: String,
    pub kind: Option<HookKind>,
    pub once: bool,
}
