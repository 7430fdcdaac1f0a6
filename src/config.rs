//! Channel configuration.
//!
//! Flags resolve per event: an entry in [`ChannelConfig::events`] wins over the
//! channel-wide value.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Channel-wide behaviour flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Keep unwaited triggers that matched no listener so a later `on` can catch them.
    pub retain_unmatched: bool,
    /// A new emit cancels the pending triggers of the same event first.
    pub replace_pending: bool,
    /// A new listener removes the existing listeners of the same event first.
    pub replace_listeners: bool,
    /// Per-event overrides.
    pub events: HashMap<String, EventConfig>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            retain_unmatched: true,
            replace_pending: false,
            replace_listeners: false,
            events: HashMap::new(),
        }
    }
}

/// Overrides for a single event name. Unset fields fall back to the channel value.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retain_unmatched: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replace_pending: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replace_listeners: Option<bool>,
}

impl ChannelConfig {
    /// Add or replace the override for `event`.
    #[must_use]
    pub fn with_event(mut self, event: impl Into<String>, overrides: EventConfig) -> Self {
        self.events.insert(event.into(), overrides);
        self
    }

    /// Effective `retain_unmatched` for `event`.
    #[must_use]
    pub fn retain_unmatched(&self, event: &str) -> bool {
        self.events
            .get(event)
            .and_then(|o| o.retain_unmatched)
            .unwrap_or(self.retain_unmatched)
    }

    /// Effective `replace_pending` for `event`.
    #[must_use]
    pub fn replace_pending(&self, event: &str) -> bool {
        self.events
            .get(event)
            .and_then(|o| o.replace_pending)
            .unwrap_or(self.replace_pending)
    }

    /// Effective `replace_listeners` for `event`.
    #[must_use]
    pub fn replace_listeners(&self, event: &str) -> bool {
        self.events
            .get(event)
            .and_then(|o| o.replace_listeners)
            .unwrap_or(self.replace_listeners)
    }
}
