//! Target matching for `off`, `size` and hooks.
//!
//! A target is chosen per call: an exact event name, a regular expression
//! tested against event names, or a single entity id.

use std::fmt;

use regex::Regex;

use crate::error::ValidationError;
use crate::id::EntityId;

/// What an `off`, `size` or `hook` call applies to.
#[derive(Debug, Clone)]
pub enum Target {
    /// Exactly one entity.
    Id(EntityId),
    /// Every entity registered under this event name.
    Event(String),
    /// Every entity whose event name matches the pattern.
    Pattern(Regex),
}

impl Target {
    /// Compile a pattern target.
    pub fn pattern(pattern: &str) -> Result<Self, ValidationError> {
        Regex::new(pattern)
            .map(Self::Pattern)
            .map_err(|e| ValidationError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })
    }

    pub(crate) fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Event(name) if name.is_empty() => Err(ValidationError::EmptyEvent),
            _ => Ok(()),
        }
    }

    /// Whether an event name is covered. Id targets never match by name.
    #[must_use]
    pub fn matches_event(&self, event: &str) -> bool {
        match self {
            Self::Id(_) => false,
            Self::Event(name) => name == event,
            Self::Pattern(re) => re.is_match(event),
        }
    }

    /// Whether the entity `(id, event)` is covered.
    #[must_use]
    pub fn matches(&self, id: EntityId, event: &str) -> bool {
        match self {
            Self::Id(target) => *target == id,
            _ => self.matches_event(event),
        }
    }

    /// Whether a hook registered on `other` observes events covered by `self`.
    pub(crate) fn observed_by(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Id(a), Self::Id(b)) => a == b,
            (Self::Id(_), _) | (_, Self::Id(_)) => false,
            (Self::Event(name), hook) => hook.matches_event(name),
            (Self::Pattern(re), Self::Event(name)) => re.is_match(name),
            (Self::Pattern(a), Self::Pattern(b)) => a.as_str() == b.as_str(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "#{id}"),
            Self::Event(name) => f.write_str(name),
            Self::Pattern(re) => write!(f, "/{}/", re.as_str()),
        }
    }
}

impl From<EntityId> for Target {
    fn from(id: EntityId) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for Target {
    fn from(event: &str) -> Self {
        Self::Event(event.to_string())
    }
}

impl From<String> for Target {
    fn from(event: String) -> Self {
        Self::Event(event)
    }
}

impl From<&String> for Target {
    fn from(event: &String) -> Self {
        Self::Event(event.clone())
    }
}

impl From<Regex> for Target {
    fn from(re: Regex) -> Self {
        Self::Pattern(re)
    }
}

/// Which registries a name or pattern `off` sweeps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OffKind {
    /// Listeners only.
    On,
    /// Triggers only.
    Emit,
    /// Listeners and triggers.
    #[default]
    All,
}

impl OffKind {
    pub(crate) const fn listeners(self) -> bool {
        matches!(self, Self::On | Self::All)
    }

    pub(crate) const fn triggers(self) -> bool {
        matches!(self, Self::Emit | Self::All)
    }
}
