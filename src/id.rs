//! Entity identifiers.
//!
//! Listeners, triggers and hooks share a single id namespace per channel, so
//! any id resolves to at most one entity.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Unique identifier for a listener, trigger or hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(u64);

impl EntityId {
    /// Wrap a raw id value.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw id value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<EntityId> for u64 {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

/// Strictly increasing id source. The first id issued is `1`.
#[derive(Debug, Default)]
pub struct IdAllocator {
    last: AtomicU64,
}

impl IdAllocator {
    /// Allocator whose first id is `1`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next id.
    pub fn next(&self) -> EntityId {
        EntityId(self.last.fetch_add(1, Ordering::Relaxed) + 1)
    }
}
