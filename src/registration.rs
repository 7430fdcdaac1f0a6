//! Handles returned by registration calls.

use std::fmt;
use std::sync::Weak;

use crate::channel::dispatcher::Removal;
use crate::channel::Inner;
use crate::id::EntityId;

/// Handle returned by every registration call.
///
/// The channel is the sole authority on liveness; the handle only holds a
/// weak reference, so keeping it around does not keep the channel alive.
#[derive(Clone)]
pub struct Registration {
    id: EntityId,
    channel: Weak<Inner>,
}

impl Registration {
    pub(crate) fn new(id: EntityId, channel: Weak<Inner>) -> Self {
        Self { id, channel }
    }

    /// Id of the registered listener, trigger or hook.
    #[must_use]
    pub const fn id(&self) -> EntityId {
        self.id
    }

    /// Whether the entity is still registered.
    #[must_use]
    pub fn has(&self) -> bool {
        self.channel
            .upgrade()
            .is_some_and(|inner| inner.state().contains(self.id))
    }

    /// Remove the entity. Idempotent; a stale handle is a no-op.
    pub fn off(&self) {
        if let Some(inner) = self.channel.upgrade() {
            inner.release(self.id, Removal::Cancel);
        }
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("has", &self.has())
            .finish()
    }
}
