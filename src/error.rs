//! Error types for KyroBus.
//!
//! Argument errors surface synchronously at the call site. Listener failures
//! never reach the caller of `emit`; they are logged and count as "no reply".

use thiserror::Error;

/// Boxed error returned by listener callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Validation errors for arguments passed to the channel.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Event names must be non-empty.
    #[error("Event name cannot be empty")]
    EmptyEvent,

    /// A pattern target failed to compile.
    #[error("Invalid event pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The pattern as given.
        pattern: String,
        /// Compiler message.
        reason: String,
    },

    /// A view of this event is already open on the channel.
    #[error("A view of event '{event}' already exists")]
    ViewExists {
        /// The event name.
        event: String,
    },
}

/// Top-level error type for KyroBus.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Invalid argument.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Call through a scope after `destroy`.
    #[error("Scope has been destroyed")]
    ScopeDestroyed,

    /// A deferred listener was matched outside a tokio runtime.
    #[error("No tokio runtime available to await a deferred listener")]
    RuntimeUnavailable,

    /// Awaited replies were cancelled before any arrived.
    #[error("Trigger was cancelled before a reply arrived")]
    Cancelled,
}

impl ChannelError {
    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if awaited replies were cancelled.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns true if the call went through a destroyed scope.
    #[must_use]
    pub const fn is_scope_destroyed(&self) -> bool {
        matches!(self, Self::ScopeDestroyed)
    }
}

/// Result type alias for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;
