//! # KyroBus - Bidirectional In-Process Event Channel
//!
//! KyroBus lets producers and consumers rendezvous on a named event no matter
//! which side registers first. A trigger emitted before any listener exists
//! is kept pending and dispatched as soon as a listener arrives; a trigger
//! emitted with `wait` stays open to catch every later listener.
//!
//! ## Core Concepts
//!
//! - **Listener**: registered with `on` / `on_wait`, answers triggers of its event with a reply
//! - **Trigger**: registered with `emit`, carries a payload and gathers replies
//! - **Hook**: observes lifecycle steps (`on`, `emit`, `off`, `trigger`, `reply`)
//! - **Scope**: records ids registered through it for bulk removal
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kyrobus::{EmitOptions, EventChannel, ListenOptions};
//! use serde_json::json;
//!
//! let channel = EventChannel::new();
//!
//! // Emitted first, held until a listener arrives
//! channel.emit(
//!     "config.loaded",
//!     json!({ "debug": true }),
//!     EmitOptions::new().on_reply(|replies, _| println!("acks: {}", replies.len())),
//! )?;
//!
//! channel.on("config.loaded", |cfg, _| Ok(json!(cfg["debug"])), ListenOptions::default())?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod channel;
pub mod config;
pub mod error;
pub mod hooks;
pub mod id;
pub mod registration;
pub mod scope;
pub mod view;

// Re-export primary types at crate root for convenience
pub use channel::registry::{ChannelSnapshot, ListenerSnapshot, Replies, Size, TriggerSnapshot};
pub use channel::reply::PendingReplies;
pub use channel::{EmitOptions, EventChannel, ListenOptions, OffKind, Target};
pub use config::{ChannelConfig, EventConfig};
pub use error::{BoxError, ChannelError, ChannelResult, ValidationError};
pub use hooks::{HookEvent, HookKind, HookOptions, HookSnapshot};
pub use id::EntityId;
pub use registration::Registration;
pub use scope::Scope;
pub use view::EventView;
