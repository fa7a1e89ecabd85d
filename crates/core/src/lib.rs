//! # Halyard Core
//!
//! Value types, addressing helpers, error definitions and runtime events for
//! the Halyard actor runtime. This crate carries **no scheduling logic**: it
//! defines the vocabulary that the runtime, the built-in modules and agents
//! all speak.
//!
//! ## Design Philosophy
//!
//! - A [`Message`] is a plain value. It is cloned for every hop, so a receiver
//!   can never observe another receiver's edits.
//! - Addresses ("RIs") are strings of the form `name[/sub...]`; the helpers in
//!   [`ri`] are the only place that knows how to split them.
//! - Every failure the runtime can surface is a variant of [`Error`].

pub mod error;
pub mod event;
pub mod message;
pub mod ri;
pub mod version;

// Re-export key types at crate root for ergonomics
pub use error::{DeliveryError, Error, Result};
pub use event::{EventBus, RuntimeEvent};
pub use message::{DEFAULT_KIND, HELP_KIND, Message};
pub use version::{CORE_VERSION, Version, VersionRequirement};
