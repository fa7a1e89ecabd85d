//! # Halyard Runtime
//!
//! An actor-style message-passing runtime. Plugin instances ("actors") are
//! registered by name and each runs on its own domain: a dedicated worker
//! thread processing its mailbox one message at a time, so a slow or
//! blocking handler never stalls anyone else.
//!
//! ## Architecture
//!
//! ```text
//! agent ──dispatch──► routing table / containers ──► filters ──► module
//!   ▲                                                              │
//!   └──────────────────────── reply ◄──────────────────────────────┘
//! ```
//!
//! - [`ActorContext::send_to`] expands destinations, interposes filters and
//!   queues the message on each receiver; it never runs receiver code on
//!   the caller's domain. Unreachable destinations are skipped.
//! - [`ActorContext::sync_send_to`] waits on the completion handles of its
//!   deliveries and collects the replies buffered by the receivers.
//! - [`Guard`] checks the grant table before a privileged handler runs.
//! - [`Runtime`] owns registration, restart and shutdown, and instantiates
//!   plugins from a [`Catalog`].

pub mod actor;
pub mod catalog;
pub mod context;
pub mod delivery;
pub(crate) mod domain;
pub mod guard;
pub mod handlers;
pub(crate) mod registry;
pub mod routing;
pub mod runtime;

pub use actor::{Actor, Capability, Filter, LifecycleState};
pub use catalog::{Catalog, Plugin};
pub use context::ActorContext;
pub use delivery::{DeliveryHandle, DeliveryOutcome};
pub use guard::{Guard, PERMISSION_DENIED};
pub use handlers::{HandlerFuture, Handlers, Topic, Topics};
pub use routing::DEFAULT_CONTAINER;
pub use runtime::{Runtime, RuntimeSettings};

// Hosts and plugins need these alongside the runtime
pub use async_trait::async_trait;
pub use halyard_core::{Error, Message, Result};
