//! Actor and filter traits.
//!
//! Plugins implement [`Actor`] (modules and agents) or [`Filter`]. The
//! runtime owns the instance once it is added and only ever touches it from
//! the actor's own domain, so implementations take `&mut self` freely.

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

use halyard_core::Message;

use crate::context::ActorContext;
use crate::handlers::{Handlers, Topics};

/// What kind of actor a registry entry is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Internal message-handling logic
    Module,
    /// Bridge to an external protocol; injects traffic with `dispatch`
    Agent,
    /// In-path station that may transform or drop messages
    Filter,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Module => write!(f, "module"),
            Self::Agent => write!(f, "agent"),
            Self::Filter => write!(f, "filter"),
        }
    }
}

/// Lifecycle of a registered actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Created,
    Initialized,
    Running,
    ShuttingDown,
    Terminated,
}

/// A module or agent.
///
/// `receive` is the default entry point. Handlers returned by
/// [`Actor::handlers`] take precedence for their message type; the table is
/// built once when the actor is added. Returning `Err` (or panicking) is
/// logged and reported, and the actor keeps serving later messages.
#[async_trait]
pub trait Actor: Send + 'static {
    /// Runs on the actor's domain before any message is delivered, and again
    /// after `teardown` on restart.
    async fn init(&mut self, _ctx: &ActorContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn receive(&mut self, _ctx: &ActorContext, _msg: Message) -> anyhow::Result<()> {
        Ok(())
    }

    /// Type-specific handlers keyed by message type.
    fn handlers(&self) -> Handlers<Self>
    where
        Self: Sized,
    {
        Handlers::new()
    }

    /// Help topics answered by the built-in `help` handler.
    fn topics(&self) -> Option<&Topics> {
        None
    }

    /// Runs after the actor's worker has been joined.
    fn teardown(&mut self) {}
}

/// A filter interposed on delivery paths.
///
/// `filter` sees the message with the filter's own path segment already
/// stripped from the target. Returning `None` drops the message.
#[async_trait]
pub trait Filter: Send + 'static {
    async fn init(&mut self, _ctx: &ActorContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn filter(&mut self, ctx: &ActorContext, msg: Message) -> Option<Message>;

    fn teardown(&mut self) {}
}
