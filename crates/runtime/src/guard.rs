//! Permission guard for privileged handlers.

use chrono::Utc;

use halyard_core::{Error, Message, Result, RuntimeEvent};

use crate::context::ActorContext;

/// Body of the reply sent on denial when the guard is configured to reply.
pub const PERMISSION_DENIED: &str = "Permission Denied";

/// Checks that the sender of a message holds a permission.
///
/// The resource checked is the message's origin and the identity is the
/// message's identity (blank when the agent could not provide one).
/// `permissive` is the answer while auth is disabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guard {
    permission: String,
    reply: bool,
    permissive: bool,
}

impl Guard {
    pub fn new(permission: impl Into<String>) -> Self {
        Self {
            permission: permission.into(),
            reply: false,
            permissive: true,
        }
    }

    /// Reply "Permission Denied" to refused messages.
    pub fn reply(mut self, reply: bool) -> Self {
        self.reply = reply;
        self
    }

    /// Whether to allow everything while auth is disabled.
    pub fn permissive(mut self, permissive: bool) -> Self {
        self.permissive = permissive;
        self
    }

    pub fn permission(&self) -> &str {
        &self.permission
    }

    /// Whether `msg` may run the guarded handler.
    ///
    /// Fails with [`Error::MalformedMessage`] when `msg` has no origin.
    pub fn check(&self, ctx: &ActorContext, msg: &Message) -> Result<bool> {
        let origin = msg.origin().ok_or_else(|| Error::MalformedMessage {
            uuid: msg.uuid.to_string(),
            field: "origin",
        })?;
        let identity = msg.identity.as_deref().unwrap_or("");

        if ctx
            .auth()
            .has_permission(origin, identity, &self.permission, self.permissive)
        {
            return Ok(true);
        }

        ctx.auth().record_denial(origin, identity, &self.permission);
        ctx.events().publish(RuntimeEvent::PermissionDenied {
            actor: ctx.name().to_string(),
            resource: origin.to_string(),
            identity: identity.to_string(),
            permission: self.permission.clone(),
            timestamp: Utc::now(),
        });

        if self.reply {
            ctx.reply(msg, PERMISSION_DENIED);
        }
        Ok(false)
    }
}
