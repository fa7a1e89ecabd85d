//! Permission manager: grant and revoke permissions from chat.
//!
//! `!grant <ri> <identity> <perm>` and `!revoke <ri> <identity> <perm>`,
//! guarded by `PERM_GRANT` and `PERM_REVOKE`. Changes are written back when
//! the grant table was loaded from a file.

use std::sync::Arc;

use async_trait::async_trait;

use halyard_runtime::{Actor, ActorContext, Guard, Message, Plugin};
use halyard_security::AuthError;

use crate::command::CommandSet;

pub const USAGE: &str = "Must be in the form '<ri> <identity> <perm>'";

pub struct PermissionManager {
    commands: Arc<CommandSet<Self>>,
}

impl Default for PermissionManager {
    fn default() -> Self {
        let commands = CommandSet::<Self>::new()
            .guarded(
                "grant",
                Guard::new("PERM_GRANT").reply(true),
                |this, ctx, args, msg| Box::pin(this.grant(ctx, args, msg)),
            )
            .guarded(
                "revoke",
                Guard::new("PERM_REVOKE").reply(true),
                |this, ctx, args, msg| Box::pin(this.revoke(ctx, args, msg)),
            );
        Self {
            commands: Arc::new(commands),
        }
    }
}

impl Plugin for PermissionManager {
    const MINIMUM_CORE: Option<&'static str> = Some("0.1");

    fn from_config(_settings: &serde_json::Map<String, serde_json::Value>) -> anyhow::Result<Self> {
        Ok(Self::default())
    }
}

impl PermissionManager {
    async fn grant(&mut self, ctx: &ActorContext, args: String, msg: Message) -> anyhow::Result<()> {
        let Some((resource, identity, permission)) = triple(&args) else {
            ctx.reply(&msg, USAGE);
            return Ok(());
        };
        if ctx.auth().grant(resource, identity, permission) {
            persist(ctx);
        }
        Ok(())
    }

    async fn revoke(&mut self, ctx: &ActorContext, args: String, msg: Message) -> anyhow::Result<()> {
        let Some((resource, identity, permission)) = triple(&args) else {
            ctx.reply(&msg, USAGE);
            return Ok(());
        };
        if ctx.auth().revoke(resource, identity, permission) {
            persist(ctx);
        }
        Ok(())
    }
}

#[async_trait]
impl Actor for PermissionManager {
    async fn receive(&mut self, ctx: &ActorContext, msg: Message) -> anyhow::Result<()> {
        let commands = Arc::clone(&self.commands);
        commands.run(self, ctx, msg).await?;
        Ok(())
    }
}

/// Exactly three space-separated words.
fn triple(args: &str) -> Option<(&str, &str, &str)> {
    let words: Vec<&str> = args.split(' ').collect();
    match words[..] {
        [resource, identity, permission] => Some((resource, identity, permission)),
        _ => None,
    }
}

fn persist(ctx: &ActorContext) {
    match ctx.auth().write_perms() {
        Ok(()) => {}
        Err(AuthError::NotPersistent) => {
            tracing::debug!(actor = %ctx.name(), "Grant table is in-memory only, not writing");
        }
        Err(e) => tracing::error!(actor = %ctx.name(), error = %e, "Failed to write permissions"),
    }
}
