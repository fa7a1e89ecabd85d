//! Admin module: manage a running bot from chat.
//!
//! `!shutdown` asks the host to stop; `!restart <name>` re-runs another
//! actor's init. Both need `ADMIN`, and are refused while auth is disabled.

use std::sync::Arc;

use async_trait::async_trait;

use halyard_runtime::{Actor, ActorContext, Guard, Message, Plugin};

use crate::command::CommandSet;

pub struct Admin {
    commands: Arc<CommandSet<Self>>,
}

fn admin_guard() -> Guard {
    Guard::new("ADMIN").reply(true).permissive(false)
}

impl Default for Admin {
    fn default() -> Self {
        let commands = CommandSet::<Self>::new()
            .guarded("shutdown", admin_guard(), |this, ctx, args, msg| {
                Box::pin(this.shutdown(ctx, args, msg))
            })
            .guarded("restart", admin_guard(), |this, ctx, args, msg| {
                Box::pin(this.restart(ctx, args, msg))
            });
        Self {
            commands: Arc::new(commands),
        }
    }
}

impl Plugin for Admin {
    const MINIMUM_CORE: Option<&'static str> = Some("0.1");

    fn from_config(_settings: &serde_json::Map<String, serde_json::Value>) -> anyhow::Result<Self> {
        Ok(Self::default())
    }
}

impl Admin {
    async fn shutdown(&mut self, ctx: &ActorContext, _args: String, msg: Message) -> anyhow::Result<()> {
        tracing::info!(
            identity = msg.identity.as_deref().unwrap_or(""),
            origin = msg.origin().unwrap_or(""),
            "Shutdown ordered from chat"
        );
        ctx.request_shutdown();
        Ok(())
    }

    async fn restart(&mut self, ctx: &ActorContext, args: String, msg: Message) -> anyhow::Result<()> {
        let name = args.trim();
        match ctx.restart(name).await {
            Ok(()) => {
                ctx.reply(&msg, format!("Successfully restarted '{name}'!"));
            }
            Err(e) => {
                ctx.reply(&msg, format!("Could not restart '{name}': {e}"));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Actor for Admin {
    async fn receive(&mut self, ctx: &ActorContext, msg: Message) -> anyhow::Result<()> {
        let commands = Arc::clone(&self.commands);
        commands.run(self, ctx, msg).await?;
        Ok(())
    }
}
