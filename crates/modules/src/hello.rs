//! Hello module: answers `!hello` with a greeting.

use async_trait::async_trait;
use halyard_runtime::{Actor, ActorContext, Message, Plugin, Topics};

pub const GREETING: &str = "Hello world!";

pub struct Hello {
    topics: Topics,
}

impl Default for Hello {
    fn default() -> Self {
        Self {
            topics: Topics::new().text("hello", "Say !hello and the bot says hello back."),
        }
    }
}

impl Plugin for Hello {
    const MINIMUM_CORE: Option<&'static str> = Some("0.1");

    fn from_config(_settings: &serde_json::Map<String, serde_json::Value>) -> anyhow::Result<Self> {
        Ok(Self::default())
    }
}

#[async_trait]
impl Actor for Hello {
    async fn receive(&mut self, ctx: &ActorContext, msg: Message) -> anyhow::Result<()> {
        let command = format!("{}hello", ctx.command_prefix());
        if msg.body_str().is_some_and(|body| body.starts_with(&command)) {
            ctx.reply(&msg, GREETING);
        }
        Ok(())
    }

    fn topics(&self) -> Option<&Topics> {
        Some(&self.topics)
    }
}
