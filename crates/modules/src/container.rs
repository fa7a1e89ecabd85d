//! Active containers: live actors that fan a message out to their members.
//!
//! The sub-address of the incoming target is carried onto every member, so
//! a message for `box/#chan` reaches `a/#chan` and `b/#chan`. The same type
//! is registered as both a module and an agent container.
//!
//! A synchronous message is relayed synchronously and the members' replies
//! are answered back to the waiting sender, ordered by member RI.

use async_trait::async_trait;

use halyard_config::string_list;
use halyard_core::ri;
use halyard_runtime::{Actor, ActorContext, Message, Plugin};

#[derive(Debug, Clone, Default)]
pub struct Container {
    contents: Vec<String>,
}

impl Container {
    pub fn new(contents: Vec<String>) -> Self {
        Self { contents }
    }

    pub fn contents(&self) -> &[String] {
        &self.contents
    }
}

impl Plugin for Container {
    fn from_config(settings: &serde_json::Map<String, serde_json::Value>) -> anyhow::Result<Self> {
        Ok(Self::new(string_list(settings, "contents").unwrap_or_default()))
    }
}

#[async_trait]
impl Actor for Container {
    async fn init(&mut self, ctx: &ActorContext) -> anyhow::Result<()> {
        if self.contents.is_empty() {
            tracing::warn!(container = %ctx.name(), "Container has no members");
        }
        Ok(())
    }

    async fn receive(&mut self, ctx: &ActorContext, msg: Message) -> anyhow::Result<()> {
        let whom = msg.whom().to_string();
        let members: Vec<String> = self
            .contents
            .iter()
            .map(|member| ri::join(member, &whom))
            .collect();

        if !msg.sync {
            ctx.send_to(msg, &members);
            return Ok(());
        }

        // The sender is blocked on us: ask the members ourselves and pass
        // their answers back. Never relay to the blocked sender itself.
        let sender = msg.origin().map(ri::name).unwrap_or_default().to_string();
        let members: Vec<String> = members
            .into_iter()
            .filter(|m| ri::name(m) != sender)
            .collect();
        let mut answers: Vec<_> = ctx
            .sync_send_to(msg.relayed(), &members)
            .await?
            .into_iter()
            .collect();
        answers.sort_by(|a, b| a.0.cmp(&b.0));
        for answer in answers.into_iter().flat_map(|(_, replies)| replies) {
            ctx.reply(&msg, answer.body);
        }
        Ok(())
    }
}
