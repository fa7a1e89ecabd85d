//! Help module: collects help topics from the other modules.
//!
//! `!help` asks every module (or the configured `target` list) for its topic
//! list with a synchronous `help` message and prints the merged list.
//! `!help <topic> [<subtopic> ...]` forwards the topic path and relays the
//! first answer.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use halyard_config::string_list;
use halyard_core::{HELP_KIND, ri};
use halyard_runtime::{Actor, ActorContext, Message, Plugin};

use crate::command::CommandSet;

const MAX_COLUMN: usize = 80;

const INTRO: &str = "The help command gives useful help messages.

Syntax:
  !help <topic> [<subtopic> ...]

Available topics:
";

pub struct Help {
    commands: Arc<CommandSet<Self>>,
    target: Option<Vec<String>>,
}

impl Plugin for Help {
    fn from_config(settings: &serde_json::Map<String, Value>) -> anyhow::Result<Self> {
        Ok(Self {
            commands: Arc::new(
                CommandSet::<Self>::new().command("help", |this, ctx, args, msg| {
                    Box::pin(this.help(ctx, args, msg))
                }),
            ),
            target: string_list(settings, "target"),
        })
    }
}

impl Help {
    /// Who to ask: the configured targets or every module, never ourselves.
    fn targets(&self, ctx: &ActorContext) -> Vec<String> {
        self.target
            .clone()
            .unwrap_or_else(|| ctx.modules())
            .into_iter()
            .filter(|t| ri::name(t) != ctx.name())
            .collect()
    }

    async fn help(&mut self, ctx: &ActorContext, args: String, msg: Message) -> anyhow::Result<()> {
        let targets = self.targets(ctx);

        if args.is_empty() {
            let request = Message::new(Value::Array(Vec::new())).with_kind(HELP_KIND);
            let replies = ctx.sync_send_to(request, &targets).await?;

            let mut topics: Vec<String> = Vec::new();
            for answer in in_target_order(&targets, replies) {
                let Some(names) = answer.body.as_array() else {
                    continue;
                };
                for name in names.iter().filter_map(Value::as_str) {
                    if !topics.iter().any(|t| t == name) {
                        topics.push(name.to_string());
                    }
                }
            }

            ctx.reply(&msg, general_help(&topics));
            return Ok(());
        }

        let path: Vec<Value> = args.split(' ').map(|s| Value::String(s.to_string())).collect();
        let request = Message::new(Value::Array(path)).with_kind(HELP_KIND);
        let replies = ctx.sync_send_to(request, &targets).await?;

        match in_target_order(&targets, replies).into_iter().next() {
            Some(answer) => {
                ctx.reply(&msg, answer.body);
            }
            None => {
                let topic = args.split(' ').next().unwrap_or_default();
                ctx.reply(&msg, format!("Topic '{topic}' not found!"));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Actor for Help {
    async fn receive(&mut self, ctx: &ActorContext, msg: Message) -> anyhow::Result<()> {
        let commands = Arc::clone(&self.commands);
        commands.run(self, ctx, msg).await?;
        Ok(())
    }
}

/// First reply of each destination, configured targets first, then the rest
/// (members of expanded containers) by name.
fn in_target_order(targets: &[String], mut replies: HashMap<String, Vec<Message>>) -> Vec<Message> {
    let mut ordered = Vec::with_capacity(replies.len());
    for target in targets {
        if let Some(answers) = replies.remove(target) {
            ordered.extend(answers.into_iter().next());
        }
    }
    let mut rest: Vec<(String, Vec<Message>)> = replies.into_iter().collect();
    rest.sort_by(|a, b| a.0.cmp(&b.0));
    ordered.extend(rest.into_iter().filter_map(|(_, answers)| answers.into_iter().next()));
    ordered
}

/// Intro text followed by the topics, comma separated and wrapped with a
/// two-space indent.
pub fn general_help(topics: &[String]) -> String {
    let mut text = INTRO.to_string();
    let mut line = String::from("  ");
    let mut column = 2;
    let mut first = true;

    for topic in topics {
        if column + topic.len() + 2 > MAX_COLUMN {
            text.push_str(&line);
            text.push('\n');
            line = String::from("  ");
            column = 2;
            first = true;
        }

        if first {
            first = false;
        } else {
            line.push_str(", ");
            column += 2;
        }

        line.push_str(topic);
        column += topic.len();
    }

    if !line.trim().is_empty() {
        text.push_str(&line);
        text.push('\n');
    }
    text
}
