//! Typed dispatch tables and help topics.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use halyard_core::Message;

use crate::context::ActorContext;

/// Future returned by a type-specific handler.
pub type HandlerFuture<'a> = BoxFuture<'a, anyhow::Result<()>>;

type Handler<A> =
    Box<dyn for<'a> Fn(&'a mut A, &'a ActorContext, Message) -> HandlerFuture<'a> + Send + Sync>;

/// Message-type to handler table for an actor of type `A`.
///
/// ```ignore
/// Handlers::<Self>::new().on("help", |this, ctx, msg| Box::pin(this.on_help(ctx, msg)))
/// ```
pub struct Handlers<A> {
    table: HashMap<String, Handler<A>>,
}

impl<A> Default for Handlers<A> {
    fn default() -> Self {
        Self {
            table: HashMap::new(),
        }
    }
}

impl<A> Handlers<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for messages of type `kind`. A later
    /// registration for the same type replaces the earlier one.
    pub fn on<F>(mut self, kind: impl Into<String>, handler: F) -> Self
    where
        F: for<'a> Fn(&'a mut A, &'a ActorContext, Message) -> HandlerFuture<'a>
            + Send
            + Sync
            + 'static,
    {
        self.table.insert(kind.into(), Box::new(handler));
        self
    }

    pub(crate) fn get(&self, kind: &str) -> Option<&Handler<A>> {
        self.table.get(kind)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.table.contains_key(kind)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl<A> fmt::Debug for Handlers<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<&String> = self.table.keys().collect();
        kinds.sort();
        f.debug_struct("Handlers").field("kinds", &kinds).finish()
    }
}

/// Text of a help topic.
#[derive(Clone)]
pub enum Topic {
    Text(String),
    /// Rendered each time the topic is asked for
    Dynamic(Arc<dyn Fn() -> String + Send + Sync>),
}

impl Topic {
    pub fn render(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Dynamic(render) => render(),
        }
    }
}

impl fmt::Debug for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// Ordered help topics exposed by an actor.
#[derive(Debug, Clone, Default)]
pub struct Topics {
    entries: Vec<(String, Topic)>,
}

impl Topics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.insert(name.into(), Topic::Text(text.into()));
        self
    }

    pub fn dynamic<F>(mut self, name: impl Into<String>, render: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.insert(name.into(), Topic::Dynamic(Arc::new(render)));
        self
    }

    fn insert(&mut self, name: String, topic: Topic) {
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = topic,
            None => self.entries.push((name, topic)),
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t.render())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Answer a `help` message from a topic table.
///
/// An empty body (null, `""` or `[]`) asks for the topic list; a string or a
/// non-empty list asks for the text of the named (first) topic. Unknown
/// topics get no answer.
pub(crate) fn answer_help(topics: &Topics, ctx: &ActorContext, msg: &Message) {
    let requested = match &msg.body {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => s.split_whitespace().next().map(str::to_string),
        Value::Array(items) => match items.first() {
            None => None,
            Some(first) => match first.as_str() {
                Some(name) => Some(name.to_string()),
                None => return,
            },
        },
        _ => return,
    };

    match requested {
        None => {
            ctx.reply(msg, topics.names());
        }
        Some(name) => {
            if let Some(text) = topics.get(&name) {
                ctx.reply(msg, text);
            }
        }
    }
}
