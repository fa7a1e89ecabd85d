//! Command tables: `!name args` parsing and dispatch.
//!
//! A [`CommandSet`] maps command names to handlers on a module. The command
//! prefix comes from the runtime settings; an optional namespace makes the
//! module answer only `!namespace name args`. Each command may carry a
//! [`Guard`] that is checked before the handler runs.

use std::collections::HashMap;
use std::fmt;

use halyard_runtime::{ActorContext, Guard, HandlerFuture, Message};

type Command<A> =
    Box<dyn for<'a> Fn(&'a mut A, &'a ActorContext, String, Message) -> HandlerFuture<'a> + Send + Sync>;

struct Entry<A> {
    guard: Option<Guard>,
    run: Command<A>,
}

/// How a message body reads as a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed<'b> {
    /// `name` with everything after it as `args` (possibly empty)
    Command { name: &'b str, args: &'b str },
    /// Prefixed, but addressed to another namespace
    Foreign,
    /// Not a command at all
    Plain,
}

/// What [`CommandSet::run`] did with a message.
#[derive(Debug)]
pub enum CommandOutcome {
    Ran,
    /// A guard refused the sender
    Denied,
    /// A command for another namespace
    Ignored,
    /// No command matched; the message is handed back for the default hook
    Unmatched(Message),
}

/// Command-name to handler table for a module of type `A`.
pub struct CommandSet<A> {
    namespace: Option<String>,
    table: HashMap<String, Entry<A>>,
}

impl<A> Default for CommandSet<A> {
    fn default() -> Self {
        Self {
            namespace: None,
            table: HashMap::new(),
        }
    }
}

impl<A> fmt::Debug for CommandSet<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSet")
            .field("namespace", &self.namespace)
            .field("commands", &self.names())
            .finish()
    }
}

impl<A> CommandSet<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only answer commands written as `<prefix><namespace> <name> ...`.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn command<F>(self, name: impl Into<String>, handler: F) -> Self
    where
        F: for<'a> Fn(&'a mut A, &'a ActorContext, String, Message) -> HandlerFuture<'a>
            + Send
            + Sync
            + 'static,
    {
        self.insert(name.into(), None, Box::new(handler))
    }

    /// Register a command that only runs when `guard` admits the sender.
    pub fn guarded<F>(self, name: impl Into<String>, guard: Guard, handler: F) -> Self
    where
        F: for<'a> Fn(&'a mut A, &'a ActorContext, String, Message) -> HandlerFuture<'a>
            + Send
            + Sync
            + 'static,
    {
        self.insert(name.into(), Some(guard), Box::new(handler))
    }

    fn insert(mut self, name: String, guard: Option<Guard>, run: Command<A>) -> Self {
        self.table.insert(name, Entry { guard, run });
        self
    }

    /// Sorted command names.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.table.keys().map(String::as_str).collect();
        names.sort();
        names
    }

    /// Split `body` into a command name and its arguments.
    pub fn parse<'b>(&self, prefix: &str, body: &'b str) -> Parsed<'b> {
        let (first, rest) = split_word(body);
        let Some(word) = first.strip_prefix(prefix) else {
            return Parsed::Plain;
        };

        match &self.namespace {
            None => Parsed::Command {
                name: word,
                args: rest,
            },
            Some(namespace) => {
                if word != namespace || rest.is_empty() {
                    return Parsed::Foreign;
                }
                let (name, args) = split_word(rest);
                Parsed::Command { name, args }
            }
        }
    }

    /// Run the command `msg` names, if any.
    ///
    /// Non-string bodies and unknown commands come back as
    /// [`CommandOutcome::Unmatched`].
    pub async fn run(
        &self,
        actor: &mut A,
        ctx: &ActorContext,
        msg: Message,
    ) -> anyhow::Result<CommandOutcome> {
        let command = match msg.body_str().map(|body| self.parse(ctx.command_prefix(), body)) {
            None | Some(Parsed::Plain) => None,
            Some(Parsed::Foreign) => return Ok(CommandOutcome::Ignored),
            Some(Parsed::Command { name, args }) => {
                self.table.get(name).map(|entry| (entry, args.to_string()))
            }
        };
        let Some((entry, args)) = command else {
            return Ok(CommandOutcome::Unmatched(msg));
        };

        if let Some(guard) = &entry.guard {
            if !guard.check(ctx, &msg)? {
                return Ok(CommandOutcome::Denied);
            }
        }

        (entry.run)(actor, ctx, args, msg).await?;
        Ok(CommandOutcome::Ran)
    }
}

fn split_word(s: &str) -> (&str, &str) {
    s.split_once(' ').unwrap_or((s, ""))
}
