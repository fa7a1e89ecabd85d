//! Per-actor execution domains.
//!
//! Every actor runs on its own OS thread driving a single-threaded tokio
//! runtime, so a handler that blocks only ever stalls its own actor. The
//! worker drains the mailbox one envelope at a time; control commands take
//! priority over queued mail.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::thread::JoinHandle;

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};

use halyard_core::{Error, HELP_KIND, Message, RuntimeEvent, ri};

use crate::actor::{Actor, Filter};
use crate::context::ActorContext;
use crate::delivery::Envelope;
use crate::handlers::{Handlers, answer_help};

/// Teardown hook handed back by a joined worker.
pub(crate) type Teardown = Box<dyn FnOnce() + Send>;

/// Commands processed ahead of the mailbox.
#[derive(Debug)]
pub(crate) enum Control {
    /// Run teardown then init again, reporting the init result
    Restart(oneshot::Sender<Result<(), String>>),
    /// Stop the loop; queued mail is dropped
    Stop,
}

/// What a worker drives: a module/agent or a filter.
#[async_trait]
pub(crate) trait Behavior: Send + 'static {
    async fn init(&mut self, ctx: &ActorContext) -> anyhow::Result<()>;
    async fn handle(&mut self, ctx: &ActorContext, env: Envelope);
    fn teardown(&mut self);
}

pub(crate) struct ActorBehavior<A: Actor> {
    actor: A,
    handlers: Handlers<A>,
}

impl<A: Actor> ActorBehavior<A> {
    pub fn new(actor: A) -> Self {
        let handlers = actor.handlers();
        Self { actor, handlers }
    }
}

#[async_trait]
impl<A: Actor> Behavior for ActorBehavior<A> {
    async fn init(&mut self, ctx: &ActorContext) -> anyhow::Result<()> {
        self.actor.init(ctx).await
    }

    async fn handle(&mut self, ctx: &ActorContext, env: Envelope) {
        let Envelope { msg, done } = env;
        let (uuid, kind) = (msg.uuid, msg.kind.clone());
        let Self { actor, handlers } = self;

        let outcome = AssertUnwindSafe(dispatch(actor, handlers, ctx, msg))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => report_failure(ctx, &uuid.to_string(), &kind, format!("{e:#}")),
            Err(panic) => report_failure(ctx, &uuid.to_string(), &kind, panic_message(&*panic)),
        }

        // The receiver may already be gone (fire-and-forget send)
        let _ = done.send(());
    }

    fn teardown(&mut self) {
        self.actor.teardown();
    }
}

async fn dispatch<A: Actor>(
    actor: &mut A,
    handlers: &Handlers<A>,
    ctx: &ActorContext,
    msg: Message,
) -> anyhow::Result<()> {
    if let Some(handler) = handlers.get(&msg.kind) {
        return handler(actor, ctx, msg).await;
    }
    if msg.kind == HELP_KIND {
        if let Some(topics) = actor.topics() {
            answer_help(topics, ctx, &msg);
            return Ok(());
        }
    }
    actor.receive(ctx, msg).await
}

pub(crate) struct FilterBehavior<F: Filter> {
    filter: F,
}

impl<F: Filter> FilterBehavior<F> {
    pub fn new(filter: F) -> Self {
        Self { filter }
    }
}

#[async_trait]
impl<F: Filter> Behavior for FilterBehavior<F> {
    async fn init(&mut self, ctx: &ActorContext) -> anyhow::Result<()> {
        self.filter.init(ctx).await
    }

    async fn handle(&mut self, ctx: &ActorContext, env: Envelope) {
        let Envelope { mut msg, done } = env;
        let uuid = msg.uuid.to_string();

        let rest = msg.target().map(|t| ri::split(t).1.to_string()).unwrap_or_default();
        if rest.is_empty() {
            tracing::error!(
                filter = %ctx.name(),
                message = %uuid,
                "Target RI cannot be split, was this filter addressed directly?"
            );
            return;
        }
        msg.target = Some(rest);

        let kind = msg.kind.clone();
        let filtered = AssertUnwindSafe(self.filter.filter(ctx, msg))
            .catch_unwind()
            .await;
        match filtered {
            Ok(Some(msg)) => ctx.forward(msg, done),
            Ok(None) => {
                tracing::debug!(filter = %ctx.name(), message = %uuid, "Message dropped by filter");
                ctx.events().publish(RuntimeEvent::MessageDropped {
                    filter: ctx.name().to_string(),
                    message_uuid: uuid,
                    timestamp: Utc::now(),
                });
            }
            Err(panic) => report_failure(ctx, &uuid, &kind, panic_message(&*panic)),
        }
    }

    fn teardown(&mut self) {
        self.filter.teardown();
    }
}

fn report_failure(ctx: &ActorContext, uuid: &str, kind: &str, reason: String) {
    let failure = Error::HandlerFailure {
        actor: ctx.name().to_string(),
        reason: reason.clone(),
    };
    tracing::error!(message = %uuid, kind = %kind, error = %failure, "Handler failed");
    ctx.events().publish(RuntimeEvent::HandlerFailed {
        actor: ctx.name().to_string(),
        message_uuid: uuid.to_string(),
        kind: kind.to_string(),
        error: reason,
        timestamp: Utc::now(),
    });
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

async fn init_guarded<B: Behavior>(behavior: &mut B, ctx: &ActorContext) -> Result<(), String> {
    match AssertUnwindSafe(behavior.init(ctx)).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(panic) => Err(panic_message(&*panic)),
    }
}

/// Start a worker thread for `behavior`.
///
/// `ready` receives the result of the first `init`. The thread returns the
/// teardown hook so the caller can run it after joining.
pub(crate) fn spawn<B: Behavior>(
    behavior: B,
    ctx: ActorContext,
    mailbox: mpsc::Receiver<Envelope>,
    control: mpsc::UnboundedReceiver<Control>,
    ready: oneshot::Sender<Result<(), String>>,
) -> std::io::Result<JoinHandle<Teardown>> {
    std::thread::Builder::new()
        .name(format!("halyard-{}", ctx.name()))
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    let _ = ready.send(Err(format!("cannot build actor runtime: {e}")));
                    let mut behavior = behavior;
                    return Box::new(move || behavior.teardown()) as Teardown;
                }
            };

            let mut behavior = rt.block_on(run(behavior, ctx, mailbox, control, ready));
            // Tasks an actor spawned on its domain (stdin readers, timers) die here
            rt.shutdown_background();
            Box::new(move || behavior.teardown()) as Teardown
        })
}

async fn run<B: Behavior>(
    mut behavior: B,
    ctx: ActorContext,
    mut mailbox: mpsc::Receiver<Envelope>,
    mut control: mpsc::UnboundedReceiver<Control>,
    ready: oneshot::Sender<Result<(), String>>,
) -> B {
    let init = init_guarded(&mut behavior, &ctx).await;
    let failed = init.is_err();
    let _ = ready.send(init);
    if failed {
        return behavior;
    }

    loop {
        tokio::select! {
            biased;

            command = control.recv() => match command {
                Some(Control::Restart(ack)) => {
                    tracing::info!(actor = %ctx.name(), "Restarting");
                    behavior.teardown();
                    let result = init_guarded(&mut behavior, &ctx).await;
                    if let Err(e) = &result {
                        tracing::error!(actor = %ctx.name(), error = %e, "Re-initialization failed");
                    }
                    let _ = ack.send(result);
                }
                Some(Control::Stop) | None => break,
            },

            envelope = mailbox.recv() => match envelope {
                Some(envelope) => behavior.handle(&ctx, envelope).await,
                None => break,
            },
        }
    }

    tracing::debug!(actor = %ctx.name(), "Domain stopped");
    behavior
}
