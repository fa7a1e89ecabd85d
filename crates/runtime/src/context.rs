//! The handle an actor uses to talk to the rest of the system.
//!
//! An [`ActorContext`] is passed to every `init` and handler call. It knows
//! who the actor is, and carries the shared runtime so the actor can send,
//! reply, and wait for synchronous answers.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;

use halyard_config::string_list;
use halyard_core::{DeliveryError, Error, EventBus, Message, Result, RuntimeEvent, ri};
use halyard_security::Auth;

use crate::actor::Capability;
use crate::delivery::{CompletionToken, DeliveryHandle};
use crate::registry::ReplyBuffer;
use crate::routing::DEFAULT_CONTAINER;
use crate::runtime::Core;

/// Per-actor view of the runtime.
#[derive(Clone)]
pub struct ActorContext {
    name: String,
    capability: Capability,
    settings: Arc<serde_json::Map<String, serde_json::Value>>,
    replies: Arc<ReplyBuffer>,
    core: Arc<Core>,
}

impl fmt::Debug for ActorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorContext")
            .field("name", &self.name)
            .field("capability", &self.capability)
            .finish()
    }
}

impl ActorContext {
    pub(crate) fn new(
        name: String,
        capability: Capability,
        settings: Arc<serde_json::Map<String, serde_json::Value>>,
        replies: Arc<ReplyBuffer>,
        core: Arc<Core>,
    ) -> Self {
        Self {
            name,
            capability,
            settings,
            replies,
            core,
        }
    }

    /// Registration name of this actor.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    /// Instance settings, including `out` and `contents`.
    pub fn settings(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.settings
    }

    /// Fallback destinations configured with `out`.
    pub fn out(&self) -> Option<Vec<String>> {
        string_list(&self.settings, "out")
    }

    pub fn command_prefix(&self) -> &str {
        &self.core.settings.command_prefix
    }

    pub fn auth(&self) -> &Auth {
        &self.core.auth
    }

    pub fn events(&self) -> &EventBus {
        &self.core.events
    }

    /// Names of all registered modules.
    pub fn modules(&self) -> Vec<String> {
        self.core.registry.names(Some(Capability::Module))
    }

    /// Names of all registered agents.
    pub fn agents(&self) -> Vec<String> {
        self.core.registry.names(Some(Capability::Agent))
    }

    /// Deliver `msg` to every destination.
    ///
    /// The origin defaults to this actor. Each destination is expanded
    /// through containers, routed through the configured filters and queued
    /// on the receiver's domain. Destinations that cannot be reached are
    /// logged and skipped; the rest are still served. The returned handles
    /// are keyed by the expanded destination RI.
    ///
    /// Nobody waits on the result, so a relayed synchronous message goes
    /// out as an ordinary one and its receivers reply to the origin.
    pub fn send_to<S: AsRef<str>>(
        &self,
        msg: Message,
        dests: &[S],
    ) -> HashMap<String, DeliveryHandle> {
        let mut msg = self.with_default_origin(msg);
        msg.sync = false;
        let expanded = self.expand(dests);
        self.deliver(msg, expanded)
    }

    /// Send to the configured `out` destinations, falling back to the
    /// message's origin.
    pub fn send(&self, msg: Message) -> HashMap<String, DeliveryHandle> {
        let dests = self
            .out()
            .or_else(|| msg.origin().map(|o| vec![o.to_string()]))
            .unwrap_or_default();
        if dests.is_empty() {
            tracing::warn!(actor = %self.name, message = %msg.uuid, "Nowhere to send: no 'out' setting and no origin");
        }
        self.send_to(msg, &dests)
    }

    /// Inject inbound traffic from an agent.
    ///
    /// Destinations are the first routing rule matching the origin, else the
    /// agent's `out` setting, else the `default` container.
    pub fn dispatch(&self, msg: Message) -> HashMap<String, DeliveryHandle> {
        let msg = self.with_default_origin(msg);
        let routed = msg
            .origin()
            .and_then(|origin| self.core.topology.read().route(origin));
        let dests = routed
            .or_else(|| self.out())
            .unwrap_or_else(|| vec![DEFAULT_CONTAINER.to_string()]);
        self.send_to(msg, &dests)
    }

    /// Single-hop delivery to `msg.target`, bypassing routing and filters.
    pub fn raw_send(&self, msg: Message) -> Result<DeliveryHandle> {
        require_addressing(&msg)?;
        let (token, handle) = DeliveryHandle::pair();
        self.core.post(msg, token)?;
        Ok(handle)
    }

    /// Reply to `to` with a new body.
    ///
    /// If the sender is waiting synchronously the reply is buffered for it;
    /// otherwise it is sent to the original origin.
    pub fn reply(
        &self,
        to: &Message,
        body: impl Into<serde_json::Value>,
    ) -> HashMap<String, DeliveryHandle> {
        let reply = to.with_body(body);
        if to.sync {
            self.replies.push(reply);
            return HashMap::new();
        }
        match to.origin() {
            Some(origin) => {
                let origin = origin.to_string();
                self.send_to(reply, &[origin])
            }
            None => {
                tracing::warn!(actor = %self.name, message = %to.uuid, "Cannot reply: message has no origin");
                HashMap::new()
            }
        }
    }

    /// Send `msg` and wait until every destination has handled it, then
    /// collect what each one replied.
    ///
    /// Destinations that did not reply have no entry. Waiting blocks this
    /// actor's domain, so targeting this actor (directly or through a
    /// container) is rejected with [`Error::SyncSelfDeadlock`].
    pub async fn sync_send_to<S: AsRef<str>>(
        &self,
        msg: Message,
        dests: &[S],
    ) -> Result<HashMap<String, Vec<Message>>> {
        self.exchange(msg, dests, None).await
    }

    /// Like [`ActorContext::sync_send_to`], but stops waiting after
    /// `timeout`. Destinations that have not finished by then have no entry.
    pub async fn sync_send_to_within<S: AsRef<str>>(
        &self,
        msg: Message,
        dests: &[S],
        timeout: Duration,
    ) -> Result<HashMap<String, Vec<Message>>> {
        self.exchange(msg, dests, Some(Instant::now() + timeout))
            .await
    }

    /// Restart another actor: teardown, then init on its own domain.
    pub async fn restart(&self, name: &str) -> Result<()> {
        self.core.restart(name).await
    }

    /// Ask the host to shut the runtime down.
    pub fn request_shutdown(&self) {
        tracing::info!(actor = %self.name, "Shutdown requested");
        self.core.request_shutdown();
    }

    async fn exchange<S: AsRef<str>>(
        &self,
        msg: Message,
        dests: &[S],
        deadline: Option<Instant>,
    ) -> Result<HashMap<String, Vec<Message>>> {
        let deadlock = || Error::SyncSelfDeadlock {
            actor: self.name.clone(),
        };
        if dests.iter().any(|d| ri::name(d.as_ref()) == self.name) {
            return Err(deadlock());
        }
        let expanded = self.expand(dests);
        if expanded.iter().any(|d| ri::name(d) == self.name) {
            return Err(deadlock());
        }

        let mut msg = self.with_default_origin(msg);
        msg.sync = true;
        let uuid = msg.uuid;
        let handles = self.deliver(msg, expanded);

        let mut replies = HashMap::new();
        for (dest, mut handle) in handles {
            let callee = self.core.registry.get(ri::name(&dest));
            match deadline {
                None => {
                    (&mut handle).await;
                }
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                        tracing::warn!(actor = %self.name, destination = %dest, "Gave up waiting for synchronous reply");
                        // Late replies are discarded once the callee is done
                        if let Some(callee) = callee {
                            tokio::spawn(async move {
                                handle.await;
                                callee.replies.take(&uuid);
                            });
                        }
                        continue;
                    }
                }
            }
            if let Some(answers) = callee.and_then(|callee| callee.replies.take(&uuid)) {
                replies.insert(dest, answers);
            }
        }
        Ok(replies)
    }

    fn with_default_origin(&self, mut msg: Message) -> Message {
        if msg.origin().is_none() {
            msg.origin = Some(self.name.clone());
        }
        msg
    }

    fn expand<S: AsRef<str>>(&self, dests: &[S]) -> Vec<String> {
        let topology = self.core.topology.read();
        dests
            .iter()
            .flat_map(|d| topology.expand(d.as_ref(), &self.core.registry))
            .collect()
    }

    fn deliver(&self, msg: Message, dests: Vec<String>) -> HashMap<String, DeliveryHandle> {
        let routes: Vec<(String, String)> = {
            let topology = self.core.topology.read();
            dests
                .into_iter()
                .map(|dest| {
                    let hops = topology.filter_path(&self.name, &dest);
                    let target = ri::prefixed(&hops, &dest);
                    (dest, target)
                })
                .collect()
        };

        let mut handles = HashMap::with_capacity(routes.len());
        for (dest, target) in routes {
            let (token, handle) = DeliveryHandle::pair();
            match self.core.post(msg.clone().with_target(target), token) {
                Ok(()) => {
                    handles.insert(dest, handle);
                }
                Err(e) => self.delivery_failed(&e),
            }
        }
        handles
    }

    /// Pass a filtered message on to the rest of its path, keeping the
    /// original completion token.
    pub(crate) fn forward(&self, msg: Message, done: CompletionToken) {
        if let Err(e) = require_addressing(&msg) {
            tracing::error!(filter = %self.name, error = %e, "Cannot forward filtered message");
            return;
        }
        if let Err(e) = self.core.post(msg, done) {
            self.delivery_failed(&e);
        }
    }

    fn delivery_failed(&self, e: &DeliveryError) {
        tracing::warn!(sender = %self.name, destination = %e.destination(), error = %e, "Delivery failed");
        self.core.events.publish(RuntimeEvent::DeliveryFailed {
            sender: self.name.clone(),
            destination: e.destination().to_string(),
            reason: e.to_string(),
            timestamp: Utc::now(),
        });
    }
}

fn require_addressing(msg: &Message) -> Result<()> {
    let malformed = |field| Error::MalformedMessage {
        uuid: msg.uuid.to_string(),
        field,
    };
    msg.target().ok_or_else(|| malformed("target"))?;
    msg.origin().ok_or_else(|| malformed("origin"))?;
    Ok(())
}
