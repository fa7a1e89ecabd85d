//! The runtime: owns the registry, the topology and every actor's worker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::{Notify, mpsc, oneshot};

use halyard_config::{BotConfig, FilterConfig, InstanceConfig, RoutingConfig};
use halyard_core::{DeliveryError, Error, EventBus, Message, Result, RuntimeEvent, Version, ri};
use halyard_security::Auth;

use crate::actor::{Actor, Capability, Filter, LifecycleState};
use crate::catalog::Catalog;
use crate::context::ActorContext;
use crate::delivery::{CompletionToken, Envelope};
use crate::domain::{self, ActorBehavior, Behavior, Control, FilterBehavior};
use crate::registry::{ActorHandle, Registry};
use crate::routing::Topology;

type Settings = serde_json::Map<String, serde_json::Value>;

/// Runtime-wide settings.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    /// Prefix marking a chat line as a command
    pub command_prefix: String,
    /// Capacity of every actor's mailbox
    pub mailbox_capacity: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            command_prefix: "!".into(),
            mailbox_capacity: 1024,
        }
    }
}

impl From<&BotConfig> for RuntimeSettings {
    fn from(config: &BotConfig) -> Self {
        Self {
            command_prefix: config.command_prefix.clone(),
            mailbox_capacity: config.mailbox_capacity,
        }
    }
}

/// State shared by the runtime and every actor context.
pub(crate) struct Core {
    pub registry: Registry,
    pub topology: RwLock<Topology>,
    pub auth: Auth,
    pub events: EventBus,
    pub settings: RuntimeSettings,
    shutdown: Notify,
    shutdown_requested: AtomicBool,
}

fn lifecycle(actor: &str, reason: impl Into<String>) -> Error {
    Error::Lifecycle {
        actor: actor.to_string(),
        reason: reason.into(),
    }
}

impl Core {
    /// Queue `msg` on the actor named by the first segment of its target.
    pub fn post(&self, msg: Message, done: CompletionToken) -> std::result::Result<(), DeliveryError> {
        let name = ri::name(msg.target().unwrap_or_default()).to_string();
        let actor = self
            .registry
            .get(&name)
            .ok_or_else(|| DeliveryError::UnknownDestination(name.clone()))?;

        actor
            .mailbox
            .try_send(Envelope { msg, done })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => DeliveryError::MailboxFull(name),
                mpsc::error::TrySendError::Closed(_) => DeliveryError::ActorStopped(name),
            })
    }

    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
        self.shutdown.notify_one();
    }

    async fn spawn<B: Behavior>(
        self: &Arc<Self>,
        name: String,
        capability: Capability,
        behavior: B,
        settings: Settings,
    ) -> Result<()> {
        let settings = Arc::new(settings);
        let (mailbox_tx, mailbox_rx) = mpsc::channel(self.settings.mailbox_capacity.max(1));
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        let handle = Arc::new(ActorHandle::new(
            name.clone(),
            capability,
            settings.clone(),
            mailbox_tx,
            control_tx,
        ));
        let ctx = ActorContext::new(
            name.clone(),
            capability,
            settings,
            handle.replies.clone(),
            self.clone(),
        );
        self.registry.insert(handle.clone())?;

        let (ready_tx, ready_rx) = oneshot::channel();
        let worker = match domain::spawn(behavior, ctx, mailbox_rx, control_rx, ready_tx) {
            Ok(worker) => worker,
            Err(e) => {
                self.registry.remove(&name);
                return Err(Error::Internal(format!("cannot spawn worker for '{name}': {e}")));
            }
        };
        handle.attach_worker(worker);

        let init = ready_rx
            .await
            .unwrap_or_else(|_| Err("worker exited during init".into()));
        if let Err(reason) = init {
            self.registry.remove(&name);
            if let Some(worker) = handle.take_worker() {
                let _ = tokio::task::spawn_blocking(move || worker.join()).await;
            }
            handle.set_state(LifecycleState::Terminated);
            tracing::error!(actor = %name, error = %reason, "Initialization failed");
            return Err(lifecycle(&name, format!("init failed: {reason}")));
        }
        handle.set_state(LifecycleState::Initialized);

        tracing::info!(actor = %name, capability = %capability, "Actor started");
        self.events.publish(RuntimeEvent::ActorStarted {
            name: name.clone(),
            capability: capability.to_string(),
            timestamp: Utc::now(),
        });
        handle.set_state(LifecycleState::Running);
        Ok(())
    }

    pub async fn restart(&self, name: &str) -> Result<()> {
        let handle = self
            .registry
            .get(name)
            .ok_or_else(|| lifecycle(name, "not registered"))?;
        if handle.is_current_worker() {
            return Err(lifecycle(name, "an actor cannot restart itself"));
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        handle
            .control
            .send(Control::Restart(ack_tx))
            .map_err(|_| lifecycle(name, "worker is not running"))?;

        match ack_rx.await {
            Ok(Ok(())) => {
                handle.set_state(LifecycleState::Running);
                tracing::info!(actor = %name, "Actor restarted");
                Ok(())
            }
            Ok(Err(reason)) => Err(lifecycle(name, format!("re-init failed: {reason}"))),
            Err(_) => Err(lifecycle(name, "worker stopped during restart")),
        }
    }

    /// Unregister, stop the domain, join the worker, then run teardown.
    async fn stop(&self, name: &str) -> Result<()> {
        let handle = self
            .registry
            .get(name)
            .ok_or_else(|| lifecycle(name, "not registered"))?;
        if handle.is_current_worker() {
            return Err(lifecycle(
                name,
                "an actor cannot join its own worker, request a shutdown instead",
            ));
        }

        self.registry.remove(name);
        handle.set_state(LifecycleState::ShuttingDown);
        let _ = handle.control.send(Control::Stop);

        if let Some(worker) = handle.take_worker() {
            let joined = tokio::task::spawn_blocking(move || worker.join().map(|teardown| teardown())).await;
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(_)) => tracing::error!(actor = %name, "Worker panicked, teardown skipped"),
                Err(e) => tracing::error!(actor = %name, error = %e, "Teardown failed"),
            }
        }

        handle.set_state(LifecycleState::Terminated);
        tracing::info!(actor = %name, "Actor stopped");
        self.events.publish(RuntimeEvent::ActorStopped {
            name: name.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }
}

/// An embeddable actor runtime.
///
/// Cloning is cheap; clones share the same actors.
#[derive(Clone)]
pub struct Runtime {
    core: Arc<Core>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("actors", &self.core.registry.names(None))
            .field("settings", &self.core.settings)
            .finish()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(RuntimeSettings::default())
    }
}

impl Runtime {
    /// A runtime with auth disabled and no routing configured.
    pub fn new(settings: RuntimeSettings) -> Self {
        Self::with_auth(settings, Auth::new())
    }

    pub fn with_auth(settings: RuntimeSettings, auth: Auth) -> Self {
        Self {
            core: Arc::new(Core {
                registry: Registry::default(),
                topology: RwLock::new(Topology::default()),
                auth,
                events: EventBus::default(),
                settings,
                shutdown: Notify::new(),
                shutdown_requested: AtomicBool::new(false),
            }),
        }
    }

    /// Build a runtime from configuration: settings, filters, routing and,
    /// when `use_auth` is set, the grant table at `auth_path`.
    pub fn from_config(config: &BotConfig) -> Self {
        let auth = Auth::new();
        if config.use_auth {
            match auth.load_perms(&config.auth_path) {
                Ok(count) => tracing::info!(grants = count, "Permissions loaded"),
                Err(e) => tracing::error!(error = %e, "Error loading permissions, denying by default"),
            }
        }

        let runtime = Self::with_auth(RuntimeSettings::from(config), auth);
        *runtime.core.topology.write() = Topology::new(&config.filters, &config.routing);
        runtime
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.core.settings
    }

    pub fn auth(&self) -> &Auth {
        &self.core.auth
    }

    pub fn events(&self) -> &EventBus {
        &self.core.events
    }

    pub fn set_filters(&self, filters: &FilterConfig) {
        self.core.topology.write().set_filters(filters);
    }

    pub fn set_routing(&self, routing: &RoutingConfig) {
        self.core.topology.write().set_routing(routing);
    }

    /// Register a module and run its `init` on a fresh domain.
    pub async fn add_module<A: Actor>(&self, name: impl Into<String>, actor: A) -> Result<()> {
        self.add_module_with(name, actor, Settings::new()).await
    }

    pub async fn add_module_with<A: Actor>(
        &self,
        name: impl Into<String>,
        actor: A,
        settings: Settings,
    ) -> Result<()> {
        self.core
            .spawn(name.into(), Capability::Module, ActorBehavior::new(actor), settings)
            .await
    }

    /// Register an agent and run its `init` on a fresh domain.
    pub async fn add_agent<A: Actor>(&self, name: impl Into<String>, actor: A) -> Result<()> {
        self.add_agent_with(name, actor, Settings::new()).await
    }

    pub async fn add_agent_with<A: Actor>(
        &self,
        name: impl Into<String>,
        actor: A,
        settings: Settings,
    ) -> Result<()> {
        self.core
            .spawn(name.into(), Capability::Agent, ActorBehavior::new(actor), settings)
            .await
    }

    /// Register a filter and run its `init` on a fresh domain.
    pub async fn add_filter<F: Filter>(&self, name: impl Into<String>, filter: F) -> Result<()> {
        self.add_filter_with(name, filter, Settings::new()).await
    }

    pub async fn add_filter_with<F: Filter>(
        &self,
        name: impl Into<String>,
        filter: F,
        settings: Settings,
    ) -> Result<()> {
        self.core
            .spawn(name.into(), Capability::Filter, FilterBehavior::new(filter), settings)
            .await
    }

    /// A context acting as the named actor, for hosts and tests that need to
    /// send on an actor's behalf.
    pub fn context(&self, name: &str) -> Option<ActorContext> {
        self.core.registry.get(name).map(|h| {
            ActorContext::new(
                h.name.clone(),
                h.capability,
                h.settings.clone(),
                h.replies.clone(),
                self.core.clone(),
            )
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.core.registry.contains(name)
    }

    pub fn modules(&self) -> Vec<String> {
        self.core.registry.names(Some(Capability::Module))
    }

    pub fn agents(&self) -> Vec<String> {
        self.core.registry.names(Some(Capability::Agent))
    }

    pub fn filters(&self) -> Vec<String> {
        self.core.registry.names(Some(Capability::Filter))
    }

    pub fn state(&self, name: &str) -> Option<LifecycleState> {
        self.core.registry.get(name).map(|h| h.state())
    }

    /// Re-run an actor's `init` (after its `teardown`) without
    /// re-registering it.
    pub async fn restart(&self, name: &str) -> Result<()> {
        self.core.restart(name).await
    }

    /// Stop one actor. Mail still queued for it is dropped.
    pub async fn shutdown_actor(&self, name: &str) -> Result<()> {
        self.core.stop(name).await
    }

    /// Stop every actor: agents first, then modules, then filters.
    pub async fn shutdown(&self) {
        for capability in [Capability::Agent, Capability::Module, Capability::Filter] {
            for name in self.core.registry.names(Some(capability)) {
                if let Err(e) = self.core.stop(&name).await {
                    tracing::warn!(actor = %name, error = %e, "Could not stop actor");
                }
            }
        }
        tracing::info!("Runtime shut down");
    }

    /// Resolves once an actor has called
    /// [`ActorContext::request_shutdown`].
    pub async fn shutdown_requested(&self) {
        if self.core.shutdown_requested.load(Ordering::SeqCst) {
            return;
        }
        self.core.shutdown.notified().await;
    }

    /// Build and register one instance from the catalog.
    ///
    /// The descriptor must name a registered plugin whose version bounds
    /// accept the running core.
    pub async fn load_object(
        &self,
        catalog: &Catalog,
        name: &str,
        inst: InstanceConfig,
    ) -> Result<()> {
        let entry = catalog.resolve(&inst.of)?;
        if let Err(e) = entry.requirement.check(&inst.of, &Version::current()) {
            tracing::error!(instance = %name, error = %e, "Rejecting plugin");
            return Err(e);
        }
        (entry.build)(self, name.to_string(), inst).await
    }

    /// Instantiate everything in `config`: agents, modules, filters, then
    /// active containers. Failures are logged and skipped. Returns how many
    /// instances were loaded.
    pub async fn instantiate(&self, config: &BotConfig, catalog: &Catalog) -> usize {
        let mut containers: Vec<(String, InstanceConfig)> = config
            .routing
            .containers
            .iter()
            .filter_map(|(name, c)| {
                c.using.as_ref().map(|using| {
                    let inst = InstanceConfig::new(using.clone())
                        .with_setting("contents", c.contains.clone());
                    (name.clone(), inst)
                })
            })
            .collect();
        containers.sort_by(|a, b| a.0.cmp(&b.0));

        let instances = config
            .agent_instances
            .iter()
            .chain(&config.module_instances)
            .chain(&config.filter_instances)
            .map(|(name, inst)| (name.clone(), inst.clone()))
            .chain(containers);

        let mut loaded = 0;
        for (name, inst) in instances {
            match self.load_object(catalog, &name, inst).await {
                Ok(()) => loaded += 1,
                Err(e) => tracing::error!(instance = %name, error = %e, "Failed to load instance"),
            }
        }
        loaded
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;

    struct Idle;

    impl Actor for Idle {}

    /// Replies well after the sender stopped waiting.
    struct Slow;

    #[async_trait]
    impl Actor for Slow {
        async fn receive(&mut self, ctx: &ActorContext, msg: Message) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_millis(150)).await;
            ctx.reply(&msg, "late");
            Ok(())
        }
    }

    /// Passes everything on to `echo` without waiting.
    struct Relay;

    #[async_trait]
    impl Actor for Relay {
        async fn receive(&mut self, ctx: &ActorContext, msg: Message) -> anyhow::Result<()> {
            for (_, handle) in ctx.send_to(msg, &["echo"]) {
                handle.await;
            }
            Ok(())
        }
    }

    struct Echo;

    #[async_trait]
    impl Actor for Echo {
        async fn receive(&mut self, ctx: &ActorContext, msg: Message) -> anyhow::Result<()> {
            ctx.reply(&msg, "pong");
            Ok(())
        }
    }

    fn pending(runtime: &Runtime, name: &str) -> usize {
        runtime
            .core
            .registry
            .get(name)
            .map_or(0, |h| h.replies.len())
    }

    #[tokio::test]
    async fn timed_out_exchange_leaves_no_buffered_reply() {
        let runtime = Runtime::default();
        runtime.add_module("caller", Idle).await.unwrap();
        runtime.add_module("slow", Slow).await.unwrap();
        let caller = runtime.context("caller").unwrap();

        for _ in 0..3 {
            let replies = caller
                .sync_send_to_within(Message::new("q"), &["slow"], Duration::from_millis(20))
                .await
                .unwrap();
            assert!(replies.is_empty());
        }

        let mut drained = false;
        for _ in 0..100 {
            if pending(&runtime, "slow") == 0 {
                drained = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(drained, "late replies left behind: {}", pending(&runtime, "slow"));
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn relayed_sync_message_is_not_buffered_downstream() {
        let runtime = Runtime::default();
        runtime.add_module("caller", Idle).await.unwrap();
        runtime.add_module("relay", Relay).await.unwrap();
        runtime.add_module("echo", Echo).await.unwrap();
        let caller = runtime.context("caller").unwrap();

        for _ in 0..3 {
            let replies = caller
                .sync_send_to(Message::new("ping"), &["relay"])
                .await
                .unwrap();
            assert!(replies.is_empty());
        }

        assert_eq!(pending(&runtime, "echo"), 0);
        assert_eq!(pending(&runtime, "relay"), 0);
        runtime.shutdown().await;
    }
}
