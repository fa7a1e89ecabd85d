//! Name → actor registry with capability-filtered views.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use uuid::Uuid;

use halyard_core::{Error, Message, Result};

use crate::actor::{Capability, LifecycleState};
use crate::delivery::Envelope;
use crate::domain::{Control, Teardown};

/// Replies buffered by an actor for in-flight synchronous messages.
#[derive(Debug, Default)]
pub(crate) struct ReplyBuffer {
    pending: Mutex<HashMap<Uuid, Vec<Message>>>,
}

impl ReplyBuffer {
    pub fn push(&self, msg: Message) {
        self.pending.lock().entry(msg.uuid).or_default().push(msg);
    }

    pub fn take(&self, uuid: &Uuid) -> Option<Vec<Message>> {
        self.pending.lock().remove(uuid)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }
}

/// Runtime-side handle of a registered actor.
#[derive(Debug)]
pub(crate) struct ActorHandle {
    pub name: String,
    pub capability: Capability,
    pub settings: Arc<serde_json::Map<String, serde_json::Value>>,
    pub mailbox: mpsc::Sender<Envelope>,
    pub control: mpsc::UnboundedSender<Control>,
    pub replies: Arc<ReplyBuffer>,
    state: Mutex<LifecycleState>,
    worker: Mutex<Option<JoinHandle<Teardown>>>,
}

impl ActorHandle {
    pub fn new(
        name: String,
        capability: Capability,
        settings: Arc<serde_json::Map<String, serde_json::Value>>,
        mailbox: mpsc::Sender<Envelope>,
        control: mpsc::UnboundedSender<Control>,
    ) -> Self {
        Self {
            name,
            capability,
            settings,
            mailbox,
            control,
            replies: Arc::new(ReplyBuffer::default()),
            state: Mutex::new(LifecycleState::Created),
            worker: Mutex::new(None),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: LifecycleState) {
        *self.state.lock() = state;
    }

    pub fn attach_worker(&self, worker: JoinHandle<Teardown>) {
        *self.worker.lock() = Some(worker);
    }

    pub fn take_worker(&self) -> Option<JoinHandle<Teardown>> {
        self.worker.lock().take()
    }

    /// Whether the calling thread is this actor's worker.
    pub fn is_current_worker(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|w| w.thread().id() == std::thread::current().id())
    }
}

/// All registered actors.
///
/// Mutation is expected from a single control path (instantiation, restart,
/// shutdown). The lock only keeps concurrent lookups memory-safe.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    actors: RwLock<HashMap<String, Arc<ActorHandle>>>,
}

impl Registry {
    pub fn insert(&self, handle: Arc<ActorHandle>) -> Result<()> {
        let mut actors = self.actors.write();
        if actors.contains_key(&handle.name) {
            return Err(Error::DuplicateActor(handle.name.clone()));
        }
        actors.insert(handle.name.clone(), handle);
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Option<Arc<ActorHandle>> {
        self.actors.write().remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<ActorHandle>> {
        self.actors.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actors.read().contains_key(name)
    }

    /// Sorted names of actors with the given capability, or of all actors.
    pub fn names(&self, capability: Option<Capability>) -> Vec<String> {
        let mut names: Vec<String> = self
            .actors
            .read()
            .values()
            .filter(|h| capability.is_none_or(|c| h.capability == c))
            .map(|h| h.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.actors.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(name: &str, capability: Capability) -> Arc<ActorHandle> {
        let (tx, _rx) = mpsc::channel(1);
        let (ctl, _ctl_rx) = mpsc::unbounded_channel();
        Arc::new(ActorHandle::new(
            name.into(),
            capability,
            Default::default(),
            tx,
            ctl,
        ))
    }

    #[test]
    fn names_are_unique() {
        let registry = Registry::default();
        registry.insert(handle("hello", Capability::Module)).unwrap();
        let err = registry
            .insert(handle("hello", Capability::Agent))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateActor(name) if name == "hello"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn capability_views() {
        let registry = Registry::default();
        registry.insert(handle("irc", Capability::Agent)).unwrap();
        registry.insert(handle("quote", Capability::Module)).unwrap();
        registry.insert(handle("hello", Capability::Module)).unwrap();
        registry.insert(handle("caps", Capability::Filter)).unwrap();

        assert_eq!(registry.names(Some(Capability::Module)), vec!["hello", "quote"]);
        assert_eq!(registry.names(Some(Capability::Agent)), vec!["irc"]);
        assert_eq!(registry.names(Some(Capability::Filter)), vec!["caps"]);
        assert_eq!(registry.names(None).len(), 4);
    }

    #[test]
    fn remove_unregisters() {
        let registry = Registry::default();
        registry.insert(handle("gone", Capability::Module)).unwrap();
        assert!(registry.remove("gone").is_some());
        assert!(!registry.contains("gone"));
        assert!(registry.remove("gone").is_none());
    }

    #[test]
    fn reply_buffer_accumulates_per_uuid() {
        let buffer = ReplyBuffer::default();
        let msg = Message::new("q");
        buffer.push(msg.with_body("a"));
        buffer.push(msg.with_body("b"));
        buffer.push(Message::new("other"));

        let replies = buffer.take(&msg.uuid).unwrap();
        assert_eq!(replies.len(), 2);
        assert!(buffer.take(&msg.uuid).is_none());
    }

    #[test]
    fn new_handle_starts_created() {
        let h = handle("x", Capability::Module);
        assert_eq!(h.state(), LifecycleState::Created);
        h.set_state(LifecycleState::Running);
        assert_eq!(h.state(), LifecycleState::Running);
        assert!(!h.is_current_worker());
    }
}
