//! Integration tests for the Halyard actor runtime.
//!
//! These tests run real actors on real worker threads and observe them
//! through shared inboxes and the runtime event stream.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast;

use halyard_config::{BotConfig, ContainerConfig, FilterConfig, InstanceConfig, RouteRule, RoutingConfig};
use halyard_core::RuntimeEvent;
use halyard_runtime::{
    Actor, ActorContext, Capability, Catalog, DeliveryOutcome, Error, Filter, Guard, Handlers,
    LifecycleState, Message, PERMISSION_DENIED, Plugin, Runtime, RuntimeSettings, Topics,
    async_trait,
};
use halyard_security::Auth;

// ── Helpers ──────────────────────────────────────────────────────────────

/// Shared record of what an actor received.
#[derive(Clone, Default)]
struct Inbox(Arc<std::sync::Mutex<Vec<Message>>>);

impl Inbox {
    fn push(&self, msg: Message) {
        self.0.lock().unwrap().push(msg);
    }

    fn bodies(&self) -> Vec<String> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.body_str().unwrap_or_default().to_string())
            .collect()
    }

    fn messages(&self) -> Vec<Message> {
        self.0.lock().unwrap().clone()
    }

    fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

/// Poll `cond` for up to two seconds.
async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

/// Wait for the first event matching `pred`.
async fn next_event(
    rx: &mut broadcast::Receiver<Arc<RuntimeEvent>>,
    pred: impl Fn(&RuntimeEvent) -> bool,
) -> Option<Arc<RuntimeEvent>> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Ok(event)) if pred(event.as_ref()) => return Some(event),
            Ok(Ok(_)) | Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            _ => return None,
        }
    }
}

/// Records every message it receives.
struct Recorder {
    inbox: Inbox,
}

impl Recorder {
    fn new() -> (Self, Inbox) {
        let inbox = Inbox::default();
        (
            Self {
                inbox: inbox.clone(),
            },
            inbox,
        )
    }
}

#[async_trait]
impl Actor for Recorder {
    async fn receive(&mut self, _ctx: &ActorContext, msg: Message) -> anyhow::Result<()> {
        self.inbox.push(msg);
        Ok(())
    }
}

/// Replies with the received body plus a suffix.
struct Appender {
    suffix: &'static str,
}

#[async_trait]
impl Actor for Appender {
    async fn receive(&mut self, ctx: &ActorContext, msg: Message) -> anyhow::Result<()> {
        let body = format!("{}{}", msg.body_str().unwrap_or_default(), self.suffix);
        ctx.reply(&msg, body);
        Ok(())
    }
}

/// Fails on "explode", panics on "panic", records everything else.
struct Volatile {
    inbox: Inbox,
}

#[async_trait]
impl Actor for Volatile {
    async fn receive(&mut self, _ctx: &ActorContext, msg: Message) -> anyhow::Result<()> {
        match msg.body_str() {
            Some("explode") => anyhow::bail!("exploded on request"),
            Some("panic") => panic!("panicked on request"),
            _ => {
                self.inbox.push(msg);
                Ok(())
            }
        }
    }
}

/// Blocks its own thread for a while on every message.
struct Blocker {
    started: Arc<AtomicUsize>,
    finished: Arc<AtomicUsize>,
    block: Duration,
}

#[async_trait]
impl Actor for Blocker {
    async fn receive(&mut self, _ctx: &ActorContext, _msg: Message) -> anyhow::Result<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.block);
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn blocker(block: Duration) -> (Blocker, Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let started = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicUsize::new(0));
    (
        Blocker {
            started: started.clone(),
            finished: finished.clone(),
            block,
        },
        started,
        finished,
    )
}

/// Appends "X" to every body passing through.
struct AppendX;

#[async_trait]
impl Filter for AppendX {
    async fn filter(&mut self, _ctx: &ActorContext, msg: Message) -> Option<Message> {
        let body = format!("{}X", msg.body_str().unwrap_or_default());
        Some(msg.with_body(body))
    }
}

/// Drops everything.
struct DropAll;

#[async_trait]
impl Filter for DropAll {
    async fn filter(&mut self, _ctx: &ActorContext, _msg: Message) -> Option<Message> {
        None
    }
}

async fn with_tester(runtime: &Runtime) -> (ActorContext, Inbox) {
    let (tester, inbox) = Recorder::new();
    runtime.add_agent("tester", tester).await.unwrap();
    (runtime.context("tester").unwrap(), inbox)
}

// ── Delivery ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn send_to_skips_unknown_destinations() {
    let runtime = Runtime::default();
    let mut events = runtime.events().subscribe();
    let (a, inbox_a) = Recorder::new();
    let (b, inbox_b) = Recorder::new();
    runtime.add_module("a", a).await.unwrap();
    runtime.add_module("b", b).await.unwrap();
    let (tester, _) = with_tester(&runtime).await;

    let handles = tester.send_to(Message::new("hi"), &["a", "ghost", "b/sub"]);
    assert_eq!(handles.len(), 2);
    for (_, handle) in handles {
        assert_eq!(handle.await, DeliveryOutcome::Handled);
    }

    assert_eq!(inbox_a.bodies(), vec!["hi"]);
    let got = inbox_b.messages();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].target(), Some("b/sub"));
    assert_eq!(got[0].whom(), "sub");
    assert_eq!(got[0].origin(), Some("tester"));

    let failed = next_event(&mut events, |e| matches!(e, RuntimeEvent::DeliveryFailed { .. })).await;
    match failed.as_deref() {
        Some(RuntimeEvent::DeliveryFailed { destination, .. }) => assert_eq!(destination, "ghost"),
        other => panic!("Expected DeliveryFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn origin_is_kept_across_relays() {
    let runtime = Runtime::default();
    let (rec, inbox) = Recorder::new();
    runtime.add_module("rec", rec).await.unwrap();
    let (tester, _) = with_tester(&runtime).await;

    let msg = Message::new("hi").with_origin("irc/#chan");
    for (_, h) in tester.send_to(msg, &["rec"]) {
        h.await;
    }
    assert_eq!(inbox.messages()[0].origin(), Some("irc/#chan"));
}

#[tokio::test]
async fn round_trip_reply_reaches_sender() {
    let runtime = Runtime::default();
    runtime
        .add_module("appender", Appender { suffix: "bar" })
        .await
        .unwrap();
    let (tester, inbox) = with_tester(&runtime).await;

    let _ = tester.send_to(Message::new("foo"), &["appender"]);

    assert!(wait_until(|| inbox.len() == 1).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(inbox.bodies(), vec!["foobar"]);
}

#[tokio::test]
async fn raw_send_requires_addressing() {
    let runtime = Runtime::default();
    let (rec, _) = Recorder::new();
    runtime.add_module("rec", rec).await.unwrap();
    let (tester, _) = with_tester(&runtime).await;

    let err = tester
        .raw_send(Message::new("x").with_target("rec"))
        .unwrap_err();
    assert!(matches!(err, Error::MalformedMessage { field: "origin", .. }));

    let err = tester
        .raw_send(Message::new("x").with_origin("tester"))
        .unwrap_err();
    assert!(matches!(err, Error::MalformedMessage { field: "target", .. }));

    let handle = tester
        .raw_send(Message::new("x").with_origin("tester").with_target("rec"))
        .unwrap();
    assert_eq!(handle.await, DeliveryOutcome::Handled);
}

#[tokio::test]
async fn full_mailbox_is_a_per_destination_failure() {
    let runtime = Runtime::new(RuntimeSettings {
        mailbox_capacity: 1,
        ..Default::default()
    });
    let (slow, started, _) = blocker(Duration::from_millis(300));
    runtime.add_module("slow", slow).await.unwrap();
    let (rec, inbox) = Recorder::new();
    runtime.add_module("rec", rec).await.unwrap();
    let (tester, _) = with_tester(&runtime).await;

    let _ = tester.send_to(Message::new("1"), &["slow"]);
    assert!(wait_until(|| started.load(Ordering::SeqCst) == 1).await);
    let queued = tester.send_to(Message::new("2"), &["slow"]);
    assert_eq!(queued.len(), 1);

    let handles = tester.send_to(Message::new("3"), &["slow", "rec"]);
    assert!(!handles.contains_key("slow"));
    assert!(handles.contains_key("rec"));
    assert!(wait_until(|| inbox.len() == 1).await);
}

#[tokio::test]
async fn blocking_handler_does_not_starve_siblings() {
    let runtime = Runtime::default();
    let (slow, started, finished) = blocker(Duration::from_millis(500));
    runtime.add_module("slow", slow).await.unwrap();
    let (rec, inbox) = Recorder::new();
    runtime.add_module("rec", rec).await.unwrap();
    let (tester, _) = with_tester(&runtime).await;

    let _ = tester.send_to(Message::new("block"), &["slow"]);
    assert!(wait_until(|| started.load(Ordering::SeqCst) == 1).await);
    let _ = tester.send_to(Message::new("quick"), &["rec"]);

    assert!(wait_until(|| inbox.len() == 1).await);
    assert_eq!(finished.load(Ordering::SeqCst), 0);
}

// ── Failure isolation ────────────────────────────────────────────────────

#[tokio::test]
async fn handler_error_does_not_kill_the_actor() {
    let runtime = Runtime::default();
    let mut events = runtime.events().subscribe();
    let inbox = Inbox::default();
    runtime
        .add_module("volatile", Volatile { inbox: inbox.clone() })
        .await
        .unwrap();
    let (tester, _) = with_tester(&runtime).await;

    for (_, h) in tester.send_to(Message::new("explode"), &["volatile"]) {
        assert_eq!(h.await, DeliveryOutcome::Handled);
    }
    for (_, h) in tester.send_to(Message::new("foo"), &["volatile"]) {
        assert_eq!(h.await, DeliveryOutcome::Handled);
    }
    assert_eq!(inbox.bodies(), vec!["foo"]);

    let failed = next_event(&mut events, |e| matches!(e, RuntimeEvent::HandlerFailed { .. })).await;
    match failed.as_deref() {
        Some(RuntimeEvent::HandlerFailed { actor, error, kind, .. }) => {
            assert_eq!(actor, "volatile");
            assert_eq!(kind, "simple");
            assert!(error.contains("exploded on request"));
        }
        other => panic!("Expected HandlerFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn handler_panic_does_not_kill_the_actor() {
    let runtime = Runtime::default();
    let inbox = Inbox::default();
    runtime
        .add_module("volatile", Volatile { inbox: inbox.clone() })
        .await
        .unwrap();
    let (tester, _) = with_tester(&runtime).await;

    for body in ["panic", "foo", "panic", "bar"] {
        for (_, h) in tester.send_to(Message::new(body), &["volatile"]) {
            h.await;
        }
    }
    assert_eq!(inbox.bodies(), vec!["foo", "bar"]);
    assert_eq!(runtime.state("volatile"), Some(LifecycleState::Running));
}

// ── Synchronous replies ──────────────────────────────────────────────────

#[tokio::test]
async fn sync_send_collects_only_actual_replies() {
    let runtime = Runtime::default();
    runtime
        .add_module("echo", Appender { suffix: "bar" })
        .await
        .unwrap();
    let (quiet, quiet_inbox) = Recorder::new();
    runtime.add_module("quiet", quiet).await.unwrap();
    let (tester, tester_inbox) = with_tester(&runtime).await;

    let replies = tester
        .sync_send_to(Message::new("foo"), &["echo", "quiet", "ghost"])
        .await
        .unwrap();

    assert_eq!(replies.len(), 1);
    let echo = &replies["echo"];
    assert_eq!(echo.len(), 1);
    assert_eq!(echo[0].body_str(), Some("foobar"));
    assert_eq!(quiet_inbox.len(), 1);
    assert!(quiet_inbox.messages()[0].sync);

    // Buffered replies are not also routed to the sender
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(tester_inbox.len(), 0);
}

#[tokio::test]
async fn sync_send_to_self_is_rejected() {
    let mut routing = RoutingConfig::default();
    routing.containers.insert(
        "everyone".into(),
        ContainerConfig {
            contains: vec!["tester".into(), "other".into()],
            using: None,
        },
    );
    let runtime = Runtime::default();
    runtime.set_routing(&routing);
    let (other, other_inbox) = Recorder::new();
    runtime.add_module("other", other).await.unwrap();
    let (tester, _) = with_tester(&runtime).await;

    for dests in [vec!["tester"], vec!["tester/sub"], vec!["other", "tester"], vec!["everyone"]] {
        let err = tester
            .sync_send_to(Message::new("q"), &dests)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SyncSelfDeadlock { ref actor } if actor == "tester"));
    }
    // Rejection happens before anything is delivered
    assert_eq!(other_inbox.len(), 0);
}

#[tokio::test]
async fn sync_send_to_default_container_from_a_module_is_rejected() {
    let runtime = Runtime::default();
    let (m, _) = Recorder::new();
    runtime.add_module("m", m).await.unwrap();
    let ctx = runtime.context("m").unwrap();

    let err = ctx
        .sync_send_to(Message::new("q"), &["default"])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SyncSelfDeadlock { .. }));
}

struct SlowReplier;

#[async_trait]
impl Actor for SlowReplier {
    async fn receive(&mut self, ctx: &ActorContext, msg: Message) -> anyhow::Result<()> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        ctx.reply(&msg, "late");
        Ok(())
    }
}

#[tokio::test]
async fn sync_send_within_gives_up_on_slow_callees() {
    let runtime = Runtime::default();
    runtime.add_module("slow", SlowReplier).await.unwrap();
    runtime
        .add_module("fast", Appender { suffix: "!" })
        .await
        .unwrap();
    let (tester, _) = with_tester(&runtime).await;

    let replies = tester
        .sync_send_to_within(Message::new("q"), &["slow", "fast"], Duration::from_millis(100))
        .await
        .unwrap();
    assert!(!replies.contains_key("slow"));
    assert_eq!(replies["fast"][0].body_str(), Some("q!"));

    let replies = tester
        .sync_send_to(Message::new("q"), &["slow"])
        .await
        .unwrap();
    assert_eq!(replies["slow"][0].body_str(), Some("late"));
}

// ── Routing, containers, filters ─────────────────────────────────────────

#[tokio::test]
async fn passive_container_preserves_suffix() {
    let mut routing = RoutingConfig::default();
    routing.containers.insert(
        "container".into(),
        ContainerConfig {
            contains: vec!["a".into(), "b".into()],
            using: None,
        },
    );
    let runtime = Runtime::default();
    runtime.set_routing(&routing);
    let (a, inbox_a) = Recorder::new();
    let (b, inbox_b) = Recorder::new();
    runtime.add_module("a", a).await.unwrap();
    runtime.add_module("b", b).await.unwrap();
    let (tester, _) = with_tester(&runtime).await;

    let handles = tester.send_to(Message::new("hi"), &["container/x"]);
    let mut keys: Vec<&String> = handles.keys().collect();
    keys.sort();
    assert_eq!(keys, vec!["a/x", "b/x"]);
    for (_, h) in handles {
        h.await;
    }

    assert_eq!(inbox_a.messages()[0].target(), Some("a/x"));
    assert_eq!(inbox_b.messages()[0].target(), Some("b/x"));
}

#[tokio::test]
async fn dispatch_prefers_rule_then_out_then_default() {
    let routing = RoutingConfig {
        table: vec![RouteRule {
            pattern: "tester".into(),
            destinations: vec!["one".into()],
        }],
        ..Default::default()
    };
    let runtime = Runtime::default();
    runtime.set_routing(&routing);
    let (one, inbox_one) = Recorder::new();
    let (two, inbox_two) = Recorder::new();
    runtime.add_module("one", one).await.unwrap();
    runtime.add_module("two", two).await.unwrap();
    let (tester, _) = with_tester(&runtime).await;

    let (with_out, _) = Recorder::new();
    let mut settings = serde_json::Map::new();
    settings.insert("out".into(), json!(["two"]));
    runtime
        .add_agent_with("configured", with_out, settings)
        .await
        .unwrap();
    let (bare, _) = Recorder::new();
    runtime.add_agent("bare", bare).await.unwrap();

    for (_, h) in tester.dispatch(Message::new("routed")) {
        h.await;
    }
    for (_, h) in runtime.context("configured").unwrap().dispatch(Message::new("out")) {
        h.await;
    }
    for (_, h) in runtime.context("bare").unwrap().dispatch(Message::new("everyone")) {
        h.await;
    }

    assert_eq!(inbox_one.bodies(), vec!["routed", "everyone"]);
    assert_eq!(inbox_two.bodies(), vec!["out", "everyone"]);
}

#[tokio::test]
async fn outbound_filter_rewrites_replies() {
    let runtime = Runtime::default();
    let mut filters = FilterConfig::default();
    filters.outbound.insert("m".into(), vec!["fx".into()]);
    runtime.set_filters(&filters);
    runtime.add_filter("fx", AppendX).await.unwrap();
    runtime.add_module("m", Appender { suffix: "bar" }).await.unwrap();
    let (tester, inbox) = with_tester(&runtime).await;

    let _ = tester.send_to(Message::new("foo"), &["m"]);

    assert!(wait_until(|| inbox.len() == 1).await);
    let got = inbox.messages();
    assert_eq!(got[0].body_str(), Some("foobarX"));
    assert_eq!(got[0].target(), Some("tester"));
}

#[tokio::test]
async fn inbound_filter_chain_is_transparent() {
    let runtime = Runtime::default();
    let mut filters = FilterConfig::default();
    filters
        .inbound
        .insert("rec".into(), vec!["f1".into(), "f2".into()]);
    runtime.set_filters(&filters);
    runtime.add_filter("f1", AppendX).await.unwrap();
    runtime.add_filter("f2", AppendX).await.unwrap();
    let (rec, inbox) = Recorder::new();
    runtime.add_module("rec", rec).await.unwrap();
    let (tester, _) = with_tester(&runtime).await;

    let handles = tester.send_to(Message::new("foo"), &["rec/#chan"]);
    // Keyed by the logical destination, resolved at the final hop
    for (dest, h) in handles {
        assert_eq!(dest, "rec/#chan");
        assert_eq!(h.await, DeliveryOutcome::Handled);
    }

    let got = inbox.messages();
    assert_eq!(got[0].body_str(), Some("fooXX"));
    assert_eq!(got[0].target(), Some("rec/#chan"));
    assert_eq!(got[0].origin(), Some("tester"));
}

#[tokio::test]
async fn filter_drop_is_silent() {
    let runtime = Runtime::default();
    let mut events = runtime.events().subscribe();
    let mut filters = FilterConfig::default();
    filters.inbound.insert("rec".into(), vec!["dropper".into()]);
    runtime.set_filters(&filters);
    runtime.add_filter("dropper", DropAll).await.unwrap();
    let (rec, inbox) = Recorder::new();
    runtime.add_module("rec", rec).await.unwrap();
    let (tester, _) = with_tester(&runtime).await;

    for (_, h) in tester.send_to(Message::new("foo"), &["rec"]) {
        assert_eq!(h.await, DeliveryOutcome::Dropped);
    }
    assert_eq!(inbox.len(), 0);
    assert!(
        next_event(&mut events, |e| matches!(e, RuntimeEvent::MessageDropped { filter, .. } if filter == "dropper"))
            .await
            .is_some()
    );
}

// ── Handlers and help ────────────────────────────────────────────────────

struct Typed {
    inbox: Inbox,
    topics: Topics,
}

impl Typed {
    async fn on_ping(&mut self, ctx: &ActorContext, msg: Message) -> anyhow::Result<()> {
        ctx.reply(&msg, "pong");
        Ok(())
    }
}

#[async_trait]
impl Actor for Typed {
    async fn receive(&mut self, _ctx: &ActorContext, msg: Message) -> anyhow::Result<()> {
        self.inbox.push(msg);
        Ok(())
    }

    fn handlers(&self) -> Handlers<Self> {
        Handlers::<Self>::new().on("ping", |this, ctx, msg| Box::pin(this.on_ping(ctx, msg)))
    }

    fn topics(&self) -> Option<&Topics> {
        Some(&self.topics)
    }
}

#[tokio::test]
async fn typed_handlers_and_builtin_help() {
    let runtime = Runtime::default();
    let inbox = Inbox::default();
    let typed = Typed {
        inbox: inbox.clone(),
        topics: Topics::new()
            .text("typed", "Answers pings")
            .dynamic("clock", || "always noon".to_string()),
    };
    runtime.add_module("typed", typed).await.unwrap();
    let (tester, _) = with_tester(&runtime).await;

    let replies = tester
        .sync_send_to(Message::new("").with_kind("ping"), &["typed"])
        .await
        .unwrap();
    assert_eq!(replies["typed"][0].body_str(), Some("pong"));

    let replies = tester
        .sync_send_to(Message::new(json!([])).with_kind("help"), &["typed"])
        .await
        .unwrap();
    assert_eq!(replies["typed"][0].body, json!(["typed", "clock"]));

    let replies = tester
        .sync_send_to(Message::new(json!(["clock"])).with_kind("help"), &["typed"])
        .await
        .unwrap();
    assert_eq!(replies["typed"][0].body_str(), Some("always noon"));

    let replies = tester
        .sync_send_to(Message::new(json!(["nope"])).with_kind("help"), &["typed"])
        .await
        .unwrap();
    assert!(replies.is_empty());

    // Neither ping nor help reached the generic receiver
    for (_, h) in tester.send_to(Message::new("plain"), &["typed"]) {
        h.await;
    }
    assert_eq!(inbox.bodies(), vec!["plain"]);
}

// ── Permission guard ─────────────────────────────────────────────────────

struct Guarded {
    guard: Guard,
    allowed: Inbox,
}

#[async_trait]
impl Actor for Guarded {
    async fn receive(&mut self, ctx: &ActorContext, msg: Message) -> anyhow::Result<()> {
        if self.guard.check(ctx, &msg)? {
            self.allowed.push(msg);
        }
        Ok(())
    }
}

#[tokio::test]
async fn guard_enforces_triple_scoped_grants() {
    let auth = Auth::with_grants([("tester", "alice", "ADMIN")]);
    let runtime = Runtime::with_auth(RuntimeSettings::default(), auth);
    let mut events = runtime.events().subscribe();
    let allowed = Inbox::default();
    runtime
        .add_module(
            "admin",
            Guarded {
                guard: Guard::new("ADMIN").reply(true),
                allowed: allowed.clone(),
            },
        )
        .await
        .unwrap();
    let (tester, tester_inbox) = with_tester(&runtime).await;

    for (_, h) in tester.send_to(Message::new("as alice").with_identity("alice"), &["admin"]) {
        h.await;
    }
    for (_, h) in tester.send_to(Message::new("as bob").with_identity("bob"), &["admin"]) {
        h.await;
    }

    assert_eq!(allowed.bodies(), vec!["as alice"]);
    assert!(wait_until(|| tester_inbox.len() == 1).await);
    assert_eq!(tester_inbox.bodies(), vec![PERMISSION_DENIED]);

    let denied = next_event(&mut events, |e| matches!(e, RuntimeEvent::PermissionDenied { .. })).await;
    match denied.as_deref() {
        Some(RuntimeEvent::PermissionDenied { identity, permission, .. }) => {
            assert_eq!(identity, "bob");
            assert_eq!(permission, "ADMIN");
        }
        other => panic!("Expected PermissionDenied, got {other:?}"),
    }
}

#[tokio::test]
async fn guard_defaults_when_auth_disabled() {
    let runtime = Runtime::default();
    let open = Inbox::default();
    let strict = Inbox::default();
    runtime
        .add_module(
            "open",
            Guarded {
                guard: Guard::new("ADMIN"),
                allowed: open.clone(),
            },
        )
        .await
        .unwrap();
    runtime
        .add_module(
            "strict",
            Guarded {
                guard: Guard::new("ADMIN").permissive(false),
                allowed: strict.clone(),
            },
        )
        .await
        .unwrap();
    let (tester, tester_inbox) = with_tester(&runtime).await;

    // No identity at all is treated as blank, not an error
    for (_, h) in tester.send_to(Message::new("hi"), &["open", "strict"]) {
        h.await;
    }
    assert_eq!(open.len(), 1);
    assert_eq!(strict.len(), 0);
    // Silent guard: no denial reply
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(tester_inbox.len(), 0);
}

// ── Lifecycle ────────────────────────────────────────────────────────────

struct Lifecycle {
    journal: Arc<std::sync::Mutex<Vec<String>>>,
    fail_init: Arc<AtomicBool>,
}

impl Lifecycle {
    fn note(&self, entry: &str) {
        self.journal.lock().unwrap().push(entry.to_string());
    }
}

#[async_trait]
impl Actor for Lifecycle {
    async fn init(&mut self, _ctx: &ActorContext) -> anyhow::Result<()> {
        self.note("init");
        if self.fail_init.load(Ordering::SeqCst) {
            anyhow::bail!("refusing to start");
        }
        Ok(())
    }

    async fn receive(&mut self, _ctx: &ActorContext, msg: Message) -> anyhow::Result<()> {
        self.note("start");
        if msg.body_str() == Some("slow") {
            std::thread::sleep(Duration::from_millis(200));
        }
        self.note("handled");
        Ok(())
    }

    fn teardown(&mut self) {
        self.note("teardown");
    }
}

fn lifecycle() -> (Lifecycle, Arc<std::sync::Mutex<Vec<String>>>, Arc<AtomicBool>) {
    let journal = Arc::new(std::sync::Mutex::new(Vec::new()));
    let fail_init = Arc::new(AtomicBool::new(false));
    (
        Lifecycle {
            journal: journal.clone(),
            fail_init: fail_init.clone(),
        },
        journal,
        fail_init,
    )
}

#[tokio::test]
async fn restart_reruns_init_without_reregistering() {
    let runtime = Runtime::default();
    let (actor, journal, _) = lifecycle();
    runtime.add_module("life", actor).await.unwrap();
    assert_eq!(runtime.state("life"), Some(LifecycleState::Running));

    runtime.restart("life").await.unwrap();
    assert_eq!(*journal.lock().unwrap(), vec!["init", "teardown", "init"]);
    assert_eq!(runtime.modules(), vec!["life"]);
}

#[tokio::test]
async fn failed_restart_is_reported() {
    let runtime = Runtime::default();
    let (actor, _, fail_init) = lifecycle();
    runtime.add_module("life", actor).await.unwrap();

    fail_init.store(true, Ordering::SeqCst);
    let err = runtime.restart("life").await.unwrap_err();
    assert!(err.to_string().contains("refusing to start"));
}

#[tokio::test]
async fn shutdown_joins_before_teardown_and_drops_queued_mail() {
    let runtime = Runtime::default();
    let mut events = runtime.events().subscribe();
    let (actor, journal, _) = lifecycle();
    runtime.add_module("life", actor).await.unwrap();
    let (tester, _) = with_tester(&runtime).await;

    let _ = tester.send_to(Message::new("slow"), &["life"]);
    let journal_ref = journal.clone();
    assert!(wait_until(|| journal_ref.lock().unwrap().contains(&"start".to_string())).await);
    let queued: Vec<_> = tester
        .send_to(Message::new("never"), &["life"])
        .into_values()
        .collect();

    runtime.shutdown_actor("life").await.unwrap();

    assert_eq!(
        *journal.lock().unwrap(),
        vec!["init", "start", "handled", "teardown"]
    );
    for h in queued {
        assert_eq!(h.await, DeliveryOutcome::Dropped);
    }
    assert!(!runtime.contains("life"));
    assert!(tester.send_to(Message::new("late"), &["life"]).is_empty());
    assert!(
        next_event(&mut events, |e| matches!(e, RuntimeEvent::ActorStopped { name, .. } if name == "life"))
            .await
            .is_some()
    );
}

#[tokio::test]
async fn failed_init_unregisters() {
    let runtime = Runtime::default();
    let (actor, journal, fail_init) = lifecycle();
    fail_init.store(true, Ordering::SeqCst);

    let err = runtime.add_module("life", actor).await.unwrap_err();
    assert!(matches!(err, Error::Lifecycle { .. }));
    assert!(!runtime.contains("life"));
    assert_eq!(*journal.lock().unwrap(), vec!["init"]);
}

#[tokio::test]
async fn duplicate_names_are_rejected() {
    let runtime = Runtime::default();
    let (first, _) = Recorder::new();
    let (second, _) = Recorder::new();
    runtime.add_module("dup", first).await.unwrap();

    let err = runtime.add_agent("dup", second).await.unwrap_err();
    assert!(matches!(err, Error::DuplicateActor(ref name) if name == "dup"));
    assert_eq!(runtime.modules(), vec!["dup"]);
    assert!(runtime.agents().is_empty());
}

struct SelfStopper {
    runtime: Runtime,
    outcome: Inbox,
}

#[async_trait]
impl Actor for SelfStopper {
    async fn receive(&mut self, ctx: &ActorContext, msg: Message) -> anyhow::Result<()> {
        let result = self.runtime.shutdown_actor(ctx.name()).await;
        self.outcome.push(msg.with_body(format!("{}", result.is_err())));
        ctx.request_shutdown();
        Ok(())
    }
}

#[tokio::test]
async fn actors_cannot_join_themselves_but_can_request_shutdown() {
    let runtime = Runtime::default();
    let outcome = Inbox::default();
    runtime
        .add_module(
            "stopper",
            SelfStopper {
                runtime: runtime.clone(),
                outcome: outcome.clone(),
            },
        )
        .await
        .unwrap();
    let (tester, _) = with_tester(&runtime).await;

    for (_, h) in tester.send_to(Message::new("stop"), &["stopper"]) {
        h.await;
    }
    assert_eq!(outcome.bodies(), vec!["true"]);

    tokio::time::timeout(Duration::from_secs(2), runtime.shutdown_requested())
        .await
        .expect("shutdown was requested");
    runtime.shutdown().await;
    assert!(runtime.modules().is_empty());
    assert!(runtime.agents().is_empty());
}

// ── Catalog and instantiation ────────────────────────────────────────────

struct Modern;

impl Plugin for Modern {
    const MINIMUM_CORE: Option<&'static str> = Some("999.0");

    fn from_config(_: &serde_json::Map<String, serde_json::Value>) -> anyhow::Result<Self> {
        Ok(Self)
    }
}

#[async_trait]
impl Actor for Modern {}

struct Ancient;

impl Plugin for Ancient {
    const MINIMUM_CORE: Option<&'static str> = Some("0.0.1");
    const MAXIMUM_CORE: Option<&'static str> = Some("0.0.2");

    fn from_config(_: &serde_json::Map<String, serde_json::Value>) -> anyhow::Result<Self> {
        Ok(Self)
    }
}

#[async_trait]
impl Actor for Ancient {}

/// Echo module whose reply suffix comes from its settings.
struct Configured {
    suffix: String,
}

impl Plugin for Configured {
    const MINIMUM_CORE: Option<&'static str> = Some("0.1");

    fn from_config(settings: &serde_json::Map<String, serde_json::Value>) -> anyhow::Result<Self> {
        let suffix = settings
            .get("suffix")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing 'suffix'"))?;
        Ok(Self {
            suffix: suffix.to_string(),
        })
    }
}

#[async_trait]
impl Actor for Configured {
    async fn receive(&mut self, ctx: &ActorContext, msg: Message) -> anyhow::Result<()> {
        ctx.reply(&msg, format!("{}{}", msg.body_str().unwrap_or_default(), self.suffix));
        Ok(())
    }
}

impl Plugin for AppendX {
    fn from_config(_: &serde_json::Map<String, serde_json::Value>) -> anyhow::Result<Self> {
        Ok(Self)
    }
}

fn catalog() -> Catalog {
    let mut catalog = Catalog::new();
    catalog
        .register_module::<Modern>("future:Modern")
        .register_module::<Ancient>("past:Ancient")
        .register_module::<Configured>("echo:Configured")
        .register_agent::<Configured>("echo:ConfiguredAgent")
        .register_filter::<AppendX>("filters:AppendX");
    catalog
}

#[tokio::test]
async fn load_object_checks_descriptor_and_version() {
    let runtime = Runtime::default();
    let catalog = catalog();

    let err = runtime
        .load_object(&catalog, "m", InstanceConfig::new("future:Modern"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::VersionIncompatibility { bound: "minimum", .. }));

    let err = runtime
        .load_object(&catalog, "m", InstanceConfig::new("past:Ancient"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::VersionIncompatibility { bound: "maximum", .. }));

    let err = runtime
        .load_object(&catalog, "m", InstanceConfig::new("nowhere:Nothing"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownPlugin(_)));

    let err = runtime
        .load_object(&catalog, "m", InstanceConfig::new("no-colon"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidDescriptor(_)));

    let err = runtime
        .load_object(&catalog, "m", InstanceConfig::new("echo:Configured"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("missing 'suffix'"));

    assert!(runtime.modules().is_empty());

    runtime
        .load_object(
            &catalog,
            "m",
            InstanceConfig::new("echo:Configured").with_setting("suffix", "!"),
        )
        .await
        .unwrap();
    assert_eq!(runtime.modules(), vec!["m"]);
}

#[tokio::test]
async fn instantiate_loads_config_and_skips_failures() {
    let toml = r#"
        [agent_instances.front]
        of = "echo:ConfiguredAgent"
        suffix = "?"

        [module_instances.echo]
        of = "echo:Configured"
        suffix = "bar"

        [module_instances.broken]
        of = "future:Modern"

        [filter_instances.fx]
        of = "filters:AppendX"

        [filters.outbound]
        echo = ["fx"]
    "#;
    let config: BotConfig = toml::from_str(toml).unwrap();
    let runtime = Runtime::from_config(&config);

    let loaded = runtime.instantiate(&config, &catalog()).await;
    assert_eq!(loaded, 3);
    assert_eq!(runtime.agents(), vec!["front"]);
    assert_eq!(runtime.modules(), vec!["echo"]);
    assert_eq!(runtime.filters(), vec!["fx"]);
    assert_eq!(
        runtime.context("echo").unwrap().capability(),
        Capability::Module
    );

    let (tester, inbox) = with_tester(&runtime).await;
    let _ = tester.send_to(Message::new("foo"), &["echo"]);
    assert!(wait_until(|| inbox.len() == 1).await);
    assert_eq!(inbox.bodies(), vec!["foobarX"]);
}

#[tokio::test]
async fn from_config_loads_permissions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("permissions.json");
    std::fs::write(&path, r#"[["irc/.*", "alice", "ADMIN"]]"#).unwrap();

    let config = BotConfig {
        use_auth: true,
        auth_path: path,
        ..Default::default()
    };
    let runtime = Runtime::from_config(&config);

    assert!(runtime.auth().is_enabled());
    assert!(runtime.auth().has_permission("irc/#ops", "alice", "ADMIN", false));
    assert!(!runtime.auth().has_permission("irc/#ops", "bob", "ADMIN", true));
}
