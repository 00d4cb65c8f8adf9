use std::{
    cmp::Reverse,
    collections::{HashMap, HashSet},
    future::Future,
    panic::AssertUnwindSafe,
    sync::{Arc, RwLock},
};

use {
    async_trait::async_trait,
    futures::{FutureExt, future::BoxFuture},
    serde::Serialize,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
    valet_common::Message,
};

pub use valet_common::panic_message;

use crate::{
    error::{Error, Result},
    event::{Event, ListenerCategory},
    filter::ListenerFilter,
    matcher::{Compiled, Matcher},
};

// ── Listener trait ──────────────────────────────────────────────────────────

/// A callback invoked for events that pass its matcher and filter.
#[async_trait]
pub trait Listener: Send + Sync {
    async fn on_event(&self, event: &Event, cancel: &CancellationToken) -> anyhow::Result<()>;
}

type ListenerFn =
    dyn Fn(Event, CancellationToken) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;

/// Closure-backed [`Listener`].
pub struct FnListener(Box<ListenerFn>);

impl FnListener {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Event, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self(Box::new(move |event, cancel| Box::pin(f(event, cancel))))
    }
}

#[async_trait]
impl Listener for FnListener {
    async fn on_event(&self, event: &Event, cancel: &CancellationToken) -> anyhow::Result<()> {
        (self.0)(event.clone(), cancel.clone()).await
    }
}

// ── ListenerSpec ────────────────────────────────────────────────────────────

/// Registration parameters for one listener.
#[derive(Debug, Clone)]
pub struct ListenerSpec {
    pub category: ListenerCategory,
    pub name: String,
    pub owner: String,
    pub matcher: Matcher,
    pub priority: i32,
    /// `None` behaves like [`ListenerFilter::default`]: outgoing only.
    pub filter: Option<ListenerFilter>,
}

impl ListenerSpec {
    pub fn new(category: ListenerCategory, name: impl Into<String>) -> Self {
        Self {
            category,
            name: name.into(),
            owner: String::new(),
            matcher: Matcher::Any,
            priority: 0,
            filter: None,
        }
    }

    #[must_use]
    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    #[must_use]
    pub fn matcher(mut self, matcher: Matcher) -> Self {
        self.matcher = matcher;
        self
    }

    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn filter(mut self, filter: ListenerFilter) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// Snapshot of one registered listener, for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListenerInfo {
    pub category: ListenerCategory,
    pub name: String,
    pub owner: String,
    pub priority: i32,
}

/// Counts from a completed dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub invoked: usize,
    pub failed: usize,
}

struct Entry {
    name: String,
    owner: String,
    priority: i32,
    matcher: Compiled,
    filter: ListenerFilter,
    handler: Arc<dyn Listener>,
}

impl Entry {
    fn build(spec: ListenerSpec, handler: Arc<dyn Listener>) -> Result<Self> {
        let filter = spec.filter.unwrap_or_default();
        if let Some(reason) = filter.conflict() {
            return Err(Error::InvalidFilter {
                name: spec.name,
                reason,
            });
        }
        let matcher = match spec.matcher.compile() {
            Ok(m) => m,
            Err(source) => {
                return Err(Error::InvalidPattern {
                    name: spec.name,
                    source,
                });
            },
        };
        Ok(Self {
            name: spec.name,
            owner: spec.owner,
            priority: spec.priority,
            matcher,
            filter,
            handler,
        })
    }
}

// ── EventBus ────────────────────────────────────────────────────────────────

/// Per-category listener registries with priority-ordered dispatch.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<HashMap<ListenerCategory, Vec<Arc<Entry>>>>,
    privileged: RwLock<HashSet<i64>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. Names are unique within a category.
    pub fn register(&self, spec: ListenerSpec, handler: Arc<dyn Listener>) -> Result<()> {
        let category = spec.category;
        let entry = Arc::new(Entry::build(spec, handler)?);
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let list = listeners.entry(category).or_default();
        if list.iter().any(|e| e.name == entry.name) {
            return Err(Error::DuplicateName {
                category,
                name: entry.name.clone(),
            });
        }
        info!(category = %category, listener = %entry.name, owner = %entry.owner, priority = entry.priority, "listener registered");
        insert_sorted(list, entry);
        Ok(())
    }

    /// Register a closure listener.
    pub fn listen<F, Fut>(&self, spec: ListenerSpec, f: F) -> Result<()>
    where
        F: Fn(Event, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register(spec, Arc::new(FnListener::new(f)))
    }

    /// Swap in a listener under `spec.name`, replacing any existing one in a
    /// single write. Dispatches see either the old or the new listener.
    pub fn replace(&self, spec: ListenerSpec, handler: Arc<dyn Listener>) -> Result<bool> {
        let category = spec.category;
        let entry = Arc::new(Entry::build(spec, handler)?);
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let list = listeners.entry(category).or_default();
        let before = list.len();
        list.retain(|e| e.name != entry.name);
        let replaced = list.len() != before;
        debug!(category = %category, listener = %entry.name, replaced, "listener swapped");
        insert_sorted(list, entry);
        Ok(replaced)
    }

    /// Remove one listener. Returns false if it was not registered.
    pub fn unregister(&self, category: ListenerCategory, name: &str) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let Some(list) = listeners.get_mut(&category) else {
            return false;
        };
        let before = list.len();
        list.retain(|e| e.name != name);
        before != list.len()
    }

    /// Remove every listener owned by `owner`, across all categories.
    pub fn unregister_owner(&self, owner: &str) -> usize {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let mut removed = 0;
        for list in listeners.values_mut() {
            let before = list.len();
            list.retain(|e| e.owner != owner);
            removed += before - list.len();
        }
        if removed > 0 {
            debug!(owner, removed, "listeners unregistered");
        }
        removed
    }

    /// Drop every listener in every category. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let removed = listeners.values().map(Vec::len).sum();
        listeners.clear();
        removed
    }

    /// The category's listeners in dispatch order.
    pub fn listeners(&self, category: ListenerCategory) -> Vec<ListenerInfo> {
        self.snapshot(category)
            .iter()
            .map(|e| ListenerInfo {
                category,
                name: e.name.clone(),
                owner: e.owner.clone(),
                priority: e.priority,
            })
            .collect()
    }

    /// Senders whose messages count as privileged besides our own.
    pub fn set_privileged_users(&self, ids: impl IntoIterator<Item = i64>) {
        let mut set = self.privileged.write().unwrap_or_else(|e| e.into_inner());
        *set = ids.into_iter().collect();
    }

    pub fn is_privileged(&self, message: &Message) -> bool {
        message.outgoing
            || self
                .privileged
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .contains(&message.sender_id)
    }

    fn snapshot(&self, category: ListenerCategory) -> Vec<Arc<Entry>> {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&category)
            .cloned()
            .unwrap_or_default()
    }

    /// Route an event to its listeners.
    ///
    /// Message events reach every raw listener first (filter only), then the
    /// message listeners that match. Raw and command events reach only their
    /// own category. Listener failures are logged and skipped; the only
    /// error returned is [`Error::Cancelled`].
    pub async fn dispatch(
        &self,
        event: &Event,
        cancel: &CancellationToken,
    ) -> Result<DispatchSummary> {
        let privileged = event.message().is_some_and(|m| self.is_privileged(m));
        let mut summary = DispatchSummary::default();

        if matches!(event, Event::Message(_)) {
            self.run(ListenerCategory::Raw, event, privileged, cancel, &mut summary)
                .await?;
        }
        self.run(event.category(), event, privileged, cancel, &mut summary)
            .await?;
        Ok(summary)
    }

    async fn run(
        &self,
        category: ListenerCategory,
        event: &Event,
        privileged: bool,
        cancel: &CancellationToken,
        summary: &mut DispatchSummary,
    ) -> Result<()> {
        let match_text = category != ListenerCategory::Raw;
        for entry in self.snapshot(category) {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if let Some(message) = event.message()
                && !entry.filter.accepts(message, privileged)
            {
                continue;
            }
            if match_text && !entry.matcher.matches(event) {
                continue;
            }

            summary.invoked += 1;
            let outcome = AssertUnwindSafe(entry.handler.on_event(event, cancel))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => {},
                Ok(Err(e)) => {
                    summary.failed += 1;
                    warn!(category = %category, listener = %entry.name, error = %e, "listener failed");
                },
                Err(panic) => {
                    summary.failed += 1;
                    warn!(category = %category, listener = %entry.name, panic = %panic_message(&*panic), "listener panicked");
                },
            }
        }
        Ok(())
    }
}

fn insert_sorted(list: &mut Vec<Arc<Entry>>, entry: Arc<Entry>) {
    list.push(entry);
    list.sort_by_key(|e| Reverse(e.priority));
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use {
        super::*,
        crate::event::CommandEvent,
        valet_common::RawUpdate,
    };

    type Log = Arc<Mutex<Vec<String>>>;

    fn message(text: &str, outgoing: bool) -> Message {
        Message {
            id: 1,
            chat_id: 100,
            sender_id: 7,
            text: text.into(),
            outgoing,
            reply_to: None,
        }
    }

    fn recording(bus: &EventBus, log: &Log, spec: ListenerSpec) {
        let log = Arc::clone(log);
        let name = spec.name.clone();
        bus.listen(spec, move |_, _| {
            let log = Arc::clone(&log);
            let name = name.clone();
            async move {
                log.lock().unwrap().push(name);
                Ok(())
            }
        })
        .unwrap();
    }

    fn seen(log: &Log) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn higher_priority_runs_first_and_ties_keep_order() {
        let bus = EventBus::new();
        let log = Log::default();
        for (name, priority) in [("b", 5), ("a", 10), ("c", 5), ("z", -1)] {
            recording(&bus, &log, ListenerSpec::new(ListenerCategory::Message, name).priority(priority));
        }

        bus.dispatch(&Event::Message(message("x", true)), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(seen(&log), ["a", "b", "c", "z"]);
    }

    #[tokio::test]
    async fn raw_listeners_see_messages_before_message_listeners() {
        let bus = EventBus::new();
        let log = Log::default();
        recording(
            &bus,
            &log,
            ListenerSpec::new(ListenerCategory::Message, "msg").priority(100),
        );
        recording(
            &bus,
            &log,
            ListenerSpec::new(ListenerCategory::Raw, "raw")
                .priority(-100)
                .matcher(Matcher::Prefix("never".into())),
        );

        bus.dispatch(&Event::Message(message("hello", true)), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(seen(&log), ["raw", "msg"]);
    }

    #[tokio::test]
    async fn raw_updates_skip_message_listeners() {
        let bus = EventBus::new();
        let log = Log::default();
        recording(&bus, &log, ListenerSpec::new(ListenerCategory::Raw, "raw"));
        recording(&bus, &log, ListenerSpec::new(ListenerCategory::Message, "msg"));

        let update = Event::Raw(RawUpdate {
            kind: "user_status".into(),
            data: Default::default(),
        });
        let summary = bus.dispatch(&update, &CancellationToken::new()).await.unwrap();
        assert_eq!(summary.invoked, 1);
        assert_eq!(seen(&log), ["raw"]);
    }

    #[tokio::test]
    async fn default_filter_is_outgoing_only() {
        let bus = EventBus::new();
        let log = Log::default();
        recording(&bus, &log, ListenerSpec::new(ListenerCategory::Message, "self"));
        recording(
            &bus,
            &log,
            ListenerSpec::new(ListenerCategory::Message, "others").filter(ListenerFilter::incoming()),
        );

        let token = CancellationToken::new();
        bus.dispatch(&Event::Message(message("a", false)), &token).await.unwrap();
        bus.dispatch(&Event::Message(message("b", true)), &token).await.unwrap();
        assert_eq!(seen(&log), ["others", "self"]);
    }

    #[tokio::test]
    async fn privileged_filter_uses_configured_users() {
        let bus = EventBus::new();
        let log = Log::default();
        recording(
            &bus,
            &log,
            ListenerSpec::new(ListenerCategory::Message, "sudo")
                .filter(ListenerFilter::any_direction().privileged()),
        );
        let token = CancellationToken::new();
        let incoming = Event::Message(message("x", false));

        bus.dispatch(&incoming, &token).await.unwrap();
        assert!(seen(&log).is_empty());

        bus.set_privileged_users([7]);
        bus.dispatch(&incoming, &token).await.unwrap();
        assert_eq!(seen(&log), ["sudo"]);
    }

    #[tokio::test]
    async fn pattern_matcher_selects_messages() {
        let bus = EventBus::new();
        let log = Log::default();
        recording(
            &bus,
            &log,
            ListenerSpec::new(ListenerCategory::Message, "greet")
                .matcher(Matcher::Pattern("(?i)^hello".into())),
        );
        let token = CancellationToken::new();
        bus.dispatch(&Event::Message(message("HELLO there", true)), &token).await.unwrap();
        bus.dispatch(&Event::Message(message("say hello", true)), &token).await.unwrap();
        assert_eq!(seen(&log), ["greet"]);
    }

    #[tokio::test]
    async fn command_listeners_match_by_name() {
        let bus = EventBus::new();
        let log = Log::default();
        recording(
            &bus,
            &log,
            ListenerSpec::new(ListenerCategory::Command, "audit-echo")
                .matcher(Matcher::Command("echo".into())),
        );
        let event = |name: &str| {
            Event::Command(CommandEvent {
                name: name.into(),
                args: vec![],
                message: message(".x", true),
            })
        };
        let token = CancellationToken::new();
        bus.dispatch(&event("ping"), &token).await.unwrap();
        bus.dispatch(&event("echo"), &token).await.unwrap();
        assert_eq!(seen(&log), ["audit-echo"]);
    }

    #[test]
    fn duplicate_names_are_rejected_per_category() {
        let bus = EventBus::new();
        let noop = |_: Event, _: CancellationToken| async { Ok::<_, anyhow::Error>(()) };
        bus.listen(ListenerSpec::new(ListenerCategory::Message, "x").priority(1), noop)
            .unwrap();
        let err = bus
            .listen(ListenerSpec::new(ListenerCategory::Message, "x").priority(9), noop)
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateName { category: ListenerCategory::Message, .. }));

        let listed = bus.listeners(ListenerCategory::Message);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].priority, 1);

        bus.listen(ListenerSpec::new(ListenerCategory::Raw, "x"), noop)
            .unwrap();
    }

    #[test]
    fn invalid_registrations_do_not_mutate() {
        let bus = EventBus::new();
        let noop = |_: Event, _: CancellationToken| async { Ok::<_, anyhow::Error>(()) };
        let err = bus
            .listen(
                ListenerSpec::new(ListenerCategory::Message, "bad").matcher(Matcher::Pattern("[".into())),
                noop,
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPattern { .. }));

        let err = bus
            .listen(
                ListenerSpec::new(ListenerCategory::Message, "both")
                    .filter(ListenerFilter::default().groups().privates()),
                noop,
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidFilter { .. }));
        assert!(bus.listeners(ListenerCategory::Message).is_empty());
    }

    #[tokio::test]
    async fn failing_and_panicking_listeners_do_not_stop_dispatch() {
        let bus = EventBus::new();
        let log = Log::default();
        bus.listen(
            ListenerSpec::new(ListenerCategory::Message, "fails").priority(3),
            |_, _| async { anyhow::bail!("boom") },
        )
        .unwrap();
        bus.listen(
            ListenerSpec::new(ListenerCategory::Message, "panics").priority(2),
            |_, _| async { panic!("listener bug") },
        )
        .unwrap();
        recording(&bus, &log, ListenerSpec::new(ListenerCategory::Message, "ok").priority(1));

        let summary = bus
            .dispatch(&Event::Message(message("x", true)), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary, DispatchSummary { invoked: 3, failed: 2 });
        assert_eq!(seen(&log), ["ok"]);
    }

    #[tokio::test]
    async fn cancellation_mid_dispatch_stops_remaining_listeners() {
        let bus = EventBus::new();
        let log = Log::default();
        for i in 1..=5 {
            let log = Arc::clone(&log);
            bus.listen(
                ListenerSpec::new(ListenerCategory::Message, format!("l{i}")).priority(10 - i),
                move |_, cancel| {
                    let log = Arc::clone(&log);
                    async move {
                        log.lock().unwrap().push(format!("l{i}"));
                        if i == 2 {
                            cancel.cancel();
                        }
                        Ok(())
                    }
                },
            )
            .unwrap();
        }

        let err = bus
            .dispatch(&Event::Message(message("x", true)), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(seen(&log), ["l1", "l2"]);
    }

    #[tokio::test]
    async fn replace_swaps_atomically_and_unregister_owner_is_scoped() {
        let bus = EventBus::new();
        let log = Log::default();
        recording(&bus, &log, ListenerSpec::new(ListenerCategory::Message, "router").owner("core"));
        recording(&bus, &log, ListenerSpec::new(ListenerCategory::Raw, "tap").owner("spy"));
        recording(&bus, &log, ListenerSpec::new(ListenerCategory::Message, "echo").owner("spy"));

        let replaced = bus
            .replace(
                ListenerSpec::new(ListenerCategory::Message, "router").owner("core").priority(50),
                Arc::new(FnListener::new(|_, _| async { Ok(()) })),
            )
            .unwrap();
        assert!(replaced);
        assert_eq!(bus.listeners(ListenerCategory::Message)[0].priority, 50);

        assert_eq!(bus.unregister_owner("spy"), 2);
        assert!(bus.listeners(ListenerCategory::Raw).is_empty());
        let left = bus.listeners(ListenerCategory::Message);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].name, "router");
        assert!(bus.unregister(ListenerCategory::Message, "router"));
        assert!(!bus.unregister(ListenerCategory::Message, "router"));
    }

    #[test]
    fn clear_empties_every_category() {
        let bus = EventBus::new();
        let log = Log::default();
        recording(&bus, &log, ListenerSpec::new(ListenerCategory::Raw, "tap"));
        recording(&bus, &log, ListenerSpec::new(ListenerCategory::Message, "echo"));
        assert_eq!(bus.clear(), 2);
        assert_eq!(bus.clear(), 0);
        assert!(bus.listeners(ListenerCategory::Message).is_empty());
    }
}
