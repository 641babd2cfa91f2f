//! Event bus with a single dispatch queue

use super::events::{Event, EventKind, Message};
use crate::config::BusConfig;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Boxed subscriber callback
pub type EventHandler = Arc<dyn Fn(Event) -> BoxFuture<'static, crate::Result<()>> + Send + Sync>;

struct Registration {
    id: u64,
    subscriber_id: String,
    handler: EventHandler,
}

/// One unit of work: one event for one subscriber
struct DispatchJob {
    subscriber_id: String,
    handler: EventHandler,
    event: Event,
}

#[derive(Default)]
struct SessionState {
    started: bool,
    paused: bool,
    session_id: Option<String>,
    goal: Option<String>,
}

struct MessageLog {
    messages: VecDeque<Message>,
    total: usize,
}

struct BusInner {
    config: RwLock<BusConfig>,
    session: RwLock<SessionState>,
    log: Mutex<MessageLog>,
    subscribers: RwLock<HashMap<EventKind, Vec<Registration>>>,
    next_registration: AtomicU64,
    dispatch_tx: mpsc::UnboundedSender<DispatchJob>,
    dispatch_rx: Mutex<Option<mpsc::UnboundedReceiver<DispatchJob>>>,
}

/// Typed publish/subscribe hub shared by every component of a session.
///
/// Publishing never blocks and never fails: each matching subscriber gets its
/// own job on the dispatch queue, and the dispatcher starts every job as an
/// independent task without waiting for it. Until a session is started (and
/// while it is paused) only lifecycle events are delivered.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a new, inactive event bus
    pub fn new(config: BusConfig) -> Self {
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(BusInner {
                config: RwLock::new(config),
                session: RwLock::new(SessionState::default()),
                log: Mutex::new(MessageLog {
                    messages: VecDeque::new(),
                    total: 0,
                }),
                subscribers: RwLock::new(HashMap::new()),
                next_registration: AtomicU64::new(1),
                dispatch_tx,
                dispatch_rx: Mutex::new(Some(dispatch_rx)),
            }),
        }
    }

    /// Spawn the dispatcher task (can only be done once per bus).
    ///
    /// Jobs published before this call are buffered and delivered once the
    /// dispatcher runs. The task exits when the last bus handle is dropped.
    pub fn spawn_dispatcher(&self) -> Option<JoinHandle<()>> {
        let mut rx = self.inner.dispatch_rx.lock().take()?;
        Some(tokio::spawn(async move {
            debug!("Event dispatcher started");
            while let Some(job) = rx.recv().await {
                if let Some(task) = start_job(job) {
                    tokio::spawn(task);
                }
            }
            debug!("Event dispatcher stopped");
        }))
    }

    /// Register `handler` for every event of `kind`.
    ///
    /// The same subscriber id may register any number of handlers; each
    /// registration is removed independently through its [`Subscription`].
    pub fn subscribe<F, Fut>(
        &self,
        kind: EventKind,
        subscriber_id: impl Into<String>,
        handler: F,
    ) -> Subscription
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = crate::Result<()>> + Send + 'static,
    {
        let id = self.inner.next_registration.fetch_add(1, Ordering::Relaxed);
        let subscriber_id = subscriber_id.into();
        let handler: EventHandler = Arc::new(move |event| handler(event).boxed());

        debug!(subscriber = %subscriber_id, event = %kind, "Subscribed");
        self.inner
            .subscribers
            .write()
            .entry(kind)
            .or_default()
            .push(Registration {
                id,
                subscriber_id,
                handler,
            });

        Subscription {
            bus: Arc::downgrade(&self.inner),
            kind,
            id,
        }
    }

    /// Publish an event to every subscriber of its kind.
    ///
    /// Non-lifecycle events are silently dropped while no session is active.
    pub fn publish(&self, event: Event) {
        let kind = event.kind();
        if !kind.is_lifecycle() && !self.is_active() {
            debug!(event = %kind, "Bus inactive, dropping event");
            return;
        }

        let subscribers = self.inner.subscribers.read();
        let Some(registrations) = subscribers.get(&kind) else {
            debug!(event = %kind, "No subscribers");
            return;
        };

        for registration in registrations {
            let job = DispatchJob {
                subscriber_id: registration.subscriber_id.clone(),
                handler: Arc::clone(&registration.handler),
                event: event.clone(),
            };
            if self.inner.dispatch_tx.send(job).is_err() {
                warn!(event = %kind, "Dispatch queue closed");
                return;
            }
        }
    }

    /// Append a message to the log and announce it, using the speaker as source
    pub fn append_message(&self, message: Message) {
        let source_id = message.speaker_id.clone();
        self.append_message_from(source_id, message);
    }

    /// Append a message to the log and announce it on behalf of `source_id`
    pub fn append_message_from(&self, source_id: impl Into<String>, message: Message) {
        let trigger = self.inner.config.read().prune_trigger();
        {
            let mut log = self.inner.log.lock();
            log.messages.push_back(message.clone());
            log.total += 1;
            if log.messages.len() > trigger {
                let excess = log.messages.len() - trigger;
                log.messages.drain(..excess);
                debug!(pruned = excess, retained = trigger, "Pruned message log");
            }
        }

        self.publish(Event::MessageAppended {
            message,
            source_id: source_id.into(),
        });
    }

    /// The last `min(n, context_window)` messages, oldest first
    pub fn recent_messages(&self, n: usize) -> Vec<Message> {
        let window = self.inner.config.read().context_window;
        let log = self.inner.log.lock();
        let take = n.min(window).min(log.messages.len());
        log.messages
            .iter()
            .skip(log.messages.len() - take)
            .cloned()
            .collect()
    }

    /// Every retained message, oldest first
    pub fn message_log(&self) -> Vec<Message> {
        self.inner.log.lock().messages.iter().cloned().collect()
    }

    /// Number of messages ever appended in this session, including pruned ones
    pub fn total_message_count(&self) -> usize {
        self.inner.log.lock().total
    }

    /// Start a session: clears history and counters, then announces it
    pub fn start(&self, session_id: impl Into<String>, goal: impl Into<String>) {
        let session_id = session_id.into();
        let goal = goal.into();
        {
            let mut session = self.inner.session.write();
            session.started = true;
            session.paused = false;
            session.session_id = Some(session_id.clone());
            session.goal = Some(goal.clone());
        }
        {
            let mut log = self.inner.log.lock();
            log.messages.clear();
            log.total = 0;
        }

        info!(session_id = %session_id, "Session started");
        self.publish(Event::SessionStarted { session_id, goal });
    }

    /// Suspend delivery of non-lifecycle events
    pub fn pause(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.inner.session.write().paused = true;
        info!(reason = %reason, "Session paused");
        self.publish(Event::SessionPaused { reason });
    }

    /// Resume delivery after [`EventBus::pause`]
    pub fn resume(&self) {
        self.inner.session.write().paused = false;
        info!("Session resumed");
        self.publish(Event::SessionResumed);
    }

    /// End the session and drop every subscription.
    ///
    /// `session_ended` is still delivered to the subscribers registered at the
    /// time of the call. `start` must be called again before further use.
    pub fn stop(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.publish(Event::SessionEnded {
            reason: reason.clone(),
        });
        {
            let mut session = self.inner.session.write();
            session.started = false;
            session.paused = false;
        }
        self.inner.subscribers.write().clear();
        info!(reason = %reason, "Session ended");
    }

    /// Whether non-lifecycle events are currently delivered
    pub fn is_active(&self) -> bool {
        let session = self.inner.session.read();
        session.started && !session.paused
    }

    pub fn is_paused(&self) -> bool {
        self.inner.session.read().paused
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.session.read().session_id.clone()
    }

    pub fn goal(&self) -> Option<String> {
        self.inner.session.read().goal.clone()
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.inner
            .subscribers
            .read()
            .get(&kind)
            .map_or(0, |registrations| registrations.len())
    }

    pub fn config(&self) -> BusConfig {
        *self.inner.config.read()
    }

    /// Replace the bus configuration, pruning the log to the new trigger
    pub fn set_config(&self, config: BusConfig) {
        let trigger = config.prune_trigger();
        *self.inner.config.write() = config;

        let mut log = self.inner.log.lock();
        if log.messages.len() > trigger {
            let excess = log.messages.len() - trigger;
            log.messages.drain(..excess);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

/// Invoke the handler in dispatch order and return its future, guarded.
///
/// Handlers that do their ordering-sensitive work synchronously (before the
/// returned future is first polled) observe events in publish order.
fn start_job(job: DispatchJob) -> Option<impl std::future::Future<Output = ()> + Send> {
    let DispatchJob {
        subscriber_id,
        handler,
        event,
    } = job;
    let kind = event.kind();

    let future = match std::panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
        Ok(future) => future,
        Err(_) => {
            error!(subscriber = %subscriber_id, event = %kind, "Subscriber panicked");
            return None;
        }
    };

    Some(async move {
        match AssertUnwindSafe(future).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(subscriber = %subscriber_id, event = %kind, "Subscriber failed: {}", e)
            }
            Err(_) => error!(subscriber = %subscriber_id, event = %kind, "Subscriber panicked"),
        }
    })
}

/// Handle to a single subscription
#[derive(Debug)]
pub struct Subscription {
    bus: Weak<BusInner>,
    kind: EventKind,
    id: u64,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Remove exactly this registration. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        let Some(inner) = self.bus.upgrade() else {
            return false;
        };
        let mut subscribers = inner.subscribers.write();
        let Some(registrations) = subscribers.get_mut(&self.kind) else {
            return false;
        };
        let before = registrations.len();
        registrations.retain(|r| r.id != self.id);
        before != registrations.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::events::MessageKind;
    use std::time::Duration;
    use tokio::time::timeout;

    fn active_bus(config: BusConfig) -> EventBus {
        let bus = EventBus::new(config);
        bus.spawn_dispatcher();
        bus.start("s1", "decide on a name");
        bus
    }

    fn collector(
        bus: &EventBus,
        kind: EventKind,
        subscriber_id: &str,
    ) -> (Subscription, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sub = bus.subscribe(kind, subscriber_id, move |event| {
            let _ = tx.send(event);
            async { Ok(()) }
        });
        (sub, rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("event not delivered")
            .expect("channel closed")
    }

    fn explode() -> crate::Result<()> {
        panic!("handler bug")
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_bus_starts_inactive() {
        let bus = EventBus::default();
        assert!(!bus.is_active());
        assert!(bus.session_id().is_none());
    }

    #[tokio::test]
    async fn test_inactive_bus_drops_non_lifecycle() {
        let bus = EventBus::default();
        bus.spawn_dispatcher();
        let (_sub, mut granted) = collector(&bus, EventKind::FloorGranted, "t");
        let (_sub2, mut started) = collector(&bus, EventKind::SessionStarted, "t");

        bus.publish(Event::FloorGranted {
            speaker_id: "a".to_string(),
            reason: "x".to_string(),
        });
        bus.start("s1", "goal");

        assert!(matches!(next(&mut started).await, Event::SessionStarted { .. }));
        settle().await;
        assert!(granted.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_pause_blocks_until_resume() {
        let bus = active_bus(BusConfig::default());
        let (_sub, mut rx) = collector(&bus, EventKind::FloorDenied, "t");
        let denied = Event::FloorDenied {
            speaker_id: "a".to_string(),
            reason: crate::bus::DenyReason::Cooldown,
        };

        bus.pause("break");
        assert!(bus.is_paused());
        bus.publish(denied.clone());
        settle().await;
        assert!(rx.try_recv().is_err());

        bus.resume();
        bus.publish(denied.clone());
        assert_eq!(next(&mut rx).await, denied);
    }

    #[tokio::test]
    async fn test_multiple_handlers_same_subscriber() {
        let bus = active_bus(BusConfig::default());
        let (first, mut rx1) = collector(&bus, EventKind::SessionResumed, "same");
        let (_second, mut rx2) = collector(&bus, EventKind::SessionResumed, "same");
        assert_eq!(bus.subscriber_count(EventKind::SessionResumed), 2);

        assert!(first.unsubscribe());
        assert_eq!(bus.subscriber_count(EventKind::SessionResumed), 1);

        bus.resume();
        assert_eq!(next(&mut rx2).await, Event::SessionResumed);
        settle().await;
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failing_and_panicking_handlers_are_isolated() {
        let bus = active_bus(BusConfig::default());
        bus.subscribe(EventKind::SessionResumed, "failing", |_event| async move {
            Err::<(), _>(crate::Error::Internal("boom".to_string()))
        });
        bus.subscribe(EventKind::SessionResumed, "panicking", |_event| async move {
            explode()
        });
        bus.subscribe(EventKind::SessionResumed, "panicking-early", |_event| {
            futures::future::ready(explode())
        });
        let (_sub, mut rx) = collector(&bus, EventKind::SessionResumed, "healthy");

        bus.resume();
        assert_eq!(next(&mut rx).await, Event::SessionResumed);

        bus.resume();
        assert_eq!(next(&mut rx).await, Event::SessionResumed);
    }

    #[tokio::test]
    async fn test_same_kind_delivered_in_order() {
        let bus = active_bus(BusConfig::default());
        let (_sub, mut rx) = collector(&bus, EventKind::MessageAppended, "t");

        for i in 0..5 {
            bus.append_message(Message::new("a", MessageKind::Statement, format!("m{}", i)));
        }
        for i in 0..5 {
            match next(&mut rx).await {
                Event::MessageAppended { message, source_id } => {
                    assert_eq!(message.content, format!("m{}", i));
                    assert_eq!(source_id, "a");
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_message_log_bounded_total_tracked() {
        let bus = active_bus(BusConfig {
            max_messages: 10,
            prune_threshold: 1.0,
            context_window: 50,
        });

        for i in 0..25 {
            bus.append_message(Message::new("a", MessageKind::Statement, format!("m{}", i)));
        }

        assert_eq!(bus.total_message_count(), 25);
        let recent = bus.recent_messages(100);
        assert!(recent.len() <= 10);
        assert_eq!(recent.first().unwrap().content, "m15");
        assert_eq!(recent.last().unwrap().content, "m24");
        assert!(recent.iter().all(|m| m.content != "m14"));
    }

    #[tokio::test]
    async fn test_recent_messages_capped_by_context_window() {
        let bus = active_bus(BusConfig {
            max_messages: 100,
            prune_threshold: 1.0,
            context_window: 3,
        });
        assert!(bus.recent_messages(5).is_empty());

        for i in 0..6 {
            bus.append_message(Message::new("a", MessageKind::Statement, format!("m{}", i)));
        }
        assert_eq!(bus.recent_messages(2).len(), 2);
        assert_eq!(bus.recent_messages(10).len(), 3);
        assert_eq!(bus.message_log().len(), 6);
    }

    #[tokio::test]
    async fn test_start_resets_history() {
        let bus = active_bus(BusConfig::default());
        bus.append_message(Message::new("a", MessageKind::Statement, "one"));
        assert_eq!(bus.total_message_count(), 1);

        bus.start("s2", "second goal");
        assert_eq!(bus.total_message_count(), 0);
        assert!(bus.recent_messages(10).is_empty());
        assert_eq!(bus.session_id().as_deref(), Some("s2"));
        assert_eq!(bus.goal().as_deref(), Some("second goal"));
    }

    #[tokio::test]
    async fn test_stop_clears_subscriptions_after_announcing() {
        let bus = active_bus(BusConfig::default());
        let (_sub, mut ended) = collector(&bus, EventKind::SessionEnded, "t");

        bus.stop("done");
        assert!(matches!(next(&mut ended).await, Event::SessionEnded { .. }));
        assert_eq!(bus.subscriber_count(EventKind::SessionEnded), 0);
        assert!(!bus.is_active());
    }

    #[tokio::test]
    async fn test_set_config_prunes_log() {
        let bus = active_bus(BusConfig::default());
        for i in 0..20 {
            bus.append_message(Message::new("a", MessageKind::Statement, format!("m{}", i)));
        }
        bus.set_config(BusConfig {
            max_messages: 5,
            prune_threshold: 1.0,
            context_window: 50,
        });
        assert_eq!(bus.message_log().len(), 5);
        assert_eq!(bus.total_message_count(), 20);
    }
}
