//! ARO Events - Pub/Sub Event Bus
//!
//! In-process event bus with string-tag dispatch, state-guarded
//! subscriptions, and in-flight tracking for quiescence detection.
//!
//! Each subscription owns a mailbox drained by a dedicated worker task,
//! so publication order from a single publisher is preserved per
//! subscription while distinct subscriptions run concurrently. Handler
//! futures are spawned onto the runtime's worker pool; a panicking
//! handler never takes the bus down or reaches the publisher.

use aro_core::{Event, StateGuardSet};
use futures_util::future::BoxFuture;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// A subscription's handler closure.
pub type EventHandler = Arc<dyn Fn(Event) -> BoxFuture<'static, ()> + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`], usable for unsubscribing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

struct Dispatch {
    event: Event,
    tracked: bool,
}

struct Subscription {
    id: SubscriptionId,
    tag: String,
    guards: StateGuardSet,
    sender: mpsc::UnboundedSender<Dispatch>,
}

#[derive(Default)]
struct TrackingState {
    in_flight: usize,
    waiters: Vec<oneshot::Sender<()>>,
}

/// Process-wide pub/sub bus; `Clone` shares the same bus.
#[derive(Clone)]
pub struct EventBus {
    subscriptions: Arc<RwLock<Vec<Subscription>>>,
    tracking: Arc<Mutex<TrackingState>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscriptions: Arc::new(RwLock::new(Vec::new())),
            tracking: Arc::new(Mutex::new(TrackingState::default())),
        }
    }

    /// Subscribe a handler to an event type-tag, filtered by guards.
    ///
    /// Must be called from within a tokio runtime; the subscription's
    /// worker task is spawned immediately and lives until unsubscribe
    /// or bus drop.
    pub fn subscribe(
        &self,
        tag: impl Into<String>,
        guards: StateGuardSet,
        handler: EventHandler,
    ) -> SubscriptionId {
        let id = SubscriptionId(Uuid::new_v4());
        let (sender, receiver) = mpsc::unbounded_channel();

        let subscription = Subscription {
            id,
            tag: tag.into(),
            guards,
            sender,
        };

        let tracking = self.tracking.clone();
        tokio::spawn(run_worker(receiver, handler, tracking));

        self.subscriptions
            .write()
            .expect("subscription lock poisoned")
            .push(subscription);
        id
    }

    /// Remove a subscription. Events already enqueued still run.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscriptions
            .write()
            .expect("subscription lock poisoned")
            .retain(|s| s.id != id);
    }

    /// Fan an event out to all matching subscriptions without tracking.
    pub fn publish(&self, event: Event) {
        self.dispatch(event, false);
    }

    /// Fan an event out and count each dispatched handler as in-flight
    /// until it completes.
    pub fn publish_and_track(&self, event: Event) {
        self.dispatch(event, true);
    }

    fn dispatch(&self, event: Event, tracked: bool) {
        let payload = event.payload();
        let tag = event.type_tag();

        let subscriptions = self
            .subscriptions
            .read()
            .expect("subscription lock poisoned");
        let matching: Vec<&Subscription> = subscriptions
            .iter()
            .filter(|s| s.tag == tag && s.guards.matches(&payload))
            .collect();

        if matching.is_empty() {
            return;
        }

        if tracked {
            // Count before enqueueing so the counter can never read zero
            // while a matched handler has yet to run.
            let mut state = self.tracking.lock().expect("tracking lock poisoned");
            state.in_flight += matching.len();
        }

        for subscription in matching {
            let dispatch = Dispatch {
                event: event.clone(),
                tracked,
            };
            if subscription.sender.send(dispatch).is_err() && tracked {
                // Worker already gone; undo its share of the count.
                finish_one(&self.tracking);
            }
        }
    }

    /// Current number of dispatched-but-unfinished handlers.
    pub fn in_flight(&self) -> usize {
        self.tracking
            .lock()
            .expect("tracking lock poisoned")
            .in_flight
    }

    /// Wait until all tracked handlers have completed.
    ///
    /// The counter check and waiter registration happen inside one
    /// critical section, so a handler finishing between the two cannot
    /// strand the waiter. Returns `false` when the timeout elapses
    /// first; in-flight handlers keep running either way.
    pub async fn await_pending_events(&self, timeout: std::time::Duration) -> bool {
        let receiver = {
            let mut state = self.tracking.lock().expect("tracking lock poisoned");
            if state.in_flight == 0 {
                return true;
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push(tx);
            rx
        };

        tokio::time::timeout(timeout, receiver).await.is_ok()
    }

}

/// Drain one subscription's mailbox, running handlers sequentially.
async fn run_worker(
    mut receiver: mpsc::UnboundedReceiver<Dispatch>,
    handler: EventHandler,
    tracking: Arc<Mutex<TrackingState>>,
) {
    while let Some(dispatch) = receiver.recv().await {
        let tracked = dispatch.tracked;
        let future = handler(dispatch.event);
        // A nested spawn isolates handler panics from the worker so
        // later events on this subscription still run.
        if let Err(join_error) = tokio::spawn(future).await {
            tracing::error!(error = %join_error, "event handler panicked");
        }
        if tracked {
            finish_one(&tracking);
        }
    }
}

fn finish_one(tracking: &Mutex<TrackingState>) {
    let waiters = {
        let mut state = tracking.lock().expect("tracking lock poisoned");
        state.in_flight = state.in_flight.saturating_sub(1);
        if state.in_flight == 0 {
            std::mem::take(&mut state.waiters)
        } else {
            Vec::new()
        }
    };
    for waiter in waiters {
        let _ = waiter.send(());
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aro_core::{EventKind, StateGuard};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counting_handler(counter: Arc<AtomicUsize>) -> EventHandler {
        Arc::new(move |_event| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn publish_reaches_matching_subscribers() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        bus.subscribe(
            "OrderPlaced",
            StateGuardSet::empty(),
            counting_handler(counter.clone()),
        );

        bus.publish_and_track(Event::domain("OrderPlaced", json!({})));
        assert!(bus.await_pending_events(Duration::from_secs(1)).await);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn tags_do_not_cross_dispatch() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        bus.subscribe(
            "OrderPlaced",
            StateGuardSet::empty(),
            counting_handler(counter.clone()),
        );

        bus.publish_and_track(Event::domain("OrderShipped", json!({})));
        assert!(bus.await_pending_events(Duration::from_secs(1)).await);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn guards_filter_by_payload() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let guards = StateGuardSet::new(vec![
            StateGuard::new("status", vec!["paid".to_string()]),
            StateGuard::new("tier", vec!["gold".to_string()]),
        ]);
        bus.subscribe("OrderPlaced", guards, counting_handler(counter.clone()));

        bus.publish_and_track(Event::domain(
            "OrderPlaced",
            json!({"status": "paid", "tier": "gold"}),
        ));
        bus.publish_and_track(Event::domain(
            "OrderPlaced",
            json!({"status": "paid", "tier": "silver"}),
        ));
        bus.publish_and_track(Event::domain(
            "OrderPlaced",
            json!({"status": "placed", "tier": "gold"}),
        ));

        assert!(bus.await_pending_events(Duration::from_secs(1)).await);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn quiescence_waits_for_reemitted_events() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));

        // First handler emits a second event; quiescence must cover both.
        let chained = bus.clone();
        bus.subscribe(
            "First",
            StateGuardSet::empty(),
            Arc::new(move |_event| {
                let chained = chained.clone();
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    chained.publish_and_track(Event::domain("Second", json!({})));
                })
            }),
        );
        bus.subscribe(
            "Second",
            StateGuardSet::empty(),
            counting_handler(counter.clone()),
        );

        bus.publish_and_track(Event::domain("First", json!({})));
        assert!(bus.await_pending_events(Duration::from_secs(2)).await);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(bus.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn await_returns_immediately_when_idle() {
        let bus = EventBus::new();
        assert!(bus.await_pending_events(Duration::from_millis(1)).await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn timeout_reports_false_without_cancelling() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let slow = counter.clone();
        bus.subscribe(
            "Slow",
            StateGuardSet::empty(),
            Arc::new(move |_event| {
                let slow = slow.clone();
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    slow.fetch_add(1, Ordering::SeqCst);
                })
            }),
        );

        bus.publish_and_track(Event::domain("Slow", json!({})));
        assert!(!bus.await_pending_events(Duration::from_millis(10)).await);
        // The handler still runs to completion.
        assert!(bus.await_pending_events(Duration::from_secs(2)).await);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn panicking_handler_does_not_stall_quiescence() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        bus.subscribe(
            "Risky",
            StateGuardSet::empty(),
            Arc::new(|_event| Box::pin(async { panic!("handler bug") })),
        );
        bus.subscribe(
            "Risky",
            StateGuardSet::empty(),
            counting_handler(counter.clone()),
        );

        bus.publish_and_track(Event::domain("Risky", json!({})));
        assert!(bus.await_pending_events(Duration::from_secs(1)).await);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn order_is_preserved_per_subscription() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(
            "Seq",
            StateGuardSet::empty(),
            Arc::new(move |event| {
                let sink = sink.clone();
                Box::pin(async move {
                    if let EventKind::Domain { payload, .. } = &event.kind {
                        sink.lock().unwrap().push(payload["n"].as_i64().unwrap());
                    }
                })
            }),
        );

        for n in 0..20 {
            bus.publish_and_track(Event::domain("Seq", json!({ "n": n })));
        }
        assert!(bus.await_pending_events(Duration::from_secs(2)).await);
        let seen = seen.lock().unwrap();
        assert_eq!(*seen, (0..20).collect::<Vec<i64>>());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unsubscribe_stops_future_dispatch() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let id = bus.subscribe(
            "Gone",
            StateGuardSet::empty(),
            counting_handler(counter.clone()),
        );

        bus.publish_and_track(Event::domain("Gone", json!({})));
        assert!(bus.await_pending_events(Duration::from_secs(1)).await);
        bus.unsubscribe(id);
        bus.publish_and_track(Event::domain("Gone", json!({})));
        assert!(bus.await_pending_events(Duration::from_secs(1)).await);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
