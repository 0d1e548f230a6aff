//! Generic event-bus contract and in-memory dispatcher.
//!
//! This is both the backbone every other primitive uses to publish its own
//! event taxonomy (`KEY_ACQUIRED`, `STATE_TRANSITIONED`, ...) and, wrapped by
//! [`JsonEventBus`], the standalone typed pub/sub primitive of spec §4.5.
//!
//! Grounded on `storage/mutation_observer.rs`'s `CompositeMutationObserver`:
//! fan-out to every registered listener, one listener's failure never blocks
//! another's delivery. Per-listener ordering is provided by giving each
//! listener its own `tokio::sync::mpsc` channel drained by a single task, so
//! two `dispatch` calls for the same listener are always delivered in the
//! order they were sent even though dispatch itself never awaits delivery.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};

/// An event type carrying its own dispatch name, e.g. one variant per member
/// of a primitive's event taxonomy.
pub trait NamedEvent: Clone + Send + Sync + 'static {
    /// The event's dispatch name (`"KEY_ACQUIRED"`, `"STATE_TRANSITIONED"`, ...).
    fn event_name(&self) -> &str;
}

/// A listener callback. Returning `Err` reports to the bus's
/// uncaught-rejection sink rather than propagating to the dispatcher.
pub type ListenerFn<E> = Arc<dyn Fn(E) -> Result<(), anyhow::Error> + Send + Sync>;

/// Sink for listener errors and delivery-time re-validation failures,
/// mirroring the spec's `__onUncaughtRejection`.
pub type RejectionSink = Arc<dyn Fn(anyhow::Error) + Send + Sync>;

type ListenerId = u64;

struct ListenerEntry<E> {
    id: ListenerId,
    sender: mpsc::UnboundedSender<E>,
}

/// A handle returned by [`EventBus::subscribe`]; dropping it does not
/// unsubscribe (matching "Handle: ... safe to drop" elsewhere in the spec) —
/// call [`Unsubscribe::cancel`] explicitly.
pub struct Unsubscribe<E: NamedEvent> {
    bus: Arc<EventBusInner<E>>,
    name: String,
    id: ListenerId,
}

impl<E: NamedEvent> Unsubscribe<E> {
    /// Removes the listener this token was issued for.
    pub fn cancel(self) {
        self.bus.remove_listener(&self.name, self.id);
    }
}

struct EventBusInner<E: NamedEvent> {
    listeners: DashMap<String, Vec<ListenerEntry<E>>>,
    next_id: AtomicU64,
    on_uncaught_rejection: parking_lot_shim::Mutex<Option<RejectionSink>>,
}

// A tiny local shim so this module doesn't need to pull in `parking_lot`
// just for one `Option<RejectionSink>` guarded by a mutex; `std::sync::Mutex`
// is adequate since the critical section never awaits.
mod parking_lot_shim {
    pub use std::sync::Mutex;
}

impl<E: NamedEvent> EventBusInner<E> {
    fn remove_listener(&self, name: &str, id: ListenerId) {
        if let Some(mut entries) = self.listeners.get_mut(name) {
            entries.retain(|entry| entry.id != id);
        }
    }

    fn report_rejection(&self, error: anyhow::Error) {
        let guard = self.on_uncaught_rejection.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(sink) = guard.as_ref() {
            sink(error);
        } else {
            tracing::warn!(error = %error, "uncaught event listener rejection");
        }
    }
}

/// Typed, in-memory event bus. One instance is normally owned by a single
/// provider and parameterized over that primitive's own event enum.
pub struct EventBus<E: NamedEvent> {
    inner: Arc<EventBusInner<E>>,
}

impl<E: NamedEvent> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: NamedEvent> EventBus<E> {
    /// A bus with no listeners and the default (log-to-`tracing`) rejection sink.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EventBusInner {
                listeners: DashMap::new(),
                next_id: AtomicU64::new(1),
                on_uncaught_rejection: parking_lot_shim::Mutex::new(None),
            }),
        }
    }

    /// Installs the sink invoked for listener errors (the `__onUncaughtRejection` hook).
    pub fn set_uncaught_rejection_sink(&self, sink: RejectionSink) {
        *self.inner.on_uncaught_rejection.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(sink);
    }

    fn spawn_listener_task(&self, name: &str, callback: ListenerFn<E>) -> ListenerId {
        let (tx, mut rx) = mpsc::unbounded_channel::<E>();
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(error) = callback(event) {
                    inner.report_rejection(error);
                }
            }
        });

        self.inner
            .listeners
            .entry(name.to_string())
            .or_default()
            .push(ListenerEntry { id, sender: tx });

        id
    }

    /// Registers a listener for `name`. Returns an id usable with
    /// [`EventBus::remove_listener`].
    pub fn add_listener(&self, name: &str, callback: ListenerFn<E>) -> u64 {
        self.spawn_listener_task(name, callback)
    }

    /// Removes a previously registered listener by id.
    pub fn remove_listener(&self, name: &str, id: u64) {
        self.inner.remove_listener(name, id);
    }

    /// Registers a listener for `name` that auto-removes itself after its
    /// first invocation.
    pub fn listen_once(&self, name: &str, callback: ListenerFn<E>) -> u64 {
        let bus_inner = Arc::clone(&self.inner);
        let name_owned = name.to_string();
        // `once_id` is filled in immediately after registration so the
        // wrapper can remove its own entry; the brief window between
        // registration and the id being observable is never reachable from
        // inside the wrapper itself because delivery only begins once the
        // channel send below completes.
        let once_id = Arc::new(std::sync::OnceLock::new());
        let once_id_for_closure = Arc::clone(&once_id);

        let wrapped: ListenerFn<E> = Arc::new(move |event| {
            let result = callback(event);
            if let Some(id) = once_id_for_closure.get() {
                bus_inner.remove_listener(&name_owned, *id);
            }
            result
        });

        let id = self.spawn_listener_task(name, wrapped);
        let _ = once_id.set(id);
        id
    }

    /// Registers a listener and returns an [`Unsubscribe`] token instead of
    /// a bare id.
    pub fn subscribe(&self, name: &str, callback: ListenerFn<E>) -> Unsubscribe<E> {
        let id = self.add_listener(name, callback);
        Unsubscribe {
            bus: Arc::clone(&self.inner),
            name: name.to_string(),
            id,
        }
    }

    /// Like [`EventBus::subscribe`] but the listener auto-removes itself
    /// after its first invocation.
    pub fn subscribe_once(&self, name: &str, callback: ListenerFn<E>) -> Unsubscribe<E> {
        let id = self.listen_once(name, callback);
        Unsubscribe {
            bus: Arc::clone(&self.inner),
            name: name.to_string(),
            id,
        }
    }

    /// Resolves with the next event dispatched under `name`.
    pub async fn as_promise(&self, name: &str) -> E {
        let (tx, rx) = oneshot::channel();
        let tx = std::sync::Mutex::new(Some(tx));
        self.listen_once(
            name,
            Arc::new(move |event| {
                if let Some(tx) = tx.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take() {
                    let _ = tx.send(event);
                }
                Ok(())
            }),
        );
        // The sender side only ever fails if this future was dropped before
        // delivery, which cannot happen since we own `rx` until return.
        rx.await.expect("listener dropped sender without sending")
    }

    /// Publishes `event` to every listener registered for its
    /// `event_name()`. Delivery into each listener's channel is
    /// non-blocking; dispatch never awaits listener completion.
    pub fn dispatch(&self, event: E) {
        let name = event.event_name().to_string();
        if let Some(entries) = self.inner.listeners.get(&name) {
            for entry in entries.iter() {
                // An unbounded send only fails if the listener task has
                // exited (e.g. panicked); dropping the event is the correct
                // behavior there, there is no receiver left to report to.
                let _ = entry.sender.send(event.clone());
            }
        }
    }

    /// Number of listeners currently registered for `name` (test/diagnostic use).
    #[must_use]
    pub fn listener_count(&self, name: &str) -> usize {
        self.inner.listeners.get(name).map_or(0, |e| e.len())
    }
}

impl<E: NamedEvent> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[derive(Clone)]
    enum TestEvent {
        Ping(u32),
        Pong,
    }

    impl NamedEvent for TestEvent {
        fn event_name(&self) -> &str {
            match self {
                Self::Ping(_) => "PING",
                Self::Pong => "PONG",
            }
        }
    }

    #[tokio::test]
    async fn listener_receives_events_in_order() {
        let bus: EventBus<TestEvent> = EventBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        bus.add_listener(
            "PING",
            Arc::new(move |event| {
                if let TestEvent::Ping(n) = event {
                    let _ = tx.send(n);
                }
                Ok(())
            }),
        );

        bus.dispatch(TestEvent::Ping(1));
        bus.dispatch(TestEvent::Ping(2));
        bus.dispatch(TestEvent::Ping(3));

        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
        assert_eq!(rx.recv().await, Some(3));
    }

    #[tokio::test]
    async fn listeners_are_isolated_by_name() {
        let bus: EventBus<TestEvent> = EventBus::new();
        let ping_count = Arc::new(AtomicUsize::new(0));
        let pong_count = Arc::new(AtomicUsize::new(0));

        let ping_clone = Arc::clone(&ping_count);
        bus.add_listener(
            "PING",
            Arc::new(move |_| {
                ping_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        let pong_clone = Arc::clone(&pong_count);
        bus.add_listener(
            "PONG",
            Arc::new(move |_| {
                pong_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        bus.dispatch(TestEvent::Ping(1));
        bus.dispatch(TestEvent::Pong);
        bus.dispatch(TestEvent::Pong);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ping_count.load(Ordering::SeqCst), 1);
        assert_eq!(pong_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn listener_failure_does_not_block_others() {
        let bus: EventBus<TestEvent> = EventBus::new();
        let second_fired = Arc::new(AtomicUsize::new(0));

        bus.add_listener("PONG", Arc::new(|_| Err(anyhow::anyhow!("boom"))));
        let second = Arc::clone(&second_fired);
        bus.add_listener(
            "PONG",
            Arc::new(move |_| {
                second.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        bus.dispatch(TestEvent::Pong);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(second_fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn listen_once_fires_exactly_once() {
        let bus: EventBus<TestEvent> = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        bus.listen_once(
            "PONG",
            Arc::new(move |_| {
                count_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        bus.dispatch(TestEvent::Pong);
        bus.dispatch(TestEvent::Pong);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn subscribe_token_unsubscribes() {
        let bus: EventBus<TestEvent> = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        let token = bus.subscribe(
            "PONG",
            Arc::new(move |_| {
                count_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        bus.dispatch(TestEvent::Pong);
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
        bus.dispatch(TestEvent::Pong);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn as_promise_resolves_with_next_event() {
        let bus: EventBus<TestEvent> = EventBus::new();
        let bus_clone = bus.clone();

        let handle = tokio::spawn(async move { bus_clone.as_promise("PING").await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        bus.dispatch(TestEvent::Ping(7));

        let event = handle.await.unwrap();
        assert!(matches!(event, TestEvent::Ping(7)));
    }

    #[tokio::test]
    async fn uncaught_rejection_sink_receives_listener_errors() {
        let bus: EventBus<TestEvent> = EventBus::new();
        let captured = Arc::new(std::sync::Mutex::new(Vec::new()));
        let captured_clone = Arc::clone(&captured);

        bus.set_uncaught_rejection_sink(Arc::new(move |error| {
            captured_clone.lock().unwrap().push(error.to_string());
        }));
        bus.add_listener("PONG", Arc::new(|_| Err(anyhow::anyhow!("listener exploded"))));

        bus.dispatch(TestEvent::Pong);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let captured = captured.lock().unwrap();
        assert_eq!(captured.as_slice(), ["listener exploded"]);
    }
}
