//! Push sources and live collections
//!
//! An [`Observable`] is the long-lived half of a streaming action result:
//! zero or more values over time, terminated by completion or an error.
//! Three shapes exist ([`ObservableKind`]): a plain stream delivers only to
//! client subscriptions, a subject is multicast and forwarded by the server
//! from call time on, and a latched subject additionally holds a current
//! value that is replayed to every new subscriber.
//!
//! A [`LiveCollection`] is an observable set of items with a query model, a
//! state value, a snapshot, and a change feed. The server snapshots it once
//! and then diff-streams the change events.
//!
//! Subscriber callbacks run synchronously on the emitting call, under the
//! source's subscriber lock. They must not call back into the same source.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::frame::{ErrorDetail, ObservableKind};
use crate::value::Value;

/// One delivery to an observable subscriber
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    /// A pushed value
    Next(Value),
    /// The source failed; no further events follow
    Error(ErrorDetail),
    /// The source completed; no further events follow
    Complete,
}

#[derive(Clone)]
enum Terminal {
    Complete,
    Error(ErrorDetail),
}

impl Terminal {
    fn to_event(&self) -> SourceEvent {
        match self {
            Terminal::Complete => SourceEvent::Complete,
            Terminal::Error(e) => SourceEvent::Error(e.clone()),
        }
    }
}

type EventSink = Box<dyn FnMut(SourceEvent) + Send>;

struct SourceCore {
    subs: Mutex<Vec<(u64, EventSink)>>,
    next_id: AtomicU64,
    latch: Mutex<Option<Value>>,
    terminal: Mutex<Option<Terminal>>,
}

/// A push source, cloneable on both the producer and consumer side
#[derive(Clone)]
pub struct Observable {
    kind: ObservableKind,
    core: Arc<SourceCore>,
}

impl Observable {
    fn with_kind(kind: ObservableKind, latch: Option<Value>) -> Self {
        Self {
            kind,
            core: Arc::new(SourceCore {
                subs: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                latch: Mutex::new(latch),
                terminal: Mutex::new(None),
            }),
        }
    }

    /// A plain stream: values flow only to explicit subscriptions
    pub fn stream() -> Self {
        Self::with_kind(ObservableKind::Stream, None)
    }

    /// A multicast subject
    pub fn subject() -> Self {
        Self::with_kind(ObservableKind::Subject, None)
    }

    /// A multicast subject holding a current value
    pub fn latched_subject(initial: Value) -> Self {
        Self::with_kind(ObservableKind::LatchedSubject, Some(initial))
    }

    /// Which shape this source has
    pub fn kind(&self) -> ObservableKind {
        self.kind
    }

    /// The latched current value, if this is a latched subject
    pub fn current_value(&self) -> Option<Value> {
        self.core.latch.lock().unwrap().clone()
    }

    /// Push one value to every subscriber
    pub fn next(&self, v: Value) {
        if self.core.terminal.lock().unwrap().is_some() {
            return;
        }
        if self.kind == ObservableKind::LatchedSubject {
            *self.core.latch.lock().unwrap() = Some(v.clone());
        }
        let mut subs = self.core.subs.lock().unwrap();
        for (_, sink) in subs.iter_mut() {
            sink(SourceEvent::Next(v.clone()));
        }
    }

    /// Fail the source. Subscribers receive the error and are dropped.
    pub fn error(&self, e: ErrorDetail) {
        self.terminate(Terminal::Error(e));
    }

    /// Complete the source. Subscribers receive completion and are dropped.
    pub fn complete(&self) {
        self.terminate(Terminal::Complete);
    }

    fn terminate(&self, terminal: Terminal) {
        {
            let mut guard = self.core.terminal.lock().unwrap();
            if guard.is_some() {
                return;
            }
            *guard = Some(terminal.clone());
        }
        let mut subs = self.core.subs.lock().unwrap();
        for (_, sink) in subs.iter_mut() {
            sink(terminal.to_event());
        }
        subs.clear();
    }

    /// Attach a subscriber.
    ///
    /// A latched subject replays its current value synchronously before the
    /// subscription is registered. Subscribing to an already terminated
    /// source delivers the terminal event immediately and returns an inert
    /// subscription.
    pub fn subscribe(&self, sink: impl FnMut(SourceEvent) + Send + 'static) -> SourceSubscription {
        let mut sink: EventSink = Box::new(sink);
        let terminal = self.core.terminal.lock().unwrap().clone();
        if let Some(terminal) = terminal {
            sink(terminal.to_event());
            return SourceSubscription {
                id: 0,
                core: self.core.clone(),
            };
        }
        if self.kind == ObservableKind::LatchedSubject {
            if let Some(current) = self.core.latch.lock().unwrap().clone() {
                sink(SourceEvent::Next(current));
            }
        }
        let id = self.core.next_id.fetch_add(1, Ordering::Relaxed);
        self.core.subs.lock().unwrap().push((id, sink));
        SourceSubscription {
            id,
            core: self.core.clone(),
        }
    }
}

impl core::fmt::Debug for Observable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Observable")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Handle to one observable subscription
pub struct SourceSubscription {
    id: u64,
    core: Arc<SourceCore>,
}

impl SourceSubscription {
    /// Detach the subscriber. No further events are delivered through it.
    pub fn cancel(self) {
        self.core.subs.lock().unwrap().retain(|(id, _)| *id != self.id);
    }
}

//////////////////////////////////////////////////////////////////////////////
// LIVE COLLECTIONS
//////////////////////////////////////////////////////////////////////////////

/// One change to a [`LiveCollection`]
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionEvent {
    /// Items were added
    Add(Vec<Value>),
    /// Items were removed, addressed by id
    Remove(Vec<Value>),
    /// The item set was replaced; consumers should resnapshot
    Set,
    /// The collection state changed
    State(Value),
}

type CollectionSink = Box<dyn FnMut(&CollectionEvent) + Send>;

struct CollectionCore {
    model: Value,
    state: Mutex<Value>,
    items: Mutex<Vec<Value>>,
    subs: Mutex<Vec<(u64, CollectionSink)>>,
    next_id: AtomicU64,
    attached: AtomicBool,
}

/// An observable set of items with a query model, state, and change feed
#[derive(Clone)]
pub struct LiveCollection {
    core: Arc<CollectionCore>,
}

impl LiveCollection {
    /// A collection seeded with a model, a state, and initial items
    pub fn new(model: Value, state: Value, items: Vec<Value>) -> Self {
        Self {
            core: Arc::new(CollectionCore {
                model,
                state: Mutex::new(state),
                items: Mutex::new(items),
                subs: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                attached: AtomicBool::new(true),
            }),
        }
    }

    /// The query model this collection was produced from
    pub fn model(&self) -> Value {
        self.core.model.clone()
    }

    /// The current collection state
    pub fn state(&self) -> Value {
        self.core.state.lock().unwrap().clone()
    }

    /// A snapshot of the current items
    pub fn all(&self) -> Vec<Value> {
        self.core.items.lock().unwrap().clone()
    }

    /// Append items and emit an add event
    pub fn add(&self, items: Vec<Value>) {
        self.core.items.lock().unwrap().extend(items.iter().cloned());
        self.emit(CollectionEvent::Add(items));
    }

    /// Remove items by id and emit a remove event
    pub fn remove(&self, ids: Vec<Value>) {
        self.core
            .items
            .lock()
            .unwrap()
            .retain(|item| !ids.contains(&item_id(item)));
        self.emit(CollectionEvent::Remove(ids));
    }

    /// Replace the item set and emit a set event.
    ///
    /// The event itself carries no items; consumers read [`Self::all`] when
    /// they process it.
    pub fn replace(&self, items: Vec<Value>) {
        *self.core.items.lock().unwrap() = items;
        self.emit(CollectionEvent::Set);
    }

    /// Replace the state and emit a state event
    pub fn set_state(&self, state: Value) {
        *self.core.state.lock().unwrap() = state.clone();
        self.emit(CollectionEvent::State(state));
    }

    /// Attach a change-feed subscriber
    pub fn observe(
        &self,
        sink: impl FnMut(&CollectionEvent) + Send + 'static,
    ) -> CollectionSubscription {
        let id = self.core.next_id.fetch_add(1, Ordering::Relaxed);
        self.core.subs.lock().unwrap().push((id, Box::new(sink)));
        CollectionSubscription {
            id,
            core: self.core.clone(),
        }
    }

    /// Release the collection from its upstream feed. Subsequent mutations
    /// no longer notify subscribers.
    pub fn detach(&self) {
        self.core.attached.store(false, Ordering::Release);
    }

    /// Whether the collection is still fed from upstream
    pub fn is_attached(&self) -> bool {
        self.core.attached.load(Ordering::Acquire)
    }

    fn emit(&self, event: CollectionEvent) {
        if !self.is_attached() {
            return;
        }
        let mut subs = self.core.subs.lock().unwrap();
        for (_, sink) in subs.iter_mut() {
            sink(&event);
        }
    }
}

impl core::fmt::Debug for LiveCollection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LiveCollection")
            .field("len", &self.core.items.lock().unwrap().len())
            .finish_non_exhaustive()
    }
}

/// Handle to one collection change-feed subscription
pub struct CollectionSubscription {
    id: u64,
    core: Arc<CollectionCore>,
}

impl CollectionSubscription {
    /// Detach the subscriber
    pub fn cancel(self) {
        self.core.subs.lock().unwrap().retain(|(id, _)| *id != self.id);
    }
}

fn item_id(item: &Value) -> Value {
    item.get("id").cloned().unwrap_or(Value::Null)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn subject_multicasts() {
        let subject = Observable::subject();
        let (tx_a, rx_a) = mpsc::channel();
        let (tx_b, rx_b) = mpsc::channel();
        let _a = subject.subscribe(move |ev| tx_a.send(ev).unwrap());
        let _b = subject.subscribe(move |ev| tx_b.send(ev).unwrap());
        subject.next(Value::Int(1));
        assert_eq!(rx_a.try_recv().unwrap(), SourceEvent::Next(Value::Int(1)));
        assert_eq!(rx_b.try_recv().unwrap(), SourceEvent::Next(Value::Int(1)));
    }

    #[test]
    fn latched_subject_replays_current() {
        let subject = Observable::latched_subject(Value::Str("hi".into()));
        subject.next(Value::Str("later".into()));
        let (tx, rx) = mpsc::channel();
        let _sub = subject.subscribe(move |ev| tx.send(ev).unwrap());
        assert_eq!(
            rx.try_recv().unwrap(),
            SourceEvent::Next(Value::Str("later".into()))
        );
    }

    #[test]
    fn cancel_stops_delivery() {
        let stream = Observable::stream();
        let (tx, rx) = mpsc::channel();
        let sub = stream.subscribe(move |ev| tx.send(ev).unwrap());
        stream.next(Value::Int(1));
        sub.cancel();
        stream.next(Value::Int(2));
        assert_eq!(rx.try_recv().unwrap(), SourceEvent::Next(Value::Int(1)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn terminated_source_replays_terminal() {
        let stream = Observable::stream();
        stream.complete();
        let (tx, rx) = mpsc::channel();
        let _sub = stream.subscribe(move |ev| tx.send(ev).unwrap());
        assert_eq!(rx.try_recv().unwrap(), SourceEvent::Complete);
        // further values are swallowed
        stream.next(Value::Int(1));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn collection_removes_by_id() {
        let item = |id: i64| Value::object([("id", Value::Int(id))]);
        let col = LiveCollection::new(Value::Null, Value::Null, vec![item(1), item(2)]);
        col.remove(vec![Value::Int(1)]);
        assert_eq!(col.all(), vec![item(2)]);
    }

    #[test]
    fn detached_collection_is_silent() {
        let col = LiveCollection::new(Value::Null, Value::Null, vec![]);
        let (tx, rx) = mpsc::channel();
        let _sub = col.observe(move |ev| tx.send(ev.clone()).unwrap());
        col.detach();
        col.add(vec![Value::Int(1)]);
        assert!(rx.try_recv().is_err());
    }
}
