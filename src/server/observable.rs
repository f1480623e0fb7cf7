//! Stream-result bookkeeping
//!
//! A call whose action produced an [`Observable`] gets an [`ObservableEntry`]
//! keyed by its call id. The announcement frame is emitted before anything
//! else; for subject shapes the server then opens its own forwarding
//! subscription, so values flow without an explicit client subscribe.
//! Client subscriptions are opened and closed by control frames and are
//! gated by a per-subscription `active` flag: a value already in flight
//! when the client unsubscribes is dropped, not forwarded.
//!
//! Lock order: the entry table lock is never held while touching a source.
//! Source callbacks may take the table lock (entry removal on terminal
//! events), so the reverse order would invert.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::frame::{
    Frame, FrameKind, ObservableAnnouncement, ObservableFault, ObservableKind, StreamItem,
    SubscriptionId,
};
use crate::server::{DispatchError, Dispatcher, Shared};
use crate::source::{Observable, SourceEvent, SourceSubscription};

pub(crate) struct ClientSubscription {
    active: Arc<AtomicBool>,
    handle: SourceSubscription,
}

/// Per-call state of a stream result
pub(crate) struct ObservableEntry {
    source: Observable,
    subscriptions: HashMap<u32, ClientSubscription>,
    bootstrap: Option<SourceSubscription>,
}

impl ObservableEntry {
    pub(crate) fn cancel(self) {
        if let Some(bootstrap) = self.bootstrap {
            bootstrap.cancel();
        }
        for (_, sub) in self.subscriptions {
            sub.active.store(false, Ordering::Release);
            sub.handle.cancel();
        }
    }
}

/// Forwarding callback for one subscription.
///
/// `sub_id` is the id stamped into the item bodies: the client subscription
/// id, or the call id itself for the server-held subject subscription.
/// Terminal events also retire the call's entry; that happens from the
/// emitting callback, which is why the entry table lock must never be held
/// around source calls.
fn forward_sink(
    shared: Arc<Shared>,
    call_id: u32,
    sub_id: u32,
    active: Option<Arc<AtomicBool>>,
) -> impl FnMut(SourceEvent) + Send + 'static {
    move |event| {
        if let Some(active) = &active {
            if !active.load(Ordering::Acquire) {
                return;
            }
        }
        match event {
            SourceEvent::Next(v) => {
                let _ = shared.sender.reply(
                    call_id,
                    FrameKind::ResponseActionObservableNext,
                    &StreamItem { id: sub_id, v },
                );
            }
            SourceEvent::Error(error) => {
                let _ = shared.sender.reply(
                    call_id,
                    FrameKind::ResponseActionObservableError,
                    &ObservableFault { id: sub_id, error },
                );
                retire(&shared, call_id, &active);
            }
            SourceEvent::Complete => {
                let _ = shared.sender.reply(
                    call_id,
                    FrameKind::ResponseActionObservableComplete,
                    &SubscriptionId { id: sub_id },
                );
                retire(&shared, call_id, &active);
            }
        }
    }
}

fn retire(shared: &Arc<Shared>, call_id: u32, active: &Option<Arc<AtomicBool>>) {
    if let Some(active) = active {
        active.store(false, Ordering::Release);
    }
    if shared.observables.lock().unwrap().remove(&call_id).is_some() {
        trace!(id = call_id, "stream terminated, entry retired");
    }
}

impl Dispatcher {
    /// Announce a stream result and register its entry.
    ///
    /// The announcement goes out before any forwarding subscription is
    /// opened, so even a synchronously replaying latched subject cannot get
    /// a value ahead of it.
    pub(crate) fn open_observable(
        &self,
        call_id: u32,
        source: Observable,
    ) -> Result<(), DispatchError> {
        let kind = source.kind();
        self.shared.sender.reply(
            call_id,
            FrameKind::ResponseActionObservable,
            &ObservableAnnouncement { kind },
        )?;

        self.shared.observables.lock().unwrap().insert(
            call_id,
            ObservableEntry {
                source: source.clone(),
                subscriptions: HashMap::new(),
                bootstrap: None,
            },
        );

        if matches!(kind, ObservableKind::Subject | ObservableKind::LatchedSubject) {
            let handle = source.subscribe(forward_sink(self.shared.clone(), call_id, call_id, None));
            let mut map = self.shared.observables.lock().unwrap();
            match map.get_mut(&call_id) {
                Some(entry) => entry.bootstrap = Some(handle),
                // the source terminated during subscribe and retired the entry
                None => {
                    drop(map);
                    handle.cancel();
                }
            }
        }
        debug!(id = call_id, ?kind, "stream result registered");
        Ok(())
    }

    pub(crate) fn subscribe_observable(&self, frame: &Frame) -> Result<(), DispatchError> {
        let SubscriptionId { id: sub_id } = frame.decode_body()?;
        let source = {
            let map = self.shared.observables.lock().unwrap();
            let entry = map
                .get(&frame.id)
                .ok_or_else(|| DispatchError::Control("No observable found".to_string()))?;
            if entry.subscriptions.contains_key(&sub_id) {
                return Err(DispatchError::Control(
                    "Subscription already created".to_string(),
                ));
            }
            entry.source.clone()
        };

        let active = Arc::new(AtomicBool::new(true));
        let handle = source.subscribe(forward_sink(
            self.shared.clone(),
            frame.id,
            sub_id,
            Some(active.clone()),
        ));

        let mut map = self.shared.observables.lock().unwrap();
        match map.get_mut(&frame.id) {
            Some(entry) => {
                entry
                    .subscriptions
                    .insert(sub_id, ClientSubscription { active, handle });
                trace!(id = frame.id, sub_id, "client subscription opened");
                Ok(())
            }
            // terminated while subscribing; the terminal frame already went out
            None => {
                drop(map);
                handle.cancel();
                Ok(())
            }
        }
    }

    pub(crate) fn unsubscribe_observable(&self, frame: &Frame) -> Result<(), DispatchError> {
        let SubscriptionId { id: sub_id } = frame.decode_body()?;
        let sub = {
            let mut map = self.shared.observables.lock().unwrap();
            let entry = map
                .get_mut(&frame.id)
                .ok_or_else(|| DispatchError::Control("No observable found".to_string()))?;
            let sub = entry
                .subscriptions
                .remove(&sub_id)
                .ok_or_else(|| DispatchError::Control("Subscription not found".to_string()))?;
            sub.active.store(false, Ordering::Release);
            sub
        };
        sub.handle.cancel();
        trace!(id = frame.id, sub_id, "client subscription closed");
        Ok(())
    }

    pub(crate) fn unsubscribe_subject(&self, frame: &Frame) -> Result<(), DispatchError> {
        let bootstrap = {
            let mut map = self.shared.observables.lock().unwrap();
            let entry = map
                .get_mut(&frame.id)
                .ok_or_else(|| DispatchError::Control("No observable found".to_string()))?;
            entry.bootstrap.take()
        };
        if let Some(handle) = bootstrap {
            handle.cancel();
            trace!(id = frame.id, "server subject subscription closed");
        }
        Ok(())
    }
}
