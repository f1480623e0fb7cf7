//! Collection-result bookkeeping
//!
//! A collection result is answered with one composite frame holding the
//! query model, the state, and a full snapshot, in that order. The change
//! feed is then forwarded through a batching worker: events raised within
//! the same scheduling tick land in the worker's queue before it wakes, and
//! are flushed as one composite change frame in arrival order. A `set`
//! event resnapshots the collection when the frame is built, not when the
//! event was raised.
//!
//! Unsubscribing flips the drop flag, detaches the change feed, and
//! releases the underlying collection. The flag is checked before any frame
//! of a batch goes out, so a batch in flight at unsubscribe time is
//! discarded whole.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::frame::{CollectionRemove, Frame, FrameKind, ItemsBody};
use crate::server::types::ActionTypes;
use crate::server::{DispatchError, Dispatcher, Sender};
use crate::source::{CollectionEvent, CollectionSubscription, LiveCollection};

/// Per-call state of a collection result
pub(crate) struct CollectionEntry {
    dropped: Arc<AtomicBool>,
    feed: CollectionSubscription,
    collection: LiveCollection,
}

impl CollectionEntry {
    pub(crate) fn cancel(self) {
        self.dropped.store(true, Ordering::Release);
        self.feed.cancel();
        self.collection.detach();
    }
}

impl Dispatcher {
    pub(crate) fn open_collection(
        &self,
        call_id: u32,
        collection: LiveCollection,
        types: &ActionTypes,
    ) -> Result<(), DispatchError> {
        // first collection result of this action derives the items schema
        let _ = types.collection_items_schema();

        let mut opening = self
            .shared
            .sender
            .composite(call_id, FrameKind::ResponseActionCollection);
        opening.push(FrameKind::ResponseActionCollectionModel, &collection.model())?;
        opening.push(FrameKind::ResponseActionCollectionState, &collection.state())?;
        opening.push(
            FrameKind::ResponseActionCollectionSet,
            &ItemsBody { v: collection.all() },
        )?;
        opening.send()?;

        let dropped = Arc::new(AtomicBool::new(false));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let feed = collection.observe(move |event| {
            let _ = events_tx.send(event.clone());
        });
        tokio::spawn(change_worker(
            self.shared.sender.clone(),
            call_id,
            collection.clone(),
            dropped.clone(),
            events_rx,
        ));

        self.shared.collections.lock().unwrap().insert(
            call_id,
            CollectionEntry {
                dropped,
                feed,
                collection,
            },
        );
        debug!(id = call_id, "collection result registered");
        Ok(())
    }

    pub(crate) fn unsubscribe_collection(&self, frame: &Frame) -> Result<(), DispatchError> {
        let entry = self
            .shared
            .collections
            .lock()
            .unwrap()
            .remove(&frame.id)
            .ok_or_else(|| DispatchError::Control("No collection found".to_string()))?;
        entry.cancel();
        trace!(id = frame.id, "collection released");
        Ok(())
    }
}

/// Batches change events: everything already queued when the worker wakes
/// is flushed as one composite frame
async fn change_worker(
    sender: Sender,
    call_id: u32,
    collection: LiveCollection,
    dropped: Arc<AtomicBool>,
    mut events: mpsc::UnboundedReceiver<CollectionEvent>,
) {
    while let Some(first) = events.recv().await {
        let mut batch = vec![first];
        while let Ok(event) = events.try_recv() {
            batch.push(event);
        }
        if dropped.load(Ordering::Acquire) {
            break;
        }
        if let Err(e) = flush(&sender, call_id, &collection, batch) {
            warn!(id = call_id, "failed to encode change batch: {e}");
        }
    }
    trace!(id = call_id, "collection change worker exiting");
}

fn flush(
    sender: &Sender,
    call_id: u32,
    collection: &LiveCollection,
    batch: Vec<CollectionEvent>,
) -> Result<(), postcard::Error> {
    let mut change = sender.composite(call_id, FrameKind::ResponseActionCollectionChange);
    for event in batch {
        match event {
            CollectionEvent::Add(items) => {
                change.push(FrameKind::ResponseActionCollectionAdd, &ItemsBody { v: items })?;
            }
            CollectionEvent::Remove(ids) => {
                change.push(FrameKind::ResponseActionCollectionRemove, &CollectionRemove { ids })?;
            }
            CollectionEvent::Set => {
                change.push(
                    FrameKind::ResponseActionCollectionSet,
                    &ItemsBody { v: collection.all() },
                )?;
            }
            CollectionEvent::State(state) => {
                change.push(FrameKind::ResponseActionCollectionState, &state)?;
            }
        }
    }
    change.send()
}
