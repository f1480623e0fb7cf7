//! The server side: transports, the response channel, and the dispatcher
//!
//! One [`Dispatcher`] exists per connection. Inbound frames are routed by
//! kind: action calls and type lookups run through the invoker, control
//! frames (subscribe/unsubscribe) go straight to the per-call resource
//! tables. All outbound frames are enqueued on a single channel drained by
//! an output worker, so emission is strictly FIFO per connection and
//! subscription callbacks can emit without suspending.
//!
//! The dispatcher is serialized: [`Server::run`] handles one inbound frame
//! at a time, and the only suspension points are the awaited action future
//! and transport back-pressure in the output worker.

pub mod action;
pub mod collection;
pub mod observable;
pub mod types;

#[cfg(feature = "test-utils")]
pub mod channel;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

use crate::frame::{ErrorDetail, Frame, FrameKind, SubFrame, WireError};
use crate::registry::{ActionError, ActionGuard, ControllerRegistry, Injector};
use crate::schema::ValidationFailure;
use crate::server::collection::CollectionEntry;
use crate::server::observable::ObservableEntry;
use crate::server::types::TypeCache;

//////////////////////////////////////////////////////////////////////////////
// ERRORS
//////////////////////////////////////////////////////////////////////////////

/// Any failure while handling one inbound frame.
///
/// Every variant is reported to the client as a single [`FrameKind::Error`]
/// frame; nothing escapes to the transport.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The named controller is not registered
    #[error("controller '{0}' is not registered")]
    UnknownController(String),
    /// The controller has no action of the given name
    #[error("controller '{controller}' has no action '{method}'")]
    UnknownAction {
        /// Controller id
        controller: String,
        /// Requested action
        method: String,
    },
    /// A wrapped return type without a declared element type
    #[error("action '{method}' declares a {wrapper} result without an element type")]
    MissingGeneric {
        /// The declaring action
        method: String,
        /// The wrapper kind missing its element
        wrapper: &'static str,
    },
    /// The arguments were rejected before invocation
    #[error("argument validation failed")]
    Validation(Vec<ValidationFailure>),
    /// The action body (or the injector or guard) failed
    #[error(transparent)]
    Action(#[from] ActionError),
    /// A control message could not be applied
    #[error("{0}")]
    Control(String),
    /// The message body could not be decoded or a reply not encoded
    #[error("malformed message body: {0}")]
    Codec(#[from] postcard::Error),
}

impl DispatchError {
    /// Encode this failure as a wire error body
    pub fn to_wire(&self) -> WireError {
        match self {
            DispatchError::Validation(failures) => WireError::Validation(failures.clone()),
            DispatchError::Action(e) => WireError::General(e.clone().into()),
            other => WireError::General(ErrorDetail {
                class_type: None,
                message: other.to_string(),
                stack: None,
            }),
        }
    }
}

//////////////////////////////////////////////////////////////////////////////
// TX / RX
//////////////////////////////////////////////////////////////////////////////

/// Wire transmit interface.
///
/// Takes one frame, performs transport encoding, and sends it. All errors
/// are treated as fatal for the connection.
pub trait WireTx: Send + 'static {
    /// Transmit error type
    type Error: core::fmt::Debug + Send;
    /// Send a single frame
    fn send(&mut self, frame: Frame) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Wire receive interface.
///
/// Accumulates one serialized frame and returns it. All errors are treated
/// as fatal for the connection.
pub trait WireRx: Send + 'static {
    /// Receive error type
    type Error: core::fmt::Debug + Send;
    /// Receive a single serialized frame
    fn receive(&mut self) -> impl Future<Output = Result<Vec<u8>, Self::Error>> + Send;
}

//////////////////////////////////////////////////////////////////////////////
// SENDER
//////////////////////////////////////////////////////////////////////////////

/// The response channel: enqueue-only, strictly FIFO.
///
/// Frames are queued towards the output worker without suspending, which
/// lets synchronous subscription callbacks emit. Enqueueing after the
/// connection closed drops the frame.
#[derive(Clone)]
pub struct Sender {
    out: mpsc::UnboundedSender<Frame>,
}

impl Sender {
    pub(crate) fn new(out: mpsc::UnboundedSender<Frame>) -> Self {
        Self { out }
    }

    /// Encode one reply frame correlated with the given call id
    pub fn reply<T: Serialize + ?Sized>(
        &self,
        id: u32,
        kind: FrameKind,
        body: &T,
    ) -> Result<(), postcard::Error> {
        self.enqueue(Frame::new(id, kind, body)?);
        Ok(())
    }

    /// Begin a composite frame; sub-frames are emitted atomically on
    /// [`CompositeFrame::send`]
    pub fn composite(&self, id: u32, kind: FrameKind) -> CompositeFrame {
        CompositeFrame {
            sender: self.clone(),
            id,
            kind,
            parts: Vec::new(),
        }
    }

    /// Encode and emit an error frame for the given call id
    pub fn error(&self, id: u32, err: &DispatchError) {
        match Frame::new(id, FrameKind::Error, &err.to_wire()) {
            Ok(frame) => self.enqueue(frame),
            Err(e) => error!("failed to encode error frame: {e}"),
        }
    }

    fn enqueue(&self, frame: Frame) {
        if self.out.send(frame).is_err() {
            trace!("connection closed, dropping outbound frame");
        }
    }
}

/// A batched frame under construction
pub struct CompositeFrame {
    sender: Sender,
    id: u32,
    kind: FrameKind,
    parts: Vec<SubFrame>,
}

impl CompositeFrame {
    /// Append one sub-frame
    pub fn push<T: Serialize + ?Sized>(
        &mut self,
        kind: FrameKind,
        body: &T,
    ) -> Result<(), postcard::Error> {
        self.parts.push(SubFrame::new(kind, body)?);
        Ok(())
    }

    /// Emit the composite as a single frame
    pub fn send(self) -> Result<(), postcard::Error> {
        self.sender.reply(self.id, self.kind, &self.parts)
    }
}

//////////////////////////////////////////////////////////////////////////////
// DISPATCHER
//////////////////////////////////////////////////////////////////////////////

pub(crate) struct Shared {
    pub(crate) sender: Sender,
    pub(crate) registry: ControllerRegistry,
    pub(crate) injector: Arc<dyn Injector>,
    pub(crate) guard: Option<Arc<dyn ActionGuard>>,
    pub(crate) types: TypeCache,
    pub(crate) observables: Mutex<HashMap<u32, ObservableEntry>>,
    pub(crate) collections: Mutex<HashMap<u32, CollectionEntry>>,
}

/// The per-connection action dispatcher.
///
/// Cloning is cheap and shares all state; clones are used by the workers
/// that forward stream and collection traffic.
#[derive(Clone)]
pub struct Dispatcher {
    pub(crate) shared: Arc<Shared>,
}

impl Dispatcher {
    /// Create a dispatcher.
    ///
    /// Returns the dispatcher and the stream of outbound frames; feed the
    /// stream to an output worker (see [`Server::new`]) or drain it
    /// directly in tests.
    pub fn new(
        registry: ControllerRegistry,
        injector: Arc<dyn Injector>,
    ) -> (Self, mpsc::UnboundedReceiver<Frame>) {
        Self::build(registry, injector, None)
    }

    /// Create a dispatcher with an authorization guard
    pub fn with_guard(
        registry: ControllerRegistry,
        injector: Arc<dyn Injector>,
        guard: Arc<dyn ActionGuard>,
    ) -> (Self, mpsc::UnboundedReceiver<Frame>) {
        Self::build(registry, injector, Some(guard))
    }

    fn build(
        registry: ControllerRegistry,
        injector: Arc<dyn Injector>,
        guard: Option<Arc<dyn ActionGuard>>,
    ) -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let me = Self {
            shared: Arc::new(Shared {
                sender: Sender::new(tx),
                registry,
                injector,
                guard,
                types: TypeCache::new(),
                observables: Mutex::new(HashMap::new()),
                collections: Mutex::new(HashMap::new()),
            }),
        };
        (me, rx)
    }

    /// Handle one inbound frame.
    ///
    /// Never panics the connection: every failure is reported as a single
    /// error frame correlated with the inbound id.
    pub async fn handle(&self, frame: Frame) {
        trace!(id = frame.id, kind = ?frame.kind, "inbound frame");
        let result = match frame.kind {
            FrameKind::Action => self.handle_action(&frame).await,
            FrameKind::ActionType => self.handle_action_types(&frame),
            FrameKind::ActionObservableSubscribe => self.subscribe_observable(&frame),
            FrameKind::ActionObservableUnsubscribe => self.unsubscribe_observable(&frame),
            FrameKind::ActionObservableSubjectUnsubscribe => self.unsubscribe_subject(&frame),
            FrameKind::ResponseActionCollectionUnsubscribe => self.unsubscribe_collection(&frame),
            other => {
                warn!(id = frame.id, kind = ?other, "ignoring non-request frame");
                Ok(())
            }
        };
        if let Err(e) = result {
            debug!(id = frame.id, "call failed: {e}");
            self.shared.sender.error(frame.id, &e);
        }
    }

    /// Tear down every per-call resource owned by this connection.
    ///
    /// Invoked by [`Server::run`] when the transport closes; also available
    /// directly for embedders driving [`Dispatcher::handle`] themselves.
    pub fn close(&self) {
        let observables: Vec<_> = {
            let mut map = self.shared.observables.lock().unwrap();
            map.drain().collect()
        };
        for (id, entry) in observables {
            trace!(id, "releasing observable entry");
            entry.cancel();
        }
        let collections: Vec<_> = {
            let mut map = self.shared.collections.lock().unwrap();
            map.drain().collect()
        };
        for (id, entry) in collections {
            trace!(id, "releasing collection entry");
            entry.cancel();
        }
        debug!("dispatcher closed");
    }
}

//////////////////////////////////////////////////////////////////////////////
// SERVER
//////////////////////////////////////////////////////////////////////////////

/// Drives one connection: receives frames, dispatches them, and owns the
/// output worker
pub struct Server<Rx: WireRx> {
    dispatcher: Dispatcher,
    rx: Rx,
}

impl<Rx: WireRx> Server<Rx> {
    /// Wire a dispatcher to its transports. Spawns the output worker.
    pub fn new<Tx: WireTx>(
        tx: Tx,
        rx: Rx,
        dispatcher: Dispatcher,
        outgoing: mpsc::UnboundedReceiver<Frame>,
    ) -> Self {
        tokio::spawn(out_worker(tx, outgoing));
        Self { dispatcher, rx }
    }

    /// The dispatcher driven by this server
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Run until the transport closes, then release all per-call resources
    pub async fn run(&mut self) {
        loop {
            let bytes = match self.rx.receive().await {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!("connection closed: {e:?}");
                    break;
                }
            };
            let frame = match Frame::from_bytes(&bytes) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("undecodable frame: {e}");
                    continue;
                }
            };
            self.dispatcher.handle(frame).await;
        }
        self.dispatcher.close();
    }
}

/// Output worker, draining the dispatcher's frames onto the wire
async fn out_worker<W>(mut wire: W, mut rec: mpsc::UnboundedReceiver<Frame>)
where
    W: WireTx,
{
    loop {
        let Some(frame) = rec.recv().await else {
            debug!("dispatcher dropped, output worker exiting");
            return;
        };
        if let Err(e) = wire.send(frame).await {
            error!("output queue error: {e:?}, exiting");
            return;
        }
    }
}
