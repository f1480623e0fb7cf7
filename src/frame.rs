//! # Parcel-RPC Frame Format
//!
//! Every transport message is one [`Frame`]: a client-assigned call id, a
//! [`FrameKind`] tag, and an opaque body. The body is postcard-encoded
//! against a shape chosen by the kind; schema-described payloads use
//! [`Value`](crate::value::Value), fixed protocol payloads use the typed
//! bodies in this module.
//!
//! Frames correlate by `id`: every reply to a call carries the call's id,
//! and control messages reuse the id of the call they target. Composite
//! kinds ([`FrameKind::ResponseActionCollection`] and
//! [`FrameKind::ResponseActionCollectionChange`]) carry an ordered sequence
//! of [`SubFrame`]s in their body and are delivered atomically.
//!
//! The kind enumeration is a closed set and its variant order is the wire
//! encoding. New kinds may only be appended.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::schema::ValidationFailure;
use crate::value::Value;

/// The message type tag of a [`Frame`].
///
/// Variant order is wire-stable; postcard encodes the discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameKind {
    /// Request the parameter/result description of an action
    ActionType,
    /// Invoke an action
    Action,
    /// Open a client subscription on a stream-result call
    ActionObservableSubscribe,
    /// Close one client subscription on a stream-result call
    ActionObservableUnsubscribe,
    /// Cancel the server-held subscription of a subject-result call
    ActionObservableSubjectUnsubscribe,
    /// Stop diff-streaming a collection-result call
    ResponseActionCollectionUnsubscribe,
    /// Reply to [`FrameKind::ActionType`]
    ResponseActionType,
    /// A plain single-value action result
    ResponseActionSimple,
    /// A single-value result the client materializes as a live entity handle
    ResponseEntity,
    /// Announces that a call produced a push source
    ResponseActionObservable,
    /// One value pushed from a source
    ResponseActionObservableNext,
    /// A push source failed mid-stream
    ResponseActionObservableError,
    /// A push source completed
    ResponseActionObservableComplete,
    /// Composite: opening snapshot of a collection result
    ResponseActionCollection,
    /// Sub-frame: the collection's query model
    ResponseActionCollectionModel,
    /// Sub-frame: the collection's state
    ResponseActionCollectionState,
    /// Sub-frame: a full snapshot of the collection's items
    ResponseActionCollectionSet,
    /// Composite: one batch of collection change events
    ResponseActionCollectionChange,
    /// Sub-frame: items added to the collection
    ResponseActionCollectionAdd,
    /// Sub-frame: item ids removed from the collection
    ResponseActionCollectionRemove,
    /// A call-level error
    Error,
}

/// A single transport message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Call id, assigned by the client
    pub id: u32,
    /// Message type tag
    pub kind: FrameKind,
    /// Postcard-encoded body, decoded against a shape chosen by `kind`
    pub body: Vec<u8>,
}

impl Frame {
    /// Encode `body` and build a frame
    pub fn new<T: Serialize + ?Sized>(
        id: u32,
        kind: FrameKind,
        body: &T,
    ) -> Result<Self, postcard::Error> {
        Ok(Self {
            id,
            kind,
            body: postcard::to_stdvec(body)?,
        })
    }

    /// Decode the body under the given shape
    pub fn decode_body<T: DeserializeOwned>(&self) -> Result<T, postcard::Error> {
        postcard::from_bytes(&self.body)
    }

    /// Decode a composite body into its ordered sub-frames
    pub fn decode_composite(&self) -> Result<Vec<SubFrame>, postcard::Error> {
        self.decode_body()
    }

    /// Serialize the whole frame for the wire
    pub fn to_bytes(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_stdvec(self)
    }

    /// Deserialize a frame received from the wire
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}

/// One element of a composite frame body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubFrame {
    /// Message type tag of this element
    pub kind: FrameKind,
    /// Postcard-encoded body of this element
    pub body: Vec<u8>,
}

impl SubFrame {
    /// Encode `body` and build a sub-frame
    pub fn new<T: Serialize + ?Sized>(kind: FrameKind, body: &T) -> Result<Self, postcard::Error> {
        Ok(Self {
            kind,
            body: postcard::to_stdvec(body)?,
        })
    }

    /// Decode the body under the given shape
    pub fn decode_body<T: DeserializeOwned>(&self) -> Result<T, postcard::Error> {
        postcard::from_bytes(&self.body)
    }
}

/// The shape of push source a stream-result call produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObservableKind {
    /// Values flow only once a client subscription is opened
    Stream,
    /// Multicast; the server forwards values from call time on
    Subject,
    /// A subject that holds a current value and replays it on subscribe
    LatchedSubject,
}

/// Body of [`FrameKind::ResponseActionObservable`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObservableAnnouncement {
    /// Which shape the client should materialize
    pub kind: ObservableKind,
}

/// Body of a single-value result: `ResponseActionSimple` and `ResponseEntity`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultBody {
    /// The unwrapped return value
    pub v: Value,
}

/// Body of `ResponseActionCollectionSet` and `ResponseActionCollectionAdd`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemsBody {
    /// The affected items
    pub v: Vec<Value>,
}

/// Body of `ResponseActionCollectionRemove`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionRemove {
    /// Ids of the removed items
    pub ids: Vec<Value>,
}

/// Body of `ResponseActionObservableNext`.
///
/// `id` is the subscription id the value belongs to, not the call id; the
/// call id is on the enclosing frame. Server-held subject subscriptions
/// forward under the call id itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamItem {
    /// Subscription id
    pub id: u32,
    /// The pushed value
    pub v: Value,
}

/// Body of the subscribe/unsubscribe controls and of
/// `ResponseActionObservableComplete`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionId {
    /// Subscription id, assigned by the client per stream-result call
    pub id: u32,
}

/// Body of `ResponseActionObservableError`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservableFault {
    /// Subscription id the failure belongs to
    pub id: u32,
    /// The failure itself
    pub error: ErrorDetail,
}

/// Body of `ResponseActionType`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDescription {
    /// Parameter declarations, in call order
    pub parameters: Vec<crate::schema::Descriptor>,
    /// Declaration of the unwrapped return value
    pub result: crate::schema::Descriptor,
}

/// A general failure, with enough identity for the client to rebuild a
/// typed error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Declared class name of the original error, if it had one
    pub class_type: Option<String>,
    /// Human readable description
    pub message: String,
    /// Captured backtrace, if any
    pub stack: Option<String>,
}

/// Body of an [`FrameKind::Error`] frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireError {
    /// The call's arguments were rejected before invocation
    Validation(Vec<ValidationFailure>),
    /// Any other failure during handling
    General(ErrorDetail),
}

impl core::fmt::Display for WireError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            WireError::Validation(failures) => {
                f.write_str("validation failed: ")?;
                for (i, failure) in failures.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{failure}")?;
                }
                Ok(())
            }
            WireError::General(detail) => match &detail.class_type {
                Some(class) => write!(f, "{}: {}", class, detail.message),
                None => f.write_str(&detail.message),
            },
        }
    }
}

impl core::error::Error for WireError {}
