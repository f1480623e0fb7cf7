//! parcel-rpc: a dynamic-dispatch RPC server library
//!
//! The server side of a framed binary RPC protocol in which a call names a
//! controller and an action as strings, arguments are decoded and validated
//! against a runtime schema, and a single logical call may answer with:
//!
//! * a plain value (or a live entity handle),
//! * a push source delivering values over time,
//! * a live collection that is snapshotted once and then diff-streamed.
//!
//! The entry point is [`server::Dispatcher`], one per connection, usually
//! driven by [`server::Server`] over a [`server::WireTx`]/[`server::WireRx`]
//! transport pair. Controllers are declared in a
//! [`registry::ControllerRegistry`] and resolved to instances through a
//! [`registry::Injector`].
//!
//! Wire framing lives in [`frame`], schema handling in [`schema`], dynamic
//! payloads in [`value`], and the push source and collection types returned
//! by actions in [`source`].

pub mod frame;
pub mod registry;
pub mod schema;
pub mod server;
pub mod source;
pub mod value;

pub use frame::{Frame, FrameKind};
pub use server::{Dispatcher, Server};
pub use value::Value;
