//! # gdrpc
//!
//! The message protocol spoken between the converter page (the controller)
//! and the isolated worker that hosts the conversion engine.
//!
//! ## Architecture
//!
//! - **Symmetric**: every `Request` yields exactly one `Response` carrying the
//!   same `promise_id`. There is no streaming and no one-way message.
//! - **Closed catalog**: the request `type` is resolved against `Operation`,
//!   and the positional arguments against the fixed shape of that operation
//!   (`Call`). Anything else is rejected before it reaches the engine.
//! - **Errors as data**: a failed operation is a `Response` with
//!   `success: false` and a `SerializedError` as its value.
//!
//! Messages are JSON text carried as byte buffers.

mod error;
mod frame;
mod operation;
mod types;

pub use error::ErrorKind;
pub use error::ProtocolError;
pub use error::Result;
pub use error::SerializedError;
pub use frame::Request;
pub use frame::Response;
pub use frame::decode_promise_id;
pub use operation::Call;
pub use operation::Operation;
pub use types::ConversionSummary;
pub use types::LevelInfo;
pub use types::TrackingId;
pub use types::TrackingRef;

#[cfg(test)]
mod tests;
