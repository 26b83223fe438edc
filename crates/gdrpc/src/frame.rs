//! # Protocol Frames
//!
//! The two wire units: `Request` (controller to worker) and `Response`
//! (worker to controller).
//!
//! ## Invariants
//! - **Panic Safety**: decoding returns `Result`, never panicking on unknown data.
//! - **Correlation**: a `Response` carries the `promise_id` of the `Request`
//!   it answers; nothing else ties the two together.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::error::ProtocolError;
use crate::error::Result;
use crate::error::SerializedError;
use crate::operation::Call;
use crate::operation::Operation;

/// An inbound or outbound request.
///
/// `op` stays a raw string until `call()` is invoked, so an unrecognized type
/// can still be answered with an error naming it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "type")]
    pub op: String,
    pub promise_id: u64,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl Request {
    pub fn new(promise_id: u64, call: &Call) -> Result<Self> {
        Ok(Self {
            op: call.op().as_str().to_string(),
            promise_id,
            args: call.args()?,
        })
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Resolves the operation and decodes its arguments.
    pub fn call(&self) -> Result<Call> {
        let op = Operation::from_name(&self.op)?;
        Call::decode(op, &self.args)
    }
}

/// The single reply to a `Request`.
///
/// On success `value` is the operation's result (`null` for operations that
/// return nothing). On failure it is a `SerializedError` record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub promise_id: u64,
    #[serde(default)]
    pub value: Value,
    pub success: bool,
}

impl Response {
    pub fn success(promise_id: u64, value: Value) -> Self {
        Self { promise_id, value, success: true }
    }

    /// A failure reply whose value is already in wire form.
    pub fn failure(promise_id: u64, value: Value) -> Self {
        Self { promise_id, value, success: false }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    pub fn into_result(self) -> std::result::Result<Value, SerializedError> {
        if self.success {
            Ok(self.value)
        } else {
            Err(SerializedError::from_value(self.value))
        }
    }
}

/// Reads just the promise id from a raw frame.
///
/// Used to answer a request whose body failed to decode.
pub fn decode_promise_id(bytes: &[u8]) -> Option<u64> {
    let value: Value = serde_json::from_slice(bytes).ok()?;
    value.get("promise_id")?.as_u64()
}
