//! # Error Definitions
//!
//! Two families live here:
//!
//! - `ProtocolError`: the message itself could not be read or written.
//! - `SerializedError`: the record carried by a failed `Response`. It is plain
//!   data so it can cross the channel whatever the engine originally raised.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::operation::Operation;

/// Failures while reading or writing protocol messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The bytes were not a well-formed message.
    Malformed(String),
    /// The request named a `type` outside the operation catalog.
    UnknownOperation(String),
    /// The positional arguments did not match the operation's fixed shape.
    InvalidArguments { op: Operation, details: String },
    /// A value could not be encoded onto the wire.
    Encode(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(msg) => write!(f, "malformed message: {}", msg),
            Self::UnknownOperation(ty) => write!(f, "unrecognized message type: {}", ty),
            Self::InvalidArguments { op, details } => write!(f, "invalid arguments for '{}': {}", op, details),
            Self::Encode(msg) => write!(f, "failed to encode message: {}", msg),
        }
    }
}

impl std::error::Error for ProtocolError {}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Classification of a failed call, shared by both sides of the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The engine rejected the input level.
    ParseFailure,
    /// The engine raised during conversion.
    ConversionFailure,
    /// Any other engine-raised failure.
    #[default]
    EngineFailure,
    /// A tracking id was not present in the worker's handle table.
    HandleNotFound,
    /// The request `type` is not part of the catalog.
    UnknownOperation,
    /// The request arguments did not match the operation.
    InvalidArguments,
    /// The request could not be decoded at all.
    MalformedRequest,
    /// An operation needing the engine arrived before initialization finished.
    NotInitialized,
    /// Engine bootstrap failed.
    InitializationFailure,
}

impl ErrorKind {
    /// True for failures that point at a bug in the controller/worker pairing
    /// rather than at bad user input or a flaky engine.
    pub fn is_defect(self) -> bool {
        matches!(
            self,
            Self::HandleNotFound | Self::UnknownOperation | Self::InvalidArguments | Self::MalformedRequest
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ParseFailure => "parse_failure",
            Self::ConversionFailure => "conversion_failure",
            Self::EngineFailure => "engine_failure",
            Self::HandleNotFound => "handle_not_found",
            Self::UnknownOperation => "unknown_operation",
            Self::InvalidArguments => "invalid_arguments",
            Self::MalformedRequest => "malformed_request",
            Self::NotInitialized => "not_initialized",
            Self::InitializationFailure => "initialization_failure",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error record carried in the `value` of a failed `Response`.
///
/// `name`, `message` and `stack` are always present on the wire. `data` is
/// whatever extra payload the engine attached, when it could be serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedError {
    pub name: String,
    pub message: String,
    #[serde(default)]
    pub stack: String,
    #[serde(default)]
    pub kind: ErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl SerializedError {
    pub fn new(kind: ErrorKind, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: String::new(),
            kind,
            data: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = stack.into();
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Describes a request that never reached an operation handler.
    pub fn from_protocol(err: &ProtocolError) -> Self {
        let (kind, name) = match err {
            ProtocolError::Malformed(_) => (ErrorKind::MalformedRequest, "SyntaxError"),
            ProtocolError::UnknownOperation(_) => (ErrorKind::UnknownOperation, "TypeError"),
            ProtocolError::InvalidArguments { .. } => (ErrorKind::InvalidArguments, "TypeError"),
            ProtocolError::Encode(_) => (ErrorKind::EngineFailure, "DataCloneError"),
        };
        Self::new(kind, name, err.to_string())
    }

    /// Reads an error value off the wire. A value that is not a well-formed
    /// record is kept verbatim as the message rather than dropped.
    pub fn from_value(value: Value) -> Self {
        match serde_json::from_value::<SerializedError>(value.clone()) {
            Ok(err) => err,
            Err(_) => {
                let message = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                Self::new(ErrorKind::EngineFailure, "Error", message)
            }
        }
    }
}

impl std::fmt::Display for SerializedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for SerializedError {}
