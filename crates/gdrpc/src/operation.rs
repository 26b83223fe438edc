//! # Operation Catalog
//!
//! The closed set of request types and the argument shape of each.
//!
//! Decoding is two-step: the `type` string resolves to an `Operation` first,
//! then the positional arguments decode into the matching `Call` variant. A
//! handler that matches on `Call` is therefore checked for exhaustiveness by
//! the compiler.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ProtocolError;
use crate::error::Result;
use crate::types::TrackingRef;

/// Every request type the worker understands.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    InitializeEngine,
    GetConversionGroups,
    GetMetagroup,
    GetGmdInfo,
    RunConversion,
    LevelToGmd,
    Base64Decode,
    ParseReports,
    ResetState,
    GetVersion,
}

impl Operation {
    pub const ALL: [Operation; 10] = [
        Self::InitializeEngine,
        Self::GetConversionGroups,
        Self::GetMetagroup,
        Self::GetGmdInfo,
        Self::RunConversion,
        Self::LevelToGmd,
        Self::Base64Decode,
        Self::ParseReports,
        Self::ResetState,
        Self::GetVersion,
    ];

    /// The wire name carried in the request's `type` field.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InitializeEngine => "initialize_engine",
            Self::GetConversionGroups => "get_conversion_groups",
            Self::GetMetagroup => "get_metagroup",
            Self::GetGmdInfo => "get_gmd_info",
            Self::RunConversion => "run_conversion",
            Self::LevelToGmd => "level_to_gmd",
            Self::Base64Decode => "base64_decode",
            Self::ParseReports => "parse_reports",
            Self::ResetState => "reset_state",
            Self::GetVersion => "get_version",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == name)
            .ok_or_else(|| ProtocolError::UnknownOperation(name.to_string()))
    }

    /// Number of positional arguments the operation takes.
    pub fn arity(self) -> usize {
        match self {
            Self::GetMetagroup | Self::GetGmdInfo | Self::LevelToGmd | Self::Base64Decode | Self::ParseReports => 1,
            Self::RunConversion => 2,
            Self::InitializeEngine | Self::GetConversionGroups | Self::ResetState | Self::GetVersion => 0,
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Operation {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s)
    }
}

/// A request with its arguments decoded into the operation's fixed shape.
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    InitializeEngine,
    GetConversionGroups,
    GetMetagroup { name: String },
    GetGmdInfo { level_text: String },
    RunConversion { level: TrackingRef, groups: Vec<String> },
    LevelToGmd { level: TrackingRef },
    Base64Decode { text: String },
    ParseReports { report: TrackingRef },
    ResetState,
    GetVersion,
}

impl Call {
    pub fn op(&self) -> Operation {
        match self {
            Self::InitializeEngine => Operation::InitializeEngine,
            Self::GetConversionGroups => Operation::GetConversionGroups,
            Self::GetMetagroup { .. } => Operation::GetMetagroup,
            Self::GetGmdInfo { .. } => Operation::GetGmdInfo,
            Self::RunConversion { .. } => Operation::RunConversion,
            Self::LevelToGmd { .. } => Operation::LevelToGmd,
            Self::Base64Decode { .. } => Operation::Base64Decode,
            Self::ParseReports { .. } => Operation::ParseReports,
            Self::ResetState => Operation::ResetState,
            Self::GetVersion => Operation::GetVersion,
        }
    }

    /// Encodes the arguments as the positional sequence sent on the wire.
    pub fn args(&self) -> Result<Vec<Value>> {
        let args = match self {
            Self::InitializeEngine | Self::GetConversionGroups | Self::ResetState | Self::GetVersion => Vec::new(),
            Self::GetMetagroup { name } => vec![encode_arg(name)?],
            Self::GetGmdInfo { level_text } => vec![encode_arg(level_text)?],
            Self::RunConversion { level, groups } => vec![encode_arg(level)?, encode_arg(groups)?],
            Self::LevelToGmd { level } => vec![encode_arg(level)?],
            Self::Base64Decode { text } => vec![encode_arg(text)?],
            Self::ParseReports { report } => vec![encode_arg(report)?],
        };
        Ok(args)
    }

    /// Decodes positional arguments for `op`.
    ///
    /// The argument count must match exactly.
    pub fn decode(op: Operation, args: &[Value]) -> Result<Self> {
        if args.len() != op.arity() {
            return Err(ProtocolError::InvalidArguments {
                op,
                details: format!("expected {} arguments, got {}", op.arity(), args.len()),
            });
        }

        let call = match op {
            Operation::InitializeEngine => Self::InitializeEngine,
            Operation::GetConversionGroups => Self::GetConversionGroups,
            Operation::GetMetagroup => Self::GetMetagroup { name: decode_arg(op, args, 0)? },
            Operation::GetGmdInfo => Self::GetGmdInfo { level_text: decode_arg(op, args, 0)? },
            Operation::RunConversion => Self::RunConversion {
                level: decode_arg(op, args, 0)?,
                groups: decode_arg(op, args, 1)?,
            },
            Operation::LevelToGmd => Self::LevelToGmd { level: decode_arg(op, args, 0)? },
            Operation::Base64Decode => Self::Base64Decode { text: decode_arg(op, args, 0)? },
            Operation::ParseReports => Self::ParseReports { report: decode_arg(op, args, 0)? },
            Operation::ResetState => Self::ResetState,
            Operation::GetVersion => Self::GetVersion,
        };
        Ok(call)
    }
}

fn encode_arg<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| ProtocolError::Encode(e.to_string()))
}

fn decode_arg<T: DeserializeOwned>(op: Operation, args: &[Value], index: usize) -> Result<T> {
    // arity was checked by the caller
    let value = args[index].clone();
    serde_json::from_value(value).map_err(|e| ProtocolError::InvalidArguments {
        op,
        details: format!("argument {}: {}", index, e),
    })
}
