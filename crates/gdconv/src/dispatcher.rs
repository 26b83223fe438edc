//! # RPC Dispatcher
//!
//! Worker-side interpreter for inbound requests. Each request frame produces
//! exactly one response frame.
//!
//! ## Failure handling
//!
//! Every failure raised while executing an operation is caught here and
//! returned as a `success: false` response. Engine errors are first encoded
//! with their attached payload; when that payload does not serialize, the
//! error is projected to a plain `{ name, message, stack, kind }` record and
//! sent instead. An error is never dropped.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use gdrpc::Call;
use gdrpc::ConversionSummary;
use gdrpc::ErrorKind;
use gdrpc::LevelInfo;
use gdrpc::ProtocolError;
use gdrpc::Request;
use gdrpc::Response;
use gdrpc::SerializedError;
use gdrpc::TrackingId;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use tracing::debug;
use tracing::error;
use tracing::warn;

use crate::engine::Bootstrap;
use crate::engine::Engine;
use crate::engine::ForeignError;
use crate::handles;
use crate::handles::HandleTable;
use crate::lifecycle;
use crate::lifecycle::Lifecycle;

/// An engine-resident object held in the handle table.
pub enum Resident<E: Engine> {
    Level(E::Level),
    Report(E::Report),
}

impl<E: Engine> Resident<E> {
    fn level(&self, id: TrackingId) -> handles::Result<&E::Level> {
        match self {
            Self::Level(level) => Ok(level),
            Self::Report(_) => Err(handles::Error::KindMismatch { id, expected: "level" }),
        }
    }

    fn level_mut(&mut self, id: TrackingId) -> handles::Result<&mut E::Level> {
        match self {
            Self::Level(level) => Ok(level),
            Self::Report(_) => Err(handles::Error::KindMismatch { id, expected: "level" }),
        }
    }

    fn report(&self, id: TrackingId) -> handles::Result<&E::Report> {
        match self {
            Self::Report(report) => Ok(report),
            Self::Level(_) => Err(handles::Error::KindMismatch { id, expected: "report" }),
        }
    }
}

/// Why an operation did not produce a value.
enum Failure {
    Engine { kind: ErrorKind, error: ForeignError },
    Bootstrap(Arc<ForeignError>),
    Local(SerializedError),
}

impl Failure {
    fn parse(error: ForeignError) -> Self {
        Self::Engine { kind: ErrorKind::ParseFailure, error }
    }

    fn conversion(error: ForeignError) -> Self {
        Self::Engine { kind: ErrorKind::ConversionFailure, error }
    }

    fn engine(error: ForeignError) -> Self {
        Self::Engine { kind: ErrorKind::EngineFailure, error }
    }

    fn kind(&self) -> ErrorKind {
        match self {
            Self::Engine { kind, .. } => *kind,
            Self::Bootstrap(_) => ErrorKind::InitializationFailure,
            Self::Local(record) => record.kind,
        }
    }

    fn foreign(&self) -> Option<&ForeignError> {
        match self {
            Self::Engine { error, .. } => Some(error),
            Self::Bootstrap(error) => Some(error),
            Self::Local(_) => None,
        }
    }

    /// The error record without any engine payload.
    fn projected(&self) -> SerializedError {
        match (self, self.foreign()) {
            (Self::Local(record), _) => record.clone(),
            (_, Some(error)) => SerializedError::new(self.kind(), error.name.clone(), error.message.clone())
                .with_stack(error.stack.clone().unwrap_or_default()),
            (_, None) => SerializedError::new(self.kind(), "Error", "unknown failure"),
        }
    }

    /// The full error record, including the engine payload.
    ///
    /// Fails when the payload cannot be serialized.
    fn native(&self) -> serde_json::Result<Value> {
        let mut record = self.projected();
        if let Some(data) = self.foreign().and_then(|e| e.data()) {
            record.data = Some(data.to_json()?);
        }
        serde_json::to_value(record)
    }
}

impl From<ProtocolError> for Failure {
    fn from(e: ProtocolError) -> Self {
        Self::Local(SerializedError::from_protocol(&e))
    }
}

impl From<handles::Error> for Failure {
    fn from(e: handles::Error) -> Self {
        Self::Local(SerializedError::new(ErrorKind::HandleNotFound, "HandleNotFound", e.to_string()))
    }
}

impl From<lifecycle::Error> for Failure {
    fn from(e: lifecycle::Error) -> Self {
        match e {
            lifecycle::Error::NotInitialized => {
                Self::Local(SerializedError::new(ErrorKind::NotInitialized, "NotInitialized", e.to_string()))
            }
            lifecycle::Error::Bootstrap(error) => Self::Bootstrap(error),
        }
    }
}

type Outcome = std::result::Result<Value, Failure>;

fn to_value<T: Serialize>(value: T) -> Outcome {
    serde_json::to_value(value)
        .map_err(|e| Failure::Local(SerializedError::new(ErrorKind::EngineFailure, "DataCloneError", e.to_string())))
}

/// Executes requests against one engine and one handle table.
pub struct Dispatcher<B: Bootstrap> {
    lifecycle: Lifecycle<B>,
    handles: Mutex<HandleTable<Resident<B::Engine>>>,
}

impl<B: Bootstrap> Dispatcher<B> {
    pub fn new(bootstrap: B) -> Self {
        Self {
            lifecycle: Lifecycle::new(bootstrap),
            handles: Mutex::new(HandleTable::new()),
        }
    }

    pub fn lifecycle(&self) -> &Lifecycle<B> {
        &self.lifecycle
    }

    /// Number of engine objects currently held.
    pub fn handle_count(&self) -> usize {
        self.handles().len()
    }

    /// Handles one inbound frame and returns the encoded response.
    ///
    /// Returns `None` only when the frame is so malformed that it carries no
    /// promise id to answer.
    pub async fn dispatch(&self, payload: &[u8]) -> Option<Vec<u8>> {
        let request = match Request::decode(payload) {
            Ok(request) => request,
            Err(e) => {
                let Some(promise_id) = gdrpc::decode_promise_id(payload) else {
                    error!(error = %e, "dropping frame without a promise id");
                    return None;
                };
                return Some(self.reply(promise_id, "<malformed>", Err(Failure::from(e))));
            }
        };

        let promise_id = request.promise_id;
        debug!(promise_id, op = %request.op, "dispatching request");

        let outcome = match request.call() {
            Ok(call) => self.execute(promise_id, call).await,
            Err(e) => Err(Failure::from(e)),
        };

        Some(self.reply(promise_id, &request.op, outcome))
    }

    /// Runs one decoded call.
    ///
    /// Load and convert results are stored under the tracking id derived from
    /// `promise_id`, the id of the request that produced them.
    async fn execute(&self, promise_id: u64, call: Call) -> Outcome {
        let tracking = TrackingId::from_promise(promise_id);

        match call {
            Call::InitializeEngine => {
                self.lifecycle.initialize().await?;
                Ok(Value::Null)
            }
            Call::ResetState => {
                let cleared = self.handles().clear();
                debug!(cleared, "handle table cleared");
                Ok(Value::Null)
            }
            Call::GetConversionGroups => {
                let engine = self.lifecycle.engine()?;
                to_value(engine.conversion_groups().map_err(Failure::engine)?)
            }
            Call::GetMetagroup { name } => {
                let engine = self.lifecycle.engine()?;
                to_value(engine.metagroup(&name).map_err(Failure::engine)?)
            }
            Call::GetGmdInfo { level_text } => {
                let engine = self.lifecycle.engine()?;
                let level = engine.parse_level(&level_text).map_err(Failure::parse)?;
                let details = engine.level_details(&level).map_err(Failure::parse)?;
                self.handles().store(tracking, Resident::Level(level));

                to_value(LevelInfo {
                    tracking_id: tracking,
                    name: details.name,
                    description: details.description,
                })
            }
            Call::RunConversion { level, groups } => {
                let engine = self.lifecycle.engine()?;
                let counts = {
                    let mut handles = self.handles();
                    let id = level.tracking_id;
                    let level = handles.get_mut(id)?.level_mut(id)?;
                    let report = engine.convert(level, &groups).map_err(Failure::conversion)?;
                    let counts = engine.report_counts(&report).map_err(Failure::conversion)?;

                    // an inconsistent report is never stored
                    if counts.removed as u64 > counts.preconversion {
                        let message = format!(
                            "engine reported {} removed objects out of {}",
                            counts.removed, counts.preconversion
                        );
                        return Err(Failure::Local(SerializedError::new(
                            ErrorKind::ConversionFailure,
                            "ConversionError",
                            message,
                        )));
                    }

                    handles.store(tracking, Resident::Report(report));
                    counts
                };

                to_value(ConversionSummary::new(tracking, counts.removed, counts.preconversion))
            }
            Call::LevelToGmd { level } => {
                let engine = self.lifecycle.engine()?;
                let handles = self.handles();
                let id = level.tracking_id;
                let level = handles.get(id)?.level(id)?;
                to_value(engine.serialize_level(level).map_err(Failure::engine)?)
            }
            Call::Base64Decode { text } => {
                let engine = self.lifecycle.engine()?;
                to_value(engine.base64_decode(&text).map_err(Failure::engine)?)
            }
            Call::ParseReports { report } => {
                let engine = self.lifecycle.engine()?;
                let handles = self.handles();
                let id = report.tracking_id;
                let report = handles.get(id)?.report(id)?;
                to_value(engine.describe_report(report).map_err(Failure::engine)?)
            }
            Call::GetVersion => {
                let engine = self.lifecycle.engine()?;
                to_value(engine.version().map_err(Failure::engine)?)
            }
        }
    }

    fn reply(&self, promise_id: u64, op: &str, outcome: Outcome) -> Vec<u8> {
        let response = match outcome {
            Ok(value) => {
                debug!(promise_id, op, "request succeeded");
                Response::success(promise_id, value)
            }
            Err(failure) => {
                let kind = failure.kind();
                if kind.is_defect() {
                    error!(promise_id, op, %kind, "protocol misuse between controller and worker");
                } else {
                    debug!(promise_id, op, %kind, "request failed");
                }

                let value = match failure.native() {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(promise_id, op, error = %e, "error payload did not serialize, sending projection");
                        let record = failure.projected();
                        json!({
                            "name": record.name,
                            "message": record.message,
                            "stack": record.stack,
                            "kind": record.kind,
                        })
                    }
                };
                Response::failure(promise_id, value)
            }
        };

        match response.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(promise_id, op, error = %e, "response did not encode");
                let fallback = Response::failure(
                    promise_id,
                    json!({ "name": "DataCloneError", "message": e.to_string(), "stack": "" }),
                );
                fallback.encode().unwrap_or_default()
            }
        }
    }

    fn handles(&self) -> MutexGuard<'_, HandleTable<Resident<B::Engine>>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
