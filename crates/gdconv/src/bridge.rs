//! # RPC Bridge
//!
//! Controller-side end of the channel. Each protocol operation is exposed as
//! a single async call that resolves with the worker's result or fails.
//!
//! A background pump task reads every inbound frame and routes it to the
//! pending call with the same `promise_id`. Responses may arrive in any
//! order.
//!
//! ## Faults
//!
//! Problems that cannot be pinned on one call (a frame that does not decode,
//! the worker hanging up, the transport failing) go to the fault handler
//! given at construction. Calls pending at that moment are left as they are;
//! the owner decides whether to `abandon_pending`.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use gdrpc::Call;
use gdrpc::ConversionSummary;
use gdrpc::LevelInfo;
use gdrpc::Operation;
use gdrpc::ProtocolError;
use gdrpc::Request;
use gdrpc::Response;
use gdrpc::SerializedError;
use gdrpc::TrackingRef;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;

use crate::transport;
use crate::transport::Transport;

#[derive(Debug, Clone)]
pub enum Error {
    /// The request could not be sent.
    Transport(transport::Error),
    /// The request could not be encoded.
    Protocol(ProtocolError),
    /// The worker answered with `success: false`.
    Remote(SerializedError),
    /// The call was dropped by `abandon_pending` before any response arrived.
    Abandoned,
    /// The worker answered with a value of the wrong shape.
    Decode { op: Operation, details: String },
}

impl Error {
    /// The worker's error record, when the worker rejected the call.
    pub fn remote(&self) -> Option<&SerializedError> {
        match self {
            Self::Remote(e) => Some(e),
            _ => None,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::Protocol(e) => write!(f, "Protocol error: {}", e),
            Self::Remote(e) => write!(f, "{}", e),
            Self::Abandoned => write!(f, "Call abandoned before a response arrived"),
            Self::Decode { op, details } => write!(f, "Unexpected result for {}: {}", op, details),
        }
    }
}

impl std::error::Error for Error {}

impl From<transport::Error> for Error {
    fn from(e: transport::Error) -> Self {
        Self::Transport(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A channel problem not attributable to any single call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// The transport failed. The pump has stopped.
    Transport(transport::Error),
    /// An inbound frame did not decode as a response. The pump keeps going.
    Malformed(String),
    /// The worker hung up. The pump has stopped.
    Closed,
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "{}", e),
            Self::Malformed(details) => write!(f, "Malformed frame from worker: {}", details),
            Self::Closed => write!(f, "Worker closed the channel"),
        }
    }
}

pub type FaultHandler = Arc<dyn Fn(Fault) + Send + Sync>;

struct PendingCall {
    op: Operation,
    tx: oneshot::Sender<Result<Value>>,
}

/// Issues requests over a transport and correlates their responses.
///
/// Promise ids start at 0 and are never reused by the same bridge.
pub struct Bridge {
    name: String,
    transport: Arc<dyn Transport>,
    pending: Arc<DashMap<u64, PendingCall>>,
    next_id: AtomicU64,
    pump: JoinHandle<()>,
}

impl Bridge {
    /// Creates a bridge and spawns its pump task.
    ///
    /// `name` labels log lines. `on_fault` runs on the pump task.
    pub fn new(
        name: impl Into<String>,
        transport: Box<dyn Transport>,
        on_fault: impl Fn(Fault) + Send + Sync + 'static,
    ) -> Self {
        let name = name.into();
        let transport: Arc<dyn Transport> = Arc::from(transport);
        let pending = Arc::new(DashMap::new());
        let on_fault: FaultHandler = Arc::new(on_fault);

        let pump = tokio::spawn(Self::pump(name.clone(), transport.clone(), pending.clone(), on_fault));

        Self {
            name,
            transport,
            pending,
            next_id: AtomicU64::new(0),
            pump,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn pump(
        name: String,
        transport: Arc<dyn Transport>,
        pending: Arc<DashMap<u64, PendingCall>>,
        on_fault: FaultHandler,
    ) {
        loop {
            match transport.recv().await {
                Ok(Some(frame)) => {
                    if let Err(details) = Self::route(&frame, &pending) {
                        error!(bridge = %name, %details, "malformed frame from worker");
                        on_fault(Fault::Malformed(details));
                    }
                }
                Ok(None) => {
                    error!(bridge = %name, pending = pending.len(), "worker closed the channel");
                    on_fault(Fault::Closed);
                    break;
                }
                Err(e) => {
                    error!(bridge = %name, error = %e, pending = pending.len(), "transport failed");
                    on_fault(Fault::Transport(e));
                    break;
                }
            }
        }
    }

    /// Delivers one response frame to its pending call.
    fn route(frame: &[u8], pending: &DashMap<u64, PendingCall>) -> std::result::Result<(), String> {
        let response = Response::decode(frame).map_err(|e| e.to_string())?;
        let promise_id = response.promise_id;

        let Some((_, call)) = pending.remove(&promise_id) else {
            // already settled, abandoned, or never issued
            debug!(promise_id, "ignoring response for unknown promise id");
            return Ok(());
        };

        debug!(promise_id, op = %call.op, success = response.success, "response received");
        let _ = call.tx.send(response.into_result().map_err(Error::Remote));
        Ok(())
    }

    /// Sends `call` and waits for the worker's answer.
    ///
    /// There is no timeout. Wrap the future in one if needed.
    pub async fn call(&self, call: Call) -> Result<Value> {
        let op = call.op();
        let promise_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = Request::new(promise_id, &call)?.encode()?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(promise_id, PendingCall { op, tx });

        debug!(bridge = %self.name, promise_id, %op, "sending request");
        if let Err(e) = self.transport.send(&payload).await {
            self.pending.remove(&promise_id);
            return Err(e.into());
        }

        rx.await.unwrap_or(Err(Error::Abandoned))
    }

    /// Like `call`, decoding the result into `T`.
    pub async fn call_as<T: DeserializeOwned>(&self, call: Call) -> Result<T> {
        let op = call.op();
        let value = self.call(call).await?;
        serde_json::from_value(value).map_err(|e| Error::Decode { op, details: e.to_string() })
    }

    pub async fn initialize_engine(&self) -> Result<()> {
        self.call(Call::InitializeEngine).await.map(|_| ())
    }

    pub async fn conversion_groups(&self) -> Result<Vec<String>> {
        self.call_as(Call::GetConversionGroups).await
    }

    /// Members of a metagroup, `None` when the engine has no such metagroup.
    pub async fn metagroup(&self, name: &str) -> Result<Option<Vec<String>>> {
        self.call_as(Call::GetMetagroup { name: name.to_string() }).await
    }

    /// Parses a level on the worker and returns its tracking id and display fields.
    pub async fn gmd_info(&self, level_text: &str) -> Result<LevelInfo> {
        self.call_as(Call::GetGmdInfo { level_text: level_text.to_string() }).await
    }

    pub async fn run_conversion(&self, level: TrackingRef, groups: &[String]) -> Result<ConversionSummary> {
        self.call_as(Call::RunConversion { level, groups: groups.to_vec() }).await
    }

    pub async fn level_to_gmd(&self, level: TrackingRef) -> Result<String> {
        self.call_as(Call::LevelToGmd { level }).await
    }

    pub async fn base64_decode(&self, text: &str) -> Result<String> {
        self.call_as(Call::Base64Decode { text: text.to_string() }).await
    }

    pub async fn parse_reports(&self, report: TrackingRef) -> Result<String> {
        self.call_as(Call::ParseReports { report }).await
    }

    pub async fn reset_state(&self) -> Result<()> {
        self.call(Call::ResetState).await.map(|_| ())
    }

    pub async fn version(&self) -> Result<String> {
        self.call_as(Call::GetVersion).await
    }

    /// Number of calls still waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Fails every pending call with `Error::Abandoned`.
    ///
    /// Any response that still arrives for them is ignored.
    pub fn abandon_pending(&self) -> usize {
        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        let mut abandoned = 0;
        for id in ids {
            if self.pending.remove(&id).is_some() {
                abandoned += 1;
            }
        }
        if abandoned > 0 {
            debug!(bridge = %self.name, abandoned, "abandoned pending calls");
        }
        abandoned
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelTransport;

    #[tokio::test]
    async fn test_promise_ids_start_at_zero_and_increase() {
        let (controller, worker) = ChannelTransport::pair();
        let bridge = Bridge::new("test", Box::new(controller), |_| {});

        let fake_worker = tokio::spawn(async move {
            let mut seen = Vec::new();
            for _ in 0..3 {
                let frame = worker.recv().await.unwrap().unwrap();
                let request = Request::decode(&frame).unwrap();
                seen.push(request.promise_id);
                let reply = Response::success(request.promise_id, Value::from("v1")).encode().unwrap();
                worker.send(&reply).await.unwrap();
            }
            seen
        });

        for _ in 0..3 {
            assert_eq!(bridge.version().await.unwrap(), "v1");
        }

        assert_eq!(fake_worker.await.unwrap(), vec![0, 1, 2]);
        assert_eq!(bridge.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_wrong_result_shape_is_a_decode_error() {
        let (controller, worker) = ChannelTransport::pair();
        let bridge = Bridge::new("test", Box::new(controller), |_| {});

        tokio::spawn(async move {
            let frame = worker.recv().await.unwrap().unwrap();
            let request = Request::decode(&frame).unwrap();
            let reply = Response::success(request.promise_id, Value::from(42)).encode().unwrap();
            worker.send(&reply).await.unwrap();
            // keep the channel open until the bridge is done
            let _ = worker.recv().await;
        });

        match bridge.conversion_groups().await {
            Err(Error::Decode { op, .. }) => assert_eq!(op, Operation::GetConversionGroups),
            other => panic!("Expected Decode error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_failure_leaves_nothing_pending() {
        let (controller, worker) = ChannelTransport::pair();
        drop(worker);
        let bridge = Bridge::new("test", Box::new(controller), |_| {});

        assert!(matches!(bridge.reset_state().await, Err(Error::Transport(_))));
        assert_eq!(bridge.pending_count(), 0);
    }
}
