//! Bridge behaviour against a scripted worker.
//!
//! The test body plays the worker end of the channel and answers, misorders,
//! corrupts or drops requests on purpose.

use std::sync::Arc;

use serde_json::Value;
use serde_json::json;
use tokio::sync::mpsc;

use gdconv::bridge;
use gdconv::bridge::Bridge;
use gdconv::bridge::Fault;
use gdconv::channel::ChannelTransport;
use gdconv::transport;
use gdconv::transport::Transport;
use gdrpc::ErrorKind;
use gdrpc::Request;
use gdrpc::Response;
use gdrpc::SerializedError;

fn connect() -> (Arc<Bridge>, ChannelTransport, mpsc::UnboundedReceiver<Fault>) {
    let (controller, worker) = ChannelTransport::pair();
    let (fault_tx, fault_rx) = mpsc::unbounded_channel();
    let bridge = Bridge::new("test", Box::new(controller), move |fault| {
        let _ = fault_tx.send(fault);
    });
    (Arc::new(bridge), worker, fault_rx)
}

async fn next_request(worker: &ChannelTransport) -> Request {
    let frame = worker.recv().await.unwrap().expect("bridge hung up");
    Request::decode(&frame).unwrap()
}

async fn reply(worker: &ChannelTransport, response: Response) {
    worker.send(&response.encode().unwrap()).await.unwrap();
}

#[tokio::test]
async fn test_out_of_order_replies_reach_their_callers() {
    let (bridge, worker, mut faults) = connect();

    let calls: Vec<_> = ["a", "b", "c"]
        .into_iter()
        .map(|text| {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.base64_decode(text).await })
        })
        .collect();

    let mut requests = Vec::new();
    for _ in 0..3 {
        requests.push(next_request(&worker).await);
    }

    // answer newest first, echoing the argument in upper case
    for request in requests.iter().rev() {
        let text = request.args[0].as_str().unwrap().to_uppercase();
        reply(&worker, Response::success(request.promise_id, Value::from(text))).await;
    }

    let mut results = Vec::new();
    for call in calls {
        results.push(call.await.unwrap().unwrap());
    }
    assert_eq!(results, vec!["A", "B", "C"]);
    assert_eq!(bridge.pending_count(), 0);
    assert!(faults.try_recv().is_err());
}

#[tokio::test]
async fn test_response_for_unknown_promise_id_is_ignored() {
    let (bridge, worker, mut faults) = connect();

    let call = tokio::spawn({
        let bridge = bridge.clone();
        async move { bridge.version().await }
    });

    let request = next_request(&worker).await;
    reply(&worker, Response::success(request.promise_id + 100, Value::from("stray"))).await;
    reply(&worker, Response::success(request.promise_id, Value::from("1.0"))).await;
    // a duplicate for an already settled call
    reply(&worker, Response::success(request.promise_id, Value::from("again"))).await;

    assert_eq!(call.await.unwrap().unwrap(), "1.0");

    // the bridge still works afterwards
    let call = tokio::spawn({
        let bridge = bridge.clone();
        async move { bridge.version().await }
    });
    let request = next_request(&worker).await;
    reply(&worker, Response::success(request.promise_id, Value::from("2.0"))).await;
    assert_eq!(call.await.unwrap().unwrap(), "2.0");

    assert!(faults.try_recv().is_err());
}

#[tokio::test]
async fn test_remote_error_keeps_its_diagnostics() {
    let (bridge, worker, _faults) = connect();

    let call = tokio::spawn({
        let bridge = bridge.clone();
        async move { bridge.gmd_info("garbage").await }
    });

    let request = next_request(&worker).await;
    let error = SerializedError::new(ErrorKind::ParseFailure, "LevelParseError", "bad header")
        .with_stack("LevelParseError: bad header\n    at parse")
        .with_data(json!({ "offset": 4 }));
    reply(&worker, Response::failure(request.promise_id, serde_json::to_value(&error).unwrap())).await;

    match call.await.unwrap() {
        Err(bridge::Error::Remote(remote)) => assert_eq!(remote, error),
        other => panic!("Expected Remote error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_remote_error_that_is_not_a_record() {
    let (bridge, worker, _faults) = connect();

    let call = tokio::spawn({
        let bridge = bridge.clone();
        async move { bridge.reset_state().await }
    });

    let request = next_request(&worker).await;
    reply(&worker, Response::failure(request.promise_id, Value::from("boom"))).await;

    let err = call.await.unwrap().unwrap_err();
    let remote = err.remote().unwrap();
    assert_eq!(remote.name, "Error");
    assert_eq!(remote.message, "boom");
}

#[tokio::test]
async fn test_malformed_frame_is_a_fault_and_pending_calls_can_be_abandoned() {
    let (bridge, worker, mut faults) = connect();

    let call = tokio::spawn({
        let bridge = bridge.clone();
        async move { bridge.conversion_groups().await }
    });

    let request = next_request(&worker).await;
    worker.send(b"{ not a response").await.unwrap();

    assert!(matches!(faults.recv().await, Some(Fault::Malformed(_))));

    // nothing was fabricated for the pending call
    assert_eq!(bridge.pending_count(), 1);
    assert!(!call.is_finished());

    assert_eq!(bridge.abandon_pending(), 1);
    assert!(matches!(call.await.unwrap(), Err(bridge::Error::Abandoned)));

    // a late answer for the abandoned call is dropped quietly
    reply(&worker, Response::success(request.promise_id, json!(["glow"]))).await;

    let call = tokio::spawn({
        let bridge = bridge.clone();
        async move { bridge.conversion_groups().await }
    });
    let request = next_request(&worker).await;
    reply(&worker, Response::success(request.promise_id, json!(["portals"]))).await;
    assert_eq!(call.await.unwrap().unwrap(), vec!["portals".to_string()]);
    assert!(faults.try_recv().is_err());
}

#[tokio::test]
async fn test_worker_hang_up_is_a_fault() {
    let (bridge, worker, mut faults) = connect();

    let call = tokio::spawn({
        let bridge = bridge.clone();
        async move { bridge.initialize_engine().await }
    });

    next_request(&worker).await;
    drop(worker);

    assert_eq!(faults.recv().await, Some(Fault::Closed));
    assert_eq!(bridge.pending_count(), 1);

    assert_eq!(bridge.abandon_pending(), 1);
    assert!(matches!(call.await.unwrap(), Err(bridge::Error::Abandoned)));

    // new calls fail at send time
    assert!(matches!(bridge.version().await, Err(bridge::Error::Transport(_))));
    assert_eq!(bridge.pending_count(), 0);
}

struct BrokenTransport;

#[async_trait::async_trait]
impl Transport for BrokenTransport {
    async fn send(&self, _payload: &[u8]) -> transport::Result<()> {
        Ok(())
    }

    async fn recv(&self) -> transport::Result<Option<Vec<u8>>> {
        Err(transport::Error::Io("port detached".into()))
    }
}

#[tokio::test]
async fn test_transport_failure_is_a_fault() {
    let (fault_tx, mut faults) = mpsc::unbounded_channel();
    let _bridge = Bridge::new("test", Box::new(BrokenTransport), move |fault| {
        let _ = fault_tx.send(fault);
    });

    assert_eq!(
        faults.recv().await,
        Some(Fault::Transport(transport::Error::Io("port detached".into())))
    );
}
