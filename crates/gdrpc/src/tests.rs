use serde_json::Value;
use serde_json::json;

use crate::*;

// ============================================================================
//  OPERATION CATALOG
// ============================================================================

#[test]
fn test_operation_names_resolve() {
    for op in Operation::ALL {
        assert_eq!(Operation::from_name(op.as_str()), Ok(op));
    }
    assert_eq!("get_gmd_info".parse::<Operation>(), Ok(Operation::GetGmdInfo));
}

#[test]
fn test_unknown_operation_names_the_type() {
    let req = Request {
        op: "explode_level".into(),
        promise_id: 4,
        args: vec![],
    };

    let err = req.call().unwrap_err();
    assert_eq!(err, ProtocolError::UnknownOperation("explode_level".into()));
    assert!(err.to_string().contains("explode_level"));

    let wire = SerializedError::from_protocol(&err);
    assert_eq!(wire.kind, ErrorKind::UnknownOperation);
    assert!(wire.kind.is_defect());
}

#[test]
fn test_arity_is_checked() {
    let req = Request {
        op: "get_metagroup".into(),
        promise_id: 1,
        args: vec![],
    };

    match req.call() {
        Err(ProtocolError::InvalidArguments { op, details }) => {
            assert_eq!(op, Operation::GetMetagroup);
            assert!(details.contains("expected 1"));
        }
        other => panic!("Expected InvalidArguments, got {:?}", other),
    }
}

#[test]
fn test_argument_shape_is_checked() {
    let req = Request {
        op: "run_conversion".into(),
        promise_id: 1,
        args: vec![json!({ "tracking_id": 0 }), json!("glow")],
    };

    let err = req.call().unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidArguments { op: Operation::RunConversion, .. }));
}

#[test]
fn test_run_conversion_accepts_full_level_info() {
    // the page passes back the whole projection it was given
    let info = LevelInfo {
        tracking_id: TrackingId(7),
        name: "Stereo Madness".into(),
        description: Some("aGVsbG8=".into()),
    };
    let req = Request {
        op: "run_conversion".into(),
        promise_id: 9,
        args: vec![serde_json::to_value(&info).unwrap(), json!(["glow", "portals"])],
    };

    let call = req.call().unwrap();
    assert_eq!(
        call,
        Call::RunConversion {
            level: TrackingRef::new(TrackingId(7)),
            groups: vec!["glow".into(), "portals".into()],
        }
    );
}

#[test]
fn test_request_wire_shape() {
    let call = Call::GetMetagroup { name: "base".into() };
    let req = Request::new(3, &call).unwrap();
    let value: Value = serde_json::from_slice(&req.encode().unwrap()).unwrap();

    assert_eq!(value, json!({ "type": "get_metagroup", "promise_id": 3, "args": ["base"] }));
    assert_eq!(Request::decode(&req.encode().unwrap()).unwrap().call().unwrap(), call);
}

// ============================================================================
//  RESPONSES
// ============================================================================

#[test]
fn test_response_success() {
    let bytes = br#"{"promise_id": 2, "value": ["glow"], "success": true}"#;
    let resp = Response::decode(bytes).unwrap();
    assert_eq!(resp.promise_id, 2);
    assert_eq!(resp.into_result(), Ok(json!(["glow"])));
}

#[test]
fn test_response_without_value_is_null() {
    let resp = Response::decode(br#"{"promise_id": 0, "success": true}"#).unwrap();
    assert_eq!(resp.value, Value::Null);
}

#[test]
fn test_response_failure_keeps_diagnostics() {
    let err = SerializedError::new(ErrorKind::ParseFailure, "ValueError", "bad level string")
        .with_stack("Traceback (most recent call last): ...")
        .with_data(json!({ "line": 3 }));
    let resp = Response::failure(5, serde_json::to_value(&err).unwrap());
    let decoded = Response::decode(&resp.encode().unwrap()).unwrap();

    assert_eq!(decoded.into_result(), Err(err));
}

#[test]
fn test_response_failure_with_foreign_value() {
    let resp = Response::failure(1, json!("something went wrong"));
    let err = resp.into_result().unwrap_err();
    assert_eq!(err.name, "Error");
    assert_eq!(err.message, "something went wrong");
    assert_eq!(err.kind, ErrorKind::EngineFailure);
}

#[test]
fn test_malformed_frames() {
    assert!(matches!(Response::decode(b"\xff\xff"), Err(ProtocolError::Malformed(_))));
    assert!(matches!(Request::decode(br#"{"type": 4}"#), Err(ProtocolError::Malformed(_))));
}

#[test]
fn test_decode_promise_id() {
    assert_eq!(decode_promise_id(br#"{"type": 12, "promise_id": 8}"#), Some(8));
    assert_eq!(decode_promise_id(br#"{"type": "get_version"}"#), None);
    assert_eq!(decode_promise_id(b"not json"), None);
}

// ============================================================================
//  PROJECTIONS
// ============================================================================

#[test]
fn test_summary_wire_shape() {
    let summary = ConversionSummary::new(TrackingId(4), 2, 10);
    let value = serde_json::to_value(&summary).unwrap();
    assert_eq!(
        value,
        json!({ "tracking_id": 4, "removed_objects": [null, null], "preconversion_object_count": 10 })
    );

    let back: ConversionSummary = serde_json::from_value(value).unwrap();
    assert_eq!(back.removed_count(), 2);
}

#[test]
fn test_removed_percentage_rounds() {
    assert_eq!(ConversionSummary::new(TrackingId(0), 1, 3).removed_percentage(), 33);
    assert_eq!(ConversionSummary::new(TrackingId(0), 2, 3).removed_percentage(), 67);
    assert_eq!(ConversionSummary::new(TrackingId(0), 1, 200).removed_percentage(), 1);
    assert_eq!(ConversionSummary::new(TrackingId(0), 0, 50).removed_percentage(), 0);
    assert_eq!(ConversionSummary::new(TrackingId(0), 5, 5).removed_percentage(), 100);
}

#[test]
fn test_removed_percentage_of_empty_level() {
    assert_eq!(ConversionSummary::new(TrackingId(0), 0, 0).removed_percentage(), 0);
}

#[test]
fn test_tracking_id_display() {
    assert_eq!(TrackingId::from_promise(12).to_string(), "handle-12");
}
