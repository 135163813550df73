mod common;

use common::*;
use pbix_mcp::powerbi::{HttpRequest, HttpResponse, PowerBiError};
use serde_json::json;
use std::time::Duration;

const STATUS_URL: &str = "https://api.fabric.microsoft.com/v1/operations/op-1";

#[tokio::test]
async fn test_success_fetches_result_once() {
    let identity = FakeIdentity::new();
    let transport = ScriptedTransport::new(vec![
        accepted(STATUS_URL),
        json_response(200, json!({"status": "InProgress"})),
        json_response(200, json!({"status": "Queued"})),
        json_response(200, json!({"status": "Succeeded"})),
        json_response(200, json!({"definition": {"parts": []}})),
    ]);
    let client = client(identity, transport.clone()).await;

    let request = HttpRequest::post(client.fabric_url("workspaces/w/semanticModels/d/getDefinition"));
    let result = client
        .run_operation(&request, Some(Duration::ZERO), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(result, json!({"definition": {"parts": []}}));

    let urls = transport.urls();
    assert_eq!(urls.len(), 5);
    assert_eq!(&urls[1..4], &[STATUS_URL, STATUS_URL, STATUS_URL]);
    assert_eq!(urls[4], format!("{}/result", STATUS_URL));
}

#[tokio::test]
async fn test_failure_returns_embedded_error_without_result_fetch() {
    let identity = FakeIdentity::new();
    let transport = ScriptedTransport::new(vec![
        accepted(STATUS_URL),
        json_response(200, json!({"status": "Running"})),
        json_response(
            200,
            json!({"status": "Failed", "error": {"errorCode": "InvalidItem", "message": "nope"}}),
        ),
    ]);
    let client = client(identity, transport.clone()).await;

    let err = client
        .run_operation(&HttpRequest::post(STATUS_URL), Some(Duration::ZERO), Duration::from_secs(5))
        .await
        .unwrap_err();
    match err {
        PowerBiError::OperationFailed(detail) => {
            assert_eq!(detail, json!({"errorCode": "InvalidItem", "message": "nope"}));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(transport.calls(), 3);
    assert!(transport.urls().iter().all(|u| !u.ends_with("/result")));
}

#[tokio::test]
async fn test_immediate_completion_skips_polling() {
    let identity = FakeIdentity::new();
    let transport = ScriptedTransport::new(vec![json_response(200, json!({"done": true}))]);
    let client = client(identity, transport.clone()).await;

    let result = client
        .run_operation(&HttpRequest::post(STATUS_URL), None, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(result, json!({"done": true}));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_accepted_without_location_is_an_error() {
    let identity = FakeIdentity::new();
    let transport = ScriptedTransport::new(vec![HttpResponse::new(202, "")]);
    let client = client(identity, transport.clone()).await;

    let err = client
        .run_operation(&HttpRequest::post(STATUS_URL), None, Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, PowerBiError::MissingLocation));
}

#[tokio::test]
async fn test_failed_status_check_is_an_error() {
    let identity = FakeIdentity::new();
    let transport = ScriptedTransport::new(vec![
        accepted(STATUS_URL),
        HttpResponse::new(500, "boom"),
    ]);
    let client = client(identity, transport.clone()).await;

    let err = client
        .run_operation(&HttpRequest::post(STATUS_URL), Some(Duration::ZERO), Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, PowerBiError::StatusCheck(_)));
}

#[tokio::test]
async fn test_timeout_names_operation() {
    let identity = FakeIdentity::new();
    let mut responses = vec![accepted(STATUS_URL).with_header("x-ms-operation-id", "op-42")];
    responses.extend((0..20).map(|_| json_response(200, json!({"status": "Running"}))));
    let transport = ScriptedTransport::new(responses);
    let client = client(identity, transport.clone()).await;

    let err = client
        .run_operation(
            &HttpRequest::post(STATUS_URL),
            Some(Duration::from_millis(20)),
            Duration::from_millis(150),
        )
        .await
        .unwrap_err();
    match &err {
        PowerBiError::Timeout { operation_id, .. } => {
            assert_eq!(operation_id, "operation op-42");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(err.to_string().contains("op-42"));
    assert!(transport.calls() < 21);
}

#[tokio::test]
async fn test_unbounded_timeout_still_completes() {
    let identity = FakeIdentity::new();
    let transport = ScriptedTransport::new(vec![
        accepted(STATUS_URL),
        json_response(200, json!({"status": "Succeeded"})),
        json_response(200, json!({"ok": true})),
    ]);
    let client = client(identity, transport.clone()).await;

    let result = client
        .run_operation(
            &HttpRequest::post(STATUS_URL),
            Some(Duration::ZERO),
            Duration::from_secs(u64::MAX),
        )
        .await
        .unwrap();
    assert_eq!(result, json!({"ok": true}));
}
