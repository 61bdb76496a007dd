//! HTTP client tests against an in-process stub of the validation function
//! and the PostgREST audit table.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use base64::Engine as _;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use opendoor::audit::{AuditError, AuditSink, SupabaseAuditSink};
use opendoor::authorization::{AuthorizationClient, Authorizer};
use opendoor::types::{AuditRecord, AuthorizationDecision, DecisionKind, Frame, FrameOrigin};

const ANON_KEY: &str = "anon-test-key";
const FUNCTION_PATH: &str = "functions/v1/validate-face";

#[derive(Clone)]
struct Stub {
    status: StatusCode,
    body: serde_json::Value,
    seen: Arc<Mutex<Vec<(HeaderMap, serde_json::Value)>>>,
}

async fn capture(
    State(stub): State<Stub>,
    headers: HeaderMap,
    Json(payload): Json<serde_json::Value>,
) -> (StatusCode, Json<serde_json::Value>) {
    stub.seen.lock().unwrap().push((headers, payload));
    (stub.status, Json(stub.body.clone()))
}

/// Serve `stub` on an ephemeral port and return its base URL.
async fn serve(stub: Stub) -> String {
    let app = Router::new()
        .route(&format!("/{FUNCTION_PATH}"), post(capture))
        .route("/rest/v1/access_logs", post(capture))
        .with_state(stub);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn stub(status: StatusCode, body: serde_json::Value) -> Stub {
    Stub {
        status,
        body,
        seen: Arc::new(Mutex::new(Vec::new())),
    }
}

fn client(base_url: &str) -> AuthorizationClient {
    AuthorizationClient::new(base_url, FUNCTION_PATH, ANON_KEY, Duration::from_secs(5)).unwrap()
}

fn frame() -> Frame {
    Frame::new(vec![0xFF, 0xD8, 0xFF, 0xE0], FrameOrigin::DirectUpload)
}

#[tokio::test]
async fn test_granted_response_and_request_shape() {
    let stub = stub(
        StatusCode::OK,
        serde_json::json!({
            "type": "match",
            "message": "Access granted",
            "user": {
                "id": "u-jane",
                "full_name": "Jane Doe",
                "user_type": "employee",
                "hasAccess": true,
                "similarity": 0.91
            }
        }),
    );
    let seen = Arc::clone(&stub.seen);
    let base = serve(stub).await;

    let decision = client(&base)
        .authorize(&[0.25, -0.5, 1.0], "main-entrance", &frame())
        .await;

    assert!(decision.granted);
    assert_eq!(decision.kind, DecisionKind::Granted);
    assert_eq!(decision.subject_name(), Some("Jane Doe"));
    assert_eq!(decision.similarity, Some(0.91));
    assert_eq!(decision.raw_message.as_deref(), Some("Access granted"));

    // The audit row carries the answer's `type`, not the user's category.
    let row = AuditRecord::new(decision, "main-entrance", "test-gateway").to_row();
    assert_eq!(row.user_type, "match");

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let (headers, payload) = &seen[0];
    assert_eq!(headers["authorization"], format!("Bearer {ANON_KEY}"));
    assert_eq!(headers["apikey"], ANON_KEY);
    assert_eq!(payload["zoneId"], "main-entrance");
    assert_eq!(payload["faceEmbedding"], serde_json::json!([0.25, -0.5, 1.0]));
    let image = base64::engine::general_purpose::STANDARD
        .decode(payload["imageData"].as_str().unwrap())
        .unwrap();
    assert_eq!(image, vec![0xFF, 0xD8, 0xFF, 0xE0]);
}

#[tokio::test]
async fn test_server_error_is_unreachable() {
    let base = serve(stub(
        StatusCode::INTERNAL_SERVER_ERROR,
        serde_json::json!({"error": "boom"}),
    ))
    .await;

    let decision = client(&base).authorize(&[0.1], "main-entrance", &frame()).await;

    assert!(!decision.granted);
    assert_eq!(decision.kind, DecisionKind::ServiceUnreachable);
    assert!(decision.raw_message.unwrap().contains("500"));
}

#[tokio::test]
async fn test_no_match_is_unknown_subject() {
    let base = serve(stub(
        StatusCode::OK,
        serde_json::json!({"type": "no_match", "message": "Face not recognized"}),
    ))
    .await;

    let decision = client(&base).authorize(&[0.1], "main-entrance", &frame()).await;

    assert!(!decision.granted);
    assert_eq!(decision.kind, DecisionKind::UnknownSubject);
    assert!(decision.subject.is_none());
}

#[tokio::test]
async fn test_connection_refused_is_unreachable() {
    // Bind then drop so nothing listens on the port.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let decision = client(&format!("http://{addr}"))
        .authorize(&[0.1], "main-entrance", &frame())
        .await;

    assert!(!decision.granted);
    assert_eq!(decision.kind, DecisionKind::ServiceUnreachable);
}

// ============================================================================
// Audit sink
// ============================================================================

#[tokio::test]
async fn test_audit_row_is_posted_with_headers() {
    let stub = stub(StatusCode::CREATED, serde_json::Value::Null);
    let seen = Arc::clone(&stub.seen);
    let base = serve(stub).await;

    let sink =
        SupabaseAuditSink::new(&base, "access_logs", ANON_KEY, Duration::from_secs(5)).unwrap();
    let row = AuditRecord::new(
        AuthorizationDecision::service_unreachable("timeout"),
        "main-entrance",
        "test-gateway",
    )
    .to_row();

    sink.append(&row).await.unwrap();

    let seen = seen.lock().unwrap();
    let (headers, payload) = &seen[0];
    assert_eq!(headers["apikey"], ANON_KEY);
    assert_eq!(headers["prefer"], "return=minimal");
    assert_eq!(payload["has_access"], false);
    assert_eq!(payload["zone_id"], "main-entrance");
    assert_eq!(payload["user_type"], "service_unreachable");
    assert_eq!(payload["timestamp"], row.timestamp);
}

#[tokio::test]
async fn test_audit_rejection_carries_status() {
    let base = serve(stub(
        StatusCode::UNAUTHORIZED,
        serde_json::json!({"message": "Invalid API key"}),
    ))
    .await;

    let sink =
        SupabaseAuditSink::new(&base, "access_logs", ANON_KEY, Duration::from_secs(5)).unwrap();
    let row = AuditRecord::new(AuthorizationDecision::no_capability(), "z", "s").to_row();

    match sink.append(&row).await {
        Err(AuditError::Rejected { status, body }) => {
            assert_eq!(status.as_u16(), 401);
            assert!(body.contains("Invalid API key"));
        }
        other => panic!("expected rejection, got {other:?}"),
    }
}
