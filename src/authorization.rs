//! Authorization Client - remote face validation, normalized to one decision
//!
//! Whatever the validation function answers (or fails to answer) leaves this
//! module as an [`AuthorizationDecision`]. Nothing is cached and nothing is
//! retried: each frame gets exactly one attempt.
//!
//! | Outcome                                   | Decision              |
//! |-------------------------------------------|-----------------------|
//! | transport error / timeout                 | `ServiceUnreachable`  |
//! | non-2xx status                            | `ServiceUnreachable`  |
//! | 2xx, body not JSON                        | `ServiceUnreachable`  |
//! | 2xx, no `user` or no `user.id`            | `UnknownSubject`      |
//! | 2xx, user with `hasAccess: true`          | `Granted`             |
//! | 2xx, user with `hasAccess` false/missing  | `Denied`              |

use async_trait::async_trait;
use base64::Engine as _;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::types::{AuthorizationDecision, Frame, Subject};

/// Longest slice of an error body carried into a decision message.
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Decision capability used by the pipeline. Never fails: every outcome is
/// a decision.
#[async_trait]
pub trait Authorizer: Send + Sync + 'static {
    async fn authorize(
        &self,
        descriptor: &[f32],
        zone_id: &str,
        frame: &Frame,
    ) -> AuthorizationDecision;

    /// False when there is no service behind this authorizer.
    fn is_configured(&self) -> bool {
        true
    }
}

// ============================================================================
// Wire Shapes
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ValidationRequest<'a> {
    face_embedding: &'a [f32],
    zone_id: &'a str,
    /// Standard base64 of the encoded frame.
    image_data: String,
}

#[derive(Debug, Deserialize)]
struct ValidationResponse {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    user: Option<ValidationUser>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ValidationUser {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    full_name: Option<String>,
    #[serde(default)]
    user_type: Option<String>,
    #[serde(rename = "hasAccess", default)]
    has_access: Option<bool>,
    #[serde(default)]
    similarity: Option<f64>,
}

impl ValidationUser {
    /// Ids arrive as strings or numbers depending on the table.
    fn subject_id(&self) -> Option<String> {
        match self.id.as_ref()? {
            serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

// ============================================================================
// Normalization
// ============================================================================

/// Map one HTTP exchange onto a decision.
pub fn normalize_response(status: StatusCode, body: &str) -> AuthorizationDecision {
    if !status.is_success() {
        let detail: String = body.trim().chars().take(MAX_ERROR_BODY_CHARS).collect();
        return AuthorizationDecision::service_unreachable(if detail.is_empty() {
            format!("authorization service returned {status}")
        } else {
            format!("authorization service returned {status}: {detail}")
        });
    }

    let parsed: ValidationResponse = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(e) => {
            return AuthorizationDecision::service_unreachable(format!(
                "unreadable authorization response: {e}"
            ))
        }
    };

    let response_type = parsed.kind;
    let message = parsed
        .message
        .filter(|m| !m.is_empty())
        .or_else(|| response_type.clone());

    let Some(user) = parsed.user else {
        return AuthorizationDecision::unknown_subject(message).with_response_type(response_type);
    };
    let Some(id) = user.subject_id() else {
        return AuthorizationDecision::unknown_subject(message).with_response_type(response_type);
    };

    let subject = Subject {
        id,
        name: user.full_name.clone().filter(|n| !n.is_empty()),
        kind: user.user_type.clone().filter(|k| !k.is_empty()),
    };

    let decision = if user.has_access == Some(true) {
        AuthorizationDecision::granted(subject, user.similarity, message)
    } else {
        AuthorizationDecision::denied(subject, user.similarity, message)
    };
    decision.with_response_type(response_type)
}

// ============================================================================
// HTTP Client
// ============================================================================

/// Calls the face validation function with the project's anon key.
#[derive(Clone)]
pub struct AuthorizationClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl AuthorizationClient {
    pub fn new(
        base_url: &str,
        function_path: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: format!(
                "{}/{}",
                base_url.trim_end_matches('/'),
                function_path.trim_start_matches('/')
            ),
            api_key: api_key.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Authorizer for AuthorizationClient {
    async fn authorize(
        &self,
        descriptor: &[f32],
        zone_id: &str,
        frame: &Frame,
    ) -> AuthorizationDecision {
        let payload = ValidationRequest {
            face_embedding: descriptor,
            zone_id,
            image_data: base64::engine::general_purpose::STANDARD.encode(frame.bytes()),
        };

        let resp = match self
            .http
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("apikey", &self.api_key)
            .json(&payload)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                warn!("[Authorization] Request failed: {}", e);
                return AuthorizationDecision::service_unreachable(format!(
                    "authorization request failed: {e}"
                ));
            }
        };

        let status = resp.status();
        let body = match resp.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!("[Authorization] Failed reading response body: {}", e);
                return AuthorizationDecision::service_unreachable(format!(
                    "authorization response unreadable: {e}"
                ));
            }
        };

        let decision = normalize_response(status, &body);
        debug!(
            status = status.as_u16(),
            kind = %decision.kind,
            "[Authorization] Response normalized"
        );
        decision
    }
}

/// Stand-in used when no validation service is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredAuthorizer;

#[async_trait]
impl Authorizer for UnconfiguredAuthorizer {
    async fn authorize(
        &self,
        _descriptor: &[f32],
        _zone_id: &str,
        _frame: &Frame,
    ) -> AuthorizationDecision {
        AuthorizationDecision::no_capability()
    }

    fn is_configured(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DecisionKind;

    #[test]
    fn test_granted_user() {
        let body = r#"{
            "type": "match",
            "user": {"id": "u-42", "full_name": "Jane Doe", "user_type": "employee",
                     "hasAccess": true, "similarity": 0.93},
            "message": "Access granted"
        }"#;
        let decision = normalize_response(StatusCode::OK, body);
        assert!(decision.granted);
        assert_eq!(decision.kind, DecisionKind::Granted);
        assert_eq!(decision.subject_id(), Some("u-42"));
        assert_eq!(decision.subject_name(), Some("Jane Doe"));
        assert_eq!(decision.similarity, Some(0.93));
        assert_eq!(decision.raw_message.as_deref(), Some("Access granted"));
        assert_eq!(decision.response_type.as_deref(), Some("match"));
    }

    #[test]
    fn test_response_type_survives_every_answer() {
        let no_match = normalize_response(StatusCode::OK, r#"{"type":"no_match"}"#);
        assert_eq!(no_match.response_type.as_deref(), Some("no_match"));

        let untyped = normalize_response(StatusCode::OK, r#"{"user":{"id":"u-7"}}"#);
        assert!(untyped.response_type.is_none());

        let failed = normalize_response(StatusCode::BAD_GATEWAY, r#"{"type":"error"}"#);
        assert!(failed.response_type.is_none(), "non-2xx bodies are not trusted");
    }

    #[test]
    fn test_known_user_without_access() {
        let body = r#"{"type":"match","user":{"id":"u-7","full_name":"Sam","hasAccess":false}}"#;
        let decision = normalize_response(StatusCode::OK, body);
        assert!(!decision.granted);
        assert_eq!(decision.kind, DecisionKind::Denied);
        assert_eq!(decision.raw_message.as_deref(), Some("match"));
    }

    #[test]
    fn test_missing_access_flag_is_denied() {
        let body = r#"{"user":{"id":"u-7"}}"#;
        assert_eq!(
            normalize_response(StatusCode::OK, body).kind,
            DecisionKind::Denied
        );
    }

    #[test]
    fn test_numeric_id_accepted() {
        let body = r#"{"user":{"id":1234,"hasAccess":true}}"#;
        let decision = normalize_response(StatusCode::OK, body);
        assert_eq!(decision.subject_id(), Some("1234"));
        assert!(decision.granted);
    }

    #[test]
    fn test_no_user_is_unknown_subject() {
        let body = r#"{"type":"no_match","message":"No matching user"}"#;
        let decision = normalize_response(StatusCode::OK, body);
        assert_eq!(decision.kind, DecisionKind::UnknownSubject);
        assert!(!decision.granted);
        assert!(decision.subject.is_none());

        let blank_id = r#"{"user":{"id":"","hasAccess":true}}"#;
        let decision = normalize_response(StatusCode::OK, blank_id);
        assert_eq!(decision.kind, DecisionKind::UnknownSubject);
        assert!(!decision.granted, "access flag without an id never grants");
    }

    #[test]
    fn test_non_success_status_carries_detail() {
        let decision = normalize_response(StatusCode::INTERNAL_SERVER_ERROR, "boom");
        assert_eq!(decision.kind, DecisionKind::ServiceUnreachable);
        assert!(!decision.granted);
        let message = decision.raw_message.unwrap();
        assert!(message.contains("500"), "{message}");
        assert!(message.contains("boom"), "{message}");
    }

    #[test]
    fn test_garbage_body_is_unreachable() {
        let decision = normalize_response(StatusCode::OK, "<html>gateway</html>");
        assert_eq!(decision.kind, DecisionKind::ServiceUnreachable);
    }

    #[test]
    fn test_request_serializes_camel_case() {
        let req = ValidationRequest {
            face_embedding: &[0.5, 0.25],
            zone_id: "zone-a",
            image_data: "AQID".to_string(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["faceEmbedding"], serde_json::json!([0.5, 0.25]));
        assert_eq!(json["zoneId"], "zone-a");
        assert_eq!(json["imageData"], "AQID");
    }

    #[test]
    fn test_endpoint_joins_cleanly() {
        let client = AuthorizationClient::new(
            "https://example.supabase.co/",
            "/functions/v1/validate-user-face",
            "key",
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(
            client.endpoint(),
            "https://example.supabase.co/functions/v1/validate-user-face"
        );
    }

    #[tokio::test]
    async fn test_unconfigured_yields_no_capability() {
        let frame = Frame::new(vec![1], crate::types::FrameOrigin::DirectUpload);
        let decision = UnconfiguredAuthorizer.authorize(&[0.1], "zone", &frame).await;
        assert_eq!(decision.kind, DecisionKind::NoCapability);
        assert!(!decision.granted);
        assert!(!UnconfiguredAuthorizer.is_configured());
    }
}
