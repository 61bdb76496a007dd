//! Core data types shared by the access pipeline.
//!
//! ```text
//! Frame ──► FaceCandidate ──► AuthorizationDecision ──► AuditRecord
//!                                        └────────────► OpenCommand (granted only)
//! ```
//!
//! Decisions are closed values: whatever shape the remote authorization
//! service answers with is normalized into [`AuthorizationDecision`] before it
//! leaves the authorization client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

// ============================================================================
// Frame
// ============================================================================

/// Where a frame entered the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameOrigin {
    /// Polled from the live video decoder's staging file.
    LiveVideo,
    /// Uploaded directly through the HTTP API.
    DirectUpload,
}

impl fmt::Display for FrameOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameOrigin::LiveVideo => write!(f, "live_video"),
            FrameOrigin::DirectUpload => write!(f, "direct_upload"),
        }
    }
}

/// One encoded still image plus the time it was acquired.
///
/// The payload is reference-counted so the extractor and the authorization
/// request can both read it without copying. Frames are never mutated.
#[derive(Debug, Clone)]
pub struct Frame {
    data: Arc<[u8]>,
    captured_at: DateTime<Utc>,
    origin: FrameOrigin,
}

impl Frame {
    pub fn new(data: impl Into<Vec<u8>>, origin: FrameOrigin) -> Self {
        Self::captured_at(data, origin, Utc::now())
    }

    pub fn captured_at(
        data: impl Into<Vec<u8>>,
        origin: FrameOrigin,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            data: Arc::from(data.into().into_boxed_slice()),
            captured_at,
            origin,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn origin(&self) -> FrameOrigin {
        self.origin
    }
}

// ============================================================================
// Face Candidate
// ============================================================================

/// The single face selected from a frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceCandidate {
    /// Biometric descriptor; opaque to the gateway.
    pub descriptor: Vec<f32>,
    /// Detection quality in [0, 1].
    pub quality_score: f32,
}

// ============================================================================
// Authorization Decision
// ============================================================================

/// Closed set of outcomes an authorization attempt can end in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Granted,
    Denied,
    UnknownSubject,
    ServiceUnreachable,
    /// No authorization service is configured for this gateway.
    NoCapability,
}

impl DecisionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionKind::Granted => "granted",
            DecisionKind::Denied => "denied",
            DecisionKind::UnknownSubject => "unknown_subject",
            DecisionKind::ServiceUnreachable => "service_unreachable",
            DecisionKind::NoCapability => "no_capability",
        }
    }
}

impl fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity attributes reported for a recognized subject.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    pub name: Option<String>,
    /// Subject category as reported by the service (employee, visitor, ...).
    pub kind: Option<String>,
}

/// Result of one authorization attempt. Produced exactly once per admitted
/// run that found a face.
///
/// `granted` is true only for [`DecisionKind::Granted`]; the constructors are
/// the only way to build a decision so the two cannot disagree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthorizationDecision {
    pub granted: bool,
    pub kind: DecisionKind,
    pub subject: Option<Subject>,
    pub similarity: Option<f64>,
    pub raw_message: Option<String>,
    /// `type` tag of the service's answer, when there was one.
    pub response_type: Option<String>,
}

impl AuthorizationDecision {
    pub fn granted(subject: Subject, similarity: Option<f64>, message: Option<String>) -> Self {
        Self {
            granted: true,
            kind: DecisionKind::Granted,
            subject: Some(subject),
            similarity,
            raw_message: message,
            response_type: None,
        }
    }

    pub fn denied(subject: Subject, similarity: Option<f64>, message: Option<String>) -> Self {
        Self {
            granted: false,
            kind: DecisionKind::Denied,
            subject: Some(subject),
            similarity,
            raw_message: message,
            response_type: None,
        }
    }

    pub fn unknown_subject(message: Option<String>) -> Self {
        Self::refused(DecisionKind::UnknownSubject, message)
    }

    pub fn service_unreachable(message: impl Into<String>) -> Self {
        Self::refused(DecisionKind::ServiceUnreachable, Some(message.into()))
    }

    pub fn no_capability() -> Self {
        Self::refused(
            DecisionKind::NoCapability,
            Some("authorization service not configured".to_string()),
        )
    }

    fn refused(kind: DecisionKind, message: Option<String>) -> Self {
        Self {
            granted: false,
            kind,
            subject: None,
            similarity: None,
            raw_message: message,
            response_type: None,
        }
    }

    /// Attach the `type` tag the service answered with.
    pub fn with_response_type(mut self, response_type: Option<String>) -> Self {
        self.response_type = response_type.filter(|t| !t.is_empty());
        self
    }

    pub fn subject_id(&self) -> Option<&str> {
        self.subject.as_ref().map(|s| s.id.as_str())
    }

    pub fn subject_name(&self) -> Option<&str> {
        self.subject.as_ref().and_then(|s| s.name.as_deref())
    }
}

// ============================================================================
// Audit Record
// ============================================================================

/// Write-once audit entry for a completed authorization attempt.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub decision: AuthorizationDecision,
    pub zone_id: String,
    pub source_tag: String,
}

impl AuditRecord {
    pub fn new(decision: AuthorizationDecision, zone_id: &str, source_tag: &str) -> Self {
        Self::at(decision, zone_id, source_tag, Utc::now())
    }

    /// Record stamped with the acquisition time of the frame it was decided on.
    pub fn at(
        decision: AuthorizationDecision,
        zone_id: &str,
        source_tag: &str,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            decision,
            zone_id: zone_id.to_string(),
            source_tag: source_tag.to_string(),
        }
    }

    /// Row shape expected by the audit table.
    ///
    /// `user_type` carries the `type` tag of the service's answer, or the
    /// decision kind when there was no answer to take it from.
    pub fn to_row(&self) -> AuditRow {
        let subject = self.decision.subject.as_ref();
        AuditRow {
            id: self.id.to_string(),
            timestamp: self.timestamp.to_rfc3339(),
            has_access: self.decision.granted,
            user_id: subject.map(|s| s.id.clone()),
            user_name: subject.and_then(|s| s.name.clone()),
            user_type: self
                .decision
                .response_type
                .clone()
                .unwrap_or_else(|| self.decision.kind.to_string()),
            zone_id: self.zone_id.clone(),
            source: self.source_tag.clone(),
            created_at: Utc::now().to_rfc3339(),
        }
    }
}

/// Flat row inserted into the audit sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRow {
    pub id: String,
    pub timestamp: String,
    pub has_access: bool,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub user_type: String,
    pub zone_id: String,
    pub source: String,
    pub created_at: String,
}

// ============================================================================
// Actuator Command
// ============================================================================

/// Payload published on the door topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenCommand {
    pub action: String,
    pub user: String,
    pub timestamp: String,
    pub source: String,
}

impl OpenCommand {
    pub fn open_for(user: &str, source: &str) -> Self {
        Self {
            action: "open".to_string(),
            user: user.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            source: source.to_string(),
        }
    }
}

// ============================================================================
// Side Effect Outcome
// ============================================================================

/// How a best-effort side effect (audit write, door publish) ended.
///
/// Reported on the run's record and logged; never turned into an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum SideEffect {
    Done,
    /// Collaborator not configured.
    Skipped(String),
    Failed(String),
    /// Not called for this decision (e.g. actuation on a refusal).
    NotAttempted,
}

impl SideEffect {
    pub fn is_failed(&self) -> bool {
        matches!(self, SideEffect::Failed(_))
    }
}
