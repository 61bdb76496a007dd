//! Audit Recorder - best-effort append of every authorization decision
//!
//! One insert per decision. A write lost to an unavailable sink stays lost:
//! there is no buffer and no retry, and a failure never reaches the door.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::types::{AuditRecord, AuditRow, AuthorizationDecision, SideEffect};

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Audit sink returned {status}: {body}")]
    Rejected { status: reqwest::StatusCode, body: String },
    #[error("Audit write timed out after {0:?}")]
    Timeout(Duration),
}

/// Append-only destination for audit rows.
#[async_trait]
pub trait AuditSink: Send + Sync + 'static {
    async fn append(&self, row: &AuditRow) -> Result<(), AuditError>;

    fn name(&self) -> &str;
}

// ============================================================================
// Supabase (PostgREST) Sink
// ============================================================================

/// Inserts rows into a PostgREST table.
#[derive(Clone)]
pub struct SupabaseAuditSink {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl SupabaseAuditSink {
    pub fn new(
        base_url: &str,
        table: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/rest/v1/{}", base_url.trim_end_matches('/'), table),
            api_key: api_key.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl AuditSink for SupabaseAuditSink {
    async fn append(&self, row: &AuditRow) -> Result<(), AuditError> {
        let resp = self
            .http
            .post(&self.endpoint)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Prefer", "return=minimal")
            .json(row)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(AuditError::Rejected { status, body })
        }
    }

    fn name(&self) -> &str {
        "supabase"
    }
}

// ============================================================================
// Recorder
// ============================================================================

/// Fire-and-forget wrapper the pipeline talks to.
pub struct AuditRecorder {
    sink: Option<Arc<dyn AuditSink>>,
    zone_id: String,
    source_tag: String,
    timeout: Duration,
}

impl AuditRecorder {
    pub fn new(
        sink: Option<Arc<dyn AuditSink>>,
        zone_id: impl Into<String>,
        source_tag: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            sink,
            zone_id: zone_id.into(),
            source_tag: source_tag.into(),
            timeout,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.sink.is_some()
    }

    /// Attempt exactly one write for `decision` and report how it went.
    ///
    /// The row is stamped with `captured_at`, the acquisition time of the
    /// frame the decision was made on.
    pub async fn record(
        &self,
        decision: &AuthorizationDecision,
        captured_at: DateTime<Utc>,
    ) -> SideEffect {
        let Some(sink) = self.sink.as_ref() else {
            debug!("[Audit] No sink configured, decision not recorded");
            return SideEffect::Skipped("audit sink not configured".to_string());
        };

        let record = AuditRecord::at(decision.clone(), &self.zone_id, &self.source_tag, captured_at);
        let row = record.to_row();

        let result = match tokio::time::timeout(self.timeout, sink.append(&row)).await {
            Ok(result) => result,
            Err(_) => Err(AuditError::Timeout(self.timeout)),
        };

        match result {
            Ok(()) => {
                debug!(audit_id = %record.id, sink = sink.name(), "[Audit] Decision recorded");
                SideEffect::Done
            }
            Err(e) => {
                warn!(audit_id = %record.id, sink = sink.name(), "[Audit] Write failed: {}", e);
                SideEffect::Failed(e.to_string())
            }
        }
    }
}
