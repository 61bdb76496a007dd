//! Pipeline Orchestrator - one frame through gate, extract, authorize, record/actuate
//!
//! ```text
//! Idle ──► Admitted ──► Extracting ──► Authorizing ──► Recording ─┐
//!   │                      │                           Actuating ─┴─► Done
//!   └── gate rejects ──────┴── no face / not ready ───────────────────► Done
//! ```
//!
//! CRITICAL GUARANTEES:
//! - A frame the gate rejects causes no extraction, no network call, no audit.
//! - Nothing is audited unless an authorization attempt completed.
//! - Every completed authorization is handed to the audit recorder.
//! - The door opens only for `granted == true`; audit and actuation run side
//!   by side and neither waits on the other's result.
//! - No stage retries. The next frame starts a fresh run.
//! - An admitted run finishes on its own task even if the submitter goes
//!   away (HTTP client hangs up, frame loop shuts down).

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::cooldown::CooldownGate;
use crate::actuator::Actuator;
use crate::audit::AuditRecorder;
use crate::authorization::Authorizer;
use crate::extractor::{Extraction, ExtractorError, IdentityExtractor};
use crate::types::{AuthorizationDecision, DecisionKind, Frame, FrameOrigin, SideEffect};

// ============================================================================
// Run State & Outcome
// ============================================================================

/// Stage a run is in. Used for tracing only; runs never move backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Idle,
    Admitted,
    Extracting,
    Authorizing,
    Recording,
    Actuating,
    Done,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStage::Idle => "idle",
            RunStage::Admitted => "admitted",
            RunStage::Extracting => "extracting",
            RunStage::Authorizing => "authorizing",
            RunStage::Recording => "recording",
            RunStage::Actuating => "actuating",
            RunStage::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NoFaceReason {
    NoFaceDetected,
    LowConfidence { score: f32 },
}

/// Everything a completed run produced.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionRecord {
    pub run_id: Uuid,
    pub origin: FrameOrigin,
    pub quality_score: f32,
    pub decision: AuthorizationDecision,
    pub audit: SideEffect,
    pub actuation: SideEffect,
}

/// Terminal result of one submitted frame.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Rejected by the cooldown gate.
    Dropped,
    /// The extraction capability is still warming up.
    CapabilityUnavailable,
    NoFace { reason: NoFaceReason },
    ExtractionFailed { error: String },
    Completed(DecisionRecord),
    /// The run's task panicked or was aborted by runtime shutdown.
    Interrupted { error: String },
}

impl RunOutcome {
    pub fn is_dropped(&self) -> bool {
        matches!(self, RunOutcome::Dropped)
    }
}

// ============================================================================
// Statistics
// ============================================================================

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    admitted: AtomicU64,
    dropped: AtomicU64,
    no_face: AtomicU64,
    capability_unavailable: AtomicU64,
    extraction_failed: AtomicU64,
    granted: AtomicU64,
    denied: AtomicU64,
    audit_failures: AtomicU64,
    actuation_failures: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Point-in-time copy of the pipeline counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub submitted: u64,
    pub admitted: u64,
    pub dropped: u64,
    pub no_face: u64,
    pub capability_unavailable: u64,
    pub extraction_failed: u64,
    pub granted: u64,
    /// Every completed non-granted decision, whatever its kind.
    pub denied: u64,
    pub audit_failures: u64,
    pub actuation_failures: u64,
}

impl fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pipeline: {} frames ({} admitted, {} dropped), {} granted, {} denied, {} no face",
            self.submitted, self.admitted, self.dropped, self.granted, self.denied, self.no_face
        )
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Owns the cooldown gate and sequences the stages for each frame.
///
/// Shared as `Arc<Pipeline>` between the frame loop and the HTTP handlers;
/// both go through the same gate.
pub struct Pipeline {
    gate: CooldownGate,
    extractor: Arc<IdentityExtractor>,
    authorizer: Arc<dyn Authorizer>,
    audit: AuditRecorder,
    actuator: Actuator,
    zone_id: String,
    call_timeout: Duration,
    counters: Counters,
}

impl Pipeline {
    /// Pipeline with audit and actuation unconfigured.
    pub fn new(
        gate: CooldownGate,
        extractor: Arc<IdentityExtractor>,
        authorizer: Arc<dyn Authorizer>,
        zone_id: impl Into<String>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            gate,
            extractor,
            authorizer,
            audit: AuditRecorder::new(None, "", "", call_timeout),
            actuator: Actuator::new(None, "", call_timeout),
            zone_id: zone_id.into(),
            call_timeout,
            counters: Counters::default(),
        }
    }

    pub fn with_audit(mut self, audit: AuditRecorder) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_actuator(mut self, actuator: Actuator) -> Self {
        self.actuator = actuator;
        self
    }

    pub fn gate(&self) -> &CooldownGate {
        &self.gate
    }

    pub fn extractor(&self) -> &Arc<IdentityExtractor> {
        &self.extractor
    }

    pub fn authorizer_configured(&self) -> bool {
        self.authorizer.is_configured()
    }

    pub fn audit_configured(&self) -> bool {
        self.audit.is_configured()
    }

    pub fn actuator(&self) -> &Actuator {
        &self.actuator
    }

    pub fn zone_id(&self) -> &str {
        &self.zone_id
    }

    pub fn stats(&self) -> PipelineStats {
        let c = &self.counters;
        let load = |a: &AtomicU64| a.load(Ordering::Relaxed);
        PipelineStats {
            submitted: load(&c.submitted),
            admitted: load(&c.admitted),
            dropped: load(&c.dropped),
            no_face: load(&c.no_face),
            capability_unavailable: load(&c.capability_unavailable),
            extraction_failed: load(&c.extraction_failed),
            granted: load(&c.granted),
            denied: load(&c.denied),
            audit_failures: load(&c.audit_failures),
            actuation_failures: load(&c.actuation_failures),
        }
    }

    /// Run one frame through the pipeline and return how it ended.
    ///
    /// Returns once the run is done, including both side effects. An admitted
    /// run executes on its own task: dropping this future does not cancel it.
    pub async fn submit(self: &Arc<Self>, frame: Frame) -> RunOutcome {
        bump(&self.counters.submitted);

        if !self.gate.admit() {
            bump(&self.counters.dropped);
            debug!(origin = %frame.origin(), stage = %RunStage::Idle, "Frame dropped (cooldown)");
            return RunOutcome::Dropped;
        }
        bump(&self.counters.admitted);

        let run_id = Uuid::new_v4();
        let span = info_span!("run", run_id = %run_id, origin = %frame.origin(), zone = %self.zone_id);
        let pipeline = Arc::clone(self);
        let run = tokio::spawn(
            async move { pipeline.run_admitted(run_id, frame).await }.instrument(span),
        );

        match run.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(run_id = %run_id, "Run task did not finish: {}", e);
                RunOutcome::Interrupted {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn run_admitted(&self, run_id: Uuid, frame: Frame) -> RunOutcome {
        let origin = frame.origin();
        debug!(stage = %RunStage::Admitted, bytes = frame.len(), "Run started");

        // Extract
        debug!(stage = %RunStage::Extracting);
        let candidate = match self.extractor.extract_detailed(&frame).await {
            Ok(Extraction::Found(candidate)) => candidate,
            Ok(Extraction::NoFace) => {
                bump(&self.counters.no_face);
                info!(stage = %RunStage::Done, "No face detected");
                return RunOutcome::NoFace {
                    reason: NoFaceReason::NoFaceDetected,
                };
            }
            Ok(Extraction::LowConfidence { score }) => {
                bump(&self.counters.no_face);
                info!(stage = %RunStage::Done, score, "Face below confidence threshold");
                return RunOutcome::NoFace {
                    reason: NoFaceReason::LowConfidence { score },
                };
            }
            Err(ExtractorError::CapabilityUnavailable) => {
                bump(&self.counters.capability_unavailable);
                warn!(stage = %RunStage::Done, "Extraction capability not ready, frame skipped");
                return RunOutcome::CapabilityUnavailable;
            }
            Err(e) => {
                bump(&self.counters.extraction_failed);
                warn!(stage = %RunStage::Done, "Extraction failed: {}", e);
                return RunOutcome::ExtractionFailed {
                    error: e.to_string(),
                };
            }
        };

        // Authorize
        debug!(stage = %RunStage::Authorizing, score = candidate.quality_score);
        let decision = match tokio::time::timeout(
            self.call_timeout,
            self.authorizer
                .authorize(&candidate.descriptor, &self.zone_id, &frame),
        )
        .await
        {
            Ok(decision) => decision,
            Err(_) => AuthorizationDecision::service_unreachable(format!(
                "authorization timed out after {:?}",
                self.call_timeout
            )),
        };

        // Record + actuate, independently
        debug!(stage = %RunStage::Recording, kind = %decision.kind);
        if decision.granted {
            debug!(stage = %RunStage::Actuating);
        }
        let (audit, actuation) =
            tokio::join!(
                self.audit.record(&decision, frame.timestamp()),
                self.actuator.actuate(&decision)
            );

        if decision.granted {
            bump(&self.counters.granted);
        } else {
            bump(&self.counters.denied);
        }
        if audit.is_failed() {
            bump(&self.counters.audit_failures);
        }
        if actuation.is_failed() {
            bump(&self.counters.actuation_failures);
        }

        let icon = match decision.kind {
            DecisionKind::Granted => "✅",
            DecisionKind::ServiceUnreachable | DecisionKind::NoCapability => "⚠️",
            DecisionKind::Denied | DecisionKind::UnknownSubject => "⛔",
        };
        info!(
            stage = %RunStage::Done,
            kind = %decision.kind,
            subject = decision.subject_name().or(decision.subject_id()).unwrap_or("-"),
            score = candidate.quality_score,
            audit = ?audit,
            actuation = ?actuation,
            "{} Access decision",
            icon
        );

        RunOutcome::Completed(DecisionRecord {
            run_id,
            origin,
            quality_score: candidate.quality_score,
            decision,
            audit,
            actuation,
        })
    }
}
