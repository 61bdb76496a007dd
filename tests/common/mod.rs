//! Test doubles shared by the integration tests.
//!
//! Every collaborator records how often it was called so tests can assert on
//! the absence of side effects, not only on outcomes.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use opendoor::actuator::{Actuator, ActuatorError, DoorChannel};
use opendoor::audit::{AuditError, AuditRecorder, AuditSink};
use opendoor::authorization::Authorizer;
use opendoor::extractor::{DetectedFace, ExtractorError, FaceDetector, IdentityExtractor};
use opendoor::pipeline::{CooldownGate, FrameSource, Pipeline};
use opendoor::types::{AuditRow, AuthorizationDecision, Frame, FrameOrigin, OpenCommand, Subject};

pub const DESCRIPTOR_LEN: usize = 128;
pub const ZONE: &str = "main-entrance";
pub const SOURCE_TAG: &str = "test-gateway";

pub fn descriptor(marker: f32) -> Vec<f32> {
    vec![marker; DESCRIPTOR_LEN]
}

pub fn face(score: f32, marker: f32) -> DetectedFace {
    DetectedFace {
        score,
        descriptor: descriptor(marker),
    }
}

pub fn jpeg_frame() -> Frame {
    Frame::new(vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10], FrameOrigin::DirectUpload)
}

pub fn jane_doe() -> Subject {
    Subject {
        id: "u-jane".to_string(),
        name: Some("Jane Doe".to_string()),
        kind: Some("employee".to_string()),
    }
}

// ============================================================================
// Detector
// ============================================================================

pub struct ScriptedDetector {
    faces: Vec<DetectedFace>,
    pub calls: AtomicUsize,
}

impl ScriptedDetector {
    pub fn new(faces: Vec<DetectedFace>) -> Arc<Self> {
        Arc::new(Self {
            faces,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FaceDetector for ScriptedDetector {
    async fn detect(&self, _image: &[u8]) -> Result<Vec<DetectedFace>, ExtractorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.faces.clone())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ============================================================================
// Authorizer
// ============================================================================

pub struct ScriptedAuthorizer {
    decision: AuthorizationDecision,
    delay: Option<Duration>,
    pub calls: AtomicUsize,
    pub last_descriptor: Mutex<Option<Vec<f32>>>,
    pub last_zone: Mutex<Option<String>>,
}

impl ScriptedAuthorizer {
    pub fn new(decision: AuthorizationDecision) -> Arc<Self> {
        Arc::new(Self {
            decision,
            delay: None,
            calls: AtomicUsize::new(0),
            last_descriptor: Mutex::new(None),
            last_zone: Mutex::new(None),
        })
    }

    /// Answers only after `delay`.
    pub fn slow(decision: AuthorizationDecision, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            decision,
            delay: Some(delay),
            calls: AtomicUsize::new(0),
            last_descriptor: Mutex::new(None),
            last_zone: Mutex::new(None),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authorizer for ScriptedAuthorizer {
    async fn authorize(
        &self,
        descriptor: &[f32],
        zone_id: &str,
        _frame: &Frame,
    ) -> AuthorizationDecision {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_descriptor.lock().unwrap() = Some(descriptor.to_vec());
        *self.last_zone.lock().unwrap() = Some(zone_id.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.decision.clone()
    }
}

// ============================================================================
// Audit Sink
// ============================================================================

#[derive(Default)]
pub struct MemorySink {
    pub rows: Mutex<Vec<AuditRow>>,
    fail: bool,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Counts attempts but rejects every write.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            rows: Mutex::new(Vec::new()),
            fail: true,
        })
    }

    pub fn rows(&self) -> Vec<AuditRow> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditSink for MemorySink {
    async fn append(&self, row: &AuditRow) -> Result<(), AuditError> {
        self.rows.lock().unwrap().push(row.clone());
        if self.fail {
            Err(AuditError::Rejected {
                status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                body: "sink unavailable".to_string(),
            })
        } else {
            Ok(())
        }
    }

    fn name(&self) -> &str {
        "memory"
    }
}

// ============================================================================
// Door Channel
// ============================================================================

#[derive(Default)]
pub struct RecordingDoor {
    pub attempts: Mutex<Vec<OpenCommand>>,
    fail: bool,
}

impl RecordingDoor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Records every attempt, then fails it.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            attempts: Mutex::new(Vec::new()),
            fail: true,
        })
    }

    pub fn attempts(&self) -> Vec<OpenCommand> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl DoorChannel for RecordingDoor {
    async fn publish_open(&self, command: &OpenCommand) -> Result<(), ActuatorError> {
        self.attempts.lock().unwrap().push(command.clone());
        if self.fail {
            Err(ActuatorError::NotConnected)
        } else {
            Ok(())
        }
    }

    fn is_connected(&self) -> bool {
        !self.fail
    }

    fn name(&self) -> &str {
        "recording"
    }
}

// ============================================================================
// Frame Source
// ============================================================================

/// Hands out queued frames, then nothing.
pub struct QueuedFrames {
    frames: VecDeque<Frame>,
    pub polls: Arc<AtomicUsize>,
    pub shut_down: Arc<AtomicUsize>,
}

impl QueuedFrames {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self {
            frames: frames.into(),
            polls: Arc::new(AtomicUsize::new(0)),
            shut_down: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl FrameSource for QueuedFrames {
    async fn poll(&mut self) -> Option<Frame> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        self.frames.pop_front()
    }

    fn source_name(&self) -> &str {
        "queued"
    }

    async fn shutdown(&mut self) {
        self.shut_down.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Pipeline Assembly
// ============================================================================

/// Everything a test may want to inspect after a run.
pub struct Harness {
    pub pipeline: Arc<Pipeline>,
    pub detector: Arc<ScriptedDetector>,
    pub authorizer: Arc<ScriptedAuthorizer>,
    pub sink: Arc<MemorySink>,
    pub door: Arc<RecordingDoor>,
}

pub struct HarnessBuilder {
    faces: Vec<DetectedFace>,
    authorizer: Arc<ScriptedAuthorizer>,
    sink: Arc<MemorySink>,
    door: Arc<RecordingDoor>,
    cooldown: Duration,
    call_timeout: Duration,
    threshold: f32,
}

impl HarnessBuilder {
    pub fn new(decision: AuthorizationDecision) -> Self {
        Self {
            faces: vec![face(0.85, 1.0)],
            authorizer: ScriptedAuthorizer::new(decision),
            sink: MemorySink::new(),
            door: RecordingDoor::new(),
            cooldown: Duration::from_secs(5),
            call_timeout: Duration::from_secs(10),
            threshold: 0.6,
        }
    }

    pub fn faces(mut self, faces: Vec<DetectedFace>) -> Self {
        self.faces = faces;
        self
    }

    pub fn authorizer(mut self, authorizer: Arc<ScriptedAuthorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    pub fn sink(mut self, sink: Arc<MemorySink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn door(mut self, door: Arc<RecordingDoor>) -> Self {
        self.door = door;
        self
    }

    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn build(self) -> Harness {
        let detector = ScriptedDetector::new(self.faces);
        let extractor = Arc::new(IdentityExtractor::with_detector(
            detector.clone(),
            self.threshold,
            DESCRIPTOR_LEN,
            self.call_timeout,
        ));
        let pipeline = Pipeline::new(
            CooldownGate::new(self.cooldown),
            extractor,
            self.authorizer.clone(),
            ZONE,
            self.call_timeout,
        )
        .with_audit(AuditRecorder::new(
            Some(self.sink.clone()),
            ZONE,
            SOURCE_TAG,
            self.call_timeout,
        ))
        .with_actuator(Actuator::new(
            Some(self.door.clone()),
            SOURCE_TAG,
            self.call_timeout,
        ));

        Harness {
            pipeline: Arc::new(pipeline),
            detector,
            authorizer: self.authorizer,
            sink: self.sink,
            door: self.door,
        }
    }
}
