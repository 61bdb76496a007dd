//! OpenDoor: Facility Access Gateway
//!
//! Samples video frames, extracts a face descriptor, asks a remote
//! authorization service for a decision, records every decision and opens
//! the door over MQTT when access is granted.
//!
//! ## Architecture
//!
//! - **Pipeline**: cooldown gate, stage sequencing, live frame loop
//! - **Extractor**: face detection capability behind a readiness slot
//! - **Authorization**: remote validation normalized into one decision type
//! - **Audit / Actuator**: best-effort side effects of a decision
//! - **API**: HTTP uploads, health and status

pub mod actuator;
pub mod api;
pub mod audit;
pub mod authorization;
pub mod config;
pub mod extractor;
pub mod pipeline;
pub mod types;

pub use config::GatewayConfig;

pub use types::{
    AuditRecord, AuditRow, AuthorizationDecision, DecisionKind, FaceCandidate, Frame,
    FrameOrigin, OpenCommand, SideEffect, Subject,
};

pub use pipeline::{CooldownGate, DecisionRecord, Pipeline, PipelineStats, RunOutcome};
