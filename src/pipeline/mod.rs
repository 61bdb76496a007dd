//! Frame Processing Pipeline
//!
//! ```text
//! FrameSource (every 5s) ──┐
//!                          ├──► CooldownGate ──► IdentityExtractor ──► Authorizer ──┬──► AuditRecorder
//! HTTP upload ─────────────┘      (drop)            (no face: stop)                  └──► Actuator (granted only)
//! ```
//!
//! Live frames and uploads share one gate, so at most one identity check
//! runs per cooldown interval no matter how frames arrive.

pub mod cooldown;
pub mod frame_loop;
pub mod orchestrator;
pub mod source;

pub use cooldown::{Clock, CooldownGate, SystemClock};
pub use frame_loop::FrameLoop;
pub use orchestrator::{
    DecisionRecord, NoFaceReason, Pipeline, PipelineStats, RunOutcome, RunStage,
};
pub use source::{DecoderFrameSource, FrameSource, FrameSourceError};
