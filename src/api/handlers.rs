//! HTTP handlers for the gateway.

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use super::envelope::{ApiErrorResponse, ApiResponse};
use crate::extractor::{Extraction, ExtractorError};
use crate::pipeline::{Pipeline, PipelineStats};
use crate::types::{Frame, FrameOrigin};

/// Multipart field carrying the uploaded image.
pub const IMAGE_FIELD: &str = "image";

/// Shared state for all handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub pipeline: Arc<Pipeline>,
    pub started_at: Instant,
    /// True while the live frame loop is running.
    pub video_active: Arc<AtomicBool>,
    pub video_configured: bool,
    pub max_upload_bytes: usize,
    /// Redacted configuration for `/debug/config`.
    pub config_summary: Arc<serde_json::Value>,
}

impl GatewayState {
    pub fn new(pipeline: Arc<Pipeline>, max_upload_bytes: usize) -> Self {
        Self {
            pipeline,
            started_at: Instant::now(),
            video_active: Arc::new(AtomicBool::new(false)),
            video_configured: false,
            max_upload_bytes,
            config_summary: Arc::new(serde_json::Value::Null),
        }
    }

    pub fn with_video(mut self, configured: bool, active: Arc<AtomicBool>) -> Self {
        self.video_configured = configured;
        self.video_active = active;
        self
    }

    pub fn with_config_summary(mut self, summary: serde_json::Value) -> Self {
        self.config_summary = Arc::new(summary);
        self
    }

    fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

// ============================================================================
// Liveness / Status
// ============================================================================

#[derive(Debug, Serialize)]
pub struct PingResponse {
    pub status: &'static str,
    pub timestamp: String,
}

/// GET /ping - no dependencies, always 200.
pub async fn ping() -> Json<PingResponse> {
    Json(PingResponse {
        status: "ok",
        timestamp: Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub models_loaded: bool,
    pub mqtt_connected: bool,
}

/// GET /health
pub async fn get_health(State(state): State<GatewayState>) -> Response {
    ApiResponse::ok(HealthResponse {
        status: "healthy",
        uptime_secs: state.uptime_secs(),
        models_loaded: state.pipeline.extractor().is_ready(),
        mqtt_connected: state.pipeline.actuator().is_connected(),
    })
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub zone_id: String,
    pub models_loaded: bool,
    pub authorization_configured: bool,
    pub audit_configured: bool,
    pub mqtt_configured: bool,
    pub mqtt_connected: bool,
    pub video_configured: bool,
    pub video_active: bool,
    pub cooldown_ms: u64,
    pub cooldown_remaining_ms: u64,
    pub pipeline: PipelineStats,
}

/// GET /status
pub async fn get_status(State(state): State<GatewayState>) -> Response {
    let pipeline = &state.pipeline;
    let gate = pipeline.gate();
    ApiResponse::ok(StatusResponse {
        status: "running",
        zone_id: pipeline.zone_id().to_string(),
        models_loaded: pipeline.extractor().is_ready(),
        authorization_configured: pipeline.authorizer_configured(),
        audit_configured: pipeline.audit_configured(),
        mqtt_configured: pipeline.actuator().is_configured(),
        mqtt_connected: pipeline.actuator().is_connected(),
        video_configured: state.video_configured,
        video_active: state.video_active.load(Ordering::Relaxed),
        cooldown_ms: u64::try_from(gate.interval().as_millis()).unwrap_or(u64::MAX),
        cooldown_remaining_ms: u64::try_from(gate.remaining().as_millis()).unwrap_or(u64::MAX),
        pipeline: pipeline.stats(),
    })
}

/// GET /debug/config
pub async fn get_debug_config(State(state): State<GatewayState>) -> Response {
    ApiResponse::ok(state.config_summary.as_ref().clone())
}

// ============================================================================
// Image Submission
// ============================================================================

/// Pull the `image` field out of a multipart upload.
async fn read_image(mut multipart: Multipart, max_bytes: usize) -> Result<Vec<u8>, Response> {
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => {
                return Err(ApiErrorResponse::bad_request(format!(
                    "Missing multipart field '{IMAGE_FIELD}'"
                )))
            }
            Err(e) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                return Err(ApiErrorResponse::payload_too_large(e.body_text()))
            }
            Err(e) => return Err(ApiErrorResponse::bad_request(e.body_text())),
        };

        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }

        let bytes = match field.bytes().await {
            Ok(bytes) => bytes,
            Err(e) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                return Err(ApiErrorResponse::payload_too_large(e.body_text()))
            }
            Err(e) => return Err(ApiErrorResponse::bad_request(e.body_text())),
        };

        if bytes.is_empty() {
            return Err(ApiErrorResponse::bad_request("Uploaded image is empty"));
        }
        if bytes.len() > max_bytes {
            return Err(ApiErrorResponse::payload_too_large(format!(
                "Image is {} bytes, limit is {}",
                bytes.len(),
                max_bytes
            )));
        }
        return Ok(bytes.to_vec());
    }
}

#[derive(Debug, Serialize)]
pub struct FaceResponse {
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

/// POST /process-face - extraction only. Skips the cooldown gate and never
/// authorizes, records, or actuates.
pub async fn process_face(State(state): State<GatewayState>, multipart: Multipart) -> Response {
    let bytes = match read_image(multipart, state.max_upload_bytes).await {
        Ok(bytes) => bytes,
        Err(resp) => return resp,
    };
    info!(bytes = bytes.len(), "📷 Extract-only upload");

    let frame = Frame::new(bytes, FrameOrigin::DirectUpload);
    match state.pipeline.extractor().extract_detailed(&frame).await {
        Ok(Extraction::Found(candidate)) => ApiResponse::ok(FaceResponse {
            found: true,
            confidence: Some(candidate.quality_score),
            embedding: Some(candidate.descriptor),
            reason: None,
        }),
        Ok(Extraction::NoFace) => ApiResponse::ok(FaceResponse {
            found: false,
            embedding: None,
            confidence: None,
            reason: Some("no_face_detected"),
        }),
        Ok(Extraction::LowConfidence { score }) => ApiResponse::ok(FaceResponse {
            found: false,
            embedding: None,
            confidence: Some(score),
            reason: Some("low_confidence"),
        }),
        Err(ExtractorError::CapabilityUnavailable) => {
            ApiErrorResponse::service_unavailable("Face models are still loading")
        }
        Err(e) => {
            warn!("Extract-only upload failed: {}", e);
            ApiErrorResponse::internal(e.to_string())
        }
    }
}

/// POST /process-frame - full pipeline run, same gate as live video.
///
/// Responds once the run is done, side effects included.
pub async fn process_frame(State(state): State<GatewayState>, multipart: Multipart) -> Response {
    let bytes = match read_image(multipart, state.max_upload_bytes).await {
        Ok(bytes) => bytes,
        Err(resp) => return resp,
    };
    info!(bytes = bytes.len(), "📷 Frame upload");

    let outcome = state
        .pipeline
        .submit(Frame::new(bytes, FrameOrigin::DirectUpload))
        .await;
    ApiResponse::ok(outcome)
}
