//! Identity Extractor Adapter
//!
//! ```text
//! Frame bytes ──► FaceDetector::detect ──► [DetectedFace; n]
//!                                              │
//!                         best score (first on ties), >= threshold?
//!                                              │
//!                                  FaceCandidate | no face
//! ```
//!
//! The detector capability is installed into a readiness slot once it is
//! warm. Until then every extraction fails with
//! [`ExtractorError::CapabilityUnavailable`]. No retries happen here; a failed
//! or empty extraction ends the run for that frame.

mod http_detector;

pub use http_detector::HttpFaceDetector;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::types::{FaceCandidate, Frame};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ExtractorError {
    #[error("face extraction capability is not initialized")]
    CapabilityUnavailable,
    #[error("face detector failed: {0}")]
    Detector(String),
    #[error("face detector timed out after {0:?}")]
    Timeout(Duration),
    #[error("descriptor has {actual} values, expected {expected}")]
    Descriptor { expected: usize, actual: usize },
}

// ============================================================================
// Detector Capability
// ============================================================================

/// One face as reported by the detection capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    pub score: f32,
    pub descriptor: Vec<f32>,
}

/// Opaque face detection + embedding capability.
#[async_trait]
pub trait FaceDetector: Send + Sync + 'static {
    /// Every face found in the encoded image, in detector order.
    async fn detect(&self, image: &[u8]) -> Result<Vec<DetectedFace>, ExtractorError>;

    fn name(&self) -> &str;
}

// ============================================================================
// Adapter
// ============================================================================

/// What an extraction found.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Found(FaceCandidate),
    NoFace,
    /// Best candidate scored under the threshold.
    LowConfidence { score: f32 },
}

impl Extraction {
    pub fn into_candidate(self) -> Option<FaceCandidate> {
        match self {
            Extraction::Found(candidate) => Some(candidate),
            Extraction::NoFace | Extraction::LowConfidence { .. } => None,
        }
    }
}

pub struct IdentityExtractor {
    detector: RwLock<Option<Arc<dyn FaceDetector>>>,
    threshold: f32,
    descriptor_len: usize,
    timeout: Duration,
}

impl IdentityExtractor {
    /// Adapter with an empty readiness slot.
    pub fn new(threshold: f32, descriptor_len: usize, timeout: Duration) -> Self {
        Self {
            detector: RwLock::new(None),
            threshold,
            descriptor_len,
            timeout,
        }
    }

    /// Adapter that is ready immediately.
    pub fn with_detector(
        detector: Arc<dyn FaceDetector>,
        threshold: f32,
        descriptor_len: usize,
        timeout: Duration,
    ) -> Self {
        let extractor = Self::new(threshold, descriptor_len, timeout);
        extractor.install(detector);
        extractor
    }

    /// Fill the readiness slot. Later calls replace the detector.
    pub fn install(&self, detector: Arc<dyn FaceDetector>) {
        info!(detector = detector.name(), "✓ Face extraction capability ready");
        let mut slot = self.detector.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(detector);
    }

    pub fn is_ready(&self) -> bool {
        self.detector
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Best face of `frame`, or none.
    pub async fn extract(&self, frame: &Frame) -> Result<Option<FaceCandidate>, ExtractorError> {
        Ok(self.extract_detailed(frame).await?.into_candidate())
    }

    /// Like [`extract`](Self::extract) but tells "no face" and "low
    /// confidence" apart.
    pub async fn extract_detailed(&self, frame: &Frame) -> Result<Extraction, ExtractorError> {
        let detector = self
            .detector
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(ExtractorError::CapabilityUnavailable)?;

        let faces = tokio::time::timeout(self.timeout, detector.detect(frame.bytes()))
            .await
            .map_err(|_| ExtractorError::Timeout(self.timeout))??;

        debug!(faces = faces.len(), bytes = frame.len(), "Detector returned");

        let Some((index, best)) = select_best(&faces) else {
            return Ok(Extraction::NoFace);
        };

        if best.score < self.threshold {
            debug!(
                score = best.score,
                threshold = self.threshold,
                "Best face below confidence threshold"
            );
            return Ok(Extraction::LowConfidence { score: best.score });
        }

        if best.descriptor.len() != self.descriptor_len {
            return Err(ExtractorError::Descriptor {
                expected: self.descriptor_len,
                actual: best.descriptor.len(),
            });
        }

        debug!(index, score = best.score, "Selected face");
        Ok(Extraction::Found(FaceCandidate {
            descriptor: best.descriptor.clone(),
            quality_score: best.score,
        }))
    }
}

/// Highest-scoring face with its index. The first one wins a tie; NaN
/// scores never win.
pub fn select_best(faces: &[DetectedFace]) -> Option<(usize, &DetectedFace)> {
    let mut best: Option<(usize, &DetectedFace)> = None;
    for (i, face) in faces.iter().enumerate() {
        let better = match best {
            None => !face.score.is_nan(),
            Some((_, current)) => face.score > current.score,
        };
        if better {
            best = Some((i, face));
        }
    }
    best
}

// ============================================================================
// Background Initialization
// ============================================================================

/// Probe `detector` until it reports healthy, then install it.
///
/// Runs as a supervised background task so the HTTP server is up before the
/// capability is.
pub async fn install_when_ready(
    extractor: Arc<IdentityExtractor>,
    detector: Arc<HttpFaceDetector>,
    retry: Duration,
    cancel: CancellationToken,
) {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match detector.probe().await {
            Ok(()) => {
                extractor.install(detector);
                return;
            }
            Err(e) => {
                if attempt == 1 || attempt % 12 == 0 {
                    warn!(
                        attempt,
                        "[ExtractorInit] Detector not ready ({}), retrying in {:?}", e, retry
                    );
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("[ExtractorInit] Shutdown before detector became ready");
                return;
            }
            _ = tokio::time::sleep(retry) => {}
        }
    }
}
