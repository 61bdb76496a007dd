//! HTTP face detector - sidecar running the detection/embedding models
//!
//! `POST {base}/detect` with the raw image as the body, answered by
//! `{"faces": [{"score": f32, "descriptor": [f32; 128]}]}`.
//! `GET {base}/health` returns 2xx once the models are loaded.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::{DetectedFace, ExtractorError, FaceDetector};
use crate::config::ExtractorConfig;

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    faces: Vec<DetectedFace>,
}

#[derive(Clone)]
pub struct HttpFaceDetector {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpFaceDetector {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    /// Detector for the configured sidecar, bounded by the extractor timeout.
    /// `None` when no sidecar URL is set.
    pub fn from_config(config: &ExtractorConfig) -> Result<Option<Self>, reqwest::Error> {
        match config.url.as_deref().filter(|u| !u.is_empty()) {
            Some(url) => Self::new(url, config.timeout()).map(Some),
            None => Ok(None),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Per-request bound of the underlying HTTP client.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Ok once the sidecar reports its models loaded.
    pub async fn probe(&self) -> Result<(), ExtractorError> {
        let resp = self
            .http
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(|e| ExtractorError::Detector(e.to_string()))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ExtractorError::Detector(format!(
                "health check returned {}",
                resp.status()
            )))
        }
    }
}

#[async_trait]
impl FaceDetector for HttpFaceDetector {
    async fn detect(&self, image: &[u8]) -> Result<Vec<DetectedFace>, ExtractorError> {
        let resp = self
            .http
            .post(format!("{}/detect", self.base_url))
            .header("Content-Type", "application/octet-stream")
            .body(image.to_vec())
            .send()
            .await
            .map_err(|e| ExtractorError::Detector(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ExtractorError::Detector(format!(
                "detector returned {status}: {text}"
            )));
        }

        let parsed: DetectResponse = resp
            .json()
            .await
            .map_err(|e| ExtractorError::Detector(format!("bad detector response: {e}")))?;
        Ok(parsed.faces)
    }

    fn name(&self) -> &str {
        "http-sidecar"
    }
}
