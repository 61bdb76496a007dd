//! Frame source abstraction for live video ingestion.
//!
//! An external decoder writes the most recent still of the stream to a
//! staging file at its own pace; the source hands out whatever is there when
//! polled. Polling never waits for a new frame.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::VideoConfig;
use crate::types::{Frame, FrameOrigin};

/// How long shutdown waits for the decoder to exit after the kill signal.
const DECODER_EXIT_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum FrameSourceError {
    #[error("failed to spawn decoder '{bin}': {source}")]
    Spawn {
        bin: String,
        #[source]
        source: std::io::Error,
    },
    #[error("decoder exited during startup ({0})")]
    ExitedEarly(ExitStatus),
    #[error("staging I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Trait abstracting where live frames come from.
///
/// The frame loop calls [`poll`](FrameSource::poll) on a fixed period and
/// [`shutdown`](FrameSource::shutdown) once when it stops. Test doubles
/// implement this directly without any external process.
#[async_trait]
pub trait FrameSource: Send + 'static {
    /// Latest available frame, or `None` if nothing (or nothing non-empty)
    /// is available right now.
    async fn poll(&mut self) -> Option<Frame>;

    /// Human-readable name for logging.
    fn source_name(&self) -> &str;

    /// Release whatever the source owns.
    async fn shutdown(&mut self) {}
}

// ============================================================================
// Decoder Source (ffmpeg child process + staging file)
// ============================================================================

/// Owns the decoder child process and its staging directory.
pub struct DecoderFrameSource {
    stream_url: String,
    settings: VideoConfig,
    child: Option<Child>,
    decoder_exited: bool,
}

impl DecoderFrameSource {
    pub fn new(stream_url: impl Into<String>, settings: VideoConfig) -> Self {
        Self {
            stream_url: stream_url.into(),
            settings,
            child: None,
            decoder_exited: false,
        }
    }

    pub fn frame_path(&self) -> PathBuf {
        self.settings.frame_path()
    }

    pub fn is_running(&self) -> bool {
        self.child.is_some() && !self.decoder_exited
    }

    fn decoder_args(&self) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            self.stream_url.clone(),
            "-f".to_string(),
            "image2".to_string(),
            "-vf".to_string(),
            format!("fps={}", self.settings.decoder_fps),
            "-update".to_string(),
            "1".to_string(),
            self.frame_path().to_string_lossy().into_owned(),
        ]
    }

    /// Create the staging directory, spawn the decoder and check it is
    /// still alive after the startup grace period.
    pub async fn start(&mut self) -> Result<(), FrameSourceError> {
        tokio::fs::create_dir_all(&self.settings.staging_dir).await?;

        let mut child = Command::new(&self.settings.decoder_bin)
            .args(self.decoder_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| FrameSourceError::Spawn {
                bin: self.settings.decoder_bin.clone(),
                source,
            })?;

        tokio::time::sleep(Duration::from_millis(self.settings.startup_grace_ms)).await;

        if let Some(status) = child.try_wait()? {
            return Err(FrameSourceError::ExitedEarly(status));
        }

        info!(
            pid = child.id().unwrap_or_default(),
            staging = %self.frame_path().display(),
            "✓ Video decoder started"
        );
        self.child = Some(child);
        self.decoder_exited = false;
        Ok(())
    }

    fn check_decoder(&mut self) {
        if self.decoder_exited {
            return;
        }
        if let Some(child) = self.child.as_mut() {
            match child.try_wait() {
                Ok(Some(status)) => {
                    warn!("[FrameSource] Decoder exited ({}), live video stopped", status);
                    self.decoder_exited = true;
                }
                Ok(None) => {}
                Err(e) => warn!("[FrameSource] Could not query decoder status: {}", e),
            }
        }
    }
}

#[async_trait]
impl FrameSource for DecoderFrameSource {
    async fn poll(&mut self) -> Option<Frame> {
        self.check_decoder();
        if self.decoder_exited {
            return None;
        }

        let path = self.frame_path();
        match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => {
                debug!("[FrameSource] Staging frame is empty");
                None
            }
            Ok(bytes) => {
                // The decoder's write time is the acquisition time.
                let captured_at = tokio::fs::metadata(&path)
                    .await
                    .and_then(|m| m.modified())
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());
                Some(Frame::captured_at(bytes, FrameOrigin::LiveVideo, captured_at))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("[FrameSource] No frame written yet");
                None
            }
            Err(e) => {
                warn!("[FrameSource] Failed to read {}: {}", path.display(), e);
                None
            }
        }
    }

    fn source_name(&self) -> &str {
        "decoder"
    }

    async fn shutdown(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                debug!("[FrameSource] Kill signal not delivered: {}", e);
            }
            match tokio::time::timeout(DECODER_EXIT_WAIT, child.wait()).await {
                Ok(Ok(status)) => info!("Video decoder stopped ({})", status),
                Ok(Err(e)) => warn!("[FrameSource] Failed waiting for decoder: {}", e),
                Err(_) => warn!("[FrameSource] Decoder did not exit within {:?}", DECODER_EXIT_WAIT),
            }
        }

        match tokio::fs::remove_dir_all(&self.settings.staging_dir).await {
            Ok(()) => debug!("[FrameSource] Staging directory removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "[FrameSource] Failed to remove {}: {}",
                self.settings.staging_dir.display(),
                e
            ),
        }
    }
}
