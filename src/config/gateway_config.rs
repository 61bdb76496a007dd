//! Gateway Configuration - every tunable of the access pipeline as TOML
//!
//! Each section implements `Default` with the values from [`super::defaults`],
//! so an empty or missing file yields a gateway that serves HTTP and accepts
//! uploads but has no video, authorization, audit, or door collaborators.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::defaults;

/// Environment variable pointing at a TOML config file.
pub const CONFIG_ENV_VAR: &str = "OPENDOOR_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "opendoor.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one gateway (one door / zone).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub zone: ZoneConfig,

    #[serde(default)]
    pub extractor: ExtractorConfig,

    /// Shared credentials for the authorization function and the audit table.
    #[serde(default)]
    pub supabase: SupabaseConfig,

    #[serde(default)]
    pub authorization: AuthorizationConfig,

    #[serde(default)]
    pub audit: AuditConfig,

    #[serde(default)]
    pub mqtt: MqttConfig,

    #[serde(default)]
    pub video: VideoConfig,
}

impl GatewayConfig {
    /// Load configuration using the standard search order, apply environment
    /// overrides and validate.
    ///
    /// A file that exists but fails to parse is an error; silently running a
    /// door controller on defaults after a typo is worse than refusing to start.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match Self::locate(explicit) {
            Some(path) => {
                let config = Self::load_from_file(&path)?;
                info!(path = %path.display(), "Loaded gateway config");
                config
            }
            None => {
                info!("No {} found, using built-in defaults", LOCAL_CONFIG_FILE);
                Self::default()
            }
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn locate(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                return Some(p);
            }
            warn!(path = %path, "{} points to non-existent file, falling back", CONFIG_ENV_VAR);
        }
        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        local.exists().then_some(local)
    }

    /// Parse a specific TOML file without applying overrides.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
            other => other,
        })
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::new(), e))
    }

    /// Apply the deployment's environment variables on top of the file values.
    ///
    /// `lookup` abstracts `std::env::var` so tests can feed a fixed map.
    /// Empty values are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(port) = get("PORT") {
            match port.parse::<u16>() {
                Ok(p) => {
                    let host = self
                        .server
                        .addr
                        .rsplit_once(':')
                        .map_or("0.0.0.0", |(h, _)| h)
                        .to_string();
                    self.server.addr = format!("{host}:{p}");
                }
                Err(_) => warn!(value = %port, "Ignoring non-numeric PORT"),
            }
        }
        if let Some(v) = get("ZONE_ID") {
            self.zone.id = v;
        }
        if let Some(v) = get("SUPABASE_URL") {
            self.supabase.url = Some(v);
        }
        if let Some(v) = get("SUPABASE_ANON_KEY") {
            self.supabase.anon_key = Some(v);
        }
        if let Some(v) = get("MQTT_BROKER_URL") {
            self.mqtt.broker_url = Some(v);
        }
        if let Some(v) = get("MQTT_USERNAME") {
            self.mqtt.username = Some(v);
        }
        if let Some(v) = get("MQTT_PASSWORD") {
            self.mqtt.password = Some(v);
        }
        if let Some(v) = get("MQTT_TOPIC") {
            self.mqtt.topic = v;
        }
        if let Some(v) = get("RTSP_URL") {
            self.video.rtsp_url = Some(v);
        }
        if let Some(v) = get("EXTRACTOR_URL") {
            self.extractor.url = Some(v);
        }
        if let Some(v) = get("FACE_DETECTION_CONFIDENCE") {
            match v.parse::<f32>() {
                Ok(t) => self.pipeline.confidence_threshold = t,
                Err(_) => warn!(value = %v, "Ignoring non-numeric FACE_DETECTION_CONFIDENCE"),
            }
        }
        if let Some(v) = get("PROCESSING_COOLDOWN_MS") {
            match v.parse::<u64>() {
                Ok(ms) => self.pipeline.cooldown_ms = ms,
                Err(_) => warn!(value = %v, "Ignoring non-numeric PROCESSING_COOLDOWN_MS"),
            }
        }
    }

    /// Check values for internal consistency.
    ///
    /// Absent collaborators are not errors; only values that would make a
    /// configured component misbehave are rejected.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();
        let p = &self.pipeline;

        if !p.confidence_threshold.is_finite() || !(0.0..=1.0).contains(&p.confidence_threshold) {
            errors.push(format!(
                "pipeline.confidence_threshold must be within [0, 1], got {}",
                p.confidence_threshold
            ));
        }
        if p.descriptor_len == 0 {
            errors.push("pipeline.descriptor_len must be > 0".to_string());
        }
        if p.call_timeout_secs == 0 {
            errors.push("pipeline.call_timeout_secs must be > 0".to_string());
        }
        if p.cooldown_ms == 0 {
            warn!("pipeline.cooldown_ms is 0, every submitted frame will be processed");
        }
        if self.extractor.timeout_secs == 0 {
            errors.push("extractor.timeout_secs must be > 0".to_string());
        }
        if self.extractor.init_retry_secs == 0 {
            errors.push("extractor.init_retry_secs must be > 0".to_string());
        }
        if self.video.poll_interval_ms == 0 {
            errors.push("video.poll_interval_ms must be > 0".to_string());
        }
        if self.video.frame_file.trim().is_empty() {
            errors.push("video.frame_file must not be empty".to_string());
        }
        if self.mqtt.broker_url.is_some() {
            if self.mqtt.topic.trim().is_empty() {
                errors.push("mqtt.topic must be set when a broker is configured".to_string());
            }
            if self.mqtt.endpoint().is_none() {
                errors.push(format!(
                    "mqtt.broker_url is not a valid host[:port]: {:?}",
                    self.mqtt.broker_url
                ));
            }
        }
        if let Err(e) = self.server.addr.parse::<std::net::SocketAddr>() {
            errors.push(format!("server.addr '{}' is invalid: {}", self.server.addr, e));
        }
        if self.zone.id.trim().is_empty() {
            warn!("zone.id is not set; decisions will be recorded without a zone");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Collaborator summary with secrets reduced to a short prefix.
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "zone_id": mask(Some(&self.zone.id), 8),
            "supabase_url": mask(self.supabase.url.as_deref(), 20),
            "supabase_anon_key": mask(self.supabase.anon_key.as_deref(), 6),
            "extractor_url": self.extractor.url.clone(),
            "rtsp_url": mask(self.video.rtsp_url.as_deref(), 12),
            "mqtt_broker_url": self.mqtt.broker_url.clone(),
            "mqtt_username": self.mqtt.username.clone(),
            "mqtt_password": mask(self.mqtt.password.as_deref(), 0),
            "mqtt_topic": self.mqtt.topic.clone(),
            "server_addr": self.server.addr.clone(),
            "cooldown_ms": self.pipeline.cooldown_ms,
            "confidence_threshold": self.pipeline.confidence_threshold,
        })
    }
}

fn mask(value: Option<&str>, keep: usize) -> serde_json::Value {
    match value {
        None => serde_json::Value::Null,
        Some(v) if v.is_empty() => serde_json::Value::Null,
        Some(v) => {
            let prefix: String = v.chars().take(keep).collect();
            serde_json::Value::String(format!("{prefix}..."))
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config I/O error ({}): {1}", .0.display())]
    Io(PathBuf, #[source] std::io::Error),
    #[error("Config parse error ({}): {1}", .0.display())]
    Parse(PathBuf, #[source] toml::de::Error),
    #[error("Config validation failed:\n  - {}", .0.join("\n  - "))]
    Validation(Vec<String>),
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP bind address. `PORT` replaces the port part.
    #[serde(default = "default_server_addr")]
    pub addr: String,

    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_server_addr() -> String {
    defaults::SERVER_ADDR.to_string()
}
fn default_max_upload_bytes() -> usize {
    defaults::MAX_UPLOAD_BYTES
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_server_addr(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,

    #[serde(default = "default_descriptor_len")]
    pub descriptor_len: usize,

    #[serde(default = "default_source_tag")]
    pub source_tag: String,

    /// Bound for authorization, audit, and actuator calls.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

fn default_cooldown_ms() -> u64 {
    defaults::COOLDOWN_MS
}
fn default_confidence_threshold() -> f32 {
    defaults::CONFIDENCE_THRESHOLD
}
fn default_descriptor_len() -> usize {
    defaults::DESCRIPTOR_LEN
}
fn default_source_tag() -> String {
    defaults::SOURCE_TAG.to_string()
}
fn default_call_timeout_secs() -> u64 {
    defaults::CALL_TIMEOUT_SECS
}

impl PipelineConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: default_cooldown_ms(),
            confidence_threshold: default_confidence_threshold(),
            descriptor_len: default_descriptor_len(),
            source_tag: default_source_tag(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

/// The access point this gateway controls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ZoneConfig {
    #[serde(default)]
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Base URL of the face detection/embedding sidecar.
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_call_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_extractor_retry")]
    pub init_retry_secs: u64,
}

fn default_extractor_retry() -> u64 {
    defaults::EXTRACTOR_INIT_RETRY_SECS
}

impl ExtractorConfig {
    /// Bound for one detection call, both per HTTP request and per run stage.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_call_timeout_secs(),
            init_retry_secs: default_extractor_retry(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SupabaseConfig {
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub anon_key: Option<String>,
}

impl SupabaseConfig {
    /// `(base_url, key)` when both are present.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.url.as_deref(), self.anon_key.as_deref()) {
            (Some(url), Some(key)) if !url.is_empty() && !key.is_empty() => Some((url, key)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationConfig {
    #[serde(default = "default_function_path")]
    pub function_path: String,
}

fn default_function_path() -> String {
    defaults::AUTHORIZATION_FUNCTION_PATH.to_string()
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            function_path: default_function_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_audit_table")]
    pub table: String,
}

fn default_audit_table() -> String {
    defaults::AUDIT_TABLE.to_string()
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            table: default_audit_table(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// `host`, `host:port`, `mqtt://host[:port]` or `tcp://host[:port]`.
    #[serde(default)]
    pub broker_url: Option<String>,

    /// Used when `broker_url` carries no port.
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_mqtt_topic")]
    pub topic: String,

    #[serde(default = "default_mqtt_client_id")]
    pub client_id: String,

    #[serde(default = "default_mqtt_keep_alive")]
    pub keep_alive_secs: u64,

    #[serde(default = "default_mqtt_reconnect")]
    pub reconnect_secs: u64,
}

fn default_mqtt_port() -> u16 {
    defaults::MQTT_PORT
}
fn default_mqtt_topic() -> String {
    defaults::MQTT_TOPIC.to_string()
}
fn default_mqtt_client_id() -> String {
    defaults::MQTT_CLIENT_ID.to_string()
}
fn default_mqtt_keep_alive() -> u64 {
    defaults::MQTT_KEEP_ALIVE_SECS
}
fn default_mqtt_reconnect() -> u64 {
    defaults::MQTT_RECONNECT_SECS
}

impl MqttConfig {
    /// Broker host and port with any scheme prefix stripped.
    pub fn endpoint(&self) -> Option<(String, u16)> {
        let raw = self.broker_url.as_deref()?.trim();
        let stripped = raw
            .strip_prefix("mqtt://")
            .or_else(|| raw.strip_prefix("tcp://"))
            .unwrap_or(raw)
            .trim_end_matches('/');
        if stripped.is_empty() {
            return None;
        }
        match stripped.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().ok()?;
                (!host.is_empty()).then(|| (host.to_string(), port))
            }
            None => Some((stripped.to_string(), self.port)),
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_url: None,
            port: default_mqtt_port(),
            username: None,
            password: None,
            topic: default_mqtt_topic(),
            client_id: default_mqtt_client_id(),
            keep_alive_secs: default_mqtt_keep_alive(),
            reconnect_secs: default_mqtt_reconnect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    /// Stream locator handed to the decoder. No live video when unset.
    #[serde(default)]
    pub rtsp_url: Option<String>,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    #[serde(default = "default_frame_file")]
    pub frame_file: String,

    #[serde(default = "default_decoder_bin")]
    pub decoder_bin: String,

    #[serde(default = "default_decoder_fps")]
    pub decoder_fps: String,

    #[serde(default = "default_startup_grace")]
    pub startup_grace_ms: u64,
}

fn default_poll_interval() -> u64 {
    defaults::VIDEO_POLL_INTERVAL_MS
}
fn default_staging_dir() -> PathBuf {
    PathBuf::from(defaults::VIDEO_STAGING_DIR)
}
fn default_frame_file() -> String {
    defaults::VIDEO_FRAME_FILE.to_string()
}
fn default_decoder_bin() -> String {
    defaults::VIDEO_DECODER_BIN.to_string()
}
fn default_decoder_fps() -> String {
    defaults::VIDEO_DECODER_FPS.to_string()
}
fn default_startup_grace() -> u64 {
    defaults::VIDEO_STARTUP_GRACE_MS
}

impl VideoConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn frame_path(&self) -> PathBuf {
        self.staging_dir.join(&self.frame_file)
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            rtsp_url: None,
            poll_interval_ms: default_poll_interval(),
            staging_dir: default_staging_dir(),
            frame_file: default_frame_file(),
            decoder_bin: default_decoder_bin(),
            decoder_fps: default_decoder_fps(),
            startup_grace_ms: default_startup_grace(),
        }
    }
}
