//! System-wide default constants.
//!
//! Grouped by subsystem. Every value here can be overridden from
//! `opendoor.toml` or the environment; these are what an empty config yields.

// ============================================================================
// Server
// ============================================================================

/// HTTP bind address.
pub const SERVER_ADDR: &str = "0.0.0.0:3001";

/// Largest accepted image upload (bytes). 10 MiB.
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

// ============================================================================
// Pipeline
// ============================================================================

/// Minimum spacing between admitted pipeline runs (milliseconds).
pub const COOLDOWN_MS: u64 = 5_000;

/// Minimum detection quality for a face to be used.
pub const CONFIDENCE_THRESHOLD: f32 = 0.6;

/// Expected descriptor length produced by the extractor.
pub const DESCRIPTOR_LEN: usize = 128;

/// Tag written to audit rows and door commands.
pub const SOURCE_TAG: &str = "opendoor_gateway";

/// Upper bound for any single external call (seconds).
pub const CALL_TIMEOUT_SECS: u64 = 10;

// ============================================================================
// Extractor
// ============================================================================

/// Delay between readiness probes while the extractor warms up (seconds).
pub const EXTRACTOR_INIT_RETRY_SECS: u64 = 5;

// ============================================================================
// Authorization / Audit
// ============================================================================

/// Edge function path of the face validation endpoint.
pub const AUTHORIZATION_FUNCTION_PATH: &str = "/functions/v1/validate-user-face";

/// Table the audit rows are appended to.
pub const AUDIT_TABLE: &str = "logs";

// ============================================================================
// MQTT
// ============================================================================

pub const MQTT_PORT: u16 = 1883;

pub const MQTT_TOPIC: &str = "door/relay";

pub const MQTT_CLIENT_ID: &str = "opendoor-gateway";

pub const MQTT_KEEP_ALIVE_SECS: u64 = 60;

/// Pause before the event loop is polled again after a connection error.
pub const MQTT_RECONNECT_SECS: u64 = 5;

/// Capacity of the client → event loop request channel.
pub const MQTT_CHANNEL_CAPACITY: usize = 16;

// ============================================================================
// Video
// ============================================================================

/// How often the staging file is polled (milliseconds).
pub const VIDEO_POLL_INTERVAL_MS: u64 = 5_000;

pub const VIDEO_STAGING_DIR: &str = "./temp";

pub const VIDEO_FRAME_FILE: &str = "frame.jpg";

pub const VIDEO_DECODER_BIN: &str = "ffmpeg";

/// Decoder output rate, as an ffmpeg `fps` filter expression. One frame
/// every five seconds.
pub const VIDEO_DECODER_FPS: &str = "1/5";

/// How long the decoder must stay alive after spawn to count as started.
pub const VIDEO_STARTUP_GRACE_MS: u64 = 1_000;
