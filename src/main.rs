//! OpenDoor - facility access gateway
//!
//! Face-based door control over live video and direct uploads.
//!
//! # Usage
//!
//! ```bash
//! # Defaults, or ./opendoor.toml if present
//! cargo run --release
//!
//! # Explicit config, no live video
//! ./opendoor --config /etc/opendoor/gate-1.toml --no-video
//! ```
//!
//! # Environment Variables
//!
//! - `OPENDOOR_CONFIG`: Path to the TOML config
//! - `PORT`, `ZONE_ID`, `RTSP_URL`, `EXTRACTOR_URL`: deployment overrides
//! - `SUPABASE_URL`, `SUPABASE_ANON_KEY`: authorization + audit backend
//! - `MQTT_BROKER_URL`, `MQTT_USERNAME`, `MQTT_PASSWORD`, `MQTT_TOPIC`: door channel
//! - `FACE_DETECTION_CONFIDENCE`, `PROCESSING_COOLDOWN_MS`: pipeline tuning
//! - `APP_ENV`: set to `production` to skip reading `.env`
//! - `RUST_LOG`: Logging level (default: info)
//! - `LOG_FORMAT`: set to `json` for structured log lines

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use opendoor::actuator::{Actuator, DoorChannel, MqttDoorChannel, MqttDriver};
use opendoor::api::{create_app, GatewayState};
use opendoor::audit::{AuditRecorder, AuditSink, SupabaseAuditSink};
use opendoor::authorization::{AuthorizationClient, Authorizer, UnconfiguredAuthorizer};
use opendoor::config::GatewayConfig;
use opendoor::extractor::{install_when_ready, HttpFaceDetector, IdentityExtractor};
use opendoor::pipeline::{CooldownGate, DecoderFrameSource, FrameLoop, FrameSource, Pipeline};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "opendoor")]
#[command(about = "OpenDoor facility access gateway")]
#[command(version)]
struct CliArgs {
    /// Path to the gateway config (TOML)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the server address (default: "0.0.0.0:3001")
    #[arg(short, long)]
    addr: Option<String>,

    /// Override the video stream locator
    #[arg(long, value_name = "URL")]
    rtsp_url: Option<String>,

    /// Accept direct uploads only, even if a stream is configured
    #[arg(long)]
    no_video: bool,
}

// ============================================================================
// Task Names for Supervisor Logging
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum TaskName {
    HttpServer,
    FrameLoop,
    ExtractorInit,
    MqttDriver,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::HttpServer => write!(f, "HttpServer"),
            TaskName::FrameLoop => write!(f, "FrameLoop"),
            TaskName::ExtractorInit => write!(f, "ExtractorInit"),
            TaskName::MqttDriver => write!(f, "MqttDriver"),
        }
    }
}

// ============================================================================
// Collaborator Wiring
// ============================================================================

/// Pipeline plus the background pieces that still need a task.
struct Gateway {
    pipeline: Arc<Pipeline>,
    detector: Option<Arc<HttpFaceDetector>>,
    mqtt_driver: Option<MqttDriver>,
}

fn build_gateway(config: &GatewayConfig) -> Result<Gateway> {
    let p = &config.pipeline;
    let call_timeout = p.call_timeout();

    let extractor = Arc::new(IdentityExtractor::new(
        p.confidence_threshold,
        p.descriptor_len,
        config.extractor.timeout(),
    ));
    let detector = match HttpFaceDetector::from_config(&config.extractor)
        .context("Failed to build extractor HTTP client")?
    {
        Some(detector) => {
            info!(
                url = %detector.base_url(),
                timeout = ?detector.timeout(),
                "Face extractor: HTTP sidecar (loading in background)"
            );
            Some(Arc::new(detector))
        }
        None => {
            warn!("⚠️  No extractor configured - every frame will report capability unavailable");
            None
        }
    };

    let (authorizer, audit_sink): (Arc<dyn Authorizer>, Option<Arc<dyn AuditSink>>) =
        match config.supabase.credentials() {
            Some((url, key)) => {
                let client = AuthorizationClient::new(
                    url,
                    &config.authorization.function_path,
                    key,
                    call_timeout,
                )
                .context("Failed to build authorization HTTP client")?;
                let sink = SupabaseAuditSink::new(url, &config.audit.table, key, call_timeout)
                    .context("Failed to build audit HTTP client")?;
                info!(endpoint = %client.endpoint(), "Authorization: remote validation");
                info!(endpoint = %sink.endpoint(), "Audit: append-only table");
                (Arc::new(client), Some(Arc::new(sink)))
            }
            None => {
                warn!("⚠️  Supabase not configured - decisions will be no_capability and not audited");
                (Arc::new(UnconfiguredAuthorizer), None)
            }
        };

    let (door, mqtt_driver): (Option<Arc<dyn DoorChannel>>, Option<MqttDriver>) =
        if config.mqtt.broker_url.is_some() {
            let (channel, driver) =
                MqttDoorChannel::connect(&config.mqtt).context("Failed to configure MQTT")?;
            (Some(Arc::new(channel)), Some(driver))
        } else {
            warn!("⚠️  MQTT not configured - granted decisions will not open the door");
            (None, None)
        };

    let pipeline = Pipeline::new(
        CooldownGate::new(p.cooldown()),
        extractor,
        authorizer,
        config.zone.id.clone(),
        call_timeout,
    )
    .with_audit(AuditRecorder::new(
        audit_sink,
        config.zone.id.clone(),
        p.source_tag.clone(),
        call_timeout,
    ))
    .with_actuator(Actuator::new(door, p.source_tag.clone(), call_timeout));

    Ok(Gateway {
        pipeline: Arc::new(pipeline),
        detector,
        mqtt_driver,
    })
}

// ============================================================================
// Task Spawning
// ============================================================================

/// Spawn the HTTP server task into the JoinSet.
fn spawn_http_server(
    task_set: &mut JoinSet<Result<TaskName>>,
    listener: tokio::net::TcpListener,
    app: axum::Router,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[HttpServer] Task starting");

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                info!("[HttpServer] Received shutdown signal");
            })
            .await;

        match result {
            Ok(()) => {
                info!("[HttpServer] Graceful shutdown complete");
                Ok(TaskName::HttpServer)
            }
            Err(e) => {
                error!("[HttpServer] Server error: {}", e);
                Err(anyhow::anyhow!("HTTP server error: {}", e))
            }
        }
    });
}

/// Start the decoder and spawn the frame loop. A decoder that fails to start
/// is logged and the gateway carries on with uploads only.
async fn spawn_frame_loop(
    task_set: &mut JoinSet<Result<TaskName>>,
    pipeline: Arc<Pipeline>,
    stream_url: String,
    config: &GatewayConfig,
    active: Arc<AtomicBool>,
    cancel_token: CancellationToken,
) {
    let mut source = DecoderFrameSource::new(stream_url, config.video.clone());
    if let Err(e) = source.start().await {
        error!("❌ Live video unavailable: {} (direct uploads still accepted)", e);
        source.shutdown().await;
        return;
    }

    let frame_loop = FrameLoop::new(pipeline, config.video.poll_interval(), cancel_token)
        .with_active_flag(active);
    task_set.spawn(async move {
        info!("[FrameLoop] Task starting");
        frame_loop.run(&mut source).await;
        Ok(TaskName::FrameLoop)
    });
}

/// Run the supervisor loop: monitor tasks, cancel on failure.
async fn run_supervisor(
    task_set: &mut JoinSet<Result<TaskName>>,
    cancel_token: CancellationToken,
) -> Result<()> {
    info!("🔒 Supervisor: All tasks spawned, monitoring...");

    loop {
        let result = tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("🛑 Supervisor: Shutdown signal received, draining tasks");
                break;
            }
            result = task_set.join_next() => result,
        };

        match result {
            Some(Ok(Ok(task_name))) => {
                info!("🔒 Supervisor: Task {} completed normally", task_name);
            }
            Some(Ok(Err(e))) => {
                error!("🔒 Supervisor: Task failed with error: {}", e);
                cancel_token.cancel();
                return Err(e);
            }
            Some(Err(e)) => {
                error!("🔒 Supervisor: Task panicked: {}", e);
                cancel_token.cancel();
                return Err(anyhow::anyhow!("Task panicked: {}", e));
            }
            None => {
                info!("🔒 Supervisor: All tasks completed");
                return Ok(());
            }
        }
    }

    // Let cancelled tasks finish their own cleanup (decoder, staging dir).
    while let Some(result) = task_set.join_next().await {
        match result {
            Ok(Ok(task_name)) => info!("🔒 Supervisor: Task {} stopped", task_name),
            Ok(Err(e)) => warn!("🔒 Supervisor: Task ended with error during shutdown: {}", e),
            Err(e) => warn!("🔒 Supervisor: Task panicked during shutdown: {}", e),
        }
    }
    Ok(())
}

/// Cancel `token` on Ctrl+C or SIGTERM.
fn spawn_shutdown_listener(token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => info!("🛑 Received Ctrl+C, initiating shutdown..."),
                        _ = sigterm.recv() => info!("🛑 Received SIGTERM, initiating shutdown..."),
                    }
                }
                Err(e) => {
                    warn!("Could not install SIGTERM handler: {}", e);
                    tokio::signal::ctrl_c().await.ok();
                    info!("🛑 Received Ctrl+C, initiating shutdown...");
                }
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await.ok();
            info!("🛑 Received Ctrl+C, initiating shutdown...");
        }
        token.cancel();
    });
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::var("APP_ENV").map_or(true, |v| v != "production") {
        let _ = dotenvy::dotenv();
    }

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if std::env::var("LOG_FORMAT").is_ok_and(|v| v == "json") {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }

    let args = CliArgs::parse();

    let mut config = GatewayConfig::load(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        config.server.addr = addr;
    }
    if let Some(url) = args.rtsp_url {
        config.video.rtsp_url = Some(url);
    }

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  OpenDoor - Facility Access Gateway");
    info!(
        "  Zone: {} | Cooldown: {}ms | Threshold: {:.2}",
        if config.zone.id.is_empty() { "unset" } else { &config.zone.id },
        config.pipeline.cooldown_ms,
        config.pipeline.confidence_threshold
    );
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let cancel_token = CancellationToken::new();
    spawn_shutdown_listener(cancel_token.clone());

    let gateway = build_gateway(&config)?;
    let pipeline = Arc::clone(&gateway.pipeline);

    let stream_url = config.video.rtsp_url.clone().filter(|_| !args.no_video);
    let video_active = Arc::new(AtomicBool::new(false));
    let state = GatewayState::new(Arc::clone(&pipeline), config.server.max_upload_bytes)
        .with_video(stream_url.is_some(), Arc::clone(&video_active))
        .with_config_summary(config.redacted_summary());

    let listener = tokio::net::TcpListener::bind(&config.server.addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.addr))?;
    info!("🌐 HTTP API listening on http://{}", config.server.addr);

    info!("🔒 Supervisor: Initializing task monitoring");
    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();

    // Task 1: HTTP Server (up before any capability is ready)
    spawn_http_server(&mut task_set, listener, create_app(state), cancel_token.clone());

    // Task 2: Extractor readiness
    if let Some(detector) = gateway.detector {
        let extractor = Arc::clone(pipeline.extractor());
        let retry = std::time::Duration::from_secs(config.extractor.init_retry_secs);
        let token = cancel_token.clone();
        task_set.spawn(async move {
            install_when_ready(extractor, detector, retry, token).await;
            Ok(TaskName::ExtractorInit)
        });
    }

    // Task 3: MQTT event loop
    if let Some(driver) = gateway.mqtt_driver {
        let token = cancel_token.clone();
        task_set.spawn(async move {
            driver.run(token).await;
            Ok(TaskName::MqttDriver)
        });
    }

    // Task 4: Live video
    match stream_url {
        Some(url) => {
            spawn_frame_loop(
                &mut task_set,
                Arc::clone(&pipeline),
                url,
                &config,
                video_active,
                cancel_token.clone(),
            )
            .await;
        }
        None => info!("📥 Input: direct uploads only (no video stream configured)"),
    }

    let result = run_supervisor(&mut task_set, cancel_token).await;
    info!("{}", pipeline.stats());
    result
}
