//! Door Actuator - publish "open" on a granted decision, over MQTT
//!
//! ```text
//! Actuator::actuate(decision)
//!     granted? ── no ──► NotAttempted
//!        │
//!        ▼
//! DoorChannel::publish_open ──► AsyncClient ──► [request channel] ──► MqttDriver (EventLoop::poll)
//! ```
//!
//! The event loop is owned by [`MqttDriver`], which runs as its own
//! supervised task and keeps the connection flag current. A publish is
//! attempted once; failures are reported to the pipeline and logged.

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{defaults, MqttConfig};
use crate::types::{AuthorizationDecision, OpenCommand, SideEffect};

#[derive(Debug, thiserror::Error)]
pub enum ActuatorError {
    #[error("MQTT broker not connected")]
    NotConnected,
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("Payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid MQTT broker address: {0}")]
    InvalidBroker(String),
    #[error("Publish timed out after {0:?}")]
    Timeout(Duration),
}

/// Transport for door commands.
#[async_trait]
pub trait DoorChannel: Send + Sync + 'static {
    async fn publish_open(&self, command: &OpenCommand) -> Result<(), ActuatorError>;

    fn is_connected(&self) -> bool;

    fn name(&self) -> &str;
}

// ============================================================================
// MQTT Channel
// ============================================================================

pub struct MqttDoorChannel {
    client: AsyncClient,
    topic: String,
    connected: Arc<AtomicBool>,
}

impl MqttDoorChannel {
    /// Build the client and the driver that owns its event loop.
    ///
    /// Nothing touches the network until the driver is run.
    pub fn connect(config: &MqttConfig) -> Result<(Self, MqttDriver), ActuatorError> {
        let (host, port) = config.endpoint().ok_or_else(|| {
            ActuatorError::InvalidBroker(config.broker_url.clone().unwrap_or_default())
        })?;

        let mut options = MqttOptions::new(config.client_id.clone(), host.clone(), port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            options.set_credentials(user.clone(), pass.clone());
        }

        let (client, eventloop) = AsyncClient::new(options, defaults::MQTT_CHANNEL_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));

        info!(broker = %format!("{host}:{port}"), topic = %config.topic, "MQTT door channel configured");

        let channel = Self {
            client,
            topic: config.topic.clone(),
            connected: Arc::clone(&connected),
        };
        let driver = MqttDriver {
            eventloop,
            connected,
            reconnect: Duration::from_secs(config.reconnect_secs),
            broker: format!("{host}:{port}"),
        };
        Ok((channel, driver))
    }
}

#[async_trait]
impl DoorChannel for MqttDoorChannel {
    async fn publish_open(&self, command: &OpenCommand) -> Result<(), ActuatorError> {
        // A queued "open" delivered after a reconnect could open the door
        // minutes late, so refuse while the broker is down.
        if !self.is_connected() {
            return Err(ActuatorError::NotConnected);
        }
        let payload = serde_json::to_vec(command)?;
        self.client
            .publish(self.topic.as_str(), QoS::AtLeastOnce, false, payload)
            .await?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn name(&self) -> &str {
        "mqtt"
    }
}

/// Drives the MQTT event loop: connects, keeps alive, reconnects.
pub struct MqttDriver {
    eventloop: EventLoop,
    connected: Arc<AtomicBool>,
    reconnect: Duration,
    broker: String,
}

impl MqttDriver {
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(broker = %self.broker, "[MqttDriver] Starting event loop");
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[MqttDriver] Shutdown signal received");
                    break;
                }
                event = self.eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    self.connected.store(true, Ordering::Relaxed);
                    info!(broker = %self.broker, "✓ MQTT connected");
                }
                Ok(Event::Incoming(Packet::PubAck(ack))) => {
                    debug!(pkid = ack.pkid, "[MqttDriver] Publish acknowledged");
                }
                Ok(Event::Incoming(Packet::Disconnect) | Event::Outgoing(Outgoing::Disconnect)) => {
                    self.connected.store(false, Ordering::Relaxed);
                    warn!("[MqttDriver] Disconnected from broker");
                }
                Ok(_) => {}
                Err(e) => {
                    if self.connected.swap(false, Ordering::Relaxed) {
                        warn!("[MqttDriver] Connection lost: {}", e);
                    } else {
                        debug!("[MqttDriver] Connection attempt failed: {}", e);
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.reconnect) => {}
                    }
                }
            }
        }
        self.connected.store(false, Ordering::Relaxed);
    }
}

// ============================================================================
// Actuator
// ============================================================================

/// Fire-and-forget wrapper the pipeline talks to.
pub struct Actuator {
    channel: Option<Arc<dyn DoorChannel>>,
    source_tag: String,
    timeout: Duration,
}

impl Actuator {
    pub fn new(
        channel: Option<Arc<dyn DoorChannel>>,
        source_tag: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            channel,
            source_tag: source_tag.into(),
            timeout,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.channel.is_some()
    }

    /// Connection state of the channel; false when unconfigured.
    pub fn is_connected(&self) -> bool {
        self.channel.as_ref().is_some_and(|c| c.is_connected())
    }

    /// Publish one "open" if and only if `decision` grants access.
    pub async fn actuate(&self, decision: &AuthorizationDecision) -> SideEffect {
        if !decision.granted {
            return SideEffect::NotAttempted;
        }
        let Some(channel) = self.channel.as_ref() else {
            warn!("[Actuator] Access granted but no door channel configured");
            return SideEffect::Skipped("door channel not configured".to_string());
        };

        let user = decision
            .subject_name()
            .or_else(|| decision.subject_id())
            .unwrap_or("unknown");
        let command = OpenCommand::open_for(user, &self.source_tag);

        let result = match tokio::time::timeout(self.timeout, channel.publish_open(&command)).await {
            Ok(result) => result,
            Err(_) => Err(ActuatorError::Timeout(self.timeout)),
        };

        match result {
            Ok(()) => {
                info!(user = %command.user, channel = channel.name(), "🔓 Door open command sent");
                SideEffect::Done
            }
            Err(e) => {
                warn!(user = %command.user, channel = channel.name(), "[Actuator] Publish failed: {}", e);
                SideEffect::Failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Subject;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingChannel {
        sent: Mutex<Vec<OpenCommand>>,
    }

    #[async_trait]
    impl DoorChannel for RecordingChannel {
        async fn publish_open(&self, command: &OpenCommand) -> Result<(), ActuatorError> {
            self.sent.lock().unwrap().push(command.clone());
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    fn subject(name: Option<&str>) -> Subject {
        Subject {
            id: "u-9".to_string(),
            name: name.map(str::to_string),
            kind: None,
        }
    }

    #[tokio::test]
    async fn test_granted_publishes_open_with_name() {
        let channel = Arc::new(RecordingChannel::default());
        let actuator = Actuator::new(Some(channel.clone()), "gate-1", Duration::from_secs(1));

        let decision = AuthorizationDecision::granted(subject(Some("Jane Doe")), None, None);
        assert_eq!(actuator.actuate(&decision).await, SideEffect::Done);

        let sent = channel.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].action, "open");
        assert_eq!(sent[0].user, "Jane Doe");
        assert_eq!(sent[0].source, "gate-1");
    }

    #[tokio::test]
    async fn test_nameless_subject_falls_back_to_id() {
        let channel = Arc::new(RecordingChannel::default());
        let actuator = Actuator::new(Some(channel.clone()), "gate-1", Duration::from_secs(1));

        let decision = AuthorizationDecision::granted(subject(None), None, None);
        actuator.actuate(&decision).await;
        assert_eq!(channel.sent.lock().unwrap()[0].user, "u-9");
    }

    #[tokio::test]
    async fn test_refusals_never_publish() {
        let channel = Arc::new(RecordingChannel::default());
        let actuator = Actuator::new(Some(channel.clone()), "gate-1", Duration::from_secs(1));

        for decision in [
            AuthorizationDecision::denied(subject(Some("Sam")), None, None),
            AuthorizationDecision::unknown_subject(None),
            AuthorizationDecision::service_unreachable("down"),
            AuthorizationDecision::no_capability(),
        ] {
            assert_eq!(actuator.actuate(&decision).await, SideEffect::NotAttempted);
        }
        assert!(channel.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unconfigured_channel_is_skipped() {
        let actuator = Actuator::new(None, "gate-1", Duration::from_secs(1));
        let decision = AuthorizationDecision::granted(subject(Some("Jane")), None, None);
        assert!(matches!(actuator.actuate(&decision).await, SideEffect::Skipped(_)));
        assert!(!actuator.is_connected());
    }

    #[tokio::test]
    async fn test_mqtt_channel_refuses_while_disconnected() {
        let config = MqttConfig {
            broker_url: Some("mqtt://127.0.0.1:1883".to_string()),
            ..MqttConfig::default()
        };
        let (channel, _driver) = MqttDoorChannel::connect(&config).unwrap();
        assert!(!channel.is_connected());
        let err = channel
            .publish_open(&OpenCommand::open_for("Jane", "gate"))
            .await
            .unwrap_err();
        assert!(matches!(err, ActuatorError::NotConnected));
    }

    #[test]
    fn test_invalid_broker_rejected() {
        let config = MqttConfig {
            broker_url: Some("mqtt://host:port".to_string()),
            ..MqttConfig::default()
        };
        assert!(matches!(
            MqttDoorChannel::connect(&config),
            Err(ActuatorError::InvalidBroker(_))
        ));
    }
}
