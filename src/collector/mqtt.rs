//! MQTT transport for inbound telemetry and outbound reminders.

use crate::config::BrokerConfig;
use crate::reminder::{ReminderError, ReminderPublisher};
use rumqttc::{AsyncClient, ClientError, Event, EventLoop, MqttOptions, Packet, QoS};
use std::future::Future;
use std::time::Duration;

/// Request queue depth between the client handle and the event loop.
const CLIENT_CAPACITY: usize = 20;

/// Client id of the form `<prefix>-<hostname>-<8 hex>`.
pub fn client_id(prefix: &str) -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "host".to_string());
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}-{host}-{}", &suffix[..8])
}

pub fn mqtt_options(config: &BrokerConfig) -> MqttOptions {
    let mut options = MqttOptions::new(client_id(&config.client_prefix), &config.host, config.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
    options
}

/// Create the client handle and its event loop. Nothing is sent until the
/// loop is polled.
pub fn connect(config: &BrokerConfig) -> (AsyncClient, EventLoop) {
    let options = mqtt_options(config);
    tracing::info!(
        host = %config.host,
        port = config.port,
        client_id = %options.client_id(),
        "connecting to MQTT broker"
    );
    AsyncClient::new(options, CLIENT_CAPACITY)
}

/// Subscribe to the telemetry topic.
pub async fn subscribe_data(client: &AsyncClient, topic: &str) -> Result<(), ClientError> {
    client.subscribe(topic, QoS::AtLeastOnce).await?;
    tracing::info!(topic = %topic, "subscribed");
    Ok(())
}

/// Event-loop notifications the consumer cares about.
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerEvent {
    /// Telemetry payload on the data topic
    Telemetry(Vec<u8>),
    /// Session (re)established
    Connected,
    Disconnected,
    /// Publish on a topic we do not consume
    Ignored(String),
    Other,
}

/// Sort a polled event.
pub fn classify(event: &Event, data_topic: &str) -> BrokerEvent {
    match event {
        Event::Incoming(Packet::Publish(p)) if p.topic == data_topic => BrokerEvent::Telemetry(p.payload.to_vec()),
        Event::Incoming(Packet::Publish(p)) => BrokerEvent::Ignored(p.topic.clone()),
        Event::Incoming(Packet::ConnAck(_)) => BrokerEvent::Connected,
        Event::Incoming(Packet::Disconnect) => BrokerEvent::Disconnected,
        _ => BrokerEvent::Other,
    }
}

/// Publishes reminder messages through the shared client.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

impl MqttPublisher {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }
}

impl ReminderPublisher for MqttPublisher {
    fn publish_text(&self, topic: &str, payload: String) -> impl Future<Output = Result<(), ReminderError>> + Send {
        let client = self.client.clone();
        let topic = topic.to_string();
        async move {
            client
                .publish(topic, QoS::AtLeastOnce, false, payload.into_bytes())
                .await
                .map_err(|e| ReminderError::Publish(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::{ConnAck, ConnectReturnCode, Publish};

    #[test]
    fn test_client_id_shape() {
        let id = client_id("elderband");
        assert!(id.starts_with("elderband-"));
        let suffix = id.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(client_id("elderband"), id);
    }

    #[test]
    fn test_options_from_config() {
        let config = BrokerConfig::default();
        let options = mqtt_options(&config);
        assert_eq!(options.broker_address(), ("localhost".to_string(), 1883));
        assert_eq!(options.keep_alive(), Duration::from_secs(30));
    }

    #[test]
    fn test_classify_events() {
        let data = Event::Incoming(Packet::Publish(Publish::new(
            "elder_band/data",
            QoS::AtLeastOnce,
            br#"{"deviceId":"D1"}"#.to_vec(),
        )));
        assert_eq!(
            classify(&data, "elder_band/data"),
            BrokerEvent::Telemetry(br#"{"deviceId":"D1"}"#.to_vec())
        );

        let other = Event::Incoming(Packet::Publish(Publish::new("elder_band/cmd", QoS::AtMostOnce, b"x".to_vec())));
        assert_eq!(
            classify(&other, "elder_band/data"),
            BrokerEvent::Ignored("elder_band/cmd".to_string())
        );

        let connack = Event::Incoming(Packet::ConnAck(ConnAck::new(ConnectReturnCode::Success, false)));
        assert_eq!(classify(&connack, "elder_band/data"), BrokerEvent::Connected);
    }
}
