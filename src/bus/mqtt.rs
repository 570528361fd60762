//! MQTT connector built on `rumqttc`.
//!
//! `mqtt://` (and `tcp://`) endpoints connect over raw TCP. `ws://` endpoints
//! use WebSocket framing and need the `websocket` feature; without it they
//! fail with `TransportError::Unsupported` and the session moves on to the
//! next candidate.
//!
//! rumqttc reconnects by itself whenever its event loop is polled after an
//! error. The driver task stops at the first error instead, so recovery stays
//! with the connection supervisor.

use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, SubscribeFilter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};
use url::Url;

use super::connector::{Connector, Link, LinkHandle, LinkOptions, TransportEvent};
use crate::error::TransportError;

const DEFAULT_MQTT_PORT: u16 = 1883;

/// Opens rumqttc links.
#[derive(Debug, Clone)]
pub struct MqttConnector {
    request_capacity: usize,
}

impl Default for MqttConnector {
    fn default() -> Self {
        Self {
            request_capacity: 64,
        }
    }
}

impl MqttConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound on queued outgoing requests per link. Publishing into a full
    /// queue fails instead of blocking. Each command and each single-topic
    /// subscribe takes one slot; the resubscribe on connect takes one slot
    /// for all topics.
    pub fn with_request_capacity(mut self, capacity: usize) -> Self {
        self.request_capacity = capacity.max(1);
        self
    }
}

impl Connector for MqttConnector {
    fn open(&self, endpoint: &Url, options: &LinkOptions) -> Result<Link, TransportError> {
        let mqtt_options = mqtt_options(endpoint, options)?;
        let (client, eventloop) = AsyncClient::new(mqtt_options, self.request_capacity);
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(drive(eventloop, tx, endpoint.to_string()));
        Ok(Link::new(Box::new(MqttLink { client, task }), rx))
    }
}

fn mqtt_options(endpoint: &Url, options: &LinkOptions) -> Result<MqttOptions, TransportError> {
    // rumqttc panics on a non-zero keep-alive under one second.
    if !options.keep_alive.is_zero() && options.keep_alive < Duration::from_secs(1) {
        return Err(TransportError::InvalidEndpoint {
            url: endpoint.to_string(),
            reason: format!("keep-alive {:?} is below 1s", options.keep_alive),
        });
    }

    let host = endpoint
        .host_str()
        .ok_or_else(|| TransportError::InvalidEndpoint {
            url: endpoint.to_string(),
            reason: "missing host".to_string(),
        })?;

    let mut mqtt_options = match endpoint.scheme() {
        "mqtt" | "tcp" => MqttOptions::new(
            options.client_id.clone(),
            host,
            endpoint.port().unwrap_or(DEFAULT_MQTT_PORT),
        ),
        #[cfg(feature = "websocket")]
        "ws" => {
            // For WebSocket transport rumqttc takes the full URL as the address.
            let mut ws = MqttOptions::new(
                options.client_id.clone(),
                endpoint.as_str(),
                endpoint.port_or_known_default().unwrap_or(80),
            );
            ws.set_transport(rumqttc::Transport::Ws);
            ws
        }
        other => return Err(TransportError::Unsupported(other.to_string())),
    };

    mqtt_options
        .set_keep_alive(options.keep_alive)
        .set_clean_session(options.clean_session);
    Ok(mqtt_options)
}

/// Pump the rumqttc event loop into the link's event channel until the
/// first error or until the receiver goes away.
async fn drive(
    mut eventloop: EventLoop,
    events: mpsc::UnboundedSender<TransportEvent>,
    endpoint: String,
) {
    loop {
        let event = match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => TransportEvent::Connected,
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                TransportEvent::message(publish.topic, publish.payload.to_vec())
            }
            Ok(Event::Incoming(Packet::PingResp))
            | Ok(Event::Incoming(Packet::SubAck(_)))
            | Ok(Event::Incoming(Packet::PubAck(_))) => TransportEvent::Heartbeat,
            Ok(Event::Incoming(Packet::Disconnect)) => {
                let _ = events.send(TransportEvent::Closed);
                break;
            }
            Ok(other) => {
                trace!(endpoint = %endpoint, event = ?other, "mqtt event");
                continue;
            }
            Err(err) => {
                debug!(endpoint = %endpoint, error = %err, "mqtt event loop stopped");
                let _ = events.send(TransportEvent::Error(err.to_string()));
                let _ = events.send(TransportEvent::Closed);
                break;
            }
        };

        if events.send(event).is_err() {
            break;
        }
    }
}

struct MqttLink {
    client: AsyncClient,
    task: JoinHandle<()>,
}

impl LinkHandle for MqttLink {
    fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.client
            .try_subscribe(topic, QoS::AtMostOnce)
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    fn subscribe_many(&self, topics: &[String]) -> Result<(), TransportError> {
        if topics.is_empty() {
            return Ok(());
        }
        let filters = topics
            .iter()
            .map(|topic| SubscribeFilter::new(topic.clone(), QoS::AtMostOnce));
        self.client
            .try_subscribe_many(filters)
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    fn close(&self) {
        let _ = self.client.try_disconnect();
        self.task.abort();
    }
}

impl Drop for MqttLink {
    fn drop(&mut self) {
        self.task.abort();
    }
}
