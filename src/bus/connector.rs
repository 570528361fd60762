//! Transport seam: connectors open links, links carry events.

use std::time::Duration;

use tokio::sync::mpsc;
use url::Url;

use crate::error::TransportError;

/// Something that happened on a link, in the order the link produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The broker accepted the connection (CONNACK).
    Connected,
    /// The broker acknowledged something (ping, subscribe, publish).
    Heartbeat,
    /// A message arrived on a subscribed topic.
    Message { topic: String, payload: Vec<u8> },
    /// A transport error. Not fatal by itself.
    Error(String),
    /// The transport is retrying underneath us.
    Reconnecting,
    /// The transport lost the network.
    Offline,
    /// The link is gone for good.
    Closed,
}

impl TransportEvent {
    pub fn message(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        TransportEvent::Message {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Per-link options handed to the connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOptions {
    pub client_id: String,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub clean_session: bool,
}

/// Operations on an open link. All calls are non-blocking.
pub trait LinkHandle: Send + Sync {
    /// Ask the broker to deliver messages on `topic` to this link.
    fn subscribe(&self, topic: &str) -> Result<(), TransportError>;

    /// Subscribe to every topic in `topics`. Links with a bounded request
    /// queue send one request for the whole batch.
    fn subscribe_many(&self, topics: &[String]) -> Result<(), TransportError> {
        topics.iter().try_for_each(|topic| self.subscribe(topic))
    }

    /// Queue `payload` for publication on `topic`.
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Release the link. Idempotent. No events are produced afterwards.
    fn close(&self);
}

/// A freshly opened link: its handle and its event stream.
pub struct Link {
    pub handle: Box<dyn LinkHandle>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl Link {
    pub fn new(
        handle: Box<dyn LinkHandle>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        Self { handle, events }
    }
}

/// Opens links to broker endpoints.
///
/// Implementations:
/// - `MqttConnector` - rumqttc over TCP or WebSocket
/// - `InMemoryBroker` - for tests and local development
pub trait Connector: Send + Sync + 'static {
    /// Start connecting to `endpoint`. Must be called inside a tokio runtime.
    ///
    /// Returning `Ok` does not mean the broker accepted the connection; wait
    /// for `TransportEvent::Connected` on the link's events.
    fn open(&self, endpoint: &Url, options: &LinkOptions) -> Result<Link, TransportError>;
}
