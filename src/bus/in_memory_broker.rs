//! In-memory broker for testing and single-process scenarios.
//!
//! `InMemoryBroker` implements `Connector`, so a `TransportSession` can run
//! against it exactly as it runs against a real broker. The test side plays
//! the domain service: it inspects what was published and delivers results
//! to subscribed links.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::mpsc;
use url::Url;

use super::connector::{Connector, Link, LinkHandle, LinkOptions, TransportEvent};
use crate::error::TransportError;

/// How the broker answers a connection to a given endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EndpointBehavior {
    /// Send CONNACK immediately.
    #[default]
    Accept,
    /// Fail the attempt with a transport error event.
    Refuse(String),
    /// Never answer: a half-open connection.
    Hang,
}

/// A message some link published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl PublishedMessage {
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.payload).ok()
    }
}

struct LinkSlot {
    id: u64,
    endpoint: String,
    events: mpsc::UnboundedSender<TransportEvent>,
    subscriptions: Vec<String>,
    accepted: bool,
}

#[derive(Default)]
struct BrokerState {
    behaviors: HashMap<String, EndpointBehavior>,
    links: Vec<LinkSlot>,
    published: Vec<PublishedMessage>,
    opened: Vec<String>,
    client_ids: Vec<String>,
    next_id: u64,
}

/// In-memory broker.
///
/// Features:
/// - Cloneable handle over shared state
/// - Per-endpoint behavior (accept, refuse, hang)
/// - Exact-topic fan-out to every open, subscribed link
/// - Records every publish and every endpoint opened
/// - Forgets a link once it is closed, refused or dropped
///
/// ## Example
///
/// ```
/// use traceability_bus::bus::{EndpointBehavior, InMemoryBroker};
///
/// let broker = InMemoryBroker::new();
/// broker.set_behavior("ws://localhost:5000/mqtt", EndpointBehavior::Refuse("no ws".into()));
/// assert!(broker.published().is_empty());
/// ```
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set how connections to `endpoint` are answered. Applies to links
    /// opened afterwards.
    pub fn set_behavior(&self, endpoint: impl AsRef<str>, behavior: EndpointBehavior) {
        self.lock()
            .behaviors
            .insert(normalize_endpoint(endpoint.as_ref()), behavior);
    }

    /// Set the same behavior for every endpoint in `endpoints`.
    pub fn set_behavior_all<I, S>(&self, endpoints: I, behavior: EndpointBehavior)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for endpoint in endpoints {
            self.set_behavior(endpoint, behavior.clone());
        }
    }

    /// Endpoints opened so far, in order.
    pub fn opened_endpoints(&self) -> Vec<String> {
        self.lock().opened.clone()
    }

    /// Client ids of every link opened so far.
    pub fn client_ids(&self) -> Vec<String> {
        self.lock().client_ids.clone()
    }

    /// Number of links that are accepted and not closed.
    pub fn open_links(&self) -> usize {
        self.lock().links.iter().filter(|l| l.accepted).count()
    }

    /// Number of links still held, including ones waiting for CONNACK.
    pub fn live_links(&self) -> usize {
        self.lock().links.len()
    }

    /// Topics subscribed by open links, deduplicated, sorted.
    pub fn subscriptions(&self) -> Vec<String> {
        let state = self.lock();
        let mut topics: Vec<String> = state
            .links
            .iter()
            .flat_map(|l| l.subscriptions.iter().cloned())
            .collect();
        topics.sort();
        topics.dedup();
        topics
    }

    /// Every message published by any link.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.lock().published.clone()
    }

    /// Messages published on exactly `topic`.
    pub fn published_on(&self, topic: &str) -> Vec<PublishedMessage> {
        self.lock()
            .published
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    /// Clear the publish log.
    pub fn clear_published(&self) {
        self.lock().published.clear();
    }

    /// Deliver a raw payload to every open link subscribed to `topic`.
    /// Returns the number of links it was delivered to.
    pub fn deliver(&self, topic: &str, payload: impl Into<Vec<u8>>) -> usize {
        let payload = payload.into();
        let state = self.lock();
        state
            .links
            .iter()
            .filter(|l| l.accepted && l.subscriptions.iter().any(|t| t == topic))
            .filter(|l| {
                l.events
                    .send(TransportEvent::message(topic, payload.clone()))
                    .is_ok()
            })
            .count()
    }

    /// Serialize `value` as JSON and deliver it.
    pub fn deliver_json<T: Serialize>(&self, topic: &str, value: &T) -> usize {
        match serde_json::to_vec(value) {
            Ok(payload) => self.deliver(topic, payload),
            Err(_) => 0,
        }
    }

    /// Send a liveness acknowledgment to every open link.
    pub fn heartbeat(&self) {
        self.broadcast(TransportEvent::Heartbeat);
    }

    /// Send an arbitrary event to every open link.
    pub fn broadcast(&self, event: TransportEvent) {
        let state = self.lock();
        for link in state.links.iter().filter(|l| l.accepted) {
            let _ = link.events.send(event.clone());
        }
    }

    /// Close every open link from the broker side.
    pub fn drop_connections(&self) {
        let mut state = self.lock();
        for link in state.links.drain(..) {
            let _ = link.events.send(TransportEvent::Closed);
        }
    }

    /// Finish a hanging connection to `endpoint` by accepting it.
    pub fn release_hanging(&self, endpoint: &str) -> usize {
        let endpoint = normalize_endpoint(endpoint);
        let mut state = self.lock();
        let mut released = 0;
        for link in state
            .links
            .iter_mut()
            .filter(|l| !l.accepted && l.endpoint == endpoint)
        {
            if link.events.send(TransportEvent::Connected).is_ok() {
                link.accepted = true;
                released += 1;
            }
        }
        released
    }
}

impl Connector for InMemoryBroker {
    fn open(&self, endpoint: &Url, options: &LinkOptions) -> Result<Link, TransportError> {
        let endpoint = normalize_endpoint(endpoint.as_str());
        let (tx, rx) = mpsc::unbounded_channel();

        let mut state = self.lock();
        let behavior = state.behaviors.get(&endpoint).cloned().unwrap_or_default();
        state.opened.push(endpoint.clone());
        state.client_ids.push(options.client_id.clone());
        state.next_id += 1;
        let id = state.next_id;

        let accepted = match &behavior {
            EndpointBehavior::Accept => {
                let _ = tx.send(TransportEvent::Connected);
                Some(true)
            }
            EndpointBehavior::Refuse(reason) => {
                // Not tracked: the error stays buffered for the receiver.
                let _ = tx.send(TransportEvent::Error(reason.clone()));
                None
            }
            EndpointBehavior::Hang => Some(false),
        };

        if let Some(accepted) = accepted {
            state.links.push(LinkSlot {
                id,
                endpoint,
                events: tx,
                subscriptions: Vec::new(),
                accepted,
            });
        }

        Ok(Link::new(
            Box::new(InMemoryLink {
                broker: self.clone(),
                id,
            }),
            rx,
        ))
    }
}

struct InMemoryLink {
    broker: InMemoryBroker,
    id: u64,
}

impl LinkHandle for InMemoryLink {
    fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        let mut state = self.broker.lock();
        let link = state
            .links
            .iter_mut()
            .find(|l| l.id == self.id)
            .ok_or(TransportError::Closed)?;
        if !link.subscriptions.iter().any(|t| t == topic) {
            link.subscriptions.push(topic.to_string());
        }
        let _ = link.events.send(TransportEvent::Heartbeat);
        Ok(())
    }

    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let mut state = self.broker.lock();
        let open = state
            .links
            .iter()
            .any(|l| l.id == self.id && l.accepted);
        if !open {
            return Err(TransportError::Closed);
        }
        state.published.push(PublishedMessage {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }

    fn close(&self) {
        self.broker.lock().links.retain(|l| l.id != self.id);
    }
}

impl Drop for InMemoryLink {
    fn drop(&mut self) {
        self.close();
    }
}

fn normalize_endpoint(raw: &str) -> String {
    Url::parse(raw)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| raw.to_string())
}
