//! Bus transport - how the session reaches the broker.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 TransportSession (one per client)           │
//! │  - ranked endpoint fallback, readiness, event pump          │
//! └─────────────────────────────────────────────────────────────┘
//!                            │ Connector::open(url)
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Link = LinkHandle + events               │
//! │  LinkHandle: subscribe / publish / close                    │
//! │  events:     Connected, Heartbeat, Message, Error, Closed…  │
//! └─────────────────────────────────────────────────────────────┘
//!          │                                   │
//!          ▼                                   ▼
//! ┌──────────────────────┐          ┌─────────────────────────┐
//! │   InMemoryBroker     │          │     MqttConnector       │
//! │ (tests, local dev)   │          │ (rumqttc, tcp + ws)     │
//! └──────────────────────┘          └─────────────────────────┘
//! ```

mod connector;
mod in_memory_broker;
#[cfg(feature = "mqtt")]
mod mqtt;

pub use connector::{Connector, Link, LinkHandle, LinkOptions, TransportEvent};
pub use in_memory_broker::{EndpointBehavior, InMemoryBroker, PublishedMessage};
#[cfg(feature = "mqtt")]
pub use mqtt::MqttConnector;
