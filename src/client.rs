//! `TraceabilityClient` - the handle views hold.
//!
//! One client per process. Cloning is cheap and every clone shares the same
//! transport session, so the subscription registry and the connection are
//! shared by every view that holds a clone.
//!
//! ## Example
//!
//! ```
//! use traceability_bus::bus::InMemoryBroker;
//! use traceability_bus::model::Part;
//! use traceability_bus::topics::Route;
//! use traceability_bus::{ClientConfig, TraceabilityClient};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = InMemoryBroker::new();
//! let client = TraceabilityClient::new(ClientConfig::default(), broker)?;
//!
//! client.subscribe_rows::<Part, _>(Route::PartList, |parts| {
//!     println!("{} parts", parts.len());
//! });
//!
//! client.connect().await?;
//! client.list_parts()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::sync::watch;

use crate::bus::Connector;
use crate::config::ClientConfig;
use crate::error::{ClientError, ConfigError};
use crate::registry::{DispatchStats, Handler};
use crate::results::typed_handler;
use crate::session::{SessionState, TransportSession};
use crate::topics::Route;

#[derive(Clone)]
pub struct TraceabilityClient {
    session: Arc<TransportSession>,
}

impl TraceabilityClient {
    /// Create a client that reaches the broker through `connector`.
    /// Does not connect.
    pub fn new<C: Connector>(config: ClientConfig, connector: C) -> Result<Self, ConfigError> {
        Self::with_connector(config, Arc::new(connector))
    }

    pub fn with_connector(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            session: TransportSession::new(config, connector)?,
        })
    }

    /// Wrap an existing session.
    pub fn from_session(session: Arc<TransportSession>) -> Self {
        Self { session }
    }

    /// Client over rumqttc.
    #[cfg(feature = "mqtt")]
    pub fn mqtt(config: ClientConfig) -> Result<Self, ConfigError> {
        Self::new(config, crate::bus::MqttConnector::new())
    }

    pub fn session(&self) -> &Arc<TransportSession> {
        &self.session
    }

    pub fn config(&self) -> &ClientConfig {
        self.session.config()
    }

    pub async fn connect(&self) -> Result<(), ClientError> {
        self.session.connect().await
    }

    pub fn disconnect(&self) {
        self.session.disconnect()
    }

    pub async fn force_reconnect(&self) -> Result<(), ClientError> {
        self.session.force_reconnect().await
    }

    pub fn is_ready(&self) -> bool {
        self.session.is_ready()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.session.state_changes()
    }

    pub fn dispatch_stats(&self) -> DispatchStats {
        self.session.dispatch_stats()
    }

    /// Register `handler` for a raw topic. Keep the handler if you intend to
    /// unsubscribe it later.
    pub fn subscribe(&self, topic: &str, handler: Handler) {
        self.session.subscribe(topic, handler)
    }

    pub fn unsubscribe(&self, topic: &str, handler: &Handler) -> bool {
        self.session.unsubscribe(topic, handler)
    }

    /// Register a typed callback on a route's result topic. Rows are
    /// normalized (a bare object becomes one row) and decoded as `T`.
    ///
    /// Returns the registered handler, or `None` when the route has no
    /// result topic.
    pub fn subscribe_rows<T, F>(&self, route: Route, f: F) -> Option<Handler>
    where
        T: DeserializeOwned + 'static,
        F: Fn(Vec<T>) + Send + Sync + 'static,
    {
        let topic = route.result_topic()?;
        let handler = typed_handler(f);
        self.session.subscribe(topic, Arc::clone(&handler));
        Some(handler)
    }
}

impl std::fmt::Debug for TraceabilityClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceabilityClient")
            .field("broker", &self.session.config().broker)
            .field("state", &self.session.state())
            .finish()
    }
}
