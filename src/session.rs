//! Transport session - the single live connection to the broker.
//!
//! The session walks a ranked list of candidate endpoints, keeps at most one
//! link alive, pumps that link's events into the dispatcher, and reports
//! readiness synchronously. It never retries on its own once connected: a
//! close or offline event demotes the state, and the connection supervisor
//! decides when to connect again.
//!
//! ## Connect semantics
//!
//! - A `connect()` while an attempt is already in flight joins that attempt
//!   and resolves with the same result.
//! - A `connect()` while ready resolves immediately.
//! - `disconnect()` cancels an in-flight attempt; joined callers get
//!   `ClientError::ConnectCancelled`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::bus::{Connector, Link, LinkHandle, LinkOptions, TransportEvent};
use crate::config::ClientConfig;
use crate::error::{ClientError, ConfigError, TransportError};
use crate::registry::{DispatchStats, Handler, SubscriptionRegistry};

/// Connection state as seen by the session and by supervisors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

type ConnectFuture = Shared<BoxFuture<'static, Result<(), ClientError>>>;

struct PendingConnect {
    attempt: ConnectFuture,
    abort: AbortHandle,
}

#[derive(Default)]
struct SessionInner {
    state: SessionState,
    /// Bumped by every new attempt and every disconnect. Events and attempt
    /// completions from an older generation are ignored.
    generation: u64,
    link: Option<Arc<dyn LinkHandle>>,
    last_seen: Option<Instant>,
    pending: Option<PendingConnect>,
    pump: Option<JoinHandle<()>>,
}

/// Owns the broker connection. Create one per process and share it.
pub struct TransportSession {
    config: ClientConfig,
    candidates: Vec<Url>,
    connector: Arc<dyn Connector>,
    registry: Arc<SubscriptionRegistry>,
    inner: Mutex<SessionInner>,
    state_tx: watch::Sender<SessionState>,
}

impl TransportSession {
    /// Build a session for `config`, connecting through `connector`.
    pub fn new(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Arc<Self>, ConfigError> {
        let candidates = config.candidate_urls()?;
        Self::with_candidates(config, candidates, connector)
    }

    /// Build a session with an explicit candidate list instead of the one
    /// derived from the broker host and port.
    pub fn with_candidates(
        config: ClientConfig,
        candidates: Vec<Url>,
        connector: Arc<dyn Connector>,
    ) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        Ok(Arc::new(Self {
            config,
            candidates,
            connector,
            registry: Arc::new(SubscriptionRegistry::new()),
            inner: Mutex::new(SessionInner::default()),
            state_tx,
        }))
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn candidates(&self) -> &[Url] {
        &self.candidates
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn dispatch_stats(&self) -> DispatchStats {
        self.registry.stats()
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Watch state transitions (for UI indicators).
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, inner: &mut SessionInner, state: SessionState) {
        if inner.state != state {
            debug!(from = %inner.state, to = %state, "session state");
            inner.state = state;
            self.state_tx.send_replace(state);
        }
    }

    /// True iff connected, holding a link, and the last liveness
    /// acknowledgment is within 1.5 × keep-alive. With keep-alive disabled
    /// the liveness check is skipped. Performs no I/O.
    pub fn is_ready(&self) -> bool {
        self.ready_locked(&self.lock())
    }

    fn ready_locked(&self, inner: &SessionInner) -> bool {
        let live = match self.config.liveness_window() {
            Some(window) => inner.last_seen.is_some_and(|seen| seen.elapsed() <= window),
            None => true,
        };
        inner.state == SessionState::Connected && inner.link.is_some() && live
    }

    /// Connect to the first candidate endpoint that accepts.
    pub async fn connect(self: &Arc<Self>) -> Result<(), ClientError> {
        let attempt = {
            let mut inner = self.lock();
            let in_flight = inner.pending.as_ref().map(|p| p.attempt.clone());
            match in_flight {
                Some(attempt) => {
                    debug!("joining in-flight connect attempt");
                    attempt
                }
                None if self.ready_locked(&inner) => return Ok(()),
                None => self.start_attempt(&mut inner),
            }
        };
        attempt.await
    }

    /// Drop the current link and connect again from the first candidate.
    pub async fn force_reconnect(self: &Arc<Self>) -> Result<(), ClientError> {
        info!("forcing reconnect");
        self.disconnect();
        self.connect().await
    }

    /// Release the link and cancel any in-flight attempt. Idempotent.
    pub fn disconnect(&self) {
        let mut inner = self.lock();
        self.teardown(&mut inner);
        if let Some(pending) = inner.pending.take() {
            pending.abort.abort();
        }
        inner.generation += 1;
        self.set_state(&mut inner, SessionState::Disconnected);
    }

    fn teardown(&self, inner: &mut SessionInner) {
        if let Some(pump) = inner.pump.take() {
            pump.abort();
        }
        if let Some(link) = inner.link.take() {
            link.close();
            info!("released broker link");
        }
        inner.last_seen = None;
    }

    fn start_attempt(self: &Arc<Self>, inner: &mut SessionInner) -> ConnectFuture {
        self.teardown(inner);
        inner.generation += 1;
        let generation = inner.generation;
        self.set_state(inner, SessionState::Connecting);

        let session = Arc::clone(self);
        let task = tokio::spawn(async move { session.run_attempt(generation).await });
        let abort = task.abort_handle();
        let attempt = async move {
            match task.await {
                Ok(result) => result,
                Err(err) => {
                    if err.is_panic() {
                        error!("connect attempt panicked");
                    }
                    Err(ClientError::ConnectCancelled)
                }
            }
        }
        .boxed()
        .shared();

        inner.pending = Some(PendingConnect {
            attempt: attempt.clone(),
            abort,
        });
        attempt
    }

    async fn run_attempt(self: Arc<Self>, generation: u64) -> Result<(), ClientError> {
        let total = self.candidates.len();
        let mut last_error = TransportError::InvalidEndpoint {
            url: String::new(),
            reason: "no candidate endpoints configured".to_string(),
        };

        for (index, endpoint) in self.candidates.iter().enumerate() {
            if index > 0 {
                time::sleep(self.config.candidate_delay).await;
            }
            info!(url = %endpoint, attempt = index + 1, of = total, "connecting to broker");

            match self.open_endpoint(endpoint).await {
                Ok(link) => return self.finish_connect(generation, endpoint, link),
                Err(err) => {
                    warn!(url = %endpoint, error = %err, "broker connection attempt failed");
                    last_error = err;
                }
            }
        }

        let mut inner = self.lock();
        if inner.generation == generation {
            inner.pending = None;
            self.set_state(&mut inner, SessionState::Disconnected);
        }
        warn!(attempts = total, error = %last_error, "all broker endpoints failed");
        Err(ClientError::ConnectFailed {
            attempts: total,
            last: last_error,
        })
    }

    fn link_options(&self) -> LinkOptions {
        LinkOptions {
            client_id: self.config.client_id(),
            keep_alive: self.config.keep_alive,
            connect_timeout: self.config.connect_timeout,
            clean_session: true,
        }
    }

    /// Open one endpoint and wait for CONNACK, an error, or the timeout.
    async fn open_endpoint(&self, endpoint: &Url) -> Result<Link, TransportError> {
        let mut link = self.connector.open(endpoint, &self.link_options())?;
        let timeout = self.config.connect_timeout;

        let outcome = time::timeout(timeout, await_connack(&mut link.events)).await;
        match outcome {
            Ok(Ok(())) => Ok(link),
            Ok(Err(err)) => {
                link.handle.close();
                Err(err)
            }
            Err(_) => {
                link.handle.close();
                Err(TransportError::Timeout(timeout))
            }
        }
    }

    fn finish_connect(
        self: &Arc<Self>,
        generation: u64,
        endpoint: &Url,
        link: Link,
    ) -> Result<(), ClientError> {
        let Link { handle, events } = link;
        let handle: Arc<dyn LinkHandle> = Arc::from(handle);

        let mut inner = self.lock();
        if inner.generation != generation {
            handle.close();
            return Err(ClientError::ConnectCancelled);
        }
        inner.link = Some(Arc::clone(&handle));
        inner.last_seen = Some(Instant::now());
        inner.pending = None;
        inner.pump = Some(tokio::spawn(pump(
            Arc::downgrade(self),
            generation,
            events,
        )));
        self.set_state(&mut inner, SessionState::Connected);
        drop(inner);

        info!(url = %endpoint, "connected to broker");
        self.resubscribe(handle.as_ref());
        Ok(())
    }

    /// Issue broker-side subscriptions for every configured result topic
    /// and every topic in the registry.
    fn resubscribe(&self, link: &dyn LinkHandle) {
        let mut topics = self.config.result_topics.clone();
        topics.extend(self.registry.topics());
        topics.sort();
        topics.dedup();

        if topics.is_empty() {
            return;
        }
        match link.subscribe_many(&topics) {
            Ok(()) => debug!(count = topics.len(), "subscribed"),
            Err(err) => warn!(count = topics.len(), error = %err, "resubscribe failed"),
        }
    }

    /// Apply one link event. Returns `false` once the link is finished or
    /// the event belongs to a superseded link.
    fn handle_event(&self, generation: u64, event: TransportEvent) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation || inner.link.is_none() {
            return false;
        }

        match event {
            TransportEvent::Message { topic, payload } => {
                inner.last_seen = Some(Instant::now());
                drop(inner);
                // Malformed payloads and failing handlers are logged inside.
                let _ = self.registry.dispatch(&topic, &payload);
                true
            }
            TransportEvent::Connected | TransportEvent::Heartbeat => {
                inner.last_seen = Some(Instant::now());
                true
            }
            TransportEvent::Error(reason) => {
                warn!(error = %reason, "transport error");
                true
            }
            TransportEvent::Reconnecting => {
                info!("transport reconnecting");
                self.set_state(&mut inner, SessionState::Disconnected);
                true
            }
            TransportEvent::Offline | TransportEvent::Closed => {
                info!(event = ?event, "broker connection lost");
                if let Some(link) = inner.link.take() {
                    link.close();
                }
                inner.pump = None;
                inner.last_seen = None;
                self.set_state(&mut inner, SessionState::Disconnected);
                false
            }
        }
    }

    /// Register a result handler. A topic new to the registry is also
    /// subscribed at the broker right away when a link is up.
    pub fn subscribe(&self, topic: &str, handler: Handler) {
        if self.registry.subscribe(topic, handler) {
            let link = self.lock().link.clone();
            if let Some(link) = link {
                if let Err(err) = link.subscribe(topic) {
                    warn!(topic, error = %err, "subscribe failed");
                }
            }
        }
    }

    /// Remove the first registration of `handler` on `topic`.
    pub fn unsubscribe(&self, topic: &str, handler: &Handler) -> bool {
        self.registry.unsubscribe(topic, handler)
    }

    /// Publish `payload` as JSON on `topic`. Fails with `NotConnected`
    /// without publishing anything when the session is not ready.
    pub fn publish<T: Serialize + ?Sized>(&self, topic: &str, payload: &T) -> Result<(), ClientError> {
        let link = {
            let inner = self.lock();
            if !self.ready_locked(&inner) {
                return Err(ClientError::NotConnected);
            }
            inner.link.clone().ok_or(ClientError::NotConnected)?
        };

        let bytes = serde_json::to_vec(payload)?;
        link.publish(topic, bytes)
            .map_err(|source| ClientError::Publish {
                topic: topic.to_string(),
                source,
            })?;
        debug!(topic, "published");
        Ok(())
    }

    /// Time since the last liveness acknowledgment, if connected.
    pub fn since_last_seen(&self) -> Option<Duration> {
        self.lock().last_seen.map(|seen| seen.elapsed())
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(pump) = inner.pump.take() {
            pump.abort();
        }
        if let Some(pending) = inner.pending.take() {
            pending.abort.abort();
        }
        if let Some(link) = inner.link.take() {
            link.close();
        }
    }
}

async fn await_connack(
    events: &mut mpsc::UnboundedReceiver<TransportEvent>,
) -> Result<(), TransportError> {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Connected => return Ok(()),
            TransportEvent::Error(reason) => return Err(TransportError::Refused(reason)),
            TransportEvent::Closed | TransportEvent::Offline => {
                return Err(TransportError::Closed)
            }
            _ => {}
        }
    }
    Err(TransportError::Closed)
}

async fn pump(
    session: Weak<TransportSession>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(session) = session.upgrade() else {
            break;
        };
        if !session.handle_event(generation, event) {
            break;
        }
    }
}
