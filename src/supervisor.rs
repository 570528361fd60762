//! Connection supervisor - one polling loop per consuming view.
//!
//! The decision logic lives in [`Monitor`], a pure state machine fed with
//! `(is_ready, now)` on every tick. The loop around it only performs the
//! action the monitor returns.
//!
//! | View state  | Session ready? | Action                                   |
//! |-------------|----------------|------------------------------------------|
//! | not Connected | yes          | → Connected, run the load callback once  |
//! | Connected   | yes            | refresh when `refresh_interval` elapsed  |
//! | not Connecting | no          | → Connecting, `connect()`                |
//! | Connecting  | no             | `connect()` (joins an in-flight attempt) |
//! | Connecting  | no, stuck      | `force_reconnect()`, once per episode    |
//!
//! ## Example
//!
//! ```
//! use traceability_bus::bus::InMemoryBroker;
//! use traceability_bus::{ClientConfig, ConnectionSupervisor, TraceabilityClient};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = TraceabilityClient::new(ClientConfig::default(), InMemoryBroker::new())?;
//!
//! let parts_view = ConnectionSupervisor::new("parts", client.clone())
//!     .on_connected(|client| client.list_parts())
//!     .spawn();
//!
//! // ... later, when the view goes away
//! let stats = parts_view.stop().await;
//! println!("{} connect attempts", stats.connects);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::client::TraceabilityClient;
use crate::error::ClientError;
use crate::session::SessionState;

/// Poll cadence and escalation thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    #[serde(rename = "poll_interval_ms", with = "crate::config::millis")]
    pub poll_interval: Duration,
    /// Time spent Connecting before a forced reconnect.
    #[serde(rename = "stuck_timeout_ms", with = "crate::config::millis")]
    pub stuck_timeout: Duration,
    /// Re-run the load callback this often while connected.
    #[serde(rename = "refresh_interval_ms", with = "crate::config::opt_millis")]
    pub refresh_interval: Option<Duration>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            stuck_timeout: Duration::from_secs(10),
            refresh_interval: None,
        }
    }
}

/// What the loop should do after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    None,
    /// Just became ready: run the initial load.
    LoadInitialData,
    /// Connected long enough for a periodic refresh.
    Refresh,
    Connect,
    ForceReconnect,
}

/// Pure supervisor state machine.
#[derive(Debug, Clone)]
pub struct Monitor {
    config: SupervisorConfig,
    state: SessionState,
    connecting_since: Option<Instant>,
    forced: bool,
    last_load: Option<Instant>,
}

impl Monitor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            state: SessionState::Disconnected,
            connecting_since: None,
            forced: false,
            last_load: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn observe(&mut self, ready: bool, now: Instant) -> Action {
        if ready {
            if self.state != SessionState::Connected {
                self.state = SessionState::Connected;
                self.connecting_since = None;
                self.forced = false;
                self.last_load = Some(now);
                return Action::LoadInitialData;
            }
            return match (self.config.refresh_interval, self.last_load) {
                (Some(every), Some(last)) if now.duration_since(last) >= every => {
                    self.last_load = Some(now);
                    Action::Refresh
                }
                _ => Action::None,
            };
        }

        if self.state != SessionState::Connecting {
            self.state = SessionState::Connecting;
            self.connecting_since = Some(now);
            self.forced = false;
            return Action::Connect;
        }

        let stuck = self
            .connecting_since
            .is_some_and(|since| now.duration_since(since) > self.config.stuck_timeout);
        if stuck && !self.forced {
            self.forced = true;
            Action::ForceReconnect
        } else {
            Action::Connect
        }
    }
}

/// Counters returned when a supervisor stops.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SupervisorStats {
    pub ticks: usize,
    pub connects: usize,
    pub forced_reconnects: usize,
    pub loads: usize,
    pub load_failures: usize,
}

type LoadCallback = Arc<dyn Fn(&TraceabilityClient) -> Result<(), ClientError> + Send + Sync>;

/// Builder for a supervisor loop.
pub struct ConnectionSupervisor {
    name: String,
    client: TraceabilityClient,
    config: SupervisorConfig,
    on_connected: Option<LoadCallback>,
}

impl ConnectionSupervisor {
    /// Supervise `client` on behalf of the view called `name`, using the
    /// client's supervisor settings.
    pub fn new(name: impl Into<String>, client: TraceabilityClient) -> Self {
        let config = client.config().supervisor.clone();
        Self {
            name: name.into(),
            client,
            config,
            on_connected: None,
        }
    }

    pub fn with_config(mut self, config: SupervisorConfig) -> Self {
        self.config = config;
        self
    }

    /// Load callback, run once per transition to ready and on every refresh.
    /// Usually issues one or more list commands.
    pub fn on_connected<F>(mut self, f: F) -> Self
    where
        F: Fn(&TraceabilityClient) -> Result<(), ClientError> + Send + Sync + 'static,
    {
        self.on_connected = Some(Arc::new(f));
        self
    }

    /// Start the loop. Must be called inside a tokio runtime. The first tick
    /// runs immediately.
    pub fn spawn(self) -> SupervisorHandle {
        let (stop_tx, stop_rx) = oneshot::channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
        let name = self.name.clone();
        let task = tokio::spawn(self.run(stop_rx, state_tx));

        SupervisorHandle {
            name,
            stop_tx: Some(stop_tx),
            state: state_rx,
            task: Some(task),
        }
    }

    async fn run(
        self,
        mut stop_rx: oneshot::Receiver<()>,
        state_tx: watch::Sender<SessionState>,
    ) -> SupervisorStats {
        let mut monitor = Monitor::new(self.config.clone());
        let mut stats = SupervisorStats::default();
        let mut work = JoinSet::new();

        let mut ticker = time::interval(self.config.poll_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(view = %self.name, "supervisor started");
        loop {
            tokio::select! {
                _ = &mut stop_rx => break,
                Some(_) = work.join_next(), if !work.is_empty() => continue,
                _ = ticker.tick() => {}
            }

            stats.ticks += 1;
            let action = monitor.observe(self.client.is_ready(), Instant::now());
            state_tx.send_if_modified(|state| {
                let changed = *state != monitor.state();
                *state = monitor.state();
                changed
            });

            match action {
                Action::None => {}
                Action::LoadInitialData | Action::Refresh => {
                    if action == Action::LoadInitialData {
                        info!(view = %self.name, "connected, loading data");
                    }
                    self.load(&mut stats);
                }
                Action::Connect => {
                    stats.connects += 1;
                    let client = self.client.clone();
                    let name = self.name.clone();
                    work.spawn(async move {
                        if let Err(err) = client.connect().await {
                            log_connect_failure(&name, &err);
                        }
                    });
                }
                Action::ForceReconnect => {
                    stats.forced_reconnects += 1;
                    warn!(view = %self.name, "stuck connecting, forcing reconnect");
                    let client = self.client.clone();
                    let name = self.name.clone();
                    work.spawn(async move {
                        if let Err(err) = client.force_reconnect().await {
                            log_connect_failure(&name, &err);
                        }
                    });
                }
            }
        }

        work.abort_all();
        debug!(view = %self.name, ?stats, "supervisor stopped");
        stats
    }

    fn load(&self, stats: &mut SupervisorStats) {
        let Some(callback) = &self.on_connected else {
            return;
        };
        match callback(&self.client) {
            Ok(()) => stats.loads += 1,
            Err(err) => {
                stats.load_failures += 1;
                warn!(view = %self.name, error = %err, "data load failed");
            }
        }
    }
}

fn log_connect_failure(view: &str, err: &ClientError) {
    match err {
        ClientError::ConnectCancelled => debug!(view, "connect attempt cancelled"),
        _ => warn!(view, error = %err, "connect failed"),
    }
}

/// Running supervisor. Dropping it stops the loop and any connect work it
/// spawned.
pub struct SupervisorHandle {
    name: String,
    stop_tx: Option<oneshot::Sender<()>>,
    state: watch::Receiver<SessionState>,
    task: Option<JoinHandle<SupervisorStats>>,
}

impl SupervisorHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The state this supervisor last observed.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Stop the loop and return its counters.
    pub async fn stop(mut self) -> SupervisorStats {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        match self.task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => SupervisorStats::default(),
        }
    }
}

impl Drop for SupervisorHandle {
    fn drop(&mut self) {
        self.stop_tx.take();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
