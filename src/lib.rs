//! Message-bus client for the factory traceability dashboard.
//!
//! Views talk to the traceability service over MQTT: commands go out on
//! request topics, results come back on result topics. This crate owns the
//! parts of that exchange that can go wrong:
//!
//! - [`TransportSession`] - one broker connection, ranked endpoint fallback,
//!   readiness
//! - [`SubscriptionRegistry`] - topic → handlers, survives reconnects, isolates
//!   handler failures
//! - [`TraceabilityClient`] - the command facade (`list_parts`,
//!   `record_movement`, ...)
//! - [`ConnectionSupervisor`] - per-view polling loop that reconnects and
//!   reloads data

pub mod bus;
mod client;
mod commands;
pub mod config;
mod error;
pub mod model;
pub mod registry;
pub mod results;
mod session;
pub mod supervisor;
pub mod topics;

pub use client::TraceabilityClient;
pub use commands::DEFAULT_ACTIVITY_PERIOD;
pub use config::{BrokerConfig, ClientConfig};
pub use error::{BoxError, ClientError, ConfigError, DispatchError, TransportError};
pub use registry::{handler, DispatchReport, DispatchStats, Handler, SubscriptionRegistry};
pub use session::{SessionState, TransportSession};
pub use supervisor::{ConnectionSupervisor, SupervisorConfig, SupervisorHandle, SupervisorStats};
pub use topics::Route;
