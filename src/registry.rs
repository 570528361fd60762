//! Subscription registry and dispatcher.
//!
//! Handlers are registered per exact topic and invoked in registration order
//! with the decoded JSON payload. The registry belongs to the client, not to
//! a link, so it survives reconnects.
//!
//! ## Example
//!
//! ```
//! use traceability_bus::registry::{handler, SubscriptionRegistry};
//!
//! let registry = SubscriptionRegistry::new();
//! let on_parts = handler(|rows| {
//!     println!("parts: {}", rows);
//!     Ok(())
//! });
//! registry.subscribe("factory/part/list/result", on_parts.clone());
//!
//! let report = registry.dispatch("factory/part/list/result", br#"[{"part_id":"P1"}]"#).unwrap();
//! assert_eq!(report.invoked, 1);
//!
//! registry.unsubscribe("factory/part/list/result", &on_parts);
//! assert!(registry.topics().is_empty());
//! ```

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{BoxError, DispatchError};

/// A result handler. Identity is the `Arc` pointer, which is what
/// `unsubscribe` matches on.
pub type Handler = Arc<dyn Fn(&Value) -> Result<(), BoxError> + Send + Sync>;

/// Wrap a closure as a `Handler`.
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&Value) -> Result<(), BoxError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Outcome of dispatching one decodable message.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    /// Handlers that were called, including failing ones.
    pub invoked: usize,
    /// Handlers that returned an error or panicked.
    pub failures: Vec<DispatchError>,
}

/// Counters across every dispatch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    /// Messages decoded and offered to handlers.
    pub delivered: u64,
    /// Messages dropped because they were not UTF-8 JSON.
    pub malformed: u64,
    /// Handler invocations that failed.
    pub handler_failures: u64,
}

/// Topic → ordered handlers.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: RwLock<HashMap<String, Vec<Handler>>>,
    delivered: AtomicU64,
    malformed: AtomicU64,
    handler_failures: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `handler` to `topic`. Returns `true` if the topic had no
    /// handlers before. The same handler may be registered more than once.
    pub fn subscribe(&self, topic: &str, handler: Handler) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let handlers = entries.entry(topic.to_string()).or_default();
        handlers.push(handler);
        handlers.len() == 1
    }

    /// Remove the first registration of `handler` on `topic`. Returns
    /// whether anything was removed.
    pub fn unsubscribe(&self, topic: &str, handler: &Handler) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let Some(handlers) = entries.get_mut(topic) else {
            return false;
        };
        let Some(index) = handlers.iter().position(|h| Arc::ptr_eq(h, handler)) else {
            return false;
        };
        handlers.remove(index);
        if handlers.is_empty() {
            entries.remove(topic);
        }
        true
    }

    /// Topics with at least one handler, sorted.
    pub fn topics(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut topics: Vec<String> = entries.keys().cloned().collect();
        topics.sort();
        topics
    }

    pub fn handler_count(&self, topic: &str) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map_or(0, Vec::len)
    }

    /// Handlers for `topic` as of now. Later registry changes do not affect
    /// the returned list.
    pub fn snapshot(&self, topic: &str) -> Vec<Handler> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    /// Decode `payload` and invoke every handler for `topic`.
    ///
    /// Malformed payloads are logged and dropped without calling anything.
    /// Each handler runs isolated: an error or panic is logged and recorded
    /// in the report, and the remaining handlers still run.
    pub fn dispatch(&self, topic: &str, payload: &[u8]) -> Result<DispatchReport, DispatchError> {
        let value = match decode(payload) {
            Ok(value) => value,
            Err(reason) => {
                self.malformed.fetch_add(1, Ordering::Relaxed);
                warn!(topic, reason = %reason, "dropping malformed payload");
                return Err(DispatchError::MalformedPayload {
                    topic: topic.to_string(),
                    reason,
                });
            }
        };
        self.delivered.fetch_add(1, Ordering::Relaxed);

        let handlers = self.snapshot(topic);
        if handlers.is_empty() {
            debug!(topic, "no handlers registered");
        }

        let mut report = DispatchReport::default();
        for (index, handler) in handlers.iter().enumerate() {
            report.invoked += 1;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(&value)));
            let reason = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err.to_string(),
                Err(panic) => panic_message(panic.as_ref()),
            };
            self.handler_failures.fetch_add(1, Ordering::Relaxed);
            warn!(topic, index, reason = %reason, "result handler failed");
            report.failures.push(DispatchError::HandlerFailure {
                topic: topic.to_string(),
                index,
                reason,
            });
        }
        Ok(report)
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
        }
    }
}

fn decode(payload: &[u8]) -> Result<Value, String> {
    let text = std::str::from_utf8(payload).map_err(|e| e.to_string())?;
    serde_json::from_str(text).map_err(|e| e.to_string())
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}
