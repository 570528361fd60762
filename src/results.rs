//! Normalization of result payloads.
//!
//! The service answers list endpoints with an array and some endpoints (stats)
//! with a bare object, sometimes wrapped in a one-element array. Consumers see
//! a sequence either way.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use crate::error::BoxError;
use crate::registry::Handler;

/// Normalize a decoded result payload to a sequence of rows.
///
/// Arrays yield their elements, objects yield themselves, `null` yields
/// nothing. Any other scalar is unexpected and yields nothing.
pub fn normalize(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::Object(_) => vec![value.clone()],
        Value::Null => Vec::new(),
        other => {
            warn!(payload = %other, "unexpected scalar result payload");
            Vec::new()
        }
    }
}

/// Normalize and decode every row as `T`.
pub fn rows<T: DeserializeOwned>(value: &Value) -> Result<Vec<T>, serde_json::Error> {
    normalize(value)
        .into_iter()
        .map(serde_json::from_value)
        .collect()
}

/// Wrap a typed callback as a registry handler.
///
/// The payload is normalized and decoded into `Vec<T>` before `f` runs; a
/// decode failure is reported as a handler failure.
pub fn typed_handler<T, F>(f: F) -> Handler
where
    T: DeserializeOwned + 'static,
    F: Fn(Vec<T>) + Send + Sync + 'static,
{
    Arc::new(move |value: &Value| -> Result<(), BoxError> {
        let decoded = rows::<T>(value)?;
        f(decoded);
        Ok(())
    })
}
