//! HTTP handlers, grouped by surface.

pub mod agents;
pub mod events;
pub mod hooks;
pub mod status;
pub mod tools;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::errors::ServerError;

/// Decode tool arguments. `null` is treated as an empty object.
pub(crate) fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, ServerError> {
    let args = if args.is_null() { Value::Object(serde_json::Map::new()) } else { args };
    serde_json::from_value(args).map_err(|e| ServerError::BadRequest(e.to_string()))
}
