//! Message contracts and type identifiers.
//!
//! Every payload that travels over the bus implements [`Message`]. The trait
//! gives each type a stable URN (`urn:message:{namespace}:{name}`) that the
//! dispatch engine uses as its routing key, so no runtime type inspection is
//! needed when a frame arrives.
//!
//! ## Example
//!
//! ```ignore
//! use serde::{Deserialize, Serialize};
//! use sourced_bus::Message;
//!
//! #[derive(Serialize, Deserialize, Message)]
//! #[message(namespace = "Orders.Contracts")]
//! struct SubmitOrder {
//!     order_id: String,
//! }
//!
//! assert_eq!(SubmitOrder::message_urn(), "urn:message:Orders.Contracts:SubmitOrder");
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::context::Headers;
use crate::serialization::SerializationError;

/// URN prefix shared by every message type identifier.
pub const URN_PREFIX: &str = "urn:message:";

/// Namespace used by message types defined in this crate.
pub const BUS_NAMESPACE: &str = "SourcedBus";

/// A payload type that can be published, sent and consumed.
///
/// Usually implemented with `#[derive(Message)]`. Manual implementations
/// need only `message_name` and `message_namespace`.
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Short type name, e.g. `SubmitOrder`.
    fn message_name() -> String;

    /// Namespace the type belongs to, e.g. `Orders.Contracts`.
    fn message_namespace() -> String;

    /// Primary type identifier.
    fn message_urn() -> String {
        urn(&Self::message_namespace(), &Self::message_name())
    }

    /// All identifiers this message satisfies, most-derived first.
    fn message_types() -> Vec<String> {
        vec![Self::message_urn()]
    }

    /// Explicit exchange/topic name, bypassing the naming formatter.
    fn entity_name() -> Option<String> {
        None
    }
}

/// Build a message URN from a namespace and a type name.
pub fn urn(namespace: &str, name: &str) -> String {
    format!("{URN_PREFIX}{namespace}:{name}")
}

/// Build the URN of a generic bus type parameterized by `T`,
/// e.g. `urn:message:SourcedBus:Fault[[Orders:SubmitOrder]]`.
pub fn generic_urn<T: Message>(wrapper: &str) -> String {
    urn(
        BUS_NAMESPACE,
        &generic_name::<T>(wrapper),
    )
}

/// Name of a generic bus type parameterized by `T`, e.g. `Fault[[Orders:SubmitOrder]]`.
pub fn generic_name<T: Message>(wrapper: &str) -> String {
    format!(
        "{wrapper}[[{}:{}]]",
        T::message_namespace(),
        T::message_name()
    )
}

/// Key prefix that marks a header inside an initializer object.
pub const HEADER_KEY_PREFIX: &str = "__Header_";

/// A message built from a loosely-typed source, plus any headers it carried.
#[derive(Debug, Clone)]
pub struct Initialized<M> {
    /// The constructed message.
    pub message: M,
    /// Headers lifted from `__Header_*` keys.
    pub headers: Headers,
}

/// Construct a message from a loosely-typed JSON object.
///
/// Fields are copied by name into `M`. Keys prefixed with `__Header_` are
/// not part of the message; they are lifted into the returned header map
/// with the prefix removed. Fields `M` does not declare are ignored unless
/// `M` opts into `#[serde(deny_unknown_fields)]`.
///
/// ```ignore
/// let init = sourced_bus::message::init::<SubmitOrder>(json!({
///     "order_id": "o-1",
///     "__Header_Tenant": "acme",
/// }))?;
/// assert_eq!(init.headers.get("Tenant"), Some("acme"));
/// ```
pub fn init<M: Message>(source: Value) -> Result<Initialized<M>, SerializationError> {
    let object = match source {
        Value::Object(object) => object,
        other => {
            return Err(SerializationError::Initializer(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            )))
        }
    };

    let mut headers = Headers::new();
    let mut fields = Map::with_capacity(object.len());
    for (key, value) in object {
        match key.strip_prefix(HEADER_KEY_PREFIX) {
            Some(name) if !name.is_empty() => {
                headers.set(name, header_value(value));
            }
            _ => {
                fields.insert(key, value);
            }
        }
    }

    let message = serde_json::from_value(Value::Object(fields))
        .map_err(|e| SerializationError::Initializer(e.to_string()))?;
    Ok(Initialized { message, headers })
}

fn header_value(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
