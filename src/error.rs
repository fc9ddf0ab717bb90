//! Error types for the bus runtime.
//!
//! `BusError` is the error every pipeline, transport hand-off and bus
//! operation returns. Consumers return `ConsumeError`, which converts into
//! `BusError::Consumer` when it leaves the consumer-invocation filter.

use std::error::Error;
use std::time::Duration;

use thiserror::Error;

use crate::fault::Fault;
use crate::serialization::SerializationError;
use crate::topology::TopologyError;
use crate::transport::TransportError;

/// Error type for bus, pipeline and dispatch operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BusError {
    /// The inbound frame carried no type, or its first type has no consumer.
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),
    /// The operation is not valid in the bus's current state.
    #[error("invalid bus state: cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },
    /// Invalid or incomplete configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// A dependency could not be resolved from the resolver scope.
    #[error("missing dependency: {0}")]
    MissingDependency(&'static str),
    /// `respond` was called on a message that carries no response address.
    #[error("message {0} has no response address")]
    NoResponseAddress(String),
    /// Encoding or decoding a message failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] SerializationError),
    /// A transport operation failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// A topology registration or override was rejected.
    #[error("topology error: {0}")]
    Topology(#[from] TopologyError),
    /// A consumer failed.
    #[error("consumer error: {0}")]
    Consumer(#[from] ConsumeError),
    /// The operation observed cancellation before completing.
    #[error("operation cancelled")]
    Cancelled,
}

impl BusError {
    /// Stable type name recorded in fault records and error headers.
    pub fn exception_type(&self) -> &'static str {
        match self {
            BusError::Consumer(err) => err.exception_type(),
            BusError::UnknownMessageType(_) => "sourced_bus::BusError::UnknownMessageType",
            BusError::InvalidState { .. } => "sourced_bus::BusError::InvalidState",
            BusError::Configuration(_) => "sourced_bus::BusError::Configuration",
            BusError::MissingDependency(_) => "sourced_bus::BusError::MissingDependency",
            BusError::NoResponseAddress(_) => "sourced_bus::BusError::NoResponseAddress",
            BusError::Serialization(_) => "sourced_bus::BusError::Serialization",
            BusError::Transport(_) => "sourced_bus::BusError::Transport",
            BusError::Topology(_) => "sourced_bus::BusError::Topology",
            BusError::Cancelled => "sourced_bus::BusError::Cancelled",
        }
    }

    /// Whether this error means the frame cannot be routed at all.
    pub fn is_unknown_message_type(&self) -> bool {
        matches!(self, BusError::UnknownMessageType(_))
    }
}

/// Error type returned by consumers and message handlers.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConsumeError {
    /// Business logic rejected the message (validation, invariant violation).
    #[error("rejected: {0}")]
    Rejected(String),
    /// A referenced resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Payload decode failed.
    #[error("decode failed: {0}")]
    DecodeFailed(String),
    /// A bus operation issued by the consumer failed.
    #[error("bus error: {0}")]
    Bus(Box<BusError>),
    /// Any other error, with the concrete error's type name preserved.
    #[error("{source}")]
    Other {
        type_name: &'static str,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

impl ConsumeError {
    /// Wrap an arbitrary error, remembering its concrete type name.
    pub fn other<E>(err: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        ConsumeError::Other {
            type_name: std::any::type_name::<E>(),
            source: Box::new(err),
        }
    }

    /// Stable type name recorded in fault records and error headers.
    pub fn exception_type(&self) -> &'static str {
        match self {
            ConsumeError::Rejected(_) => "sourced_bus::ConsumeError::Rejected",
            ConsumeError::NotFound(_) => "sourced_bus::ConsumeError::NotFound",
            ConsumeError::DecodeFailed(_) => "sourced_bus::ConsumeError::DecodeFailed",
            ConsumeError::Bus(err) => err.exception_type(),
            ConsumeError::Other { type_name, .. } => type_name,
        }
    }
}

impl From<BusError> for ConsumeError {
    fn from(err: BusError) -> Self {
        ConsumeError::Bus(Box::new(err))
    }
}

impl From<serde_json::Error> for ConsumeError {
    fn from(err: serde_json::Error) -> Self {
        ConsumeError::DecodeFailed(err.to_string())
    }
}

/// Error type for request/response operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RequestError {
    /// No response arrived before the timeout elapsed.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// The consumer faulted while handling the request.
    #[error("request faulted: {}", describe_fault(.0))]
    Faulted(Box<Fault<serde_json::Value>>),
    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,
    /// Sending the request or opening the reply channel failed.
    #[error(transparent)]
    Bus(#[from] BusError),
}

impl RequestError {
    /// The fault record, when the request faulted.
    pub fn fault(&self) -> Option<&Fault<serde_json::Value>> {
        match self {
            RequestError::Faulted(fault) => Some(fault),
            _ => None,
        }
    }
}

fn describe_fault(fault: &Fault<serde_json::Value>) -> String {
    match fault.exceptions.first() {
        Some(exception) => format!("{}: {}", exception.exception_type, exception.message),
        None => "no exception recorded".to_string(),
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// Reading the configuration file failed.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    /// The configuration is not valid TOML for `BusConfig`.
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("inventory service unavailable")]
    struct InventoryUnavailable;

    #[test]
    fn other_keeps_concrete_type_name() {
        let err = ConsumeError::other(InventoryUnavailable);
        assert!(err.exception_type().ends_with("InventoryUnavailable"));
        assert_eq!(err.to_string(), "inventory service unavailable");
    }

    #[test]
    fn bus_error_reports_consumer_type() {
        let err = BusError::from(ConsumeError::Rejected("bad order".into()));
        assert_eq!(err.exception_type(), "sourced_bus::ConsumeError::Rejected");
        assert_eq!(err.to_string(), "consumer error: rejected: bad order");
    }

    #[test]
    fn unknown_message_type_is_flagged() {
        assert!(BusError::UnknownMessageType("urn:x".into()).is_unknown_message_type());
        assert!(!BusError::Cancelled.is_unknown_message_type());
    }
}
