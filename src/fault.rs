//! Fault records published when a consumer fails terminally.
//!
//! A `Fault<T>` is distinct from the original message: the error queue
//! receives the original frame, the fault address receives this record.

use std::error::Error;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::context::HostInfo;
use crate::error::{BusError, ConsumeError};
use crate::message::{generic_name, urn, Message, BUS_NAMESPACE};

/// Non-generic URN carried by every fault, whatever the faulted type.
pub fn fault_urn() -> String {
    urn(BUS_NAMESPACE, "Fault")
}

/// Structured description of one error in a failure chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionInfo {
    pub exception_type: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inner: Option<Box<ExceptionInfo>>,
}

impl ExceptionInfo {
    /// Describe `error` and its source chain under an explicit type name.
    pub fn from_error(exception_type: impl Into<String>, error: &(dyn Error + 'static)) -> Self {
        Self {
            exception_type: exception_type.into(),
            message: error.to_string(),
            stack_trace: Some(format!("{error:?}")),
            inner: error.source().map(|source| Box::new(Self::from_source(source))),
        }
    }

    /// Describe a pipeline failure.
    ///
    /// Consumer failures are unwrapped so the record names the consumer's
    /// own error rather than the bus wrapper.
    pub fn from_bus_error(error: &BusError) -> Self {
        match error {
            BusError::Consumer(ConsumeError::Other { type_name, source }) => {
                Self::from_error(*type_name, &**source)
            }
            BusError::Consumer(inner) => Self::from_error(inner.exception_type(), inner),
            other => Self::from_error(other.exception_type(), other),
        }
    }

    fn from_source(error: &(dyn Error + 'static)) -> Self {
        Self {
            exception_type: "source".to_string(),
            message: error.to_string(),
            stack_trace: None,
            inner: error.source().map(|source| Box::new(Self::from_source(source))),
        }
    }
}

/// Record of a terminal consumer failure for a message of type `T`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(bound(serialize = "T: Serialize", deserialize = "T: DeserializeOwned"))]
pub struct Fault<T> {
    pub fault_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault_message_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    #[serde(default)]
    pub fault_message_types: Vec<String>,
    pub exceptions: Vec<ExceptionInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<HostInfo>,
    pub timestamp: DateTime<Utc>,
    pub message: T,
}

impl<T> Fault<T> {
    /// Type name of the first recorded exception.
    pub fn exception_type(&self) -> Option<&str> {
        self.exceptions.first().map(|e| e.exception_type.as_str())
    }
}

impl Fault<Value> {
    /// Decode the faulted message as `T`.
    pub fn into_typed<T: DeserializeOwned>(self) -> Result<Fault<T>, serde_json::Error> {
        Ok(Fault {
            fault_id: self.fault_id,
            fault_message_id: self.fault_message_id,
            correlation_id: self.correlation_id,
            fault_message_types: self.fault_message_types,
            exceptions: self.exceptions,
            host: self.host,
            timestamp: self.timestamp,
            message: serde_json::from_value(self.message)?,
        })
    }
}

impl<T: Message> Message for Fault<T> {
    fn message_name() -> String {
        generic_name::<T>("Fault")
    }

    fn message_namespace() -> String {
        BUS_NAMESPACE.to_string()
    }

    fn message_types() -> Vec<String> {
        vec![Self::message_urn(), fault_urn()]
    }
}
