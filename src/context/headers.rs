//! Header map and well-known header names.
//!
//! Headers are plain string entries so they survive any transport. Names
//! used by the runtime itself are prefixed `sb-`.

use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Content type of the encoded body.
pub const CONTENT_TYPE: &str = "content_type";
/// Message id, carried as a header by codecs without an envelope.
pub const MESSAGE_ID: &str = "sb-message-id";
/// Semicolon-separated message type URNs, for codecs without an envelope.
pub const MESSAGE_TYPE: &str = "sb-message-type";
/// Correlation id, for codecs without an envelope.
pub const CORRELATION_ID: &str = "sb-correlation-id";
/// Conversation id, for codecs without an envelope.
pub const CONVERSATION_ID: &str = "sb-conversation-id";
/// Response address, for codecs without an envelope.
pub const RESPONSE_ADDRESS: &str = "sb-response-address";
/// Fault address.
pub const FAULT_ADDRESS: &str = "sb-fault-address";
/// Id of the request a response or fault answers.
pub const REQUEST_ID: &str = "sb-request-id";
/// Concrete type of the error that failed the message.
pub const EXCEPTION_TYPE: &str = "sb-exception-type";
/// Display text of the error that failed the message.
pub const EXCEPTION_MESSAGE: &str = "sb-exception-message";
/// Backtrace captured when the message failed, if any.
pub const EXCEPTION_STACKTRACE: &str = "sb-exception-stacktrace";
/// Why the message was moved to the error or skipped queue.
pub const REASON: &str = "sb-reason";
/// Number of times the transport redelivered the message.
pub const REDELIVERY_COUNT: &str = "sb-redelivery-count";
/// Address a forwarded message was forwarded from.
pub const FORWARDER_ADDRESS: &str = "sb-forwarder-address";

/// Prefix reserved for origin-host metadata. Headers with this prefix are
/// stripped before an envelope is written.
pub const HOST_PREFIX: &str = "sb-host-";
pub const HOST_MACHINE_NAME: &str = "sb-host-machine-name";
pub const HOST_PROCESS_NAME: &str = "sb-host-process-name";
pub const HOST_PROCESS_ID: &str = "sb-host-process-id";
pub const HOST_ASSEMBLY: &str = "sb-host-assembly";
pub const HOST_ASSEMBLY_VERSION: &str = "sb-host-assembly-version";
pub const HOST_FRAMEWORK_VERSION: &str = "sb-host-framework-version";
pub const HOST_LIBRARY_VERSION: &str = "sb-host-library-version";
pub const HOST_OPERATING_SYSTEM_VERSION: &str = "sb-host-operating-system-version";

/// Reason tag for messages moved to the error queue.
pub const REASON_FAULT: &str = "fault";
/// Reason tag for messages moved to the skipped queue.
pub const REASON_SKIPPED: &str = "skipped";

/// String-keyed header map. Insertion order is not preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers {
    entries: HashMap<String, String>,
}

impl Headers {
    /// Create an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a header value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|v| v.as_str())
    }

    /// Get a header value parsed as `T`, or `None` if absent or malformed.
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    /// Set a header value, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Set a header only if it is not already present.
    pub fn set_default(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.entry(key.into()).or_insert_with(|| value.into());
    }

    /// Remove a header, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    /// Check if a header exists.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Copy every entry of `other` into this map, overwriting duplicates.
    pub fn extend(&mut self, other: &Headers) {
        for (k, v) in other.iter() {
            self.set(k, v);
        }
    }

    /// Drop every header whose name starts with `prefix`.
    pub fn strip_prefix(&mut self, prefix: &str) {
        self.entries.retain(|k, _| !k.starts_with(prefix));
    }

    /// Iterate over all entries.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the map is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Redelivery count, sanitized: absent or malformed values read as zero.
    pub fn redelivery_count(&self) -> u32 {
        self.get_parsed(REDELIVERY_COUNT).unwrap_or(0)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}
