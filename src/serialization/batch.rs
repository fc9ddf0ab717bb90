//! `Batch<T>`: several messages of one type delivered as a single message.

use std::ops::Deref;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::message::{generic_name, Message, BUS_NAMESPACE};

/// A batch of messages of type `T`.
///
/// Encodes as a JSON array of `T`. Its type list carries the batch URN
/// followed by `T`'s URNs, so a frame can be routed as a batch while still
/// naming the element type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
#[serde(bound(serialize = "T: Serialize", deserialize = "T: DeserializeOwned"))]
pub struct Batch<T> {
    messages: Vec<T>,
}

impl<T> Batch<T> {
    /// Create a batch from a list of messages.
    pub fn new(messages: Vec<T>) -> Self {
        Self { messages }
    }

    /// Messages in the batch.
    pub fn messages(&self) -> &[T] {
        &self.messages
    }

    /// Consume the batch, returning its messages.
    pub fn into_inner(self) -> Vec<T> {
        self.messages
    }
}

impl<T> Deref for Batch<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.messages
    }
}

impl<T> From<Vec<T>> for Batch<T> {
    fn from(messages: Vec<T>) -> Self {
        Self::new(messages)
    }
}

impl<T: Message> Message for Batch<T> {
    fn message_name() -> String {
        generic_name::<T>("Batch")
    }

    fn message_namespace() -> String {
        BUS_NAMESPACE.to_string()
    }

    fn message_types() -> Vec<String> {
        let mut types = vec![Self::message_urn()];
        types.extend(T::message_types());
        types
    }
}
