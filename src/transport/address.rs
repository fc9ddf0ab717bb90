//! Logical broker addresses.
//!
//! Addresses are URIs whose scheme names the kind of entity:
//!
//! - `queue:orders`: a queue (point-to-point)
//! - `exchange:Orders.Contracts:SubmitOrder`: an exchange/topic (fan-out)
//! - `http://host/path`: an HTTP callback endpoint
//!
//! Non-structured addresses carry entity flags as query parameters:
//! `queue:reply-1?durable=false&autodelete=true`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use url::Url;

use super::TransportError;

/// Kind of entity an address points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressKind {
    Queue,
    Exchange,
    Http,
}

/// A parsed transport address.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Address {
    url: Url,
}

impl Address {
    /// Parse an address, rejecting schemes the runtime does not understand.
    pub fn parse(input: &str) -> Result<Self, TransportError> {
        let url = Url::parse(input)
            .map_err(|e| TransportError::InvalidAddress(format!("{input}: {e}")))?;
        let address = Self { url };
        address.kind()?;
        if address.name().is_empty() {
            return Err(TransportError::InvalidAddress(format!(
                "{input}: missing entity name"
            )));
        }
        Ok(address)
    }

    /// Address of a durable queue.
    pub fn queue(name: &str) -> Result<Self, TransportError> {
        Self::parse(&format!("queue:{name}"))
    }

    /// Address of a durable exchange.
    pub fn exchange(name: &str) -> Result<Self, TransportError> {
        Self::parse(&format!("exchange:{name}"))
    }

    /// Address of a non-durable, auto-deleting queue.
    pub fn temporary_queue(name: &str) -> Result<Self, TransportError> {
        Self::parse(&format!("queue:{name}?durable=false&autodelete=true"))
    }

    /// Entity kind named by the scheme.
    pub fn kind(&self) -> Result<AddressKind, TransportError> {
        match self.url.scheme() {
            "queue" => Ok(AddressKind::Queue),
            "exchange" | "topic" => Ok(AddressKind::Exchange),
            "http" | "https" => Ok(AddressKind::Http),
            other => Err(TransportError::UnsupportedAddress(format!(
                "unknown scheme `{other}` in {}",
                self.url
            ))),
        }
    }

    /// Entity name: the path for `queue:`/`exchange:`, the full URL for HTTP.
    pub fn name(&self) -> &str {
        match self.url.scheme() {
            "http" | "https" => self.url.as_str(),
            _ => self.url.path(),
        }
    }

    /// Whether the entity survives a broker restart (default `true`).
    pub fn durable(&self) -> bool {
        self.flag("durable").unwrap_or(true)
    }

    /// Whether the entity is removed when its last consumer stops (default `false`).
    pub fn auto_delete(&self) -> bool {
        self.flag("autodelete").unwrap_or(false)
    }

    /// Non-durable and auto-deleting.
    pub fn is_temporary(&self) -> bool {
        !self.durable() && self.auto_delete()
    }

    /// Address text.
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    fn flag(&self, key: &str) -> Option<bool> {
        self.url
            .query_pairs()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .and_then(|(_, v)| v.parse().ok())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.url)
    }
}

impl FromStr for Address {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Address::parse(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_queue_and_exchange() {
        let queue = Address::queue("submit-order-consumer").unwrap();
        assert_eq!(queue.kind().unwrap(), AddressKind::Queue);
        assert_eq!(queue.name(), "submit-order-consumer");
        assert!(queue.durable());
        assert!(!queue.auto_delete());

        let exchange = Address::exchange("Orders.Contracts:SubmitOrder").unwrap();
        assert_eq!(exchange.kind().unwrap(), AddressKind::Exchange);
        assert_eq!(exchange.name(), "Orders.Contracts:SubmitOrder");
    }

    #[test]
    fn temporary_queue_flags() {
        let address = Address::temporary_queue("reply-1").unwrap();
        assert_eq!(address.name(), "reply-1");
        assert!(!address.durable());
        assert!(address.auto_delete());
        assert!(address.is_temporary());
    }

    #[test]
    fn http_address_name_is_full_url() {
        let address = Address::parse("http://orders.local/callbacks").unwrap();
        assert_eq!(address.kind().unwrap(), AddressKind::Http);
        assert_eq!(address.name(), "http://orders.local/callbacks");
    }

    #[test]
    fn rejects_unknown_scheme_and_empty_name() {
        assert!(matches!(
            Address::parse("ftp://files/x"),
            Err(TransportError::UnsupportedAddress(_))
        ));
        assert!(matches!(
            Address::parse("queue:"),
            Err(TransportError::InvalidAddress(_))
        ));
        assert!(Address::parse("not an address").is_err());
    }

    #[test]
    fn serde_uses_address_text() {
        let address = Address::queue("orders").unwrap();
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, "\"queue:orders\"");
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, address);
    }
}
