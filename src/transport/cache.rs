use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{Address, SendTransport, TransportError};

/// Address → sender cache shared by concurrent callers.
///
/// Lookups never block each other; the first caller for an address builds
/// the sender and every later caller reuses it.
#[derive(Default)]
pub struct SendTransportCache {
    senders: DashMap<Address, Arc<dyn SendTransport>>,
}

impl SendTransportCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached sender for `address`, built with `create` on first use.
    pub fn get_or_try_insert<F>(
        &self,
        address: &Address,
        create: F,
    ) -> Result<Arc<dyn SendTransport>, TransportError>
    where
        F: FnOnce() -> Result<Arc<dyn SendTransport>, TransportError>,
    {
        if let Some(sender) = self.senders.get(address) {
            return Ok(Arc::clone(sender.value()));
        }
        match self.senders.entry(address.clone()) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let sender = create()?;
                entry.insert(Arc::clone(&sender));
                Ok(sender)
            }
        }
    }

    pub fn get(&self, address: &Address) -> Option<Arc<dyn SendTransport>> {
        self.senders.get(address).map(|sender| Arc::clone(sender.value()))
    }

    pub fn remove(&self, address: &Address) -> Option<Arc<dyn SendTransport>> {
        self.senders.remove(address).map(|(_, sender)| sender)
    }

    /// Keep only the senders whose address satisfies `keep`.
    pub fn retain(&self, mut keep: impl FnMut(&Address) -> bool) {
        self.senders.retain(|address, _| keep(address));
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }

    pub fn clear(&self) {
        self.senders.clear();
    }
}
