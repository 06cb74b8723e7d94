//! Relay hints: where an event, address or author was last seen.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use crate::event::{Event, TagTarget};
use crate::keys::{Address, HexKey};

/// Relays remembered per key.
const RELAYS_PER_KEY: usize = 5;

struct Hints {
    events: LruCache<HexKey, Vec<String>>,
    addresses: LruCache<Address, Vec<String>>,
    pubkeys: LruCache<HexKey, Vec<String>>,
}

pub struct HintIndex {
    inner: Mutex<Hints>,
}

fn remember(list: &mut Vec<String>, relay: &str) {
    if let Some(pos) = list.iter().position(|r| r == relay) {
        list.remove(pos);
    }
    list.insert(0, relay.to_string());
    list.truncate(RELAYS_PER_KEY);
}

impl HintIndex {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Hints {
                events: LruCache::new(cap),
                addresses: LruCache::new(cap),
                pubkeys: LruCache::new(cap),
            }),
        }
    }

    /// Record the origin relay and every relay hint carried in tags.
    pub fn observe(&self, event: &Event, relay: Option<&str>) {
        let mut hints = self.inner.lock();
        if let Some(relay) = relay {
            remember(hints.events.get_or_insert_mut(event.id.clone(), Vec::new), relay);
            remember(hints.pubkeys.get_or_insert_mut(event.pubkey.clone(), Vec::new), relay);
            if let Some(address) = Address::of(event) {
                remember(hints.addresses.get_or_insert_mut(address, Vec::new), relay);
            }
        }
        for target in event.tag_targets() {
            match target {
                TagTarget::Event(r) => {
                    if let Some(relay) = r.relay.as_deref() {
                        remember(hints.events.get_or_insert_mut(r.id, Vec::new), relay);
                    }
                }
                TagTarget::Address(r) => {
                    if let (Some(relay), Ok(address)) = (r.relay.as_deref(), Address::parse(&r.address)) {
                        remember(hints.addresses.get_or_insert_mut(address, Vec::new), relay);
                    }
                }
            }
        }
        for tag in &event.tags {
            if tag.name() != Some("p") {
                continue;
            }
            if let (Some(pk), Some(relay)) = (tag.value(), tag.get(2).filter(|r| !r.is_empty())) {
                remember(hints.pubkeys.get_or_insert_mut(pk.to_string(), Vec::new), relay);
            }
        }
    }

    pub fn for_event(&self, id: &str) -> Vec<String> {
        self.inner.lock().events.get(id).cloned().unwrap_or_default()
    }

    pub fn for_address(&self, address: &Address) -> Vec<String> {
        self.inner
            .lock()
            .addresses
            .get(address)
            .cloned()
            .unwrap_or_default()
    }

    pub fn for_pubkey(&self, pubkey: &str) -> Vec<String> {
        self.inner.lock().pubkeys.get(pubkey).cloned().unwrap_or_default()
    }
}
