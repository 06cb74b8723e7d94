//! Index of processed deletion requests (NIP-09).
//!
//! Used to refuse resurrection of deleted content and to answer which
//! deletion removed a given event.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::event::Event;
use crate::keys::{Address, HexKey};

#[derive(Default)]
struct DeletionState {
    processed: HashSet<HexKey>,
    by_id: HashMap<HexKey, Vec<Arc<Event>>>,
    by_address: HashMap<Address, Vec<Arc<Event>>>,
}

#[derive(Default)]
pub struct DeletionIndex {
    state: RwLock<DeletionState>,
}

impl DeletionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a deletion. Returns `false` when this deletion id was already
    /// processed.
    pub fn add(&self, deletion: &Arc<Event>) -> bool {
        let mut state = self.state.write();
        if !state.processed.insert(deletion.id.clone()) {
            return false;
        }
        for id in deletion.tag_values("e") {
            state
                .by_id
                .entry(id.to_string())
                .or_default()
                .push(Arc::clone(deletion));
        }
        for tag in deletion.tag_values("a") {
            if let Ok(address) = Address::parse(tag) {
                state
                    .by_address
                    .entry(address)
                    .or_default()
                    .push(Arc::clone(deletion));
            }
        }
        true
    }

    pub fn has_been_deleted(&self, event: &Event) -> bool {
        self.deleted_by(event).is_some()
    }

    /// The first recorded deletion that removes `event`: same author, and for
    /// addressable events not older than the version.
    pub fn deleted_by(&self, event: &Event) -> Option<Arc<Event>> {
        let state = self.state.read();
        let address = Address::of(event);
        if let Some(found) = state.by_id.get(&event.id).and_then(|list| {
            list.iter().find(|d| {
                d.pubkey == event.pubkey
                    && (address.is_none() || d.created_at >= event.created_at)
            })
        }) {
            return Some(Arc::clone(found));
        }
        let address = address?;
        state
            .by_address
            .get(&address)?
            .iter()
            .find(|d| d.pubkey == event.pubkey && d.created_at >= event.created_at)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.state.read().processed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
