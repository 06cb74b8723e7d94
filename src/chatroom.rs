//! Private message rooms.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::flow::{FlowKind, FlowSet, Subscription};
use crate::keys::HexKey;
use crate::note::Note;

/// The counterparties of a room, seen from the owning user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChatroomKey(pub BTreeSet<HexKey>);

impl ChatroomKey {
    pub fn new<I, S>(members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<HexKey>,
    {
        Self(members.into_iter().map(Into::into).collect())
    }

    pub fn without(mut self, pubkey: &str) -> Self {
        self.0.remove(pubkey);
        self
    }
}

pub struct Chatroom {
    key: ChatroomKey,
    messages: RwLock<HashMap<String, Arc<Note>>>,
    flows: FlowSet,
}

impl Chatroom {
    pub fn new(key: ChatroomKey) -> Self {
        Self {
            key,
            messages: RwLock::new(HashMap::new()),
            flows: FlowSet::default(),
        }
    }

    pub fn key(&self) -> &ChatroomKey {
        &self.key
    }

    pub fn add_message(&self, note: &Arc<Note>) -> bool {
        let added = self
            .messages
            .write()
            .insert(note.id_hex(), Arc::clone(note))
            .is_none();
        if added {
            self.flows.invalidate(FlowKind::Notes);
        }
        added
    }

    pub fn remove_message(&self, note: &Note) -> bool {
        let removed = self.messages.write().remove(&note.id_hex()).is_some();
        if removed {
            self.flows.invalidate(FlowKind::Notes);
        }
        removed
    }

    pub fn messages(&self) -> Vec<Arc<Note>> {
        self.messages.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Messages beyond the retention window, newest first ordering by
    /// `(created_at, id)`.
    ///
    /// A room whose newest message is recent keeps `cap` messages, otherwise
    /// it keeps only the newest one. Observed messages are never returned.
    pub fn prune_candidates(&self, now: u64, cap: usize, recent_secs: u64) -> Vec<Arc<Note>> {
        let sorted = newest_first(self.messages());
        let Some(newest) = sorted.first().and_then(|n| n.created_at()) else {
            return Vec::new();
        };
        let keep = if newest >= now.saturating_sub(recent_secs) {
            cap
        } else {
            1
        };
        sorted
            .into_iter()
            .skip(keep)
            .filter(|n| !n.is_in_use())
            .collect()
    }

    pub fn attach(&self, kind: FlowKind) -> Subscription {
        self.flows.attach(kind)
    }
}

/// Sort by `(created_at, id)` descending.
pub(crate) fn newest_first(mut notes: Vec<Arc<Note>>) -> Vec<Arc<Note>> {
    notes.sort_by_cached_key(|n| Reverse((n.created_at().unwrap_or(0), n.id_hex())));
    notes
}
