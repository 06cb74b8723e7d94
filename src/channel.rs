//! Public chat channels, ephemeral rooms and live activities.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Deserialize;

use crate::chatroom::newest_first;
use crate::event::Event;
use crate::flow::{FlowKind, FlowSet, Subscription};
use crate::keys::{Address, HexKey};
use crate::note::Note;
use crate::user::User;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelKey {
    /// Kind 40 channel, keyed by its creation event id.
    Public(HexKey),
    /// Kind 23333 room: `d` tag plus the relay hosting it.
    Ephemeral { room: String, relay: String },
    /// Kind 30311 live activity.
    Live(Address),
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKey::Public(id) => f.write_str(id),
            ChannelKey::Ephemeral { room, relay } => write!(f, "{room}@{relay}"),
            ChannelKey::Live(a) => f.write_str(&a.to_tag()),
        }
    }
}

/// Display fields of a channel.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ChannelInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub about: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

impl ChannelInfo {
    /// Kind 40/41 carry JSON content; live activities use tags.
    fn parse(event: &Event) -> Self {
        if let Ok(info) = serde_json::from_str::<ChannelInfo>(&event.content) {
            return info;
        }
        ChannelInfo {
            name: event.first_tag_value("title").map(str::to_string),
            about: event.first_tag_value("summary").map(str::to_string),
            picture: event.first_tag_value("image").map(str::to_string),
        }
    }
}

#[derive(Default)]
struct ChannelState {
    creator: Option<Arc<User>>,
    info: ChannelInfo,
    info_note: Option<Arc<Note>>,
    updated_at: u64,
    notes: HashMap<String, Arc<Note>>,
    relays: HashMap<String, u64>,
}

pub struct Channel {
    key: ChannelKey,
    state: RwLock<ChannelState>,
    flows: FlowSet,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel").field("key", &self.key).finish()
    }
}

impl Channel {
    pub fn new(key: ChannelKey) -> Self {
        Self {
            key,
            state: RwLock::new(ChannelState::default()),
            flows: FlowSet::default(),
        }
    }

    pub fn key(&self) -> &ChannelKey {
        &self.key
    }

    pub fn creator(&self) -> Option<Arc<User>> {
        self.state.read().creator.clone()
    }

    pub fn info(&self) -> ChannelInfo {
        self.state.read().info.clone()
    }

    pub fn info_note(&self) -> Option<Arc<Note>> {
        self.state.read().info_note.clone()
    }

    pub fn updated_at(&self) -> u64 {
        self.state.read().updated_at
    }

    /// Display name, falling back to the key.
    pub fn name(&self) -> String {
        self.state
            .read()
            .info
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| self.key.to_string())
    }

    /// Adopt `event` as the channel's info when it is newer and authored by
    /// the creator (or no creator is known yet).
    pub fn update_info(&self, creator: &Arc<User>, event: &Event, note: &Arc<Note>) -> bool {
        {
            let mut state = self.state.write();
            if event.created_at <= state.updated_at && state.info_note.is_some() {
                return false;
            }
            if let Some(existing) = &state.creator {
                if existing.pubkey() != creator.pubkey() {
                    return false;
                }
            }
            state.creator = Some(Arc::clone(creator));
            state.info = ChannelInfo::parse(event);
            state.info_note = Some(Arc::clone(note));
            state.updated_at = event.created_at;
        }
        self.flows.invalidate(FlowKind::Info);
        true
    }

    /// Add a message. `relay` bumps the relay's ranking.
    pub fn add_note(&self, note: &Arc<Note>, relay: Option<&str>) -> bool {
        let added = {
            let mut state = self.state.write();
            if let Some(relay) = relay {
                *state.relays.entry(relay.to_string()).or_default() += 1;
            }
            state
                .notes
                .insert(note.id_hex(), Arc::clone(note))
                .is_none()
        };
        if relay.is_some() {
            self.flows.invalidate(FlowKind::Relays);
        }
        if added {
            self.flows.invalidate(FlowKind::Notes);
        }
        added
    }

    pub fn remove_note(&self, note: &Note) -> bool {
        let removed = self.state.write().notes.remove(&note.id_hex()).is_some();
        if removed {
            self.flows.invalidate(FlowKind::Notes);
        }
        removed
    }

    pub fn notes(&self) -> Vec<Arc<Note>> {
        self.state.read().notes.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Relays ranked by the number of messages seen on each, descending.
    pub fn relays(&self) -> Vec<String> {
        let state = self.state.read();
        let mut ranked: Vec<(&String, &u64)> = state.relays.iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        ranked.into_iter().map(|(r, _)| r.clone()).collect()
    }

    /// Messages past the newest `cap`, excluding observed ones.
    pub fn prune_candidates(&self, cap: usize) -> Vec<Arc<Note>> {
        newest_first(self.notes())
            .into_iter()
            .skip(cap)
            .filter(|n| !n.is_in_use())
            .collect()
    }

    /// Case-insensitive match on the key prefix or the name prefix.
    pub fn matches(&self, text: &str) -> bool {
        let needle = text.to_lowercase();
        if needle.is_empty() {
            return false;
        }
        self.key.to_string().starts_with(&needle)
            || self
                .state
                .read()
                .info
                .name
                .as_ref()
                .is_some_and(|n| n.to_lowercase().starts_with(&needle))
    }

    pub fn attach(&self, kind: FlowKind) -> Subscription {
        self.flows.attach(kind)
    }

    pub fn is_in_use(&self) -> bool {
        self.flows.is_in_use()
    }
}
