//! Authors and their reverse indexes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Deserialize;

use crate::chatroom::{Chatroom, ChatroomKey};
use crate::event::Event;
use crate::flow::{FlowKind, FlowSet, Subscription};
use crate::keys::HexKey;
use crate::note::{Note, ZapPair};

/// Profile fields read from a kind 0 event. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct UserMetadata {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub nip05: Option<String>,
    #[serde(default)]
    pub about: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(default)]
    pub lud16: Option<String>,
}

/// How often and how recently an author was seen on a relay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayUsage {
    pub last_seen_at: u64,
    pub hit_count: u64,
}

#[derive(Default)]
struct UserState {
    metadata: Option<Arc<Event>>,
    info: Option<UserMetadata>,
    contact_list: Option<Arc<Event>>,
    relays: HashMap<String, RelayUsage>,
    reports: HashMap<HexKey, Vec<Arc<Note>>>,
    zaps: Vec<ZapPair>,
    statuses: Vec<Arc<Note>>,
    chatrooms: HashMap<ChatroomKey, Arc<Chatroom>>,
}

pub struct User {
    pubkey: HexKey,
    state: RwLock<UserState>,
    flows: FlowSet,
}

impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User").field("pubkey", &self.pubkey).finish()
    }
}

impl User {
    pub fn new(pubkey: HexKey) -> Self {
        Self {
            pubkey,
            state: RwLock::new(UserState::default()),
            flows: FlowSet::default(),
        }
    }

    pub fn pubkey(&self) -> &str {
        &self.pubkey
    }

    pub fn metadata(&self) -> Option<Arc<Event>> {
        self.state.read().metadata.clone()
    }

    pub fn info(&self) -> Option<UserMetadata> {
        self.state.read().info.clone()
    }

    /// Best name to show: display name, then name, then a pubkey prefix.
    pub fn display_name(&self) -> String {
        let state = self.state.read();
        state
            .info
            .as_ref()
            .and_then(|i| {
                i.display_name
                    .clone()
                    .filter(|s| !s.is_empty())
                    .or_else(|| i.name.clone().filter(|s| !s.is_empty()))
            })
            .unwrap_or_else(|| self.pubkey.chars().take(8).collect())
    }

    /// Replace the profile if `event` is newer. Malformed JSON still
    /// replaces the event but leaves the parsed fields empty.
    pub fn update_metadata(&self, event: Arc<Event>) -> bool {
        {
            let mut state = self.state.write();
            if state
                .metadata
                .as_ref()
                .is_some_and(|m| m.created_at >= event.created_at)
            {
                return false;
            }
            state.info = serde_json::from_str(&event.content).ok();
            state.metadata = Some(event);
        }
        self.flows.invalidate(FlowKind::Metadata);
        true
    }

    pub fn contact_list(&self) -> Option<Arc<Event>> {
        self.state.read().contact_list.clone()
    }

    pub fn update_contact_list(&self, event: Arc<Event>) -> bool {
        {
            let mut state = self.state.write();
            if state
                .contact_list
                .as_ref()
                .is_some_and(|c| c.created_at >= event.created_at)
            {
                return false;
            }
            state.contact_list = Some(event);
        }
        self.flows.invalidate(FlowKind::Follows);
        true
    }

    /// Pubkeys from the latest contact list.
    pub fn follows(&self) -> HashSet<HexKey> {
        self.state
            .read()
            .contact_list
            .as_ref()
            .map(|c| c.tag_values("p").map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn add_relay_being_used(&self, relay: &str, seen_at: u64) {
        {
            let mut state = self.state.write();
            let usage = state.relays.entry(relay.to_string()).or_default();
            usage.hit_count += 1;
            usage.last_seen_at = usage.last_seen_at.max(seen_at);
        }
        self.flows.invalidate(FlowKind::Relays);
    }

    pub fn relays_being_used(&self) -> HashMap<String, RelayUsage> {
        self.state.read().relays.clone()
    }

    /// Record `note` as a report against this user, grouped by reporter.
    pub fn add_report(&self, note: &Arc<Note>) -> bool {
        let Some(reporter) = note.author_pubkey() else {
            return false;
        };
        let added = {
            let mut state = self.state.write();
            let list = state.reports.entry(reporter).or_default();
            if list.iter().any(|n| Arc::ptr_eq(n, note)) {
                false
            } else {
                list.push(Arc::clone(note));
                true
            }
        };
        if added {
            self.flows.invalidate(FlowKind::Reports);
        }
        added
    }

    pub fn remove_report(&self, note: &Arc<Note>) -> bool {
        let removed = {
            let mut state = self.state.write();
            let mut hit = false;
            state.reports.retain(|_, list| {
                let before = list.len();
                list.retain(|n| !Arc::ptr_eq(n, note));
                hit |= before != list.len();
                !list.is_empty()
            });
            hit
        };
        if removed {
            self.flows.invalidate(FlowKind::Reports);
        }
        removed
    }

    pub fn reports(&self) -> HashMap<HexKey, Vec<Arc<Note>>> {
        self.state.read().reports.clone()
    }

    pub fn has_reports_by(&self, pubkey: &str) -> bool {
        self.state.read().reports.contains_key(pubkey)
    }

    pub fn count_report_authors_by(&self, pubkeys: &HashSet<HexKey>) -> usize {
        self.state
            .read()
            .reports
            .keys()
            .filter(|k| pubkeys.contains(*k))
            .count()
    }

    pub fn add_zap(&self, request: &Arc<Note>, receipt: Option<&Arc<Note>>) -> bool {
        let added = {
            let mut state = self.state.write();
            match state
                .zaps
                .iter_mut()
                .find(|p| Arc::ptr_eq(&p.request, request))
            {
                Some(existing) if existing.receipt.is_none() && receipt.is_some() => {
                    existing.receipt = receipt.cloned();
                    true
                }
                Some(_) => false,
                None => {
                    state.zaps.push(ZapPair {
                        request: Arc::clone(request),
                        receipt: receipt.cloned(),
                    });
                    true
                }
            }
        };
        if added {
            self.flows.invalidate(FlowKind::Zaps);
        }
        added
    }

    pub fn remove_zap(&self, note: &Arc<Note>) -> bool {
        let removed = {
            let mut state = self.state.write();
            let before = state.zaps.len();
            state.zaps.retain(|p| !Arc::ptr_eq(&p.request, note));
            before != state.zaps.len()
        };
        if removed {
            self.flows.invalidate(FlowKind::Zaps);
        }
        removed
    }

    pub fn zaps(&self) -> Vec<ZapPair> {
        self.state.read().zaps.clone()
    }

    pub fn add_status(&self, note: &Arc<Note>) -> bool {
        let added = {
            let mut state = self.state.write();
            if state.statuses.iter().any(|n| Arc::ptr_eq(n, note)) {
                false
            } else {
                state.statuses.push(Arc::clone(note));
                true
            }
        };
        if added {
            self.flows.invalidate(FlowKind::Statuses);
        }
        added
    }

    pub fn remove_status(&self, note: &Arc<Note>) -> bool {
        let removed = {
            let mut state = self.state.write();
            let before = state.statuses.len();
            state.statuses.retain(|n| !Arc::ptr_eq(n, note));
            before != state.statuses.len()
        };
        if removed {
            self.flows.invalidate(FlowKind::Statuses);
        }
        removed
    }

    pub fn statuses(&self) -> Vec<Arc<Note>> {
        self.state.read().statuses.clone()
    }

    /// The private room with `key`, created on first use.
    pub fn chatroom(&self, key: &ChatroomKey) -> Arc<Chatroom> {
        if let Some(room) = self.state.read().chatrooms.get(key) {
            return Arc::clone(room);
        }
        let mut state = self.state.write();
        Arc::clone(
            state
                .chatrooms
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Chatroom::new(key.clone()))),
        )
    }

    pub fn chatrooms(&self) -> Vec<Arc<Chatroom>> {
        self.state.read().chatrooms.values().cloned().collect()
    }

    /// Case-insensitive prefix match on pubkey, names and NIP-05.
    pub fn matches(&self, text: &str) -> bool {
        let needle = text.to_lowercase();
        if needle.is_empty() {
            return false;
        }
        if self.pubkey.starts_with(&needle) {
            return true;
        }
        let state = self.state.read();
        let Some(info) = state.info.as_ref() else {
            return false;
        };
        let hit = [&info.name, &info.display_name, &info.nip05]
            .into_iter()
            .flatten()
            .any(|v| v.to_lowercase().starts_with(&needle));
        hit
    }

    pub fn flows(&self) -> &FlowSet {
        &self.flows
    }

    pub fn attach(&self, kind: FlowKind) -> Subscription {
        self.flows.attach(kind)
    }

    pub fn is_in_use(&self) -> bool {
        self.flows.is_in_use()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Tag;
    use crate::note::NoteKey;

    fn metadata(created_at: u64, content: &str) -> Arc<Event> {
        Arc::new(Event {
            id: format!("m{created_at}"),
            pubkey: "ab".repeat(32),
            kind: 0,
            created_at,
            tags: vec![],
            content: content.into(),
            sig: String::new(),
        })
    }

    #[test]
    fn metadata_only_moves_forward() {
        let user = User::new("ab".repeat(32));
        assert!(user.update_metadata(metadata(10, r#"{"name":"alice"}"#)));
        assert!(!user.update_metadata(metadata(5, r#"{"name":"old"}"#)));
        assert_eq!(user.display_name(), "alice");
        assert!(user.matches("ALI"));
        assert!(user.matches("abab"));
        assert!(!user.matches("bob"));
    }

    #[test]
    fn relay_usage_counts_hits() {
        let user = User::new("ab".repeat(32));
        user.add_relay_being_used("wss://a", 10);
        user.add_relay_being_used("wss://a", 5);
        let usage = user.relays_being_used()["wss://a"];
        assert_eq!(usage.hit_count, 2);
        assert_eq!(usage.last_seen_at, 10);
    }

    #[test]
    fn follows_come_from_contact_list() {
        let user = User::new("ab".repeat(32));
        let list = Event {
            id: "c".into(),
            pubkey: "ab".repeat(32),
            kind: 3,
            created_at: 1,
            tags: vec![
                Tag(vec!["p".into(), "f1".into()]),
                Tag(vec!["p".into(), "f2".into()]),
            ],
            content: String::new(),
            sig: String::new(),
        };
        user.update_contact_list(Arc::new(list));
        assert_eq!(user.follows().len(), 2);
    }

    #[test]
    fn reports_group_by_reporter() {
        let user = User::new("ab".repeat(32));
        let report = Arc::new(Note::new(NoteKey::Id("r".into())));
        report.load_event(
            Arc::new(Event {
                id: "r".into(),
                pubkey: "cd".into(),
                kind: 1984,
                created_at: 1,
                tags: vec![],
                content: String::new(),
                sig: String::new(),
            }),
            Arc::new(User::new("cd".into())),
            vec![],
        );
        assert!(user.add_report(&report));
        assert!(!user.add_report(&report));
        assert!(user.has_reports_by("cd"));
        assert!(user.remove_report(&report));
        assert!(user.reports().is_empty());
    }
}
