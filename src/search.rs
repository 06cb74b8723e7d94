//! Prefix and substring lookups over the in-memory indexes.

use std::sync::Arc;

use crate::channel::Channel;
use crate::event::{is_addressable_kind, Event};
use crate::kind::EventKind;
use crate::note::Note;
use crate::store::GraphStore;
use crate::user::User;

/// Kinds that are never returned by note search.
fn is_searchable(kind: EventKind) -> bool {
    use EventKind::*;
    !matches!(
        kind,
        Repost
            | GenericRepost
            | CommunityApproval
            | Reaction
            | ZapReceipt
            | ZapRequest
            | FileHeader
            | Metadata
            | ContactList
    )
}

fn event_matches(key: &str, event: &Event, text: &str, lowered: &str) -> bool {
    let Some(kind) = EventKind::from_kind(event.kind) else {
        return false;
    };
    if !is_searchable(kind) {
        return false;
    }
    if key.starts_with(lowered) {
        return true;
    }
    if event.tags.iter().any(|t| t.value() == Some(text)) {
        return true;
    }
    !kind.is_encrypted() && event.content.to_lowercase().contains(lowered)
}

impl GraphStore {
    pub fn find_users_starting_with(&self, text: &str) -> Vec<Arc<User>> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        self.users.filter(|_, user| user.matches(text))
    }

    /// Notes whose id starts with, tags equal, or content contains `text`.
    /// Addressable content is matched once, through its canonical slot.
    pub fn find_notes_starting_with(&self, text: &str) -> Vec<Arc<Note>> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let lowered = text.to_lowercase();
        let mut found = self.notes.filter(|key, note| {
            note.event().is_some_and(|event| {
                !is_addressable_kind(event.kind) && event_matches(key, &event, text, &lowered)
            })
        });
        found.extend(self.addressables.filter(|address, note| {
            note.event()
                .is_some_and(|event| event_matches(&address.to_tag(), &event, text, &lowered))
        }));
        found
    }

    pub fn find_channels_starting_with(&self, text: &str) -> Vec<Arc<Channel>> {
        self.channels
            .iter()
            .filter(|c| c.value().matches(text))
            .map(|c| Arc::clone(c.value()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::store::tests::{ev, hex, pk, store, tag};

    #[test]
    fn users_match_names_and_key_prefixes() {
        let store = store();
        store.consume(ev(1, 'a', 0, 10, vec![], r#"{"name":"Alice","nip05":"al@x.io"}"#), None, false);
        store.consume(ev(2, 'b', 0, 10, vec![], r#"{"display_name":"Bob"}"#), None, false);
        assert_eq!(store.find_users_starting_with("ali").len(), 1);
        assert_eq!(store.find_users_starting_with("BO").len(), 1);
        assert_eq!(store.find_users_starting_with(&pk('b')[..10]).len(), 1);
        assert!(store.find_users_starting_with("").is_empty());
    }

    #[test]
    fn notes_match_content_tags_and_ids() {
        let store = store();
        store.consume(ev(1, 'a', 1, 10, vec![tag(&["t", "rust"])], "Ownership explained"), None, false);
        store.consume(ev(2, 'b', 7, 11, vec![tag(&["e", &hex(1)])], "ownership"), None, false);
        store.consume(ev(3, 'c', 4, 12, vec![tag(&["p", &pk('a')])], "ownership"), None, false);
        let hits = store.find_notes_starting_with("OWNERSHIP");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id_hex(), hex(1));
        assert_eq!(store.find_notes_starting_with("rust").len(), 1);
        assert_eq!(store.find_notes_starting_with(&hex(3)).len(), 1);
    }

    #[test]
    fn addressable_content_is_found_once() {
        let store = store();
        let d = tag(&["d", "guide"]);
        store.consume(ev(1, 'a', 30023, 10, vec![d.clone()], "borrow checker guide"), None, false);
        store.consume(ev(2, 'a', 30023, 20, vec![d], "borrow checker guide, revised"), None, false);
        let hits = store.find_notes_starting_with("borrow");
        assert_eq!(hits.len(), 1);
        assert!(hits[0].is_addressable());
    }

    #[test]
    fn channels_match_names() {
        let store = store();
        store.consume(ev(1, 'a', 40, 10, vec![], r#"{"name":"Rustaceans"}"#), None, false);
        assert_eq!(store.find_channels_starting_with("rust").len(), 1);
        assert!(store.find_channels_starting_with("go").is_empty());
    }
}
