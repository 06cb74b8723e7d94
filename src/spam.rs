//! Duplicate-post detection.
//!
//! A post is fingerprinted by its content and tag structure. The same
//! fingerprint arriving under a different id (or a different address) marks
//! the post as spam and its author as an offender. Offenders are hidden once
//! they have been caught duplicating [`HIDE_THRESHOLD`] distinct posts.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tracing::warn;

use crate::event::Event;
use crate::keys::{Address, HexKey};

/// Posts shorter than this are never flagged.
pub const MIN_CHECKED_LEN: usize = 60;
/// Posts shorter than this that are dominated by one `nostr:` URI are exempt.
pub const URI_EXEMPT_LEN: usize = 180;
/// Distinct duplicates needed before an author is hidden.
pub const HIDE_THRESHOLD: usize = 5;

/// Registry record for an author caught duplicating posts.
#[derive(Debug, Clone)]
pub struct Spammer {
    pub pubkey: HexKey,
    pub duplicated_ids: HashSet<String>,
    pub duplicated_addresses: HashSet<Address>,
}

impl Spammer {
    pub fn should_hide(&self) -> bool {
        self.duplicated_ids.len() >= HIDE_THRESHOLD
            || self.duplicated_addresses.len() >= HIDE_THRESHOLD
    }
}

struct SpamState {
    recent_regular: LruCache<u64, String>,
    recent_addressable: LruCache<u64, Address>,
    offenders: LruCache<u64, Spammer>,
    relay_counts: HashMap<String, u64>,
}

pub struct SpamGuard {
    state: Mutex<SpamState>,
    changes: watch::Sender<u64>,
}

impl SpamGuard {
    pub fn new(recent_capacity: usize, offender_capacity: usize) -> Self {
        let recent = NonZeroUsize::new(recent_capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        let offenders = NonZeroUsize::new(offender_capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        let (changes, _) = watch::channel(0);
        Self {
            state: Mutex::new(SpamState {
                recent_regular: LruCache::new(recent),
                recent_addressable: LruCache::new(recent),
                offenders: LruCache::new(offenders),
                relay_counts: HashMap::new(),
            }),
            changes,
        }
    }

    /// Classify `event`, recording it as seen when it is not spam.
    pub fn is_spam(&self, event: &Event, relay: Option<&str>) -> bool {
        if is_exempt(&event.content) {
            return false;
        }
        let fp = fingerprint(event);
        let mut state = self.state.lock();

        let known_offender = state.offenders.contains(&fp);
        let duplicate = match Address::of(event) {
            Some(address) => match state.recent_addressable.get(&fp) {
                Some(prev) if *prev != address => Some(Duplicate::Address(prev.clone(), address)),
                Some(_) if known_offender => Some(Duplicate::Address(address.clone(), address)),
                Some(_) => None,
                None => {
                    state.recent_addressable.put(fp, address.clone());
                    known_offender.then(|| Duplicate::Address(address.clone(), address))
                }
            },
            None => match state.recent_regular.get(&fp) {
                Some(prev) if *prev != event.id => {
                    Some(Duplicate::Id(prev.clone(), event.id.clone()))
                }
                Some(_) if known_offender => {
                    Some(Duplicate::Id(event.id.clone(), event.id.clone()))
                }
                Some(_) => None,
                None => {
                    state.recent_regular.put(fp, event.id.clone());
                    known_offender.then(|| Duplicate::Id(event.id.clone(), event.id.clone()))
                }
            },
        };

        let Some(duplicate) = duplicate else {
            return false;
        };

        if !state.offenders.contains(&fp) {
            state.offenders.put(
                fp,
                Spammer {
                    pubkey: event.pubkey.clone(),
                    duplicated_ids: HashSet::new(),
                    duplicated_addresses: HashSet::new(),
                },
            );
        }
        let Some(spammer) = state.offenders.get_mut(&fp) else {
            return true;
        };
        match duplicate {
            Duplicate::Id(prev, new) => {
                spammer.duplicated_ids.insert(prev);
                spammer.duplicated_ids.insert(new);
            }
            Duplicate::Address(prev, new) => {
                spammer.duplicated_addresses.insert(prev);
                spammer.duplicated_addresses.insert(new);
            }
        }
        let hide = spammer.should_hide();
        if let Some(relay) = relay {
            *state.relay_counts.entry(relay.to_string()).or_default() += 1;
        }
        drop(state);

        warn!(
            id = %event.id,
            author = %event.pubkey,
            relay = relay.unwrap_or("-"),
            fingerprint = fp,
            hide,
            "duplicated post classified as spam"
        );
        self.changes.send_modify(|v| *v += 1);
        true
    }

    pub fn spammer(&self, pubkey: &str) -> Option<Spammer> {
        let state = self.state.lock();
        state
            .offenders
            .iter()
            .map(|(_, s)| s)
            .find(|s| s.pubkey == pubkey)
            .cloned()
    }

    /// Authors whose offender record has crossed the hide threshold.
    pub fn hidden_authors(&self) -> HashSet<HexKey> {
        let state = self.state.lock();
        state
            .offenders
            .iter()
            .filter(|(_, s)| s.should_hide())
            .map(|(_, s)| s.pubkey.clone())
            .collect()
    }

    pub fn should_hide(&self, pubkey: &str) -> bool {
        let state = self.state.lock();
        state
            .offenders
            .iter()
            .any(|(_, s)| s.pubkey == pubkey && s.should_hide())
    }

    /// Spam events seen per relay.
    pub fn relay_spam_count(&self, relay: &str) -> u64 {
        self.state.lock().relay_counts.get(relay).copied().unwrap_or(0)
    }

    /// Receives a bumped counter after every spam classification.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }
}

enum Duplicate {
    Id(String, String),
    Address(Address, Address),
}

fn is_exempt(content: &str) -> bool {
    let len = content.chars().count();
    if len < MIN_CHECKED_LEN {
        return true;
    }
    len < URI_EXEMPT_LEN && dominated_by_uri(content)
}

/// One `nostr:` reference that the post opens with.
fn dominated_by_uri(content: &str) -> bool {
    content.matches("nostr:").count() == 1 && content.trim_start().starts_with("nostr:")
}

/// Hash of the content combined with the hash of the tag structure.
pub fn fingerprint(event: &Event) -> u64 {
    let content = Sha256::digest(event.content.as_bytes());
    let mut tags = Sha256::new();
    for tag in &event.tags {
        for field in &tag.0 {
            tags.update(field.as_bytes());
            tags.update([0x1f]);
        }
        tags.update([0x1e]);
    }
    let tags = tags.finalize();
    let mut a = [0u8; 8];
    let mut b = [0u8; 8];
    a.copy_from_slice(&content[..8]);
    b.copy_from_slice(&tags[..8]);
    u64::from_be_bytes(a) ^ u64::from_be_bytes(b).rotate_left(17)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Tag;

    fn post(id: u8, content: &str) -> Event {
        Event {
            id: format!("{id:02x}").repeat(32),
            pubkey: "ab".repeat(32),
            kind: 1,
            created_at: 100 + id as u64,
            tags: vec![Tag(vec!["t".into(), "promo".into()])],
            content: content.into(),
            sig: String::new(),
        }
    }

    fn long_text() -> String {
        "Buy the best widgets at unbeatable prices, limited offer today only!!".repeat(2)
    }

    #[test]
    fn fifth_duplicate_hides_the_author() {
        let guard = SpamGuard::new(2000, 1000);
        let text = long_text();
        assert!(!guard.is_spam(&post(1, &text), None));
        for id in 2..=4 {
            assert!(guard.is_spam(&post(id, &text), Some("wss://r")));
        }
        assert!(!guard.should_hide(&"ab".repeat(32)));
        assert!(guard.is_spam(&post(5, &text), Some("wss://r")));
        assert!(guard.should_hide(&"ab".repeat(32)));
        assert!(guard.hidden_authors().contains(&"ab".repeat(32)));
        assert_eq!(guard.relay_spam_count("wss://r"), 4);
    }

    #[test]
    fn short_posts_are_never_flagged() {
        let guard = SpamGuard::new(2000, 1000);
        let text = "x".repeat(40);
        for id in 1..=10 {
            assert!(!guard.is_spam(&post(id, &text), None));
        }
    }

    #[test]
    fn uri_led_replies_under_limit_are_exempt() {
        let guard = SpamGuard::new(2000, 1000);
        let mention = format!("nostr:npub1{}", "q".repeat(58));
        let text = format!("{mention} {}", "thanks for sharing this! ".repeat(4));
        let text: String = text.chars().take(150).collect();
        assert_eq!(text.chars().count(), 150);
        for id in 1..=6 {
            assert!(!guard.is_spam(&post(id, &text), None));
        }
    }

    #[test]
    fn same_id_twice_is_not_spam() {
        let guard = SpamGuard::new(2000, 1000);
        let text = long_text();
        assert!(!guard.is_spam(&post(1, &text), None));
        assert!(!guard.is_spam(&post(1, &text), None));
    }

    #[test]
    fn different_tags_change_the_fingerprint() {
        let text = long_text();
        let a = post(1, &text);
        let mut b = post(2, &text);
        b.tags = vec![Tag(vec!["p".into(), "cd".repeat(32)])];
        assert_ne!(fingerprint(&a), fingerprint(&b));
        let guard = SpamGuard::new(2000, 1000);
        assert!(!guard.is_spam(&a, None));
        assert!(!guard.is_spam(&b, None));
    }

    #[test]
    fn addressable_duplicates_track_addresses() {
        let guard = SpamGuard::new(2000, 1000);
        let text = long_text();
        let article = |id: u8, d: &str| {
            let mut ev = post(id, &text);
            ev.kind = 30023;
            ev.tags = vec![Tag(vec!["d".into(), d.into()])];
            ev
        };
        assert!(!guard.is_spam(&article(1, "same"), None));
        // A new version at the same address is an edit, not a duplicate.
        assert!(!guard.is_spam(&article(2, "same"), None));
        // Tags differ per d-tag, so copy the d-tag to collide on purpose.
        let mut other = article(3, "same");
        other.pubkey = "cd".repeat(32);
        assert!(guard.is_spam(&other, None));
        // The record belongs to whoever posted the copy.
        let spammer = guard.spammer(&"cd".repeat(32)).unwrap();
        assert_eq!(spammer.duplicated_addresses.len(), 2);
    }

    #[test]
    fn spam_notifies_subscribers() {
        let guard = SpamGuard::new(2000, 1000);
        let rx = guard.subscribe();
        let text = long_text();
        guard.is_spam(&post(1, &text), None);
        guard.is_spam(&post(2, &text), None);
        assert_eq!(*rx.borrow(), 1);
    }
}
