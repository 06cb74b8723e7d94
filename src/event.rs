//! Nostr event model and tag accessors.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Wrapper for a Nostr tag expressed as an array of strings.
///
/// Tags appear as small arrays where the first element denotes the type and the
/// following elements hold data. The graph cares about:
///
/// - `e` – links to another event ID, optionally with a relay hint and a marker
///   (`root`, `reply`, `mention`)
/// - `a` – links to an addressable event as `kind:pubkey:d-tag`
/// - `p` – references another author's public key
/// - `d` – unique identifier for addressable events
/// - `expiration` – NIP-40 expiry timestamp
///
/// Each tag is stored verbatim so uncommon or custom tags are preserved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Tag(pub Vec<String>);

impl Tag {
    pub fn name(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    pub fn value(&self) -> Option<&str> {
        self.get(1)
    }

    pub fn get(&self, idx: usize) -> Option<&str> {
        self.0.get(idx).map(String::as_str)
    }

    fn relay_hint(&self) -> Option<&str> {
        self.get(2).filter(|r| !r.is_empty())
    }
}

/// Core Nostr event as it arrives from a relay.
///
/// ```json
/// {
///   "id": "aa11",
///   "pubkey": "npub...",
///   "kind": 1,
///   "created_at": 1700000000,
///   "tags": [["e", "bb22", "", "root"], ["p", "cc33"]],
///   "content": "hello",
///   "sig": "deadbeef"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Event identifier (hex of SHA-256 hash).
    pub id: String,
    /// Author public key (hex).
    pub pubkey: String,
    /// Kind number, e.g. `1` or `30023`.
    pub kind: u32,
    /// Unix timestamp of creation.
    pub created_at: u64,
    /// Ordered tags.
    pub tags: Vec<Tag>,
    /// Event content body. Ciphertext for encrypted kinds.
    pub content: String,
    /// Schnorr signature over the event hash. Empty for unsigned rumors.
    #[serde(default)]
    pub sig: String,
}

/// Reference to another event found in an `e` tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRef {
    pub id: String,
    pub relay: Option<String>,
    pub marker: Option<String>,
}

/// Reference to an addressable event found in an `a` tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressRef {
    pub address: String,
    pub relay: Option<String>,
    pub marker: Option<String>,
}

/// A structural link from one event to another, in tag order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagTarget {
    Event(EventRef),
    Address(AddressRef),
}

impl Event {
    /// Parse a single event from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn tag_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.tags
            .iter()
            .filter(move |t| t.name() == Some(name))
            .filter_map(Tag::value)
    }

    pub fn first_tag_value<'a>(&'a self, name: &str) -> Option<&'a str> {
        self.tags
            .iter()
            .find(|t| t.name() == Some(name))
            .and_then(Tag::value)
    }

    /// The `d` tag value, or the empty string for replaceable kinds without one.
    pub fn d_tag(&self) -> &str {
        self.first_tag_value("d").unwrap_or("")
    }

    pub fn e_tags(&self) -> Vec<EventRef> {
        self.tags
            .iter()
            .filter(|t| t.name() == Some("e"))
            .filter_map(|t| {
                t.value().map(|id| EventRef {
                    id: id.to_string(),
                    relay: t.relay_hint().map(str::to_string),
                    marker: t.get(3).filter(|m| !m.is_empty()).map(str::to_string),
                })
            })
            .collect()
    }

    pub fn a_tags(&self) -> Vec<AddressRef> {
        self.tags
            .iter()
            .filter(|t| t.name() == Some("a"))
            .filter_map(|t| {
                t.value().map(|address| AddressRef {
                    address: address.to_string(),
                    relay: t.relay_hint().map(str::to_string),
                    marker: t.get(3).filter(|m| !m.is_empty()).map(str::to_string),
                })
            })
            .collect()
    }

    pub fn p_tags(&self) -> Vec<&str> {
        self.tag_values("p").collect()
    }

    /// Every `e` and `a` link in tag order.
    pub fn tag_targets(&self) -> Vec<TagTarget> {
        let mut out = Vec::new();
        for t in &self.tags {
            let (Some(name), Some(value)) = (t.name(), t.value()) else {
                continue;
            };
            let relay = t.relay_hint().map(str::to_string);
            let marker = t.get(3).filter(|m| !m.is_empty()).map(str::to_string);
            match name {
                "e" => out.push(TagTarget::Event(EventRef {
                    id: value.to_string(),
                    relay,
                    marker,
                })),
                "a" => out.push(TagTarget::Address(AddressRef {
                    address: value.to_string(),
                    relay,
                    marker,
                })),
                _ => {}
            }
        }
        out
    }

    /// Tag indices referenced inline as `#[i]` (NIP-08 mentions).
    fn inline_tag_indices(&self) -> Vec<usize> {
        let mut out = Vec::new();
        let mut rest = self.content.as_str();
        while let Some(start) = rest.find("#[") {
            let after = &rest[start + 2..];
            match after.find(']') {
                Some(end) => {
                    if let Ok(idx) = after[..end].parse::<usize>() {
                        out.push(idx);
                    }
                    rest = &after[end..];
                }
                None => break,
            }
        }
        out
    }

    /// `e`/`a` links minus citations: tags marked `mention` and tags cited
    /// inline as `#[i]`.
    pub fn tags_without_citations(&self) -> Vec<TagTarget> {
        let cited = self.inline_tag_indices();
        let mut out = Vec::new();
        for (idx, t) in self.tags.iter().enumerate() {
            if cited.contains(&idx) {
                continue;
            }
            if t.get(3) == Some("mention") {
                continue;
            }
            let (Some(name), Some(value)) = (t.name(), t.value()) else {
                continue;
            };
            let relay = t.relay_hint().map(str::to_string);
            let marker = t.get(3).filter(|m| !m.is_empty()).map(str::to_string);
            match name {
                "e" => out.push(TagTarget::Event(EventRef {
                    id: value.to_string(),
                    relay,
                    marker,
                })),
                "a" => out.push(TagTarget::Address(AddressRef {
                    address: value.to_string(),
                    relay,
                    marker,
                })),
                _ => {}
            }
        }
        out
    }

    /// Pubkeys cited in the body, either by a `mention` marker or inline.
    pub fn cited_pubkeys(&self) -> Vec<&str> {
        let cited = self.inline_tag_indices();
        self.tags
            .iter()
            .enumerate()
            .filter(|(idx, t)| {
                t.name() == Some("p") && (cited.contains(idx) || t.get(3) == Some("mention"))
            })
            .filter_map(|(_, t)| t.value())
            .collect()
    }

    /// Event ids cited in the body, either by a `mention` marker or inline.
    pub fn cited_event_ids(&self) -> Vec<&str> {
        let cited = self.inline_tag_indices();
        self.tags
            .iter()
            .enumerate()
            .filter(|(idx, t)| {
                t.name() == Some("e") && (cited.contains(idx) || t.get(3) == Some("mention"))
            })
            .filter_map(|(_, t)| t.value())
            .collect()
    }

    /// Thread root explicitly marked by the author (`e` tag with the `root`
    /// marker, or the uppercase `E` scope tag of comments).
    pub fn marked_root(&self) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.name() == Some("e") && t.get(3) == Some("root"))
            .and_then(Tag::value)
            .or_else(|| self.first_tag_value("E"))
    }

    pub fn is_tagged_user(&self, pubkey: &str) -> bool {
        self.tag_values("p").any(|p| p == pubkey)
    }

    /// NIP-40 expiry timestamp.
    pub fn expiration(&self) -> Option<u64> {
        self.first_tag_value("expiration")
            .and_then(|v| v.trim().parse().ok())
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.expiration().is_some_and(|exp| exp < now)
    }

    pub fn published_at(&self) -> Option<u64> {
        self.first_tag_value("published_at")
            .and_then(|v| v.trim().parse().ok())
    }

    /// Event embedded as JSON in the content (reposts and approvals).
    pub fn embedded_event(&self) -> Option<Event> {
        let body = self.content.trim();
        if !body.starts_with('{') {
            return None;
        }
        serde_json::from_str(body).ok()
    }

    /// Zap request embedded in a zap receipt's `description` tag.
    pub fn embedded_zap_request(&self) -> Option<Event> {
        self.first_tag_value("description")
            .and_then(|d| serde_json::from_str(d).ok())
    }
}

/// NIP-01: kinds whose identity is `(kind, pubkey)`.
pub fn is_replaceable_kind(kind: u32) -> bool {
    kind == 0 || kind == 3 || (10_000..20_000).contains(&kind)
}

/// NIP-01: kinds whose identity is `(kind, pubkey, d-tag)`.
pub fn is_parameterized_kind(kind: u32) -> bool {
    (30_000..40_000).contains(&kind)
}

/// Either of the two addressable families.
pub fn is_addressable_kind(kind: u32) -> bool {
    is_replaceable_kind(kind) || is_parameterized_kind(kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_with(tags: Vec<Vec<&str>>, content: &str) -> Event {
        Event {
            id: "aa".repeat(32),
            pubkey: "bb".repeat(32),
            kind: 1,
            created_at: 10,
            tags: tags
                .into_iter()
                .map(|t| Tag(t.into_iter().map(String::from).collect()))
                .collect(),
            content: content.into(),
            sig: String::new(),
        }
    }

    #[test]
    fn parses_json_and_defaults_missing_sig() {
        let ev = Event::from_json(
            r#"{"id":"01","pubkey":"02","kind":14,"created_at":5,"tags":[["p","03"]],"content":"hi"}"#,
        )
        .unwrap();
        assert_eq!(ev.kind, 14);
        assert!(ev.sig.is_empty());
        assert_eq!(ev.p_tags(), vec!["03"]);
    }

    #[test]
    fn citations_are_dropped_from_reply_targets() {
        let ev = event_with(
            vec![
                vec!["e", "root", "", "root"],
                vec!["e", "quoted", "", "mention"],
                vec!["e", "inline"],
                vec!["a", "30023:cc:slug", "wss://r"],
            ],
            "look at #[2]",
        );
        let targets = ev.tags_without_citations();
        assert_eq!(targets.len(), 2);
        assert!(matches!(&targets[0], TagTarget::Event(r) if r.id == "root"));
        assert!(matches!(&targets[1], TagTarget::Address(a) if a.relay.as_deref() == Some("wss://r")));
        assert_eq!(ev.cited_event_ids(), vec!["quoted", "inline"]);
    }

    #[test]
    fn marked_root_prefers_root_marker_then_scope_tag() {
        let ev = event_with(vec![vec!["e", "x", "", "reply"], vec!["e", "r", "", "root"]], "");
        assert_eq!(ev.marked_root(), Some("r"));
        let comment = event_with(vec![vec!["E", "scope"]], "");
        assert_eq!(comment.marked_root(), Some("scope"));
        assert_eq!(event_with(vec![], "").marked_root(), None);
    }

    #[test]
    fn expiration_and_published_at() {
        let ev = event_with(vec![vec!["expiration", "100"], vec!["published_at", " 7 "]], "");
        assert!(ev.is_expired(101));
        assert!(!ev.is_expired(100));
        assert_eq!(ev.published_at(), Some(7));
    }

    #[test]
    fn first_tag_value_outlives_the_name() {
        let ev = event_with(vec![vec!["d", "post"], vec!["d", "other"]], "");
        let value = {
            let name = String::from("d");
            ev.first_tag_value(&name)
        };
        assert_eq!(value, Some("post"));
        assert_eq!(ev.first_tag_value("title"), None);
    }

    #[test]
    fn kind_ranges() {
        assert!(is_replaceable_kind(0));
        assert!(is_replaceable_kind(10_002));
        assert!(!is_replaceable_kind(1));
        assert!(is_parameterized_kind(30_023));
        assert!(!is_addressable_kind(23_333));
    }

    #[test]
    fn embedded_zap_request_is_read_from_description() {
        let inner = event_with(vec![], "zap!");
        let json = serde_json::to_string(&inner).unwrap();
        let receipt = event_with(vec![vec!["description", &json]], "");
        assert_eq!(receipt.embedded_zap_request().unwrap().content, "zap!");
    }
}
