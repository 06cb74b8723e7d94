//! Decryption hook for private content.
//!
//! The graph stores ciphertext as received. Callers hand in a [`Decryptor`]
//! when they want plaintext; results are memoized per event id.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::error::{GraphError, Result};
use crate::event::Event;
use crate::kind::EventKind;
use crate::note::Note;
use crate::store::{channel_key_of, GraphStore};

pub type DecryptFuture<'a> = Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>>;

/// External decrypt capability (NIP-04/NIP-44, a signer app, ...).
pub trait Decryptor: Send + Sync {
    /// Decrypt `ciphertext` exchanged with `counterparty`.
    fn decrypt<'a>(&'a self, ciphertext: &'a str, counterparty: &'a str) -> DecryptFuture<'a>;
}

#[derive(Default)]
pub struct DecryptionCache {
    plain: DashMap<String, String>,
}

impl DecryptionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cached(&self, event_id: &str) -> Option<String> {
        self.plain.get(event_id).map(|p| p.value().clone())
    }

    /// Plaintext of `note`, decrypting on first use. `me` picks the
    /// counterparty of direct messages the local account sent.
    pub async fn decrypt(
        &self,
        note: &Note,
        decryptor: &dyn Decryptor,
        me: Option<&str>,
    ) -> Option<String> {
        let event = note.event()?;
        if let Some(hit) = self.cached(&event.id) {
            return Some(hit);
        }
        let counterparty = counterparty(&event, me);
        let plain = decryptor.decrypt(&event.content, &counterparty).await?;
        self.plain.insert(event.id.clone(), plain.clone());
        Some(plain)
    }

    pub fn forget(&self, event_id: &str) {
        self.plain.remove(event_id);
    }

    pub fn len(&self) -> usize {
        self.plain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plain.is_empty()
    }
}

fn counterparty(event: &Event, me: Option<&str>) -> String {
    let sent_by_me = me.is_some_and(|me| me == event.pubkey);
    let dm = EventKind::from_kind(event.kind) == Some(EventKind::PrivateDm);
    if dm && sent_by_me {
        if let Some(recipient) = event.first_tag_value("p") {
            return recipient.to_string();
        }
    }
    event.pubkey.clone()
}

/// Parse a decrypted payload into the event it carries.
pub fn parse_inner(plaintext: &str) -> Result<Event> {
    Event::from_json(plaintext).map_err(|e| GraphError::Decryption(e.to_string()))
}

impl GraphStore {
    /// Open a seal or gift wrap and ingest what it carries.
    ///
    /// The wrap is linked to the carried event so deleting the wrap removes
    /// it too. A seal's payload must be authored by the seal's signer; it is
    /// unsigned, so it is ingested as already verified.
    pub async fn unwrap_gift(
        &self,
        note: &Arc<Note>,
        decryptor: &dyn Decryptor,
    ) -> Option<Arc<Note>> {
        let event = note.event()?;
        let kind = EventKind::from_kind(event.kind).filter(|k| k.is_wrap())?;
        let plain = self.decrypted.decrypt(note, decryptor, None).await?;
        let inner = match parse_inner(&plain) {
            Ok(inner) => inner,
            Err(err) => {
                debug!(id = %event.id, error = %err, "unwrapped payload dropped");
                return None;
            }
        };
        let sealed = kind == EventKind::Seal;
        if sealed && inner.pubkey != event.pubkey {
            debug!(id = %event.id, "sealed event signed by someone else dropped");
            return None;
        }
        let inner_id = inner.id.clone();
        self.wraps.insert(event.id.clone(), inner_id.clone());
        self.consume(inner, None, sealed);
        self.get_note_if_exists(&inner_id)
    }

    /// Decrypt a draft and file its event where the finished event would
    /// appear, without publishing it as a reply.
    pub async fn open_draft(
        &self,
        note: &Arc<Note>,
        decryptor: &dyn Decryptor,
    ) -> Option<Arc<Note>> {
        let event = note.event()?;
        if EventKind::from_kind(event.kind) != Some(EventKind::DraftWrap) {
            return None;
        }
        let plain = self.decrypted.decrypt(note, decryptor, None).await?;
        let inner = match parse_inner(&plain) {
            Ok(inner) => Arc::new(inner),
            Err(err) => {
                debug!(id = %event.id, error = %err, "draft payload dropped");
                return None;
            }
        };
        let kind = EventKind::from_kind(inner.kind)?;
        let draft = self.get_or_create_note(&inner.id);
        if !draft.has_event() {
            let parents = self.compute_reply_to(kind, &inner);
            let author = self.get_or_create_user(&inner.pubkey);
            draft.load_event(Arc::clone(&inner), author, parents);
        }
        match kind {
            EventKind::PrivateDm | EventKind::ChatMessage | EventKind::ChatFileHeader => {
                self.add_to_rooms(&draft, &inner);
            }
            EventKind::ChannelMessage | EventKind::LiveChatMessage | EventKind::EphemeralChat => {
                if let Some(key) = channel_key_of(kind, &inner, None) {
                    self.get_or_create_channel(&key).add_note(&draft, None);
                }
            }
            _ => {}
        }
        self.drafts.insert(event.id.clone(), Arc::clone(&draft));
        Some(draft)
    }
}
