//! The graph store: ingestion, relationship wiring and deletion.
//!
//! [`GraphStore::consume`] is the only write entry point for inbound events.
//! It resolves the kind, then routes the event through one of three shapes:
//!
//! - regular events load into a note keyed by id and push reverse edges onto
//!   their parents;
//! - addressable events load a version note keyed by id and then compete for
//!   the canonical slot keyed by address, newest `created_at` wins;
//! - structural events (deletions, channel administration, wallet payments)
//!   have dedicated handlers.
//!
//! Every rejection (unsupported kind, failed verification, spam, duplicate,
//! deleted) degrades to `false`. Nothing here returns an error.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, trace};

use crate::channel::{Channel, ChannelKey};
use crate::chatroom::ChatroomKey;
use crate::config::StoreConfig;
use crate::decrypt::DecryptionCache;
use crate::deletion::DeletionIndex;
use crate::event::{Event, Tag, TagTarget};
use crate::flow::{FlowKind, LiveEvents};
use crate::hints::HintIndex;
use crate::keys::{is_hex_key, Address, HexKey};
use crate::kind::{EventKind, Shape};
use crate::note::{Note, NoteKey};
use crate::soft_index::SoftIndex;
use crate::spam::SpamGuard;
use crate::user::User;
use crate::verify::{AcceptAll, SchnorrVerifier, Verifier};

/// Kind of the live activity a live chat message belongs to.
const LIVE_ACTIVITY_KIND: u32 = 30311;
/// Kind of the community definition an approval points at.
const COMMUNITY_KIND: u32 = 34550;

/// Per-call ingestion options.
#[derive(Debug, Clone, Copy)]
struct Ingest<'a> {
    relay: Option<&'a str>,
    was_verified: bool,
    spam_check: bool,
}

/// Outcome of loading an addressable version.
enum Landed {
    /// Duplicate or rejected.
    Ignored,
    /// Stored as a version, but an equal or newer version owns the slot.
    Archived,
    /// Now the visible content of the returned slot.
    Current(Arc<Note>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub notes: usize,
    pub addressables: usize,
    pub users: usize,
    pub channels: usize,
    pub deletions: usize,
}

pub struct GraphStore {
    pub(crate) config: StoreConfig,
    verifier: Box<dyn Verifier>,
    pub(crate) users: SoftIndex<HexKey, User>,
    pub(crate) notes: SoftIndex<HexKey, Note>,
    pub(crate) addressables: SoftIndex<Address, Note>,
    pub(crate) channels: DashMap<ChannelKey, Arc<Channel>>,
    deletions: DeletionIndex,
    spam: SpamGuard,
    hints: HintIndex,
    /// Pending wallet payment request id -> the note it pays for.
    payments: DashMap<HexKey, Arc<Note>>,
    /// Wrap (seal/gift wrap) id -> id of the event it carried.
    pub(crate) wraps: DashMap<HexKey, HexKey>,
    /// Draft event id -> the decrypted inner note.
    pub(crate) drafts: DashMap<HexKey, Arc<Note>>,
    pub(crate) decrypted: DecryptionCache,
    live: LiveEvents,
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl GraphStore {
    pub fn new(config: StoreConfig) -> Self {
        let verifier: Box<dyn Verifier> = if config.verify_signatures {
            Box::new(SchnorrVerifier)
        } else {
            Box::new(AcceptAll)
        };
        Self::with_verifier(config, verifier)
    }

    pub fn with_verifier(config: StoreConfig, verifier: Box<dyn Verifier>) -> Self {
        Self {
            spam: SpamGuard::new(config.spam_recent_capacity, config.spam_offender_capacity),
            hints: HintIndex::new(config.relay_hint_capacity),
            live: LiveEvents::new(config.bundle_delay),
            config,
            verifier,
            users: SoftIndex::new(),
            notes: SoftIndex::new(),
            addressables: SoftIndex::new(),
            channels: DashMap::new(),
            deletions: DeletionIndex::new(),
            payments: DashMap::new(),
            wraps: DashMap::new(),
            drafts: DashMap::new(),
            decrypted: DecryptionCache::new(),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn spam(&self) -> &SpamGuard {
        &self.spam
    }

    pub fn deletions(&self) -> &DeletionIndex {
        &self.deletions
    }

    pub fn hints(&self) -> &HintIndex {
        &self.hints
    }

    pub fn live(&self) -> &LiveEvents {
        &self.live
    }

    pub fn decryption_cache(&self) -> &DecryptionCache {
        &self.decrypted
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            notes: self.notes.len(),
            addressables: self.addressables.len(),
            users: self.users.len(),
            channels: self.channels.len(),
            deletions: self.deletions.len(),
        }
    }

    pub fn get_or_create_user(&self, pubkey: &str) -> Arc<User> {
        self.users
            .get_or_create(&pubkey.to_string(), |k| User::new(k.clone()))
    }

    pub fn get_user_if_exists(&self, pubkey: &str) -> Option<Arc<User>> {
        self.users.get(&pubkey.to_string())
    }

    pub fn get_or_create_note(&self, id: &str) -> Arc<Note> {
        self.notes
            .get_or_create(&id.to_string(), |k| Note::new(NoteKey::Id(k.clone())))
    }

    pub fn get_or_create_addressable(&self, address: &Address) -> Arc<Note> {
        self.addressables
            .get_or_create(address, |a| Note::new(NoteKey::Address(a.clone())))
    }

    pub fn get_addressable_if_exists(&self, address: &Address) -> Option<Arc<Note>> {
        self.addressables.get(address)
    }

    /// Look up a note by event id or by `kind:pubkey:d-tag` address.
    pub fn get_note_if_exists(&self, key: &str) -> Option<Arc<Note>> {
        if key.contains(':') {
            return Address::parse(key)
                .ok()
                .and_then(|a| self.addressables.get(&a));
        }
        self.notes.get(&key.to_string())
    }

    /// Resolve an id or address, creating a forward reference when absent.
    /// `None` when `key` is neither.
    pub fn check_get_or_create_note(&self, key: &str) -> Option<Arc<Note>> {
        if key.contains(':') {
            return Address::parse(key)
                .ok()
                .map(|a| self.get_or_create_addressable(&a));
        }
        is_hex_key(key).then(|| self.get_or_create_note(&key.to_ascii_lowercase()))
    }

    pub fn get_or_create_channel(&self, key: &ChannelKey) -> Arc<Channel> {
        if let Some(existing) = self.channels.get(key) {
            return Arc::clone(existing.value());
        }
        Arc::clone(
            self.channels
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Channel::new(key.clone())))
                .value(),
        )
    }

    pub fn get_channel_if_exists(&self, key: &ChannelKey) -> Option<Arc<Channel>> {
        self.channels.get(key).map(|c| Arc::clone(c.value()))
    }

    /// All canonical slots of `kind`, optionally restricted to one author.
    pub fn addressables_of_kind(&self, kind: u32, pubkey: Option<&str>) -> Vec<Arc<Note>> {
        self.addressables.range_filter(
            &Address::min_key(kind, pubkey),
            &Address::max_key(kind, pubkey),
            |_, note| note.has_event(),
        )
    }

    /// Ingest one event. Returns `true` iff the graph changed.
    pub fn consume(&self, event: Event, relay: Option<&str>, was_verified: bool) -> bool {
        let Some(kind) = EventKind::from_kind(event.kind) else {
            debug!(id = %event.id, kind = event.kind, "unsupported kind dropped");
            return false;
        };
        let ctx = Ingest {
            relay,
            was_verified,
            spam_check: true,
        };
        self.just_consume(kind, Arc::new(event), ctx)
    }

    /// Ingest an event carried inside another one (boosted post, approved
    /// post, zap request). Skips the duplicate-post check.
    fn consume_satellite(&self, event: Event, relay: Option<&str>) -> bool {
        let Some(kind) = EventKind::from_kind(event.kind) else {
            return false;
        };
        let ctx = Ingest {
            relay,
            was_verified: false,
            spam_check: false,
        };
        self.just_consume(kind, Arc::new(event), ctx)
    }

    fn just_consume(&self, kind: EventKind, event: Arc<Event>, ctx: Ingest<'_>) -> bool {
        if self.deletions.has_been_deleted(&event) {
            debug!(id = %event.id, kind = event.kind, "deleted event dropped");
            return false;
        }
        self.hints.observe(&event, ctx.relay);
        match kind.shape() {
            Shape::Regular => self.consume_regular_kind(kind, &event, ctx),
            Shape::Addressable => self.consume_addressable_kind(kind, &event, ctx),
            Shape::Structural => self.consume_structural(kind, &event, ctx),
        }
    }

    fn verified(&self, event: &Event, ctx: Ingest<'_>) -> bool {
        if ctx.was_verified || self.verifier.verify(event) {
            return true;
        }
        debug!(id = %event.id, kind = event.kind, "event failed verification");
        false
    }

    /// Relay bookkeeping for `note`. The author's usage counter only moves
    /// when the relay is new for this note, so replays leave it alone.
    fn note_relay(&self, note: &Note, author: &User, event: &Event, relay: Option<&str>) {
        if let Some(relay) = relay {
            if note.add_relay(relay) {
                author.add_relay_being_used(relay, event.created_at);
            }
        }
    }

    /// Shared regular-event path. Returns the loaded note and its parents,
    /// or `None` when nothing was loaded.
    fn consume_regular(
        &self,
        kind: EventKind,
        event: &Arc<Event>,
        ctx: Ingest<'_>,
    ) -> Option<(Arc<Note>, Vec<Arc<Note>>)> {
        let note = self.get_or_create_note(&event.id);
        let author = self.get_or_create_user(&event.pubkey);
        self.note_relay(&note, &author, event, ctx.relay);
        if note.has_event() {
            return None;
        }
        // Only signed posts may land in the offender registry.
        if !self.verified(event, ctx) {
            return None;
        }
        if ctx.spam_check && kind.is_spam_checkable() && self.spam.is_spam(event, ctx.relay) {
            return None;
        }
        let parents = self.compute_reply_to(kind, event);
        if !note.load_event(Arc::clone(event), author, parents.clone()) {
            return None;
        }
        trace!(id = %event.id, kind = event.kind, parents = parents.len(), "note loaded");
        self.live.new_note(&note);
        Some((note, parents))
    }

    fn consume_regular_kind(&self, kind: EventKind, event: &Arc<Event>, ctx: Ingest<'_>) -> bool {
        use EventKind::*;
        if kind == ZapReceipt {
            return self.consume_zap_receipt(event, ctx);
        }
        let Some((note, parents)) = self.consume_regular(kind, event, ctx) else {
            return false;
        };
        match kind {
            Repost | GenericRepost | CommunityApproval => {
                for parent in &parents {
                    parent.add_boost(&note);
                }
                if let Some(inner) = event.embedded_event() {
                    self.consume_satellite(inner, ctx.relay);
                }
            }
            Reaction => {
                for parent in &parents {
                    parent.add_reaction(&note);
                }
            }
            Report => {
                if parents.is_empty() {
                    for pk in event.p_tags().into_iter().filter(|pk| is_hex_key(pk)) {
                        self.get_or_create_user(pk).add_report(&note);
                    }
                } else {
                    for parent in &parents {
                        parent.add_report(&note);
                    }
                }
            }
            ZapRequest => {
                for parent in &parents {
                    parent.add_zap(&note, None);
                }
                for pk in event.p_tags().into_iter().filter(|pk| is_hex_key(pk)) {
                    self.get_or_create_user(pk).add_zap(&note, None);
                }
            }
            PrivateDm | ChatMessage | ChatFileHeader => {
                for parent in &parents {
                    parent.add_reply(&note);
                }
                self.add_to_rooms(&note, event);
            }
            ChannelMessage | LiveChatMessage | EphemeralChat => {
                for parent in &parents {
                    parent.add_reply(&note);
                }
                if let Some(key) = channel_key_of(kind, event, ctx.relay) {
                    self.get_or_create_channel(&key).add_note(&note, ctx.relay);
                }
            }
            TextNoteModification => {
                for id in event.tag_values("e") {
                    if let Some(edited) = self.notes.get(&id.to_string()) {
                        edited.flows().invalidate(FlowKind::Edits);
                    }
                }
            }
            OtsAttestation | Seal | GiftWrap => {}
            _ => {
                for parent in &parents {
                    parent.add_reply(&note);
                }
            }
        }
        true
    }

    /// Zap receipts need their request on both sides of the pairing, so an
    /// unseen request embedded in the receipt is ingested first.
    fn consume_zap_receipt(&self, event: &Arc<Event>, ctx: Ingest<'_>) -> bool {
        let Some(request_event) = event.embedded_zap_request() else {
            debug!(id = %event.id, "zap receipt without embedded request dropped");
            return false;
        };
        if !is_hex_key(&request_event.id) {
            return false;
        }
        let request = self.get_or_create_note(&request_event.id);
        let zapped_users: Vec<String> = request_event
            .p_tags()
            .into_iter()
            .filter(|pk| is_hex_key(pk))
            .map(str::to_string)
            .collect();
        if !request.has_event() {
            self.consume_satellite(request_event, ctx.relay);
        }
        if request.kind() != Some(EventKind::ZapRequest) {
            debug!(id = %event.id, request = %request.id_hex(), "zap receipt without a valid request dropped");
            return false;
        }
        let Some((receipt, parents)) = self.consume_regular(EventKind::ZapReceipt, event, ctx)
        else {
            return false;
        };
        for parent in &parents {
            parent.add_zap(&request, Some(&receipt));
        }
        for pk in &zapped_users {
            self.get_or_create_user(pk).add_zap(&request, Some(&receipt));
        }
        true
    }

    /// Load an addressable version and let it compete for its slot.
    fn consume_addressable(&self, kind: EventKind, event: &Arc<Event>, ctx: Ingest<'_>) -> Landed {
        let Some(address) = Address::of(event) else {
            return Landed::Ignored;
        };
        let slot = self.get_or_create_addressable(&address);
        let version = self.get_or_create_note(&event.id);
        let author = self.get_or_create_user(&event.pubkey);
        self.note_relay(&version, &author, event, ctx.relay);
        if let Some(relay) = ctx.relay {
            slot.add_relay(relay);
        }
        if slot.event().is_some_and(|current| current.id == event.id) || version.has_event() {
            return Landed::Ignored;
        }
        if !self.verified(event, ctx) {
            return Landed::Ignored;
        }
        if ctx.spam_check && kind.is_spam_checkable() && self.spam.is_spam(event, ctx.relay) {
            return Landed::Ignored;
        }
        if !version.load_event(Arc::clone(event), Arc::clone(&author), Vec::new()) {
            return Landed::Ignored;
        }
        // Edges that arrived for this version id belong to the address.
        version.move_all_references_to(&slot);

        if slot
            .event()
            .is_some_and(|current| current.created_at >= event.created_at)
        {
            trace!(id = %event.id, address = %address, "older version archived");
            return Landed::Archived;
        }
        let parents = self.compute_reply_to(kind, event);
        if !slot.replace_if_newer(Arc::clone(event), author, parents) {
            return Landed::Archived;
        }
        self.live.new_note(&slot);
        Landed::Current(slot)
    }

    fn consume_addressable_kind(
        &self,
        kind: EventKind,
        event: &Arc<Event>,
        ctx: Ingest<'_>,
    ) -> bool {
        use EventKind::*;
        if kind == DraftWrap && event.content.is_empty() {
            trace!(id = %event.id, "empty draft ignored");
            return false;
        }
        let slot = match self.consume_addressable(kind, event, ctx) {
            Landed::Ignored => return false,
            Landed::Archived => return true,
            Landed::Current(slot) => slot,
        };
        let author = self.get_or_create_user(&event.pubkey);
        match kind {
            Metadata => {
                author.update_metadata(Arc::clone(event));
            }
            ContactList => {
                author.update_contact_list(Arc::clone(event));
            }
            Status => {
                author.add_status(&slot);
            }
            LiveActivity => {
                if let Some(address) = slot.address() {
                    let channel = self.get_or_create_channel(&ChannelKey::Live(address.clone()));
                    let creator = live_host(event)
                        .map(|pk| self.get_or_create_user(pk))
                        .unwrap_or(author);
                    channel.update_info(&creator, event, &slot);
                    if let Some(relay) = ctx.relay {
                        channel.add_note(&slot, Some(relay));
                    }
                }
            }
            _ => {}
        }
        true
    }

    fn consume_structural(&self, kind: EventKind, event: &Arc<Event>, ctx: Ingest<'_>) -> bool {
        use EventKind::*;
        match kind {
            Deletion => self.consume_deletion(event, ctx),
            ChannelCreate => self.consume_channel_create(event, ctx),
            ChannelMetadata => self.consume_channel_metadata(event, ctx),
            ChannelHideMessage | ChannelMuteUser => {
                trace!(id = %event.id, kind = event.kind, "channel moderation event has no graph effect");
                false
            }
            PaymentRequest => self.consume_regular(kind, event, ctx).is_some(),
            PaymentResponse => self.consume_payment_response(event, ctx),
            _ => false,
        }
    }

    fn consume_deletion(&self, event: &Arc<Event>, ctx: Ingest<'_>) -> bool {
        let note = self.get_or_create_note(&event.id);
        let author = self.get_or_create_user(&event.pubkey);
        self.note_relay(&note, &author, event, ctx.relay);
        if note.has_event() || !self.verified(event, ctx) {
            return false;
        }
        if !note.load_event(Arc::clone(event), author, Vec::new()) {
            return false;
        }
        self.apply_deletion(event);
        true
    }

    fn consume_channel_create(&self, event: &Arc<Event>, ctx: Ingest<'_>) -> bool {
        let note = self.get_or_create_note(&event.id);
        let author = self.get_or_create_user(&event.pubkey);
        self.note_relay(&note, &author, event, ctx.relay);
        if note.has_event() || !self.verified(event, ctx) {
            return false;
        }
        if !note.load_event(Arc::clone(event), Arc::clone(&author), Vec::new()) {
            return false;
        }
        let channel = self.get_or_create_channel(&ChannelKey::Public(event.id.clone()));
        channel.update_info(&author, event, &note);
        channel.add_note(&note, ctx.relay);
        self.live.new_note(&note);
        true
    }

    fn consume_channel_metadata(&self, event: &Arc<Event>, ctx: Ingest<'_>) -> bool {
        let Some(root) = channel_root(event).filter(|r| is_hex_key(r)) else {
            return false;
        };
        let note = self.get_or_create_note(&event.id);
        let author = self.get_or_create_user(&event.pubkey);
        self.note_relay(&note, &author, event, ctx.relay);
        if note.has_event() || !self.verified(event, ctx) {
            return false;
        }
        if !note.load_event(Arc::clone(event), Arc::clone(&author), Vec::new()) {
            return false;
        }
        let channel = self.get_or_create_channel(&ChannelKey::Public(root));
        channel.update_info(&author, event, &note);
        channel.add_note(&note, ctx.relay);
        self.live.new_note(&note);
        true
    }

    fn consume_payment_response(&self, event: &Arc<Event>, ctx: Ingest<'_>) -> bool {
        let Some(request_id) = event.first_tag_value("e").map(str::to_string) else {
            return false;
        };
        let Some(zapped) = self.payments.get(&request_id).map(|z| Arc::clone(z.value())) else {
            debug!(id = %event.id, request = %request_id, "payment response for unknown request dropped");
            return false;
        };
        let Some((response, _)) = self.consume_regular(EventKind::PaymentResponse, event, ctx)
        else {
            return false;
        };
        let request = self.get_or_create_note(&request_id);
        zapped.add_zap_payment(&request, Some(&response));
        true
    }

    /// Load a wallet payment request paying for `zapped` and wait for its
    /// response.
    pub fn register_zap_payment(
        &self,
        request: Event,
        zapped: &Arc<Note>,
        relay: Option<&str>,
        was_verified: bool,
    ) -> bool {
        if EventKind::from_kind(request.kind) != Some(EventKind::PaymentRequest) {
            return false;
        }
        let event = Arc::new(request);
        if self.deletions.has_been_deleted(&event) {
            return false;
        }
        let ctx = Ingest {
            relay,
            was_verified,
            spam_check: false,
        };
        let note = match self.consume_regular(EventKind::PaymentRequest, &event, ctx) {
            Some((note, _)) => note,
            None => {
                let existing = self.get_or_create_note(&event.id);
                if !existing.has_event() {
                    return false;
                }
                existing
            }
        };
        self.payments.insert(event.id.clone(), Arc::clone(zapped));
        zapped.add_zap_payment(&note, None)
    }

    /// Record a deletion and unlink what it removes. Returns `false` when the
    /// deletion was already applied.
    ///
    /// Only the deleter's own events are removed, and never an addressable
    /// version newer than the deletion.
    pub fn apply_deletion(&self, deletion: &Arc<Event>) -> bool {
        if !self.deletions.add(deletion) {
            return false;
        }
        let mut removed = 0usize;
        for id in deletion.tag_values("e") {
            let Some(target) = self.notes.get(&id.to_string()) else {
                continue;
            };
            let Some(event) = target.event() else {
                continue;
            };
            if event.pubkey != deletion.pubkey {
                continue;
            }
            if let Some(address) = Address::of(&event) {
                if event.created_at > deletion.created_at {
                    continue;
                }
                if let Some(slot) = self.addressables.get(&address) {
                    if owned_and_not_newer(&slot, deletion) {
                        self.delete_note(&slot);
                        removed += 1;
                    }
                }
            }
            self.delete_note(&target);
            removed += 1;
        }

        let mut addresses = HashSet::new();
        for tag in deletion.tag_values("a") {
            let Ok(address) = Address::parse(tag) else {
                continue;
            };
            if address.pubkey != deletion.pubkey {
                continue;
            }
            if let Some(slot) = self.addressables.get(&address) {
                if owned_and_not_newer(&slot, deletion) {
                    self.delete_note(&slot);
                    removed += 1;
                }
            }
            addresses.insert(address);
        }
        if !addresses.is_empty() {
            let versions = self.notes.filter(|_, note| {
                note.event().is_some_and(|e| {
                    e.pubkey == deletion.pubkey
                        && e.created_at <= deletion.created_at
                        && Address::of(&e).is_some_and(|a| addresses.contains(&a))
                })
            });
            for version in versions {
                self.delete_note(&version);
                removed += 1;
            }
        }
        debug!(id = %deletion.id, removed, "deletion applied");
        true
    }

    /// Unlink a deleted note, the event it wrapped and its draft contents, then
    /// drop it from the indexes.
    fn delete_note(&self, note: &Arc<Note>) {
        self.detach(note);
        for child in note.remove_all_children() {
            child.remove_parent(note);
        }
        if let Some(event) = note.event() {
            if let Some((_, carried)) = self.wraps.remove(&event.id) {
                if let Some(carried) = self.notes.get(&carried) {
                    self.delete_note(&carried);
                }
            }
            if let Some((_, inner)) = self.drafts.remove(&event.id) {
                self.detach(&inner);
            }
            self.decrypted.forget(&event.id);
        }
        self.unindex(note);
        note.flows().invalidate_all();
        self.live.deleted_note(note);
    }

    /// Drop `note` from whichever primary index holds it.
    pub(crate) fn unindex(&self, note: &Arc<Note>) -> bool {
        match note.key() {
            NoteKey::Id(id) => self.notes.remove_if_same(id, note),
            NoteKey::Address(address) => self.addressables.remove_if_same(address, note),
        }
    }

    /// Cut the edges from `note` to its parents and remove it from user,
    /// channel and chatroom collections.
    pub(crate) fn detach(&self, note: &Arc<Note>) {
        if let Some(event) = note.event() {
            let kind = EventKind::from_kind(event.kind);
            match kind {
                Some(EventKind::Report) => {
                    for pk in event.p_tags() {
                        if let Some(user) = self.get_user_if_exists(pk) {
                            user.remove_report(note);
                        }
                    }
                }
                Some(EventKind::Status) => {
                    if let Some(author) = note.author() {
                        author.remove_status(note);
                    }
                }
                Some(EventKind::ZapRequest) => {
                    for pk in event.p_tags() {
                        if let Some(user) = self.get_user_if_exists(pk) {
                            user.remove_zap(note);
                        }
                    }
                }
                Some(EventKind::PaymentRequest) => {
                    self.payments.remove(&event.id);
                }
                Some(EventKind::PrivateDm | EventKind::ChatMessage | EventKind::ChatFileHeader) => {
                    for member in room_members(&event) {
                        if let Some(user) = self.get_user_if_exists(&member) {
                            for room in user.chatrooms() {
                                room.remove_message(note);
                            }
                        }
                    }
                }
                _ => {}
            }
            if let Some(kind) = kind {
                for channel in self.channels_of(kind, &event) {
                    channel.remove_note(note);
                }
            }
        }
        for parent in note.reply_to() {
            parent.remove_note(note);
        }
    }

    fn channels_of(&self, kind: EventKind, event: &Event) -> Vec<Arc<Channel>> {
        if kind == EventKind::EphemeralChat {
            let room = event.d_tag();
            return self
                .channels
                .iter()
                .filter(|c| matches!(c.key(), ChannelKey::Ephemeral { room: r, .. } if r == room))
                .map(|c| Arc::clone(c.value()))
                .collect();
        }
        channel_key_of(kind, event, None)
            .and_then(|key| self.get_channel_if_exists(&key))
            .into_iter()
            .collect()
    }

    /// File a private message into every member's room with the others.
    pub(crate) fn add_to_rooms(&self, note: &Arc<Note>, event: &Event) {
        let members = room_members(event);
        for member in &members {
            let mut others = ChatroomKey(members.clone()).without(member);
            if others.0.is_empty() {
                others = ChatroomKey::new([member.clone()]);
            }
            self.get_or_create_user(member)
                .chatroom(&others)
                .add_message(note);
        }
    }

    /// Parents of a freshly loaded event, by kind.
    pub(crate) fn compute_reply_to(&self, kind: EventKind, event: &Event) -> Vec<Arc<Note>> {
        use EventKind::*;
        let targets: Vec<TagTarget> = match kind {
            TextNote | Comment | LongText | Wiki | Poll | Picture | Highlight => {
                event.tags_without_citations()
            }
            Reaction | ZapRequest | Report | PollResponse => event.tag_targets(),
            Repost | GenericRepost => {
                let targets = event.tag_targets();
                let first_e = targets
                    .iter()
                    .find(|t| matches!(t, TagTarget::Event(_)))
                    .cloned();
                let first_a = targets
                    .iter()
                    .find(|t| matches!(t, TagTarget::Address(_)))
                    .cloned();
                first_e.into_iter().chain(first_a).collect()
            }
            ZapReceipt => {
                let mut targets = event.tag_targets();
                if let Some(request) = event.embedded_zap_request() {
                    targets.extend(request.a_tags().into_iter().map(TagTarget::Address));
                }
                targets
            }
            ChannelMessage => {
                let root = channel_root(event);
                event
                    .tags_without_citations()
                    .into_iter()
                    .filter(|t| !matches!(t, TagTarget::Event(r) if Some(&r.id) == root.as_ref()))
                    .collect()
            }
            LiveChatMessage => without_address_kind(event.tag_targets(), LIVE_ACTIVITY_KIND),
            CommunityApproval => without_address_kind(event.tag_targets(), COMMUNITY_KIND),
            PrivateDm | ChatMessage | ChatFileHeader => event
                .e_tags()
                .into_iter()
                .map(TagTarget::Event)
                .collect(),
            BadgeAward => event.a_tags().into_iter().map(TagTarget::Address).collect(),
            _ => Vec::new(),
        };
        self.resolve_targets(targets)
    }

    fn resolve_targets(&self, targets: Vec<TagTarget>) -> Vec<Arc<Note>> {
        let mut out: Vec<Arc<Note>> = Vec::new();
        for target in targets {
            let note = match target {
                TagTarget::Event(r) => is_hex_key(&r.id)
                    .then(|| self.get_or_create_note(&r.id.to_ascii_lowercase())),
                TagTarget::Address(r) => Address::parse(&r.address)
                    .ok()
                    .map(|a| self.get_or_create_addressable(&a)),
            };
            if let Some(note) = note {
                if !out.iter().any(|n| Arc::ptr_eq(n, &note)) {
                    out.push(note);
                }
            }
        }
        out
    }
}

fn owned_and_not_newer(slot: &Note, deletion: &Event) -> bool {
    slot.event()
        .is_some_and(|s| s.pubkey == deletion.pubkey && s.created_at <= deletion.created_at)
}

/// Channel id of a kind 41/42 event: the `root` marked `e` tag, else the
/// first `e` tag.
pub(crate) fn channel_root(event: &Event) -> Option<String> {
    event
        .marked_root()
        .or_else(|| event.first_tag_value("e"))
        .map(str::to_string)
}

pub(crate) fn channel_key_of(kind: EventKind, event: &Event, relay: Option<&str>) -> Option<ChannelKey> {
    use EventKind::*;
    match kind {
        ChannelCreate => Some(ChannelKey::Public(event.id.clone())),
        ChannelMetadata | ChannelMessage => channel_root(event).map(ChannelKey::Public),
        LiveChatMessage => event
            .a_tags()
            .into_iter()
            .filter_map(|a| Address::parse(&a.address).ok())
            .find(|a| a.kind == LIVE_ACTIVITY_KIND)
            .map(ChannelKey::Live),
        LiveActivity => Address::of(event).map(ChannelKey::Live),
        EphemeralChat => Some(ChannelKey::Ephemeral {
            room: event.d_tag().to_string(),
            relay: event
                .first_tag_value("relay")
                .or(relay)
                .unwrap_or_default()
                .to_string(),
        }),
        _ => None,
    }
}

fn without_address_kind(targets: Vec<TagTarget>, kind: u32) -> Vec<TagTarget> {
    targets
        .into_iter()
        .filter(|t| match t {
            TagTarget::Address(r) => Address::parse(&r.address).map_or(true, |a| a.kind != kind),
            TagTarget::Event(_) => true,
        })
        .collect()
}

/// Host of a live activity: the `p` tag with the `host` role.
fn live_host(event: &Event) -> Option<&str> {
    event
        .tags
        .iter()
        .find(|t| {
            t.name() == Some("p") && t.get(3).is_some_and(|role| role.eq_ignore_ascii_case("host"))
        })
        .and_then(Tag::value)
        .filter(|pk| is_hex_key(pk))
}

/// Author plus tagged recipients of a private message.
fn room_members(event: &Event) -> BTreeSet<HexKey> {
    let mut members: BTreeSet<HexKey> = event
        .p_tags()
        .into_iter()
        .filter(|pk| is_hex_key(pk))
        .map(str::to_string)
        .collect();
    members.insert(event.pubkey.clone());
    members
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn hex(n: u64) -> String {
        format!("{n:064x}")
    }

    pub(crate) fn pk(c: char) -> String {
        c.to_string().repeat(64)
    }

    pub(crate) fn ev(id: u64, author: char, kind: u32, created_at: u64, tags: Vec<Vec<String>>, content: &str) -> Event {
        Event {
            id: hex(id),
            pubkey: pk(author),
            kind,
            created_at,
            tags: tags.into_iter().map(Tag).collect(),
            content: content.into(),
            sig: String::new(),
        }
    }

    pub(crate) fn tag(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    pub(crate) fn store() -> GraphStore {
        GraphStore::new(StoreConfig {
            verify_signatures: false,
            ..StoreConfig::default()
        })
    }

    #[test]
    fn consume_is_idempotent() {
        let store = store();
        let post = ev(1, 'a', 1, 10, vec![], "hello");
        assert!(store.consume(post.clone(), Some("wss://r"), false));
        let usage = store.get_or_create_user(&pk('a')).relays_being_used();
        assert!(!store.consume(post, Some("wss://r"), false));
        assert_eq!(store.get_or_create_user(&pk('a')).relays_being_used(), usage);
        assert_eq!(store.stats().notes, 1);
    }

    #[test]
    fn unsupported_kinds_are_dropped() {
        let store = store();
        assert!(!store.consume(ev(1, 'a', 2, 10, vec![], ""), None, false));
        assert_eq!(store.stats().notes, 0);
    }

    #[test]
    fn replies_reactions_and_boosts_wire_to_parents() {
        let store = store();
        let root_id = hex(1);
        store.consume(ev(1, 'a', 1, 10, vec![], "root"), None, false);
        store.consume(ev(2, 'b', 1, 11, vec![tag(&["e", &root_id, "", "root"])], "reply"), None, false);
        store.consume(ev(3, 'c', 7, 12, vec![tag(&["e", &root_id])], "+"), None, false);
        store.consume(ev(4, 'd', 6, 13, vec![tag(&["e", &root_id])], ""), None, false);
        let root = store.get_note_if_exists(&root_id).unwrap();
        assert_eq!(root.replies().len(), 1);
        assert_eq!(root.reactions()["+"].len(), 1);
        assert_eq!(root.boosts().len(), 1);
        let reply = store.get_note_if_exists(&hex(2)).unwrap();
        assert!(Arc::ptr_eq(&reply.reply_to()[0], &root));
    }

    #[test]
    fn forward_references_fill_in_later() {
        let store = store();
        let parent_id = hex(1);
        store.consume(ev(2, 'b', 1, 11, vec![tag(&["e", &parent_id])], "early reply"), None, false);
        let stub = store.get_note_if_exists(&parent_id).unwrap();
        assert!(!stub.has_event());
        store.consume(ev(1, 'a', 1, 10, vec![], "late root"), None, false);
        assert!(Arc::ptr_eq(&stub, &store.get_note_if_exists(&parent_id).unwrap()));
        assert_eq!(stub.event().unwrap().content, "late root");
        assert_eq!(stub.replies().len(), 1);
    }

    #[test]
    fn addressable_slot_keeps_newest() {
        let store = store();
        let d = tag(&["d", "post"]);
        let v1 = ev(1, 'a', 30023, 10, vec![d.clone()], "first");
        let v2 = ev(2, 'a', 30023, 20, vec![d], "second");
        let address = Address::new(30023, pk('a'), "post");
        let reply = ev(3, 'b', 1, 30, vec![tag(&["e", &hex(1)])], "on v1");
        assert!(store.consume(v2, None, false));
        assert!(store.consume(reply, None, false));
        assert!(store.consume(v1, None, false));
        let slot = store.get_addressable_if_exists(&address).unwrap();
        assert_eq!(slot.event().unwrap().content, "second");
        assert_eq!(slot.replies().len(), 1);
    }

    #[test]
    fn deletions_only_remove_own_events() {
        let store = store();
        let target = hex(1);
        store.consume(ev(1, 'a', 1, 10, vec![], "mine"), None, false);
        store.consume(ev(2, 'b', 5, 20, vec![tag(&["e", &target])], ""), None, false);
        assert!(store.get_note_if_exists(&target).is_some());
        let deletion = ev(3, 'a', 5, 20, vec![tag(&["e", &target])], "");
        assert!(store.consume(deletion.clone(), None, false));
        assert!(store.get_note_if_exists(&target).is_none());
        assert!(!store.apply_deletion(&Arc::new(deletion)));
        assert!(!store.consume(ev(1, 'a', 1, 10, vec![], "mine"), None, false));
    }

    #[test]
    fn deleting_a_reply_unlinks_it() {
        let store = store();
        store.consume(ev(1, 'a', 1, 10, vec![], "root"), None, false);
        store.consume(ev(2, 'b', 1, 11, vec![tag(&["e", &hex(1)])], "reply"), None, false);
        store.consume(ev(3, 'b', 5, 12, vec![tag(&["e", &hex(2)])], ""), None, false);
        assert!(store.get_note_if_exists(&hex(1)).unwrap().replies().is_empty());
    }

    #[test]
    fn zap_receipt_ingests_embedded_request() {
        let store = store();
        store.consume(ev(1, 'a', 1, 10, vec![], "zap me"), None, false);
        let request = ev(2, 'b', 9734, 11, vec![tag(&["e", &hex(1)]), tag(&["p", &pk('a')])], "");
        let description = serde_json::to_string(&request).unwrap();
        let receipt = ev(
            3,
            'c',
            9735,
            12,
            vec![tag(&["e", &hex(1)]), tag(&["p", &pk('a')]), tag(&["description", &description])],
            "",
        );
        assert!(store.consume(receipt, None, false));
        let zaps = store.get_note_if_exists(&hex(1)).unwrap().zaps();
        assert_eq!(zaps.len(), 1);
        assert_eq!(zaps[0].request.id_hex(), hex(2));
        assert_eq!(zaps[0].receipt.as_ref().unwrap().id_hex(), hex(3));
        assert_eq!(store.get_or_create_user(&pk('a')).zaps().len(), 1);
    }

    #[test]
    fn receipt_with_wrong_request_kind_is_dropped() {
        let store = store();
        let bogus = ev(2, 'b', 1, 11, vec![], "not a request");
        let description = serde_json::to_string(&bogus).unwrap();
        let receipt = ev(3, 'c', 9735, 12, vec![tag(&["description", &description])], "");
        assert!(!store.consume(receipt, None, false));
    }

    #[test]
    fn reports_without_targets_land_on_users() {
        let store = store();
        store.consume(ev(1, 'b', 1984, 10, vec![tag(&["p", &pk('a'), "spam"])], ""), None, false);
        assert!(store.get_or_create_user(&pk('a')).has_reports_by(&pk('b')));
    }

    #[test]
    fn channel_lifecycle() {
        let store = store();
        let create = ev(1, 'a', 40, 10, vec![], r#"{"name":"rust"}"#);
        assert!(store.consume(create, Some("wss://r"), false));
        let key = ChannelKey::Public(hex(1));
        let message = ev(2, 'b', 42, 11, vec![tag(&["e", &hex(1), "", "root"])], "hi");
        assert!(store.consume(message, Some("wss://r"), false));
        let hijack = ev(3, 'b', 41, 12, vec![tag(&["e", &hex(1)])], r#"{"name":"spam"}"#);
        store.consume(hijack, None, false);
        let channel = store.get_channel_if_exists(&key).unwrap();
        assert_eq!(channel.name(), "rust");
        assert_eq!(channel.relays(), vec!["wss://r"]);
        assert!(channel.notes().iter().any(|n| n.id_hex() == hex(2)));
        let message = store.get_note_if_exists(&hex(2)).unwrap();
        assert!(message.reply_to().is_empty());
        assert!(!store.consume(ev(4, 'a', 43, 13, vec![tag(&["e", &hex(2)])], ""), None, false));
    }

    #[test]
    fn private_messages_fill_both_rooms() {
        let store = store();
        store.consume(ev(1, 'a', 4, 10, vec![tag(&["p", &pk('b')])], "ciphertext"), None, false);
        let alice_room = store
            .get_or_create_user(&pk('a'))
            .chatroom(&ChatroomKey::new([pk('b')]));
        let bob_room = store
            .get_or_create_user(&pk('b'))
            .chatroom(&ChatroomKey::new([pk('a')]));
        assert_eq!(alice_room.len(), 1);
        assert_eq!(bob_room.len(), 1);
    }

    #[test]
    fn metadata_updates_the_author() {
        let store = store();
        store.consume(ev(1, 'a', 0, 10, vec![], r#"{"name":"alice"}"#), None, false);
        store.consume(ev(2, 'a', 0, 5, vec![], r#"{"name":"stale"}"#), None, false);
        assert_eq!(store.get_or_create_user(&pk('a')).display_name(), "alice");
    }

    #[test]
    fn empty_drafts_are_ignored() {
        let store = store();
        assert!(!store.consume(ev(1, 'a', 31234, 10, vec![tag(&["d", "x"])], ""), None, false));
    }

    #[test]
    fn edits_invalidate_the_edited_note() {
        let store = store();
        store.consume(ev(1, 'a', 1, 10, vec![], "typo"), None, false);
        let note = store.get_note_if_exists(&hex(1)).unwrap();
        let mut edits = note.attach(FlowKind::Edits);
        store.consume(ev(2, 'a', 1010, 11, vec![tag(&["e", &hex(1)])], "fixed"), None, false);
        assert!(edits.has_changed());
        edits.mark_seen();
    }

    #[test]
    fn wallet_responses_need_a_registered_request() {
        let store = store();
        store.consume(ev(1, 'a', 1, 10, vec![], "pay me"), None, false);
        let zapped = store.get_note_if_exists(&hex(1)).unwrap();
        let stray = ev(9, 'w', 23195, 12, vec![tag(&["e", &hex(7)])], "");
        assert!(!store.consume(stray, None, false));

        let request = ev(2, 'b', 23194, 11, vec![], "ciphertext");
        assert!(store.register_zap_payment(request, &zapped, None, false));
        let response = ev(3, 'w', 23195, 12, vec![tag(&["e", &hex(2)])], "ciphertext");
        assert!(store.consume(response, None, false));
        let payments = zapped.zap_payments();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].receipt.as_ref().unwrap().id_hex(), hex(3));
    }

    #[test]
    fn live_activity_uses_host_as_creator() {
        let store = store();
        let activity = ev(
            1,
            'a',
            30311,
            10,
            vec![tag(&["d", "show"]), tag(&["title", "Live"]), tag(&["p", &pk('c'), "", "Host"])],
            "",
        );
        assert!(store.consume(activity, None, false));
        let key = ChannelKey::Live(Address::new(30311, pk('a'), "show"));
        let channel = store.get_channel_if_exists(&key).unwrap();
        assert_eq!(channel.creator().unwrap().pubkey(), pk('c'));
        assert_eq!(channel.name(), "Live");
        let a_tag = format!("30311:{}:show", pk('a'));
        store.consume(ev(2, 'b', 1311, 11, vec![tag(&["a", &a_tag])], "hello"), None, false);
        assert_eq!(channel.len(), 1);
        assert!(store.get_note_if_exists(&hex(2)).unwrap().reply_to().is_empty());
    }
}
