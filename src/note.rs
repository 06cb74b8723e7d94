//! Notes: one event plus its relationship edges.
//!
//! A note can exist before its event arrives (a forward reference); `event` is
//! filled exactly once for id-keyed notes. Address-keyed notes hold the newest
//! version seen for their address and are replaced as newer versions land.
//!
//! Locking: each note guards its fields with its own lock, and no code path
//! holds two note locks at once. Edge migration additionally holds the source
//! note's migration mutex so two migrations of the same note never interleave.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::event::Event;
use crate::flow::{FlowKind, FlowSet, Subscription};
use crate::keys::{Address, HexKey};
use crate::kind::EventKind;
use crate::user::User;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NoteKey {
    Id(HexKey),
    Address(Address),
}

impl fmt::Display for NoteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoteKey::Id(id) => f.write_str(id),
            NoteKey::Address(a) => f.write_str(&a.to_tag()),
        }
    }
}

/// A zap request with its receipt, once the receipt arrives.
#[derive(Clone)]
pub struct ZapPair {
    pub request: Arc<Note>,
    pub receipt: Option<Arc<Note>>,
}

#[derive(Default)]
struct NoteState {
    event: Option<Arc<Event>>,
    kind: Option<EventKind>,
    author: Option<Arc<User>>,
    reply_to: Vec<Arc<Note>>,
    replies: Vec<Arc<Note>>,
    reactions: BTreeMap<String, Vec<Arc<Note>>>,
    boosts: Vec<Arc<Note>>,
    reports: HashMap<HexKey, Vec<Arc<Note>>>,
    zaps: Vec<ZapPair>,
    zap_payments: Vec<ZapPair>,
    relays: Vec<String>,
}

impl NoteState {
    fn has_children(&self) -> bool {
        !self.replies.is_empty()
            || !self.reactions.is_empty()
            || !self.boosts.is_empty()
            || !self.reports.is_empty()
            || !self.zaps.is_empty()
            || !self.zap_payments.is_empty()
    }
}

pub struct Note {
    key: NoteKey,
    state: RwLock<NoteState>,
    migration: Mutex<()>,
    flows: FlowSet,
}

impl PartialEq for Note {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Note {}

impl Hash for Note {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Debug for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Note").field("key", &self.key).finish()
    }
}

fn contains(list: &[Arc<Note>], note: &Arc<Note>) -> bool {
    list.iter().any(|n| Arc::ptr_eq(n, note))
}

fn push_unique(list: &mut Vec<Arc<Note>>, note: &Arc<Note>) -> bool {
    if contains(list, note) {
        return false;
    }
    list.push(Arc::clone(note));
    true
}

fn remove_from(list: &mut Vec<Arc<Note>>, note: &Arc<Note>) -> bool {
    let before = list.len();
    list.retain(|n| !Arc::ptr_eq(n, note));
    before != list.len()
}

/// Reaction grouping key: the content, or `+` when empty.
pub fn reaction_key(event: &Event) -> String {
    let content = event.content.trim();
    if content.is_empty() {
        "+".to_string()
    } else {
        content.to_string()
    }
}

impl Note {
    pub fn new(key: NoteKey) -> Self {
        Self {
            key,
            state: RwLock::new(NoteState::default()),
            migration: Mutex::new(()),
            flows: FlowSet::default(),
        }
    }

    pub fn key(&self) -> &NoteKey {
        &self.key
    }

    /// Event id for id-keyed notes, the `a` tag form for addressable ones.
    pub fn id_hex(&self) -> String {
        self.key.to_string()
    }

    pub fn address(&self) -> Option<&Address> {
        match &self.key {
            NoteKey::Address(a) => Some(a),
            NoteKey::Id(_) => None,
        }
    }

    pub fn is_addressable(&self) -> bool {
        matches!(self.key, NoteKey::Address(_))
    }

    pub fn event(&self) -> Option<Arc<Event>> {
        self.state.read().event.clone()
    }

    pub fn has_event(&self) -> bool {
        self.state.read().event.is_some()
    }

    pub fn kind(&self) -> Option<EventKind> {
        self.state.read().kind
    }

    pub fn author(&self) -> Option<Arc<User>> {
        self.state.read().author.clone()
    }

    pub fn author_pubkey(&self) -> Option<HexKey> {
        let state = self.state.read();
        state
            .author
            .as_ref()
            .map(|u| u.pubkey().to_string())
            .or_else(|| self.address().map(|a| a.pubkey.clone()))
    }

    /// Ordering timestamp. Address-keyed notes of long-form kinds use the
    /// earlier of `created_at` and `published_at`.
    pub fn created_at(&self) -> Option<u64> {
        let state = self.state.read();
        let event = state.event.as_ref()?;
        if self.is_addressable() && state.kind.is_some_and(EventKind::honors_published_at) {
            if let Some(published) = event.published_at() {
                return Some(published.min(event.created_at));
            }
        }
        Some(event.created_at)
    }

    /// Load `event` into this note.
    ///
    /// Id-keyed notes accept exactly one event; later loads are ignored.
    /// Address-keyed notes replace their content with every load.
    pub fn load_event(
        &self,
        event: Arc<Event>,
        author: Arc<User>,
        reply_to: Vec<Arc<Note>>,
    ) -> bool {
        {
            let mut state = self.state.write();
            if !self.is_addressable() && state.event.is_some() {
                return false;
            }
            state.kind = EventKind::from_kind(event.kind);
            state.event = Some(event);
            state.author = Some(author);
            state.reply_to = reply_to;
        }
        self.flows.invalidate(FlowKind::Metadata);
        self.flows.invalidate(FlowKind::Author);
        true
    }

    /// Replace an address slot's content if `event` is strictly newer than
    /// what it holds, moving the slot's reply edge from the old parents to
    /// `reply_to`. Returns `false` when the slot already holds something at
    /// least as new.
    ///
    /// The swap and the rewiring run under the slot's migration mutex, so
    /// concurrent replacements leave the slot under the winner's parents only.
    pub fn replace_if_newer(
        self: &Arc<Self>,
        event: Arc<Event>,
        author: Arc<User>,
        reply_to: Vec<Arc<Note>>,
    ) -> bool {
        let _guard = self.migration.lock();
        let previous = {
            let mut state = self.state.write();
            if state
                .event
                .as_ref()
                .is_some_and(|current| current.created_at >= event.created_at)
            {
                return false;
            }
            state.kind = EventKind::from_kind(event.kind);
            state.event = Some(event);
            state.author = Some(author);
            std::mem::replace(&mut state.reply_to, reply_to.clone())
        };
        for parent in &previous {
            parent.remove_note(self);
        }
        for parent in &reply_to {
            parent.add_reply(self);
        }
        self.flows.invalidate(FlowKind::Metadata);
        self.flows.invalidate(FlowKind::Author);
        true
    }

    pub fn reply_to(&self) -> Vec<Arc<Note>> {
        self.state.read().reply_to.clone()
    }

    pub fn replies(&self) -> Vec<Arc<Note>> {
        self.state.read().replies.clone()
    }

    pub fn reactions(&self) -> BTreeMap<String, Vec<Arc<Note>>> {
        self.state.read().reactions.clone()
    }

    pub fn boosts(&self) -> Vec<Arc<Note>> {
        self.state.read().boosts.clone()
    }

    pub fn reports(&self) -> HashMap<HexKey, Vec<Arc<Note>>> {
        self.state.read().reports.clone()
    }

    pub fn zaps(&self) -> Vec<ZapPair> {
        self.state.read().zaps.clone()
    }

    pub fn zap_payments(&self) -> Vec<ZapPair> {
        self.state.read().zap_payments.clone()
    }

    pub fn relays(&self) -> Vec<String> {
        self.state.read().relays.clone()
    }

    pub fn has_relay(&self, relay: &str) -> bool {
        self.state.read().relays.iter().any(|r| r == relay)
    }

    pub fn add_relay(&self, relay: &str) -> bool {
        {
            let mut state = self.state.write();
            if state.relays.iter().any(|r| r == relay) {
                return false;
            }
            state.relays.push(relay.to_string());
        }
        self.flows.invalidate(FlowKind::Relays);
        true
    }

    pub fn add_reply(&self, note: &Arc<Note>) -> bool {
        let added = push_unique(&mut self.state.write().replies, note);
        if added {
            self.flows.invalidate(FlowKind::Replies);
        }
        added
    }

    pub fn add_boost(&self, note: &Arc<Note>) -> bool {
        let added = push_unique(&mut self.state.write().boosts, note);
        if added {
            self.flows.invalidate(FlowKind::Boosts);
        }
        added
    }

    pub fn add_reaction(&self, note: &Arc<Note>) -> bool {
        let key = note
            .event()
            .map(|e| reaction_key(&e))
            .unwrap_or_else(|| "+".to_string());
        let added = {
            let mut state = self.state.write();
            push_unique(state.reactions.entry(key).or_default(), note)
        };
        if added {
            self.flows.invalidate(FlowKind::Reactions);
        }
        added
    }

    /// Record a report, grouped by the reporting author.
    pub fn add_report(&self, note: &Arc<Note>) -> bool {
        let Some(reporter) = note.author_pubkey() else {
            return false;
        };
        let added = {
            let mut state = self.state.write();
            push_unique(state.reports.entry(reporter).or_default(), note)
        };
        if added {
            self.flows.invalidate(FlowKind::Reports);
        }
        added
    }

    pub fn add_zap(&self, request: &Arc<Note>, receipt: Option<&Arc<Note>>) -> bool {
        let added = add_pair(&mut self.state.write().zaps, request, receipt);
        if added {
            self.flows.invalidate(FlowKind::Zaps);
        }
        added
    }

    pub fn add_zap_payment(&self, request: &Arc<Note>, response: Option<&Arc<Note>>) -> bool {
        let added = add_pair(&mut self.state.write().zap_payments, request, response);
        if added {
            self.flows.invalidate(FlowKind::Zaps);
        }
        added
    }

    pub fn has_reports_by(&self, pubkey: &str) -> bool {
        self.state
            .read()
            .reports
            .get(pubkey)
            .is_some_and(|r| !r.is_empty())
    }

    pub fn count_report_authors_by(&self, pubkeys: &std::collections::HashSet<HexKey>) -> usize {
        self.state
            .read()
            .reports
            .keys()
            .filter(|k| pubkeys.contains(*k))
            .count()
    }

    /// Remove `child` from every relationship collection.
    pub fn remove_note(&self, child: &Arc<Note>) -> bool {
        let mut touched = Vec::new();
        {
            let mut state = self.state.write();
            if remove_from(&mut state.replies, child) {
                touched.push(FlowKind::Replies);
            }
            if remove_from(&mut state.boosts, child) {
                touched.push(FlowKind::Boosts);
            }
            let mut reaction_hit = false;
            state.reactions.retain(|_, list| {
                reaction_hit |= remove_from(list, child);
                !list.is_empty()
            });
            if reaction_hit {
                touched.push(FlowKind::Reactions);
            }
            let mut report_hit = false;
            state.reports.retain(|_, list| {
                report_hit |= remove_from(list, child);
                !list.is_empty()
            });
            if report_hit {
                touched.push(FlowKind::Reports);
            }
            if remove_pair(&mut state.zaps, child) | remove_pair(&mut state.zap_payments, child) {
                touched.push(FlowKind::Zaps);
            }
        }
        for kind in &touched {
            self.flows.invalidate(*kind);
        }
        !touched.is_empty()
    }

    /// Remove the parent `parent` from this note's `reply_to`.
    pub fn remove_parent(&self, parent: &Arc<Note>) -> bool {
        remove_from(&mut self.state.write().reply_to, parent)
    }

    /// Point every `reply_to` entry at `old` to `new` instead.
    fn replace_parent(&self, old: &Arc<Note>, new: &Arc<Note>) {
        let mut state = self.state.write();
        if !contains(&state.reply_to, old) {
            return;
        }
        let already = contains(&state.reply_to, new);
        let mut replaced = false;
        state.reply_to.retain_mut(|p| {
            if Arc::ptr_eq(p, old) {
                if already || replaced {
                    return false;
                }
                *p = Arc::clone(new);
                replaced = true;
            }
            true
        });
    }

    /// Every note that points at this one through a relationship edge.
    pub fn children(&self) -> Vec<Arc<Note>> {
        let state = self.state.read();
        let mut out: Vec<Arc<Note>> = Vec::new();
        for n in state
            .replies
            .iter()
            .chain(state.boosts.iter())
            .chain(state.reactions.values().flatten())
            .chain(state.reports.values().flatten())
        {
            push_unique(&mut out, n);
        }
        for pair in state.zaps.iter().chain(state.zap_payments.iter()) {
            push_unique(&mut out, &pair.request);
            if let Some(r) = &pair.receipt {
                push_unique(&mut out, r);
            }
        }
        out
    }

    pub fn has_children(&self) -> bool {
        self.state.read().has_children()
    }

    /// Drop every child edge, returning the children that were attached.
    pub fn remove_all_children(&self) -> Vec<Arc<Note>> {
        let children = self.children();
        {
            let mut state = self.state.write();
            state.replies.clear();
            state.boosts.clear();
            state.reactions.clear();
            state.reports.clear();
            state.zaps.clear();
            state.zap_payments.clear();
        }
        self.flows.invalidate_all();
        children
    }

    /// Root of a conversation: boosts, and notes without parents, except
    /// chat messages which always belong to their channel.
    pub fn is_new_thread(&self) -> bool {
        let state = self.state.read();
        let kind = state.kind;
        let boost = kind.is_some_and(EventKind::is_boost);
        let chat = matches!(
            kind,
            Some(EventKind::ChannelMessage) | Some(EventKind::LiveChatMessage)
        );
        (boost || state.reply_to.is_empty()) && !chat
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

    /// Re-point every edge that targets `self` at `target`, then clear this
    /// note's collections.
    ///
    /// Each child is added to `target` before it is removed from `self`, so a
    /// reader never sees an edge disappear without its replacement in place.
    /// Children attached concurrently are picked up by the next round.
    pub fn move_all_references_to(self: &Arc<Self>, target: &Arc<Note>) {
        if Arc::ptr_eq(self, target) {
            return;
        }
        let _guard = self.migration.lock();
        loop {
            let (replies, boosts, reactions, reports, zaps, payments) = {
                let state = self.state.read();
                if !state.has_children() {
                    break;
                }
                (
                    state.replies.clone(),
                    state.boosts.clone(),
                    state.reactions.values().flatten().cloned().collect::<Vec<_>>(),
                    state.reports.values().flatten().cloned().collect::<Vec<_>>(),
                    state.zaps.clone(),
                    state.zap_payments.clone(),
                )
            };
            for n in &replies {
                target.add_reply(n);
                n.replace_parent(self, target);
            }
            for n in &boosts {
                target.add_boost(n);
                n.replace_parent(self, target);
            }
            for n in &reactions {
                target.add_reaction(n);
                n.replace_parent(self, target);
            }
            for n in &reports {
                target.add_report(n);
                n.replace_parent(self, target);
            }
            for pair in &zaps {
                target.add_zap(&pair.request, pair.receipt.as_ref());
                pair.request.replace_parent(self, target);
                if let Some(r) = &pair.receipt {
                    r.replace_parent(self, target);
                }
            }
            for pair in &payments {
                target.add_zap_payment(&pair.request, pair.receipt.as_ref());
            }
            for n in replies
                .iter()
                .chain(boosts.iter())
                .chain(reactions.iter())
                .chain(reports.iter())
            {
                self.remove_note(n);
            }
            for pair in zaps.iter().chain(payments.iter()) {
                self.remove_note(&pair.request);
            }
        }
        self.state.write().reply_to.clear();
        self.flows.invalidate_all();
    }
}

fn add_pair(list: &mut Vec<ZapPair>, request: &Arc<Note>, receipt: Option<&Arc<Note>>) -> bool {
    if let Some(existing) = list.iter_mut().find(|p| Arc::ptr_eq(&p.request, request)) {
        return match (receipt, &existing.receipt) {
            (Some(r), None) => {
                existing.receipt = Some(Arc::clone(r));
                true
            }
            _ => false,
        };
    }
    list.push(ZapPair {
        request: Arc::clone(request),
        receipt: receipt.cloned(),
    });
    true
}

/// Remove pairs whose request is `note`, and unset receipts that are `note`.
fn remove_pair(list: &mut Vec<ZapPair>, note: &Arc<Note>) -> bool {
    let before = list.len();
    list.retain(|p| !Arc::ptr_eq(&p.request, note));
    let mut hit = before != list.len();
    for pair in list.iter_mut() {
        if pair.receipt.as_ref().is_some_and(|r| Arc::ptr_eq(r, note)) {
            pair.receipt = None;
            hit = true;
        }
    }
    hit
}
