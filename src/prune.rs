//! Eviction sweeps.
//!
//! Every sweep first computes its victims, then removes them one at a time.
//! Each removal re-checks for observers under the note's flow lock, so a
//! note that gained an observer after the victim list was built is skipped.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::info;

use crate::event::is_addressable_kind;
use crate::keys::{Address, HexKey};
use crate::kind::EventKind;
use crate::note::Note;
use crate::store::GraphStore;

impl GraphStore {
    /// Remove `note` from the graph unless it is observed.
    fn prune_one(&self, note: &Arc<Note>) -> bool {
        if note.flows().with_idle(|| self.unindex(note)).is_none() {
            return false;
        }
        self.detach(note);
        true
    }

    /// Remove `victims` and cut the edges of their children. With `cascade`
    /// the children are pruned as well.
    fn prune_notes(&self, victims: impl IntoIterator<Item = Arc<Note>>, cascade: bool) -> usize {
        let mut removed = 0;
        for note in victims {
            if !self.prune_one(&note) {
                continue;
            }
            removed += 1;
            for child in note.remove_all_children() {
                if cascade && self.prune_one(&child) {
                    removed += 1;
                } else {
                    child.remove_parent(&note);
                }
            }
        }
        removed
    }

    /// Cap channel histories and private rooms.
    pub fn prune_old_messages(&self, now: u64) -> usize {
        let mut victims: HashSet<Arc<Note>> = HashSet::new();
        let channels: Vec<_> = self.channels.iter().map(|c| Arc::clone(c.value())).collect();
        for channel in channels {
            victims.extend(channel.prune_candidates(self.config.channel_message_cap));
        }
        for (_, user) in self.users.snapshot() {
            for room in user.chatrooms() {
                victims.extend(room.prune_candidates(
                    now,
                    self.config.dm_room_cap,
                    self.config.dm_room_recent_secs,
                ));
            }
        }
        let removed = self.prune_notes(victims, false);
        info!(removed, "pruned old messages");
        removed
    }

    /// Remove everything authored by a hidden pubkey.
    pub fn prune_hidden_events(&self, hidden: &HashSet<HexKey>) -> usize {
        if hidden.is_empty() {
            return 0;
        }
        let by_hidden = |note: &Arc<Note>| {
            note.author_pubkey()
                .is_some_and(|pk| hidden.contains(&pk))
        };
        let mut victims = self.notes.filter(|_, n| by_hidden(n));
        victims.extend(self.addressables.filter(|_, n| by_hidden(n)));
        let removed = self.prune_notes(victims, true);
        info!(removed, authors = hidden.len(), "pruned hidden authors");
        removed
    }

    /// Remove events whose expiration timestamp is in the past.
    pub fn prune_expired_events(&self, now: u64) -> usize {
        let expired = |note: &Arc<Note>| note.event().is_some_and(|e| e.is_expired(now));
        let mut victims = self.notes.filter(|_, n| expired(n));
        victims.extend(self.addressables.filter(|_, n| expired(n)));
        let removed = self.prune_notes(victims, true);
        info!(removed, "pruned expired events");
        removed
    }

    /// Remove replies, reactions, zaps, reports and reposts that nobody is
    /// looking at and that neither come from nor mention `accounts`.
    pub fn prune_replies_and_reactions(&self, accounts: &HashSet<HexKey>) -> usize {
        let candidates = self.notes.filter(|_, note| {
            let Some(event) = note.event() else {
                return false;
            };
            let prunable = match EventKind::from_kind(event.kind) {
                Some(EventKind::TextNote) => !note.reply_to().is_empty(),
                Some(
                    EventKind::Reaction
                    | EventKind::ZapRequest
                    | EventKind::ZapReceipt
                    | EventKind::Report
                    | EventKind::Repost
                    | EventKind::GenericRepost,
                ) => true,
                _ => false,
            };
            prunable
                && !accounts.contains(&event.pubkey)
                && !accounts.iter().any(|a| event.is_tagged_user(a))
        });
        // Observer checks take flow locks, so they stay out of the index scan.
        let victims: Vec<_> = candidates
            .into_iter()
            .filter(|note| !note.is_in_use() && !note.reply_to().iter().any(|p| p.is_in_use()))
            .collect();
        let removed = self.prune_notes(victims, false);
        info!(removed, "pruned replies and reactions");
        removed
    }

    /// Fold superseded addressable versions into their canonical slot and
    /// drop them.
    pub fn prune_old_addressable_versions(&self) -> usize {
        let versions = self
            .notes
            .filter(|_, note| note.event().is_some_and(|e| is_addressable_kind(e.kind)));
        let mut removed = 0;
        for version in versions {
            let Some(old) = version.event() else {
                continue;
            };
            let Some(slot) = Address::of(&old).and_then(|a| self.addressables.get(&a)) else {
                continue;
            };
            let Some(current) = slot.event() else {
                continue;
            };
            if current.id == old.id || current.created_at < old.created_at {
                continue;
            }
            version.move_all_references_to(&slot);
            if self.prune_one(&version) {
                removed += 1;
            }
        }
        info!(removed, "pruned old addressable versions");
        removed
    }

    /// Grace sweep over the indexes: contentless, unobserved entries are
    /// demoted to weak handles and dropped once nothing else points at them.
    pub fn release_idle(&self) -> usize {
        let notes = self
            .notes
            .release_idle(|n| !n.has_event() && !n.is_in_use());
        let addressables = self
            .addressables
            .release_idle(|n| !n.has_event() && !n.is_in_use());
        let users = self.users.release_idle(|u| {
            u.metadata().is_none() && u.contact_list().is_none() && !u.is_in_use()
        });
        let released = notes + addressables + users;
        info!(notes, addressables, users, "released idle index entries");
        released
    }
}
