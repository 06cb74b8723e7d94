//! Thread reconstruction and display ordering.
//!
//! [`ThreadAssembler`] walks `reply_to` edges up to the thread root and
//! collects everything below it. [`ThreadLevelCalculator`] turns each note
//! into a sortable signature so that a single descending sort yields the
//! rendering order: the root first, every reply directly under its parent.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::keys::{Address, HexKey};
use crate::note::{Note, NoteKey};
use crate::store::GraphStore;

pub struct ThreadAssembler<'a> {
    store: &'a GraphStore,
}

impl<'a> ThreadAssembler<'a> {
    pub fn new(store: &'a GraphStore) -> Self {
        Self { store }
    }

    /// Root of the thread `note` belongs to.
    ///
    /// A parent marked `root` is trusted only when it is loaded and is a
    /// root itself, which guards against clients that mis-tag. Without one,
    /// the last loaded parent that replies to nothing is the root. Otherwise
    /// each parent is searched and the deepest ancestry wins.
    pub fn find_root(&self, note: &Arc<Note>) -> Arc<Note> {
        let mut tested = HashSet::new();
        self.search_root(note, &mut tested)
            .map_or_else(|| Arc::clone(note), |(root, _)| root)
    }

    fn search_root(
        &self,
        note: &Arc<Note>,
        tested: &mut HashSet<NoteKey>,
    ) -> Option<(Arc<Note>, usize)> {
        let parents = note.reply_to();
        if parents.is_empty() {
            return Some((Arc::clone(note), 0));
        }
        tested.insert(note.key().clone());

        let marked = note
            .event()
            .and_then(|e| e.marked_root().map(str::to_string));
        if let Some(root) = marked.and_then(|id| self.store.get_note_if_exists(&id)) {
            if root.has_event() && root.reply_to().is_empty() {
                return Some((root, 1));
            }
        }
        if let Some(top) = parents
            .iter()
            .rev()
            .find(|p| p.has_event() && p.reply_to().is_empty())
        {
            return Some((Arc::clone(top), 1));
        }

        let mut best: Option<(Arc<Note>, usize)> = None;
        for parent in &parents {
            if tested.contains(parent.key()) {
                continue;
            }
            if let Some((root, depth)) = self.search_root(parent, tested) {
                if best.as_ref().map_or(true, |(_, d)| depth + 1 > *d) {
                    best = Some((root, depth + 1));
                }
            }
        }
        best
    }

    /// Every note of the thread containing `id`, root first in walk order.
    ///
    /// Addressable content appears once: when both a version and its slot
    /// are reachable, only the newest survives.
    pub fn find_thread(&self, id: &str) -> Vec<Arc<Note>> {
        let Some(note) = self.store.check_get_or_create_note(id) else {
            return Vec::new();
        };
        if !note.has_event() {
            return vec![note];
        }
        let root = self.find_root(&note);
        let mut walk = Walk::default();
        walk.load_down(&root);
        // The note may hang off a branch the root walk did not reach.
        walk.load_down(&note);
        walk.only_latest_versions()
    }
}

#[derive(Default)]
struct Walk {
    seen: HashSet<NoteKey>,
    notes: Vec<Arc<Note>>,
}

impl Walk {
    fn load_down(&mut self, from: &Arc<Note>) {
        let mut stack = vec![Arc::clone(from)];
        while let Some(note) = stack.pop() {
            if !self.seen.insert(note.key().clone()) {
                continue;
            }
            let mut replies = note.replies();
            replies.reverse();
            stack.extend(replies);
            self.notes.push(note);
        }
    }

    fn only_latest_versions(self) -> Vec<Arc<Note>> {
        let mut newest: HashMap<Address, (u64, bool, usize)> = HashMap::new();
        for (idx, note) in self.notes.iter().enumerate() {
            let Some(event) = note.event() else {
                continue;
            };
            let Some(address) = Address::of(&event) else {
                continue;
            };
            let rank = (event.created_at, note.is_addressable(), idx);
            newest
                .entry(address)
                .and_modify(|best| {
                    if (rank.0, rank.1) > (best.0, best.1) {
                        *best = rank;
                    }
                })
                .or_insert(rank);
        }
        let keep: HashSet<usize> = newest.values().map(|(_, _, idx)| *idx).collect();
        self.notes
            .into_iter()
            .enumerate()
            .filter(|(idx, note)| {
                let addressable = note
                    .event()
                    .is_some_and(|e| Address::of(&e).is_some());
                !addressable || keep.contains(idx)
            })
            .map(|(_, note)| note)
            .collect()
    }
}

/// Tier of a reply under its parent; higher sorts first.
const SAME_AUTHOR: u8 = 9;
const MINE: u8 = 8;
const FOLLOWED: u8 = 7;
const EVERYONE: u8 = 0;

/// Computes reply-level signatures for one rendering pass.
///
/// Signatures are memoized per note for the lifetime of the calculator.
pub struct ThreadLevelCalculator<'a> {
    me: Option<&'a str>,
    follows: &'a HashSet<HexKey>,
    now: u64,
    considered: HashSet<NoteKey>,
    cache: HashMap<NoteKey, String>,
    in_progress: HashSet<NoteKey>,
}

impl<'a> ThreadLevelCalculator<'a> {
    pub fn new(me: Option<&'a str>, follows: &'a HashSet<HexKey>, now: u64) -> Self {
        Self {
            me,
            follows,
            now,
            considered: HashSet::new(),
            cache: HashMap::new(),
            in_progress: HashSet::new(),
        }
    }

    /// Prefer parents inside `notes` when a reply has several.
    pub fn considering(mut self, notes: &[Arc<Note>]) -> Self {
        self.considered = notes.iter().map(|n| n.key().clone()).collect();
        self
    }

    /// Sortable position of `note` in its thread.
    ///
    /// A root is `/<created_at><id8>;`. A reply extends its parent's
    /// signature with `/<tier><time><id8>;`, so a descending sort puts the
    /// parent before its replies and higher tiers before lower ones. The
    /// parent's own author uses `parent.created_at + age` and lists oldest
    /// first; every other tier uses `created_at` and lists newest first.
    pub fn reply_level_signature(&mut self, note: &Arc<Note>) -> String {
        if let Some(hit) = self.cache.get(note.key()) {
            return hit.clone();
        }
        let signature = self.compute(note);
        self.cache.insert(note.key().clone(), signature.clone());
        signature
    }

    fn compute(&mut self, note: &Arc<Note>) -> String {
        let created_at = note.created_at().unwrap_or(0);
        let id8: String = note.id_hex().chars().take(8).collect();
        let is_boost = note.kind().is_some_and(|k| k.is_boost());
        let parents = note.reply_to();
        if is_boost || parents.is_empty() {
            return format!("/{created_at:012}{id8};");
        }
        if !self.in_progress.insert(note.key().clone()) {
            // reply_to cycle: treat this note as a root
            return format!("/{created_at:012}{id8};");
        }
        let parent = self.deepest_considered_parent(&parents);
        self.in_progress.remove(note.key());

        let author = note.author_pubkey();
        let (stem, tier, value) = match &parent {
            Some((parent, signature)) => {
                let stem = signature.strip_suffix(';').unwrap_or(signature).to_string();
                if author.is_some() && note.created_at().is_some() && author == parent.author_pubkey()
                {
                    // the parent's author answering themselves reads top-down
                    let value = parent
                        .created_at()
                        .unwrap_or(0)
                        .saturating_add(self.now.saturating_sub(created_at));
                    (stem, SAME_AUTHOR, value)
                } else {
                    (stem, self.tier_of(author.as_deref()), created_at)
                }
            }
            None => (String::new(), self.tier_of(author.as_deref()), created_at),
        };
        format!("{stem}/{tier}{value:012}{id8};")
    }

    fn tier_of(&self, author: Option<&str>) -> u8 {
        match author {
            Some(a) if Some(a) == self.me => MINE,
            Some(a) if self.follows.contains(a) => FOLLOWED,
            _ => EVERYONE,
        }
    }

    /// The considered parent with the longest signature, first one on ties.
    /// Parents outside the considered set never contribute a stem.
    fn deepest_considered_parent(&mut self, parents: &[Arc<Note>]) -> Option<(Arc<Note>, String)> {
        let mut best: Option<(Arc<Note>, String)> = None;
        for parent in parents {
            if !self.considered.contains(parent.key()) {
                continue;
            }
            let signature = self.reply_level_signature(parent);
            if best.as_ref().map_or(true, |(_, b)| signature.len() > b.len()) {
                best = Some((Arc::clone(parent), signature));
            }
        }
        best
    }

    /// Sort `notes` into rendering order.
    pub fn sort(&mut self, notes: Vec<Arc<Note>>) -> Vec<Arc<Note>> {
        let mut keyed: Vec<(String, Arc<Note>)> = notes
            .into_iter()
            .map(|n| (self.reply_level_signature(&n), n))
            .collect();
        keyed.sort_by(|a, b| b.0.cmp(&a.0));
        keyed.into_iter().map(|(_, n)| n).collect()
    }
}

impl GraphStore {
    pub fn find_thread(&self, id: &str) -> Vec<Arc<Note>> {
        ThreadAssembler::new(self).find_thread(id)
    }

    /// The thread containing `id` in rendering order for `me`.
    pub fn thread_in_order(
        &self,
        id: &str,
        me: Option<&str>,
        follows: &HashSet<HexKey>,
        now: u64,
    ) -> Vec<Arc<Note>> {
        let thread = self.find_thread(id);
        ThreadLevelCalculator::new(me, follows, now)
            .considering(&thread)
            .sort(thread)
    }
}
