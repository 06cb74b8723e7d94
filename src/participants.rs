//! Who takes part in a thread.

use std::collections::HashSet;
use std::sync::Arc;

use crate::keys::HexKey;
use crate::note::{Note, NoteKey};
use crate::store::GraphStore;

/// Collects the authors of a note and of everything hanging below it:
/// replies (recursively), boosts, reactions and zap requests.
#[derive(Default)]
pub struct ParticipantListBuilder {
    visited: HashSet<NoteKey>,
}

impl ParticipantListBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn participants(&mut self, note: &Arc<Note>) -> HashSet<HexKey> {
        let mut out = HashSet::new();
        let mut stack = vec![Arc::clone(note)];
        while let Some(note) = stack.pop() {
            if !self.visited.insert(note.key().clone()) {
                continue;
            }
            out.extend(note.author_pubkey());
            let satellites = note
                .boosts()
                .into_iter()
                .chain(note.reactions().into_values().flatten())
                .chain(note.zaps().into_iter().map(|z| z.request));
            out.extend(satellites.filter_map(|n| n.author_pubkey()));
            stack.extend(note.replies());
        }
        out
    }

    /// Participants of `note` that `follows` contains.
    pub fn follows_that_participate(
        &mut self,
        note: &Arc<Note>,
        follows: &HashSet<HexKey>,
    ) -> HashSet<HexKey> {
        self.participants(note)
            .into_iter()
            .filter(|pk| follows.contains(pk))
            .collect()
    }
}

impl GraphStore {
    pub fn participants_of(&self, note: &Arc<Note>) -> HashSet<HexKey> {
        ParticipantListBuilder::new().participants(note)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::{ev, hex, pk, store, tag};

    #[test]
    fn participants_cover_replies_and_satellites() {
        let store = store();
        store.consume(ev(1, 'a', 1, 10, vec![], "root"), None, false);
        store.consume(ev(2, 'b', 1, 11, vec![tag(&["e", &hex(1)])], "reply"), None, false);
        store.consume(ev(3, 'c', 1, 12, vec![tag(&["e", &hex(2)])], "deeper"), None, false);
        store.consume(ev(4, 'd', 7, 13, vec![tag(&["e", &hex(1)])], "+"), None, false);
        store.consume(ev(5, 'e', 6, 14, vec![tag(&["e", &hex(1)])], ""), None, false);
        store.consume(ev(6, 'f', 9734, 15, vec![tag(&["e", &hex(2)])], ""), None, false);
        let root = store.get_note_if_exists(&hex(1)).unwrap();
        let found = store.participants_of(&root);
        let expected: HashSet<String> = "abcdef".chars().map(pk).collect();
        assert_eq!(found, expected);

        let follows: HashSet<String> = [pk('c'), pk('z')].into_iter().collect();
        let mine = ParticipantListBuilder::new().follows_that_participate(&root, &follows);
        assert_eq!(mine, [pk('c')].into_iter().collect());
    }
}
