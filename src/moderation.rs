//! Acceptance rules for feeds and notifications.

use std::collections::HashSet;

use crate::event::Event;
use crate::keys::HexKey;
use crate::kind::EventKind;
use crate::note::Note;
use crate::store::GraphStore;
use crate::user::User;

/// Follows whose reports hide a user or note when warnings are on.
pub const REPORT_WARNING_THRESHOLD: usize = 5;

/// Kinds that can show up as notifications.
pub const NOTIFICATION_KINDS: [u32; 11] = [1, 4, 6, 7, 8, 20, 1068, 1111, 1311, 9735, 9802];

#[derive(Debug, Clone, Default)]
pub struct AcceptancePolicy {
    pub me: Option<HexKey>,
    pub follows: HashSet<HexKey>,
    /// Authors hidden by the account.
    pub hidden: HashSet<HexKey>,
    /// Authors the spam guard wants hidden.
    pub spammers: HashSet<HexKey>,
    pub warn_about_reports: bool,
}

impl AcceptancePolicy {
    /// Policy for `me` with the store's current spammer list.
    pub fn for_account(store: &GraphStore, me: Option<HexKey>, hidden: HashSet<HexKey>) -> Self {
        let follows = me
            .as_deref()
            .and_then(|me| store.get_user_if_exists(me))
            .map(|u| u.follows())
            .unwrap_or_default();
        Self {
            me,
            follows,
            hidden,
            spammers: store.spam().hidden_authors(),
            warn_about_reports: true,
        }
    }

    fn is_me(&self, pubkey: &str) -> bool {
        self.me.as_deref() == Some(pubkey)
    }

    pub fn is_hidden(&self, pubkey: &str) -> bool {
        self.hidden.contains(pubkey) || self.spammers.contains(pubkey)
    }

    pub fn is_acceptable_user(&self, user: &User) -> bool {
        let pubkey = user.pubkey();
        if self.is_me(pubkey) || self.follows.contains(pubkey) {
            return true;
        }
        let reported_by_me = self.me.as_deref().is_some_and(|me| user.has_reports_by(me));
        !self.is_hidden(pubkey)
            && !reported_by_me
            && (!self.warn_about_reports
                || user.count_report_authors_by(&self.follows) < REPORT_WARNING_THRESHOLD)
    }

    /// The note's own reports allow it.
    fn is_acceptable_direct(&self, note: &Note) -> bool {
        let reported_by_me = self.me.as_deref().is_some_and(|me| note.has_reports_by(me));
        !reported_by_me
            && (!self.warn_about_reports
                || note.count_report_authors_by(&self.follows) < REPORT_WARNING_THRESHOLD)
    }

    /// Authorless notes skip the author check. A boost additionally needs a
    /// boosted note that passes its own report check.
    pub fn is_acceptable_note(&self, note: &Note) -> bool {
        let author_ok = note
            .author()
            .map_or(true, |author| self.is_acceptable_user(&author));
        let boost_ok = !note.kind().is_some_and(EventKind::is_boost)
            || note.reply_to().iter().any(|p| self.is_acceptable_direct(p));
        author_ok && self.is_acceptable_direct(note) && boost_ok
    }
}

/// Whose notifications to show and what to hide.
pub struct NotificationScope<'a> {
    pub me: &'a str,
    pub follows: &'a HashSet<HexKey>,
    /// Accept notifications from everyone, not only follows.
    pub global: bool,
    pub hidden: &'a HashSet<HexKey>,
    /// Words that hide a direct message once its plaintext is known.
    pub hidden_words: &'a [String],
}

pub fn notification_acceptable(store: &GraphStore, note: &Note, scope: &NotificationScope<'_>) -> bool {
    let Some(event) = note.event() else {
        return false;
    };
    let kind = EventKind::from_kind(event.kind);
    let author = event.pubkey.as_str();
    NOTIFICATION_KINDS.contains(&event.kind)
        && (author != scope.me || kind == Some(EventKind::ZapReceipt))
        && (scope.global || scope.follows.contains(author))
        && event.is_tagged_user(scope.me)
        && !scope.hidden.contains(author)
        && !hidden_dm(store, &event, scope.hidden_words)
        && tags_an_event_by_user(store, note, &event, scope.me)
}

fn hidden_dm(store: &GraphStore, event: &Event, words: &[String]) -> bool {
    if EventKind::from_kind(event.kind) != Some(EventKind::PrivateDm) || words.is_empty() {
        return false;
    }
    let Some(plain) = store.decryption_cache().cached(&event.id) else {
        return false;
    };
    let plain = plain.to_lowercase();
    words.iter().any(|w| plain.contains(&w.to_lowercase()))
}

/// Whether the notification is about something `pubkey` wrote: a reply to
/// or citation of their note, a mention, or a reaction or boost of their
/// note. Other kinds always qualify.
fn tags_an_event_by_user(store: &GraphStore, note: &Note, event: &Event, pubkey: &str) -> bool {
    use EventKind::*;
    let by_user = |n: &Note| n.author_pubkey().as_deref() == Some(pubkey);
    match EventKind::from_kind(event.kind) {
        Some(TextNote | Comment | Poll | Picture | Highlight | ChannelMessage | LiveChatMessage) => {
            event
                .cited_event_ids()
                .into_iter()
                .any(|id| store.get_note_if_exists(id).is_some_and(|n| by_user(&n)))
                || event.cited_pubkeys().contains(&pubkey)
                || note.reply_to().iter().any(|p| by_user(p))
        }
        Some(Reaction | Repost | GenericRepost) => {
            note.reply_to().last().is_some_and(|p| by_user(p))
        }
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::{ev, hex, pk, store, tag};

    fn policy(me: char) -> AcceptancePolicy {
        AcceptancePolicy {
            me: Some(pk(me)),
            warn_about_reports: true,
            ..AcceptancePolicy::default()
        }
    }

    #[test]
    fn users_reported_by_me_are_rejected() {
        let store = store();
        store.consume(ev(1, 'm', 1984, 10, vec![tag(&["p", &pk('e')])], ""), None, false);
        let policy = policy('m');
        assert!(!policy.is_acceptable_user(&store.get_or_create_user(&pk('e'))));
        assert!(policy.is_acceptable_user(&store.get_or_create_user(&pk('y'))));
        assert!(policy.is_acceptable_user(&store.get_or_create_user(&pk('m'))));
    }

    #[test]
    fn follow_reports_hide_after_threshold() {
        let store = store();
        store.consume(ev(100, 'a', 1, 10, vec![], "post"), None, false);
        let mut policy = policy('m');
        for (i, c) in "bcdef".chars().enumerate() {
            policy.follows.insert(pk(c));
            let report = ev(i as u64 + 1, c, 1984, 11, vec![tag(&["e", &hex(100)])], "");
            store.consume(report, None, false);
        }
        let note = store.get_note_if_exists(&hex(100)).unwrap();
        assert!(!policy.is_acceptable_note(&note));
        policy.warn_about_reports = false;
        assert!(policy.is_acceptable_note(&note));
    }

    #[test]
    fn boosts_of_blocked_notes_are_rejected() {
        let store = store();
        store.consume(ev(1, 'x', 1, 10, vec![], "bad"), None, false);
        store.consume(ev(2, 'm', 1984, 11, vec![tag(&["e", &hex(1)])], ""), None, false);
        store.consume(ev(3, 'a', 6, 12, vec![tag(&["e", &hex(1)])], ""), None, false);
        let policy = policy('m');
        let boost = store.get_note_if_exists(&hex(3)).unwrap();
        assert!(!policy.is_acceptable_note(&boost));
        let stub = store.get_or_create_note(&hex(99));
        assert!(policy.is_acceptable_note(&stub));
    }

    #[test]
    fn notifications_need_a_tag_and_a_target_by_me() {
        let store = store();
        let me = pk('m');
        let follows: HashSet<String> = [pk('f')].into_iter().collect();
        let hidden = HashSet::new();
        store.consume(ev(1, 'm', 1, 10, vec![], "mine"), None, false);
        store.consume(ev(2, 'f', 1, 11, vec![tag(&["e", &hex(1)]), tag(&["p", &me])], "reply"), None, false);
        store.consume(ev(3, 's', 1, 12, vec![tag(&["e", &hex(1)]), tag(&["p", &me])], "reply"), None, false);
        store.consume(ev(4, 'f', 1, 13, vec![tag(&["p", &me])], "hey"), None, false);
        let scope = NotificationScope {
            me: &me,
            follows: &follows,
            global: false,
            hidden: &hidden,
            hidden_words: &[],
        };
        let accepted = |id: u64| {
            let note = store.get_note_if_exists(&hex(id)).unwrap();
            notification_acceptable(&store, &note, &scope)
        };
        assert!(!accepted(1));
        assert!(accepted(2));
        assert!(!accepted(3));
        assert!(!accepted(4));
    }
}
