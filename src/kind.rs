//! Closed classification of supported event kinds.
//!
//! The ingestion dispatcher matches on [`EventKind`] exhaustively. Variants are
//! families rather than single kind numbers where the handling is identical.

use crate::event::is_addressable_kind;

/// How a kind flows through ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Identity is the event id; stored once, never replaced.
    Regular,
    /// Identity is the address; only the newest version is canonical.
    Addressable,
    /// Administrative events with dedicated handlers.
    Structural,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Metadata,
    TextNote,
    ContactList,
    PrivateDm,
    Deletion,
    Repost,
    Reaction,
    BadgeAward,
    Seal,
    ChatMessage,
    ChatFileHeader,
    GenericRepost,
    Picture,
    ChannelCreate,
    ChannelMetadata,
    ChannelMessage,
    ChannelHideMessage,
    ChannelMuteUser,
    TextNoteModification,
    PollResponse,
    OtsAttestation,
    GiftWrap,
    FileHeader,
    Poll,
    Comment,
    LiveChatMessage,
    Report,
    CommunityApproval,
    ZapRequest,
    ZapReceipt,
    Highlight,
    EphemeralChat,
    PaymentRequest,
    PaymentResponse,
    LongText,
    LiveActivity,
    Status,
    DraftWrap,
    Wiki,
    /// Any other replaceable or addressable kind.
    OtherAddressable(u32),
}

impl EventKind {
    /// Resolve a kind number; `None` for unsupported kinds.
    pub fn from_kind(kind: u32) -> Option<Self> {
        use EventKind::*;
        let resolved = match kind {
            0 => Metadata,
            1 => TextNote,
            3 => ContactList,
            4 => PrivateDm,
            5 => Deletion,
            6 => Repost,
            7 => Reaction,
            8 => BadgeAward,
            13 => Seal,
            14 => ChatMessage,
            15 => ChatFileHeader,
            16 => GenericRepost,
            20 => Picture,
            40 => ChannelCreate,
            41 => ChannelMetadata,
            42 => ChannelMessage,
            43 => ChannelHideMessage,
            44 => ChannelMuteUser,
            1010 => TextNoteModification,
            1018 => PollResponse,
            1040 => OtsAttestation,
            1059 => GiftWrap,
            1063 => FileHeader,
            1068 => Poll,
            1111 => Comment,
            1311 => LiveChatMessage,
            1984 => Report,
            4550 => CommunityApproval,
            9734 => ZapRequest,
            9735 => ZapReceipt,
            9802 => Highlight,
            23194 => PaymentRequest,
            23195 => PaymentResponse,
            23333 => EphemeralChat,
            30023 => LongText,
            30311 => LiveActivity,
            30315 => Status,
            30818 => Wiki,
            31234 => DraftWrap,
            k if is_addressable_kind(k) => OtherAddressable(k),
            _ => return None,
        };
        Some(resolved)
    }

    pub fn shape(self) -> Shape {
        use EventKind::*;
        match self {
            Metadata | ContactList | LongText | LiveActivity | Status | DraftWrap | Wiki
            | OtherAddressable(_) => Shape::Addressable,
            Deletion | ChannelCreate | ChannelMetadata | ChannelHideMessage | ChannelMuteUser
            | PaymentRequest | PaymentResponse => Shape::Structural,
            _ => Shape::Regular,
        }
    }

    /// Kinds run through duplicate detection before they are stored.
    pub fn is_spam_checkable(self) -> bool {
        use EventKind::*;
        matches!(
            self,
            TextNote
                | Comment
                | Picture
                | Poll
                | Highlight
                | ChannelMessage
                | LiveChatMessage
                | LongText
                | Wiki
        )
    }

    /// Kinds whose content is ciphertext; never searched by content.
    pub fn is_encrypted(self) -> bool {
        use EventKind::*;
        matches!(self, PrivateDm | Seal | GiftWrap | DraftWrap | PaymentRequest | PaymentResponse)
    }

    /// Kinds whose created_at may be pulled back by a `published_at` tag.
    pub fn honors_published_at(self) -> bool {
        use EventKind::*;
        matches!(self, LongText | Wiki)
            || matches!(self, OtherAddressable(k) if k == 30024 || k == 30402)
    }

    /// Kinds that count as boosts of another note.
    pub fn is_boost(self) -> bool {
        matches!(self, EventKind::Repost | EventKind::GenericRepost)
    }

    /// Kinds that wrap another event (NIP-59).
    pub fn is_wrap(self) -> bool {
        matches!(self, EventKind::Seal | EventKind::GiftWrap)
    }
}
