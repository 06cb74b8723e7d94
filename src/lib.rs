//! In-memory Nostr event graph.
//!
//! A [`GraphStore`] ingests events from any number of relays and keeps them
//! as a graph of [`Note`]s, [`User`]s and [`Channel`]s: replies, reactions,
//! boosts, zaps and reports are wired as edges between entities that may be
//! referenced before their own event arrives. Replaceable and addressable
//! events collapse onto one slot per address, deletions are honored only
//! for their author, and several sweeps keep memory bounded.

pub mod channel;
pub mod chatroom;
pub mod config;
pub mod decrypt;
pub mod deletion;
pub mod error;
pub mod event;
pub mod flow;
pub mod hints;
pub mod keys;
pub mod kind;
pub mod moderation;
pub mod note;
pub mod participants;
mod prune;
mod search;
pub mod soft_index;
pub mod spam;
pub mod store;
pub mod thread;
pub mod user;
pub mod verify;

pub use channel::{Channel, ChannelKey};
pub use config::{Settings, StoreConfig};
pub use error::{GraphError, Result};
pub use event::{Event, Tag};
pub use keys::{Address, HexKey};
pub use kind::EventKind;
pub use note::{Note, NoteKey};
pub use store::{GraphStore, StoreStats};
pub use user::User;
