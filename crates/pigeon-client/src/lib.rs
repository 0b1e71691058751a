//! # pigeon-client
//!
//! The top-level session facade. A [`ChatSession`] wires together the
//! local durable store, the offline-first sync engine, the reconnect
//! driver, and the presence subsystem for one signed-in user, and exposes
//! the handful of calls a presentation layer needs: send, subscribe,
//! focus, observe presence, shut down.

pub mod session;

mod error;

pub use error::SessionError;
pub use session::{ChatSession, SessionConfig};

// Re-exported so a presentation layer only depends on this crate.
pub use pigeon_presence::{PresenceHandle, PresenceStore, PresenceView};
pub use pigeon_shared::{
    Conversation, ConversationId, DeliveryStatus, Message, MessageBody, MessageId, UserId,
};
pub use pigeon_sync::listener::{ConversationsCallback, MessagesCallback};
pub use pigeon_sync::{NetStatus, RemoteStore};
