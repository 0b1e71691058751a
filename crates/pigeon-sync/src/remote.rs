//! Contract for the remote document store collaborator.
//!
//! The remote store is external and replaceable (any document database with
//! change feeds and atomic field increments fits). Payloads cross this
//! boundary as dynamic JSON maps; the engine converts them to typed records
//! with `pigeon_shared::snapshot` immediately on receipt.

use async_trait::async_trait;
use futures::stream::BoxStream;

use pigeon_shared::snapshot::Fields;
use pigeon_shared::{ConversationId, MessageId, UserId};

use crate::error::RemoteError;

/// Address of a single remote document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DocPath {
    Conversation(ConversationId),
    Message(ConversationId, MessageId),
    Profile(UserId),
}

impl std::fmt::Display for DocPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Conversation(id) => write!(f, "conversations/{id}"),
            Self::Message(conv, id) => write!(f, "conversations/{conv}/messages/{id}"),
            Self::Profile(id) => write!(f, "profiles/{id}"),
        }
    }
}

/// A live query against the remote change feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RemoteQuery {
    /// All messages of one conversation.
    Messages(ConversationId),
    /// All conversations a user participates in.
    Conversations(UserId),
}

/// One document as emitted by the change feed.
#[derive(Debug, Clone)]
pub struct RemoteSnapshot {
    pub path: DocPath,
    pub fields: Fields,
}

/// Stream of change-feed emissions. Every item is the complete current
/// result set for the subscribed query, not a diff.
pub type SnapshotStream = BoxStream<'static, Result<Vec<RemoteSnapshot>, RemoteError>>;

/// The remote document store.
///
/// `update` merges the given fields into an existing document; keys may use
/// dotted paths (`"unread.alice"`) to address nested fields. `increment` is
/// the store's server-side atomic counter primitive — the engine never
/// emulates it with a read-modify-write.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get(&self, path: &DocPath) -> Result<Option<Fields>, RemoteError>;

    /// Replace-by-identity write of a whole document.
    async fn set(&self, path: &DocPath, fields: Fields) -> Result<(), RemoteError>;

    /// Partial update; merges `fields` into the document.
    async fn update(&self, path: &DocPath, fields: Fields) -> Result<(), RemoteError>;

    /// Atomically add `delta` to a numeric field.
    async fn increment(&self, path: &DocPath, field: &str, delta: i64) -> Result<(), RemoteError>;

    /// Subscribe to a query's change feed.
    fn subscribe(&self, query: RemoteQuery) -> SnapshotStream;
}
