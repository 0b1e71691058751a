//! # pigeon-sync
//!
//! The offline-first synchronization engine: optimistic sends into the
//! local cache, background pushes to the remote document store, a live
//! reconciliation listener per open conversation, a retry queue for
//! messages stranded by connectivity loss, and the unread/read-receipt
//! bookkeeping that rides on top.
//!
//! The engine treats the [`pigeon_store::StoreHandle`] FIFO queue as the
//! only mutable shared state; everything else is message passing between
//! spawned tasks.

pub mod context;
pub mod listener;
pub mod network;
pub mod remote;
pub mod retry;
pub mod send;
pub mod testing;
pub mod unread;

mod error;

pub use context::SyncContext;
pub use error::{RemoteError, SyncError};
pub use listener::{spawn_conversation_list_listener, spawn_conversation_listener, ListenerHandle};
pub use network::{spawn_reconnect_driver, LinkEvent, NetStatus, ReconnectDriver};
pub use remote::{DocPath, RemoteQuery, RemoteSnapshot, RemoteStore, SnapshotStream};
pub use retry::retry_unsent;
pub use send::{create_group_conversation, ensure_direct_conversation, send_message};
pub use unread::{
    increment_unread_for_others, mark_conversation_messages_read, mark_conversation_read,
};
