//! Contract for the low-latency ephemeral store that carries presence.
//!
//! Like the document store in `pigeon-sync`, payloads cross this boundary
//! as dynamic JSON maps and are converted to typed [`pigeon_shared::PresenceRecord`]s
//! at the edge. The store additionally offers an "on abrupt disconnect,
//! write this" primitive, installed once per session as a crash safety
//! net.

use async_trait::async_trait;
use futures::stream::BoxStream;

use pigeon_shared::snapshot::Fields;
use pigeon_shared::UserId;

use crate::error::PresenceError;

/// Stream of raw presence payloads for one user.
pub type PresenceStream = BoxStream<'static, Fields>;

#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Overwrite the user's presence record.
    async fn set(&self, user: &UserId, fields: Fields) -> Result<(), PresenceError>;

    /// Register a record the store writes server-side if this client's
    /// connection drops without a clean teardown.
    async fn install_on_disconnect(
        &self,
        user: &UserId,
        fields: Fields,
    ) -> Result<(), PresenceError>;

    /// Remove a previously installed disconnect record.
    async fn cancel_on_disconnect(&self, user: &UserId) -> Result<(), PresenceError>;

    /// Subscribe to a user's presence record. Emits the current value
    /// immediately, then every overwrite.
    fn subscribe(&self, user: &UserId) -> PresenceStream;
}
