use thiserror::Error;

use pigeon_presence::PresenceError;
use pigeon_store::StoreError;
use pigeon_sync::SyncError;

/// Errors surfaced by the session facade.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Presence(#[from] PresenceError),
}
