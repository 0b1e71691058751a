use thiserror::Error;

/// Errors produced by the remote document store collaborator.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// The remote store could not be reached (offline, timeout).
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),

    /// The remote store rejected the operation.
    #[error("Remote operation rejected: {0}")]
    Rejected(String),

    /// The change-feed subscription ended on the remote side.
    #[error("Subscription closed")]
    SubscriptionClosed,
}

/// Errors produced by the sync engine.
///
/// Steady-state network failures never surface through this type: the send
/// pipeline and retry queue swallow them by design, leaving the message in
/// `Sending` for the retry queue. What remains is the local-cache failure
/// path, where the caller has no other source of truth.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Local cache failure on a path with no fallback.
    #[error("Store error: {0}")]
    Store(#[from] pigeon_store::StoreError),

    /// Remote failure on a path where the caller explicitly asked for the
    /// remote result (e.g. conversation creation).
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),
}
