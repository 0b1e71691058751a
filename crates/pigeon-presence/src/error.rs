use thiserror::Error;

/// Errors produced by the presence backend.
#[derive(Error, Debug)]
pub enum PresenceError {
    /// The ephemeral store could not be reached.
    #[error("Presence store unavailable: {0}")]
    Unavailable(String),

    /// The store rejected the write.
    #[error("Presence write rejected: {0}")]
    Rejected(String),
}
