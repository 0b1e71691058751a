//! # pigeon-store
//!
//! The Local Durable Store: an embedded SQLite cache of messages,
//! conversations, and participant profiles. It is the single source of
//! truth for instant, offline reads.
//!
//! The crate exposes two layers:
//!
//! * [`Database`] — a synchronous `rusqlite::Connection` wrapper with typed
//!   CRUD helpers for every record type. All writes are idempotent
//!   replace-by-identity upserts.
//! * [`StoreHandle`] — the async front door. Every operation from every
//!   caller is funneled through one FIFO queue into a single worker task
//!   that owns the connection, so overlapping optimistic sends,
//!   reconciliation merges, and retry scans are serialized without any
//!   caller-side locking.

pub mod conversations;
pub mod database;
pub mod handle;
pub mod messages;
pub mod migrations;
pub mod profiles;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use handle::StoreHandle;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
