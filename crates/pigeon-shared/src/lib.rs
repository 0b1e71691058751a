//! # pigeon-shared
//!
//! Domain types shared by every Pigeon crate: typed identifiers, the
//! delivery-status state machine, the persisted models, and the boundary
//! conversion between dynamic remote document payloads and typed records.
//!
//! Nothing in this crate performs I/O.

pub mod constants;
pub mod models;
pub mod snapshot;
pub mod status;
pub mod types;

mod error;

pub use error::SnapshotError;
pub use models::*;
pub use status::DeliveryStatus;
pub use types::{ConversationId, MessageId, UserId};
