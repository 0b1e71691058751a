//! # pigeon-presence
//!
//! Heartbeat-based presence over a low-latency ephemeral store.
//!
//! The publisher overwrites its liveness record on a short fixed cadence;
//! observers never trust the record's `online` flag alone. Instead they
//! compare the heartbeat age against a staleness threshold and override the
//! derived status to offline, which bounds worst-case staleness even when a
//! publisher crashes without running its teardown.

pub mod backend;
pub mod observer;
pub mod publisher;
pub mod testing;

mod error;

pub use backend::PresenceStore;
pub use error::PresenceError;
pub use observer::{
    observe_presence, observe_presence_with_threshold, PresenceCallback, PresenceHandle,
    PresenceView,
};
pub use publisher::PresencePublisher;
