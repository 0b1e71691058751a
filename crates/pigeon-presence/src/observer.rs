//! Observer half of the presence subsystem, with the client-side
//! staleness override.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, warn};

use pigeon_shared::constants::STALENESS_THRESHOLD;
use pigeon_shared::snapshot::presence_from_fields;
use pigeon_shared::{PresenceRecord, UserId};

use crate::backend::PresenceStore;

/// Derived presence as observers should display it. `online` is the
/// staleness-checked verdict, not the publisher's raw flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceView {
    pub user_id: UserId,
    pub online: bool,
    pub last_seen: chrono::DateTime<Utc>,
}

/// Callback invoked on every derived presence change.
pub type PresenceCallback = Arc<dyn Fn(PresenceView) + Send + Sync>;

/// Handle to a running presence observation. `stop` is idempotent and safe
/// after the subscription has already ended; dropping the handle stops the
/// task too.
pub struct PresenceHandle {
    stop_tx: watch::Sender<bool>,
}

impl PresenceHandle {
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

impl Drop for PresenceHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Observe a user's presence with the default staleness threshold.
pub fn observe_presence(
    store: Arc<dyn PresenceStore>,
    user: UserId,
    on_update: PresenceCallback,
) -> PresenceHandle {
    observe_presence_with_threshold(store, user, STALENESS_THRESHOLD, on_update)
}

/// Observe with an explicit staleness threshold (tests shrink it).
///
/// Two override paths bound worst-case staleness:
///
/// * every incoming record claiming online is re-judged against the
///   heartbeat age before it is surfaced;
/// * between records, a deadline timer armed at `last_heartbeat +
///   threshold` fires a derived-offline update on its own, covering the
///   publisher that crashed and will never write again.
pub fn observe_presence_with_threshold(
    store: Arc<dyn PresenceStore>,
    user: UserId,
    threshold: Duration,
    on_update: PresenceCallback,
) -> PresenceHandle {
    let (stop_tx, mut stop_rx) = watch::channel(false);

    tokio::spawn(async move {
        let mut stream = store.subscribe(&user);
        debug!(user = %user, "presence observation started");

        // The latest record whose liveness claim is still pending a
        // staleness verdict. `None` once we have declared it offline.
        let mut pending: Option<PresenceRecord> = None;

        loop {
            let deadline = pending.as_ref().map(|rec| {
                let age = rec.heartbeat_age(Utc::now());
                tokio::time::Instant::now() + threshold.saturating_sub(age)
            });

            tokio::select! {
                _ = stop_rx.changed() => break,
                Some(()) = async {
                    match deadline {
                        Some(at) => {
                            tokio::time::sleep_until(at).await;
                            Some(())
                        }
                        None => None,
                    }
                } => {
                    // No fresh heartbeat before the deadline: override to
                    // offline without waiting for the publisher.
                    if let Some(rec) = pending.take() {
                        debug!(user = %user, "presence stale; overriding to offline");
                        on_update(PresenceView {
                            user_id: rec.user_id.clone(),
                            online: false,
                            last_seen: rec.last_seen,
                        });
                    }
                }
                item = stream.next() => match item {
                    None => break,
                    Some(fields) => {
                        let rec = match presence_from_fields(&fields) {
                            Ok(rec) => rec,
                            Err(e) => {
                                warn!(user = %user, error = %e, "malformed presence payload");
                                continue;
                            }
                        };
                        let fresh = rec.heartbeat_age(Utc::now()) <= threshold;
                        let online = rec.online && fresh;
                        on_update(PresenceView {
                            user_id: rec.user_id.clone(),
                            online,
                            last_seen: rec.last_seen,
                        });
                        // Arm the deadline only while a liveness claim is
                        // outstanding.
                        pending = if online { Some(rec) } else { None };
                    }
                },
            }
        }
        debug!(user = %user, "presence observation stopped");
    });

    PresenceHandle { stop_tx }
}
