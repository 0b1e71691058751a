//! Publisher half of the presence subsystem.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use pigeon_shared::constants::HEARTBEAT_INTERVAL;
use pigeon_shared::snapshot::presence_to_fields;
use pigeon_shared::{PresenceRecord, UserId};

use crate::backend::PresenceStore;
use crate::error::PresenceError;

/// Session-scoped heartbeat publisher.
///
/// On start it writes an online record, installs the abrupt-disconnect
/// offline fallback, and then overwrites the heartbeat timestamp on a fixed
/// cadence from a background task. [`PresencePublisher::shutdown`] is the
/// single teardown: it stops the loop, cancels the disconnect fallback, and
/// writes an explicit offline record. No ambient singletons; dropping the
/// publisher without `shutdown` stops the loop and leaves the crash
/// fallback to the store.
pub struct PresencePublisher {
    store: Arc<dyn PresenceStore>,
    user: UserId,
    stop_tx: watch::Sender<bool>,
    interval: Duration,
}

impl PresencePublisher {
    /// Start publishing with the default heartbeat interval.
    pub async fn start(
        store: Arc<dyn PresenceStore>,
        user: UserId,
    ) -> Result<Self, PresenceError> {
        Self::start_with_interval(store, user, HEARTBEAT_INTERVAL).await
    }

    /// Start publishing with an explicit interval (tests shrink it).
    pub async fn start_with_interval(
        store: Arc<dyn PresenceStore>,
        user: UserId,
        interval: Duration,
    ) -> Result<Self, PresenceError> {
        // Crash safety net first, so a failure between here and the first
        // heartbeat still converges to offline.
        store
            .install_on_disconnect(
                &user,
                presence_to_fields(&PresenceRecord::offline_now(user.clone())),
            )
            .await?;
        store
            .set(
                &user,
                presence_to_fields(&PresenceRecord::online_now(user.clone())),
            )
            .await?;

        info!(user = %user, interval_ms = interval.as_millis() as u64, "presence publishing started");

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let loop_store = store.clone();
        let loop_user = user.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // first tick fires immediately; already written
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {
                        let beat = PresenceRecord::online_now(loop_user.clone());
                        if let Err(e) = loop_store.set(&loop_user, presence_to_fields(&beat)).await {
                            // Keep beating; observers degrade us to offline
                            // via staleness in the meantime.
                            warn!(user = %loop_user, error = %e, "heartbeat write failed");
                        }
                    }
                }
            }
            debug!(user = %loop_user, "heartbeat loop stopped");
        });

        Ok(Self {
            store,
            user,
            stop_tx,
            interval,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Controlled teardown: stop the heartbeat loop, cancel the disconnect
    /// fallback, and write an explicit offline record. Idempotent.
    pub async fn shutdown(&self) {
        let _ = self.stop_tx.send(true);

        if let Err(e) = self.store.cancel_on_disconnect(&self.user).await {
            warn!(user = %self.user, error = %e, "could not cancel disconnect fallback");
        }
        let offline = PresenceRecord::offline_now(self.user.clone());
        if let Err(e) = self.store.set(&self.user, presence_to_fields(&offline)).await {
            warn!(user = %self.user, error = %e, "offline write failed during teardown");
        }
        info!(user = %self.user, "presence publishing stopped");
    }
}

impl Drop for PresencePublisher {
    fn drop(&mut self) {
        // Stops the loop only. The explicit offline write needs `shutdown`;
        // without it the store's disconnect fallback takes over.
        let _ = self.stop_tx.send(true);
    }
}
