//! Network-status reconnect state machine.
//!
//! The platform's network observer feeds `{connected, reachable}` pairs
//! into a `watch` channel. This module reduces them to a two-state link
//! machine and emits exactly one event per edge, decoupled from any UI
//! lifecycle. The session reacts to `Reconnected` by running the retry
//! queue and respawning dead reconciliation listeners.

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

/// Raw sample from the platform network observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetStatus {
    pub connected: bool,
    pub reachable: bool,
}

impl NetStatus {
    pub const OFFLINE: NetStatus = NetStatus {
        connected: false,
        reachable: false,
    };

    pub const ONLINE: NetStatus = NetStatus {
        connected: true,
        reachable: true,
    };

    /// The link is usable only when both flags hold.
    pub fn is_online(self) -> bool {
        self.connected && self.reachable
    }
}

/// Edge events produced by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// Disconnected -> connected edge.
    Reconnected,
    /// Connected -> disconnected edge.
    Dropped,
}

/// Handle to the reconnect driver task. Stopping is idempotent; dropping
/// the handle stops the task too.
pub struct ReconnectDriver {
    stop_tx: watch::Sender<bool>,
}

impl ReconnectDriver {
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

impl Drop for ReconnectDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Spawn the driver. Returns the handle and the edge-event receiver.
///
/// Repeated samples on the same side of the edge are absorbed: three
/// "offline" reports in a row produce no event, and the eventual "online"
/// report produces exactly one `Reconnected`.
pub fn spawn_reconnect_driver(
    mut status_rx: watch::Receiver<NetStatus>,
) -> (ReconnectDriver, mpsc::Receiver<LinkEvent>) {
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let (event_tx, event_rx) = mpsc::channel(8);

    // Captured before the task is scheduled so samples arriving in the
    // meantime still register as edges.
    let mut online = status_rx.borrow().is_online();

    tokio::spawn(async move {
        debug!(online, "reconnect driver started");

        loop {
            tokio::select! {
                _ = stop_rx.changed() => break,
                changed = status_rx.changed() => {
                    if changed.is_err() {
                        // Observer gone; nothing further to drive.
                        break;
                    }
                    let now_online = status_rx.borrow().is_online();
                    let event = match (online, now_online) {
                        (false, true) => Some(LinkEvent::Reconnected),
                        (true, false) => Some(LinkEvent::Dropped),
                        _ => None,
                    };
                    online = now_online;
                    if let Some(event) = event {
                        info!(?event, "network link changed");
                        if event_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
        debug!("reconnect driver stopped");
    });

    (ReconnectDriver { stop_tx }, event_rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emits_one_event_per_edge() {
        let (status_tx, status_rx) = watch::channel(NetStatus::OFFLINE);
        let (_driver, mut events) = spawn_reconnect_driver(status_rx);

        // Repeated offline samples: no event.
        status_tx.send(NetStatus::OFFLINE).unwrap();
        status_tx
            .send(NetStatus {
                connected: true,
                reachable: false,
            })
            .unwrap();

        status_tx.send(NetStatus::ONLINE).unwrap();
        assert_eq!(events.recv().await, Some(LinkEvent::Reconnected));

        status_tx.send(NetStatus::OFFLINE).unwrap();
        assert_eq!(events.recv().await, Some(LinkEvent::Dropped));
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let (_status_tx, status_rx) = watch::channel(NetStatus::ONLINE);
        let (driver, _events) = spawn_reconnect_driver(status_rx);
        driver.stop();
        driver.stop();
    }
}
