//! Delivery-status state machine.
//!
//! A message only ever moves forward through its lifecycle. Remote snapshots
//! can replay or arrive out of order, so every local status write goes
//! through [`DeliveryStatus::merge`], which keeps the forward-most of the
//! stored and the observed status. A late "sent" confirmation can therefore
//! never overwrite an already-observed "read".

use serde::{Deserialize, Serialize};

/// Lifecycle states of a message.
///
/// `Failed` is reached only locally, after [`crate::constants::MAX_SEND_ATTEMPTS`]
/// send attempts. It ranks below `Sent` so a remote confirmation that arrives
/// after the local give-up still upgrades the record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// Written locally, remote write not yet confirmed.
    Sending,
    /// Gave up after repeated send attempts. Terminal unless the remote
    /// store later confirms the write.
    Failed,
    /// Confirmed by the remote store.
    Sent,
    /// Observed by a recipient's client.
    Delivered,
    /// Seen by a recipient with the conversation open.
    Read,
}

impl DeliveryStatus {
    /// Forward position in the lifecycle; used for monotonic merging.
    fn rank(self) -> u8 {
        match self {
            Self::Sending => 0,
            Self::Failed => 1,
            Self::Sent => 2,
            Self::Delivered => 3,
            Self::Read => 4,
        }
    }

    /// Merge an observed status into the current one, keeping whichever is
    /// further along. Idempotent and order-insensitive.
    #[must_use]
    pub fn merge(self, observed: DeliveryStatus) -> DeliveryStatus {
        if observed.rank() > self.rank() {
            observed
        } else {
            self
        }
    }

    /// Whether the remote store has not yet confirmed this message.
    pub fn is_unsent(self) -> bool {
        matches!(self, Self::Sending)
    }

    /// Stable textual form used in the local schema and remote documents.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sending => "sending",
            Self::Failed => "failed",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
        }
    }

    /// Parse the textual form. Returns `None` for unknown values so callers
    /// can apply their own default at the boundary.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sending" => Some(Self::Sending),
            "failed" => Some(Self::Failed),
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "read" => Some(Self::Read),
            _ => None,
        }
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::DeliveryStatus::{self, *};

    #[test]
    fn merge_moves_forward_only() {
        assert_eq!(Sending.merge(Sent), Sent);
        assert_eq!(Sent.merge(Delivered), Delivered);
        assert_eq!(Delivered.merge(Read), Read);
        // A stale confirmation never rolls the status back.
        assert_eq!(Read.merge(Sent), Read);
        assert_eq!(Delivered.merge(Sending), Delivered);
    }

    #[test]
    fn merge_is_idempotent() {
        for s in [Sending, Failed, Sent, Delivered, Read] {
            assert_eq!(s.merge(s), s);
        }
    }

    #[test]
    fn failed_is_upgraded_by_remote_confirmation() {
        assert_eq!(Failed.merge(Sent), Sent);
        assert_eq!(Failed.merge(Sending), Failed);
    }

    #[test]
    fn text_round_trip() {
        for s in [Sending, Failed, Sent, Delivered, Read] {
            assert_eq!(DeliveryStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(DeliveryStatus::parse("bogus"), None);
    }
}
