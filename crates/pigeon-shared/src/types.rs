use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::DIRECT_ID_SEPARATOR;

// User identity = opaque string issued by the auth provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Conversation identity.
///
/// Direct conversations derive their identity deterministically from the
/// sorted participant pair, so two clients starting "the same" conversation
/// concurrently converge on one record instead of creating duplicates.
/// Group conversations get a fresh UUID.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConversationId(pub String);

impl ConversationId {
    /// Deterministic identity for a direct conversation between two users.
    /// Commutative: `direct(a, b) == direct(b, a)`.
    pub fn direct(a: &UserId, b: &UserId) -> Self {
        let (lo, hi) = if a.0 <= b.0 { (a, b) } else { (b, a) };
        Self(format!("{}{}{}", lo.0, DIRECT_ID_SEPARATOR, hi.0))
    }

    /// Fresh identity for a group conversation.
    pub fn group() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message identity, generated client-side before any persistence and never
/// reassigned. The optimistic local write and the eventual remote write both
/// carry this identity, which is what lets reconciliation recognize them as
/// the same message without a rename step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_id_is_commutative() {
        let a = UserId::new("alice");
        let b = UserId::new("bob");
        assert_eq!(ConversationId::direct(&a, &b), ConversationId::direct(&b, &a));
        assert_eq!(ConversationId::direct(&a, &b).as_str(), "alice_bob");
    }

    #[test]
    fn direct_id_orders_lexicographically() {
        let a = UserId::new("zed");
        let b = UserId::new("amy");
        assert_eq!(ConversationId::direct(&a, &b).as_str(), "amy_zed");
    }

    #[test]
    fn group_ids_are_unique() {
        assert_ne!(ConversationId::group(), ConversationId::group());
    }

    #[test]
    fn message_id_round_trips_through_text() {
        let id = MessageId::generate();
        assert_eq!(MessageId::parse(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn message_id_round_trips_through_json() {
        let id = MessageId::generate();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(serde_json::from_str::<MessageId>(&json).unwrap(), id);
    }
}
