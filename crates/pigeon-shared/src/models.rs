//! Domain model structs persisted in the local cache and mirrored in the
//! remote document store.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the presentation layer.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::LAST_MESSAGE_PREVIEW_LEN;
use crate::status::DeliveryStatus;
use crate::types::{ConversationId, MessageId, UserId};

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Message payload: plain text or a pointer to an already-uploaded media
/// object. Media upload itself is an external concern.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase", tag = "kind", content = "value")]
pub enum MessageBody {
    Text(String),
    Media { url: String },
}

impl MessageBody {
    /// Short text used for the conversation list's last-message snapshot.
    pub fn preview(&self) -> String {
        match self {
            Self::Text(text) => text.chars().take(LAST_MESSAGE_PREVIEW_LEN).collect(),
            Self::Media { .. } => "\u{1f4ce} Media".to_string(),
        }
    }
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Client-generated identity, stable across local and remote writes.
    pub id: MessageId,
    /// The conversation this message belongs to.
    pub conversation_id: ConversationId,
    /// Who sent it.
    pub sender_id: UserId,
    /// Text or media pointer.
    pub body: MessageBody,
    /// When the sender composed it (client clock).
    pub created_at: DateTime<Utc>,
    /// Current position in the delivery lifecycle.
    pub status: DeliveryStatus,
    /// Participants who have read this message.
    pub read_by: BTreeSet<UserId>,
    /// Whether the remote store has confirmed this record. `false` means the
    /// record exists only in the local cache.
    pub synced: bool,
    /// Send attempts so far (initial send plus retries).
    pub send_attempts: u32,
}

impl Message {
    /// Build a fresh outgoing message in the `Sending` state.
    pub fn outgoing(conversation_id: ConversationId, sender_id: UserId, body: MessageBody) -> Self {
        Self {
            id: MessageId::generate(),
            conversation_id,
            sender_id,
            body,
            created_at: Utc::now(),
            status: DeliveryStatus::Sending,
            read_by: BTreeSet::new(),
            synced: false,
            send_attempts: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Direct,
    Group,
}

impl ConversationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "direct" => Some(Self::Direct),
            "group" => Some(Self::Group),
            _ => None,
        }
    }
}

/// Denormalized snapshot of a conversation's most recent message, kept on
/// the conversation record so list rendering needs no join.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LastMessage {
    pub message_id: MessageId,
    pub sender_id: UserId,
    pub preview: String,
    pub sent_at: DateTime<Utc>,
}

/// A durable thread between two or more participants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    pub id: ConversationId,
    pub kind: ConversationKind,
    pub participants: BTreeSet<UserId>,
    /// Display name; group conversations only.
    pub name: Option<String>,
    /// Photo reference; group conversations only.
    pub photo_url: Option<String>,
    pub last_message: Option<LastMessage>,
    /// Per-participant count of messages not yet marked read.
    pub unread: BTreeMap<UserId, u32>,
    pub last_activity: DateTime<Utc>,
}

impl Conversation {
    /// Build a direct conversation between two users, with the deterministic
    /// sorted-pair identity.
    pub fn direct(a: UserId, b: UserId) -> Self {
        let id = ConversationId::direct(&a, &b);
        let participants = BTreeSet::from([a, b]);
        Self {
            id,
            kind: ConversationKind::Direct,
            participants,
            name: None,
            photo_url: None,
            last_message: None,
            unread: BTreeMap::new(),
            last_activity: Utc::now(),
        }
    }

    /// Build a group conversation with a fresh identity.
    pub fn group(participants: BTreeSet<UserId>, name: Option<String>) -> Self {
        Self {
            id: ConversationId::group(),
            kind: ConversationKind::Group,
            participants,
            name,
            photo_url: None,
            last_message: None,
            unread: BTreeMap::new(),
            last_activity: Utc::now(),
        }
    }

    /// Participants other than `user`.
    pub fn others<'a>(&'a self, user: &'a UserId) -> impl Iterator<Item = &'a UserId> {
        self.participants.iter().filter(move |p| *p != user)
    }

    pub fn unread_for(&self, user: &UserId) -> u32 {
        self.unread.get(user).copied().unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// Local read-through cache of a participant's remote profile, refreshed
/// opportunistically.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub id: UserId,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    pub last_seen: DateTime<Utc>,
    pub online: bool,
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

/// Liveness record continuously overwritten by a publishing client.
///
/// The `online` flag is advisory only: observers derive the truth by
/// comparing `last_heartbeat` against their own clock, which bounds
/// staleness even when the publisher crashes without a teardown write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceRecord {
    pub user_id: UserId,
    pub online: bool,
    pub last_seen: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

impl PresenceRecord {
    pub fn online_now(user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            online: true,
            last_seen: now,
            last_heartbeat: now,
        }
    }

    pub fn offline_now(user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            online: false,
            last_seen: now,
            last_heartbeat: now,
        }
    }

    /// Age of the last heartbeat relative to `now`. Zero if the heartbeat
    /// is in the future (skewed clocks).
    pub fn heartbeat_age(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.last_heartbeat).to_std().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_truncates_long_text() {
        let body = MessageBody::Text("x".repeat(500));
        assert_eq!(body.preview().chars().count(), LAST_MESSAGE_PREVIEW_LEN);
    }

    #[test]
    fn outgoing_message_starts_unsent() {
        let msg = Message::outgoing(
            ConversationId::direct(&UserId::new("a"), &UserId::new("b")),
            UserId::new("a"),
            MessageBody::Text("hi".into()),
        );
        assert_eq!(msg.status, DeliveryStatus::Sending);
        assert!(!msg.synced);
        assert!(msg.read_by.is_empty());
    }

    #[test]
    fn others_excludes_the_given_user() {
        let conv = Conversation::direct(UserId::new("a"), UserId::new("b"));
        let me = UserId::new("a");
        let others: Vec<_> = conv.others(&me).collect();
        assert_eq!(others, vec![&UserId::new("b")]);
    }

    #[test]
    fn heartbeat_age_handles_future_timestamps() {
        let mut rec = PresenceRecord::online_now(UserId::new("a"));
        rec.last_heartbeat = Utc::now() + chrono::Duration::seconds(30);
        assert_eq!(rec.heartbeat_age(Utc::now()), std::time::Duration::ZERO);
    }
}
