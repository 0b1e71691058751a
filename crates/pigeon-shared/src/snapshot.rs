//! Boundary conversion between dynamic remote documents and typed records.
//!
//! The remote document store hands back loosely-shaped JSON maps. Each
//! record type has exactly one strict conversion function here that
//! validates required fields and applies defaults, so nothing downstream
//! ever touches an untyped payload. The inverse `*_to_fields` functions
//! produce the documents we write remotely.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use crate::error::SnapshotError;
use crate::models::{
    Conversation, ConversationKind, LastMessage, Message, MessageBody, PresenceRecord, Profile,
};
use crate::status::DeliveryStatus;
use crate::types::{ConversationId, MessageId, UserId};

/// Shape of a remote document payload.
pub type Fields = Map<String, Value>;

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

fn require_str<'a>(fields: &'a Fields, key: &'static str) -> Result<&'a str, SnapshotError> {
    fields
        .get(key)
        .ok_or(SnapshotError::MissingField(key))?
        .as_str()
        .ok_or_else(|| SnapshotError::invalid(key, "expected a string"))
}

fn opt_str(fields: &Fields, key: &'static str) -> Option<String> {
    fields.get(key).and_then(Value::as_str).map(str::to_string)
}

fn require_time(fields: &Fields, key: &'static str) -> Result<DateTime<Utc>, SnapshotError> {
    let raw = require_str(fields, key)?;
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SnapshotError::invalid(key, e))
}

fn opt_time(fields: &Fields, key: &'static str) -> Option<DateTime<Utc>> {
    fields
        .get(key)
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn user_set(fields: &Fields, key: &'static str) -> BTreeSet<UserId> {
    fields
        .get(key)
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(UserId::new)
                .collect()
        })
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Decode a message document.
///
/// Defaults applied at the edge: a missing or unknown `status` becomes
/// `sent` (the document exists remotely, so it was at least sent), a missing
/// `read_by` becomes the empty set. Remote-origin records are `synced` by
/// definition; `send_attempts` is local-only bookkeeping and starts at zero.
pub fn message_from_fields(fields: &Fields) -> Result<Message, SnapshotError> {
    let id = MessageId::parse(require_str(fields, "id")?)
        .map_err(|e| SnapshotError::invalid("id", e))?;
    let conversation_id = ConversationId(require_str(fields, "conversation_id")?.to_string());
    let sender_id = UserId::new(require_str(fields, "sender_id")?);

    let body: MessageBody = fields
        .get("body")
        .cloned()
        .ok_or(SnapshotError::MissingField("body"))
        .and_then(|v| {
            serde_json::from_value(v).map_err(|e| SnapshotError::invalid("body", e))
        })?;

    let status = fields
        .get("status")
        .and_then(Value::as_str)
        .and_then(DeliveryStatus::parse)
        .unwrap_or(DeliveryStatus::Sent);

    Ok(Message {
        id,
        conversation_id,
        sender_id,
        body,
        created_at: require_time(fields, "created_at")?,
        status,
        read_by: user_set(fields, "read_by"),
        synced: true,
        send_attempts: 0,
    })
}

/// Encode a message for a remote write.
pub fn message_to_fields(msg: &Message) -> Fields {
    let mut fields = Fields::new();
    fields.insert("id".into(), json!(msg.id.to_string()));
    fields.insert("conversation_id".into(), json!(msg.conversation_id.as_str()));
    fields.insert("sender_id".into(), json!(msg.sender_id.as_str()));
    fields.insert(
        "body".into(),
        serde_json::to_value(&msg.body).unwrap_or(Value::Null),
    );
    fields.insert("created_at".into(), json!(msg.created_at.to_rfc3339()));
    fields.insert("status".into(), json!(msg.status.as_str()));
    fields.insert(
        "read_by".into(),
        Value::Array(msg.read_by.iter().map(|u| json!(u.as_str())).collect()),
    );
    fields
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

pub fn conversation_from_fields(fields: &Fields) -> Result<Conversation, SnapshotError> {
    let id = ConversationId(require_str(fields, "id")?.to_string());
    let kind = ConversationKind::parse(require_str(fields, "kind")?)
        .ok_or_else(|| SnapshotError::invalid("kind", "unknown conversation kind"))?;

    let participants = user_set(fields, "participants");
    if participants.is_empty() {
        return Err(SnapshotError::invalid(
            "participants",
            "expected a non-empty array of user ids",
        ));
    }

    let last_message = match fields.get("last_message") {
        Some(Value::Object(obj)) => Some(last_message_from_fields(obj)?),
        _ => None,
    };

    let unread: BTreeMap<UserId, u32> = fields
        .get("unread")
        .and_then(Value::as_object)
        .map(|obj| {
            obj.iter()
                .map(|(user, count)| {
                    // Clamp: the remote atomic increment can transiently
                    // produce negatives if a reset races a decrement.
                    let n = count.as_i64().unwrap_or(0).max(0) as u32;
                    (UserId::new(user.clone()), n)
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(Conversation {
        id,
        kind,
        participants,
        name: opt_str(fields, "name"),
        photo_url: opt_str(fields, "photo_url"),
        last_message,
        unread,
        last_activity: require_time(fields, "last_activity")?,
    })
}

fn last_message_from_fields(fields: &Fields) -> Result<LastMessage, SnapshotError> {
    Ok(LastMessage {
        message_id: MessageId::parse(require_str(fields, "message_id")?)
            .map_err(|e| SnapshotError::invalid("message_id", e))?,
        sender_id: UserId::new(require_str(fields, "sender_id")?),
        preview: require_str(fields, "preview")?.to_string(),
        sent_at: require_time(fields, "sent_at")?,
    })
}

pub fn conversation_to_fields(conv: &Conversation) -> Fields {
    let mut fields = Fields::new();
    fields.insert("id".into(), json!(conv.id.as_str()));
    fields.insert("kind".into(), json!(conv.kind.as_str()));
    fields.insert(
        "participants".into(),
        Value::Array(conv.participants.iter().map(|u| json!(u.as_str())).collect()),
    );
    if let Some(name) = &conv.name {
        fields.insert("name".into(), json!(name));
    }
    if let Some(photo) = &conv.photo_url {
        fields.insert("photo_url".into(), json!(photo));
    }
    if let Some(last) = &conv.last_message {
        fields.insert("last_message".into(), last_message_to_value(last));
    }
    fields.insert(
        "unread".into(),
        Value::Object(
            conv.unread
                .iter()
                .map(|(u, n)| (u.as_str().to_string(), json!(n)))
                .collect(),
        ),
    );
    fields.insert("last_activity".into(), json!(conv.last_activity.to_rfc3339()));
    fields
}

pub fn last_message_to_value(last: &LastMessage) -> Value {
    json!({
        "message_id": last.message_id.to_string(),
        "sender_id": last.sender_id.as_str(),
        "preview": last.preview,
        "sent_at": last.sent_at.to_rfc3339(),
    })
}

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

pub fn profile_from_fields(fields: &Fields) -> Result<Profile, SnapshotError> {
    Ok(Profile {
        id: UserId::new(require_str(fields, "id")?),
        display_name: opt_str(fields, "display_name"),
        photo_url: opt_str(fields, "photo_url"),
        last_seen: opt_time(fields, "last_seen").unwrap_or_else(Utc::now),
        online: fields
            .get("online")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

pub fn profile_to_fields(profile: &Profile) -> Fields {
    let mut fields = Fields::new();
    fields.insert("id".into(), json!(profile.id.as_str()));
    if let Some(name) = &profile.display_name {
        fields.insert("display_name".into(), json!(name));
    }
    if let Some(photo) = &profile.photo_url {
        fields.insert("photo_url".into(), json!(photo));
    }
    fields.insert("last_seen".into(), json!(profile.last_seen.to_rfc3339()));
    fields.insert("online".into(), json!(profile.online));
    fields
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

/// Decode a presence payload. A missing `last_heartbeat` falls back to
/// `last_seen`, and a record with neither timestamp is treated as maximally
/// stale (epoch), so the observer's staleness override kicks in rather than
/// trusting a bare `online` flag.
pub fn presence_from_fields(fields: &Fields) -> Result<PresenceRecord, SnapshotError> {
    let user_id = UserId::new(require_str(fields, "user_id")?);
    let last_seen = opt_time(fields, "last_seen");
    let last_heartbeat = opt_time(fields, "last_heartbeat")
        .or(last_seen)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);

    Ok(PresenceRecord {
        user_id,
        online: fields
            .get("online")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        last_seen: last_seen.unwrap_or(last_heartbeat),
        last_heartbeat,
    })
}

pub fn presence_to_fields(record: &PresenceRecord) -> Fields {
    let mut fields = Fields::new();
    fields.insert("user_id".into(), json!(record.user_id.as_str()));
    fields.insert("online".into(), json!(record.online));
    fields.insert("last_seen".into(), json!(record.last_seen.to_rfc3339()));
    fields.insert(
        "last_heartbeat".into(),
        json!(record.last_heartbeat.to_rfc3339()),
    );
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Message;

    fn sample_message() -> Message {
        let mut msg = Message::outgoing(
            ConversationId::direct(&UserId::new("alice"), &UserId::new("bob")),
            UserId::new("alice"),
            MessageBody::Text("hello".into()),
        );
        msg.status = DeliveryStatus::Delivered;
        msg.read_by.insert(UserId::new("bob"));
        msg
    }

    #[test]
    fn message_round_trip() {
        let msg = sample_message();
        let decoded = message_from_fields(&message_to_fields(&msg)).unwrap();
        assert_eq!(decoded.id, msg.id);
        assert_eq!(decoded.body, msg.body);
        assert_eq!(decoded.status, msg.status);
        assert_eq!(decoded.read_by, msg.read_by);
        assert!(decoded.synced);
    }

    #[test]
    fn message_status_defaults_to_sent() {
        let mut fields = message_to_fields(&sample_message());
        fields.remove("status");
        let decoded = message_from_fields(&fields).unwrap();
        assert_eq!(decoded.status, DeliveryStatus::Sent);

        fields.insert("status".into(), json!("definitely-not-a-status"));
        let decoded = message_from_fields(&fields).unwrap();
        assert_eq!(decoded.status, DeliveryStatus::Sent);
    }

    #[test]
    fn message_missing_id_is_rejected() {
        let mut fields = message_to_fields(&sample_message());
        fields.remove("id");
        assert!(matches!(
            message_from_fields(&fields),
            Err(SnapshotError::MissingField("id"))
        ));
    }

    #[test]
    fn conversation_round_trip_with_unread() {
        let mut conv = Conversation::direct(UserId::new("alice"), UserId::new("bob"));
        conv.unread.insert(UserId::new("bob"), 3);
        conv.last_message = Some(LastMessage {
            message_id: MessageId::generate(),
            sender_id: UserId::new("alice"),
            preview: "hello".into(),
            sent_at: Utc::now(),
        });

        let decoded = conversation_from_fields(&conversation_to_fields(&conv)).unwrap();
        assert_eq!(decoded.id, conv.id);
        assert_eq!(decoded.unread_for(&UserId::new("bob")), 3);
        assert!(decoded.last_message.is_some());
    }

    #[test]
    fn conversation_negative_unread_is_clamped() {
        let mut fields =
            conversation_to_fields(&Conversation::direct(UserId::new("a"), UserId::new("b")));
        fields.insert("unread".into(), json!({ "b": -2 }));
        let decoded = conversation_from_fields(&fields).unwrap();
        assert_eq!(decoded.unread_for(&UserId::new("b")), 0);
    }

    #[test]
    fn conversation_without_participants_is_rejected() {
        let mut fields =
            conversation_to_fields(&Conversation::direct(UserId::new("a"), UserId::new("b")));
        fields.insert("participants".into(), json!([]));
        assert!(conversation_from_fields(&fields).is_err());
    }

    #[test]
    fn presence_without_heartbeat_reads_as_stale() {
        let mut fields = Fields::new();
        fields.insert("user_id".into(), json!("alice"));
        fields.insert("online".into(), json!(true));
        let rec = presence_from_fields(&fields).unwrap();
        assert!(rec.online);
        assert!(rec.heartbeat_age(Utc::now()) > std::time::Duration::from_secs(3600));
    }
}
