//! CRUD operations for [`Message`] records.
//!
//! `upsert_message` is the reconciliation entry point: replaying the same
//! remote snapshot is harmless, and delivery status can only move forward
//! because every status write goes through the monotonic merge.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use pigeon_shared::constants::MAX_SEND_ATTEMPTS;
use pigeon_shared::{ConversationId, DeliveryStatus, Message, MessageBody, MessageId, UserId};

use crate::database::Database;
use crate::Result;

impl Database {
    /// Insert a message, or replace the existing record with the same
    /// identity. Idempotent.
    pub fn upsert_message(&self, message: &Message) -> Result<()> {
        let (body_kind, body) = body_columns(&message.body);
        self.conn().execute(
            "INSERT INTO messages
                 (id, conversation_id, sender_id, body_kind, body, created_at,
                  status, read_by, synced, send_attempts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                 conversation_id = excluded.conversation_id,
                 sender_id       = excluded.sender_id,
                 body_kind       = excluded.body_kind,
                 body            = excluded.body,
                 created_at      = excluded.created_at,
                 status          = excluded.status,
                 read_by         = excluded.read_by,
                 synced          = excluded.synced,
                 send_attempts   = excluded.send_attempts",
            params![
                message.id.to_string(),
                message.conversation_id.as_str(),
                message.sender_id.as_str(),
                body_kind,
                body,
                message.created_at.to_rfc3339(),
                message.status.as_str(),
                serde_json::to_string(&message.read_by)?,
                message.synced,
                message.send_attempts,
            ],
        )?;
        Ok(())
    }

    /// Fetch a single message. `None` if no record has this identity.
    pub fn get_message(&self, id: MessageId) -> Result<Option<Message>> {
        let row = self
            .conn()
            .query_row(
                &format!("{SELECT_MESSAGE} WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .optional()?;
        Ok(row)
    }

    /// Messages in a conversation, newest first.
    pub fn messages_for_conversation(
        &self,
        conversation_id: &ConversationId,
        limit: u32,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "{SELECT_MESSAGE}
             WHERE conversation_id = ?1
             ORDER BY created_at DESC
             LIMIT ?2"
        ))?;

        let rows = stmt.query_map(params![conversation_id.as_str(), limit], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Messages currently in `status`, optionally scoped to one
    /// conversation, oldest first (retries preserve send order).
    pub fn messages_with_status(
        &self,
        status: DeliveryStatus,
        conversation_id: Option<&ConversationId>,
    ) -> Result<Vec<Message>> {
        let mut messages = Vec::new();
        match conversation_id {
            Some(conv) => {
                let mut stmt = self.conn().prepare(&format!(
                    "{SELECT_MESSAGE}
                     WHERE status = ?1 AND conversation_id = ?2
                     ORDER BY created_at ASC"
                ))?;
                let rows =
                    stmt.query_map(params![status.as_str(), conv.as_str()], row_to_message)?;
                for row in rows {
                    messages.push(row?);
                }
            }
            None => {
                let mut stmt = self.conn().prepare(&format!(
                    "{SELECT_MESSAGE}
                     WHERE status = ?1
                     ORDER BY created_at ASC"
                ))?;
                let rows = stmt.query_map(params![status.as_str()], row_to_message)?;
                for row in rows {
                    messages.push(row?);
                }
            }
        }
        Ok(messages)
    }

    /// Merge an observed delivery status into the stored one, writing only
    /// if it moves the message forward. Returns the resulting status, or
    /// `None` if the message does not exist locally.
    pub fn advance_message_status(
        &self,
        id: MessageId,
        observed: DeliveryStatus,
    ) -> Result<Option<DeliveryStatus>> {
        let Some(current) = self.get_message(id)? else {
            return Ok(None);
        };
        let merged = current.status.merge(observed);
        if merged != current.status {
            self.conn().execute(
                "UPDATE messages SET status = ?2 WHERE id = ?1",
                params![id.to_string(), merged.as_str()],
            )?;
        }
        Ok(Some(merged))
    }

    /// Add `user` to the message's read set. Idempotent; no-op for unknown
    /// messages.
    pub fn add_read_receipt(&self, id: MessageId, user: &UserId) -> Result<()> {
        let Some(mut message) = self.get_message(id)? else {
            return Ok(());
        };
        if message.read_by.insert(user.clone()) {
            self.conn().execute(
                "UPDATE messages SET read_by = ?2 WHERE id = ?1",
                params![id.to_string(), serde_json::to_string(&message.read_by)?],
            )?;
        }
        Ok(())
    }

    /// Record one more send attempt. Once the attempt budget is exhausted a
    /// message still stuck in `Sending` is moved to `Failed` so the retry
    /// queue stops picking it up. Returns the updated attempt count, or
    /// `None` for unknown messages.
    pub fn record_send_attempt(&self, id: MessageId) -> Result<Option<u32>> {
        let Some(message) = self.get_message(id)? else {
            return Ok(None);
        };
        let attempts = message.send_attempts + 1;
        let status = if attempts >= MAX_SEND_ATTEMPTS && message.status == DeliveryStatus::Sending
        {
            DeliveryStatus::Failed
        } else {
            message.status
        };
        self.conn().execute(
            "UPDATE messages SET send_attempts = ?2, status = ?3 WHERE id = ?1",
            params![id.to_string(), attempts, status.as_str()],
        )?;
        Ok(Some(attempts))
    }

    /// Mark a message as confirmed by the remote store: sets the synced
    /// flag and advances the status to at least `Sent`.
    pub fn mark_message_synced(&self, id: MessageId) -> Result<()> {
        self.conn().execute(
            "UPDATE messages SET synced = 1 WHERE id = ?1",
            params![id.to_string()],
        )?;
        self.advance_message_status(id, DeliveryStatus::Sent)?;
        Ok(())
    }
}

const SELECT_MESSAGE: &str = "SELECT id, conversation_id, sender_id, body_kind, body, \
                              created_at, status, read_by, synced, send_attempts FROM messages";

fn body_columns(body: &MessageBody) -> (&'static str, &str) {
    match body {
        MessageBody::Text(text) => ("text", text.as_str()),
        MessageBody::Media { url } => ("media", url.as_str()),
    }
}

/// Map a `rusqlite::Row` to a [`Message`].
fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let conversation_id: String = row.get(1)?;
    let sender_id: String = row.get(2)?;
    let body_kind: String = row.get(3)?;
    let body_raw: String = row.get(4)?;
    let created_str: String = row.get(5)?;
    let status_str: String = row.get(6)?;
    let read_by_json: String = row.get(7)?;
    let synced: bool = row.get(8)?;
    let send_attempts: u32 = row.get(9)?;

    let id = MessageId::parse(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let body = match body_kind.as_str() {
        "media" => MessageBody::Media { url: body_raw },
        _ => MessageBody::Text(body_raw),
    };

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;

    // An unknown status in an old row degrades to the initial state rather
    // than failing the whole query.
    let status = DeliveryStatus::parse(&status_str).unwrap_or(DeliveryStatus::Sending);

    let read_by: BTreeSet<UserId> = serde_json::from_str(&read_by_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Message {
        id,
        conversation_id: ConversationId(conversation_id),
        sender_id: UserId::new(sender_id),
        body,
        created_at,
        status,
        read_by,
        synced,
        send_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pigeon_shared::Message;

    fn open_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    fn outgoing(conv: &ConversationId, sender: &str, text: &str) -> Message {
        Message::outgoing(
            conv.clone(),
            UserId::new(sender),
            MessageBody::Text(text.into()),
        )
    }

    #[test]
    fn upsert_is_idempotent_replace() {
        let (_dir, db) = open_db();
        let conv = ConversationId::direct(&UserId::new("a"), &UserId::new("b"));
        let mut msg = outgoing(&conv, "a", "hello");

        db.upsert_message(&msg).unwrap();
        msg.status = DeliveryStatus::Sent;
        msg.synced = true;
        db.upsert_message(&msg).unwrap();

        let stored = db.get_message(msg.id).unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Sent);
        assert!(stored.synced);
        assert_eq!(db.messages_for_conversation(&conv, 50).unwrap().len(), 1);
    }

    #[test]
    fn conversation_query_orders_newest_first() {
        let (_dir, db) = open_db();
        let conv = ConversationId::direct(&UserId::new("a"), &UserId::new("b"));

        for (i, text) in ["one", "two", "three"].iter().enumerate() {
            let mut msg = outgoing(&conv, "a", text);
            msg.created_at = Utc::now() + chrono::Duration::seconds(i as i64);
            db.upsert_message(&msg).unwrap();
        }

        let messages = db.messages_for_conversation(&conv, 50).unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].body, MessageBody::Text("three".into()));
        assert_eq!(messages[2].body, MessageBody::Text("one".into()));
    }

    #[test]
    fn status_scan_finds_unsent_messages() {
        let (_dir, db) = open_db();
        let conv = ConversationId::direct(&UserId::new("a"), &UserId::new("b"));

        let stuck = outgoing(&conv, "a", "stuck");
        let mut sent = outgoing(&conv, "a", "fine");
        sent.status = DeliveryStatus::Sent;
        db.upsert_message(&stuck).unwrap();
        db.upsert_message(&sent).unwrap();

        let pending = db
            .messages_with_status(DeliveryStatus::Sending, Some(&conv))
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, stuck.id);
    }

    #[test]
    fn advance_status_never_moves_backward() {
        let (_dir, db) = open_db();
        let conv = ConversationId::direct(&UserId::new("a"), &UserId::new("b"));
        let msg = outgoing(&conv, "a", "hello");
        db.upsert_message(&msg).unwrap();

        assert_eq!(
            db.advance_message_status(msg.id, DeliveryStatus::Read).unwrap(),
            Some(DeliveryStatus::Read)
        );
        // A late "sent" confirmation is absorbed.
        assert_eq!(
            db.advance_message_status(msg.id, DeliveryStatus::Sent).unwrap(),
            Some(DeliveryStatus::Read)
        );
        assert_eq!(
            db.get_message(msg.id).unwrap().unwrap().status,
            DeliveryStatus::Read
        );
    }

    #[test]
    fn advance_status_unknown_message_is_none() {
        let (_dir, db) = open_db();
        assert_eq!(
            db.advance_message_status(MessageId::generate(), DeliveryStatus::Sent)
                .unwrap(),
            None
        );
    }

    #[test]
    fn read_receipts_accumulate() {
        let (_dir, db) = open_db();
        let conv = ConversationId::direct(&UserId::new("a"), &UserId::new("b"));
        let msg = outgoing(&conv, "a", "hello");
        db.upsert_message(&msg).unwrap();

        db.add_read_receipt(msg.id, &UserId::new("b")).unwrap();
        db.add_read_receipt(msg.id, &UserId::new("b")).unwrap();

        let stored = db.get_message(msg.id).unwrap().unwrap();
        assert_eq!(stored.read_by.len(), 1);
        assert!(stored.read_by.contains(&UserId::new("b")));
    }

    #[test]
    fn send_attempts_exhaust_into_failed() {
        let (_dir, db) = open_db();
        let conv = ConversationId::direct(&UserId::new("a"), &UserId::new("b"));
        let msg = outgoing(&conv, "a", "doomed");
        db.upsert_message(&msg).unwrap();

        for _ in 0..MAX_SEND_ATTEMPTS {
            db.record_send_attempt(msg.id).unwrap();
        }

        let stored = db.get_message(msg.id).unwrap().unwrap();
        assert_eq!(stored.send_attempts, MAX_SEND_ATTEMPTS);
        assert_eq!(stored.status, DeliveryStatus::Failed);
        // Failed messages are no longer picked up by the retry scan.
        assert!(db
            .messages_with_status(DeliveryStatus::Sending, None)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn mark_synced_upgrades_to_sent() {
        let (_dir, db) = open_db();
        let conv = ConversationId::direct(&UserId::new("a"), &UserId::new("b"));
        let msg = outgoing(&conv, "a", "hello");
        db.upsert_message(&msg).unwrap();

        db.mark_message_synced(msg.id).unwrap();

        let stored = db.get_message(msg.id).unwrap().unwrap();
        assert!(stored.synced);
        assert_eq!(stored.status, DeliveryStatus::Sent);
    }
}
