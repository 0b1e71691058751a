//! CRUD operations for [`Conversation`] records, including the unread
//! counter bookkeeping that rides on them.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use pigeon_shared::{Conversation, ConversationId, ConversationKind, LastMessage, UserId};

use crate::database::Database;
use crate::Result;

impl Database {
    // ------------------------------------------------------------------
    // Create / replace
    // ------------------------------------------------------------------

    /// Insert a conversation, or replace the existing record with the same
    /// identity. Idempotent, which is what makes concurrent direct-
    /// conversation creation from both sides converge on one record.
    pub fn upsert_conversation(&self, conv: &Conversation) -> Result<()> {
        self.conn().execute(
            "INSERT INTO conversations
                 (id, kind, participants, name, photo_url, last_message, unread, last_activity)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                 kind          = excluded.kind,
                 participants  = excluded.participants,
                 name          = excluded.name,
                 photo_url     = excluded.photo_url,
                 last_message  = excluded.last_message,
                 unread        = excluded.unread,
                 last_activity = excluded.last_activity",
            params![
                conv.id.as_str(),
                conv.kind.as_str(),
                serde_json::to_string(&conv.participants)?,
                conv.name,
                conv.photo_url,
                conv.last_message
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                serde_json::to_string(&conv.unread)?,
                conv.last_activity.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single conversation. `None` if unknown locally.
    pub fn get_conversation(&self, id: &ConversationId) -> Result<Option<Conversation>> {
        let row = self
            .conn()
            .query_row(
                &format!("{SELECT_CONVERSATION} WHERE id = ?1"),
                params![id.as_str()],
                row_to_conversation,
            )
            .optional()?;
        Ok(row)
    }

    /// All conversations, most recently active first.
    pub fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let mut stmt = self.conn().prepare(&format!(
            "{SELECT_CONVERSATION} ORDER BY last_activity DESC"
        ))?;

        let rows = stmt.query_map([], row_to_conversation)?;

        let mut conversations = Vec::new();
        for row in rows {
            conversations.push(row?);
        }
        Ok(conversations)
    }

    // ------------------------------------------------------------------
    // Bookkeeping
    // ------------------------------------------------------------------

    /// Replace the denormalized last-message snapshot and bump
    /// last-activity. No-op for unknown conversations (cache population is
    /// best-effort).
    pub fn set_last_message(
        &self,
        id: &ConversationId,
        last: &LastMessage,
    ) -> Result<()> {
        self.conn().execute(
            "UPDATE conversations SET last_message = ?2, last_activity = ?3 WHERE id = ?1",
            params![
                id.as_str(),
                serde_json::to_string(last)?,
                last.sent_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Increment the unread counter of every participant except `sender`.
    ///
    /// This local mirror runs inside the store worker's FIFO queue, so
    /// overlapping increments from different senders cannot lose updates.
    /// The authoritative counter lives remotely and uses the document
    /// store's atomic increment.
    pub fn increment_unread(&self, id: &ConversationId, sender: &UserId) -> Result<()> {
        let Some(mut conv) = self.get_conversation(id)? else {
            return Ok(());
        };
        let others: Vec<UserId> = conv.others(sender).cloned().collect();
        for user in others {
            *conv.unread.entry(user).or_insert(0) += 1;
        }
        self.write_unread(id, &conv.unread)
    }

    /// Reset `user`'s unread counter to zero. Idempotent.
    pub fn reset_unread(&self, id: &ConversationId, user: &UserId) -> Result<()> {
        let Some(mut conv) = self.get_conversation(id)? else {
            return Ok(());
        };
        if conv.unread.insert(user.clone(), 0) == Some(0) {
            return Ok(());
        }
        self.write_unread(id, &conv.unread)
    }

    fn write_unread(&self, id: &ConversationId, unread: &BTreeMap<UserId, u32>) -> Result<()> {
        self.conn().execute(
            "UPDATE conversations SET unread = ?2 WHERE id = ?1",
            params![id.as_str(), serde_json::to_string(unread)?],
        )?;
        Ok(())
    }
}

const SELECT_CONVERSATION: &str = "SELECT id, kind, participants, name, photo_url, \
                                   last_message, unread, last_activity FROM conversations";

/// Map a `rusqlite::Row` to a [`Conversation`].
fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let id: String = row.get(0)?;
    let kind_str: String = row.get(1)?;
    let participants_json: String = row.get(2)?;
    let name: Option<String> = row.get(3)?;
    let photo_url: Option<String> = row.get(4)?;
    let last_message_json: Option<String> = row.get(5)?;
    let unread_json: String = row.get(6)?;
    let activity_str: String = row.get(7)?;

    let kind = ConversationKind::parse(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown conversation kind `{kind_str}`").into(),
        )
    })?;

    let participants: BTreeSet<UserId> =
        serde_json::from_str(&participants_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;

    let last_message: Option<LastMessage> = last_message_json
        .map(|json| serde_json::from_str(&json))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;

    let unread: BTreeMap<UserId, u32> = serde_json::from_str(&unread_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let last_activity: DateTime<Utc> = DateTime::parse_from_rfc3339(&activity_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Conversation {
        id: ConversationId(id),
        kind,
        participants,
        name,
        photo_url,
        last_message,
        unread,
        last_activity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pigeon_shared::MessageId;

    fn open_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    #[test]
    fn direct_creation_from_both_sides_converges() {
        let (_dir, db) = open_db();
        let from_a = Conversation::direct(UserId::new("alice"), UserId::new("bob"));
        let from_b = Conversation::direct(UserId::new("bob"), UserId::new("alice"));

        db.upsert_conversation(&from_a).unwrap();
        db.upsert_conversation(&from_b).unwrap();

        assert_eq!(from_a.id, from_b.id);
        assert_eq!(db.list_conversations().unwrap().len(), 1);
    }

    #[test]
    fn list_orders_by_activity() {
        let (_dir, db) = open_db();
        let mut old = Conversation::direct(UserId::new("a"), UserId::new("b"));
        old.last_activity = Utc::now() - chrono::Duration::hours(1);
        let recent = Conversation::direct(UserId::new("a"), UserId::new("c"));

        db.upsert_conversation(&old).unwrap();
        db.upsert_conversation(&recent).unwrap();

        let listed = db.list_conversations().unwrap();
        assert_eq!(listed[0].id, recent.id);
        assert_eq!(listed[1].id, old.id);
    }

    #[test]
    fn unread_increment_skips_sender() {
        let (_dir, db) = open_db();
        let conv = Conversation::direct(UserId::new("alice"), UserId::new("bob"));
        db.upsert_conversation(&conv).unwrap();

        db.increment_unread(&conv.id, &UserId::new("alice")).unwrap();
        db.increment_unread(&conv.id, &UserId::new("alice")).unwrap();

        let stored = db.get_conversation(&conv.id).unwrap().unwrap();
        assert_eq!(stored.unread_for(&UserId::new("bob")), 2);
        assert_eq!(stored.unread_for(&UserId::new("alice")), 0);
    }

    #[test]
    fn reset_unread_is_idempotent() {
        let (_dir, db) = open_db();
        let conv = Conversation::direct(UserId::new("alice"), UserId::new("bob"));
        db.upsert_conversation(&conv).unwrap();
        db.increment_unread(&conv.id, &UserId::new("alice")).unwrap();

        db.reset_unread(&conv.id, &UserId::new("bob")).unwrap();
        db.reset_unread(&conv.id, &UserId::new("bob")).unwrap();

        let stored = db.get_conversation(&conv.id).unwrap().unwrap();
        assert_eq!(stored.unread_for(&UserId::new("bob")), 0);
    }

    #[test]
    fn last_message_snapshot_bumps_activity() {
        let (_dir, db) = open_db();
        let mut conv = Conversation::direct(UserId::new("a"), UserId::new("b"));
        conv.last_activity = Utc::now() - chrono::Duration::hours(1);
        db.upsert_conversation(&conv).unwrap();

        let last = LastMessage {
            message_id: MessageId::generate(),
            sender_id: UserId::new("a"),
            preview: "latest".into(),
            sent_at: Utc::now(),
        };
        db.set_last_message(&conv.id, &last).unwrap();

        let stored = db.get_conversation(&conv.id).unwrap().unwrap();
        assert_eq!(stored.last_message.as_ref().unwrap().preview, "latest");
        assert!(stored.last_activity > conv.last_activity);
    }
}
