//! v001 -- Initial schema creation.
//!
//! Creates the three core tables: `messages`, `conversations`, and
//! `profiles`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id              TEXT PRIMARY KEY NOT NULL,  -- client-generated UUID v4
    conversation_id TEXT NOT NULL,
    sender_id       TEXT NOT NULL,
    body_kind       TEXT NOT NULL,              -- 'text' | 'media'
    body            TEXT NOT NULL,              -- text content or media URL
    created_at      TEXT NOT NULL,              -- ISO-8601 / RFC-3339
    status          TEXT NOT NULL,              -- delivery lifecycle state
    read_by         TEXT NOT NULL DEFAULT '[]', -- JSON array of user ids
    synced          INTEGER NOT NULL DEFAULT 0, -- boolean 0/1
    send_attempts   INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation_ts
    ON messages(conversation_id, created_at DESC);

CREATE INDEX IF NOT EXISTS idx_messages_status
    ON messages(status);

-- ----------------------------------------------------------------
-- Conversations
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conversations (
    id            TEXT PRIMARY KEY NOT NULL,    -- sorted pair or UUID v4
    kind          TEXT NOT NULL,                -- 'direct' | 'group'
    participants  TEXT NOT NULL,                -- JSON array of user ids
    name          TEXT,                         -- group only
    photo_url     TEXT,                         -- group only
    last_message  TEXT,                         -- JSON snapshot, nullable
    unread        TEXT NOT NULL DEFAULT '{}',   -- JSON object user id -> count
    last_activity TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_conversations_activity
    ON conversations(last_activity DESC);

-- ----------------------------------------------------------------
-- Profiles (read-through cache of remote profile data)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS profiles (
    id           TEXT PRIMARY KEY NOT NULL,
    display_name TEXT,
    photo_url    TEXT,
    last_seen    TEXT NOT NULL,
    online       INTEGER NOT NULL DEFAULT 0     -- boolean 0/1
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
