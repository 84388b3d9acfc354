//! v001 -- Initial schema creation.
//!
//! Creates the four core tables: `conversations`, `messages`,
//! `device_registration`, and `device_topics`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Conversations (preview cache)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conversations (
    id             TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    participants   TEXT NOT NULL,              -- JSON array of user ids
    is_group       INTEGER NOT NULL DEFAULT 0, -- boolean 0/1
    preview_text   TEXT,
    preview_sender TEXT,
    preview_at     TEXT                        -- RFC-3339, fixed precision
);

-- ----------------------------------------------------------------
-- Messages (recently synced window)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id              TEXT PRIMARY KEY NOT NULL, -- UUID v4
    conversation_id TEXT NOT NULL,
    sender_id       TEXT NOT NULL,
    sender_name     TEXT NOT NULL,
    body            TEXT NOT NULL,             -- JSON MessageBody
    timestamp       TEXT NOT NULL,             -- RFC-3339, fixed precision
    read_by         TEXT NOT NULL              -- JSON array of user ids
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation_ts
    ON messages(conversation_id, timestamp DESC, id DESC);

-- ----------------------------------------------------------------
-- Device registration (single row per install)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS device_registration (
    device_id         TEXT PRIMARY KEY NOT NULL, -- UUID v4
    user_id           TEXT,
    push_token        TEXT,
    platform          TEXT NOT NULL,
    permission_denied INTEGER NOT NULL DEFAULT 0,
    updated_at        TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Topic memberships
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS device_topics (
    topic         TEXT PRIMARY KEY NOT NULL,
    subscribed_at TEXT NOT NULL
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
