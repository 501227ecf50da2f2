use rusqlite::Connection;

use crate::error::SyncError;

pub fn initialize_schema(conn: &Connection) -> Result<(), SyncError> {
    conn.execute_batch("
        -- Conversations, one per participant set. Row ids of synced tables
        -- are random and shared across devices.
        CREATE TABLE IF NOT EXISTS conversations (
            id                      INTEGER PRIMARY KEY,
            id_matcher              TEXT NOT NULL UNIQUE,   -- normalized participant fingerprint
            title                   TEXT NOT NULL,
            phone_numbers           TEXT NOT NULL,          -- ', ' separated
            snippet                 TEXT,
            timestamp               INTEGER NOT NULL,       -- last activity, epoch ms
            read                    INTEGER NOT NULL DEFAULT 1,
            pinned                  INTEGER NOT NULL DEFAULT 0,
            mute                    INTEGER NOT NULL DEFAULT 0,
            archive                 INTEGER NOT NULL DEFAULT 0,
            private_notifications   INTEGER NOT NULL DEFAULT 0,
            color                   INTEGER NOT NULL,
            color_dark              INTEGER NOT NULL,
            color_light             INTEGER NOT NULL,
            color_accent            INTEGER NOT NULL,
            ringtone_uri            TEXT,
            image_uri               TEXT,
            sim_subscription_id     INTEGER,
            message_count           INTEGER NOT NULL DEFAULT 0,
            unread_count            INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_conversations_rank ON conversations(archive, pinned DESC, timestamp DESC);

        CREATE TABLE IF NOT EXISTS messages (
            id                  INTEGER PRIMARY KEY,
            conversation_id     INTEGER NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            type                INTEGER NOT NULL,       -- 0 received, 1 sent, 2 sending, 3 error, 4 delivered
            data                TEXT NOT NULL,          -- body or content URI
            mime_type           TEXT NOT NULL,
            timestamp           INTEGER NOT NULL,
            read                INTEGER NOT NULL DEFAULT 0,
            seen                INTEGER NOT NULL DEFAULT 0,
            message_from        TEXT,
            color               INTEGER,
            sim_phone_number    TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, timestamp DESC);
        CREATE INDEX IF NOT EXISTS idx_messages_data         ON messages(data, timestamp DESC);
        CREATE INDEX IF NOT EXISTS idx_messages_timestamp    ON messages(timestamp);

        CREATE TABLE IF NOT EXISTS drafts (
            id                  INTEGER PRIMARY KEY,
            conversation_id     INTEGER NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            data                TEXT NOT NULL,
            mime_type           TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_drafts_conversation ON drafts(conversation_id);

        CREATE TABLE IF NOT EXISTS scheduled_messages (
            id          INTEGER PRIMARY KEY,
            to_numbers  TEXT NOT NULL,
            data        TEXT NOT NULL,
            mime_type   TEXT NOT NULL,
            timestamp   INTEGER NOT NULL,   -- send time, epoch ms
            title       TEXT NOT NULL,
            repeat      INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS blacklists (
            id              INTEGER PRIMARY KEY,
            phone_number    TEXT,
            phrase          TEXT,
            CHECK (phone_number IS NOT NULL OR phrase IS NOT NULL)
        );

        CREATE TABLE IF NOT EXISTS contacts (
            id              INTEGER PRIMARY KEY,
            phone_number    TEXT NOT NULL,
            id_matcher      TEXT NOT NULL UNIQUE,
            name            TEXT NOT NULL,
            color           INTEGER NOT NULL,
            color_dark      INTEGER NOT NULL,
            color_light     INTEGER NOT NULL,
            color_accent    INTEGER NOT NULL,
            contact_type    INTEGER NOT NULL DEFAULT 0,
            updated_at      INTEGER NOT NULL    -- epoch ms, compared against the contact watermark
        );

        CREATE INDEX IF NOT EXISTS idx_contacts_updated ON contacts(updated_at);

        -- Account identity and sync checkpoints
        CREATE TABLE IF NOT EXISTS settings (
            key        TEXT PRIMARY KEY,
            value      TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        );

        -- Uploads waiting for the account backend
        CREATE TABLE IF NOT EXISTS outbound_queue (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            resource    TEXT NOT NULL,
            operation   TEXT NOT NULL,                      -- 'add' | 'update' | 'remove'
            entity_id   INTEGER NOT NULL,
            payload     TEXT,                               -- JSON record, plaintext until flushed
            status      TEXT NOT NULL DEFAULT 'pending',    -- 'pending' | 'completed' | 'failed'
            retry_count INTEGER NOT NULL DEFAULT 0,
            last_error  TEXT,
            created_at  INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_outbound_queue_status ON outbound_queue(status, id);
    ")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_creation_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        initialize_schema(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        for table in [
            "conversations",
            "messages",
            "drafts",
            "scheduled_messages",
            "blacklists",
            "contacts",
            "settings",
            "outbound_queue",
        ] {
            assert!(tables.contains(&table.to_string()), "missing {}", table);
        }
    }
}
