use anyhow::Result;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    // IMMEDIATE so two processes opening a fresh file don't both migrate it.
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = tx.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        tx.execute_batch(
            "
            CREATE TABLE profiles (
                user_id         TEXT PRIMARY KEY,
                username        TEXT NOT NULL UNIQUE,
                display_name    TEXT,
                wallet_address  TEXT,
                created_at      TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE friends (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL,
                friend_id   TEXT NOT NULL,
                status      TEXT NOT NULL DEFAULT 'pending',
                created_at  TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE(user_id, friend_id)
            );

            -- direct_lo/direct_hi hold the ordered participant pair of a direct
            -- conversation; the partial unique index makes the pair unique.
            CREATE TABLE conversations (
                id          TEXT PRIMARY KEY,
                kind        TEXT NOT NULL CHECK (kind IN ('direct', 'group')),
                name        TEXT,
                created_by  TEXT,
                direct_lo   TEXT,
                direct_hi   TEXT,
                created_at  TEXT NOT NULL,
                CHECK ((kind = 'direct') = (direct_lo IS NOT NULL AND direct_hi IS NOT NULL)),
                CHECK (direct_lo IS NULL OR direct_lo < direct_hi)
            );

            CREATE UNIQUE INDEX idx_conversations_direct_pair
                ON conversations(direct_lo, direct_hi) WHERE kind = 'direct';

            CREATE TABLE conversation_participants (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                user_id         TEXT NOT NULL,
                joined_at       TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE(conversation_id, user_id)
            );

            CREATE INDEX idx_participants_user
                ON conversation_participants(user_id);

            CREATE TABLE messages (
                id              TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                sender_id       TEXT NOT NULL,
                content         TEXT NOT NULL,
                created_at      TEXT NOT NULL,
                chain_hash      TEXT,
                chain_verified  INTEGER NOT NULL DEFAULT 0,
                gas_used        INTEGER,
                fee_native      TEXT,
                anchor_status   TEXT NOT NULL DEFAULT 'unanchored',
                CHECK (chain_verified = 0 OR chain_hash IS NOT NULL)
            );

            CREATE INDEX idx_messages_conversation
                ON messages(conversation_id);

            CREATE INDEX idx_messages_chain_hash
                ON messages(chain_hash);

            CREATE TABLE change_log (
                seq             INTEGER PRIMARY KEY AUTOINCREMENT,
                table_name      TEXT NOT NULL,
                op              TEXT NOT NULL,
                row_id          TEXT NOT NULL,
                conversation_id TEXT NOT NULL,
                recorded_at     TEXT NOT NULL DEFAULT (datetime('now'))
            );

            -- A direct conversation never gains a third participant.
            CREATE TRIGGER direct_participant_limit
                BEFORE INSERT ON conversation_participants
                WHEN (SELECT kind FROM conversations WHERE id = NEW.conversation_id) = 'direct'
                 AND (SELECT COUNT(*) FROM conversation_participants
                      WHERE conversation_id = NEW.conversation_id) >= 2
            BEGIN
                SELECT RAISE(ABORT, 'direct conversation already has two participants');
            END;

            CREATE TRIGGER messages_change_insert
                AFTER INSERT ON messages
            BEGIN
                INSERT INTO change_log (table_name, op, row_id, conversation_id)
                    VALUES ('messages', 'insert', NEW.id, NEW.conversation_id);
            END;

            CREATE TRIGGER messages_change_verified
                AFTER UPDATE OF chain_verified ON messages
                WHEN NEW.chain_verified != OLD.chain_verified
            BEGIN
                INSERT INTO change_log (table_name, op, row_id, conversation_id)
                    VALUES ('messages', 'update', NEW.id, NEW.conversation_id);
            END;

            CREATE TRIGGER participants_change_insert
                AFTER INSERT ON conversation_participants
            BEGIN
                INSERT INTO change_log (table_name, op, row_id, conversation_id)
                    VALUES ('conversation_participants', 'insert', NEW.user_id, NEW.conversation_id);
            END;

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    tx.commit()?;
    info!("Database migrations complete");
    Ok(())
}
