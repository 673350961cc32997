use crate::Database;
use crate::models::{
    ChangeRow, ConversationRow, DirectInsert, MessageRow, NewMessage, ProfileRow,
};
use anyhow::Result;
use rusqlite::{Connection, ErrorCode, TransactionBehavior, params};

/// Direct conversations are keyed by the lexicographically ordered pair so
/// `(a, b)` and `(b, a)` collide on the same unique index entry.
pub fn ordered_pair<'a>(user_a: &'a str, user_b: &'a str) -> (&'a str, &'a str) {
    if user_a <= user_b {
        (user_a, user_b)
    } else {
        (user_b, user_a)
    }
}

impl Database {
    // -- Profiles --

    pub fn upsert_profile(
        &self,
        user_id: &str,
        username: &str,
        display_name: Option<&str>,
        wallet_address: Option<&str>,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO profiles (user_id, username, display_name, wallet_address)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_id) DO UPDATE SET
                    username = excluded.username,
                    display_name = excluded.display_name,
                    wallet_address = excluded.wallet_address",
                params![user_id, username, display_name, wallet_address],
            )?;
            Ok(())
        })
    }

    pub fn get_profile(&self, user_id: &str) -> Result<Option<ProfileRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT user_id, username, display_name, wallet_address FROM profiles WHERE user_id = ?1",
                [user_id],
                |row| {
                    Ok(ProfileRow {
                        user_id: row.get(0)?,
                        username: row.get(1)?,
                        display_name: row.get(2)?,
                        wallet_address: row.get(3)?,
                    })
                },
            )
            .optional()
        })
    }

    // -- Conversations --

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, kind, name, created_by, created_at FROM conversations WHERE id = ?1",
                [id],
                |row| {
                    Ok(ConversationRow {
                        id: row.get(0)?,
                        kind: row.get(1)?,
                        name: row.get(2)?,
                        created_by: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()
        })
    }

    /// Ids of every direct conversation `user_id` participates in.
    pub fn direct_conversations_for(&self, user_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id FROM conversations c
                 JOIN conversation_participants p ON p.conversation_id = c.id
                 WHERE p.user_id = ?1 AND c.kind = 'direct'
                 ORDER BY c.created_at, c.id",
            )?;
            let ids = stmt
                .query_map([user_id], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    pub fn participants(&self, conversation_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| query_participants(conn, conversation_id))
    }

    pub fn is_participant(&self, conversation_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM conversation_participants WHERE conversation_id = ?1 AND user_id = ?2",
                    [conversation_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Create a direct conversation and both participant rows in one
    /// IMMEDIATE transaction. If any session (in any process) already holds
    /// the pair, nothing is written and the existing id is returned.
    pub fn create_direct_conversation(
        &self,
        id: &str,
        user_a: &str,
        user_b: &str,
        created_at: &str,
    ) -> Result<DirectInsert> {
        let (lo, hi) = ordered_pair(user_a, user_b);

        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            if let Some(existing) = query_direct_by_pair(&tx, lo, hi)? {
                return Ok(DirectInsert::Existing(existing));
            }

            let inserted = tx.execute(
                "INSERT INTO conversations (id, kind, created_by, direct_lo, direct_hi, created_at)
                 VALUES (?1, 'direct', ?2, ?3, ?4, ?5)",
                params![id, user_a, lo, hi, created_at],
            );

            match inserted {
                Ok(_) => {}
                Err(e) if is_constraint_violation(&e) => {
                    drop(tx);
                    return match query_direct_by_pair(conn, lo, hi)? {
                        Some(existing) => Ok(DirectInsert::Existing(existing)),
                        None => Err(e.into()),
                    };
                }
                Err(e) => return Err(e.into()),
            }

            for user in [user_a, user_b] {
                tx.execute(
                    "INSERT INTO conversation_participants (conversation_id, user_id) VALUES (?1, ?2)",
                    params![id, user],
                )?;
            }

            tx.commit()?;
            Ok(DirectInsert::Created(id.to_string()))
        })
    }

    pub fn create_group_conversation(
        &self,
        id: &str,
        name: Option<&str>,
        created_by: &str,
        members: &[&str],
        created_at: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO conversations (id, kind, name, created_by, created_at)
                 VALUES (?1, 'group', ?2, ?3, ?4)",
                params![id, name, created_by, created_at],
            )?;
            for member in members {
                tx.execute(
                    "INSERT INTO conversation_participants (conversation_id, user_id) VALUES (?1, ?2)",
                    params![id, member],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    // -- Messages --

    pub fn insert_message(&self, msg: &NewMessage<'_>) -> Result<i64> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, content, created_at,
                                       chain_hash, chain_verified, gas_used, fee_native, anchor_status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    msg.id,
                    msg.conversation_id,
                    msg.sender_id,
                    msg.content,
                    msg.created_at,
                    msg.chain_hash,
                    msg.chain_verified,
                    msg.gas_used,
                    msg.fee_native,
                    msg.anchor_status,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!("{MESSAGE_SELECT} WHERE id = ?1");
            conn.query_row(&sql, [id], message_from_row).optional()
        })
    }

    /// Messages of a conversation in persistence order. `before` is a rowid
    /// cursor: pass the `seq` of the oldest message of the previous page.
    pub fn get_messages(
        &self,
        conversation_id: &str,
        limit: u32,
        before: Option<i64>,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{MESSAGE_SELECT} WHERE conversation_id = ?1 AND rowid < ?2 ORDER BY rowid DESC LIMIT ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt
                .query_map(
                    params![conversation_id, before.unwrap_or(i64::MAX), limit],
                    message_from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.reverse();
            Ok(rows)
        })
    }

    pub fn recent_messages(&self, limit: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!("{MESSAGE_SELECT} ORDER BY rowid DESC LIMIT ?1");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([limit], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Returns (total, verified).
    pub fn message_stats(&self) -> Result<(u64, u64)> {
        self.with_conn(|conn| {
            let (total, verified): (i64, i64) = conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(chain_verified), 0) FROM messages",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok((total.max(0) as u64, verified.max(0) as u64))
        })
    }

    /// Record an externally confirmed anchor for one message. Setting the
    /// same values twice leaves the row unchanged. Returns rows matched.
    pub fn sync_message(
        &self,
        id: &str,
        chain_hash: &str,
        gas_used: Option<i64>,
        fee_native: Option<&str>,
    ) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE messages SET
                    chain_hash = ?2,
                    chain_verified = 1,
                    gas_used = COALESCE(?3, gas_used),
                    fee_native = COALESCE(?4, fee_native),
                    anchor_status = 'anchored'
                 WHERE id = ?1",
                params![id, chain_hash, gas_used, fee_native],
            )?;
            Ok(n)
        })
    }

    /// Apply a verification result to every message sharing `chain_hash`.
    /// A verified message stays verified: `false` never clears the flag.
    pub fn mark_verified_by_hash(&self, chain_hash: &str, verified: bool) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE messages SET chain_verified = MAX(chain_verified, ?2) WHERE chain_hash = ?1",
                params![chain_hash, verified],
            )?;
            Ok(n)
        })
    }

    // -- Change log --

    pub fn latest_change_seq(&self) -> Result<i64> {
        self.with_conn(|conn| {
            let seq = conn.query_row("SELECT COALESCE(MAX(seq), 0) FROM change_log", [], |row| {
                row.get(0)
            })?;
            Ok(seq)
        })
    }

    pub fn changes_since(&self, after: i64, limit: u32) -> Result<Vec<ChangeRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT seq, table_name, op, row_id, conversation_id FROM change_log
                 WHERE seq > ?1 ORDER BY seq LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![after, limit], |row| {
                    Ok(ChangeRow {
                        seq: row.get(0)?,
                        table_name: row.get(1)?,
                        op: row.get(2)?,
                        row_id: row.get(3)?,
                        conversation_id: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

const MESSAGE_SELECT: &str = "SELECT rowid, id, conversation_id, sender_id, content, created_at,
        chain_hash, chain_verified, gas_used, fee_native, anchor_status FROM messages";

fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        seq: row.get(0)?,
        id: row.get(1)?,
        conversation_id: row.get(2)?,
        sender_id: row.get(3)?,
        content: row.get(4)?,
        created_at: row.get(5)?,
        chain_hash: row.get(6)?,
        chain_verified: row.get(7)?,
        gas_used: row.get(8)?,
        fee_native: row.get(9)?,
        anchor_status: row.get(10)?,
    })
}

fn query_direct_by_pair(conn: &Connection, lo: &str, hi: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT id FROM conversations WHERE kind = 'direct' AND direct_lo = ?1 AND direct_hi = ?2",
        [lo, hi],
        |row| row.get(0),
    )
    .optional()
}

fn query_participants(conn: &Connection, conversation_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT user_id FROM conversation_participants WHERE conversation_id = ?1 ORDER BY id",
    )?;
    let ids = stmt
        .query_map([conversation_id], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
