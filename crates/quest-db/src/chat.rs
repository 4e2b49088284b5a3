use crate::models::{MessageRow, SessionRow};
use crate::{Database, OptionalExt, now_timestamp};
use anyhow::Result;
use rusqlite::{Connection, Row};

const SESSION_COLUMNS: &str = "id, user_a_id, user_b_id, last_message_id, last_message_preview,
     last_message_time, unread_count_a, unread_count_b, created_at, updated_at";

const MESSAGE_COLUMNS: &str =
    "id, session_id, sender_id, receiver_id, content_type, content, status, extra, created_at";

/// Message status codes as stored; mirrors `quest_types::models::MessageStatus`.
const SENT: i32 = 0;
const DELIVERED: i32 = 1;
const READ: i32 = 2;

pub struct NewMessage<'a> {
    pub id: i64,
    pub session_id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub content_type: i32,
    pub content: &'a str,
    pub extra: Option<&'a str>,
    pub created_at: &'a str,
}

impl Database {
    // -- Sessions --

    pub fn get_session(&self, id: i64) -> Result<Option<SessionRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM chat_sessions WHERE id = ?1", SESSION_COLUMNS);
            Ok(conn.query_row(&sql, [id], map_session).optional()?)
        })
    }

    /// Looks up a session by its canonical pair (`user_a_id < user_b_id`).
    pub fn get_session_by_pair(&self, user_a_id: i64, user_b_id: i64) -> Result<Option<SessionRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM chat_sessions WHERE user_a_id = ?1 AND user_b_id = ?2",
                SESSION_COLUMNS
            );
            Ok(conn
                .query_row(&sql, rusqlite::params![user_a_id, user_b_id], map_session)
                .optional()?)
        })
    }

    /// Inserts an empty session. A second insert for the same pair fails with
    /// a constraint violation.
    pub fn insert_session(&self, id: i64, user_a_id: i64, user_b_id: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chat_sessions (id, user_a_id, user_b_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                rusqlite::params![id, user_a_id, user_b_id, now_timestamp()],
            )?;
            Ok(())
        })
    }

    /// Sessions the user takes part in, most recently updated first.
    pub fn sessions_for_user(&self, user_id: i64) -> Result<Vec<SessionRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM chat_sessions
                 WHERE user_a_id = ?1 OR user_b_id = ?1
                 ORDER BY updated_at DESC, id DESC",
                SESSION_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id], map_session)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Records the latest message on the session, zeroes the sender's unread
    /// counter and bumps the receiver's, all in one transaction.
    pub fn record_session_message(
        &self,
        session_id: i64,
        message_id: i64,
        preview: &str,
        sent_at: &str,
        sender_id: i64,
        receiver_id: i64,
    ) -> Result<()> {
        self.with_tx(|tx| {
            tx.execute(
                "UPDATE chat_sessions
                 SET last_message_id = ?2, last_message_preview = ?3,
                     last_message_time = ?4, updated_at = ?4
                 WHERE id = ?1",
                rusqlite::params![session_id, message_id, preview, sent_at],
            )?;
            reset_unread(tx, session_id, sender_id)?;
            tx.execute(
                "UPDATE chat_sessions
                 SET unread_count_a = unread_count_a + (user_a_id = ?2),
                     unread_count_b = unread_count_b + (user_b_id = ?2)
                 WHERE id = ?1",
                rusqlite::params![session_id, receiver_id],
            )?;
            Ok(())
        })
    }

    // -- Messages --

    pub fn insert_message(&self, msg: &NewMessage<'_>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chat_messages
                    (id, session_id, sender_id, receiver_id, content_type, content, status, extra, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    msg.id,
                    msg.session_id,
                    msg.sender_id,
                    msg.receiver_id,
                    msg.content_type,
                    msg.content,
                    SENT,
                    msg.extra,
                    msg.created_at
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_message(&self, id: i64) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM chat_messages WHERE id = ?1", MESSAGE_COLUMNS);
            Ok(conn.query_row(&sql, [id], map_message).optional()?)
        })
    }

    /// One window of a session's history, newest first.
    pub fn messages_newest_first(&self, session_id: i64, offset: u32, limit: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM chat_messages
                 WHERE session_id = ?1
                 ORDER BY id DESC
                 LIMIT ?2 OFFSET ?3",
                MESSAGE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![session_id, limit, offset], map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Moves every Sent/Delivered message addressed to `receiver_id` in the
    /// session to Read and zeroes their unread counter. Returns how many
    /// messages changed.
    pub fn mark_session_read(&self, session_id: i64, receiver_id: i64) -> Result<usize> {
        self.with_tx(|tx| {
            let changed = tx.execute(
                "UPDATE chat_messages SET status = ?3
                 WHERE session_id = ?1 AND receiver_id = ?2 AND status IN (?4, ?5)",
                rusqlite::params![session_id, receiver_id, READ, SENT, DELIVERED],
            )?;
            reset_unread(tx, session_id, receiver_id)?;
            Ok(changed)
        })
    }
}

fn reset_unread(conn: &Connection, session_id: i64, user_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE chat_sessions
         SET unread_count_a = CASE WHEN user_a_id = ?2 THEN 0 ELSE unread_count_a END,
             unread_count_b = CASE WHEN user_b_id = ?2 THEN 0 ELSE unread_count_b END
         WHERE id = ?1",
        rusqlite::params![session_id, user_id],
    )?;
    Ok(())
}

fn map_session(row: &Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        id: row.get(0)?,
        user_a_id: row.get(1)?,
        user_b_id: row.get(2)?,
        last_message_id: row.get(3)?,
        last_message_preview: row.get(4)?,
        last_message_time: row.get(5)?,
        unread_count_a: row.get(6)?,
        unread_count_b: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn map_message(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        session_id: row.get(1)?,
        sender_id: row.get(2)?,
        receiver_id: row.get(3)?,
        content_type: row.get(4)?,
        content: row.get(5)?,
        status: row.get(6)?,
        extra: row.get(7)?,
        created_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_pair() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.create_user(1, "ada", None).unwrap();
        db.create_user(2, "bob", None).unwrap();
        db.insert_session(100, 1, 2).unwrap();
        db
    }

    #[test]
    fn pair_is_unique_and_ordered() {
        let db = with_pair();
        let dup = db.insert_session(101, 1, 2).unwrap_err();
        assert!(crate::is_constraint_violation(&dup));

        let reversed = db.insert_session(102, 2, 1).unwrap_err();
        assert!(crate::is_constraint_violation(&reversed));
    }

    #[test]
    fn unread_counters_follow_direction() {
        let db = with_pair();
        let ts = now_timestamp();
        db.record_session_message(100, 5, "hi", &ts, 1, 2).unwrap();
        db.record_session_message(100, 6, "again", &ts, 1, 2).unwrap();

        let session = db.get_session(100).unwrap().unwrap();
        assert_eq!(session.unread_count_a, 0);
        assert_eq!(session.unread_count_b, 2);
        assert_eq!(session.last_message_id, Some(6));

        db.record_session_message(100, 7, "reply", &ts, 2, 1).unwrap();
        let session = db.get_session(100).unwrap().unwrap();
        assert_eq!(session.unread_count_a, 1);
        assert_eq!(session.unread_count_b, 0);
    }
}
