use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (users, tasks, check-ins, notifications)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          INTEGER PRIMARY KEY,
                username    TEXT NOT NULL UNIQUE,
                nickname    TEXT,
                avatar      TEXT,
                points      INTEGER NOT NULL DEFAULT 0,
                created_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE tasks (
                id                INTEGER PRIMARY KEY,
                title             TEXT NOT NULL,
                address           TEXT,
                longitude         REAL,
                latitude          REAL,
                reward            INTEGER NOT NULL DEFAULT 0,
                completion_count  INTEGER NOT NULL DEFAULT 0,
                created_at        TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE checkin_records (
                id            INTEGER PRIMARY KEY,
                user_id       INTEGER NOT NULL REFERENCES users(id),
                task_id       INTEGER NOT NULL REFERENCES tasks(id),
                longitude     REAL NOT NULL,
                latitude      REAL NOT NULL,
                description   TEXT NOT NULL DEFAULT '',
                photo_url     TEXT,
                audit_status  INTEGER NOT NULL DEFAULT 0,
                audit_remark  TEXT,
                auditor_id    INTEGER,
                created_at    TEXT NOT NULL,
                updated_at    TEXT NOT NULL
            );

            CREATE INDEX idx_checkin_user ON checkin_records(user_id, id);
            CREATE INDEX idx_checkin_task ON checkin_records(task_id, id);
            CREATE INDEX idx_checkin_status ON checkin_records(audit_status, id);

            -- At most one approved check-in per (user, task)
            CREATE UNIQUE INDEX uq_checkin_approved
                ON checkin_records(user_id, task_id) WHERE audit_status = 1;

            CREATE TABLE notifications (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id     INTEGER NOT NULL REFERENCES users(id),
                kind        TEXT NOT NULL,
                title       TEXT NOT NULL,
                message     TEXT NOT NULL,
                related_id  INTEGER,
                is_read     INTEGER NOT NULL DEFAULT 0,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_notifications_user ON notifications(user_id, id);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (follows, chat)");
        conn.execute_batch(
            "
            CREATE TABLE follows (
                follower_id  INTEGER NOT NULL REFERENCES users(id),
                followee_id  INTEGER NOT NULL REFERENCES users(id),
                created_at   TEXT NOT NULL,
                PRIMARY KEY (follower_id, followee_id),
                CHECK (follower_id <> followee_id)
            );

            CREATE INDEX idx_follows_followee ON follows(followee_id, created_at);

            CREATE TABLE chat_sessions (
                id                    INTEGER PRIMARY KEY,
                user_a_id             INTEGER NOT NULL REFERENCES users(id),
                user_b_id             INTEGER NOT NULL REFERENCES users(id),
                last_message_id       INTEGER,
                last_message_preview  TEXT,
                last_message_time     TEXT,
                unread_count_a        INTEGER NOT NULL DEFAULT 0,
                unread_count_b        INTEGER NOT NULL DEFAULT 0,
                created_at            TEXT NOT NULL,
                updated_at            TEXT NOT NULL,
                UNIQUE (user_a_id, user_b_id),
                CHECK (user_a_id < user_b_id)
            );

            CREATE INDEX idx_sessions_user_b ON chat_sessions(user_b_id);

            CREATE TABLE chat_messages (
                id            INTEGER PRIMARY KEY,
                session_id    INTEGER NOT NULL REFERENCES chat_sessions(id),
                sender_id     INTEGER NOT NULL,
                receiver_id   INTEGER NOT NULL,
                content_type  INTEGER NOT NULL DEFAULT 0,
                content       TEXT NOT NULL,
                status        INTEGER NOT NULL DEFAULT 0,
                extra         TEXT,
                created_at    TEXT NOT NULL
            );

            CREATE INDEX idx_messages_session ON chat_messages(session_id, id);
            CREATE INDEX idx_messages_unread ON chat_messages(session_id, receiver_id, status);

            INSERT INTO schema_version (version) VALUES (2);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
