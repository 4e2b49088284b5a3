use crate::models::{NewTask, NotificationRow, TaskRow, UserRow};
use crate::{Database, OptionalExt, now_timestamp};
use anyhow::Result;
use rusqlite::Connection;

impl Database {
    // -- Users --

    pub fn create_user(&self, id: i64, username: &str, nickname: Option<&str>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, nickname) VALUES (?1, ?2, ?3)",
                rusqlite::params![id, username, nickname],
            )?;
            Ok(())
        })
    }

    pub fn get_user(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, id))
    }

    pub fn user_exists(&self, id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row("SELECT 1 FROM users WHERE id = ?1", [id], |row| row.get(0))
                .optional()?;
            Ok(found.is_some())
        })
    }

    // -- Tasks --

    pub fn create_task(&self, task: &NewTask<'_>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO tasks (id, title, address, longitude, latitude, reward)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    task.id,
                    task.title,
                    task.address,
                    task.longitude,
                    task.latitude,
                    task.reward
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_task(&self, id: i64) -> Result<Option<TaskRow>> {
        self.with_conn(|conn| query_task(conn, id))
    }

    // -- Notifications --

    pub fn insert_notification(
        &self,
        user_id: i64,
        kind: &str,
        title: &str,
        message: &str,
        related_id: Option<i64>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO notifications (user_id, kind, title, message, related_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![user_id, kind, title, message, related_id, now_timestamp()],
            )?;
            Ok(())
        })
    }

    /// Newest notifications for a user.
    pub fn get_notifications(&self, user_id: i64, limit: u32) -> Result<Vec<NotificationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, kind, title, message, related_id, created_at
                 FROM notifications
                 WHERE user_id = ?1
                 ORDER BY id DESC
                 LIMIT ?2",
            )?;

            let rows = stmt
                .query_map(rusqlite::params![user_id, limit], |row| {
                    Ok(NotificationRow {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        kind: row.get(2)?,
                        title: row.get(3)?,
                        message: row.get(4)?,
                        related_id: row.get(5)?,
                        created_at: row.get(6)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

// -- Transaction building blocks --
//
// These take a bare connection so callers can compose them inside
// `Database::with_tx`.

/// Adds `amount` to a user's balance. Returns rows changed.
pub fn credit_points(conn: &Connection, user_id: i64, amount: i64) -> Result<usize> {
    let changed = conn.execute(
        "UPDATE users SET points = points + ?2 WHERE id = ?1",
        rusqlite::params![user_id, amount],
    )?;
    Ok(changed)
}

/// Bumps a task's completion counter by one. Returns rows changed.
pub fn increment_completion(conn: &Connection, task_id: i64) -> Result<usize> {
    let changed = conn.execute(
        "UPDATE tasks SET completion_count = completion_count + 1 WHERE id = ?1",
        [task_id],
    )?;
    Ok(changed)
}

fn query_user(conn: &Connection, id: i64) -> Result<Option<UserRow>> {
    let mut stmt =
        conn.prepare("SELECT id, username, nickname, avatar, points FROM users WHERE id = ?1")?;

    let row = stmt
        .query_row([id], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                nickname: row.get(2)?,
                avatar: row.get(3)?,
                points: row.get(4)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_task(conn: &Connection, id: i64) -> Result<Option<TaskRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, title, address, longitude, latitude, reward, completion_count
         FROM tasks WHERE id = ?1",
    )?;

    let row = stmt
        .query_row([id], |row| {
            Ok(TaskRow {
                id: row.get(0)?,
                title: row.get(1)?,
                address: row.get(2)?,
                longitude: row.get(3)?,
                latitude: row.get(4)?,
                reward: row.get(5)?,
                completion_count: row.get(6)?,
            })
        })
        .optional()?;

    Ok(row)
}
