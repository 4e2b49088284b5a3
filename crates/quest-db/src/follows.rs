use crate::models::FollowRow;
use crate::{Database, OptionalExt, now_timestamp};
use anyhow::Result;
use rusqlite::Connection;

impl Database {
    /// Inserts the edge. A duplicate fails with a constraint violation.
    pub fn insert_follow(&self, follower_id: i64, followee_id: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO follows (follower_id, followee_id, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![follower_id, followee_id, now_timestamp()],
            )?;
            Ok(())
        })
    }

    pub fn delete_follow(&self, follower_id: i64, followee_id: i64) -> Result<usize> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM follows WHERE follower_id = ?1 AND followee_id = ?2",
                rusqlite::params![follower_id, followee_id],
            )?;
            Ok(changed)
        })
    }

    pub fn is_following(&self, follower_id: i64, followee_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM follows WHERE follower_id = ?1 AND followee_id = ?2",
                    rusqlite::params![follower_id, followee_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Users `user_id` follows, newest edge first, with the total count.
    pub fn following(&self, user_id: i64, offset: u32, limit: u32) -> Result<(Vec<FollowRow>, i64)> {
        self.with_conn(|conn| page_follows(conn, Direction::Following, user_id, offset, limit))
    }

    /// Users following `user_id`, newest edge first, with the total count.
    pub fn followers(&self, user_id: i64, offset: u32, limit: u32) -> Result<(Vec<FollowRow>, i64)> {
        self.with_conn(|conn| page_follows(conn, Direction::Followers, user_id, offset, limit))
    }
}

enum Direction {
    Following,
    Followers,
}

fn page_follows(
    conn: &Connection,
    direction: Direction,
    user_id: i64,
    offset: u32,
    limit: u32,
) -> Result<(Vec<FollowRow>, i64)> {
    // (column matching user_id, column joined to users)
    let (own, other) = match direction {
        Direction::Following => ("follower_id", "followee_id"),
        Direction::Followers => ("followee_id", "follower_id"),
    };

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM follows WHERE {} = ?1", own),
        [user_id],
        |row| row.get(0),
    )?;

    // JOIN users to fetch the profile in a single query
    let sql = format!(
        "SELECT u.id, u.username, u.nickname, u.avatar, f.created_at
         FROM follows f
         JOIN users u ON u.id = f.{other}
         WHERE f.{own} = ?1
         ORDER BY f.created_at DESC, u.id DESC
         LIMIT ?2 OFFSET ?3",
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params![user_id, limit, offset], |row| {
            Ok(FollowRow {
                user_id: row.get(0)?,
                username: row.get(1)?,
                nickname: row.get(2)?,
                avatar: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok((rows, total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_both_directions() {
        let db = Database::open_in_memory().unwrap();
        for (id, name) in [(1, "ada"), (2, "bob"), (3, "cyd")] {
            db.create_user(id, name, None).unwrap();
        }
        db.insert_follow(1, 2).unwrap();
        db.insert_follow(1, 3).unwrap();
        db.insert_follow(3, 1).unwrap();

        let (following, total) = db.following(1, 0, 10).unwrap();
        assert_eq!(total, 2);
        let mut ids: Vec<i64> = following.iter().map(|r| r.user_id).collect();
        ids.sort();
        assert_eq!(ids, vec![2, 3]);

        let (followers, total) = db.followers(1, 0, 10).unwrap();
        assert_eq!(total, 1);
        assert_eq!(followers[0].username, "cyd");
    }

    #[test]
    fn self_follow_rejected_by_schema() {
        let db = Database::open_in_memory().unwrap();
        db.create_user(1, "ada", None).unwrap();
        assert!(db.insert_follow(1, 1).is_err());
    }
}
