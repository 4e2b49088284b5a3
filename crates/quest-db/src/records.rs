use crate::models::RecordRow;
use crate::{Database, OptionalExt, now_timestamp};
use anyhow::Result;
use rusqlite::{Connection, Row};

const RECORD_COLUMNS: &str = "id, user_id, task_id, longitude, latitude, description, photo_url,
     audit_status, audit_remark, auditor_id, created_at, updated_at";

/// Audit status codes as stored; mirrors `quest_types::models::AuditStatus`.
const PENDING: i32 = 0;
const APPROVED: i32 = 1;

/// Insert payload for a new check-in. Always starts Pending.
pub struct NewRecord<'a> {
    pub id: i64,
    pub user_id: i64,
    pub task_id: i64,
    pub longitude: f64,
    pub latitude: f64,
    pub description: &'a str,
    pub photo_url: Option<&'a str>,
}

impl Database {
    pub fn insert_record(&self, record: &NewRecord<'_>) -> Result<()> {
        let now = now_timestamp();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO checkin_records
                    (id, user_id, task_id, longitude, latitude, description, photo_url,
                     audit_status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
                rusqlite::params![
                    record.id,
                    record.user_id,
                    record.task_id,
                    record.longitude,
                    record.latitude,
                    record.description,
                    record.photo_url,
                    PENDING,
                    now
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_record(&self, id: i64) -> Result<Option<RecordRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM checkin_records WHERE id = ?1", RECORD_COLUMNS);
            let row = conn.query_row(&sql, [id], map_record).optional()?;
            Ok(row)
        })
    }

    pub fn has_approved_record(&self, user_id: i64, task_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM checkin_records
                 WHERE user_id = ?1 AND task_id = ?2 AND audit_status = ?3",
                rusqlite::params![user_id, task_id, APPROVED],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    /// Updates the remark of a record that is still Pending.
    pub fn set_pending_remark(&self, id: i64, remark: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE checkin_records SET audit_remark = ?2, updated_at = ?3
                 WHERE id = ?1 AND audit_status = ?4",
                rusqlite::params![id, remark, now_timestamp(), PENDING],
            )?;
            Ok(changed)
        })
    }

    /// Removes a record regardless of status. Used to discard a submission
    /// that lost an approval race.
    pub fn delete_record(&self, id: i64) -> Result<usize> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM checkin_records WHERE id = ?1", [id])?))
    }

    /// Deletes the record only if it is Approved.
    pub fn delete_approved_record(&self, id: i64) -> Result<usize> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM checkin_records WHERE id = ?1 AND audit_status = ?2",
                rusqlite::params![id, APPROVED],
            )?;
            Ok(changed)
        })
    }

    /// Deletes every Approved record among `ids`; other ids are skipped.
    pub fn delete_approved_records(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        self.with_tx(|tx| {
            let mut stmt = tx.prepare(
                "DELETE FROM checkin_records WHERE id = ?1 AND audit_status = ?2",
            )?;
            let mut deleted = 0;
            for id in ids {
                deleted += stmt.execute(rusqlite::params![id, APPROVED])?;
            }
            Ok(deleted)
        })
    }

    pub fn records_by_user(&self, user_id: i64, offset: u32, limit: u32) -> Result<(Vec<RecordRow>, i64)> {
        self.with_conn(|conn| page_records(conn, "user_id = ?1", Some(user_id), offset, limit))
    }

    pub fn records_by_task(&self, task_id: i64, offset: u32, limit: u32) -> Result<(Vec<RecordRow>, i64)> {
        self.with_conn(|conn| page_records(conn, "task_id = ?1", Some(task_id), offset, limit))
    }

    /// Audit queue; `status = None` lists every record.
    pub fn records_by_status(&self, status: Option<i32>, offset: u32, limit: u32) -> Result<(Vec<RecordRow>, i64)> {
        self.with_conn(|conn| match status {
            Some(s) => page_records(conn, "audit_status = ?1", Some(i64::from(s)), offset, limit),
            None => page_records(conn, "1 = 1", None, offset, limit),
        })
    }
}

/// Moves a Pending record to `status`. Returns 0 when the record is missing
/// or no longer Pending, which callers treat as a lost transition.
pub fn transition_record(
    conn: &Connection,
    id: i64,
    status: i32,
    remark: Option<&str>,
    auditor_id: Option<i64>,
) -> Result<usize> {
    let changed = conn.execute(
        "UPDATE checkin_records
         SET audit_status = ?2, audit_remark = ?3, auditor_id = ?4, updated_at = ?5
         WHERE id = ?1 AND audit_status = ?6",
        rusqlite::params![id, status, remark, auditor_id, now_timestamp(), PENDING],
    )?;
    Ok(changed)
}

fn page_records(
    conn: &Connection,
    filter: &str,
    key: Option<i64>,
    offset: u32,
    limit: u32,
) -> Result<(Vec<RecordRow>, i64)> {
    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM checkin_records WHERE {}", filter),
        rusqlite::params_from_iter(key.iter()),
        |row| row.get(0),
    )?;

    // Newest first; ids are time ordered
    let sql = format!(
        "SELECT {} FROM checkin_records WHERE {} ORDER BY id DESC LIMIT {} OFFSET {}",
        RECORD_COLUMNS, filter, limit, offset
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(key.iter()), map_record)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok((rows, total))
}

fn map_record(row: &Row<'_>) -> rusqlite::Result<RecordRow> {
    Ok(RecordRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        task_id: row.get(2)?,
        longitude: row.get(3)?,
        latitude: row.get(4)?,
        description: row.get(5)?,
        photo_url: row.get(6)?,
        audit_status: row.get(7)?,
        audit_remark: row.get(8)?,
        auditor_id: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewTask;

    fn seeded() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.create_user(1, "ada", None).unwrap();
        db.create_task(&NewTask {
            id: 7,
            title: "Old Bell Tower",
            address: None,
            longitude: Some(116.4),
            latitude: Some(39.9),
            reward: 50,
        })
        .unwrap();
        db
    }

    fn new_record(id: i64) -> NewRecord<'static> {
        NewRecord {
            id,
            user_id: 1,
            task_id: 7,
            longitude: 116.4,
            latitude: 39.9,
            description: "",
            photo_url: None,
        }
    }

    #[test]
    fn transition_only_leaves_pending() {
        let db = seeded();
        db.insert_record(&new_record(10)).unwrap();

        let first = db
            .with_conn(|conn| transition_record(conn, 10, APPROVED, Some("ok"), Some(99)))
            .unwrap();
        let second = db
            .with_conn(|conn| transition_record(conn, 10, 2, Some("late"), Some(99)))
            .unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 0);
        let row = db.get_record(10).unwrap().unwrap();
        assert_eq!(row.audit_status, APPROVED);
        assert_eq!(row.auditor_id, Some(99));
    }

    #[test]
    fn second_approval_for_same_pair_violates_index() {
        let db = seeded();
        db.insert_record(&new_record(10)).unwrap();
        db.insert_record(&new_record(11)).unwrap();

        db.with_conn(|conn| transition_record(conn, 10, APPROVED, None, None))
            .unwrap();
        let err = db
            .with_conn(|conn| transition_record(conn, 11, APPROVED, None, None))
            .unwrap_err();

        assert!(crate::is_constraint_violation(&err));
        assert!(db.has_approved_record(1, 7).unwrap());
    }

    #[test]
    fn batch_delete_skips_unapproved() {
        let db = seeded();
        db.insert_record(&new_record(10)).unwrap();
        db.insert_record(&new_record(11)).unwrap();
        db.with_conn(|conn| transition_record(conn, 10, APPROVED, None, None))
            .unwrap();

        let deleted = db.delete_approved_records(&[10, 11, 12]).unwrap();
        assert_eq!(deleted, 1);
        assert!(db.get_record(10).unwrap().is_none());
        assert!(db.get_record(11).unwrap().is_some());
    }

    #[test]
    fn pages_newest_first_with_total() {
        let db = seeded();
        for id in 10..15 {
            db.insert_record(&new_record(id)).unwrap();
        }

        let (rows, total) = db.records_by_user(1, 0, 2).unwrap();
        assert_eq!(total, 5);
        assert_eq!(rows.iter().map(|r| r.id).collect::<Vec<_>>(), vec![14, 13]);

        let (rows, total) = db.records_by_status(Some(PENDING), 4, 2).unwrap();
        assert_eq!(total, 5);
        assert_eq!(rows.len(), 1);

        let (_, total) = db.records_by_status(Some(APPROVED), 0, 10).unwrap();
        assert_eq!(total, 0);
    }
}
