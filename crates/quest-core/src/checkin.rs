use std::sync::Arc;

use quest_db::records::{NewRecord, transition_record};
use quest_db::{Database, is_constraint_violation, queries};
use quest_types::models::{AuditStatus, CheckInRecord, Page, Task};
use tracing::{info, warn};

use crate::geo;
use crate::ids::IdAllocator;
use crate::{CoreError, CoreResult, page_window};

/// Submissions at most this far from the task are approved on the spot.
pub const AUTO_APPROVE_RADIUS_METERS: f64 = 2000.0;

pub const AUTO_APPROVE_REMARK: &str = "auto-approved: within range";

#[derive(Debug, Clone)]
pub struct Submission {
    pub user_id: i64,
    pub task_id: i64,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub description: String,
    pub photo_url: Option<String>,
}

/// Result of a submission: the record in its final state and the task it
/// was checked against.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub record: CheckInRecord,
    pub task: Task,
    pub distance_meters: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditDecision {
    Approve,
    Reject,
}

impl AuditDecision {
    /// Maps the admin API's status codes: 1 approve, 2 reject.
    pub fn from_status_code(code: i32) -> Option<Self> {
        match AuditStatus::from_code(code)? {
            AuditStatus::Approved => Some(Self::Approve),
            AuditStatus::Rejected => Some(Self::Reject),
            AuditStatus::Pending => None,
        }
    }
}

/// Records check-ins, decides auto-approval and settles points.
#[derive(Clone)]
pub struct CheckInEngine {
    db: Arc<Database>,
    ids: Arc<IdAllocator>,
}

impl CheckInEngine {
    pub fn new(db: Arc<Database>, ids: Arc<IdAllocator>) -> Self {
        Self { db, ids }
    }

    pub fn submit(&self, submission: Submission) -> CoreResult<SubmitOutcome> {
        let Submission {
            user_id,
            task_id,
            longitude,
            latitude,
            description,
            photo_url,
        } = submission;

        if !self.db.user_exists(user_id)? {
            return Err(CoreError::NotFound("user not found".into()));
        }
        if self.db.has_approved_record(user_id, task_id)? {
            return Err(CoreError::AlreadyCompleted);
        }

        let task = self
            .db
            .get_task(task_id)?
            .ok_or_else(|| CoreError::NotFound("task not found".into()))?
            .into_model();

        let (lon, lat) = match (longitude, latitude) {
            (Some(lon), Some(lat)) if lon.is_finite() && lat.is_finite() => (lon, lat),
            _ => {
                return Err(CoreError::InvalidArgument(
                    "location is incomplete, please locate again".into(),
                ));
            }
        };
        let (task_lon, task_lat) = match (task.longitude, task.latitude) {
            (Some(lon), Some(lat)) => (lon, lat),
            _ => return Err(CoreError::InvalidState("task has no location".into())),
        };

        let distance = geo::distance_meters(lat, lon, task_lat, task_lon);
        let within_range =
            geo::is_within_range(lat, lon, task_lat, task_lon, AUTO_APPROVE_RADIUS_METERS);

        let record_id = self.ids.next_id();
        self.db.insert_record(&NewRecord {
            id: record_id,
            user_id,
            task_id,
            longitude: lon,
            latitude: lat,
            description: &description,
            photo_url: photo_url.as_deref(),
        })?;

        info!(
            "User {} checked in to task {} at {:.2} m (record {})",
            user_id, task_id, distance, record_id
        );

        if within_range {
            self.auto_approve(record_id, user_id, &task)?;
        } else {
            let remark = format!(
                "distance to task is {:.0} m, exceeds allowed range ({:.0} m), pending review",
                distance, AUTO_APPROVE_RADIUS_METERS
            );
            if let Err(e) = self.db.set_pending_remark(record_id, &remark) {
                warn!("Failed to store review remark on record {}: {}", record_id, e);
            }
        }

        let record = self.load(record_id)?;
        Ok(SubmitOutcome {
            record,
            task,
            distance_meters: distance,
        })
    }

    /// Admin decision on a Pending record. Returns whether the record changed.
    pub fn audit(
        &self,
        record_id: i64,
        decision: AuditDecision,
        remark: Option<&str>,
        auditor_id: Option<i64>,
    ) -> CoreResult<bool> {
        let record = self.load(record_id)?;
        if record.audit_status != AuditStatus::Pending {
            return Err(CoreError::InvalidState(
                "only pending records can be audited".into(),
            ));
        }

        let task = self.db.get_task(record.task_id)?.map(|t| t.into_model());
        let remark = remark.map(str::trim).filter(|r| !r.is_empty());

        let changed = match decision {
            AuditDecision::Approve => {
                let task = task
                    .as_ref()
                    .ok_or_else(|| CoreError::NotFound("task not found".into()))?;
                self.settle_approval(record.id, record.user_id, task, remark, auditor_id)?
            }
            AuditDecision::Reject => {
                let changed = self.db.with_conn(|conn| {
                    transition_record(
                        conn,
                        record.id,
                        AuditStatus::Rejected.code(),
                        remark,
                        auditor_id,
                    )
                })?;
                changed > 0
            }
        };

        if changed {
            info!("Record {} audited: {:?} by {:?}", record.id, decision, auditor_id);
            self.notify_audit(&record, task.as_ref(), decision, remark);
        } else {
            warn!("Record {} was audited concurrently, decision dropped", record.id);
        }

        Ok(changed)
    }

    /// Audits each id in turn; returns how many changed. Failures are logged
    /// and skipped.
    pub fn audit_batch(
        &self,
        ids: &[i64],
        decision: AuditDecision,
        remark: Option<&str>,
        auditor_id: Option<i64>,
    ) -> usize {
        ids.iter()
            .filter(|&&id| match self.audit(id, decision, remark, auditor_id) {
                Ok(changed) => changed,
                Err(e) => {
                    warn!("Batch audit skipped record {}: {}", id, e);
                    false
                }
            })
            .count()
    }

    pub fn check_completion(&self, user_id: i64, task_id: i64) -> CoreResult<bool> {
        Ok(self.db.has_approved_record(user_id, task_id)?)
    }

    pub fn delete_approved(&self, record_id: i64) -> CoreResult<bool> {
        let record = self.load(record_id)?;
        if record.audit_status != AuditStatus::Approved {
            return Err(CoreError::InvalidState(
                "only approved records can be deleted".into(),
            ));
        }
        Ok(self.db.delete_approved_record(record_id)? > 0)
    }

    pub fn delete_approved_batch(&self, ids: &[i64]) -> CoreResult<usize> {
        Ok(self.db.delete_approved_records(ids)?)
    }

    pub fn list_user_records(
        &self,
        user_id: i64,
        page: Option<u32>,
        page_size: Option<u32>,
    ) -> CoreResult<Page<CheckInRecord>> {
        let (offset, limit) = page_window(page, page_size);
        let (rows, total) = self.db.records_by_user(user_id, offset, limit)?;
        Ok(into_page(rows, total))
    }

    pub fn list_task_records(
        &self,
        task_id: i64,
        page: Option<u32>,
        page_size: Option<u32>,
    ) -> CoreResult<Page<CheckInRecord>> {
        let (offset, limit) = page_window(page, page_size);
        let (rows, total) = self.db.records_by_task(task_id, offset, limit)?;
        Ok(into_page(rows, total))
    }

    pub fn list_audit_queue(
        &self,
        status: Option<AuditStatus>,
        page: Option<u32>,
        page_size: Option<u32>,
    ) -> CoreResult<Page<CheckInRecord>> {
        let (offset, limit) = page_window(page, page_size);
        let (rows, total) =
            self.db
                .records_by_status(status.map(AuditStatus::code), offset, limit)?;
        Ok(into_page(rows, total))
    }

    fn load(&self, record_id: i64) -> CoreResult<CheckInRecord> {
        self.db
            .get_record(record_id)?
            .map(|row| row.into_model())
            .ok_or_else(|| CoreError::NotFound("check-in record not found".into()))
    }

    /// Settles a freshly inserted in-range record. A failed settlement leaves
    /// the record Pending for manual review; losing to a concurrent approval
    /// discards it.
    fn auto_approve(&self, record_id: i64, user_id: i64, task: &Task) -> CoreResult<()> {
        match self.settle_approval(record_id, user_id, task, Some(AUTO_APPROVE_REMARK), None) {
            Ok(true) => info!("Record {} auto-approved, +{} points", record_id, task.reward),
            Ok(false) => warn!("Record {} left Pending before auto-approval", record_id),
            Err(CoreError::AlreadyCompleted) => {
                if let Err(e) = self.db.delete_record(record_id) {
                    warn!("Failed to discard duplicate record {}: {}", record_id, e);
                }
                return Err(CoreError::AlreadyCompleted);
            }
            Err(e) => warn!(
                "Auto-approval of record {} failed, left Pending for review: {}",
                record_id, e
            ),
        }
        Ok(())
    }

    /// Approves a Pending record, credits the reward and bumps the task's
    /// completion count as one transaction. `Ok(false)` means the record was
    /// no longer Pending.
    fn settle_approval(
        &self,
        record_id: i64,
        user_id: i64,
        task: &Task,
        remark: Option<&str>,
        auditor_id: Option<i64>,
    ) -> CoreResult<bool> {
        let result = self.db.with_tx(|tx| {
            let changed = transition_record(
                tx,
                record_id,
                AuditStatus::Approved.code(),
                remark,
                auditor_id,
            )?;
            if changed == 0 {
                return Ok(false);
            }

            let credited = queries::credit_points(tx, user_id, task.reward)?;
            anyhow::ensure!(credited == 1, "user {} missing while crediting points", user_id);
            let bumped = queries::increment_completion(tx, task.id)?;
            anyhow::ensure!(bumped == 1, "task {} missing while counting completion", task.id);
            Ok(true)
        });

        match result {
            Ok(changed) => Ok(changed),
            Err(e) if is_constraint_violation(&e) => Err(CoreError::AlreadyCompleted),
            Err(e) => Err(CoreError::Storage(e)),
        }
    }

    fn notify_audit(
        &self,
        record: &CheckInRecord,
        task: Option<&Task>,
        decision: AuditDecision,
        remark: Option<&str>,
    ) {
        let (title, outcome) = match decision {
            AuditDecision::Approve => ("Check-in approved", "was approved"),
            AuditDecision::Reject => ("Check-in rejected", "was not approved"),
        };

        let mut message = String::from("Your check-in");
        if let Some(task) = task.filter(|t| !t.title.is_empty()) {
            message.push_str(&format!(" for \"{}\"", task.title));
        }
        message.push(' ');
        message.push_str(outcome);
        if let Some(remark) = remark {
            message.push_str(&format!(". Remark: {}", remark));
        }

        if let Err(e) = self.db.insert_notification(
            record.user_id,
            "record_audit",
            title,
            &message,
            Some(record.task_id),
        ) {
            warn!("Failed to notify user {} about record {}: {}", record.user_id, record.id, e);
        }
    }
}

fn into_page(rows: Vec<quest_db::models::RecordRow>, total: i64) -> Page<CheckInRecord> {
    Page {
        list: rows.into_iter().map(|r| r.into_model()).collect(),
        total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TASK_ID, TASK_LAT, TASK_LON, TASK_REWARD, seeded};

    fn engine() -> (CheckInEngine, Arc<Database>) {
        let (db, ids) = seeded();
        (CheckInEngine::new(db.clone(), ids), db)
    }

    fn submission(lat: f64, lon: f64) -> Submission {
        Submission {
            user_id: 100,
            task_id: TASK_ID,
            longitude: Some(lon),
            latitude: Some(lat),
            description: "made it".into(),
            photo_url: None,
        }
    }

    fn points(db: &Database, user_id: i64) -> i64 {
        db.get_user(user_id).unwrap().unwrap().points
    }

    fn completions(db: &Database) -> i64 {
        db.get_task(TASK_ID).unwrap().unwrap().completion_count
    }

    #[test]
    fn nearby_submission_is_auto_approved() {
        let (engine, db) = engine();

        let outcome = engine.submit(submission(39.9001, 116.4002)).unwrap();

        assert_eq!(outcome.record.audit_status, AuditStatus::Approved);
        assert_eq!(outcome.record.audit_remark.as_deref(), Some(AUTO_APPROVE_REMARK));
        assert!(outcome.distance_meters < 30.0);
        assert_eq!(points(&db, 100), TASK_REWARD);
        assert_eq!(completions(&db), 1);
        assert!(engine.check_completion(100, TASK_ID).unwrap());
    }

    #[test]
    fn distant_submission_waits_for_review() {
        let (engine, db) = engine();

        let outcome = engine.submit(submission(39.95, 116.45)).unwrap();

        assert_eq!(outcome.record.audit_status, AuditStatus::Pending);
        let remark = outcome.record.audit_remark.unwrap();
        assert!(remark.contains("exceeds allowed range"), "{}", remark);
        assert_eq!(points(&db, 100), 0);
        assert_eq!(completions(&db), 0);
        assert!(!engine.check_completion(100, TASK_ID).unwrap());
    }

    #[test]
    fn second_submission_after_approval_is_rejected() {
        let (engine, db) = engine();
        engine.submit(submission(TASK_LAT, TASK_LON)).unwrap();

        let err = engine.submit(submission(TASK_LAT, TASK_LON)).unwrap_err();
        assert!(matches!(err, CoreError::AlreadyCompleted));
        assert_eq!(points(&db, 100), TASK_REWARD);
        assert_eq!(db.records_by_user(100, 0, 10).unwrap().1, 1);
    }

    #[test]
    fn pending_submissions_do_not_block_resubmission() {
        let (engine, _db) = engine();
        engine.submit(submission(39.95, 116.45)).unwrap();

        let outcome = engine.submit(submission(TASK_LAT, TASK_LON)).unwrap();
        assert_eq!(outcome.record.audit_status, AuditStatus::Approved);
    }

    #[test]
    fn submit_validates_inputs() {
        let (engine, db) = engine();

        let mut unknown_user = submission(TASK_LAT, TASK_LON);
        unknown_user.user_id = 999;
        assert!(matches!(engine.submit(unknown_user), Err(CoreError::NotFound(_))));

        let mut unknown_task = submission(TASK_LAT, TASK_LON);
        unknown_task.task_id = 999;
        assert!(matches!(engine.submit(unknown_task), Err(CoreError::NotFound(_))));

        let mut no_location = submission(TASK_LAT, TASK_LON);
        no_location.latitude = None;
        assert!(matches!(engine.submit(no_location), Err(CoreError::InvalidArgument(_))));

        db.create_task(&quest_db::models::NewTask {
            id: 8,
            title: "Nowhere",
            address: None,
            longitude: None,
            latitude: None,
            reward: 10,
        })
        .unwrap();
        let mut unlocated_task = submission(TASK_LAT, TASK_LON);
        unlocated_task.task_id = 8;
        assert!(matches!(engine.submit(unlocated_task), Err(CoreError::InvalidState(_))));

        assert_eq!(db.records_by_user(100, 0, 10).unwrap().1, 0);
    }

    #[test]
    fn approve_credits_once_and_notifies() {
        let (engine, db) = engine();
        let record = engine.submit(submission(39.95, 116.45)).unwrap().record;

        assert!(engine
            .audit(record.id, AuditDecision::Approve, Some("  looks right "), Some(1))
            .unwrap());
        let again = engine.audit(record.id, AuditDecision::Approve, None, Some(1));

        assert!(matches!(again, Err(CoreError::InvalidState(_))));
        assert_eq!(points(&db, 100), TASK_REWARD);
        assert_eq!(completions(&db), 1);

        let stored = db.get_record(record.id).unwrap().unwrap().into_model();
        assert_eq!(stored.audit_status, AuditStatus::Approved);
        assert_eq!(stored.audit_remark.as_deref(), Some("looks right"));
        assert_eq!(stored.auditor_id, Some(1));

        let notes = db.get_notifications(100, 10).unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].kind, "record_audit");
        assert!(notes[0].message.contains("Old Bell Tower"));
        assert!(notes[0].message.contains("Remark: looks right"));
    }

    #[test]
    fn reject_grants_nothing() {
        let (engine, db) = engine();
        let record = engine.submit(submission(39.95, 116.45)).unwrap().record;

        assert!(engine
            .audit(record.id, AuditDecision::Reject, Some("photo unclear"), Some(1))
            .unwrap());

        assert_eq!(points(&db, 100), 0);
        assert_eq!(completions(&db), 0);
        let notes = db.get_notifications(100, 10).unwrap();
        assert_eq!(notes[0].title, "Check-in rejected");
    }

    #[test]
    fn audit_unknown_record_is_not_found() {
        let (engine, _db) = engine();
        assert!(matches!(
            engine.audit(42, AuditDecision::Approve, None, None),
            Err(CoreError::NotFound(_))
        ));
    }

    #[test]
    fn approving_second_pending_record_for_completed_task_fails() {
        let (engine, db) = engine();
        let first = engine.submit(submission(39.95, 116.45)).unwrap().record;
        let second = engine.submit(submission(39.95, 116.45)).unwrap().record;

        engine.audit(first.id, AuditDecision::Approve, None, None).unwrap();
        let err = engine.audit(second.id, AuditDecision::Approve, None, None).unwrap_err();

        assert!(matches!(err, CoreError::AlreadyCompleted));
        assert_eq!(points(&db, 100), TASK_REWARD);
    }

    #[test]
    fn batch_audit_counts_successes() {
        let (engine, _db) = engine();
        let a = engine.submit(submission(39.95, 116.45)).unwrap().record;
        let mut other_user = submission(39.95, 116.45);
        other_user.user_id = 200;
        let b = engine.submit(other_user).unwrap().record;

        let changed = engine.audit_batch(&[a.id, b.id, 12345], AuditDecision::Reject, None, None);
        assert_eq!(changed, 2);
    }

    #[test]
    fn only_approved_records_can_be_deleted() {
        let (engine, _db) = engine();
        let pending = engine.submit(submission(39.95, 116.45)).unwrap().record;
        let approved = engine.submit(submission(TASK_LAT, TASK_LON)).unwrap().record;

        assert!(matches!(
            engine.delete_approved(pending.id),
            Err(CoreError::InvalidState(_))
        ));
        assert!(engine.delete_approved(approved.id).unwrap());
        assert!(matches!(
            engine.delete_approved(approved.id),
            Err(CoreError::NotFound(_))
        ));
        assert_eq!(engine.delete_approved_batch(&[pending.id]).unwrap(), 0);
    }

    #[test]
    fn audit_queue_filters_by_status() {
        let (engine, _db) = engine();
        engine.submit(submission(39.95, 116.45)).unwrap();
        engine.submit(submission(TASK_LAT, TASK_LON)).unwrap();

        let pending = engine
            .list_audit_queue(Some(AuditStatus::Pending), None, None)
            .unwrap();
        assert_eq!(pending.total, 1);
        let all = engine.list_audit_queue(None, Some(1), Some(1)).unwrap();
        assert_eq!(all.total, 2);
        assert_eq!(all.list.len(), 1);
        assert_eq!(engine.list_task_records(TASK_ID, None, None).unwrap().total, 2);
    }

    fn insert_pending(db: &Database, id: i64) {
        db.insert_record(&NewRecord {
            id,
            user_id: 100,
            task_id: TASK_ID,
            longitude: TASK_LON,
            latitude: TASK_LAT,
            description: "",
            photo_url: None,
        })
        .unwrap();
    }

    fn task(db: &Database) -> Task {
        db.get_task(TASK_ID).unwrap().unwrap().into_model()
    }

    #[test]
    fn auto_approval_losing_a_race_discards_the_record() {
        let (engine, db) = engine();
        insert_pending(&db, 9001);
        // Another submission for the same task is approved first
        engine.submit(submission(TASK_LAT, TASK_LON)).unwrap();

        let err = engine.auto_approve(9001, 100, &task(&db)).unwrap_err();

        assert!(matches!(err, CoreError::AlreadyCompleted));
        assert!(db.get_record(9001).unwrap().is_none());
        assert_eq!(points(&db, 100), TASK_REWARD);
        assert_eq!(completions(&db), 1);
        assert_eq!(db.records_by_user(100, 0, 10).unwrap().1, 1);
    }

    #[test]
    fn failed_auto_approval_leaves_record_pending() {
        let (engine, db) = engine();
        insert_pending(&db, 9002);

        // No user 999 to credit, so the settlement transaction rolls back
        engine.auto_approve(9002, 999, &task(&db)).unwrap();

        let stored = db.get_record(9002).unwrap().unwrap().into_model();
        assert_eq!(stored.audit_status, AuditStatus::Pending);
        assert_eq!(stored.audit_remark, None);
        assert_eq!(points(&db, 100), 0);
        assert_eq!(completions(&db), 0);
        assert!(!engine.check_completion(100, TASK_ID).unwrap());
    }

    #[test]
    fn decision_codes() {
        assert_eq!(AuditDecision::from_status_code(1), Some(AuditDecision::Approve));
        assert_eq!(AuditDecision::from_status_code(2), Some(AuditDecision::Reject));
        assert_eq!(AuditDecision::from_status_code(0), None);
        assert_eq!(AuditDecision::from_status_code(9), None);
    }
}
