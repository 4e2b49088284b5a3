use std::path::{Path as FsPath, PathBuf};

use axum::{
    Json,
    body::Bytes,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
};
use axum_extra::extract::WithRejection;
use tracing::{error, info, warn};
use uuid::Uuid;

use quest_core::checkin::{AuditDecision, Submission};
use quest_types::api::{
    ActionResponse, AuditForm, AuditListQuery, BatchAuditRequest, BatchDeleteRequest,
    CheckCompletionQuery, CompletionResponse, CountResponse, PageResponse, SubmitRecordResponse,
    TaskRecordsQuery, UserRecordsQuery,
};
use quest_types::models::{AuditStatus, CheckInRecord};

use crate::AppState;
use crate::error::ApiError;

/// 10 MB photo limit
pub const MAX_PHOTO_SIZE: usize = 10 * 1024 * 1024;

/// Request body cap for submissions: the photo plus the text fields.
pub const MAX_UPLOAD_BODY: usize = MAX_PHOTO_SIZE + 64 * 1024;

/// Multipart fields of `POST /record/submit`, as sent.
#[derive(Default)]
struct SubmitFields {
    user_id: Option<String>,
    task_id: Option<String>,
    longitude: Option<String>,
    latitude: Option<String>,
    description: Option<String>,
    photo_url: Option<String>,
    photo: Option<Bytes>,
}

/// POST /record/submit
pub async fn submit_record(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<SubmitRecordResponse>, ApiError> {
    let mut fields = SubmitFields::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "photo" {
            let data = field
                .bytes()
                .await
                .map_err(|e| ApiError::bad_request(format!("failed to read photo: {}", e)))?;
            if data.len() > MAX_PHOTO_SIZE {
                return Err(ApiError::new(StatusCode::PAYLOAD_TOO_LARGE, "photo exceeds 10 MB"));
            }
            if !data.is_empty() {
                fields.photo = Some(data);
            }
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| ApiError::bad_request(format!("failed to read field {}: {}", name, e)))?;
        let slot = match name.as_str() {
            "userId" => &mut fields.user_id,
            "taskId" => &mut fields.task_id,
            "longitude" => &mut fields.longitude,
            "latitude" => &mut fields.latitude,
            "description" => &mut fields.description,
            "photoUrl" => &mut fields.photo_url,
            _ => continue,
        };
        *slot = Some(value);
    }

    let user_id = required_number::<i64>(fields.user_id.as_deref(), "userId")?;
    let task_id = required_number::<i64>(fields.task_id.as_deref(), "taskId")?;
    let longitude = optional_number::<f64>(fields.longitude.as_deref(), "longitude")?;
    let latitude = optional_number::<f64>(fields.latitude.as_deref(), "latitude")?;

    let saved_photo = match fields.photo {
        Some(data) => Some(save_photo(&state.upload_dir, &data).await?),
        None => None,
    };
    let photo_url = match &saved_photo {
        Some((url, _)) => Some(url.clone()),
        None => fields.photo_url.filter(|u| !u.trim().is_empty()),
    };

    let submission = Submission {
        user_id,
        task_id,
        longitude,
        latitude,
        description: fields.description.unwrap_or_default(),
        photo_url,
    };

    let engine = state.checkins.clone();
    let outcome = match state.blocking(move || engine.submit(submission)).await {
        Ok(outcome) => outcome,
        Err(e) => {
            if let Some((_, path)) = saved_photo {
                discard_photo(&path).await;
            }
            return Err(e.into());
        }
    };

    let (message, reward) = match outcome.record.audit_status {
        AuditStatus::Approved => (
            format!("check-in approved, +{} points", outcome.task.reward),
            outcome.task.reward,
        ),
        _ => (
            outcome
                .record
                .audit_remark
                .clone()
                .unwrap_or_else(|| "check-in submitted, pending review".to_string()),
            0,
        ),
    };

    Ok(Json(SubmitRecordResponse {
        success: true,
        message,
        reward,
        task_title: outcome.task.title,
        address: outcome.task.address,
        record: outcome.record,
    }))
}

/// GET /record/check
pub async fn check_completion(
    State(state): State<AppState>,
    WithRejection(Query(query), _): WithRejection<Query<CheckCompletionQuery>, ApiError>,
) -> Result<Json<CompletionResponse>, ApiError> {
    let engine = state.checkins.clone();
    let completed = state
        .blocking(move || engine.check_completion(query.user_id, query.task_id))
        .await?;
    Ok(Json(CompletionResponse {
        success: true,
        completed,
    }))
}

/// POST /record/audit (form body)
pub async fn audit_record(
    State(state): State<AppState>,
    WithRejection(axum::Form(form), _): WithRejection<axum::Form<AuditForm>, ApiError>,
) -> Result<Json<ActionResponse>, ApiError> {
    let decision = parse_decision(form.status)?;
    let engine = state.checkins.clone();
    let changed = state
        .blocking(move || engine.audit(form.id, decision, form.remark.as_deref(), form.admin_id))
        .await?;

    let message = match (changed, decision) {
        (false, _) => "record was already audited",
        (true, AuditDecision::Approve) => "record approved",
        (true, AuditDecision::Reject) => "record rejected",
    };
    Ok(Json(ActionResponse {
        success: changed,
        message: message.to_string(),
    }))
}

/// POST /record/audit/batch
pub async fn audit_batch(
    State(state): State<AppState>,
    WithRejection(Json(req), _): WithRejection<Json<BatchAuditRequest>, ApiError>,
) -> Result<Json<CountResponse>, ApiError> {
    if req.ids.is_empty() {
        return Err(ApiError::bad_request("ids must not be empty"));
    }
    let decision = parse_decision(req.status)?;

    let engine = state.checkins.clone();
    let count = state
        .blocking(move || {
            Ok(engine.audit_batch(&req.ids, decision, req.remark.as_deref(), req.admin_id))
        })
        .await?;

    info!("Batch audit changed {} records", count);
    Ok(Json(CountResponse {
        success: true,
        count,
    }))
}

/// GET /record/user/list
pub async fn user_records(
    State(state): State<AppState>,
    WithRejection(Query(query), _): WithRejection<Query<UserRecordsQuery>, ApiError>,
) -> Result<Json<PageResponse<CheckInRecord>>, ApiError> {
    let engine = state.checkins.clone();
    let page = state
        .blocking(move || engine.list_user_records(query.user_id, query.page, query.page_size))
        .await?;
    Ok(Json(page.into()))
}

/// GET /record/task/list
pub async fn task_records(
    State(state): State<AppState>,
    WithRejection(Query(query), _): WithRejection<Query<TaskRecordsQuery>, ApiError>,
) -> Result<Json<PageResponse<CheckInRecord>>, ApiError> {
    let engine = state.checkins.clone();
    let page = state
        .blocking(move || engine.list_task_records(query.task_id, query.page, query.page_size))
        .await?;
    Ok(Json(page.into()))
}

/// GET /record/audit/list
pub async fn audit_list(
    State(state): State<AppState>,
    WithRejection(Query(query), _): WithRejection<Query<AuditListQuery>, ApiError>,
) -> Result<Json<PageResponse<CheckInRecord>>, ApiError> {
    let status = match query.status {
        Some(code) => Some(
            AuditStatus::from_code(code)
                .ok_or_else(|| ApiError::bad_request(format!("unknown audit status {}", code)))?,
        ),
        None => None,
    };

    let engine = state.checkins.clone();
    let page = state
        .blocking(move || engine.list_audit_queue(status, query.page, query.page_size))
        .await?;
    Ok(Json(page.into()))
}

/// DELETE /record/{id}
pub async fn delete_record(
    State(state): State<AppState>,
    WithRejection(Path(id), _): WithRejection<Path<i64>, ApiError>,
) -> Result<Json<ActionResponse>, ApiError> {
    let engine = state.checkins.clone();
    let deleted = state.blocking(move || engine.delete_approved(id)).await?;
    Ok(Json(ActionResponse {
        success: deleted,
        message: (if deleted { "record deleted" } else { "record was not deleted" }).to_string(),
    }))
}

/// POST /record/delete/batch
pub async fn delete_batch(
    State(state): State<AppState>,
    WithRejection(Json(req), _): WithRejection<Json<BatchDeleteRequest>, ApiError>,
) -> Result<Json<CountResponse>, ApiError> {
    if req.ids.is_empty() {
        return Err(ApiError::bad_request("ids must not be empty"));
    }
    let engine = state.checkins.clone();
    let count = state
        .blocking(move || engine.delete_approved_batch(&req.ids))
        .await?;
    Ok(Json(CountResponse {
        success: true,
        count,
    }))
}

fn parse_decision(status: i32) -> Result<AuditDecision, ApiError> {
    AuditDecision::from_status_code(status)
        .ok_or_else(|| ApiError::bad_request("status must be 1 (approve) or 2 (reject)"))
}

fn required_number<T: std::str::FromStr>(raw: Option<&str>, field: &str) -> Result<T, ApiError> {
    optional_number(raw, field)?.ok_or_else(|| ApiError::bad_request(format!("{} is required", field)))
}

/// Blank counts as absent; anything else must parse.
fn optional_number<T: std::str::FromStr>(raw: Option<&str>, field: &str) -> Result<Option<T>, ApiError> {
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|_| ApiError::bad_request(format!("{} is not a valid number", field))),
    }
}

/// Writes the photo to `{upload_dir}/{uuid}`. Returns the stored URL and the
/// file path.
async fn save_photo(upload_dir: &FsPath, data: &[u8]) -> Result<(String, PathBuf), ApiError> {
    let file_id = Uuid::new_v4().to_string();

    tokio::fs::create_dir_all(upload_dir).await.map_err(|e| {
        error!("Failed to create upload directory {}: {}", upload_dir.display(), e);
        ApiError::internal("failed to store photo")
    })?;

    let path = upload_dir.join(&file_id);
    tokio::fs::write(&path, data).await.map_err(|e| {
        error!("Failed to write photo {}: {}", path.display(), e);
        ApiError::internal("failed to store photo")
    })?;

    info!("Stored photo {} ({} bytes)", file_id, data.len());
    Ok((format!("uploads/{}", file_id), path))
}

async fn discard_photo(path: &FsPath) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!("Failed to remove orphaned photo {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_fields() {
        assert_eq!(required_number::<i64>(Some(" 42 "), "userId").unwrap(), 42);
        assert!(required_number::<i64>(None, "userId").is_err());
        assert!(required_number::<i64>(Some(""), "userId").is_err());

        assert_eq!(optional_number::<f64>(Some("116.4"), "longitude").unwrap(), Some(116.4));
        assert_eq!(optional_number::<f64>(Some("  "), "longitude").unwrap(), None);
        assert!(optional_number::<f64>(Some("east"), "longitude").is_err());
    }

    #[test]
    fn decisions() {
        assert_eq!(parse_decision(1).unwrap(), AuditDecision::Approve);
        assert_eq!(parse_decision(2).unwrap(), AuditDecision::Reject);
        assert!(parse_decision(0).is_err());
    }
}
