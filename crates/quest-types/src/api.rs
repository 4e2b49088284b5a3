use serde::{Deserialize, Serialize};

use crate::models::{ChatMessage, ChatSession, CheckInRecord, Page};

// -- JWT Claims --

/// JWT claims shared by quest-api (REST middleware) and quest-gateway
/// (realtime handshake).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub username: String,
    pub exp: usize,
}

// -- Paging --

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

// -- Check-ins --

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRecordResponse {
    pub success: bool,
    pub message: String,
    pub reward: i64,
    pub task_title: String,
    pub address: Option<String>,
    pub record: CheckInRecord,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckCompletionQuery {
    pub user_id: i64,
    pub task_id: i64,
}

/// Form body of `POST /record/audit`. `status` is 1 (approve) or 2 (reject).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditForm {
    pub id: i64,
    pub status: i32,
    pub remark: Option<String>,
    pub admin_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchAuditRequest {
    pub ids: Vec<i64>,
    pub status: i32,
    pub remark: Option<String>,
    pub admin_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchDeleteRequest {
    pub ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecordsQuery {
    pub user_id: i64,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecordsQuery {
    pub task_id: i64,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditListQuery {
    pub status: Option<i32>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

// -- Social --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowRequest {
    pub followee_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowListQuery {
    pub user_id: Option<i64>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowCheckQuery {
    pub followee_id: i64,
}

// -- Chat --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub target_user_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub success: bool,
    pub session: ChatSession,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub receiver_id: Option<i64>,
    pub content_type: Option<i32>,
    pub content: Option<String>,
    pub extra: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: ChatMessage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesQuery {
    pub session_id: i64,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutualFollowQuery {
    pub target_user_id: i64,
}

// -- Envelopes --

/// `{ success, message }` for operations with nothing else to return.
#[derive(Debug, Serialize, Deserialize)]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CountResponse {
    pub success: bool,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub success: bool,
    pub completed: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowCheckResponse {
    pub success: bool,
    pub is_following: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MutualFollowResponse {
    pub success: bool,
    pub mutual: bool,
}

/// Paged listing with the total row count.
#[derive(Debug, Serialize)]
pub struct PageResponse<T> {
    pub success: bool,
    pub list: Vec<T>,
    pub total: i64,
}

impl<T> From<Page<T>> for PageResponse<T> {
    fn from(page: Page<T>) -> Self {
        Self {
            success: true,
            list: page.list,
            total: page.total,
        }
    }
}

/// Generic `{ success, list }` envelope for listings without a total.
#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub success: bool,
    pub list: Vec<T>,
}

/// Failure body shared by every endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
}
