//! Database row types. These map directly to SQLite rows; `into_model`
//! converts them into the shared quest-types models.

use quest_types::models::{
    AuditStatus, ChatMessage, ChatSession, CheckInRecord, ContentType, FollowEntry,
    MessageStatus, Task, User,
};
use tracing::warn;

use crate::parse_timestamp;

pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub nickname: Option<String>,
    pub avatar: Option<String>,
    pub points: i64,
}

impl UserRow {
    pub fn into_model(self) -> User {
        User {
            id: self.id,
            username: self.username,
            nickname: self.nickname,
            avatar: self.avatar,
            points: self.points,
        }
    }
}

pub struct TaskRow {
    pub id: i64,
    pub title: String,
    pub address: Option<String>,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub reward: i64,
    pub completion_count: i64,
}

impl TaskRow {
    pub fn into_model(self) -> Task {
        Task {
            id: self.id,
            title: self.title,
            address: self.address,
            longitude: self.longitude,
            latitude: self.latitude,
            reward: self.reward,
            completion_count: self.completion_count,
        }
    }
}

/// Insert payload for a task; tasks are owned by the admin side.
pub struct NewTask<'a> {
    pub id: i64,
    pub title: &'a str,
    pub address: Option<&'a str>,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub reward: i64,
}

pub struct RecordRow {
    pub id: i64,
    pub user_id: i64,
    pub task_id: i64,
    pub longitude: f64,
    pub latitude: f64,
    pub description: String,
    pub photo_url: Option<String>,
    pub audit_status: i32,
    pub audit_remark: Option<String>,
    pub auditor_id: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

impl RecordRow {
    pub fn into_model(self) -> CheckInRecord {
        let audit_status = AuditStatus::from_code(self.audit_status).unwrap_or_else(|| {
            warn!(
                "Corrupt audit_status {} on record {}",
                self.audit_status, self.id
            );
            AuditStatus::Pending
        });

        CheckInRecord {
            id: self.id,
            user_id: self.user_id,
            task_id: self.task_id,
            longitude: self.longitude,
            latitude: self.latitude,
            description: self.description,
            photo_url: self.photo_url,
            audit_status,
            audit_remark: self.audit_remark,
            auditor_id: self.auditor_id,
            created_at: parse_timestamp(&self.created_at),
            updated_at: parse_timestamp(&self.updated_at),
        }
    }
}

pub struct NotificationRow {
    pub id: i64,
    pub user_id: i64,
    pub kind: String,
    pub title: String,
    pub message: String,
    pub related_id: Option<i64>,
    pub created_at: String,
}

pub struct FollowRow {
    pub user_id: i64,
    pub username: String,
    pub nickname: Option<String>,
    pub avatar: Option<String>,
    pub created_at: String,
}

impl FollowRow {
    pub fn into_model(self) -> FollowEntry {
        FollowEntry {
            user_id: self.user_id,
            username: self.username,
            nickname: self.nickname,
            avatar: self.avatar,
            followed_at: parse_timestamp(&self.created_at),
        }
    }
}

pub struct SessionRow {
    pub id: i64,
    pub user_a_id: i64,
    pub user_b_id: i64,
    pub last_message_id: Option<i64>,
    pub last_message_preview: Option<String>,
    pub last_message_time: Option<String>,
    pub unread_count_a: i64,
    pub unread_count_b: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl SessionRow {
    pub fn into_model(self) -> ChatSession {
        ChatSession {
            id: self.id,
            user_a_id: self.user_a_id,
            user_b_id: self.user_b_id,
            last_message_id: self.last_message_id,
            last_message_preview: self.last_message_preview,
            last_message_time: self.last_message_time.as_deref().map(parse_timestamp),
            unread_count_a: self.unread_count_a,
            unread_count_b: self.unread_count_b,
            created_at: parse_timestamp(&self.created_at),
            updated_at: parse_timestamp(&self.updated_at),
        }
    }
}

pub struct MessageRow {
    pub id: i64,
    pub session_id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub content_type: i32,
    pub content: String,
    pub status: i32,
    pub extra: Option<String>,
    pub created_at: String,
}

impl MessageRow {
    pub fn into_model(self) -> ChatMessage {
        let content_type = ContentType::from_code(self.content_type).unwrap_or_else(|| {
            warn!(
                "Corrupt content_type {} on message {}",
                self.content_type, self.id
            );
            ContentType::Text
        });
        let status = MessageStatus::from_code(self.status).unwrap_or_else(|| {
            warn!("Corrupt status {} on message {}", self.status, self.id);
            MessageStatus::Sent
        });

        ChatMessage {
            id: self.id,
            session_id: self.session_id,
            sender_id: self.sender_id,
            receiver_id: self.receiver_id,
            content_type,
            content: self.content,
            status,
            extra: self.extra,
            created_at: parse_timestamp(&self.created_at),
        }
    }
}
