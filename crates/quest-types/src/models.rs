use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// -- Status codes --
//
// These enums travel as their integer code on the wire and in SQLite.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum AuditStatus {
    Pending,
    Approved,
    Rejected,
}

impl AuditStatus {
    pub fn code(self) -> i32 {
        match self {
            Self::Pending => 0,
            Self::Approved => 1,
            Self::Rejected => 2,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Pending),
            1 => Some(Self::Approved),
            2 => Some(Self::Rejected),
            _ => None,
        }
    }
}

impl From<AuditStatus> for i32 {
    fn from(status: AuditStatus) -> Self {
        status.code()
    }
}

impl TryFrom<i32> for AuditStatus {
    type Error = String;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        Self::from_code(code).ok_or_else(|| format!("unknown audit status {}", code))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum ContentType {
    Text,
    Image,
    Audio,
}

impl ContentType {
    pub fn code(self) -> i32 {
        match self {
            Self::Text => 0,
            Self::Image => 1,
            Self::Audio => 2,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Text),
            1 => Some(Self::Image),
            2 => Some(Self::Audio),
            _ => None,
        }
    }
}

impl From<ContentType> for i32 {
    fn from(content_type: ContentType) -> Self {
        content_type.code()
    }
}

impl TryFrom<i32> for ContentType {
    type Error = String;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        Self::from_code(code).ok_or_else(|| format!("unknown content type {}", code))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    pub fn code(self) -> i32 {
        match self {
            Self::Sent => 0,
            Self::Delivered => 1,
            Self::Read => 2,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Sent),
            1 => Some(Self::Delivered),
            2 => Some(Self::Read),
            _ => None,
        }
    }
}

impl From<MessageStatus> for i32 {
    fn from(status: MessageStatus) -> Self {
        status.code()
    }
}

impl TryFrom<i32> for MessageStatus {
    type Error = String;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        Self::from_code(code).ok_or_else(|| format!("unknown message status {}", code))
    }
}

// -- External collaborators --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub username: String,
    pub nickname: Option<String>,
    pub avatar: Option<String>,
    pub points: i64,
}

impl User {
    /// Name shown to other users: nickname when set, username otherwise.
    pub fn display_name(&self) -> &str {
        self.nickname
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.username)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: i64,
    pub title: String,
    pub address: Option<String>,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub reward: i64,
    pub completion_count: i64,
}

// -- Check-ins --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInRecord {
    pub id: i64,
    pub user_id: i64,
    pub task_id: i64,
    pub longitude: f64,
    pub latitude: f64,
    pub description: String,
    pub photo_url: Option<String>,
    pub audit_status: AuditStatus,
    pub audit_remark: Option<String>,
    pub auditor_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// -- Social --

/// A followed/following user as shown in follow lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowEntry {
    pub user_id: i64,
    pub username: String,
    pub nickname: Option<String>,
    pub avatar: Option<String>,
    pub followed_at: DateTime<Utc>,
}

// -- Chat --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: i64,
    pub user_a_id: i64,
    pub user_b_id: i64,
    pub last_message_id: Option<i64>,
    pub last_message_preview: Option<String>,
    pub last_message_time: Option<DateTime<Utc>>,
    pub unread_count_a: i64,
    pub unread_count_b: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn has_participant(&self, user_id: i64) -> bool {
        self.user_a_id == user_id || self.user_b_id == user_id
    }

    /// Unread counter belonging to `user_id`, if they take part in the session.
    pub fn unread_for(&self, user_id: i64) -> Option<i64> {
        if user_id == self.user_a_id {
            Some(self.unread_count_a)
        } else if user_id == self.user_b_id {
            Some(self.unread_count_b)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: i64,
    pub session_id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub content_type: ContentType,
    pub content: String,
    pub status: MessageStatus,
    pub extra: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One page of a listing plus the total row count.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub list: Vec<T>,
    pub total: i64,
}
