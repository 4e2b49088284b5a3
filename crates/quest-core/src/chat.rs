use std::sync::Arc;

use quest_db::chat::NewMessage;
use quest_db::{Database, format_timestamp, is_constraint_violation};
use quest_types::models::{ChatMessage, ChatSession, ContentType};
use tracing::{debug, info, warn};

use crate::follow::FollowGraph;
use crate::ids::IdAllocator;
use crate::{CoreError, CoreResult, page_window};

const PREVIEW_CHARS: usize = 50;

/// Sessions and messages between mutually-following users.
#[derive(Clone)]
pub struct ChatService {
    db: Arc<Database>,
    ids: Arc<IdAllocator>,
    follows: FollowGraph,
}

impl ChatService {
    pub fn new(db: Arc<Database>, ids: Arc<IdAllocator>) -> Self {
        let follows = FollowGraph::new(db.clone());
        Self { db, ids, follows }
    }

    /// Returns the one session for the pair, creating it on first use.
    pub fn get_or_create_session(&self, user_id: i64, target_user_id: i64) -> CoreResult<ChatSession> {
        self.check_pair(user_id, target_user_id)?;

        let (a, b) = canonical_pair(user_id, target_user_id);
        if let Some(row) = self.db.get_session_by_pair(a, b)? {
            return Ok(row.into_model());
        }

        let id = self.ids.next_id();
        match self.db.insert_session(id, a, b) {
            Ok(()) => info!("Chat session {} created for {} and {}", id, a, b),
            Err(e) if is_constraint_violation(&e) => {
                debug!("Session for {} and {} created concurrently, re-reading", a, b);
            }
            Err(e) => return Err(e.into()),
        }

        self.db
            .get_session_by_pair(a, b)?
            .map(|row| row.into_model())
            .ok_or_else(|| CoreError::Conflict("chat session could not be created".into()))
    }

    pub fn send_message(
        &self,
        sender_id: i64,
        receiver_id: i64,
        content_type: ContentType,
        content: &str,
        extra: Option<&str>,
    ) -> CoreResult<ChatMessage> {
        let session = self.get_or_create_session(sender_id, receiver_id)?;
        if !session.has_participant(sender_id) {
            return Err(CoreError::PermissionDenied(
                "you are not a participant of this session".into(),
            ));
        }
        if content.trim().is_empty() {
            return Err(CoreError::InvalidArgument("message content is empty".into()));
        }

        let id = self.ids.next_id();
        let sent_at = format_timestamp(chrono::Utc::now());
        self.db.insert_message(&NewMessage {
            id,
            session_id: session.id,
            sender_id,
            receiver_id,
            content_type: content_type.code(),
            content,
            extra,
            created_at: &sent_at,
        })?;

        let preview = preview_for(content_type, content);
        if let Err(e) = self
            .db
            .record_session_message(session.id, id, &preview, &sent_at, sender_id, receiver_id)
        {
            warn!("Failed to update session {} after message {}: {}", session.id, id, e);
        }

        debug!("Message {} from {} to {} in session {}", id, sender_id, receiver_id, session.id);

        self.db
            .get_message(id)?
            .map(|row| row.into_model())
            .ok_or_else(|| CoreError::NotFound("message not found".into()))
    }

    pub fn list_sessions(&self, user_id: i64) -> CoreResult<Vec<ChatSession>> {
        Ok(self
            .db
            .sessions_for_user(user_id)?
            .into_iter()
            .map(|row| row.into_model())
            .collect())
    }

    /// One page of history, oldest first within the page. Page 1 holds the
    /// newest messages.
    pub fn get_messages(
        &self,
        session_id: i64,
        user_id: i64,
        page: Option<u32>,
        page_size: Option<u32>,
    ) -> CoreResult<Vec<ChatMessage>> {
        self.participant_session(session_id, user_id)?;

        let (offset, limit) = page_window(page, page_size);
        let mut messages: Vec<ChatMessage> = self
            .db
            .messages_newest_first(session_id, offset, limit)?
            .into_iter()
            .map(|row| row.into_model())
            .collect();
        messages.reverse();
        Ok(messages)
    }

    /// Marks everything addressed to `user_id` in the session as read.
    /// Returns how many messages changed.
    pub fn mark_read(&self, session_id: i64, user_id: i64) -> CoreResult<usize> {
        self.participant_session(session_id, user_id)?;
        let changed = self.db.mark_session_read(session_id, user_id)?;
        if changed > 0 {
            debug!("User {} read {} messages in session {}", user_id, changed, session_id);
        }
        Ok(changed)
    }

    pub fn is_mutual_follow(&self, user_id: i64, target_user_id: i64) -> CoreResult<bool> {
        self.follows.is_mutual(user_id, target_user_id)
    }

    fn check_pair(&self, user_id: i64, target_user_id: i64) -> CoreResult<()> {
        if user_id == target_user_id {
            return Err(CoreError::InvalidArgument("you cannot chat with yourself".into()));
        }
        if !self.db.user_exists(user_id)? || !self.db.user_exists(target_user_id)? {
            return Err(CoreError::NotFound("user not found".into()));
        }
        if !self.follows.is_mutual(user_id, target_user_id)? {
            return Err(CoreError::PermissionDenied(
                "you can only chat after following each other".into(),
            ));
        }
        Ok(())
    }

    fn participant_session(&self, session_id: i64, user_id: i64) -> CoreResult<ChatSession> {
        let session = self
            .db
            .get_session(session_id)?
            .map(|row| row.into_model())
            .ok_or_else(|| CoreError::NotFound("chat session not found".into()))?;
        if !session.has_participant(user_id) {
            return Err(CoreError::PermissionDenied(
                "you are not a participant of this session".into(),
            ));
        }
        Ok(session)
    }
}

fn canonical_pair(x: i64, y: i64) -> (i64, i64) {
    if x < y { (x, y) } else { (y, x) }
}

/// Session list preview for a message.
pub fn preview_for(content_type: ContentType, content: &str) -> String {
    match content_type {
        ContentType::Image => "[image]".to_string(),
        ContentType::Audio => "[audio]".to_string(),
        ContentType::Text => {
            let mut chars = content.chars();
            let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
            if chars.next().is_some() {
                format!("{}...", head)
            } else {
                head
            }
        }
    }
}
