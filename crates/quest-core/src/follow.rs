use std::sync::Arc;

use quest_db::{Database, is_constraint_violation};
use quest_types::models::{FollowEntry, Page};
use tracing::{info, warn};

use crate::{CoreError, CoreResult, page_window};

/// Directed follow edges between users.
#[derive(Clone)]
pub struct FollowGraph {
    db: Arc<Database>,
}

impl FollowGraph {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn follow(&self, follower_id: i64, followee_id: i64) -> CoreResult<()> {
        if follower_id == followee_id {
            return Err(CoreError::InvalidArgument("you cannot follow yourself".into()));
        }

        let follower = self
            .db
            .get_user(follower_id)?
            .ok_or_else(|| CoreError::NotFound("user not found".into()))?
            .into_model();
        if !self.db.user_exists(followee_id)? {
            return Err(CoreError::NotFound("target user not found".into()));
        }

        if self.db.is_following(follower_id, followee_id)? {
            return Err(CoreError::AlreadyExists("already following this user".into()));
        }
        match self.db.insert_follow(follower_id, followee_id) {
            Ok(()) => {}
            Err(e) if is_constraint_violation(&e) => {
                return Err(CoreError::AlreadyExists("already following this user".into()));
            }
            Err(e) => return Err(e.into()),
        }

        info!("User {} now follows {}", follower_id, followee_id);

        let message = format!("{} started following you", follower.display_name());
        if let Err(e) = self.db.insert_notification(
            followee_id,
            "new_follower",
            "New follower",
            &message,
            Some(follower_id),
        ) {
            warn!("Failed to notify user {} of new follower: {}", followee_id, e);
        }

        Ok(())
    }

    /// Returns whether an edge was removed. Unfollowing twice is not an error.
    pub fn unfollow(&self, follower_id: i64, followee_id: i64) -> CoreResult<bool> {
        let removed = self.db.delete_follow(follower_id, followee_id)? > 0;
        if removed {
            info!("User {} unfollowed {}", follower_id, followee_id);
        }
        Ok(removed)
    }

    pub fn is_following(&self, follower_id: i64, followee_id: i64) -> CoreResult<bool> {
        Ok(self.db.is_following(follower_id, followee_id)?)
    }

    pub fn is_mutual(&self, a: i64, b: i64) -> CoreResult<bool> {
        Ok(self.db.is_following(a, b)? && self.db.is_following(b, a)?)
    }

    pub fn following(
        &self,
        user_id: i64,
        page: Option<u32>,
        page_size: Option<u32>,
    ) -> CoreResult<Page<FollowEntry>> {
        let (offset, limit) = page_window(page, page_size);
        let (rows, total) = self.db.following(user_id, offset, limit)?;
        Ok(Page {
            list: rows.into_iter().map(|r| r.into_model()).collect(),
            total,
        })
    }

    pub fn followers(
        &self,
        user_id: i64,
        page: Option<u32>,
        page_size: Option<u32>,
    ) -> CoreResult<Page<FollowEntry>> {
        let (offset, limit) = page_window(page, page_size);
        let (rows, total) = self.db.followers(user_id, offset, limit)?;
        Ok(Page {
            list: rows.into_iter().map(|r| r.into_model()).collect(),
            total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::seeded;

    fn graph() -> (FollowGraph, Arc<Database>) {
        let (db, _ids) = seeded();
        (FollowGraph::new(db.clone()), db)
    }

    #[test]
    fn mutual_needs_both_directions() {
        let (graph, _db) = graph();

        graph.follow(100, 200).unwrap();
        assert!(graph.is_following(100, 200).unwrap());
        assert!(!graph.is_mutual(100, 200).unwrap());

        graph.follow(200, 100).unwrap();
        assert!(graph.is_mutual(100, 200).unwrap());
        assert!(graph.is_mutual(200, 100).unwrap());

        assert!(graph.unfollow(200, 100).unwrap());
        assert!(!graph.is_mutual(100, 200).unwrap());
        assert!(!graph.unfollow(200, 100).unwrap());
    }

    #[test]
    fn rejects_self_missing_and_duplicate() {
        let (graph, _db) = graph();

        assert!(matches!(graph.follow(100, 100), Err(CoreError::InvalidArgument(_))));
        assert!(matches!(graph.follow(100, 999), Err(CoreError::NotFound(_))));
        assert!(matches!(graph.follow(999, 100), Err(CoreError::NotFound(_))));

        graph.follow(100, 200).unwrap();
        assert!(matches!(graph.follow(100, 200), Err(CoreError::AlreadyExists(_))));
    }

    #[test]
    fn follow_notifies_followee() {
        let (graph, db) = graph();
        graph.follow(100, 200).unwrap();

        let notes = db.get_notifications(200, 10).unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].kind, "new_follower");
        assert_eq!(notes[0].message, "Ada started following you");
        assert_eq!(notes[0].related_id, Some(100));
    }

    #[test]
    fn paged_lists() {
        let (graph, _db) = graph();
        graph.follow(100, 200).unwrap();
        graph.follow(100, 300).unwrap();
        graph.follow(300, 200).unwrap();

        let following = graph.following(100, Some(1), Some(1)).unwrap();
        assert_eq!(following.total, 2);
        assert_eq!(following.list.len(), 1);

        let followers = graph.followers(200, None, None).unwrap();
        assert_eq!(followers.total, 2);
        let mut names: Vec<_> = followers.list.iter().map(|f| f.username.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["ada", "cyd"]);
    }
}
