#![forbid(unsafe_code)]

//! Comment store: owns comment rows and their lifecycle.
//!
//! Ownership is checked by [`crate::guard`] before these methods run; the
//! store itself enforces structure (video/parent existence, one level of
//! replies, no pinned replies) and keeps deletes cascading to replies and
//! vote facts.

use anyhow::Context;
use libsql::{Connection, Row, params};

use crate::{
    catalog::video_owner_on,
    db::{Store, int_flag, now_timestamp, parse_timestamp, retry_transient},
    error::{EngagementError, EngagementResult},
    model::{Comment, CommentId, NewComment, UserId},
};

/// Column list matching [`row_to_comment`]; queries alias `comments` as `c`.
pub(crate) const COMMENT_COLUMNS: &str = "c.id, c.video_id, c.author_id, c.parent_id, c.body, \
     c.like_count, c.is_pinned, c.is_creator_liked, c.created_at, c.updated_at";

/// Number of columns produced by [`COMMENT_COLUMNS`].
pub(crate) const COMMENT_COLUMN_COUNT: i32 = 10;

#[derive(Clone)]
pub struct CommentStore {
    store: Store,
}

impl CommentStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Creates a top-level comment or a reply to a top-level comment.
    pub async fn create(&self, author: UserId, input: &NewComment) -> EngagementResult<Comment> {
        validate_body(&input.body)?;
        retry_transient("create comment", || self.create_once(author, input)).await
    }

    async fn create_once(&self, author: UserId, input: &NewComment) -> EngagementResult<Comment> {
        let conn = self.store.connect().await?;
        let tx = Store::begin_write(&conn).await?;

        if video_owner_on(&tx, input.video_id).await?.is_none() {
            return Err(EngagementError::NotFound("video"));
        }
        if let Some(parent_id) = input.parent_id {
            let parent = find_on(&tx, parent_id)
                .await?
                .ok_or(EngagementError::NotFound("parent comment"))?;
            if parent.is_reply() {
                return Err(EngagementError::invalid("cannot reply to a reply"));
            }
            if parent.video_id != input.video_id {
                return Err(EngagementError::invalid(
                    "parent comment belongs to a different video",
                ));
            }
        }

        let now = now_timestamp();
        tx.execute(
            r#"
            INSERT INTO comments (video_id, author_id, parent_id, body, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            "#,
            params![
                input.video_id,
                author,
                input.parent_id,
                input.body.as_str(),
                now
            ],
        )
        .await
        .context("inserting comment")?;
        let id = tx.last_insert_rowid();
        let created = find_on(&tx, id)
            .await?
            .context("created comment vanished inside its transaction")?;
        tx.commit().await.context("committing comment")?;

        tracing::info!(
            comment_id = id,
            video_id = input.video_id,
            parent_id = ?input.parent_id,
            author,
            "comment created"
        );
        Ok(created)
    }

    pub async fn find_by_id(&self, id: CommentId) -> EngagementResult<Option<Comment>> {
        let conn = self.store.connect().await?;
        Ok(find_on(&conn, id).await?)
    }

    /// Like [`Self::find_by_id`] but a missing comment is a `NotFound` error.
    pub async fn require(&self, id: CommentId) -> EngagementResult<Comment> {
        self.find_by_id(id)
            .await?
            .ok_or(EngagementError::NotFound("comment"))
    }

    /// Replaces the comment text.
    pub async fn update(&self, id: CommentId, body: &str) -> EngagementResult<Comment> {
        validate_body(body)?;
        retry_transient("update comment", || async {
            let conn = self.store.connect().await?;
            let tx = Store::begin_write(&conn).await?;
            let changed = tx
                .execute(
                    "UPDATE comments SET body = ?1, updated_at = ?2 WHERE id = ?3",
                    params![body, now_timestamp(), id],
                )
                .await
                .context("updating comment body")?;
            if changed == 0 {
                return Err(EngagementError::NotFound("comment"));
            }
            let updated = find_on(&tx, id)
                .await?
                .ok_or(EngagementError::NotFound("comment"))?;
            tx.commit().await.context("committing comment update")?;
            tracing::info!(comment_id = id, "comment edited");
            Ok(updated)
        })
        .await
    }

    /// Deletes the comment, its replies and every vote fact on any of them
    /// in one transaction.
    pub async fn delete(&self, id: CommentId) -> EngagementResult<()> {
        retry_transient("delete comment", || async {
            let conn = self.store.connect().await?;
            let tx = Store::begin_write(&conn).await?;
            let removed_votes = tx
                .execute(
                    r#"
                    DELETE FROM comment_votes
                    WHERE comment_id = ?1
                       OR comment_id IN (SELECT id FROM comments WHERE parent_id = ?1)
                    "#,
                    params![id],
                )
                .await
                .context("deleting comment votes")?;
            let removed_replies = tx
                .execute("DELETE FROM comments WHERE parent_id = ?1", params![id])
                .await
                .context("deleting replies")?;
            let removed = tx
                .execute("DELETE FROM comments WHERE id = ?1", params![id])
                .await
                .context("deleting comment")?;
            if removed == 0 {
                return Err(EngagementError::NotFound("comment"));
            }
            tx.commit().await.context("committing comment delete")?;
            tracing::info!(
                comment_id = id,
                removed_replies,
                removed_votes,
                "comment deleted"
            );
            Ok(())
        })
        .await
    }

    /// Pins or unpins a top-level comment. Replies are rejected either way.
    pub async fn set_pinned(&self, id: CommentId, pinned: bool) -> EngagementResult<()> {
        retry_transient("pin comment", || async {
            let conn = self.store.connect().await?;
            let tx = Store::begin_write(&conn).await?;
            let comment = find_on(&tx, id)
                .await?
                .ok_or(EngagementError::NotFound("comment"))?;
            if comment.is_reply() {
                return Err(EngagementError::invalid("replies cannot be pinned"));
            }
            tx.execute(
                "UPDATE comments SET is_pinned = ?1, updated_at = ?2 WHERE id = ?3",
                params![pinned as i64, now_timestamp(), id],
            )
            .await
            .context("updating pin flag")?;
            tx.commit().await.context("committing pin flag")?;
            tracing::info!(comment_id = id, pinned, "comment pin changed");
            Ok(())
        })
        .await
    }

    pub async fn set_creator_liked(&self, id: CommentId, liked: bool) -> EngagementResult<()> {
        retry_transient("mark creator like", || async {
            let conn = self.store.connect().await?;
            let changed = conn
                .execute(
                    "UPDATE comments SET is_creator_liked = ?1, updated_at = ?2 WHERE id = ?3",
                    params![liked as i64, now_timestamp(), id],
                )
                .await
                .context("updating creator-like flag")?;
            if changed == 0 {
                return Err(EngagementError::NotFound("comment"));
            }
            tracing::info!(comment_id = id, liked, "creator like changed");
            Ok(())
        })
        .await
    }
}

fn validate_body(body: &str) -> EngagementResult<()> {
    if body.trim().is_empty() {
        return Err(EngagementError::invalid("comment text must not be empty"));
    }
    Ok(())
}

pub(crate) async fn find_on(conn: &Connection, id: CommentId) -> anyhow::Result<Option<Comment>> {
    let mut rows = conn
        .query(
            &format!("SELECT {COMMENT_COLUMNS} FROM comments c WHERE c.id = ?1"),
            params![id],
        )
        .await
        .with_context(|| format!("loading comment {id}"))?;
    match rows.next().await? {
        Some(row) => Ok(Some(row_to_comment(&row, 0)?)),
        None => Ok(None),
    }
}

/// Converts a row selected with [`COMMENT_COLUMNS`] starting at `start`.
pub(crate) fn row_to_comment(row: &Row, start: i32) -> anyhow::Result<Comment> {
    let created_at: String = row.get(start + 8)?;
    let updated_at: String = row.get(start + 9)?;
    Ok(Comment {
        id: row.get(start)?,
        video_id: row.get(start + 1)?,
        author_id: row.get(start + 2)?,
        parent_id: row.get(start + 3)?,
        body: row.get(start + 4)?,
        like_count: row.get(start + 5)?,
        is_pinned: row.get::<i64>(start + 6).map(int_flag)?,
        is_creator_liked: row.get::<i64>(start + 7).map(int_flag)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::{scalar, seed_video, temp_store};
    use anyhow::Result;

    fn top_level(video_id: i64, body: &str) -> NewComment {
        NewComment {
            video_id,
            parent_id: None,
            body: body.into(),
        }
    }

    fn reply(video_id: i64, parent_id: i64, body: &str) -> NewComment {
        NewComment {
            video_id,
            parent_id: Some(parent_id),
            body: body.into(),
        }
    }

    async fn setup() -> Result<(tempfile::TempDir, Store, CommentStore)> {
        let (dir, store) = temp_store().await?;
        seed_video(&store, 1, 100).await?;
        seed_video(&store, 2, 200).await?;
        let comments = CommentStore::new(store.clone());
        Ok((dir, store, comments))
    }

    #[tokio::test]
    async fn create_top_level_and_reply() -> Result<()> {
        let (_dir, _store, comments) = setup().await?;
        let parent = comments.create(7, &top_level(1, "nice")).await?;
        assert_eq!(parent.like_count, 0);
        assert!(!parent.is_pinned && !parent.is_creator_liked);
        assert_eq!(parent.parent_id, None);

        let child = comments.create(8, &reply(1, parent.id, "agreed")).await?;
        assert_eq!(child.parent_id, Some(parent.id));
        assert_eq!(comments.require(child.id).await?.author_id, 8);
        Ok(())
    }

    #[tokio::test]
    async fn create_rejects_missing_targets() -> Result<()> {
        let (_dir, _store, comments) = setup().await?;
        let err = comments.create(7, &top_level(99, "hi")).await.unwrap_err();
        assert!(matches!(err, EngagementError::NotFound("video")));

        let err = comments.create(7, &reply(1, 12345, "hi")).await.unwrap_err();
        assert!(matches!(err, EngagementError::NotFound("parent comment")));
        Ok(())
    }

    #[tokio::test]
    async fn replies_to_replies_are_rejected_at_every_depth() -> Result<()> {
        let (_dir, _store, comments) = setup().await?;
        let root = comments.create(7, &top_level(1, "root")).await?;
        let mut parent = comments.create(7, &reply(1, root.id, "depth one")).await?;
        for depth in 2..6 {
            let err = comments
                .create(7, &reply(1, parent.id, &format!("depth {depth}")))
                .await
                .unwrap_err();
            assert!(matches!(err, EngagementError::InvalidInput(_)), "depth {depth}");
            parent = comments.create(7, &reply(1, root.id, "sibling")).await?;
        }
        Ok(())
    }

    #[tokio::test]
    async fn reply_must_stay_on_parent_video() -> Result<()> {
        let (_dir, _store, comments) = setup().await?;
        let root = comments.create(7, &top_level(1, "root")).await?;
        let err = comments.create(7, &reply(2, root.id, "elsewhere")).await.unwrap_err();
        assert!(matches!(err, EngagementError::InvalidInput(_)));
        Ok(())
    }

    #[tokio::test]
    async fn blank_text_is_invalid() -> Result<()> {
        let (_dir, _store, comments) = setup().await?;
        let err = comments.create(7, &top_level(1, "   ")).await.unwrap_err();
        assert!(matches!(err, EngagementError::InvalidInput(_)));

        let comment = comments.create(7, &top_level(1, "ok")).await?;
        let err = comments.update(comment.id, "").await.unwrap_err();
        assert!(matches!(err, EngagementError::InvalidInput(_)));
        Ok(())
    }

    #[tokio::test]
    async fn update_changes_body_and_timestamp() -> Result<()> {
        let (_dir, _store, comments) = setup().await?;
        let comment = comments.create(7, &top_level(1, "first")).await?;
        let updated = comments.update(comment.id, "second").await?;
        assert_eq!(updated.body, "second");
        assert!(updated.updated_at >= comment.updated_at);
        assert_eq!(updated.created_at, comment.created_at);

        let err = comments.update(4242, "ghost").await.unwrap_err();
        assert!(matches!(err, EngagementError::NotFound("comment")));
        Ok(())
    }

    #[tokio::test]
    async fn delete_cascades_to_replies_and_votes() -> Result<()> {
        let (_dir, store, comments) = setup().await?;
        let root = comments.create(7, &top_level(1, "root")).await?;
        let child = comments.create(8, &reply(1, root.id, "child")).await?;
        let other = comments.create(9, &top_level(1, "other")).await?;

        let conn = store.connect().await?;
        for (comment, voter) in [(root.id, 1), (child.id, 2), (other.id, 3)] {
            crate::votes::upsert_vote(&conn, comment, voter, crate::model::VoteKind::Like).await?;
        }

        comments.delete(root.id).await?;
        assert!(comments.find_by_id(root.id).await?.is_none());
        assert!(comments.find_by_id(child.id).await?.is_none());
        assert!(comments.find_by_id(other.id).await?.is_some());
        let remaining = scalar(&store, "SELECT COUNT(*) FROM comment_votes", params![]).await?;
        assert_eq!(remaining, 1);

        let err = comments.delete(root.id).await.unwrap_err();
        assert!(matches!(err, EngagementError::NotFound("comment")));
        Ok(())
    }

    #[tokio::test]
    async fn pinning_is_limited_to_top_level_comments() -> Result<()> {
        let (_dir, _store, comments) = setup().await?;
        let root = comments.create(7, &top_level(1, "root")).await?;
        let child = comments.create(8, &reply(1, root.id, "child")).await?;

        comments.set_pinned(root.id, true).await?;
        assert!(comments.require(root.id).await?.is_pinned);
        comments.set_pinned(root.id, false).await?;
        assert!(!comments.require(root.id).await?.is_pinned);

        for pinned in [true, false] {
            let err = comments.set_pinned(child.id, pinned).await.unwrap_err();
            assert!(matches!(err, EngagementError::InvalidInput(_)));
        }
        assert!(!comments.require(child.id).await?.is_pinned);
        Ok(())
    }

    #[tokio::test]
    async fn creator_like_applies_to_replies_too() -> Result<()> {
        let (_dir, _store, comments) = setup().await?;
        let root = comments.create(7, &top_level(1, "root")).await?;
        let child = comments.create(8, &reply(1, root.id, "child")).await?;
        comments.set_creator_liked(child.id, true).await?;
        assert!(comments.require(child.id).await?.is_creator_liked);

        let err = comments.set_creator_liked(999, true).await.unwrap_err();
        assert!(matches!(err, EngagementError::NotFound("comment")));
        Ok(())
    }
}
