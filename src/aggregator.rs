#![forbid(unsafe_code)]

//! Engagement aggregator: keeps `comments.like_count` equal to the number of
//! `like` facts in the vote ledger.
//!
//! A vote change and the matching counter update commit together inside one
//! `BEGIN IMMEDIATE` transaction, so racing voters are serialized by the
//! database write lock and no increment is ever lost.

use anyhow::Context;
use libsql::params;

use crate::{
    db::{Store, retry_transient},
    error::{EngagementError, EngagementResult},
    model::{CommentId, UserId, VoteKind},
    votes::{like_delta, remove_vote, upsert_vote},
};

#[derive(Clone)]
pub struct Aggregator {
    store: Store,
}

impl Aggregator {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Moves `voter` to `next` (`None` removes the vote) and returns the
    /// comment's like count after the change.
    pub async fn apply_vote(
        &self,
        comment: CommentId,
        voter: UserId,
        next: Option<VoteKind>,
    ) -> EngagementResult<i64> {
        retry_transient("apply vote", || self.apply_vote_once(comment, voter, next)).await
    }

    async fn apply_vote_once(
        &self,
        comment: CommentId,
        voter: UserId,
        next: Option<VoteKind>,
    ) -> EngagementResult<i64> {
        let conn = self.store.connect().await?;
        let tx = Store::begin_write(&conn).await?;

        if like_count_on(&tx, comment).await?.is_none() {
            return Err(EngagementError::NotFound("comment"));
        }

        let previous = match next {
            Some(kind) => upsert_vote(&tx, comment, voter, kind).await?,
            None => {
                let previous = remove_vote(&tx, comment, voter).await?;
                if previous.is_none() {
                    return Err(EngagementError::NotFound("vote"));
                }
                previous
            }
        };

        let delta = like_delta(previous, next);
        if delta != 0 {
            tx.execute(
                "UPDATE comments SET like_count = MAX(like_count + ?1, 0) WHERE id = ?2",
                params![delta, comment],
            )
            .await
            .context("adjusting like counter")?;
        }
        let count = like_count_on(&tx, comment)
            .await?
            .ok_or(EngagementError::Conflict("comment removed during vote"))?;
        tx.commit().await.context("committing vote")?;

        tracing::debug!(
            comment_id = comment,
            voter,
            previous = ?previous,
            next = ?next,
            like_count = count,
            "vote applied"
        );
        Ok(count)
    }

    /// The voter's current vote on a comment, if any.
    #[cfg(test)]
    pub async fn vote_of(
        &self,
        comment: CommentId,
        voter: UserId,
    ) -> EngagementResult<Option<VoteKind>> {
        let conn = self.store.connect().await?;
        Ok(crate::votes::current_vote(&conn, comment, voter).await?)
    }
}

async fn like_count_on(conn: &libsql::Connection, comment: CommentId) -> anyhow::Result<Option<i64>> {
    let mut rows = conn
        .query("SELECT like_count FROM comments WHERE id = ?1", params![comment])
        .await
        .with_context(|| format!("reading like count of comment {comment}"))?;
    match rows.next().await? {
        Some(row) => Ok(Some(row.get::<i64>(0)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        comments::CommentStore,
        db::testing::{scalar, seed_video, temp_store},
        model::NewComment,
    };
    use anyhow::Result;
    use VoteKind::{Dislike, Like};

    async fn setup() -> Result<(tempfile::TempDir, Store, Aggregator, CommentId)> {
        let (dir, store) = temp_store().await?;
        seed_video(&store, 1, 100).await?;
        let comment = CommentStore::new(store.clone())
            .create(
                7,
                &NewComment {
                    video_id: 1,
                    parent_id: None,
                    body: "vote on me".into(),
                },
            )
            .await?;
        Ok((dir, store.clone(), Aggregator::new(store), comment.id))
    }

    async fn assert_consistent(store: &Store, comment: CommentId) -> Result<i64> {
        let cached = scalar(store, "SELECT like_count FROM comments WHERE id = ?1", params![comment]).await?;
        let ledger = scalar(
            store,
            "SELECT COUNT(*) FROM comment_votes WHERE comment_id = ?1 AND kind = 'like'",
            params![comment],
        )
        .await?;
        assert_eq!(cached, ledger, "counter drifted from ledger");
        Ok(cached)
    }

    #[tokio::test]
    async fn repeated_like_is_idempotent() -> Result<()> {
        let (_dir, store, agg, comment) = setup().await?;
        assert_eq!(agg.apply_vote(comment, 5, Some(Like)).await?, 1);
        assert_eq!(agg.apply_vote(comment, 5, Some(Like)).await?, 1);
        assert_eq!(assert_consistent(&store, comment).await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn switching_kinds_moves_the_counter() -> Result<()> {
        let (_dir, store, agg, comment) = setup().await?;
        assert_eq!(agg.apply_vote(comment, 5, Some(Like)).await?, 1);
        assert_eq!(agg.apply_vote(comment, 5, Some(Dislike)).await?, 0);
        assert_eq!(agg.apply_vote(comment, 5, Some(Like)).await?, 1);
        assert_eq!(agg.vote_of(comment, 5).await?, Some(Like));
        assert_eq!(agg.apply_vote(comment, 5, None).await?, 0);
        assert_eq!(agg.vote_of(comment, 5).await?, None);
        assert_consistent(&store, comment).await?;
        Ok(())
    }

    #[tokio::test]
    async fn removing_a_like_from_a_zero_counter_stays_at_zero() -> Result<()> {
        let (_dir, store, agg, comment) = setup().await?;
        assert_eq!(agg.apply_vote(comment, 5, Some(Like)).await?, 1);
        store
            .connect()
            .await?
            .execute("UPDATE comments SET like_count = 0 WHERE id = ?1", params![comment])
            .await?;

        assert_eq!(agg.apply_vote(comment, 5, None).await?, 0);
        let stored = scalar(&store, "SELECT like_count FROM comments WHERE id = ?1", params![comment]).await?;
        assert_eq!(stored, 0);
        assert_eq!(agg.vote_of(comment, 5).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn dislikes_never_move_the_counter() -> Result<()> {
        let (_dir, store, agg, comment) = setup().await?;
        assert_eq!(agg.apply_vote(comment, 5, Some(Dislike)).await?, 0);
        assert_eq!(agg.apply_vote(comment, 5, None).await?, 0);
        assert_consistent(&store, comment).await?;
        Ok(())
    }

    #[tokio::test]
    async fn removing_an_absent_vote_is_not_found() -> Result<()> {
        let (_dir, store, agg, comment) = setup().await?;
        let err = agg.apply_vote(comment, 5, None).await.unwrap_err();
        assert!(matches!(err, EngagementError::NotFound("vote")));
        assert_eq!(assert_consistent(&store, comment).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn voting_on_missing_comment_is_not_found() -> Result<()> {
        let (_dir, store, agg, _comment) = setup().await?;
        let err = agg.apply_vote(999, 5, Some(Like)).await.unwrap_err();
        assert!(matches!(err, EngagementError::NotFound("comment")));
        assert_eq!(scalar(&store, "SELECT COUNT(*) FROM comment_votes", params![]).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn counter_tracks_ledger_through_mixed_sequence() -> Result<()> {
        let (_dir, store, agg, comment) = setup().await?;
        let script: &[(UserId, Option<VoteKind>)] = &[
            (1, Some(Like)),
            (2, Some(Like)),
            (3, Some(Dislike)),
            (1, Some(Dislike)),
            (3, Some(Like)),
            (2, None),
            (4, Some(Like)),
            (1, Some(Like)),
        ];
        for &(voter, next) in script {
            agg.apply_vote(comment, voter, next).await?;
            assert_consistent(&store, comment).await?;
        }
        assert_eq!(assert_consistent(&store, comment).await?, 3);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_voters_never_lose_increments() -> Result<()> {
        let (_dir, store, agg, comment) = setup().await?;
        let voters: i64 = 24;

        let mut tasks = Vec::new();
        for voter in 1..=voters {
            let agg = agg.clone();
            tasks.push(tokio::spawn(async move {
                agg.apply_vote(comment, voter, Some(Like)).await
            }));
        }
        for task in tasks {
            task.await??;
        }
        assert_eq!(assert_consistent(&store, comment).await?, voters);

        let mut tasks = Vec::new();
        for voter in 1..=voters {
            let agg = agg.clone();
            let next = if voter % 2 == 0 { Some(Dislike) } else { None };
            tasks.push(tokio::spawn(async move {
                agg.apply_vote(comment, voter, next).await
            }));
        }
        for task in tasks {
            task.await??;
        }
        assert_eq!(assert_consistent(&store, comment).await?, 0);
        Ok(())
    }
}
