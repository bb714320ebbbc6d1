#![forbid(unsafe_code)]

//! Vote ledger: at most one like/dislike fact per (comment, voter).
//!
//! The ledger is the source of truth for `comments.like_count`. Its functions
//! run on a connection the caller already holds, normally the aggregator's
//! write transaction, and never touch the counter themselves.

use anyhow::{Context, Result};
use libsql::{Connection, params};

use crate::{
    db::now_timestamp,
    model::{CommentId, UserId, VoteKind},
};

/// Counter delta for moving a voter from `previous` to `next`.
///
/// | from \ to | none | like | dislike |
/// |-----------|------|------|---------|
/// | none      | 0    | +1   | 0       |
/// | like      | -1   | 0    | -1      |
/// | dislike   | 0    | +1   | 0       |
pub fn like_delta(previous: Option<VoteKind>, next: Option<VoteKind>) -> i64 {
    let weight = |kind: Option<VoteKind>| i64::from(kind == Some(VoteKind::Like));
    weight(next) - weight(previous)
}

pub async fn current_vote(
    conn: &Connection,
    comment: CommentId,
    voter: UserId,
) -> Result<Option<VoteKind>> {
    let mut rows = conn
        .query(
            "SELECT kind FROM comment_votes WHERE comment_id = ?1 AND voter_id = ?2",
            params![comment, voter],
        )
        .await
        .context("reading current vote")?;
    let Some(row) = rows.next().await? else {
        return Ok(None);
    };
    let raw: String = row.get(0)?;
    let kind = raw
        .parse::<VoteKind>()
        .map_err(|_| anyhow::anyhow!("corrupt vote kind `{raw}` stored for comment {comment}"))?;
    Ok(Some(kind))
}

/// Records `kind` for the voter and returns the previous vote. Writing the
/// same kind twice leaves the row untouched.
pub async fn upsert_vote(
    conn: &Connection,
    comment: CommentId,
    voter: UserId,
    kind: VoteKind,
) -> Result<Option<VoteKind>> {
    let previous = current_vote(conn, comment, voter).await?;
    if previous == Some(kind) {
        return Ok(previous);
    }

    let now = now_timestamp();
    conn.execute(
        r#"
        INSERT INTO comment_votes (comment_id, voter_id, kind, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?4)
        ON CONFLICT(comment_id, voter_id) DO UPDATE SET
            kind = excluded.kind,
            updated_at = excluded.updated_at
        "#,
        params![comment, voter, kind.as_str(), now],
    )
    .await
    .context("writing vote fact")?;
    Ok(previous)
}

/// Deletes the voter's fact and returns what it was, if anything.
pub async fn remove_vote(
    conn: &Connection,
    comment: CommentId,
    voter: UserId,
) -> Result<Option<VoteKind>> {
    let previous = current_vote(conn, comment, voter).await?;
    if previous.is_some() {
        conn.execute(
            "DELETE FROM comment_votes WHERE comment_id = ?1 AND voter_id = ?2",
            params![comment, voter],
        )
        .await
        .context("deleting vote fact")?;
    }
    Ok(previous)
}

/// Number of `like` facts, i.e. the value `like_count` must always equal.
pub async fn count_likes(conn: &Connection, comment: CommentId) -> Result<i64> {
    let mut rows = conn
        .query(
            "SELECT COUNT(*) FROM comment_votes WHERE comment_id = ?1 AND kind = 'like'",
            params![comment],
        )
        .await?;
    let row = rows.next().await?.context("missing count row")?;
    Ok(row.get::<i64>(0)?)
}
