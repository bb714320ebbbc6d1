#![forbid(unsafe_code)]

//! Thread reader: paginated, viewer-annotated comment listings.
//!
//! Each page is produced by a single joined query so a row never mixes
//! counter and vote state from different moments.

use anyhow::Context;
use libsql::{Connection, Row, params};

use crate::{
    catalog::{row_to_profile, video_owner_on},
    comments::{COMMENT_COLUMNS, COMMENT_COLUMN_COUNT, find_on, row_to_comment},
    db::{Store, int_flag},
    error::{EngagementError, EngagementResult},
    model::{CommentId, CommentView, Page, UserId, VideoId, VoteKind},
};

/// Selects the comment columns followed by the author profile, reply count,
/// viewer vote and the video-creator flag. `?1` is always the viewer id.
fn view_query(tail: &str) -> String {
    format!(
        r#"
        SELECT {COMMENT_COLUMNS},
               c.author_id,
               COALESCE(p.channel_name, ''),
               COALESCE(p.description, ''),
               COALESCE(p.icon_url, ''),
               COALESCE(p.banner_url, ''),
               (SELECT COUNT(*) FROM comments r WHERE r.parent_id = c.id),
               cv.kind,
               v.owner_id = c.author_id
        FROM comments c
        JOIN videos v ON v.id = c.video_id
        LEFT JOIN profiles p ON p.user_id = c.author_id
        LEFT JOIN comment_votes cv ON cv.comment_id = c.id AND cv.voter_id = ?1
        {tail}
        "#
    )
}

#[derive(Clone)]
pub struct ThreadReader {
    store: Store,
}

impl ThreadReader {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Top-level comments of a video: pinned first, then newest first.
    pub async fn top_level(
        &self,
        video: VideoId,
        viewer: Option<UserId>,
        page: Page,
    ) -> EngagementResult<Vec<CommentView>> {
        let conn = self.store.connect().await?;
        if video_owner_on(&conn, video).await?.is_none() {
            return Err(EngagementError::NotFound("video"));
        }
        let sql = view_query(
            r#"
            WHERE c.video_id = ?2 AND c.parent_id IS NULL
            ORDER BY c.is_pinned DESC, c.created_at DESC, c.id DESC
            LIMIT ?3 OFFSET ?4
            "#,
        );
        let views = collect_views(
            &conn,
            &sql,
            params![viewer, video, page.limit(), page.offset()],
        )
        .await
        .with_context(|| format!("listing comments of video {video}"))?;
        tracing::debug!(video_id = video, returned = views.len(), "listed top-level comments");
        Ok(views)
    }

    /// Replies to a top-level comment, oldest first.
    pub async fn replies(
        &self,
        parent: CommentId,
        viewer: Option<UserId>,
        page: Page,
    ) -> EngagementResult<Vec<CommentView>> {
        let conn = self.store.connect().await?;
        if find_on(&conn, parent).await?.is_none() {
            return Err(EngagementError::NotFound("parent comment"));
        }
        let sql = view_query(
            r#"
            WHERE c.parent_id = ?2
            ORDER BY c.created_at ASC, c.id ASC
            LIMIT ?3 OFFSET ?4
            "#,
        );
        let views = collect_views(
            &conn,
            &sql,
            params![viewer, parent, page.limit(), page.offset()],
        )
        .await
        .with_context(|| format!("listing replies of comment {parent}"))?;
        tracing::debug!(parent_id = parent, returned = views.len(), "listed replies");
        Ok(views)
    }

    /// A single comment annotated for `viewer`.
    pub async fn view(
        &self,
        comment: CommentId,
        viewer: Option<UserId>,
    ) -> EngagementResult<CommentView> {
        let conn = self.store.connect().await?;
        let sql = view_query("WHERE c.id = ?2");
        collect_views(&conn, &sql, params![viewer, comment])
            .await
            .with_context(|| format!("loading comment view {comment}"))?
            .pop()
            .ok_or(EngagementError::NotFound("comment"))
    }

    /// Top-level comments plus replies on a video.
    pub async fn comment_count(&self, video: VideoId) -> EngagementResult<i64> {
        let conn = self.store.connect().await?;
        if video_owner_on(&conn, video).await?.is_none() {
            return Err(EngagementError::NotFound("video"));
        }
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM comments WHERE video_id = ?1",
                params![video],
            )
            .await
            .context("counting comments")?;
        let row = rows.next().await?.context("missing count row")?;
        Ok(row.get::<i64>(0)?)
    }
}

async fn collect_views(
    conn: &Connection,
    sql: &str,
    args: impl libsql::params::IntoParams,
) -> anyhow::Result<Vec<CommentView>> {
    let mut rows = conn.query(sql, args).await?;
    let mut views = Vec::new();
    while let Some(row) = rows.next().await? {
        views.push(row_to_view(&row)?);
    }
    Ok(views)
}

fn row_to_view(row: &Row) -> anyhow::Result<CommentView> {
    let base = COMMENT_COLUMN_COUNT;
    let viewer_vote = row
        .get::<Option<String>>(base + 6)?
        .map(|raw| raw.parse::<VoteKind>())
        .transpose()
        .map_err(|err| anyhow::anyhow!("corrupt vote row: {err}"))?;
    Ok(CommentView {
        comment: row_to_comment(row, 0)?,
        author: row_to_profile(row, base)?,
        reply_count: row.get(base + 5)?,
        viewer_vote,
        is_video_creator: row.get::<i64>(base + 7).map(int_flag)?,
    })
}
