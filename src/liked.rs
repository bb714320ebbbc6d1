#![forbid(unsafe_code)]

//! Liked videos, stored as membership of a per-user reserved playlist.
//!
//! The reserved playlist is created lazily on the first like and is
//! identified by `kind = 'liked'`; a partial unique index keeps it to one per
//! owner. Membership is treated as a set: positions are assigned so ordinary
//! playlist invariants hold, but no read depends on them.

use anyhow::Context;
use libsql::{Connection, params};

use crate::{
    catalog::video_owner_on,
    db::{Store, now_timestamp, retry_transient},
    error::{EngagementError, EngagementResult},
    model::{Page, Playlist, PlaylistEntry, PlaylistId, UserId, VideoId},
    playlists::{PLAYLIST_COLUMNS, append_video_on, entries_on, remove_video_on, row_to_playlist},
};

pub const LIKED_PLAYLIST_TITLE: &str = "Liked videos";

#[derive(Clone)]
pub struct LikedVideos {
    store: Store,
}

impl LikedVideos {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Records that `user` likes `video`. Returns `false` if it already was.
    pub async fn like(&self, user: UserId, video: VideoId) -> EngagementResult<bool> {
        retry_transient("like video", || async {
            let conn = self.store.connect().await?;
            let tx = Store::begin_write(&conn).await?;
            if video_owner_on(&tx, video).await?.is_none() {
                return Err(EngagementError::NotFound("video"));
            }
            let playlist = ensure_liked_playlist_on(&tx, user).await?;
            let added = append_video_on(&tx, playlist, video).await?;
            tx.commit().await.context("committing like")?;
            tracing::info!(user, video_id = video, added, "video liked");
            Ok(added)
        })
        .await
    }

    /// Removes the like. Unliking something that was never liked is a no-op
    /// reported as `false`.
    pub async fn unlike(&self, user: UserId, video: VideoId) -> EngagementResult<bool> {
        retry_transient("unlike video", || async {
            let conn = self.store.connect().await?;
            let tx = Store::begin_write(&conn).await?;
            let Some(playlist) = liked_playlist_id_on(&tx, user).await? else {
                return Ok(false);
            };
            let removed = remove_video_on(&tx, playlist, video).await?;
            tx.commit().await.context("committing unlike")?;
            tracing::info!(user, video_id = video, removed, "video unliked");
            Ok(removed)
        })
        .await
    }

    pub async fn is_liked(&self, user: UserId, video: VideoId) -> EngagementResult<bool> {
        let conn = self.store.connect().await?;
        let mut rows = conn
            .query(
                r#"
                SELECT 1
                FROM playlist_videos pv
                JOIN playlists p ON p.id = pv.playlist_id
                WHERE p.owner_id = ?1 AND p.kind = 'liked' AND pv.video_id = ?2
                "#,
                params![user, video],
            )
            .await
            .context("checking liked video")?;
        Ok(rows.next().await?.is_some())
    }

    /// Liked videos, most recently liked first.
    pub async fn list_liked(&self, user: UserId, page: Page) -> EngagementResult<Vec<PlaylistEntry>> {
        let conn = self.store.connect().await?;
        let Some(playlist) = liked_playlist_id_on(&conn, user).await? else {
            return Ok(Vec::new());
        };
        let entries = entries_on(&conn, playlist, "pv.created_at DESC", page).await?;
        tracing::debug!(user, returned = entries.len(), "listed liked videos");
        Ok(entries)
    }

    /// How many users currently have `video` in their liked playlist.
    pub async fn like_count(&self, video: VideoId) -> EngagementResult<i64> {
        let conn = self.store.connect().await?;
        if video_owner_on(&conn, video).await?.is_none() {
            return Err(EngagementError::NotFound("video"));
        }
        let mut rows = conn
            .query(
                r#"
                SELECT COUNT(*)
                FROM playlist_videos pv
                JOIN playlists p ON p.id = pv.playlist_id
                WHERE p.kind = 'liked' AND pv.video_id = ?1
                "#,
                params![video],
            )
            .await
            .with_context(|| format!("counting likes of video {video}"))?;
        let row = rows.next().await?.context("missing like count row")?;
        Ok(row.get::<i64>(0)?)
    }

    /// The reserved playlist itself, or `None` before the first like.
    pub async fn liked_playlist(&self, user: UserId) -> EngagementResult<Option<Playlist>> {
        let conn = self.store.connect().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {PLAYLIST_COLUMNS} FROM playlists WHERE owner_id = ?1 AND kind = 'liked'"
                ),
                params![user],
            )
            .await
            .context("loading liked playlist")?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_playlist(&row)?)),
            None => Ok(None),
        }
    }
}

async fn liked_playlist_id_on(conn: &Connection, user: UserId) -> anyhow::Result<Option<PlaylistId>> {
    let mut rows = conn
        .query(
            "SELECT id FROM playlists WHERE owner_id = ?1 AND kind = 'liked'",
            params![user],
        )
        .await
        .context("looking up liked playlist")?;
    match rows.next().await? {
        Some(row) => Ok(Some(row.get::<i64>(0)?)),
        None => Ok(None),
    }
}

/// Creates the reserved playlist if missing and returns its id. A concurrent
/// creator winning the unique index is treated as "already exists".
async fn ensure_liked_playlist_on(conn: &Connection, user: UserId) -> EngagementResult<PlaylistId> {
    let now = now_timestamp();
    let inserted = conn
        .execute(
            r#"
            INSERT INTO playlists (owner_id, title, description, visibility, kind, created_at, updated_at)
            VALUES (?1, ?2, '', 'private', 'liked', ?3, ?3)
            ON CONFLICT DO NOTHING
            "#,
            params![user, LIKED_PLAYLIST_TITLE, now],
        )
        .await
        .context("creating liked playlist")?;
    if inserted > 0 {
        tracing::info!(user, "liked playlist created");
    }
    liked_playlist_id_on(conn, user)
        .await?
        .ok_or(EngagementError::Conflict("liked playlist not visible after creation"))
}
