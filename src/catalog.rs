#![forbid(unsafe_code)]

//! Local mirror of the video and profile services.
//!
//! Video CRUD and profile editing live elsewhere; the engagement subsystem
//! only needs to know whether a video exists, who owns it, and how to render
//! an author. Those facts are synchronized into the `videos` and `profiles`
//! tables so the thread reader can join against them.

use anyhow::{Context, Result};
use libsql::{Connection, Row, params};

use crate::{
    db::{Store, now_timestamp, parse_timestamp},
    model::{Profile, UserId, VideoId, VideoSummary},
};

#[derive(Clone)]
pub struct Catalog {
    store: Store,
}

impl Catalog {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Inserts or refreshes the mirrored copy of a video.
    pub async fn upsert_video(&self, video: &VideoSummary) -> Result<()> {
        let conn = self.store.connect().await?;
        conn.execute(
            r#"
            INSERT INTO videos (id, owner_id, title, thumbnail_url, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                owner_id = excluded.owner_id,
                title = excluded.title,
                thumbnail_url = excluded.thumbnail_url
            "#,
            params![
                video.id,
                video.owner_id,
                video.title.as_str(),
                video.thumbnail_url.as_deref(),
                video
                    .created_at
                    .to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
            ],
        )
        .await
        .with_context(|| format!("mirroring video {}", video.id))?;
        Ok(())
    }

    pub async fn upsert_profile(&self, profile: &Profile) -> Result<()> {
        let conn = self.store.connect().await?;
        conn.execute(
            r#"
            INSERT INTO profiles (user_id, channel_name, description, icon_url, banner_url)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(user_id) DO UPDATE SET
                channel_name = excluded.channel_name,
                description = excluded.description,
                icon_url = excluded.icon_url,
                banner_url = excluded.banner_url
            "#,
            params![
                profile.user_id,
                profile.channel_name.as_str(),
                profile.description.as_str(),
                profile.icon_url.as_str(),
                profile.banner_url.as_str(),
            ],
        )
        .await
        .with_context(|| format!("mirroring profile {}", profile.user_id))?;
        Ok(())
    }

    #[cfg(test)]
    pub async fn video(&self, id: VideoId) -> Result<Option<VideoSummary>> {
        let conn = self.store.connect().await?;
        let mut rows = conn
            .query(
                r#"
                SELECT id, owner_id, title, thumbnail_url, created_at
                FROM videos
                WHERE id = ?1
                "#,
                params![id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_video(&row, 0)?)),
            None => Ok(None),
        }
    }

    pub async fn video_exists(&self, id: VideoId) -> Result<bool> {
        Ok(self.video_owner(id).await?.is_some())
    }

    pub async fn video_owner(&self, id: VideoId) -> Result<Option<UserId>> {
        let conn = self.store.connect().await?;
        video_owner_on(&conn, id).await
    }

    /// Returns the user's profile, or an empty one carrying only the id when
    /// the profile service never published anything for them.
    pub async fn profile_for(&self, user_id: UserId) -> Result<Profile> {
        let conn = self.store.connect().await?;
        let mut rows = conn
            .query(
                r#"
                SELECT user_id, channel_name, description, icon_url, banner_url
                FROM profiles
                WHERE user_id = ?1
                "#,
                params![user_id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => row_to_profile(&row, 0),
            None => Ok(Profile {
                user_id,
                ..Profile::default()
            }),
        }
    }
}

/// Owner lookup usable inside an open transaction.
pub(crate) async fn video_owner_on(conn: &Connection, id: VideoId) -> Result<Option<UserId>> {
    let mut rows = conn
        .query("SELECT owner_id FROM videos WHERE id = ?1", params![id])
        .await
        .with_context(|| format!("looking up owner of video {id}"))?;
    match rows.next().await? {
        Some(row) => Ok(Some(row.get::<i64>(0)?)),
        None => Ok(None),
    }
}

/// Column order: id, owner_id, title, thumbnail_url, created_at.
pub(crate) fn row_to_video(row: &Row, start: i32) -> Result<VideoSummary> {
    let created_at: String = row.get(start + 4)?;
    Ok(VideoSummary {
        id: row.get(start)?,
        owner_id: row.get(start + 1)?,
        title: row.get(start + 2)?,
        thumbnail_url: row.get(start + 3)?,
        created_at: parse_timestamp(&created_at).context("video created_at")?,
    })
}

/// Column order: user_id, channel_name, description, icon_url, banner_url.
pub(crate) fn row_to_profile(row: &Row, start: i32) -> Result<Profile> {
    Ok(Profile {
        user_id: row.get(start)?,
        channel_name: row.get(start + 1)?,
        description: row.get(start + 2)?,
        icon_url: row.get(start + 3)?,
        banner_url: row.get(start + 4)?,
    })
}

/// Convenience constructor for callers mirroring a video that was just
/// published.
pub fn new_video(id: VideoId, owner_id: UserId, title: impl Into<String>) -> Result<VideoSummary> {
    Ok(VideoSummary {
        id,
        owner_id,
        title: title.into(),
        thumbnail_url: None,
        created_at: parse_timestamp(&now_timestamp())?,
    })
}
