#![forbid(unsafe_code)]

//! Ordinary user playlists: ordered video membership with positions.
//!
//! The reserved liked-videos playlist shares these tables but is managed by
//! [`crate::liked`]; every write here refuses it.

use anyhow::Context;
use libsql::{Connection, Row, params};

use crate::{
    catalog::{row_to_video, video_owner_on},
    db::{Store, now_timestamp, parse_timestamp, retry_transient},
    error::{EngagementError, EngagementResult},
    liked::LIKED_PLAYLIST_TITLE,
    model::{
        NewPlaylist, Page, Playlist, PlaylistEntry, PlaylistId, PlaylistKind, UserId, VideoId,
        Visibility,
    },
};

/// Column list matching [`row_to_playlist`].
pub(crate) const PLAYLIST_COLUMNS: &str =
    "id, owner_id, title, description, visibility, kind, created_at, updated_at";

/// Partial update; `None` keeps the stored value.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct PlaylistChanges {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub visibility: Option<String>,
}

#[derive(Clone)]
pub struct Playlists {
    store: Store,
}

impl Playlists {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn create(&self, owner: UserId, input: &NewPlaylist) -> EngagementResult<Playlist> {
        let title = validate_title(&input.title)?;
        let visibility = match input.visibility.as_deref() {
            None | Some("") => Visibility::Private,
            Some(raw) => raw.parse()?,
        };

        retry_transient("create playlist", || async {
            let conn = self.store.connect().await?;
            let now = now_timestamp();
            conn.execute(
                r#"
                INSERT INTO playlists (owner_id, title, description, visibility, kind, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, 'standard', ?5, ?5)
                "#,
                params![owner, title, input.description.as_str(), visibility.as_str(), now],
            )
            .await
            .context("inserting playlist")?;
            let id = conn.last_insert_rowid();
            let playlist = find_on(&conn, id)
                .await?
                .context("created playlist vanished")?;
            tracing::info!(playlist_id = id, owner, "playlist created");
            Ok(playlist)
        })
        .await
    }

    pub async fn find(&self, id: PlaylistId) -> EngagementResult<Option<Playlist>> {
        let conn = self.store.connect().await?;
        Ok(find_on(&conn, id).await?)
    }

    pub async fn require(&self, id: PlaylistId) -> EngagementResult<Playlist> {
        self.find(id)
            .await?
            .ok_or(EngagementError::NotFound("playlist"))
    }

    /// Every playlist of `owner`, the reserved one included, oldest first.
    pub async fn list_for_owner(&self, owner: UserId) -> EngagementResult<Vec<Playlist>> {
        let conn = self.store.connect().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {PLAYLIST_COLUMNS} FROM playlists WHERE owner_id = ?1 ORDER BY created_at ASC, id ASC"
                ),
                params![owner],
            )
            .await
            .context("listing playlists")?;
        let mut playlists = Vec::new();
        while let Some(row) = rows.next().await? {
            playlists.push(row_to_playlist(&row)?);
        }
        Ok(playlists)
    }

    /// Ids of the owner's playlists (the liked one included) that hold
    /// `video`, oldest playlist first.
    pub async fn containing_video(
        &self,
        owner: UserId,
        video: VideoId,
    ) -> EngagementResult<Vec<PlaylistId>> {
        let conn = self.store.connect().await?;
        let mut rows = conn
            .query(
                r#"
                SELECT p.id
                FROM playlists p
                JOIN playlist_videos pv ON pv.playlist_id = p.id
                WHERE p.owner_id = ?1 AND pv.video_id = ?2
                ORDER BY p.created_at ASC, p.id ASC
                "#,
                params![owner, video],
            )
            .await
            .with_context(|| format!("finding playlists holding video {video}"))?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next().await? {
            ids.push(row.get::<i64>(0)?);
        }
        Ok(ids)
    }

    pub async fn update(
        &self,
        id: PlaylistId,
        changes: &PlaylistChanges,
    ) -> EngagementResult<Playlist> {
        let title = changes.title.as_deref().map(validate_title).transpose()?;
        let visibility = changes
            .visibility
            .as_deref()
            .map(str::parse::<Visibility>)
            .transpose()?;

        retry_transient("update playlist", || async {
            let conn = self.store.connect().await?;
            let tx = Store::begin_write(&conn).await?;
            let current = standard_playlist_on(&tx, id).await?;
            tx.execute(
                r#"
                UPDATE playlists
                SET title = ?1, description = ?2, visibility = ?3, updated_at = ?4
                WHERE id = ?5
                "#,
                params![
                    title.unwrap_or(current.title.as_str()),
                    changes
                        .description
                        .as_deref()
                        .unwrap_or(current.description.as_str()),
                    visibility.unwrap_or(current.visibility).as_str(),
                    now_timestamp(),
                    id
                ],
            )
            .await
            .context("updating playlist")?;
            let updated = find_on(&tx, id)
                .await?
                .ok_or(EngagementError::NotFound("playlist"))?;
            tx.commit().await.context("committing playlist update")?;
            tracing::info!(playlist_id = id, "playlist updated");
            Ok(updated)
        })
        .await
    }

    /// Appends `video` to the end of the playlist. Returns `false` when it was
    /// already a member.
    pub async fn add_video(&self, id: PlaylistId, video: VideoId) -> EngagementResult<bool> {
        retry_transient("add playlist video", || async {
            let conn = self.store.connect().await?;
            let tx = Store::begin_write(&conn).await?;
            standard_playlist_on(&tx, id).await?;
            if video_owner_on(&tx, video).await?.is_none() {
                return Err(EngagementError::NotFound("video"));
            }
            let added = append_video_on(&tx, id, video).await?;
            tx.commit().await.context("committing playlist append")?;
            tracing::info!(playlist_id = id, video_id = video, added, "playlist video added");
            Ok(added)
        })
        .await
    }

    /// Returns `false` when the video was not in the playlist.
    pub async fn remove_video(&self, id: PlaylistId, video: VideoId) -> EngagementResult<bool> {
        retry_transient("remove playlist video", || async {
            let conn = self.store.connect().await?;
            let tx = Store::begin_write(&conn).await?;
            standard_playlist_on(&tx, id).await?;
            let removed = remove_video_on(&tx, id, video).await?;
            tx.commit().await.context("committing playlist removal")?;
            tracing::info!(playlist_id = id, video_id = video, removed, "playlist video removed");
            Ok(removed)
        })
        .await
    }

    /// Members in playlist order.
    pub async fn entries(&self, id: PlaylistId, page: Page) -> EngagementResult<Vec<PlaylistEntry>> {
        let conn = self.store.connect().await?;
        Ok(entries_on(&conn, id, "pv.position ASC", page).await?)
    }

    /// Deletes an ordinary playlist and its memberships.
    pub async fn delete(&self, id: PlaylistId) -> EngagementResult<()> {
        retry_transient("delete playlist", || async {
            let conn = self.store.connect().await?;
            let tx = Store::begin_write(&conn).await?;
            standard_playlist_on(&tx, id).await?;
            tx.execute("DELETE FROM playlists WHERE id = ?1", params![id])
                .await
                .context("deleting playlist")?;
            tx.commit().await.context("committing playlist delete")?;
            tracing::info!(playlist_id = id, "playlist deleted");
            Ok(())
        })
        .await
    }
}

fn validate_title(raw: &str) -> EngagementResult<&str> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(EngagementError::invalid("playlist title must not be empty"));
    }
    if title == LIKED_PLAYLIST_TITLE {
        return Err(EngagementError::invalid(format!(
            "`{LIKED_PLAYLIST_TITLE}` is a reserved playlist title"
        )));
    }
    Ok(title)
}

/// Loads a playlist that ordinary writes may touch.
async fn standard_playlist_on(conn: &Connection, id: PlaylistId) -> EngagementResult<Playlist> {
    let playlist = find_on(conn, id)
        .await?
        .ok_or(EngagementError::NotFound("playlist"))?;
    if playlist.kind == PlaylistKind::Liked {
        return Err(EngagementError::invalid(
            "the liked videos playlist is managed through likes",
        ));
    }
    Ok(playlist)
}

pub(crate) async fn find_on(conn: &Connection, id: PlaylistId) -> anyhow::Result<Option<Playlist>> {
    let mut rows = conn
        .query(
            &format!("SELECT {PLAYLIST_COLUMNS} FROM playlists WHERE id = ?1"),
            params![id],
        )
        .await
        .with_context(|| format!("loading playlist {id}"))?;
    match rows.next().await? {
        Some(row) => Ok(Some(row_to_playlist(&row)?)),
        None => Ok(None),
    }
}

/// Inserts a membership at `max(position) + 1` (0 for an empty playlist).
/// Must run inside a write transaction; an existing membership is left alone
/// and reported as `false`.
pub(crate) async fn append_video_on(
    conn: &Connection,
    playlist: PlaylistId,
    video: VideoId,
) -> anyhow::Result<bool> {
    let mut rows = conn
        .query(
            "SELECT 1 FROM playlist_videos WHERE playlist_id = ?1 AND video_id = ?2",
            params![playlist, video],
        )
        .await
        .context("checking playlist membership")?;
    if rows.next().await?.is_some() {
        return Ok(false);
    }
    conn.execute(
        r#"
        INSERT INTO playlist_videos (playlist_id, video_id, position, created_at)
        SELECT ?1, ?2, COALESCE(MAX(position) + 1, 0), ?3
        FROM playlist_videos
        WHERE playlist_id = ?1
        "#,
        params![playlist, video, now_timestamp()],
    )
    .await
    .context("appending playlist video")?;
    Ok(true)
}

pub(crate) async fn remove_video_on(
    conn: &Connection,
    playlist: PlaylistId,
    video: VideoId,
) -> anyhow::Result<bool> {
    let removed = conn
        .execute(
            "DELETE FROM playlist_videos WHERE playlist_id = ?1 AND video_id = ?2",
            params![playlist, video],
        )
        .await
        .context("removing playlist video")?;
    Ok(removed > 0)
}

/// Memberships joined with their videos. `order` is a trusted ORDER BY body.
pub(crate) async fn entries_on(
    conn: &Connection,
    playlist: PlaylistId,
    order: &str,
    page: Page,
) -> anyhow::Result<Vec<PlaylistEntry>> {
    let mut rows = conn
        .query(
            &format!(
                r#"
                SELECT pv.playlist_id, pv.position, pv.created_at,
                       v.id, v.owner_id, v.title, v.thumbnail_url, v.created_at
                FROM playlist_videos pv
                JOIN videos v ON v.id = pv.video_id
                WHERE pv.playlist_id = ?1
                ORDER BY {order}, v.id ASC
                LIMIT ?2 OFFSET ?3
                "#
            ),
            params![playlist, page.limit(), page.offset()],
        )
        .await
        .with_context(|| format!("listing entries of playlist {playlist}"))?;
    let mut entries = Vec::new();
    while let Some(row) = rows.next().await? {
        let added_at: String = row.get(2)?;
        entries.push(PlaylistEntry {
            playlist_id: row.get(0)?,
            position: row.get(1)?,
            added_at: parse_timestamp(&added_at)?,
            video: row_to_video(&row, 3)?,
        });
    }
    Ok(entries)
}

/// Converts a row selected with [`PLAYLIST_COLUMNS`].
pub(crate) fn row_to_playlist(row: &Row) -> anyhow::Result<Playlist> {
    let visibility: String = row.get(4)?;
    let kind: String = row.get(5)?;
    let created_at: String = row.get(6)?;
    let updated_at: String = row.get(7)?;
    Ok(Playlist {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        visibility: visibility
            .parse()
            .map_err(|err| anyhow::anyhow!("stored playlist visibility: {err}"))?,
        kind: kind
            .parse()
            .map_err(|err| anyhow::anyhow!("stored playlist kind: {err}"))?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::testing::{seed_video, temp_store},
        liked::LikedVideos,
    };
    use anyhow::Result;

    fn named(title: &str) -> NewPlaylist {
        NewPlaylist {
            title: title.into(),
            description: String::new(),
            visibility: None,
        }
    }

    async fn setup() -> Result<(tempfile::TempDir, Store, Playlists)> {
        let (dir, store) = temp_store().await?;
        for id in 1..=4 {
            seed_video(&store, id, 100).await?;
        }
        let playlists = Playlists::new(store.clone());
        Ok((dir, store, playlists))
    }

    #[tokio::test]
    async fn create_defaults_to_private_and_validates() -> Result<()> {
        let (_dir, _store, playlists) = setup().await?;
        let playlist = playlists.create(5, &named("  road trip ")).await?;
        assert_eq!(playlist.title, "road trip");
        assert_eq!(playlist.visibility, Visibility::Private);
        assert_eq!(playlist.kind, PlaylistKind::Standard);

        let mut bad = named("mix");
        bad.visibility = Some("friends".into());
        assert!(matches!(
            playlists.create(5, &bad).await,
            Err(EngagementError::InvalidInput(_))
        ));
        assert!(playlists.create(5, &named(" ")).await.is_err());
        assert!(playlists.create(5, &named(LIKED_PLAYLIST_TITLE)).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn add_video_appends_positions_and_ignores_duplicates() -> Result<()> {
        let (_dir, _store, playlists) = setup().await?;
        let playlist = playlists.create(5, &named("mix")).await?;
        assert!(playlists.add_video(playlist.id, 3).await?);
        assert!(playlists.add_video(playlist.id, 1).await?);
        assert!(!playlists.add_video(playlist.id, 3).await?);
        assert!(playlists.add_video(playlist.id, 2).await?);

        let entries = playlists.entries(playlist.id, Page::default()).await?;
        let order: Vec<_> = entries.iter().map(|e| (e.video.id, e.position)).collect();
        assert_eq!(order, vec![(3, 0), (1, 1), (2, 2)]);

        assert!(matches!(
            playlists.add_video(playlist.id, 99).await,
            Err(EngagementError::NotFound("video"))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn removed_positions_are_not_reused() -> Result<()> {
        let (_dir, _store, playlists) = setup().await?;
        let playlist = playlists.create(5, &named("mix")).await?;
        playlists.add_video(playlist.id, 1).await?;
        playlists.add_video(playlist.id, 2).await?;
        assert!(playlists.remove_video(playlist.id, 1).await?);
        assert!(!playlists.remove_video(playlist.id, 1).await?);
        playlists.add_video(playlist.id, 1).await?;

        let entries = playlists.entries(playlist.id, Page::default()).await?;
        let order: Vec<_> = entries.iter().map(|e| (e.video.id, e.position)).collect();
        assert_eq!(order, vec![(2, 1), (1, 2)]);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_get_distinct_positions() -> Result<()> {
        let (_dir, store, playlists) = setup().await?;
        for id in 5..=16 {
            seed_video(&store, id, 100).await?;
        }
        let playlist = playlists.create(5, &named("mix")).await?;

        let mut tasks = Vec::new();
        for video in 1..=16 {
            let playlists = playlists.clone();
            tasks.push(tokio::spawn(async move {
                playlists.add_video(playlist.id, video).await
            }));
        }
        for task in tasks {
            assert!(task.await??);
        }

        let mut positions: Vec<_> = playlists
            .entries(playlist.id, Page::new(Some(100), None))
            .await?
            .into_iter()
            .map(|entry| entry.position)
            .collect();
        positions.sort_unstable();
        assert_eq!(positions, (0..16).collect::<Vec<i64>>());
        Ok(())
    }

    #[tokio::test]
    async fn update_keeps_unspecified_fields() -> Result<()> {
        let (_dir, _store, playlists) = setup().await?;
        let mut input = named("mix");
        input.description = "weekend".into();
        let playlist = playlists.create(5, &input).await?;

        let updated = playlists
            .update(
                playlist.id,
                &PlaylistChanges {
                    visibility: Some("public".into()),
                    ..PlaylistChanges::default()
                },
            )
            .await?;
        assert_eq!(updated.title, "mix");
        assert_eq!(updated.description, "weekend");
        assert_eq!(updated.visibility, Visibility::Public);
        Ok(())
    }

    #[tokio::test]
    async fn liked_playlist_is_refused_by_ordinary_writes() -> Result<()> {
        let (_dir, store, playlists) = setup().await?;
        let liked = LikedVideos::new(store);
        liked.like(5, 1).await?;
        let reserved = liked
            .liked_playlist(5)
            .await?
            .expect("liked playlist created on first like");

        for result in [
            playlists.add_video(reserved.id, 2).await.map(|_| ()),
            playlists.remove_video(reserved.id, 1).await.map(|_| ()),
            playlists.delete(reserved.id).await,
        ] {
            assert!(matches!(result, Err(EngagementError::InvalidInput(_))));
        }
        assert!(liked.is_liked(5, 1).await?);
        assert_eq!(playlists.list_for_owner(5).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn containing_video_lists_only_the_owners_playlists() -> Result<()> {
        let (_dir, store, playlists) = setup().await?;
        let road = playlists.create(5, &named("road trip")).await?;
        let gym = playlists.create(5, &named("gym")).await?;
        let other = playlists.create(6, &named("theirs")).await?;
        playlists.add_video(road.id, 1).await?;
        playlists.add_video(gym.id, 2).await?;
        playlists.add_video(other.id, 1).await?;

        let liked = LikedVideos::new(store);
        liked.like(5, 1).await?;
        let reserved = liked
            .liked_playlist(5)
            .await?
            .expect("liked playlist created on first like");

        assert_eq!(playlists.containing_video(5, 1).await?, vec![road.id, reserved.id]);
        assert_eq!(playlists.containing_video(5, 2).await?, vec![gym.id]);
        assert!(playlists.containing_video(5, 3).await?.is_empty());
        assert_eq!(playlists.containing_video(6, 1).await?, vec![other.id]);
        Ok(())
    }

    #[tokio::test]
    async fn delete_removes_playlist_and_memberships() -> Result<()> {
        let (_dir, store, playlists) = setup().await?;
        let playlist = playlists.create(5, &named("mix")).await?;
        playlists.add_video(playlist.id, 1).await?;
        playlists.delete(playlist.id).await?;
        assert!(playlists.find(playlist.id).await?.is_none());
        let left = crate::db::testing::scalar(
            &store,
            "SELECT COUNT(*) FROM playlist_videos",
            params![],
        )
        .await?;
        assert_eq!(left, 0);
        assert!(matches!(
            playlists.delete(playlist.id).await,
            Err(EngagementError::NotFound("playlist"))
        ));
        Ok(())
    }
}
