#![forbid(unsafe_code)]

//! The engagement operations as exposed to callers.
//!
//! Every method takes the caller resolved by the transport (`None` for
//! anonymous requests), runs the authorization checks and then delegates to
//! the owning component.

use anyhow::Result;

use crate::{
    aggregator::Aggregator,
    catalog::Catalog,
    comments::CommentStore,
    config::RuntimeSettings,
    db::Store,
    error::{EngagementError, EngagementResult},
    guard,
    liked::LikedVideos,
    model::{
        Comment, CommentId, CommentView, NewComment, NewPlaylist, Page, Playlist, PlaylistEntry,
        PlaylistId, UserId, VideoId, VoteKind, VoteOutcome,
    },
    playlists::{PlaylistChanges, Playlists},
    threads::ThreadReader,
};

#[derive(Clone)]
pub struct Engagement {
    catalog: Catalog,
    comments: CommentStore,
    aggregator: Aggregator,
    threads: ThreadReader,
    playlists: Playlists,
    liked: LikedVideos,
}

impl Engagement {
    pub fn new(store: Store) -> Self {
        Self {
            catalog: Catalog::new(store.clone()),
            comments: CommentStore::new(store.clone()),
            aggregator: Aggregator::new(store.clone()),
            threads: ThreadReader::new(store.clone()),
            playlists: Playlists::new(store.clone()),
            liked: LikedVideos::new(store),
        }
    }

    /// Opens the database named by the runtime settings.
    pub async fn open(settings: &RuntimeSettings) -> Result<Self> {
        let store = Store::open_with(&settings.db_path, settings.busy_timeout).await?;
        Ok(Self::new(store))
    }

    /// Mirror of the video and profile collaborators.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub async fn create_comment(
        &self,
        caller: Option<UserId>,
        input: &NewComment,
    ) -> EngagementResult<CommentView> {
        let author = guard::require_caller(caller)?;
        let comment = self.comments.create(author, input).await?;
        self.threads.view(comment.id, Some(author)).await
    }

    pub async fn list_comments(
        &self,
        viewer: Option<UserId>,
        video: VideoId,
        page: Page,
    ) -> EngagementResult<Vec<CommentView>> {
        self.threads.top_level(video, viewer, page).await
    }

    pub async fn list_replies(
        &self,
        viewer: Option<UserId>,
        parent: CommentId,
        page: Page,
    ) -> EngagementResult<Vec<CommentView>> {
        self.threads.replies(parent, viewer, page).await
    }

    pub async fn comment_count(&self, video: VideoId) -> EngagementResult<i64> {
        self.threads.comment_count(video).await
    }

    pub async fn edit_comment(
        &self,
        caller: Option<UserId>,
        id: CommentId,
        body: &str,
    ) -> EngagementResult<CommentView> {
        let caller = guard::require_caller(caller)?;
        let comment = self.comments.require(id).await?;
        guard::require_author(caller, &comment)?;
        self.comments.update(id, body).await?;
        self.threads.view(id, Some(caller)).await
    }

    pub async fn delete_comment(&self, caller: Option<UserId>, id: CommentId) -> EngagementResult<()> {
        let caller = guard::require_caller(caller)?;
        let comment = self.comments.require(id).await?;
        guard::require_author(caller, &comment)?;
        self.comments.delete(id).await
    }

    pub async fn set_pinned(
        &self,
        caller: Option<UserId>,
        id: CommentId,
        pinned: bool,
    ) -> EngagementResult<CommentView> {
        let caller = guard::require_caller(caller)?;
        self.require_moderator(caller, id).await?;
        self.comments.set_pinned(id, pinned).await?;
        self.threads.view(id, Some(caller)).await
    }

    pub async fn set_creator_liked(
        &self,
        caller: Option<UserId>,
        id: CommentId,
        liked: bool,
    ) -> EngagementResult<CommentView> {
        let caller = guard::require_caller(caller)?;
        self.require_moderator(caller, id).await?;
        self.comments.set_creator_liked(id, liked).await?;
        self.threads.view(id, Some(caller)).await
    }

    async fn require_moderator(&self, caller: UserId, id: CommentId) -> EngagementResult<Comment> {
        let comment = self.comments.require(id).await?;
        let owner = self
            .catalog
            .video_owner(comment.video_id)
            .await?
            .ok_or(EngagementError::NotFound("video"))?;
        guard::require_video_owner(caller, owner)?;
        Ok(comment)
    }

    /// Records a `like` or `dislike`; any other kind is invalid input.
    pub async fn vote(
        &self,
        caller: Option<UserId>,
        id: CommentId,
        kind: &str,
    ) -> EngagementResult<VoteOutcome> {
        let voter = guard::may_vote(caller)?;
        let kind: VoteKind = kind.parse()?;
        let like_count = self.aggregator.apply_vote(id, voter, Some(kind)).await?;
        Ok(VoteOutcome {
            comment_id: id,
            like_count,
            viewer_vote: Some(kind),
        })
    }

    pub async fn remove_vote(
        &self,
        caller: Option<UserId>,
        id: CommentId,
    ) -> EngagementResult<VoteOutcome> {
        let voter = guard::may_vote(caller)?;
        let like_count = self.aggregator.apply_vote(id, voter, None).await?;
        Ok(VoteOutcome {
            comment_id: id,
            like_count,
            viewer_vote: None,
        })
    }

    pub async fn like_video(&self, caller: Option<UserId>, video: VideoId) -> EngagementResult<bool> {
        let user = guard::require_caller(caller)?;
        self.liked.like(user, video).await
    }

    pub async fn unlike_video(&self, caller: Option<UserId>, video: VideoId) -> EngagementResult<bool> {
        let user = guard::require_caller(caller)?;
        self.liked.unlike(user, video).await
    }

    pub async fn is_video_liked(
        &self,
        caller: Option<UserId>,
        video: VideoId,
    ) -> EngagementResult<bool> {
        let user = guard::require_caller(caller)?;
        self.liked.is_liked(user, video).await
    }

    pub async fn liked_videos(
        &self,
        caller: Option<UserId>,
        page: Page,
    ) -> EngagementResult<Vec<PlaylistEntry>> {
        let user = guard::require_caller(caller)?;
        self.liked.list_liked(user, page).await
    }

    /// Number of users who liked `video`; public like the video itself.
    pub async fn video_like_count(&self, video: VideoId) -> EngagementResult<i64> {
        self.liked.like_count(video).await
    }

    /// The caller's reserved liked playlist, `None` until their first like.
    pub async fn liked_playlist(&self, caller: Option<UserId>) -> EngagementResult<Option<Playlist>> {
        let user = guard::require_caller(caller)?;
        self.liked.liked_playlist(user).await
    }

    pub async fn create_playlist(
        &self,
        caller: Option<UserId>,
        input: &NewPlaylist,
    ) -> EngagementResult<Playlist> {
        let owner = guard::require_caller(caller)?;
        self.playlists.create(owner, input).await
    }

    /// The caller's own playlists, the liked one included once it exists.
    pub async fn my_playlists(&self, caller: Option<UserId>) -> EngagementResult<Vec<Playlist>> {
        let owner = guard::require_caller(caller)?;
        self.playlists.list_for_owner(owner).await
    }

    /// Which of the caller's playlists already hold `video`.
    pub async fn playlists_containing(
        &self,
        caller: Option<UserId>,
        video: VideoId,
    ) -> EngagementResult<Vec<PlaylistId>> {
        let owner = guard::require_caller(caller)?;
        self.playlists.containing_video(owner, video).await
    }

    pub async fn playlist(
        &self,
        caller: Option<UserId>,
        id: PlaylistId,
    ) -> EngagementResult<Playlist> {
        let playlist = self.playlists.require(id).await?;
        guard::may_view_playlist(caller, &playlist)?;
        Ok(playlist)
    }

    pub async fn playlist_entries(
        &self,
        caller: Option<UserId>,
        id: PlaylistId,
        page: Page,
    ) -> EngagementResult<Vec<PlaylistEntry>> {
        self.playlist(caller, id).await?;
        self.playlists.entries(id, page).await
    }

    pub async fn update_playlist(
        &self,
        caller: Option<UserId>,
        id: PlaylistId,
        changes: &PlaylistChanges,
    ) -> EngagementResult<Playlist> {
        self.owned_playlist(caller, id).await?;
        self.playlists.update(id, changes).await
    }

    pub async fn delete_playlist(&self, caller: Option<UserId>, id: PlaylistId) -> EngagementResult<()> {
        self.owned_playlist(caller, id).await?;
        self.playlists.delete(id).await
    }

    pub async fn add_to_playlist(
        &self,
        caller: Option<UserId>,
        id: PlaylistId,
        video: VideoId,
    ) -> EngagementResult<bool> {
        self.owned_playlist(caller, id).await?;
        self.playlists.add_video(id, video).await
    }

    pub async fn remove_from_playlist(
        &self,
        caller: Option<UserId>,
        id: PlaylistId,
        video: VideoId,
    ) -> EngagementResult<bool> {
        self.owned_playlist(caller, id).await?;
        self.playlists.remove_video(id, video).await
    }

    async fn owned_playlist(&self, caller: Option<UserId>, id: PlaylistId) -> EngagementResult<Playlist> {
        let caller = guard::require_caller(caller)?;
        let playlist = self.playlists.require(id).await?;
        guard::require_playlist_owner(caller, &playlist)?;
        Ok(playlist)
    }
}
