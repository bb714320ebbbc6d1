#![forbid(unsafe_code)]

//! Stateless ownership policy consulted before any engagement write.

use crate::{
    error::{EngagementError, EngagementResult},
    model::{Comment, Playlist, UserId, Visibility},
};

/// Resolves the authenticated caller or fails with `Unauthenticated`.
pub fn require_caller(caller: Option<UserId>) -> EngagementResult<UserId> {
    caller.ok_or(EngagementError::Unauthenticated)
}

/// Editing and deleting a comment is reserved to its author.
pub fn require_author(caller: UserId, comment: &Comment) -> EngagementResult<()> {
    if comment.author_id != caller {
        return Err(EngagementError::Unauthorized(
            "only the comment author may change this comment",
        ));
    }
    Ok(())
}

/// Pinning and creator-likes are reserved to the owner of the video the
/// comment belongs to.
pub fn require_video_owner(caller: UserId, video_owner: UserId) -> EngagementResult<()> {
    if caller != video_owner {
        return Err(EngagementError::Unauthorized(
            "only the video owner may moderate its comments",
        ));
    }
    Ok(())
}

/// Playlists are only changed by their owner.
pub fn require_playlist_owner(caller: UserId, playlist: &Playlist) -> EngagementResult<()> {
    if playlist.owner_id != caller {
        return Err(EngagementError::Unauthorized(
            "only the playlist owner may change this playlist",
        ));
    }
    Ok(())
}

/// Private playlists are only visible to their owner.
pub fn may_view_playlist(caller: Option<UserId>, playlist: &Playlist) -> EngagementResult<()> {
    if playlist.visibility == Visibility::Private && caller != Some(playlist.owner_id) {
        return Err(EngagementError::NotFound("playlist"));
    }
    Ok(())
}

/// Any authenticated user may vote, including on their own comments.
pub fn may_vote(caller: Option<UserId>) -> EngagementResult<UserId> {
    require_caller(caller)
}
