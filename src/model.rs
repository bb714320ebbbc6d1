#![forbid(unsafe_code)]

//! Domain records shared by the stores, the thread reader and the HTTP layer.
//!
//! Everything here serializes the way the frontend consumes it (snake_case
//! JSON, RFC 3339 timestamps).

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngagementError;

pub type UserId = i64;
pub type VideoId = i64;
pub type CommentId = i64;
pub type PlaylistId = i64;

pub const DEFAULT_PAGE_LIMIT: i64 = 20;
pub const MAX_PAGE_LIMIT: i64 = 100;

/// A single vote fact. Only `like` moves the cached counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteKind {
    Like,
    Dislike,
}

impl VoteKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Dislike => "dislike",
        }
    }
}

impl fmt::Display for VoteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VoteKind {
    type Err = EngagementError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "like" => Ok(Self::Like),
            "dislike" => Ok(Self::Dislike),
            other => Err(EngagementError::invalid(format!(
                "invalid vote kind `{other}`: must be 'like' or 'dislike'"
            ))),
        }
    }
}

/// Stored comment row, without any per-viewer annotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub video_id: VideoId,
    pub author_id: UserId,
    pub parent_id: Option<CommentId>,
    pub body: String,
    pub like_count: i64,
    pub is_pinned: bool,
    pub is_creator_liked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Comment {
    pub fn is_reply(&self) -> bool {
        self.parent_id.is_some()
    }
}

/// Input accepted by the comment store.
#[derive(Debug, Clone, Deserialize)]
pub struct NewComment {
    pub video_id: VideoId,
    #[serde(default)]
    pub parent_id: Option<CommentId>,
    pub body: String,
}

/// Public channel information about a user, mirrored from the profile service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: UserId,
    #[serde(default)]
    pub channel_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon_url: String,
    #[serde(default)]
    pub banner_url: String,
}

/// Comment joined with the data a thread view needs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommentView {
    #[serde(flatten)]
    pub comment: Comment,
    pub author: Profile,
    pub reply_count: i64,
    pub viewer_vote: Option<VoteKind>,
    pub is_video_creator: bool,
}

/// Result of a vote mutation as reported to the voter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VoteOutcome {
    pub comment_id: CommentId,
    pub like_count: i64,
    pub viewer_vote: Option<VoteKind>,
}

/// Video as exposed by the catalog collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSummary {
    pub id: VideoId,
    pub owner_id: UserId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Unlisted,
    Private,
}

impl Visibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Unlisted => "unlisted",
            Self::Private => "private",
        }
    }
}

impl FromStr for Visibility {
    type Err = EngagementError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "public" => Ok(Self::Public),
            "unlisted" => Ok(Self::Unlisted),
            "private" => Ok(Self::Private),
            other => Err(EngagementError::invalid(format!(
                "invalid visibility `{other}`"
            ))),
        }
    }
}

/// `Liked` marks the per-user reserved playlist that carries liked videos.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaylistKind {
    Standard,
    Liked,
}

impl PlaylistKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Liked => "liked",
        }
    }
}

impl FromStr for PlaylistKind {
    type Err = EngagementError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "standard" => Ok(Self::Standard),
            "liked" => Ok(Self::Liked),
            other => Err(EngagementError::invalid(format!(
                "invalid playlist kind `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Playlist {
    pub id: PlaylistId,
    pub owner_id: UserId,
    pub title: String,
    pub description: String,
    pub visibility: Visibility,
    pub kind: PlaylistKind,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPlaylist {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub visibility: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaylistEntry {
    pub playlist_id: PlaylistId,
    pub position: i64,
    pub added_at: DateTime<Utc>,
    pub video: VideoSummary,
}

/// Limit/offset window. Construct through [`Page::new`] so the clamping rules
/// always apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    limit: i64,
    offset: i64,
}

impl Page {
    /// Missing or non-positive limits fall back to the default, large limits
    /// are clamped to [`MAX_PAGE_LIMIT`], negative offsets become zero.
    pub fn new(limit: Option<i64>, offset: Option<i64>) -> Self {
        let limit = match limit {
            Some(value) if value > 0 => value.min(MAX_PAGE_LIMIT),
            _ => DEFAULT_PAGE_LIMIT,
        };
        let offset = offset.unwrap_or(0).max(0);
        Self { limit, offset }
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vote_kind_parses_known_values_only() {
        assert_eq!("like".parse::<VoteKind>().unwrap(), VoteKind::Like);
        assert_eq!("dislike".parse::<VoteKind>().unwrap(), VoteKind::Dislike);
        for bad in ["", "Like", "love", "none"] {
            let err = bad.parse::<VoteKind>().unwrap_err();
            assert!(matches!(err, EngagementError::InvalidInput(_)), "{bad}");
        }
    }

    #[test]
    fn page_clamps_limit_and_offset() {
        let page = Page::new(Some(500), Some(-3));
        assert_eq!(page.limit(), MAX_PAGE_LIMIT);
        assert_eq!(page.offset(), 0);

        let page = Page::default();
        assert_eq!(page.limit(), DEFAULT_PAGE_LIMIT);
        assert_eq!(page.offset(), 0);

        let page = Page::new(Some(0), Some(40));
        assert_eq!(page.limit(), DEFAULT_PAGE_LIMIT);
        assert_eq!(page.offset(), 40);

        assert_eq!(Page::new(Some(7), None).limit(), 7);
    }

    #[test]
    fn comment_view_flattens_comment_fields() {
        let now = Utc::now();
        let view = CommentView {
            comment: Comment {
                id: 1,
                video_id: 2,
                author_id: 3,
                parent_id: None,
                body: "nice".into(),
                like_count: 4,
                is_pinned: true,
                is_creator_liked: false,
                created_at: now,
                updated_at: now,
            },
            author: Profile {
                user_id: 3,
                channel_name: "chan".into(),
                ..Profile::default()
            },
            reply_count: 0,
            viewer_vote: Some(VoteKind::Dislike),
            is_video_creator: false,
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["id"], 1);
        assert_eq!(json["like_count"], 4);
        assert_eq!(json["viewer_vote"], "dislike");
        assert_eq!(json["author"]["channel_name"], "chan");
    }
}
