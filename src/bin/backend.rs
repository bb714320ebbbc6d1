#![forbid(unsafe_code)]

//! Axum backend exposing comment threads, comment votes, liked videos and
//! playlists.
//!
//! Authentication happens upstream: the gateway resolves the session and
//! forwards the user id in the `x-user-id` header. Requests without it are
//! treated as anonymous and may only read public data.

use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
};

use anyhow::{Context, Result, anyhow};
use axum::{
    Json, Router,
    extract::{FromRequestParts, Path as AxumPath, Query, State},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use newtube_engagement::{
    Engagement, EngagementError,
    config::{RuntimeOverrides, RuntimeSettings, resolve_runtime_settings},
    model::{
        CommentId, CommentView, NewComment, NewPlaylist, Page, Playlist, PlaylistEntry,
        PlaylistId, UserId, VideoId, VoteOutcome,
    },
    playlists::PlaylistChanges,
};
use serde::{Deserialize, Serialize};
use tokio::signal;
use tracing_subscriber::EnvFilter;

/// Header carrying the authenticated user id set by the gateway.
const CALLER_HEADER: &str = "x-user-id";

#[derive(Debug, Clone)]
struct BackendArgs {
    settings: RuntimeSettings,
    listen_host: IpAddr,
}

impl BackendArgs {
    fn parse() -> Result<Self> {
        Self::from_iter(std::env::args().skip(1))
    }

    fn from_iter<I>(iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut db_path_override: Option<PathBuf> = None;
        let mut port_override: Option<u16> = None;
        let mut host_override: Option<IpAddr> = None;
        let mut args = iter.into_iter();
        while let Some(arg) = args.next() {
            if let Some(value) = arg.strip_prefix("--db-path=") {
                db_path_override = Some(PathBuf::from(value));
                continue;
            }
            if let Some(value) = arg.strip_prefix("--port=") {
                port_override = Some(parse_port_arg(value)?);
                continue;
            }
            if let Some(value) = arg.strip_prefix("--host=") {
                host_override = Some(parse_host_arg(value)?);
                continue;
            }

            match arg.as_str() {
                "--db-path" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--db-path requires a value"))?;
                    db_path_override = Some(PathBuf::from(value));
                }
                "--port" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--port requires a value"))?;
                    port_override = Some(parse_port_arg(&value)?);
                }
                "--host" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--host requires a value"))?;
                    host_override = Some(parse_host_arg(&value)?);
                }
                _ => return Err(anyhow!("unknown argument: {arg}")),
            }
        }

        let settings = resolve_runtime_settings(RuntimeOverrides {
            db_path: db_path_override,
            newtube_port: port_override,
            ..RuntimeOverrides::default()
        })?;
        let listen_host = match host_override {
            Some(host) => host,
            None => parse_host_arg(&settings.newtube_host)?,
        };

        Ok(Self {
            settings,
            listen_host,
        })
    }
}

fn parse_port_arg(value: &str) -> Result<u16> {
    value
        .parse::<u16>()
        .context("expected a numeric port between 0 and 65535")
}

fn parse_host_arg(value: &str) -> Result<IpAddr> {
    value
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/NEWTUBE_HOST")
}

#[derive(Clone)]
struct AppState {
    engagement: Engagement,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<EngagementError> for ApiError {
    fn from(err: EngagementError) -> Self {
        let status = match &err {
            EngagementError::NotFound(_) => StatusCode::NOT_FOUND,
            EngagementError::Unauthorized(_) => StatusCode::FORBIDDEN,
            EngagementError::Unauthenticated => StatusCode::UNAUTHORIZED,
            EngagementError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            EngagementError::Conflict(_) => StatusCode::CONFLICT,
            EngagementError::Internal(inner) => {
                // Only the generic message leaves the process.
                tracing::error!(error = ?inner, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// The caller forwarded by the gateway, `None` for anonymous requests.
#[derive(Debug, Clone, Copy)]
struct Caller(Option<UserId>);

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(raw) = parts.headers.get(CALLER_HEADER) else {
            return Ok(Self(None));
        };
        let id = raw
            .to_str()
            .ok()
            .and_then(|value| value.trim().parse::<UserId>().ok())
            .ok_or_else(|| ApiError::bad_request(format!("malformed {CALLER_HEADER} header")))?;
        Ok(Self(Some(id)))
    }
}

#[derive(Debug, Default, Deserialize)]
struct PageQuery {
    limit: Option<i64>,
    offset: Option<i64>,
}

impl PageQuery {
    fn page(&self) -> Page {
        Page::new(self.limit, self.offset)
    }
}

#[derive(Deserialize)]
struct EditCommentRequest {
    body: String,
}

#[derive(Deserialize)]
struct PinRequest {
    pinned: bool,
}

#[derive(Deserialize)]
struct CreatorLikeRequest {
    liked: bool,
}

#[derive(Deserialize)]
struct VoteRequest {
    kind: String,
}

#[derive(Deserialize)]
struct PlaylistVideoRequest {
    video_id: VideoId,
}

#[derive(Debug, Serialize)]
struct CommentCountResponse {
    video_id: VideoId,
    count: i64,
}

#[derive(Debug, Serialize)]
struct LikeStatusResponse {
    video_id: VideoId,
    liked: bool,
    /// Whether this request changed anything.
    #[serde(skip_serializing_if = "Option::is_none")]
    changed: Option<bool>,
}

#[derive(Debug, Serialize)]
struct VideoLikeCountResponse {
    video_id: VideoId,
    like_count: i64,
}

#[derive(Debug, Serialize)]
struct ContainingPlaylistsResponse {
    video_id: VideoId,
    playlist_ids: Vec<PlaylistId>,
}

#[derive(Debug, Serialize)]
struct MembershipResponse {
    playlist_id: PlaylistId,
    video_id: VideoId,
    changed: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let BackendArgs {
        settings,
        listen_host,
    } = BackendArgs::parse()?;

    let engagement = Engagement::open(&settings)
        .await
        .with_context(|| format!("opening engagement DB {}", settings.db_path.display()))?;

    let app = router(AppState { engagement });

    let addr = SocketAddr::new(listen_host, settings.newtube_port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    tracing::info!(%addr, db = %settings.db_path.display(), "engagement API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/comments", post(create_comment))
        .route(
            "/api/comments/{id}",
            put(edit_comment).delete(delete_comment),
        )
        .route("/api/comments/{id}/replies", get(list_replies))
        .route("/api/comments/{id}/pin", put(pin_comment))
        .route("/api/comments/{id}/creator-like", put(creator_like_comment))
        .route(
            "/api/comments/{id}/vote",
            post(vote_comment).delete(remove_comment_vote),
        )
        .route("/api/videos/liked", get(list_liked_videos))
        .route("/api/videos/{id}/comments", get(list_comments))
        .route("/api/videos/{id}/comments/count", get(comment_count))
        .route(
            "/api/videos/{id}/like",
            get(video_like_status).post(like_video).delete(unlike_video),
        )
        .route("/api/videos/{id}/likes", get(video_like_count))
        .route("/api/playlists", get(my_playlists).post(create_playlist))
        .route("/api/playlists/liked", get(get_liked_playlist))
        .route("/api/playlists/check/{video}", get(playlists_containing_video))
        .route(
            "/api/playlists/{id}",
            get(get_playlist)
                .put(update_playlist)
                .delete(delete_playlist),
        )
        .route(
            "/api/playlists/{id}/videos",
            get(playlist_entries).post(add_playlist_video),
        )
        .route(
            "/api/playlists/{id}/videos/{video}",
            axum::routing::delete(remove_playlist_video),
        )
        .fallback(api_fallback)
        .with_state(state)
}

async fn shutdown_signal() {
    // Only graceful shutdown depends on this; Ctrl+C still terminates.
    if let Err(err) = signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to install Ctrl+C handler");
    }
}

async fn api_fallback() -> ApiError {
    ApiError::not_found("endpoint not found")
}

async fn create_comment(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(input): Json<NewComment>,
) -> ApiResult<(StatusCode, Json<CommentView>)> {
    let view = state.engagement.create_comment(caller, &input).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn list_comments(
    State(state): State<AppState>,
    Caller(caller): Caller,
    AxumPath(video): AxumPath<VideoId>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Vec<CommentView>>> {
    let views = state
        .engagement
        .list_comments(caller, video, query.page())
        .await?;
    Ok(Json(views))
}

async fn list_replies(
    State(state): State<AppState>,
    Caller(caller): Caller,
    AxumPath(parent): AxumPath<CommentId>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Vec<CommentView>>> {
    let views = state
        .engagement
        .list_replies(caller, parent, query.page())
        .await?;
    Ok(Json(views))
}

async fn edit_comment(
    State(state): State<AppState>,
    Caller(caller): Caller,
    AxumPath(id): AxumPath<CommentId>,
    Json(request): Json<EditCommentRequest>,
) -> ApiResult<Json<CommentView>> {
    let view = state
        .engagement
        .edit_comment(caller, id, &request.body)
        .await?;
    Ok(Json(view))
}

async fn delete_comment(
    State(state): State<AppState>,
    Caller(caller): Caller,
    AxumPath(id): AxumPath<CommentId>,
) -> ApiResult<StatusCode> {
    state.engagement.delete_comment(caller, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn pin_comment(
    State(state): State<AppState>,
    Caller(caller): Caller,
    AxumPath(id): AxumPath<CommentId>,
    Json(request): Json<PinRequest>,
) -> ApiResult<Json<CommentView>> {
    let view = state
        .engagement
        .set_pinned(caller, id, request.pinned)
        .await?;
    Ok(Json(view))
}

async fn creator_like_comment(
    State(state): State<AppState>,
    Caller(caller): Caller,
    AxumPath(id): AxumPath<CommentId>,
    Json(request): Json<CreatorLikeRequest>,
) -> ApiResult<Json<CommentView>> {
    let view = state
        .engagement
        .set_creator_liked(caller, id, request.liked)
        .await?;
    Ok(Json(view))
}

async fn vote_comment(
    State(state): State<AppState>,
    Caller(caller): Caller,
    AxumPath(id): AxumPath<CommentId>,
    Json(request): Json<VoteRequest>,
) -> ApiResult<Json<VoteOutcome>> {
    let outcome = state.engagement.vote(caller, id, &request.kind).await?;
    Ok(Json(outcome))
}

async fn remove_comment_vote(
    State(state): State<AppState>,
    Caller(caller): Caller,
    AxumPath(id): AxumPath<CommentId>,
) -> ApiResult<Json<VoteOutcome>> {
    let outcome = state.engagement.remove_vote(caller, id).await?;
    Ok(Json(outcome))
}

async fn comment_count(
    State(state): State<AppState>,
    AxumPath(video): AxumPath<VideoId>,
) -> ApiResult<Json<CommentCountResponse>> {
    let count = state.engagement.comment_count(video).await?;
    Ok(Json(CommentCountResponse {
        video_id: video,
        count,
    }))
}

async fn like_video(
    State(state): State<AppState>,
    Caller(caller): Caller,
    AxumPath(video): AxumPath<VideoId>,
) -> ApiResult<Json<LikeStatusResponse>> {
    let changed = state.engagement.like_video(caller, video).await?;
    Ok(Json(LikeStatusResponse {
        video_id: video,
        liked: true,
        changed: Some(changed),
    }))
}

async fn unlike_video(
    State(state): State<AppState>,
    Caller(caller): Caller,
    AxumPath(video): AxumPath<VideoId>,
) -> ApiResult<Json<LikeStatusResponse>> {
    let changed = state.engagement.unlike_video(caller, video).await?;
    Ok(Json(LikeStatusResponse {
        video_id: video,
        liked: false,
        changed: Some(changed),
    }))
}

async fn video_like_status(
    State(state): State<AppState>,
    Caller(caller): Caller,
    AxumPath(video): AxumPath<VideoId>,
) -> ApiResult<Json<LikeStatusResponse>> {
    let liked = state.engagement.is_video_liked(caller, video).await?;
    Ok(Json(LikeStatusResponse {
        video_id: video,
        liked,
        changed: None,
    }))
}

async fn list_liked_videos(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Vec<PlaylistEntry>>> {
    let entries = state.engagement.liked_videos(caller, query.page()).await?;
    Ok(Json(entries))
}

async fn video_like_count(
    State(state): State<AppState>,
    AxumPath(video): AxumPath<VideoId>,
) -> ApiResult<Json<VideoLikeCountResponse>> {
    let like_count = state.engagement.video_like_count(video).await?;
    Ok(Json(VideoLikeCountResponse {
        video_id: video,
        like_count,
    }))
}

async fn get_liked_playlist(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> ApiResult<Json<Playlist>> {
    state
        .engagement
        .liked_playlist(caller)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("no liked videos yet"))
}

async fn playlists_containing_video(
    State(state): State<AppState>,
    Caller(caller): Caller,
    AxumPath(video): AxumPath<VideoId>,
) -> ApiResult<Json<ContainingPlaylistsResponse>> {
    let playlist_ids = state
        .engagement
        .playlists_containing(caller, video)
        .await?;
    Ok(Json(ContainingPlaylistsResponse {
        video_id: video,
        playlist_ids,
    }))
}

async fn create_playlist(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(input): Json<NewPlaylist>,
) -> ApiResult<(StatusCode, Json<Playlist>)> {
    let playlist = state.engagement.create_playlist(caller, &input).await?;
    Ok((StatusCode::CREATED, Json(playlist)))
}

async fn my_playlists(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> ApiResult<Json<Vec<Playlist>>> {
    Ok(Json(state.engagement.my_playlists(caller).await?))
}

async fn get_playlist(
    State(state): State<AppState>,
    Caller(caller): Caller,
    AxumPath(id): AxumPath<PlaylistId>,
) -> ApiResult<Json<Playlist>> {
    Ok(Json(state.engagement.playlist(caller, id).await?))
}

async fn update_playlist(
    State(state): State<AppState>,
    Caller(caller): Caller,
    AxumPath(id): AxumPath<PlaylistId>,
    Json(changes): Json<PlaylistChanges>,
) -> ApiResult<Json<Playlist>> {
    let playlist = state
        .engagement
        .update_playlist(caller, id, &changes)
        .await?;
    Ok(Json(playlist))
}

async fn delete_playlist(
    State(state): State<AppState>,
    Caller(caller): Caller,
    AxumPath(id): AxumPath<PlaylistId>,
) -> ApiResult<StatusCode> {
    state.engagement.delete_playlist(caller, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn playlist_entries(
    State(state): State<AppState>,
    Caller(caller): Caller,
    AxumPath(id): AxumPath<PlaylistId>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Vec<PlaylistEntry>>> {
    let entries = state
        .engagement
        .playlist_entries(caller, id, query.page())
        .await?;
    Ok(Json(entries))
}

async fn add_playlist_video(
    State(state): State<AppState>,
    Caller(caller): Caller,
    AxumPath(id): AxumPath<PlaylistId>,
    Json(request): Json<PlaylistVideoRequest>,
) -> ApiResult<Json<MembershipResponse>> {
    let changed = state
        .engagement
        .add_to_playlist(caller, id, request.video_id)
        .await?;
    Ok(Json(MembershipResponse {
        playlist_id: id,
        video_id: request.video_id,
        changed,
    }))
}

async fn remove_playlist_video(
    State(state): State<AppState>,
    Caller(caller): Caller,
    AxumPath((id, video)): AxumPath<(PlaylistId, VideoId)>,
) -> ApiResult<Json<MembershipResponse>> {
    let changed = state
        .engagement
        .remove_from_playlist(caller, id, video)
        .await?;
    Ok(Json(MembershipResponse {
        playlist_id: id,
        video_id: video,
        changed,
    }))
}
